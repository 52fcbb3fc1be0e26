//! FLAC metadata blocks
use crate::bytes::read_u64_be;
use crate::error::{MetadataError, Result};
use crate::formats::vorbis::VorbisComments;
use crate::formats::{
    average_bitrate, copy_range, copy_rest, id3v2, read_at, read_exact_vec, stream_len,
    FormatHandler, ParsedMetadata, WriteOptions, WriteReport,
};
use cadenza_core::{FormatKind, ReadSeek, StreamProperties, TagMap};
use std::io::Write;

const STREAMINFO: u8 = 0;
const PADDING: u8 = 1;
const VORBIS_COMMENT: u8 = 4;
const BLOCK_HEADER_LEN: u64 = 4;
const MAX_BLOCK_LEN: usize = (1 << 24) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    kind: u8,
    data: Vec<u8>,
}

/// The metadata region of a FLAC stream
#[derive(Debug)]
struct Layout {
    /// Length of an ID3v2 tag in front of the `fLaC` marker
    prefix: u64,
    blocks: Vec<Block>,
    /// Offset of the first audio frame
    audio_start: u64,
}

impl Layout {
    fn read(source: &mut dyn ReadSeek) -> Result<Self> {
        let prefix = id3v2::read_tag(source, 0)?.map_or(0, |tag| tag.total_len());
        if read_at(source, prefix, 4)? != b"fLaC" {
            return Err(MetadataError::MalformedBlock(
                "Missing fLaC stream marker".to_string(),
            ));
        }

        let mut blocks = Vec::new();
        let mut offset = prefix + 4;
        loop {
            let header = read_at(source, offset, BLOCK_HEADER_LEN)?;
            let len = u64::from(u32::from_be_bytes([0, header[1], header[2], header[3]]));
            let data = read_exact_vec(source, len)?;
            blocks.push(Block {
                kind: header[0] & 0x7F,
                data,
            });
            offset += BLOCK_HEADER_LEN + len;
            if header[0] & 0x80 != 0 {
                break;
            }
        }
        if blocks.first().map(|block| block.kind) != Some(STREAMINFO) {
            return Err(MetadataError::MalformedBlock(
                "First FLAC block is not STREAMINFO".to_string(),
            ));
        }

        Ok(Self {
            prefix,
            blocks,
            audio_start: offset,
        })
    }

    fn stream_info(&self) -> &[u8] {
        &self.blocks[0].data
    }

    fn comments(&self) -> Result<Option<VorbisComments>> {
        self.blocks
            .iter()
            .find(|block| block.kind == VORBIS_COMMENT)
            .map(|block| VorbisComments::parse(&block.data))
            .transpose()
    }
}

fn properties(stream_info: &[u8], audio_len: u64) -> Result<StreamProperties> {
    // sample rate 20 bits, channels-1 3 bits, bits per sample-1 5 bits,
    // total samples 36 bits
    let packed = read_u64_be(stream_info, 10)?;
    let sample_rate = (packed >> 44) as u32;
    let channels = ((packed >> 41) & 0x7) as u16 + 1;
    let total_samples = packed & 0xF_FFFF_FFFF;

    let seconds = if sample_rate > 0 {
        total_samples as f64 / f64::from(sample_rate)
    } else {
        0.0
    };
    Ok(StreamProperties {
        duration: seconds as u64,
        bitrate: average_bitrate(audio_len, seconds),
        sample_rate,
        channels,
        created_at: None,
    })
}

fn push_block(out: &mut Vec<u8>, kind: u8, data: &[u8], last: bool) -> Result<()> {
    if data.len() > MAX_BLOCK_LEN {
        return Err(MetadataError::MalformedBlock(format!(
            "FLAC metadata block of {} bytes exceeds the 24-bit length field",
            data.len()
        )));
    }
    let len = (data.len() as u32).to_be_bytes();
    out.push(if last { kind | 0x80 } else { kind });
    out.extend_from_slice(&len[1..]);
    out.extend_from_slice(data);
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FlacHandler;

impl FormatHandler for FlacHandler {
    fn kind(&self) -> FormatKind {
        FormatKind::Flac
    }

    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata> {
        let len = stream_len(source)?;
        let layout = Layout::read(source)?;
        let tags = layout
            .comments()?
            .map(|comments| comments.tags)
            .unwrap_or_default();
        Ok(ParsedMetadata {
            tags,
            properties: properties(layout.stream_info(), len - layout.audio_start)?,
        })
    }

    fn write(
        &self,
        source: &mut dyn ReadSeek,
        dest: &mut dyn Write,
        tags: &TagMap,
        options: &WriteOptions,
    ) -> Result<WriteReport> {
        let layout = Layout::read(source)?;
        let comments = layout
            .comments()?
            .unwrap_or_default()
            .with_tags(tags)
            .render()?;

        let mut kept: Vec<(u8, &[u8])> = vec![
            (STREAMINFO, layout.stream_info()),
            (VORBIS_COMMENT, &comments),
        ];
        kept.extend(
            layout.blocks[1..]
                .iter()
                .filter(|block| block.kind != VORBIS_COMMENT && block.kind != PADDING)
                .map(|block| (block.kind, block.data.as_slice())),
        );

        let needed: u64 = kept
            .iter()
            .map(|(_, data)| BLOCK_HEADER_LEN + data.len() as u64)
            .sum();
        let available = layout.audio_start - layout.prefix - 4;
        let padding = options.padding_for(needed, Some(available), BLOCK_HEADER_LEN);

        let mut region = b"fLaC".to_vec();
        let count = kept.len();
        for (index, (kind, data)) in kept.into_iter().enumerate() {
            push_block(&mut region, kind, data, padding == 0 && index + 1 == count)?;
        }
        if padding > 0 {
            let zeros = vec![0u8; (padding - BLOCK_HEADER_LEN) as usize];
            push_block(&mut region, PADDING, &zeros, true)?;
        }

        copy_range(source, dest, 0, layout.prefix)?;
        dest.write_all(&region)?;
        copy_rest(source, dest, layout.audio_start)?;

        Ok(WriteReport {
            dropped: Vec::new(),
            padding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream_info(seconds: u64) -> Vec<u8> {
        let mut data = vec![0u8; 34];
        data[..2].copy_from_slice(&4096u16.to_be_bytes());
        data[2..4].copy_from_slice(&4096u16.to_be_bytes());
        let packed: u64 = (44_100 << 44) | (1 << 41) | (15 << 36) | (44_100 * seconds);
        data[10..18].copy_from_slice(&packed.to_be_bytes());
        data
    }

    fn comment_block(comments: &[(&str, &str)]) -> Vec<u8> {
        VorbisComments {
            vendor: "reference libFLAC".to_string(),
            tags: comments.iter().copied().collect(),
            preserved: Vec::new(),
        }
        .render()
        .unwrap()
    }

    fn flac_file(prefix: &[u8]) -> Vec<u8> {
        let mut out = prefix.to_vec();
        out.extend(b"fLaC");
        push_block(&mut out, STREAMINFO, &stream_info(5), false).unwrap();
        push_block(
            &mut out,
            VORBIS_COMMENT,
            &comment_block(&[("title", "Tone"), ("artist", "A"), ("artist", "B")]),
            false,
        )
        .unwrap();
        push_block(&mut out, 6, b"picture-bytes", false).unwrap();
        push_block(&mut out, PADDING, &[0; 200], true).unwrap();
        out.extend(vec![0xF8; 80_000]);
        out
    }

    #[test]
    fn parses_streaminfo_and_comments() {
        let parsed = FlacHandler.parse(&mut Cursor::new(flac_file(&[]))).unwrap();
        assert_eq!(parsed.tags.get("title"), ["Tone"]);
        assert_eq!(parsed.tags.get("artist"), ["A", "B"]);
        assert_eq!(parsed.properties.duration, 5);
        assert_eq!(parsed.properties.sample_rate, 44_100);
        assert_eq!(parsed.properties.channels, 2);
        assert_eq!(parsed.properties.bitrate, 128_000);
    }

    #[test]
    fn small_edit_reuses_padding() {
        let original = flac_file(&[]);
        let mut tags = TagMap::new();
        tags.set("title", ["Tone 2"]);
        tags.set("artist", ["A", "B"]);
        let mut out = Vec::new();
        let report = FlacHandler
            .write(
                &mut Cursor::new(original.clone()),
                &mut out,
                &tags,
                &WriteOptions::default(),
            )
            .unwrap();

        assert_eq!(out.len(), original.len());
        assert_eq!(report.padding, 200 + 4 - 2);
        assert_eq!(out[out.len() - 80_000..], original[original.len() - 80_000..]);

        let layout = Layout::read(&mut Cursor::new(out.clone())).unwrap();
        let kinds: Vec<u8> = layout.blocks.iter().map(|block| block.kind).collect();
        assert_eq!(kinds, [STREAMINFO, VORBIS_COMMENT, 6, PADDING]);
        assert_eq!(layout.blocks[2].data, b"picture-bytes");
        let parsed = FlacHandler.parse(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed.tags.get("title"), ["Tone 2"]);
    }

    #[test]
    fn growth_past_padding_creates_new_padding() {
        let mut tags = TagMap::new();
        tags.set("lyrics", ["la ".repeat(1000)]);
        let mut out = Vec::new();
        let report = FlacHandler
            .write(
                &mut Cursor::new(flac_file(&[])),
                &mut out,
                &tags,
                &WriteOptions::default(),
            )
            .unwrap();
        assert!(report.padding >= 1024);
        let parsed = FlacHandler.parse(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed.tags.get("lyrics")[0].len(), 3000);
        assert!(!parsed.tags.contains("title"));
        assert_eq!(parsed.properties.duration, 5);
    }

    #[test]
    fn id3_prefix_is_tolerated_and_kept() {
        let mut id3 = TagMap::new();
        id3.set("title", ["ignored"]);
        let frames = id3v2::render_frames(&id3, &[]).unwrap();
        let prefix = id3v2::render_tag(&frames, 0).unwrap();
        let data = flac_file(&prefix);

        let parsed = FlacHandler.parse(&mut Cursor::new(data.clone())).unwrap();
        assert_eq!(parsed.tags.get("title"), ["Tone"]);

        let mut out = Vec::new();
        FlacHandler
            .write(
                &mut Cursor::new(data),
                &mut out,
                &TagMap::new(),
                &WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(out[..prefix.len()], prefix[..]);
        assert!(FlacHandler
            .parse(&mut Cursor::new(out))
            .unwrap()
            .tags
            .is_empty());
    }

    #[test]
    fn missing_marker_is_malformed() {
        let err = FlacHandler
            .parse(&mut Cursor::new(b"RIFF0000WAVE".to_vec()))
            .unwrap_err();
        assert!(matches!(err, MetadataError::MalformedBlock(_)));
    }
}
