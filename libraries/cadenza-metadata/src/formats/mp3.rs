//! MP3/MP2: ID3v2 header tag, MPEG audio, optional ID3v1 trailer
use crate::error::Result;
use crate::formats::{
    copy_range, id3v1, id3v2, mpeg, stream_len, FormatHandler, ParsedMetadata, WriteOptions,
    WriteReport,
};
use cadenza_core::{FormatKind, ReadSeek, TagMap};
use std::io::Write;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct Mp3Handler;

impl FormatHandler for Mp3Handler {
    fn kind(&self) -> FormatKind {
        FormatKind::Mp3
    }

    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata> {
        let len = stream_len(source)?;
        let tag = id3v2::read_tag(source, 0)?;
        let audio_start = tag.as_ref().map_or(0, id3v2::Id3v2Tag::total_len);
        let trailer = id3v1::read(source, len)?;
        let audio_end = if trailer.is_some() {
            len - id3v1::TAG_LEN
        } else {
            len
        };

        let tags = match (tag, trailer) {
            (Some(tag), _) => tag.to_tags(),
            (None, Some(trailer)) => {
                debug!("No ID3v2 tag, falling back to ID3v1");
                trailer
            }
            (None, None) => TagMap::new(),
        };

        Ok(ParsedMetadata {
            tags,
            properties: mpeg::probe(source, audio_start, audio_end)?,
        })
    }

    fn write(
        &self,
        source: &mut dyn ReadSeek,
        dest: &mut dyn Write,
        tags: &TagMap,
        options: &WriteOptions,
    ) -> Result<WriteReport> {
        let len = stream_len(source)?;
        let old = id3v2::read_tag(source, 0)?;
        let has_trailer = id3v1::has_tag(source, len)?;

        let audio_start = old.as_ref().map_or(0, id3v2::Id3v2Tag::total_len);
        let audio_end = if has_trailer {
            len - id3v1::TAG_LEN
        } else {
            len
        };
        let preserved = old
            .as_ref()
            .map(id3v2::Id3v2Tag::unmanaged_frames)
            .unwrap_or_default();

        let frames = id3v2::render_frames(tags, &preserved)?;
        let available = old.as_ref().map(|tag| tag.total_len() - id3v2::HEADER_LEN);
        let padding = options.padding_for(frames.len() as u64, available, 0);

        dest.write_all(&id3v2::render_tag(&frames, padding)?)?;
        copy_range(
            source,
            dest,
            audio_start,
            audio_end.saturating_sub(audio_start),
        )?;
        if has_trailer {
            dest.write_all(&id3v1::render(tags))?;
        }

        Ok(WriteReport {
            dropped: Vec::new(),
            padding,
        })
    }
}
