//! APEv2 tags with Musepack and WavPack stream headers
//!
//! The tag sits at the end of the file, before an ID3v1 trailer when one is
//! present. Text items may hold several NUL-separated values. Binary and
//! locator items are never exposed and are kept as-is on rewrite.
use crate::bytes::{read_u32_le, ByteReader};
use crate::error::{MetadataError, Result};
use crate::formats::{
    average_bitrate, copy_range, copy_rest, id3v1, id3v2, read_at, read_up_to, stream_len,
    FormatHandler, ParsedMetadata, WriteOptions, WriteReport,
};
use cadenza_core::{is_valid_tag_name, FormatKind, ReadSeek, StreamProperties, TagMap};
use std::io::Write;
use tracing::debug;

const PREAMBLE: &[u8; 8] = b"APETAGEX";
const FOOTER_LEN: u64 = 32;
const VERSION: u32 = 2000;
const HAS_HEADER: u32 = 1 << 31;
const IS_HEADER: u32 = 1 << 29;
const ITEM_TYPE_MASK: u32 = 0b110;
const ITEM_TEXT: u32 = 0;

/// Canonical APE item keys for the common tags
const KEYS: &[(&str, &str)] = &[
    ("Title", "title"),
    ("Artist", "artist"),
    ("Album", "album"),
    ("Album Artist", "albumartist"),
    ("Genre", "genre"),
    ("Track", "tracknumber"),
    ("Year", "date"),
    ("Composer", "composer"),
    ("Disc", "discnumber"),
    ("Comment", "comment"),
    ("ISRC", "isrc"),
    ("Lyrics", "lyrics"),
    ("Grouping", "grouping"),
    ("Language", "language"),
];

/// Keys the APEv2 format reserves
const FORBIDDEN_KEYS: &[&str] = &["ID3", "TAG", "OggS", "MP+"];

const MPC_RATES: [u32; 4] = [44_100, 48_000, 37_800, 32_000];
const WAVPACK_RATES: [u32; 15] = [
    6_000, 8_000, 9_600, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 64_000,
    88_200, 96_000, 192_000,
];

/// Tag name for an APE item key; `None` when the key cannot be a tag name
fn tag_for_key(key: &str) -> Option<String> {
    if let Some((_, tag)) = KEYS.iter().find(|(name, _)| name.eq_ignore_ascii_case(key)) {
        return Some((*tag).to_string());
    }
    let lowered = key.to_ascii_lowercase();
    is_valid_tag_name(&lowered).then_some(lowered)
}

/// APE item key used to store `tag`
fn key_for_tag(tag: &str) -> Result<String> {
    let key = KEYS
        .iter()
        .find(|(_, name)| *name == tag)
        .map_or_else(|| tag.to_ascii_uppercase(), |(key, _)| (*key).to_string());
    let valid = (2..=255).contains(&key.len())
        && key.bytes().all(|b| (0x20..=0x7E).contains(&b))
        && !FORBIDDEN_KEYS.iter().any(|f| f.eq_ignore_ascii_case(&key));
    if valid {
        Ok(key)
    } else {
        Err(MetadataError::InvalidValue {
            field: tag.to_string(),
            value: "name cannot be stored as an APEv2 key".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Item {
    key: String,
    flags: u32,
    value: Vec<u8>,
}

impl Item {
    fn is_text(&self) -> bool {
        self.flags & ITEM_TYPE_MASK == ITEM_TEXT
    }

    fn render(&self, out: &mut Vec<u8>) -> Result<()> {
        let len = u32::try_from(self.value.len()).map_err(|_| MetadataError::InvalidValue {
            field: self.key.clone(),
            value: format!("{} bytes", self.value.len()),
        })?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(self.key.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.value);
        Ok(())
    }
}

/// A located tag and its byte range in the file
#[derive(Debug)]
struct ApeTag {
    start: u64,
    end: u64,
    items: Vec<Item>,
}

impl ApeTag {
    fn locate(source: &mut dyn ReadSeek, len: u64) -> Result<Option<Self>> {
        let mut candidates = vec![len];
        if id3v1::has_tag(source, len)? {
            candidates.push(len - id3v1::TAG_LEN);
        }
        for end in candidates {
            let Some(footer_at) = end.checked_sub(FOOTER_LEN) else {
                continue;
            };
            let footer = read_at(source, footer_at, FOOTER_LEN)?;
            if &footer[..8] != PREAMBLE {
                continue;
            }
            let size = u64::from(read_u32_le(&footer, 12)?);
            let count = read_u32_le(&footer, 16)?;
            let flags = read_u32_le(&footer, 20)?;
            if flags & IS_HEADER != 0 {
                continue;
            }
            let items_start = size
                .checked_sub(FOOTER_LEN)
                .and_then(|items_len| footer_at.checked_sub(items_len))
                .ok_or_else(|| {
                    MetadataError::MalformedBlock(format!("APE tag size {} out of range", size))
                })?;
            let start = if flags & HAS_HEADER != 0 {
                items_start.checked_sub(FOOTER_LEN).ok_or_else(|| {
                    MetadataError::MalformedBlock("APE header before start of file".to_string())
                })?
            } else {
                items_start
            };
            let data = read_at(source, items_start, footer_at - items_start)?;
            return Ok(Some(Self {
                start,
                end,
                items: parse_items(&data, count)?,
            }));
        }
        Ok(None)
    }

    fn to_tags(&self) -> TagMap {
        let mut tags = TagMap::new();
        for item in self.items.iter().filter(|item| item.is_text()) {
            if let Some(tag) = tag_for_key(&item.key) {
                let text = String::from_utf8_lossy(&item.value);
                tags.extend(&tag, text.split('\0'));
            }
        }
        tags
    }

    /// Items a rewrite carries over: non-text items and keys that are not
    /// tag names
    fn unmanaged(&self) -> impl Iterator<Item = &Item> {
        self.items
            .iter()
            .filter(|item| !item.is_text() || tag_for_key(&item.key).is_none())
    }
}

fn parse_items(data: &[u8], count: u32) -> Result<Vec<Item>> {
    let mut reader = ByteReader::new(data);
    let mut items = Vec::new();
    for _ in 0..count {
        if reader.is_empty() {
            break;
        }
        let len = reader.u32_le()? as usize;
        let flags = reader.u32_le()?;
        let rest = reader.rest();
        let key_len = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            MetadataError::MalformedBlock("APE item key is not terminated".to_string())
        })?;
        let key = String::from_utf8_lossy(reader.bytes(key_len)?).into_owned();
        reader.skip(1)?;
        let value = reader.bytes(len)?.to_vec();
        items.push(Item { key, flags, value });
    }
    Ok(items)
}

fn render_tag(items: &[u8], count: u32) -> Result<Vec<u8>> {
    let size = u32::try_from(items.len() as u64 + FOOTER_LEN).map_err(|_| {
        MetadataError::MalformedBlock("APE tag exceeds 4 GiB".to_string())
    })?;
    let frame = |flags: u32| {
        let mut out = PREAMBLE.to_vec();
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&[0; 8]);
        out
    };
    let mut out = frame(HAS_HEADER | IS_HEADER);
    out.extend_from_slice(items);
    out.extend(frame(HAS_HEADER));
    Ok(out)
}

/// Musepack SV8 variable-length integer
fn sv8_int(reader: &mut ByteReader<'_>) -> Result<u64> {
    let mut value = 0u64;
    for _ in 0..9 {
        let byte = reader.u8()?;
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(MetadataError::MalformedBlock(
        "Musepack size field too long".to_string(),
    ))
}

/// Sample count, rate and channels from a Musepack stream header
fn musepack_stream(header: &[u8]) -> Result<(u64, u32, u16)> {
    if header.starts_with(b"MP+") {
        let version = header.get(3).map_or(0, |b| b & 0x0F);
        if version < 7 {
            return Err(MetadataError::UnsupportedFormat(format!(
                "Musepack stream version {}",
                version
            )));
        }
        let frames = u64::from(read_u32_le(header, 4)?);
        let flags = read_u32_le(header, 8)?;
        let rate = MPC_RATES[((flags >> 16) & 0b11) as usize];
        return Ok(((frames * 1152).saturating_sub(576), rate, 2));
    }

    if header.starts_with(b"MPCK") {
        let mut reader = ByteReader::new(&header[4..]);
        while reader.remaining() >= 3 {
            let start = reader.position();
            let key = reader.array::<2>()?;
            let size = sv8_int(&mut reader)? as usize;
            let consumed = reader.position() - start;
            if &key == b"SH" {
                reader.skip(4)?;
                let _version = reader.u8()?;
                let samples = sv8_int(&mut reader)?;
                let silence = sv8_int(&mut reader)?;
                let rate = MPC_RATES
                    .get(usize::from(reader.u8()? >> 5))
                    .copied()
                    .ok_or_else(|| {
                        MetadataError::MalformedBlock("Musepack sample rate index".to_string())
                    })?;
                let channels = u16::from(reader.u8()? >> 4) + 1;
                return Ok((samples.saturating_sub(silence), rate, channels));
            }
            reader.skip(size.checked_sub(consumed).ok_or_else(|| {
                MetadataError::MalformedBlock("Musepack packet size".to_string())
            })?)?;
        }
    }

    Err(MetadataError::MalformedBlock(
        "No Musepack stream header".to_string(),
    ))
}

/// Sample count, rate and channels from the first WavPack block
fn wavpack_stream(header: &[u8]) -> Result<(u64, u32, u16)> {
    if !header.starts_with(b"wvpk") {
        return Err(MetadataError::MalformedBlock(
            "No WavPack block header".to_string(),
        ));
    }
    let total_samples = read_u32_le(header, 12)?;
    let flags = read_u32_le(header, 24)?;
    let rate = WAVPACK_RATES
        .get(((flags >> 23) & 0xF) as usize)
        .copied()
        .unwrap_or(0);
    let channels = if flags & 0x4 != 0 { 1 } else { 2 };
    let samples = if total_samples == u32::MAX {
        0
    } else {
        u64::from(total_samples)
    };
    Ok((samples, rate, channels))
}

/// APEv2-tagged formats; one instance per kind
#[derive(Debug, Clone, Copy)]
pub struct ApeHandler {
    kind: FormatKind,
}

impl ApeHandler {
    pub fn musepack() -> Self {
        Self {
            kind: FormatKind::Mpc,
        }
    }

    pub fn wavpack() -> Self {
        Self {
            kind: FormatKind::Wv,
        }
    }
}

impl FormatHandler for ApeHandler {
    fn kind(&self) -> FormatKind {
        self.kind
    }

    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata> {
        let len = stream_len(source)?;
        let tag = ApeTag::locate(source, len)?;
        let audio_start = id3v2::read_tag(source, 0)?.map_or(0, |tag| tag.total_len());
        let audio_end = match &tag {
            Some(tag) => tag.start,
            None if id3v1::has_tag(source, len)? => len - id3v1::TAG_LEN,
            None => len,
        };

        let header = read_up_to(source, audio_start, 4096)?;
        let (samples, sample_rate, channels) = match self.kind {
            FormatKind::Wv => wavpack_stream(&header)?,
            _ => musepack_stream(&header)?,
        };
        let seconds = if sample_rate > 0 {
            samples as f64 / f64::from(sample_rate)
        } else {
            0.0
        };

        Ok(ParsedMetadata {
            tags: tag.as_ref().map(ApeTag::to_tags).unwrap_or_default(),
            properties: StreamProperties {
                duration: seconds as u64,
                bitrate: average_bitrate(audio_end.saturating_sub(audio_start), seconds),
                sample_rate,
                channels,
                created_at: None,
            },
        })
    }

    fn write(
        &self,
        source: &mut dyn ReadSeek,
        dest: &mut dyn Write,
        tags: &TagMap,
        _options: &WriteOptions,
    ) -> Result<WriteReport> {
        let len = stream_len(source)?;
        let old = ApeTag::locate(source, len)?;
        let (start, end) = match &old {
            Some(tag) => (tag.start, tag.end),
            None if id3v1::has_tag(source, len)? => {
                let at = len - id3v1::TAG_LEN;
                (at, at)
            }
            None => (len, len),
        };

        let mut items = Vec::new();
        let mut count = 0u32;
        for (tag, values) in tags.iter_present() {
            Item {
                key: key_for_tag(tag)?,
                flags: ITEM_TEXT,
                value: values.join("\0").into_bytes(),
            }
            .render(&mut items)?;
            count += 1;
        }
        for item in old.iter().flat_map(ApeTag::unmanaged) {
            item.render(&mut items)?;
            count += 1;
        }

        copy_range(source, dest, 0, start)?;
        if count > 0 {
            dest.write_all(&render_tag(&items, count)?)?;
        } else {
            debug!("No APE items left, dropping the tag");
        }
        copy_rest(source, dest, end)?;

        Ok(WriteReport::default())
    }
}
