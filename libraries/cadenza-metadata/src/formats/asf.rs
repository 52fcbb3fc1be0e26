//! ASF/WMA header objects (read-only)
use crate::bytes::{filetime_to_unix, format_guid, read_u32_le, read_u64_le, ByteReader};
use crate::error::{MetadataError, Result};
use crate::formats::{read_at, read_exact_vec, FormatHandler, ParsedMetadata};
use crate::text::{decode_text, TextEncoding};
use cadenza_core::{FormatKind, ReadSeek, StreamProperties, TagMap};
use tracing::{debug, warn};

const HEADER_OBJECT: &str = "75B22630-668E-11CF-A6D9-00AA0062CE6C";
const FILE_PROPERTIES: &str = "8CABDCA1-A947-11CF-8EE4-00C00C205365";
const STREAM_PROPERTIES: &str = "B7DC0791-A9B7-11CF-8EE6-00C00C205365";
const CONTENT_DESCRIPTION: &str = "75B22633-668E-11CF-A6D9-00AA0062CE6C";
const EXTENDED_CONTENT_DESCRIPTION: &str = "D2D0A440-E307-11D2-97F0-00A0C95EA850";
const AUDIO_MEDIA: &str = "F8699E40-5B4D-11CF-A8FD-00805F5C442B";

const HEADER_LEN: u64 = 30;
const OBJECT_HEADER_LEN: usize = 24;

/// Content Description fields in stream order
const DESCRIPTION_TAGS: [&str; 5] = ["title", "artist", "copyright", "comment", "rating"];

/// Extended Content Description names that surface as tags
const EXTENDED_TAGS: &[(&str, &str)] = &[
    ("WM/TrackNumber", "tracknumber"),
    ("WM/AlbumTitle", "album"),
    ("WM/AlbumArtist", "albumartist"),
    ("WM/Genre", "genre"),
    ("WM/Year", "date"),
    ("WM/Composer", "composer"),
    ("WM/Mood", "mood"),
    ("WM/Lyrics", "lyrics"),
    ("WM/BeatsPerMinute", "bpm"),
    ("WM/ContentGroupDescription", "grouping"),
];

fn guid_at(data: &[u8], offset: usize) -> Result<String> {
    let mut reader = ByteReader::new(data);
    reader.skip(offset)?;
    Ok(format_guid(&reader.array::<16>()?))
}

/// Accumulates what the header objects describe
#[derive(Debug, Default)]
struct Header {
    tags: TagMap,
    seconds: f64,
    max_bitrate: u32,
    audio_bitrate: u32,
    sample_rate: u32,
    channels: u16,
    created_at: Option<i64>,
}

impl Header {
    fn file_properties(&mut self, body: &[u8]) -> Result<()> {
        let creation = read_u64_le(body, 24)?;
        let play_duration = read_u64_le(body, 40)?;
        let preroll = read_u64_le(body, 56)?;
        self.max_bitrate = read_u32_le(body, 76)?;

        let seconds = (play_duration as f64 / 1e7 - preroll as f64 / 1e3).trunc();
        self.seconds = seconds.max(0.0);
        // Zero is a real timestamp (1601-01-01), not "unset"
        self.created_at = Some(filetime_to_unix(creation));
        Ok(())
    }

    fn stream_properties(&mut self, body: &[u8]) -> Result<()> {
        if guid_at(body, 0)? != AUDIO_MEDIA || self.audio_bitrate > 0 {
            return Ok(());
        }
        let type_len = read_u32_le(body, 40)? as usize;
        let mut reader = ByteReader::new(body);
        reader.skip(54)?;
        let format = reader.bytes(type_len)?;
        let mut format = ByteReader::new(format);
        format.skip(2)?;
        self.channels = format.u16_le()?;
        self.sample_rate = format.u32_le()?;
        self.audio_bitrate = format.u32_le()?.saturating_mul(8);
        Ok(())
    }

    fn content_description(&mut self, body: &[u8]) -> Result<()> {
        let mut reader = ByteReader::new(body);
        let mut lengths = [0usize; 5];
        for len in &mut lengths {
            *len = usize::from(reader.u16_le()?);
        }
        for (tag, len) in DESCRIPTION_TAGS.iter().zip(lengths) {
            let value = decode_text(reader.bytes(len)?, TextEncoding::Utf16Le);
            self.tags.push(tag, value);
        }
        Ok(())
    }

    fn extended_content_description(&mut self, body: &[u8]) -> Result<()> {
        let mut reader = ByteReader::new(body);
        let count = reader.u16_le()?;
        for _ in 0..count {
            let name_len = usize::from(reader.u16_le()?);
            let name = decode_text(reader.bytes(name_len)?, TextEncoding::Utf16Le);
            let kind = reader.u16_le()?;
            let value_len = usize::from(reader.u16_le()?);
            let raw = reader.bytes(value_len)?;

            let Some((_, tag)) = EXTENDED_TAGS
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(&name))
            else {
                continue;
            };
            let number = match kind {
                3 => read_u32_le(raw, 0).map(u64::from),
                4 => read_u64_le(raw, 0),
                _ => Ok(0),
            };
            let number = match number {
                Ok(number) => number,
                Err(e) => {
                    warn!(name = %name, kind, error = %e, "Skipping short ASF value");
                    continue;
                }
            };
            let value = match kind {
                0 => decode_text(raw, TextEncoding::Utf16Le),
                3 | 4 => number.to_string(),
                5 => u16::from_le_bytes([
                    raw.first().copied().unwrap_or(0),
                    raw.get(1).copied().unwrap_or(0),
                ])
                .to_string(),
                other => {
                    debug!(name = %name, kind = other, "Skipping ASF value type");
                    continue;
                }
            };
            self.tags.push(tag, value);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AsfHandler;

impl FormatHandler for AsfHandler {
    fn kind(&self) -> FormatKind {
        FormatKind::Wma
    }

    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata> {
        let top = read_at(source, 0, HEADER_LEN)?;
        if guid_at(&top, 0)? != HEADER_OBJECT {
            return Err(MetadataError::MalformedObject(
                "Missing ASF header object".to_string(),
            ));
        }
        let size = read_u64_le(&top, 16)?;
        let count = read_u32_le(&top, 24)?;
        let body_len = size.checked_sub(HEADER_LEN).ok_or_else(|| {
            MetadataError::MalformedObject(format!("ASF header size {} too small", size))
        })?;
        let body = read_exact_vec(source, body_len)?;

        let mut header = Header::default();
        let mut offset = 0usize;
        for _ in 0..count {
            if offset + OBJECT_HEADER_LEN > body.len() {
                break;
            }
            let guid = guid_at(&body, offset)?;
            let object_len = usize::try_from(read_u64_le(&body, offset + 16)?)
                .ok()
                .filter(|&len| len >= OBJECT_HEADER_LEN && len <= body.len() - offset)
                .ok_or_else(|| {
                    MetadataError::MalformedObject(format!("Object {} has an invalid size", guid))
                })?;
            let object = &body[offset + OBJECT_HEADER_LEN..offset + object_len];
            match guid.as_str() {
                FILE_PROPERTIES => header.file_properties(object)?,
                STREAM_PROPERTIES => header.stream_properties(object)?,
                CONTENT_DESCRIPTION => header.content_description(object)?,
                EXTENDED_CONTENT_DESCRIPTION => header.extended_content_description(object)?,
                _ => debug!(guid = %guid, "Skipping ASF header object"),
            }
            offset += object_len;
        }

        let bitrate = if header.audio_bitrate > 0 {
            header.audio_bitrate
        } else {
            header.max_bitrate
        };
        Ok(ParsedMetadata {
            tags: header.tags,
            properties: StreamProperties {
                duration: header.seconds as u64,
                bitrate,
                sample_rate: header.sample_rate,
                channels: header.channels,
                created_at: header.created_at,
            },
        })
    }
}
