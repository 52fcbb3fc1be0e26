//! RIFF/WAVE, AIFF and Sun AU (read-only)
//!
//! The three uncompressed containers share a handler: the leading magic
//! picks the layout.
use crate::bytes::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be};
use crate::error::{MetadataError, Result};
use crate::formats::{id3v2, read_at, read_exact_vec, stream_len, FormatHandler, ParsedMetadata};
use crate::text::{decode_text, TextEncoding};
use cadenza_core::{FormatKind, ReadSeek, StreamProperties, TagMap};
use tracing::{debug, warn};

/// `LIST/INFO` sub-chunks and their tags
const INFO_TAGS: &[(&[u8; 4], &str)] = &[
    (b"INAM", "title"),
    (b"IART", "artist"),
    (b"IPRD", "album"),
    (b"ICMT", "comment"),
    (b"IGNR", "genre"),
    (b"ICRD", "date"),
    (b"ITRK", "tracknumber"),
    (b"ICOP", "copyright"),
    (b"ISFT", "encodedby"),
];

/// INFO text has no declared encoding; UTF-8 when it decodes, else Latin-1
fn info_text(raw: &[u8]) -> String {
    let encoding = if std::str::from_utf8(raw).is_ok() {
        TextEncoding::Utf8
    } else {
        TextEncoding::Latin1
    };
    decode_text(raw, encoding).trim_end_matches('\0').to_string()
}

fn parse_info(data: &[u8], tags: &mut TagMap) -> Result<()> {
    let mut pos = 4;
    while pos + 8 <= data.len() {
        let id = [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]];
        let len = read_u32_le(data, pos + 4)? as usize;
        let Some(raw) = data.get(pos + 8..pos + 8 + len) else {
            return Err(MetadataError::MalformedBlock(
                "INFO sub-chunk runs past its list".to_string(),
            ));
        };
        if let Some((_, tag)) = INFO_TAGS.iter().find(|(name, _)| **name == id) {
            tags.push(tag, info_text(raw));
        }
        pos += 8 + len + (len & 1);
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WavHandler;

impl FormatHandler for WavHandler {
    fn kind(&self) -> FormatKind {
        FormatKind::Wav
    }

    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata> {
        let len = stream_len(source)?;
        let magic = read_at(source, 0, 12)?;
        match (&magic[..4], &magic[8..]) {
            (b"RIFF", b"WAVE") => parse_riff(source, len),
            (b"FORM", b"AIFF" | b"AIFC") => parse_aiff(source, len),
            (b".snd", _) => parse_au(source, len),
            _ => Err(MetadataError::MalformedBlock(
                "Not a RIFF/WAVE, AIFF or AU file".to_string(),
            )),
        }
    }
}

fn parse_riff(source: &mut dyn ReadSeek, len: u64) -> Result<ParsedMetadata> {
    let mut tags = TagMap::new();
    let mut id3_tags = None;
    let mut props = StreamProperties::default();
    let mut byte_rate = 0u32;
    let mut data_len = None;

    let mut offset = 12;
    while offset + 8 <= len {
        let header = read_at(source, offset, 8)?;
        let id = [header[0], header[1], header[2], header[3]];
        let size = u64::from(read_u32_le(&header, 4)?);
        let body_at = offset + 8;
        match &id {
            b"fmt " => {
                let fmt = read_exact_vec(source, size.min(16))?;
                props.channels = read_u16_le(&fmt, 2)?;
                props.sample_rate = read_u32_le(&fmt, 4)?;
                byte_rate = read_u32_le(&fmt, 8)?;
            }
            b"data" => {
                // Streams written before their length was known carry a bogus size
                data_len = Some(size.min(len - body_at));
            }
            b"LIST" if size >= 4 => {
                let list = read_exact_vec(source, size)?;
                if &list[..4] == b"INFO" {
                    parse_info(&list, &mut tags)?;
                }
            }
            b"id3 " | b"ID3 " => match id3v2::read_tag(source, body_at) {
                Ok(tag) => id3_tags = tag.map(|tag| tag.to_tags()),
                Err(err) => warn!(error = %err, "Ignoring unreadable ID3 chunk"),
            },
            _ => debug!(chunk = %String::from_utf8_lossy(&id), "Skipping RIFF chunk"),
        }
        offset = body_at + size + (size & 1);
    }

    if let Some(id3) = id3_tags {
        for (tag, values) in id3.iter_present() {
            if !tags.contains(tag) {
                tags.set(tag, values.iter().map(String::as_str));
            }
        }
    }

    if let Some(data_len) = data_len.filter(|_| byte_rate > 0) {
        props.duration = data_len / u64::from(byte_rate);
        props.bitrate = byte_rate.saturating_mul(8);
    }

    Ok(ParsedMetadata {
        tags,
        properties: props,
    })
}

/// AIFF text chunks and their tags
const AIFF_TAGS: &[(&[u8; 4], &str)] = &[
    (b"NAME", "title"),
    (b"AUTH", "artist"),
    (b"(c) ", "copyright"),
    (b"ANNO", "comment"),
];

/// Decode the 80-bit IEEE extended float AIFF stores its sample rate in
fn extended_to_f64(raw: &[u8]) -> Result<f64> {
    let exponent = i32::from(read_u16_be(raw, 0)? & 0x7FFF);
    let mantissa = read_u64_be(raw, 2)?;
    if exponent == 0 && mantissa == 0 {
        return Ok(0.0);
    }
    let value = mantissa as f64 * 2f64.powi(exponent - 16_383 - 63);
    Ok(if raw[0] & 0x80 == 0 { value } else { -value })
}

fn parse_aiff(source: &mut dyn ReadSeek, len: u64) -> Result<ParsedMetadata> {
    let mut tags = TagMap::new();
    let mut id3_tags = None;
    let mut props = StreamProperties::default();

    let mut offset = 12;
    while offset + 8 <= len {
        let header = read_at(source, offset, 8)?;
        let id = [header[0], header[1], header[2], header[3]];
        let size = u64::from(read_u32_be(&header, 4)?);
        let body_at = offset + 8;
        if size > len - body_at {
            return Err(MetadataError::MalformedBlock(format!(
                "AIFF chunk {} runs past end of file",
                String::from_utf8_lossy(&id)
            )));
        }
        match &id {
            b"COMM" => {
                let comm = read_at(source, body_at, size.min(18))?;
                props.channels = read_u16_be(&comm, 0)?;
                let frames = read_u32_be(&comm, 2)?;
                let bits = read_u16_be(&comm, 6)?;
                let rate = extended_to_f64(comm.get(8..18).unwrap_or_default())?;
                if rate >= 1.0 {
                    props.sample_rate = rate as u32;
                    props.duration = (f64::from(frames) / rate) as u64;
                    props.bitrate = props
                        .sample_rate
                        .saturating_mul(u32::from(props.channels))
                        .saturating_mul(u32::from(bits));
                }
            }
            b"ID3 " | b"id3 " => match id3v2::read_tag(source, body_at) {
                Ok(tag) => id3_tags = tag.map(|tag| tag.to_tags()),
                Err(err) => warn!(error = %err, "Ignoring unreadable ID3 chunk"),
            },
            _ => match AIFF_TAGS.iter().find(|(name, _)| **name == id) {
                Some((_, tag)) => {
                    let raw = read_at(source, body_at, size)?;
                    tags.push(tag, info_text(&raw));
                }
                None => debug!(chunk = %String::from_utf8_lossy(&id), "Skipping AIFF chunk"),
            },
        }
        offset = body_at + size + (size & 1);
    }

    if let Some(id3) = id3_tags {
        for (tag, values) in id3.iter_present() {
            if !tags.contains(tag) {
                tags.set(tag, values.iter().map(String::as_str));
            }
        }
    }

    Ok(ParsedMetadata {
        tags,
        properties: props,
    })
}

/// Bytes per sample for the Sun AU encodings with a fixed sample width
fn au_sample_width(encoding: u32) -> Option<u32> {
    match encoding {
        1 | 2 | 27 => Some(1),
        3 => Some(2),
        4 => Some(3),
        5 | 6 => Some(4),
        7 => Some(8),
        _ => None,
    }
}

fn parse_au(source: &mut dyn ReadSeek, len: u64) -> Result<ParsedMetadata> {
    let header = read_at(source, 0, 24)?;
    let data_offset = u64::from(read_u32_be(&header, 4)?);
    let data_size = read_u32_be(&header, 8)?;
    let encoding = read_u32_be(&header, 12)?;
    let mut props = StreamProperties {
        sample_rate: read_u32_be(&header, 16)?,
        channels: u16::try_from(read_u32_be(&header, 20)?).unwrap_or(0),
        ..StreamProperties::default()
    };
    if data_offset < 24 || data_offset > len {
        return Err(MetadataError::MalformedBlock(
            "AU data offset outside the file".to_string(),
        ));
    }

    let mut tags = TagMap::new();
    let annotation = info_text(&read_at(source, 24, data_offset - 24)?);
    if !annotation.is_empty() {
        tags.push("comment", annotation);
    }

    // An all-ones size means the length was unknown when the header was written
    let data_len = match data_size {
        u32::MAX => len - data_offset,
        size => u64::from(size).min(len - data_offset),
    };
    let frame_rate = au_sample_width(encoding).map(|width| {
        u64::from(width) * u64::from(props.channels) * u64::from(props.sample_rate)
    });
    match frame_rate {
        Some(byte_rate) if byte_rate > 0 => {
            props.duration = data_len / byte_rate;
            props.bitrate = u32::try_from(byte_rate * 8).unwrap_or(u32::MAX);
        }
        _ => debug!(encoding, "AU encoding has no fixed sample width"),
    }

    Ok(ParsedMetadata {
        tags,
        properties: props,
    })
}
