//! Text decoding for tag payloads
//!
//! Decoding never fails: undecodable sequences become U+FFFD so that one
//! broken tagger does not make a whole file unreadable.
use crate::error::{MetadataError, Result};

/// Source encoding of a text payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Latin1,
    /// UTF-16 with a byte order mark; little-endian when the mark is missing
    Utf16Bom,
    Utf16Be,
    Utf16Le,
    Utf8,
}

impl TextEncoding {
    /// Map the ID3v2 encoding byte
    pub fn from_id3_marker(marker: u8) -> Result<Self> {
        match marker {
            0 => Ok(Self::Latin1),
            1 => Ok(Self::Utf16Bom),
            2 => Ok(Self::Utf16Be),
            3 => Ok(Self::Utf8),
            other => Err(MetadataError::BadEncoding(other)),
        }
    }

    /// Width of the NUL terminator in bytes
    pub fn terminator_len(self) -> usize {
        match self {
            Self::Latin1 | Self::Utf8 => 1,
            Self::Utf16Bom | Self::Utf16Be | Self::Utf16Le => 2,
        }
    }
}

/// Decode a text payload, stripping a single trailing NUL
pub fn decode_text(bytes: &[u8], encoding: TextEncoding) -> String {
    let width = encoding.terminator_len();
    let bytes = match bytes.len().checked_sub(width) {
        Some(end) if bytes[end..].iter().all(|&b| b == 0) && end % width == 0 => &bytes[..end],
        _ => bytes,
    };
    match encoding {
        TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
        TextEncoding::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
        TextEncoding::Utf16Bom => match bytes {
            [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
            [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
            _ => decode_utf16(bytes, u16::from_le_bytes),
        },
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let chunks = bytes.chunks_exact(2);
    let dangling = !chunks.remainder().is_empty();
    let mut text: String = char::decode_utf16(chunks.map(|pair| unit([pair[0], pair[1]])))
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect();
    if dangling {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// Split at the first NUL terminator for `encoding`
///
/// Returns the bytes before the terminator and the bytes after it. Without
/// a terminator the whole input is the first half.
pub fn split_terminated(bytes: &[u8], encoding: TextEncoding) -> (&[u8], &[u8]) {
    let width = encoding.terminator_len();
    let found = if width == 1 {
        bytes.iter().position(|&b| b == 0)
    } else {
        // UTF-16 terminators sit on code-unit boundaries
        bytes
            .chunks_exact(2)
            .position(|pair| pair == [0, 0])
            .map(|unit| unit * 2)
    };
    match found {
        Some(at) => (&bytes[..at], &bytes[at + width..]),
        None => (bytes, &[]),
    }
}

/// Decode a NUL-separated list of values, dropping empty ones
///
/// ID3v2.4 text frames and APEv2 items store multiple values this way. In
/// UTF-16 with BOM each value carries its own mark.
pub fn decode_list(bytes: &[u8], encoding: TextEncoding) -> Vec<String> {
    let mut values = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (value, tail) = split_terminated(rest, encoding);
        let text = decode_text(value, encoding);
        if !text.is_empty() {
            values.push(text);
        }
        rest = tail;
    }
    values
}
