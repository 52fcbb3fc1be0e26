//! Per-format parsers and writers
//!
//! Every container format implements [`FormatHandler`]. Handlers are
//! stateless; the registry owns one of each and hands out references.

pub mod ape;
pub mod asf;
pub mod flac;
pub mod id3v1;
pub mod id3v2;
pub mod mp3;
pub mod mp4;
pub mod mpeg;
pub mod ogg;
pub mod vorbis;
pub mod wav;

use crate::error::{MetadataError, Result};
use cadenza_core::{FormatKind, ReadSeek, StreamProperties, TagMap, TagSupport};
use std::io::{self, Read, SeekFrom, Write};

/// What a parser extracts from a file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMetadata {
    pub tags: TagMap,
    pub properties: StreamProperties,
}

/// Values a writer could not store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedValues {
    pub tag: String,
    pub values: Vec<String>,
}

/// Outcome of a successful write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Values beyond what the format can hold, per tag
    pub dropped: Vec<DroppedValues>,
    /// Padding bytes left after the rebuilt metadata region
    pub padding: u64,
}

impl WriteReport {
    /// Whether every value made it into the file
    pub fn is_lossless(&self) -> bool {
        self.dropped.is_empty()
    }
}

/// Padding bounds for formats that keep spare room after their metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub min_padding: u64,
    pub max_padding: u64,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            min_padding: 1024,
            max_padding: 64 * 1024,
        }
    }
}

impl WriteOptions {
    /// Size of the padding region to emit after `needed` bytes of metadata
    ///
    /// `available` is the room the old metadata and padding occupied. If the
    /// new metadata fits and the leftover is within the cap, the leftover is
    /// reused so the audio does not move. `overhead` is the size of the
    /// padding structure's own header; a leftover smaller than that cannot
    /// be expressed and forces fresh padding. The result includes the
    /// header.
    pub fn padding_for(&self, needed: u64, available: Option<u64>, overhead: u64) -> u64 {
        if let Some(leftover) = available.and_then(|room| room.checked_sub(needed)) {
            if leftover <= self.max_padding.max(overhead) && (leftover == 0 || leftover >= overhead)
            {
                return leftover;
            }
        }
        (self.min_padding + needed / 100)
            .clamp(self.min_padding, self.max_padding.max(self.min_padding))
            .max(overhead)
    }
}

/// A parser/writer pair for one container format
pub trait FormatHandler: Send + Sync {
    /// Which format this handler covers
    fn kind(&self) -> FormatKind;

    /// Extract tags and stream properties
    ///
    /// A file that lacks an optional tag parses to an empty tag map.
    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata>;

    /// Copy `source` to `dest` with its metadata region rebuilt from `tags`
    ///
    /// Tags present in `tags` replace whatever the file held for them;
    /// cleared or absent tags are removed. Data the handler does not model
    /// (pictures, binary items, unknown frames) is carried over.
    fn write(
        &self,
        source: &mut dyn ReadSeek,
        dest: &mut dyn Write,
        tags: &TagMap,
        options: &WriteOptions,
    ) -> Result<WriteReport> {
        let _ = (source, dest, options);
        let field = tags.iter().next().map_or("tags", |(key, _)| key);
        Err(MetadataError::WriteNotSupportedForField {
            format: self.kind(),
            field: field.to_string(),
        })
    }

    /// Tags this handler can write
    fn writable_tags(&self) -> TagSupport {
        self.kind().tag_support()
    }
}

/// Total length of the stream
pub(crate) fn stream_len(source: &mut dyn ReadSeek) -> Result<u64> {
    Ok(source.seek(SeekFrom::End(0))?)
}

/// Read exactly `len` bytes starting at `offset`
pub(crate) fn read_at(source: &mut dyn ReadSeek, offset: u64, len: u64) -> Result<Vec<u8>> {
    source.seek(SeekFrom::Start(offset))?;
    read_exact_vec(source, len)
}

/// Read exactly `len` bytes from the current position
///
/// Grows the buffer as data arrives, so a corrupt length field cannot force
/// a huge allocation up front.
pub(crate) fn read_exact_vec(source: &mut dyn ReadSeek, len: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    source.take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Err(MetadataError::Truncated {
            needed: len,
            remaining: buf.len() as u64,
        });
    }
    Ok(buf)
}

/// Read up to `len` bytes at `offset`, stopping early at end of stream
pub(crate) fn read_up_to(source: &mut dyn ReadSeek, offset: u64, len: u64) -> Result<Vec<u8>> {
    source.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::new();
    source.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Copy `len` bytes from `offset` in `source` to `dest`
pub(crate) fn copy_range(
    source: &mut dyn ReadSeek,
    dest: &mut dyn Write,
    offset: u64,
    len: u64,
) -> Result<()> {
    source.seek(SeekFrom::Start(offset))?;
    let copied = io::copy(&mut source.take(len), dest)?;
    if copied < len {
        return Err(MetadataError::Truncated {
            needed: len,
            remaining: copied,
        });
    }
    Ok(())
}

/// Copy everything from `offset` to the end of `source`
pub(crate) fn copy_rest(source: &mut dyn ReadSeek, dest: &mut dyn Write, offset: u64) -> Result<u64> {
    source.seek(SeekFrom::Start(offset))?;
    Ok(io::copy(source, dest)?)
}

/// Bitrate in bits per second from a byte count and a duration
pub(crate) fn average_bitrate(bytes: u64, seconds: f64) -> u32 {
    if seconds > 0.0 {
        (bytes as f64 * 8.0 / seconds).round() as u32
    } else {
        0
    }
}

/// Parse a `N` or `N/T` number pair
pub(crate) fn parse_number_pair(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.trim().splitn(2, '/');
    let number = parts.next()?.trim().parse().ok()?;
    let total = match parts.next() {
        Some(total) if !total.trim().is_empty() => total.trim().parse().ok()?,
        _ => 0,
    };
    Some((number, total))
}
