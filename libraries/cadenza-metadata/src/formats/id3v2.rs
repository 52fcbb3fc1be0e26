//! ID3v2.2, 2.3 and 2.4 tags
//!
//! Reading understands all three revisions, including tag-level and
//! per-frame unsynchronisation, extended headers and the v2.4 footer.
//! Writing always produces ID3v2.4 with UTF-8 text frames.
use crate::bytes::{encode_synchsafe32, read_synchsafe32, read_u24_be, read_u32_be};
use crate::error::{MetadataError, Result};
use crate::formats::{id3v1, read_at, read_exact_vec};
use crate::text::{decode_list, decode_text, split_terminated, TextEncoding};
use cadenza_core::{is_valid_tag_name, ReadSeek, TagMap};
use tracing::{debug, trace};

pub const HEADER_LEN: u64 = 10;

const FLAG_UNSYNC: u8 = 0x80;
const FLAG_EXTENDED: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;

/// Text frames and the tag each one carries
const TEXT_FRAMES: &[(&str, &str)] = &[
    ("TIT1", "grouping"),
    ("TIT2", "title"),
    ("TIT3", "version"),
    ("TPE1", "artist"),
    ("TPE2", "performer"),
    ("TPE3", "conductor"),
    ("TPE4", "arranger"),
    ("TCOM", "composer"),
    ("TEXT", "lyricist"),
    ("TALB", "album"),
    ("TRCK", "tracknumber"),
    ("TPOS", "discnumber"),
    ("TCON", "genre"),
    ("TENC", "encodedby"),
    ("TSRC", "isrc"),
    ("TCOP", "copyright"),
    ("TPUB", "organization"),
    ("TBPM", "bpm"),
    ("TDRC", "date"),
    ("TDOR", "originaldate"),
    ("TOAL", "originalalbum"),
    ("TOPE", "originalartist"),
    ("TOLY", "author"),
    ("TLAN", "language"),
];

/// ID3v2.3 date frames, read into the same tags as their v2.4 successors
const LEGACY_DATE_FRAMES: &[(&str, &str)] = &[("TYER", "date"), ("TORY", "originaldate")];

/// ID3v2.3 frames with no v2.4 meaning; dropped when a tag is upgraded
const OBSOLETE_FRAMES: &[&str] = &["TDAT", "TIME", "TRDA", "TSIZ", "IPLS", "RVAD", "EQUA"];

/// ID3v2.2 three-character ids and their v2.3/2.4 equivalents
const V22_FRAMES: &[(&str, &str)] = &[
    ("TT1", "TIT1"),
    ("TT2", "TIT2"),
    ("TT3", "TIT3"),
    ("TP1", "TPE1"),
    ("TP2", "TPE2"),
    ("TP3", "TPE3"),
    ("TP4", "TPE4"),
    ("TCM", "TCOM"),
    ("TXT", "TEXT"),
    ("TAL", "TALB"),
    ("TRK", "TRCK"),
    ("TPA", "TPOS"),
    ("TCO", "TCON"),
    ("TEN", "TENC"),
    ("TRC", "TSRC"),
    ("TCR", "TCOP"),
    ("TPB", "TPUB"),
    ("TBP", "TBPM"),
    ("TYE", "TYER"),
    ("TOR", "TORY"),
    ("TOT", "TOAL"),
    ("TOA", "TOPE"),
    ("TOL", "TOLY"),
    ("TLA", "TLAN"),
    ("TXX", "TXXX"),
    ("COM", "COMM"),
    ("ULT", "USLT"),
    ("WAR", "WOAR"),
    ("UFI", "UFID"),
    ("POP", "POPM"),
];

/// Fixed 10-byte tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub major: u8,
    pub revision: u8,
    pub flags: u8,
    /// Size of everything after the header, excluding a footer
    pub size: u32,
}

impl TagHeader {
    /// Parse a header; `Ok(None)` when the bytes are not an ID3v2 header
    pub fn parse(data: &[u8]) -> Result<Option<Self>> {
        if data.len() < HEADER_LEN as usize || &data[..3] != b"ID3" {
            return Ok(None);
        }
        let major = data[3];
        if !(2..=4).contains(&major) || data[4] == 0xFF {
            return Err(MetadataError::MalformedFrame(format!(
                "unsupported ID3v2 version 2.{}.{}",
                major, data[4]
            )));
        }
        Ok(Some(Self {
            major,
            revision: data[4],
            flags: data[5],
            size: read_synchsafe32(data, 6)?,
        }))
    }

    /// Bytes the whole tag occupies in the file
    pub fn total_len(&self) -> u64 {
        let footer = if self.major == 4 && self.flags & FLAG_FOOTER != 0 {
            HEADER_LEN
        } else {
            0
        };
        HEADER_LEN + u64::from(self.size) + footer
    }
}

/// One frame, with unsynchronisation and flag-carried prefixes removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: String,
    pub data: Vec<u8>,
}

/// A parsed tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3v2Tag {
    pub header: TagHeader,
    pub frames: Vec<Frame>,
}

impl Id3v2Tag {
    /// Bytes the tag occupied in the file
    pub fn total_len(&self) -> u64 {
        self.header.total_len()
    }

    /// The tag map the frames describe
    pub fn to_tags(&self) -> TagMap {
        let mut tags = TagMap::new();
        for frame in &self.frames {
            match decode_frame(frame) {
                Ok(Some((tag, values))) => tags.extend(&tag, values),
                Ok(None) => trace!(frame = %frame.id, "Frame not mapped to a tag"),
                Err(e) => debug!(frame = %frame.id, error = %e, "Skipping undecodable frame"),
            }
        }
        tags
    }

    /// Frames that carry no tag and survive a rewrite
    pub fn unmanaged_frames(&self) -> Vec<Frame> {
        self.frames
            .iter()
            .filter(|frame| !is_managed(frame))
            .filter(|frame| {
                let keep = frame.id.len() == 4 && !OBSOLETE_FRAMES.contains(&frame.id.as_str());
                if !keep {
                    debug!(frame = %frame.id, "Dropping frame with no ID3v2.4 equivalent");
                }
                keep
            })
            .cloned()
            .collect()
    }
}

/// Read a tag starting at `offset`, if there is one
pub fn read_tag(source: &mut dyn ReadSeek, offset: u64) -> Result<Option<Id3v2Tag>> {
    let probe = read_at(source, offset, HEADER_LEN).or_else(|e| match e {
        MetadataError::Truncated { .. } => Ok(Vec::new()),
        other => Err(other),
    })?;
    let Some(header) = TagHeader::parse(&probe)? else {
        return Ok(None);
    };
    let body = read_exact_vec(source, u64::from(header.size))?;
    Ok(Some(Id3v2Tag {
        header,
        frames: parse_frames(&header, &body)?,
    }))
}

/// Parse a tag held in memory, such as a RIFF `id3 ` chunk
pub fn parse_tag(data: &[u8]) -> Result<Id3v2Tag> {
    let header = TagHeader::parse(data)?.ok_or(MetadataError::HeaderNotFound("ID3v2"))?;
    let end = HEADER_LEN as usize + header.size as usize;
    let body = data.get(HEADER_LEN as usize..end).ok_or(MetadataError::Truncated {
        needed: u64::from(header.size),
        remaining: data.len().saturating_sub(HEADER_LEN as usize) as u64,
    })?;
    Ok(Id3v2Tag {
        header,
        frames: parse_frames(&header, body)?,
    })
}

/// Undo unsynchronisation: every `FF 00` becomes `FF`
pub fn remove_unsync(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut previous = 0u8;
    for &byte in data {
        if !(previous == 0xFF && byte == 0x00) {
            out.push(byte);
        }
        previous = byte;
    }
    out
}

fn is_frame_id(id: &[u8]) -> bool {
    id.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn parse_frames(header: &TagHeader, body: &[u8]) -> Result<Vec<Frame>> {
    if header.major == 2 && header.flags & 0x40 != 0 {
        debug!("Skipping compressed ID3v2.2 tag");
        return Ok(Vec::new());
    }

    let unsynced;
    let mut data = body;
    if header.major < 4 && header.flags & FLAG_UNSYNC != 0 {
        unsynced = remove_unsync(body);
        data = &unsynced;
    }

    let mut pos = 0usize;
    if header.major >= 3 && header.flags & FLAG_EXTENDED != 0 {
        pos = match header.major {
            3 => 4 + read_u32_be(data, 0)? as usize,
            _ => read_synchsafe32(data, 0)? as usize,
        };
    }

    let (id_len, header_len) = if header.major == 2 { (3, 6) } else { (4, 10) };
    let mut frames = Vec::new();

    while pos + header_len <= data.len() {
        let raw_id = &data[pos..pos + id_len];
        if raw_id[0] == 0 {
            break; // padding
        }
        if !is_frame_id(raw_id) {
            debug!(offset = pos, "Garbage after last ID3v2 frame");
            break;
        }
        let id = String::from_utf8_lossy(raw_id).into_owned();

        let (size, flags) = match header.major {
            2 => (read_u24_be(data, pos + 3)? as usize, 0u16),
            3 => (
                read_u32_be(data, pos + 4)? as usize,
                u16::from_be_bytes([data[pos + 8], data[pos + 9]]),
            ),
            _ => {
                // Some taggers wrote plain integers into v2.4 frame sizes
                let size = read_synchsafe32(data, pos + 4)
                    .or_else(|_| read_u32_be(data, pos + 4))? as usize;
                (size, u16::from_be_bytes([data[pos + 8], data[pos + 9]]))
            }
        };

        let start = pos + header_len;
        let Some(payload) = data.get(start..start + size) else {
            debug!(frame = %id, size, "ID3v2 frame runs past end of tag");
            break;
        };
        pos = start + size;

        let id = if header.major == 2 {
            match V22_FRAMES.iter().find(|(old, _)| *old == id) {
                Some((_, new)) => (*new).to_string(),
                None => id,
            }
        } else {
            id
        };

        match frame_payload(header, flags, payload) {
            Some(data) => frames.push(Frame { id, data }),
            None => debug!(frame = %id, flags, "Skipping compressed or encrypted frame"),
        }
    }
    Ok(frames)
}

/// Strip flag-carried prefixes; `None` for frames that cannot be decoded
fn frame_payload(header: &TagHeader, flags: u16, payload: &[u8]) -> Option<Vec<u8>> {
    let format = flags as u8;
    match header.major {
        3 => {
            if format & 0xC0 != 0 {
                return None;
            }
            let skip = if format & 0x20 != 0 { 1 } else { 0 };
            payload.get(skip..).map(<[u8]>::to_vec)
        }
        4 => {
            if format & 0x0C != 0 {
                return None;
            }
            let mut skip = 0;
            if format & 0x40 != 0 {
                skip += 1;
            }
            if format & 0x01 != 0 {
                skip += 4;
            }
            let data = payload.get(skip..)?;
            if format & 0x02 != 0 || header.flags & FLAG_UNSYNC != 0 {
                Some(remove_unsync(data))
            } else {
                Some(data.to_vec())
            }
        }
        _ => Some(payload.to_vec()),
    }
}

fn text_frame_tag(id: &str) -> Option<&'static str> {
    TEXT_FRAMES
        .iter()
        .chain(LEGACY_DATE_FRAMES)
        .find(|(frame, _)| *frame == id)
        .map(|(_, tag)| *tag)
}

fn is_managed(frame: &Frame) -> bool {
    match frame.id.as_str() {
        "TXXX" | "COMM" | "USLT" => matches!(decode_frame(frame), Ok(Some(_))),
        "WOAR" => true,
        id => text_frame_tag(id).is_some(),
    }
}

/// Map a frame onto a tag name and its values
pub fn decode_frame(frame: &Frame) -> Result<Option<(String, Vec<String>)>> {
    let data = frame.data.as_slice();
    match frame.id.as_str() {
        "WOAR" => {
            let url = decode_text(data, TextEncoding::Latin1);
            Ok((!url.is_empty()).then(|| ("website".to_string(), vec![url])))
        }
        "TXXX" => {
            let Some((&marker, rest)) = data.split_first() else {
                return Ok(None);
            };
            let encoding = TextEncoding::from_id3_marker(marker)?;
            let (description, value) = split_terminated(rest, encoding);
            let name = decode_text(description, encoding).to_lowercase();
            if !is_valid_tag_name(&name) {
                return Ok(None);
            }
            Ok(Some((name, decode_list(value, encoding))))
        }
        "COMM" | "USLT" => {
            let Some((&marker, rest)) = data.split_first() else {
                return Ok(None);
            };
            let encoding = TextEncoding::from_id3_marker(marker)?;
            let Some(rest) = rest.get(3..) else {
                return Ok(None);
            };
            let (description, text) = split_terminated(rest, encoding);
            if !decode_text(description, encoding).is_empty() {
                return Ok(None);
            }
            let tag = if frame.id == "COMM" { "comment" } else { "lyrics" };
            Ok(Some((tag.to_string(), decode_list(text, encoding))))
        }
        id => {
            let Some(tag) = text_frame_tag(id) else {
                return Ok(None);
            };
            let Some((&marker, rest)) = data.split_first() else {
                return Ok(None);
            };
            let encoding = TextEncoding::from_id3_marker(marker)?;
            let mut values = decode_list(rest, encoding);
            if id == "TCON" {
                values = values.iter().map(String::as_str).map(resolve_genre).collect();
            }
            Ok(Some((tag.to_string(), values)))
        }
    }
}

/// Resolve ID3v1-style genre references: `17`, `(17)`, `(17)Rock`, `(RX)`
pub fn resolve_genre(value: &str) -> String {
    if let Ok(index) = value.trim().parse::<usize>() {
        return id3v1::genre_name(index).map_or_else(|| value.to_string(), str::to_string);
    }
    if let Some(rest) = value.strip_prefix('(') {
        if let Some((reference, refinement)) = rest.split_once(')') {
            if !refinement.is_empty() {
                return refinement.to_string();
            }
            match reference {
                "RX" => return "Remix".to_string(),
                "CR" => return "Cover".to_string(),
                _ => {}
            }
            if let Some(name) = reference.parse::<usize>().ok().and_then(id3v1::genre_name) {
                return name.to_string();
            }
        }
    }
    value.to_string()
}

fn push_frame(out: &mut Vec<u8>, id: &str, data: &[u8]) -> Result<()> {
    out.extend_from_slice(id.as_bytes());
    let size = u32::try_from(data.len()).map_err(|_| MetadataError::InvalidValue {
        field: id.to_string(),
        value: format!("{} bytes", data.len()),
    })?;
    out.extend_from_slice(&encode_synchsafe32(size)?);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(data);
    Ok(())
}

fn join_utf8(values: &[String]) -> Vec<u8> {
    values.join("\0").into_bytes()
}

/// Encode every present tag as ID3v2.4 frames, followed by `preserved`
pub fn render_frames(tags: &TagMap, preserved: &[Frame]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (tag, values) in tags.iter_present() {
        if let Some((id, _)) = TEXT_FRAMES.iter().find(|(_, name)| *name == tag) {
            let mut data = vec![3u8];
            data.extend(join_utf8(values));
            push_frame(&mut out, id, &data)?;
            continue;
        }
        match tag {
            "website" => {
                for url in values {
                    let latin1: Vec<u8> = url
                        .chars()
                        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                        .collect();
                    push_frame(&mut out, "WOAR", &latin1)?;
                }
            }
            "comment" | "lyrics" => {
                let id = if tag == "comment" { "COMM" } else { "USLT" };
                let mut data = vec![3u8];
                data.extend_from_slice(b"eng\0");
                data.extend(join_utf8(values));
                push_frame(&mut out, id, &data)?;
            }
            _ => {
                let mut data = vec![3u8];
                data.extend(tag.to_ascii_uppercase().into_bytes());
                data.push(0);
                data.extend(join_utf8(values));
                push_frame(&mut out, "TXXX", &data)?;
            }
        }
    }
    for frame in preserved {
        push_frame(&mut out, &frame.id, &frame.data)?;
    }
    Ok(out)
}

/// A complete v2.4 tag: header, frames and `padding` zero bytes
pub fn render_tag(frames: &[u8], padding: u64) -> Result<Vec<u8>> {
    let size = frames.len() as u64 + padding;
    let size = u32::try_from(size)
        .ok()
        .filter(|size| *size < 1 << 28)
        .ok_or(MetadataError::InvalidValue {
            field: "ID3v2 tag".to_string(),
            value: format!("{} bytes", size),
        })?;
    let mut out = Vec::with_capacity(HEADER_LEN as usize + size as usize);
    out.extend_from_slice(b"ID3\x04\x00\x00");
    out.extend_from_slice(&encode_synchsafe32(size)?);
    out.extend_from_slice(frames);
    out.resize(out.len() + padding as usize, 0);
    Ok(out)
}
