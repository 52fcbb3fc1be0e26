//! MP4/M4A atoms and iTunes-style `ilst` items
//!
//! Tags live at `moov/udta/meta/ilst`. Each item holds one or more `data`
//! atoms; only the first value per tag is written back. When a rewrite
//! changes the size of `moov` and `moov` precedes `mdat`, the chunk offset
//! tables are shifted so the sample data is still found.
use crate::bytes::{read_u16_be, read_u32_be, read_u64_be, ByteReader};
use crate::error::{MetadataError, Result};
use crate::formats::{
    average_bitrate, copy_range, copy_rest, id3v1, parse_number_pair, read_at, stream_len,
    DroppedValues, FormatHandler, ParsedMetadata, WriteOptions, WriteReport,
};
use crate::text::{decode_text, TextEncoding};
use cadenza_core::{FormatKind, ReadSeek, StreamProperties, TagMap};
use std::io::Write;
use tracing::{debug, warn};

/// Seconds between 1904-01-01 and 1970-01-01
const MAC_EPOCH_OFFSET: u64 = 2_082_844_800;
const FREE_HEADER_LEN: u64 = 8;

const TYPE_IMPLICIT: u32 = 0;
const TYPE_UTF8: u32 = 1;
const TYPE_UTF16: u32 = 2;
const TYPE_INTEGER: u32 = 21;

/// `ilst` item names and the tags they carry; the first entry per tag is
/// the one written
const ITEMS: &[(&[u8; 4], &str)] = &[
    (b"\xa9nam", "title"),
    (b"\xa9ART", "artist"),
    (b"aART", "albumartist"),
    (b"\xa9alb", "album"),
    (b"\xa9wrt", "composer"),
    (b"\xa9gen", "genre"),
    (b"gnre", "genre"),
    (b"\xa9lyr", "lyrics"),
    (b"\xa9too", "encodedby"),
    (b"\xa9day", "date"),
    (b"trkn", "tracknumber"),
    (b"disk", "discnumber"),
    (b"cprt", "copyright"),
    (b"tmpo", "bpm"),
    (b"\xa9grp", "grouping"),
    (b"\xa9cmt", "comment"),
];

fn tag_for_item(name: &[u8; 4]) -> Option<&'static str> {
    ITEMS
        .iter()
        .find(|(item, _)| *item == name)
        .map(|(_, tag)| *tag)
}

fn item_for_tag(tag: &str) -> Option<&'static [u8; 4]> {
    ITEMS
        .iter()
        .find(|(_, name)| *name == tag)
        .map(|(item, _)| *item)
}

fn atom_name(name: &[u8; 4]) -> String {
    name.iter().map(|&b| char::from(b)).collect()
}

/// An atom inside an in-memory buffer; offsets are relative to that buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Atom {
    name: [u8; 4],
    start: usize,
    header_len: usize,
    len: usize,
}

impl Atom {
    fn end(&self) -> usize {
        self.start + self.len
    }

    fn payload_range(&self) -> std::ops::Range<usize> {
        self.start + self.header_len..self.end()
    }

    fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.payload_range()]
    }

    fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start..self.end()]
    }
}

/// Split a buffer into its sequence of atoms
fn atoms(data: &[u8]) -> Result<Vec<Atom>> {
    let mut found = Vec::new();
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let size = read_u32_be(data, pos)? as usize;
        let name = [data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]];
        let (header_len, len) = match size {
            0 => (8, data.len() - pos),
            1 => {
                let size = usize::try_from(read_u64_be(data, pos + 8)?).map_err(|_| {
                    MetadataError::MalformedAtom(format!("{} is too large", atom_name(&name)))
                })?;
                (16, size)
            }
            size => (8, size),
        };
        if len < header_len || len > data.len() - pos {
            return Err(MetadataError::MalformedAtom(format!(
                "{} claims {} bytes with {} available",
                atom_name(&name),
                len,
                data.len() - pos
            )));
        }
        found.push(Atom {
            name,
            start: pos,
            header_len,
            len,
        });
        pos += len;
    }
    Ok(found)
}

fn find<'a>(data: &'a [u8], name: &[u8; 4]) -> Result<Option<&'a [u8]>> {
    Ok(atoms(data)?
        .into_iter()
        .find(|atom| &atom.name == name)
        .map(|atom| atom.payload(data)))
}

/// Follow a path of container names down from `data`
fn find_path<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Result<Option<&'a [u8]>> {
    let mut current = data;
    for name in path {
        match find(current, name)? {
            Some(payload) if *name == b"meta" => current = meta_children(payload),
            Some(payload) => current = payload,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// `meta` is a full box in MP4 files but a plain container in QuickTime
fn meta_children(payload: &[u8]) -> &[u8] {
    if payload.get(4..8) == Some(b"hdlr".as_slice()) {
        payload
    } else {
        payload.get(4..).unwrap_or_default()
    }
}

fn atom(name: &[u8; 4], payload: &[u8]) -> Result<Vec<u8>> {
    let size = u32::try_from(payload.len() + 8).map_err(|_| {
        MetadataError::MalformedAtom(format!("{} exceeds 4 GiB", atom_name(name)))
    })?;
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(payload);
    Ok(out)
}

/// A top-level atom in the file
#[derive(Debug, Clone, Copy)]
struct TopAtom {
    name: [u8; 4],
    offset: u64,
    header_len: u64,
    len: u64,
}

fn top_level(source: &mut dyn ReadSeek, file_len: u64) -> Result<Vec<TopAtom>> {
    let mut found = Vec::new();
    let mut offset = 0;
    while offset + 8 <= file_len {
        let header = read_at(source, offset, 8)?;
        let name = [header[4], header[5], header[6], header[7]];
        let (header_len, len) = match read_u32_be(&header, 0)? {
            0 => (8, file_len - offset),
            // A 64-bit size needs room for its own extended header
            1 if offset + 16 > file_len => (16, 0),
            1 => (16, read_u64_be(&read_at(source, offset + 8, 8)?, 0)?),
            size => (8, u64::from(size)),
        };
        if len < header_len || len > file_len - offset {
            return Err(MetadataError::MalformedAtom(format!(
                "Top-level {} at {} has invalid size {}",
                atom_name(&name),
                offset,
                len
            )));
        }
        found.push(TopAtom {
            name,
            offset,
            header_len,
            len,
        });
        offset += len;
    }
    Ok(found)
}

/// Top-level layout plus the loaded `moov` atom
struct Movie {
    moov: TopAtom,
    /// The whole `moov` atom, header included
    data: Vec<u8>,
    header_len: usize,
    mdat: Option<TopAtom>,
}

impl Movie {
    fn read(source: &mut dyn ReadSeek) -> Result<Self> {
        let len = stream_len(source)?;
        let top = top_level(source, len)?;
        let moov = top
            .iter()
            .find(|atom| &atom.name == b"moov")
            .copied()
            .ok_or_else(|| MetadataError::MalformedAtom("No moov atom".to_string()))?;
        let mdat = top.iter().find(|atom| &atom.name == b"mdat").copied();
        let data = read_at(source, moov.offset, moov.len)?;
        Ok(Self {
            moov,
            data,
            header_len: moov.header_len as usize,
            mdat,
        })
    }

    fn payload(&self) -> &[u8] {
        self.data.get(self.header_len..).unwrap_or_default()
    }
}

fn properties(moov: &[u8], mdat_len: u64) -> Result<StreamProperties> {
    let mut props = StreamProperties::default();
    let mut seconds = 0.0;
    if let Some(mvhd) = find(moov, b"mvhd")? {
        let (creation, timescale, duration) = if mvhd.first() == Some(&1) {
            (
                read_u64_be(mvhd, 4)?,
                read_u32_be(mvhd, 20)?,
                read_u64_be(mvhd, 24)?,
            )
        } else {
            (
                u64::from(read_u32_be(mvhd, 4)?),
                read_u32_be(mvhd, 12)?,
                u64::from(read_u32_be(mvhd, 16)?),
            )
        };
        if timescale > 0 {
            seconds = duration as f64 / f64::from(timescale);
        }
        if creation != 0 {
            props.created_at = i64::try_from(creation)
                .ok()
                .and_then(|seconds| seconds.checked_sub(MAC_EPOCH_OFFSET as i64));
        }
    }
    props.duration = seconds as u64;

    let mut esds_bitrate = 0;
    for trak in atoms(moov)?.iter().filter(|atom| &atom.name == b"trak") {
        let trak = trak.payload(moov);
        let is_sound = find_path(trak, &[b"mdia", b"hdlr"])?
            .and_then(|hdlr| hdlr.get(8..12))
            == Some(b"soun".as_slice());
        if !is_sound {
            continue;
        }
        if let Some(stsd) = find_path(trak, &[b"mdia", b"minf", b"stbl", b"stsd"])? {
            if let Some(entry) = atoms(stsd.get(8..).unwrap_or_default())?.first() {
                let entry = entry.payload(&stsd[8..]);
                props.channels = read_u16_be(entry, 16)?;
                props.sample_rate = read_u32_be(entry, 24)? >> 16;
                esds_bitrate = sample_entry_bitrate(entry).unwrap_or_else(|e| {
                    warn!(error = %e, "Ignoring malformed esds descriptor");
                    0
                });
            }
        }
        break;
    }

    props.bitrate = if esds_bitrate > 0 {
        esds_bitrate
    } else {
        average_bitrate(mdat_len, seconds)
    };
    Ok(props)
}

/// Average (else maximum) bitrate from the `esds` decoder config
fn sample_entry_bitrate(entry: &[u8]) -> Result<u32> {
    let children_at = match read_u16_be(entry, 8)? {
        1 => 44,
        2 => 64,
        _ => 28,
    };
    let Some(esds) = entry
        .get(children_at..)
        .map(|children| find(children, b"esds"))
        .transpose()?
        .flatten()
    else {
        return Ok(0);
    };

    let mut reader = ByteReader::new(esds);
    reader.skip(4)?;
    while !reader.is_empty() {
        let (tag, len) = descriptor(&mut reader)?;
        match tag {
            0x03 => {
                reader.skip(2)?;
                let flags = reader.u8()?;
                if flags & 0x80 != 0 {
                    reader.skip(2)?;
                }
                if flags & 0x40 != 0 {
                    let url_len = reader.u8()?;
                    reader.skip(usize::from(url_len))?;
                }
                if flags & 0x20 != 0 {
                    reader.skip(2)?;
                }
            }
            0x04 => {
                reader.skip(5)?;
                let max = reader.u32_be()?;
                let avg = reader.u32_be()?;
                return Ok(if avg > 0 { avg } else { max });
            }
            _ => reader.skip(len)?,
        }
    }
    Ok(0)
}

/// MPEG-4 descriptor tag and variable-length size
fn descriptor(reader: &mut ByteReader<'_>) -> Result<(u8, usize)> {
    let tag = reader.u8()?;
    let mut len = 0usize;
    for _ in 0..4 {
        let byte = reader.u8()?;
        len = (len << 7) | usize::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, len))
}

/// The `data` atoms of an item as (type, value) pairs
///
/// A `data` atom too short for its type header is skipped.
fn data_values<'a>(name: &[u8; 4], item: &'a [u8]) -> Result<Vec<(u32, &'a [u8])>> {
    let mut values = Vec::new();
    for atom in atoms(item)?.into_iter().filter(|atom| &atom.name == b"data") {
        let payload = atom.payload(item);
        match read_u32_be(payload, 0) {
            Ok(kind) => values.push((kind & 0x00FF_FFFF, payload.get(8..).unwrap_or_default())),
            Err(e) => {
                warn!(item = %atom_name(name), error = %e, "Skipping truncated data atom");
            }
        }
    }
    Ok(values)
}

/// Decode one `data` value; `Ok(None)` for values that carry nothing
fn decode_value(name: &[u8; 4], kind: u32, value: &[u8]) -> Result<Option<String>> {
    let decoded = match name {
        b"trkn" | b"disk" => {
            let number = read_u16_be(value, 2)?;
            let total = if value.len() >= 6 {
                read_u16_be(value, 4)?
            } else {
                0
            };
            match (number, total) {
                (0, 0) => return Ok(None),
                (number, 0) => number.to_string(),
                (number, total) => format!("{}/{}", number, total),
            }
        }
        b"tmpo" => value
            .iter()
            .take(8)
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
            .to_string(),
        b"gnre" => {
            let index = usize::from(read_u16_be(value, 0)?);
            match index.checked_sub(1).and_then(id3v1::genre_name) {
                Some(genre) => genre.to_string(),
                None => return Ok(None),
            }
        }
        _ if kind == TYPE_UTF16 => decode_text(value, TextEncoding::Utf16Be),
        _ => decode_text(value, TextEncoding::Utf8),
    };
    Ok(Some(decoded))
}

fn decode_item(name: &[u8; 4], item: &[u8]) -> Result<Option<(&'static str, Vec<String>)>> {
    let Some(tag) = tag_for_item(name) else {
        return Ok(None);
    };
    let mut values = Vec::new();
    for (kind, value) in data_values(name, item)? {
        match decode_value(name, kind, value) {
            Ok(Some(decoded)) => values.push(decoded),
            Ok(None) => {}
            Err(e) => {
                warn!(item = %atom_name(name), error = %e, "Skipping undecodable ilst value");
            }
        }
    }
    Ok(Some((tag, values)))
}

fn read_tags(moov: &[u8]) -> Result<TagMap> {
    let mut tags = TagMap::new();
    let Some(ilst) = find_path(moov, &[b"udta", b"meta", b"ilst"])? else {
        return Ok(tags);
    };
    for item in atoms(ilst)? {
        match decode_item(&item.name, item.payload(ilst))? {
            Some((tag, values)) => tags.extend(tag, values),
            None => debug!(item = %atom_name(&item.name), "Preserving unmapped ilst item"),
        }
    }
    Ok(tags)
}

fn invalid(field: &str, value: &str) -> MetadataError {
    MetadataError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn data_atom(kind: u32, value: &[u8]) -> Result<Vec<u8>> {
    let mut payload = kind.to_be_bytes().to_vec();
    payload.extend_from_slice(&[0; 4]);
    payload.extend_from_slice(value);
    atom(b"data", &payload)
}

fn encode_item(tag: &str, value: &str) -> Result<Vec<u8>> {
    let pair = |width: usize| -> Result<Vec<u8>> {
        let (number, total) = parse_number_pair(value).ok_or_else(|| invalid(tag, value))?;
        let number = u16::try_from(number).map_err(|_| invalid(tag, value))?;
        let total = u16::try_from(total).map_err(|_| invalid(tag, value))?;
        let mut payload = vec![0, 0];
        payload.extend_from_slice(&number.to_be_bytes());
        payload.extend_from_slice(&total.to_be_bytes());
        payload.resize(width, 0);
        Ok(payload)
    };
    match tag {
        "tracknumber" => atom(b"trkn", &data_atom(TYPE_IMPLICIT, &pair(8)?)?),
        "discnumber" => atom(b"disk", &data_atom(TYPE_IMPLICIT, &pair(6)?)?),
        "bpm" => {
            let bpm: u16 = value.trim().parse().map_err(|_| invalid(tag, value))?;
            atom(b"tmpo", &data_atom(TYPE_INTEGER, &bpm.to_be_bytes())?)
        }
        _ => {
            let name = item_for_tag(tag).ok_or_else(|| MetadataError::WriteNotSupportedForField {
                format: FormatKind::Mp4,
                field: tag.to_string(),
            })?;
            atom(name, &data_atom(TYPE_UTF8, value.as_bytes())?)
        }
    }
}

/// Replace the first child called `name`, or append `child` when absent
fn replace_child(payload: &[u8], name: &[u8; 4], child: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() + child.len());
    let mut replaced = false;
    for atom in atoms(payload)? {
        if !replaced && &atom.name == name {
            out.extend_from_slice(child);
            replaced = true;
        } else {
            out.extend_from_slice(atom.bytes(payload));
        }
    }
    if !replaced {
        out.extend_from_slice(child);
    }
    Ok(out)
}

fn metadata_handler() -> Result<Vec<u8>> {
    let mut payload = vec![0u8; 8];
    payload.extend_from_slice(b"mdirappl");
    payload.extend_from_slice(&[0; 9]);
    atom(b"hdlr", &payload)
}

/// Rebuild `meta` around a new `ilst`, returning it with the padding used
fn rebuild_meta(
    old_meta: Option<&[u8]>,
    ilst: &[u8],
    options: &WriteOptions,
) -> Result<(Vec<u8>, u64)> {
    let (prefix, children): (&[u8], &[u8]) = match old_meta {
        Some(payload) => {
            let children = meta_children(payload);
            (&payload[..payload.len() - children.len()], children)
        }
        None => (&[0; 4], &[]),
    };

    let mut kept = Vec::new();
    let mut room = 0u64;
    let mut has_handler = false;
    for child in atoms(children)? {
        match &child.name {
            b"ilst" | b"free" => room += child.len as u64,
            name => {
                has_handler |= name == b"hdlr";
                kept.extend_from_slice(child.bytes(children));
            }
        }
    }
    if !has_handler {
        let mut with_handler = metadata_handler()?;
        with_handler.extend(kept);
        kept = with_handler;
    }

    let available = old_meta.map(|_| room);
    let padding = options.padding_for(ilst.len() as u64, available, FREE_HEADER_LEN);

    let mut payload = prefix.to_vec();
    payload.extend(kept);
    payload.extend_from_slice(ilst);
    if padding > 0 {
        payload.extend(atom(
            b"free",
            &vec![0u8; (padding - FREE_HEADER_LEN) as usize],
        )?);
    }
    Ok((atom(b"meta", &payload)?, padding))
}

/// Shift `stco`/`co64` entries that point at or past `boundary`
fn patch_chunk_offsets(payload: &mut [u8], delta: i64, boundary: u64) -> Result<()> {
    for child in atoms(payload)? {
        let range = child.payload_range();
        let body = &mut payload[range];
        match &child.name {
            b"trak" | b"mdia" | b"minf" | b"stbl" => {
                patch_chunk_offsets(body, delta, boundary)?;
            }
            b"stco" => patch_table(body, 4, delta, boundary)?,
            b"co64" => patch_table(body, 8, delta, boundary)?,
            _ => {}
        }
    }
    Ok(())
}

fn patch_table(body: &mut [u8], width: usize, delta: i64, boundary: u64) -> Result<()> {
    let count = read_u32_be(body, 4)? as usize;
    for index in 0..count {
        let at = 8 + index * width;
        let old = if width == 4 {
            u64::from(read_u32_be(body, at)?)
        } else {
            read_u64_be(body, at)?
        };
        if old < boundary {
            continue;
        }
        let shifted = u64::try_from(old as i64 + delta)
            .map_err(|_| MetadataError::MalformedAtom("Chunk offset underflow".to_string()))?;
        if width == 4 {
            let shifted = u32::try_from(shifted).map_err(|_| {
                MetadataError::MalformedAtom("Chunk offset exceeds stco range".to_string())
            })?;
            body[at..at + 4].copy_from_slice(&shifted.to_be_bytes());
        } else {
            body[at..at + 8].copy_from_slice(&shifted.to_be_bytes());
        }
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Mp4Handler;

impl FormatHandler for Mp4Handler {
    fn kind(&self) -> FormatKind {
        FormatKind::Mp4
    }

    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata> {
        let movie = Movie::read(source)?;
        let mdat_len = movie.mdat.map_or(0, |mdat| mdat.len);
        Ok(ParsedMetadata {
            tags: read_tags(movie.payload())?,
            properties: properties(movie.payload(), mdat_len)?,
        })
    }

    fn write(
        &self,
        source: &mut dyn ReadSeek,
        dest: &mut dyn Write,
        tags: &TagMap,
        options: &WriteOptions,
    ) -> Result<WriteReport> {
        let movie = Movie::read(source)?;
        let moov = movie.payload();

        let mut dropped = Vec::new();
        let mut managed = Vec::new();
        for (tag, values) in tags.iter_present() {
            managed.extend(encode_item(tag, &values[0])?);
            if values.len() > 1 {
                dropped.push(DroppedValues {
                    tag: tag.to_string(),
                    values: values[1..].to_vec(),
                });
            }
        }

        let udta = find(moov, b"udta")?;
        let old_meta = udta.map(|udta| find(udta, b"meta")).transpose()?.flatten();
        let mut items = managed;
        if let Some(old_ilst) = find_path(moov, &[b"udta", b"meta", b"ilst"])? {
            for item in atoms(old_ilst)? {
                if tag_for_item(&item.name).is_none() {
                    items.extend_from_slice(item.bytes(old_ilst));
                }
            }
        }
        let ilst = atom(b"ilst", &items)?;

        let (meta, padding) = rebuild_meta(old_meta, &ilst, options)?;
        let udta = atom(
            b"udta",
            &replace_child(udta.unwrap_or_default(), b"meta", &meta)?,
        )?;
        let mut new_moov = atom(b"moov", &replace_child(moov, b"udta", &udta)?)?;

        let old_end = movie.moov.offset + movie.moov.len;
        let delta = new_moov.len() as i64 - movie.moov.len as i64;
        let mdat_follows = movie
            .mdat
            .is_some_and(|mdat| mdat.offset > movie.moov.offset);
        if delta != 0 && mdat_follows {
            debug!(delta, "Shifting MP4 chunk offsets");
            patch_chunk_offsets(&mut new_moov[8..], delta, old_end)?;
        }

        copy_range(source, dest, 0, movie.moov.offset)?;
        dest.write_all(&new_moov)?;
        copy_rest(source, dest, old_end)?;

        Ok(WriteReport { dropped, padding })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn full_box(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(body);
        atom(name, &payload).unwrap()
    }

    fn mvhd(creation: u32, timescale: u32, duration: u32) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend(creation.to_be_bytes());
        body.extend(0u32.to_be_bytes());
        body.extend(timescale.to_be_bytes());
        body.extend(duration.to_be_bytes());
        body.resize(96, 0);
        full_box(b"mvhd", &body)
    }

    fn sound_trak(chunk_offset: u32) -> Vec<u8> {
        let mut hdlr = vec![0u8; 4];
        hdlr.extend(b"soun");
        hdlr.resize(21, 0);

        let mut entry = vec![0u8; 16];
        entry.extend(2u16.to_be_bytes());
        entry.extend(16u16.to_be_bytes());
        entry.extend([0; 4]);
        entry.extend((44_100u32 << 16).to_be_bytes());
        let mut esds = vec![0x03, 0x19, 0x00, 0x01, 0x00, 0x04, 0x11, 0x40, 0x15];
        esds.extend([0; 3]);
        esds.extend(192_000u32.to_be_bytes());
        esds.extend(128_000u32.to_be_bytes());
        entry.extend(full_box(b"esds", &esds));
        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend(atom(b"mp4a", &entry).unwrap());

        let mut stco = 1u32.to_be_bytes().to_vec();
        stco.extend(chunk_offset.to_be_bytes());

        let mut stbl = full_box(b"stsd", &stsd);
        stbl.extend(full_box(b"stco", &stco));
        let minf = atom(b"stbl", &stbl).unwrap();
        let mut mdia = full_box(b"hdlr", &hdlr);
        mdia.extend(atom(b"minf", &minf).unwrap());
        atom(b"trak", &atom(b"mdia", &mdia).unwrap()).unwrap()
    }

    fn text_item(name: &[u8; 4], values: &[&str]) -> Vec<u8> {
        let mut payload = Vec::new();
        for value in values {
            payload.extend(data_atom(TYPE_UTF8, value.as_bytes()).unwrap());
        }
        atom(name, &payload).unwrap()
    }

    fn m4a(items: &[u8], moov_first: bool) -> Vec<u8> {
        let ftyp = atom(b"ftyp", b"M4A \0\0\0\0M4A mp42").unwrap();
        let mdat = atom(b"mdat", &[0x21; 1000]).unwrap();
        let build_moov = |chunk_offset: u32| {
            let mut meta = metadata_handler().unwrap();
            meta.extend(atom(b"ilst", items).unwrap());
            meta.extend(atom(b"free", &[0; 56]).unwrap());
            let udta = atom(b"udta", &full_box(b"meta", &meta)).unwrap();
            let mut moov = mvhd(3_600_000_000, 1000, 185_000);
            moov.extend(sound_trak(chunk_offset));
            moov.extend(udta);
            atom(b"moov", &moov).unwrap()
        };
        let probe_len = build_moov(0).len();
        let mut out = ftyp.clone();
        if moov_first {
            let offset = (ftyp.len() + probe_len + 8) as u32;
            out.extend(build_moov(offset));
            out.extend(mdat);
        } else {
            let offset = (ftyp.len() + 8) as u32;
            out.extend(mdat);
            out.extend(build_moov(offset));
        }
        out
    }

    fn chunk_offset(file: &[u8]) -> u32 {
        let movie = Movie::read(&mut Cursor::new(file.to_vec())).unwrap();
        let stco = find_path(
            movie.payload(),
            &[b"trak", b"mdia", b"minf", b"stbl", b"stco"],
        )
        .unwrap()
        .unwrap();
        read_u32_be(stco, 8).unwrap()
    }

    fn sample_items() -> Vec<u8> {
        let mut items = text_item(b"\xa9nam", &["Song"]);
        items.extend(text_item(b"\xa9ART", &["A", "B"]));
        let mut trkn = vec![0, 0, 0, 3, 0, 12, 0, 0];
        items.extend(atom(b"trkn", &data_atom(TYPE_IMPLICIT, &trkn).unwrap()).unwrap());
        trkn = vec![0, 0, 0, 1, 0, 0];
        items.extend(atom(b"disk", &data_atom(TYPE_IMPLICIT, &trkn).unwrap()).unwrap());
        items.extend(atom(b"tmpo", &data_atom(TYPE_INTEGER, &[0, 120]).unwrap()).unwrap());
        items.extend(atom(b"gnre", &data_atom(TYPE_IMPLICIT, &[0, 18]).unwrap()).unwrap());
        items.extend(atom(b"covr", &data_atom(13, b"\xFF\xD8jpeg").unwrap()).unwrap());
        items
    }

    #[test]
    fn parses_items_and_properties() {
        let parsed = Mp4Handler
            .parse(&mut Cursor::new(m4a(&sample_items(), true)))
            .unwrap();
        assert_eq!(parsed.tags.get("title"), ["Song"]);
        assert_eq!(parsed.tags.get("artist"), ["A", "B"]);
        assert_eq!(parsed.tags.get("tracknumber"), ["3/12"]);
        assert_eq!(parsed.tags.get("discnumber"), ["1"]);
        assert_eq!(parsed.tags.get("bpm"), ["120"]);
        assert_eq!(parsed.tags.get("genre"), ["Rock"]);
        assert!(!parsed.tags.contains("covr"));

        let props = parsed.properties;
        assert_eq!(props.duration, 185);
        assert_eq!(props.bitrate, 128_000);
        assert_eq!(props.sample_rate, 44_100);
        assert_eq!(props.channels, 2);
        assert_eq!(props.created_at, Some(3_600_000_000 - 2_082_844_800));
    }

    #[test]
    fn write_keeps_first_value_and_reports_the_rest() {
        let original = m4a(&sample_items(), true);
        let mut tags = TagMap::new();
        tags.set("title", ["New"]);
        tags.set("artist", ["A", "B"]);
        tags.set("tracknumber", ["4/12"]);

        let mut out = Vec::new();
        let report = Mp4Handler
            .write(
                &mut Cursor::new(original.clone()),
                &mut out,
                &tags,
                &WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(
            report.dropped,
            [DroppedValues {
                tag: "artist".to_string(),
                values: vec!["B".to_string()],
            }]
        );

        let parsed = Mp4Handler.parse(&mut Cursor::new(out.clone())).unwrap();
        assert_eq!(parsed.tags.get("title"), ["New"]);
        assert_eq!(parsed.tags.get("artist"), ["A"]);
        assert_eq!(parsed.tags.get("tracknumber"), ["4/12"]);
        assert!(!parsed.tags.contains("bpm"));

        // Smaller ilst fits in the old room, so nothing moves
        assert_eq!(out.len(), original.len());
        assert_eq!(chunk_offset(&out), chunk_offset(&original));
        let movie = Movie::read(&mut Cursor::new(out)).unwrap();
        let ilst = find_path(movie.payload(), &[b"udta", b"meta", b"ilst"])
            .unwrap()
            .unwrap();
        assert!(atoms(ilst).unwrap().iter().any(|item| &item.name == b"covr"));
    }

    #[test]
    fn growing_moov_before_mdat_shifts_chunk_offsets() {
        let original = m4a(&sample_items(), true);
        let before = chunk_offset(&original);
        let mut tags = TagMap::new();
        tags.set("lyrics", ["word ".repeat(400)]);

        let mut out = Vec::new();
        Mp4Handler
            .write(
                &mut Cursor::new(original.clone()),
                &mut out,
                &tags,
                &WriteOptions::default(),
            )
            .unwrap();
        let delta = (out.len() - original.len()) as u32;
        assert!(delta > 0);
        assert_eq!(chunk_offset(&out), before + delta);
        let mdat_at = chunk_offset(&out) as usize;
        assert_eq!(&out[mdat_at - 4..mdat_at], b"mdat");
    }

    #[test]
    fn moov_after_mdat_leaves_offsets_alone() {
        let original = m4a(&[], false);
        let before = chunk_offset(&original);
        let mut tags = TagMap::new();
        tags.set("comment", ["x".repeat(2000)]);
        let mut out = Vec::new();
        Mp4Handler
            .write(
                &mut Cursor::new(original),
                &mut out,
                &tags,
                &WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(chunk_offset(&out), before);
        let parsed = Mp4Handler.parse(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed.tags.get("comment")[0].len(), 2000);
    }

    #[test]
    fn creates_udta_when_missing() {
        let ftyp = atom(b"ftyp", b"M4A \0\0\0\0").unwrap();
        let mut moov = mvhd(0, 44_100, 441_000);
        moov.extend(sound_trak(0));
        let mut file = ftyp;
        file.extend(atom(b"moov", &moov).unwrap());

        let parsed = Mp4Handler.parse(&mut Cursor::new(file.clone())).unwrap();
        assert!(parsed.tags.is_empty());
        assert_eq!(parsed.properties.created_at, None);
        assert_eq!(parsed.properties.duration, 10);

        let mut tags = TagMap::new();
        tags.set("album", ["Fresh"]);
        let mut out = Vec::new();
        Mp4Handler
            .write(&mut Cursor::new(file), &mut out, &tags, &WriteOptions::default())
            .unwrap();
        let parsed = Mp4Handler.parse(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed.tags.get("album"), ["Fresh"]);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut tags = TagMap::new();
        tags.set("tracknumber", ["three"]);
        let err = Mp4Handler
            .write(
                &mut Cursor::new(m4a(&[], true)),
                &mut Vec::new(),
                &tags,
                &WriteOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, MetadataError::InvalidValue { .. }));
    }

    #[test]
    fn huge_creation_time_is_dropped() {
        let mut body = vec![1, 0, 0, 0];
        body.extend(0x8000_0000_0000_0000u64.to_be_bytes());
        body.extend(0u64.to_be_bytes());
        body.extend(1000u32.to_be_bytes());
        body.extend(5_000u64.to_be_bytes());
        body.resize(112, 0);
        let moov = atom(b"mvhd", &body).unwrap();

        let props = properties(&moov, 0).unwrap();
        assert_eq!(props.created_at, None);
        assert_eq!(props.duration, 5);
    }

    #[test]
    fn truncated_number_item_is_skipped() {
        let mut items = atom(b"trkn", &data_atom(TYPE_IMPLICIT, &[0, 0]).unwrap()).unwrap();
        items.extend(atom(b"disk", &atom(b"data", &[0, 0]).unwrap()).unwrap());
        items.extend(text_item(b"\xa9nam", &["Kept"]));
        let parsed = Mp4Handler
            .parse(&mut Cursor::new(m4a(&items, true)))
            .unwrap();
        assert_eq!(parsed.tags.get("title"), ["Kept"]);
        assert!(!parsed.tags.contains("tracknumber"));
        assert!(!parsed.tags.contains("discnumber"));
    }

    #[test]
    fn extended_size_moov_is_read() {
        let ftyp = atom(b"ftyp", b"M4A \0\0\0\0").unwrap();
        let mut payload = mvhd(0, 1000, 7_000);
        payload.extend(atom(b"udta", &atom(b"meta", &[0; 4]).unwrap()).unwrap());
        let mut file = ftyp;
        file.extend(1u32.to_be_bytes());
        file.extend(b"moov");
        file.extend((payload.len() as u64 + 16).to_be_bytes());
        file.extend(payload);

        let parsed = Mp4Handler.parse(&mut Cursor::new(file)).unwrap();
        assert_eq!(parsed.properties.duration, 7);
    }

    #[test]
    fn extended_size_smaller_than_its_header_is_malformed() {
        let mut file = atom(b"ftyp", b"M4A \0\0\0\0").unwrap();
        file.extend(1u32.to_be_bytes());
        file.extend(b"moov");
        file.extend(12u64.to_be_bytes());
        assert!(matches!(
            Mp4Handler.parse(&mut Cursor::new(file)),
            Err(MetadataError::MalformedAtom(_))
        ));
    }

    #[test]
    fn missing_moov_is_malformed() {
        let file = atom(b"ftyp", b"M4A ").unwrap();
        assert!(matches!(
            Mp4Handler.parse(&mut Cursor::new(file)),
            Err(MetadataError::MalformedAtom(_))
        ));
    }
}
