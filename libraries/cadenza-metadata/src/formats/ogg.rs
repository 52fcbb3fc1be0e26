//! Ogg Vorbis, Ogg Opus and Ogg Speex
//!
//! Only the first logical stream is considered. Writes re-paginate the
//! comment and setup packets; page 0 (the identification packet) is kept
//! byte-for-byte and every later page of the stream is renumbered.
use crate::bytes::read_u64_le;
use crate::error::{MetadataError, Result};
use crate::formats::vorbis::VorbisComments;
use crate::formats::{
    average_bitrate, copy_range, copy_rest, read_exact_vec, read_up_to, stream_len,
    FormatHandler, ParsedMetadata, WriteOptions, WriteReport,
};
use cadenza_core::{FormatKind, ReadSeek, StreamProperties, TagMap};
use std::io::Write;
use tracing::debug;

const PAGE_HEADER_LEN: usize = 27;
const CONTINUED: u8 = 0x01;
/// How far back from EOF to look for the last granule position
const TAIL_SEARCH_LEN: u64 = 64 * 1024;
const NO_GRANULE: u64 = u64::MAX;
const OPUS_RATE: u32 = 48_000;
const SPEEX_HEADER_LEN: usize = 80;

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04C1_1DB7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = crc_table();

/// Page checksum: polynomial 0x04C11DB7, zero initial value, unreflected
pub fn crc32(data: &[u8]) -> u32 {
    data.iter().fold(0, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[usize::from((crc >> 24) as u8 ^ byte)]
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Page {
    header_type: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    lacing: Vec<u8>,
    body: Vec<u8>,
}

impl Page {
    fn new(serial: u32, sequence: u32, header_type: u8) -> Self {
        Self {
            header_type,
            granule: 0,
            serial,
            sequence,
            lacing: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Read the page at `offset`; `None` at end of stream or where no page
    /// starts
    fn read(source: &mut dyn ReadSeek, offset: u64) -> Result<Option<Self>> {
        let header = read_up_to(source, offset, PAGE_HEADER_LEN as u64)?;
        if header.len() < 4 || &header[..4] != b"OggS" {
            return Ok(None);
        }
        if header.len() < PAGE_HEADER_LEN {
            return Err(MetadataError::Truncated {
                needed: PAGE_HEADER_LEN as u64,
                remaining: header.len() as u64,
            });
        }
        let segments = u64::from(header[26]);
        let lacing = read_exact_vec(source, segments)?;
        let body_len = lacing.iter().map(|&lace| u64::from(lace)).sum();
        let body = read_exact_vec(source, body_len)?;

        Ok(Some(Self {
            header_type: header[5],
            granule: read_u64_le(&header, 6)?,
            serial: u32::from_le_bytes([header[14], header[15], header[16], header[17]]),
            sequence: u32::from_le_bytes([header[18], header[19], header[20], header[21]]),
            lacing,
            body,
        }))
    }

    fn len(&self) -> u64 {
        (PAGE_HEADER_LEN + self.lacing.len() + self.body.len()) as u64
    }

    fn ends_packet(&self) -> bool {
        self.lacing.iter().any(|&lace| lace < 255)
    }

    /// Encode with a freshly computed checksum
    fn render(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PAGE_HEADER_LEN + self.lacing.len() + self.body.len());
        out.extend_from_slice(b"OggS");
        out.push(0);
        out.push(self.header_type);
        out.extend_from_slice(&self.granule.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.push(self.lacing.len() as u8);
        out.extend_from_slice(&self.lacing);
        out.extend_from_slice(&self.body);
        let crc = crc32(&out);
        out[22..26].copy_from_slice(&crc.to_le_bytes());
        out
    }
}

/// Split packets into pages of at most 255 segments
fn paginate(packets: &[Vec<u8>], serial: u32, first_sequence: u32) -> Vec<Page> {
    let mut pages = Vec::new();
    let mut current = Page::new(serial, first_sequence, 0);
    for packet in packets {
        let full = packet.len() / 255;
        for index in 0..=full {
            if current.lacing.len() == 255 {
                let header_type = if current.lacing.last() == Some(&255) {
                    CONTINUED
                } else {
                    0
                };
                let next = Page::new(serial, current.sequence + 1, header_type);
                pages.push(std::mem::replace(&mut current, next));
            }
            let segment = &packet[index * 255..(index * 255 + 255).min(packet.len())];
            current.lacing.push(segment.len() as u8);
            current.body.extend_from_slice(segment);
        }
    }
    if !current.lacing.is_empty() {
        pages.push(current);
    }
    for page in &mut pages {
        page.granule = if page.ends_packet() { 0 } else { NO_GRANULE };
    }
    pages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Vorbis {
        sample_rate: u32,
        nominal_bitrate: i32,
        channels: u8,
    },
    Opus {
        pre_skip: u16,
        input_rate: u32,
        channels: u8,
    },
    Speex {
        sample_rate: u32,
        bitrate: i32,
        channels: u8,
        extra_headers: u8,
    },
}

impl Codec {
    fn detect(packet: &[u8]) -> Result<Self> {
        if packet.starts_with(b"\x01vorbis") && packet.len() >= 28 {
            return Ok(Self::Vorbis {
                channels: packet[11],
                sample_rate: u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]),
                nominal_bitrate: i32::from_le_bytes([
                    packet[20], packet[21], packet[22], packet[23],
                ]),
            });
        }
        if packet.starts_with(b"OpusHead") && packet.len() >= 19 {
            return Ok(Self::Opus {
                channels: packet[9],
                pre_skip: u16::from_le_bytes([packet[10], packet[11]]),
                input_rate: u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]),
            });
        }
        if packet.starts_with(b"Speex   ") && packet.len() >= SPEEX_HEADER_LEN {
            let field = |at: usize| {
                i32::from_le_bytes([packet[at], packet[at + 1], packet[at + 2], packet[at + 3]])
            };
            return Ok(Self::Speex {
                sample_rate: u32::try_from(field(36)).unwrap_or(0),
                channels: u8::try_from(field(48)).unwrap_or(0),
                bitrate: field(52),
                extra_headers: u8::try_from(field(68).clamp(0, 8)).unwrap_or(0),
            });
        }
        Err(MetadataError::UnsupportedFormat(
            "Ogg stream is not Vorbis, Opus or Speex".to_string(),
        ))
    }

    fn header_packets(self) -> usize {
        match self {
            Self::Vorbis { .. } => 3,
            Self::Opus { .. } => 2,
            Self::Speex { extra_headers, .. } => 2 + usize::from(extra_headers),
        }
    }

    fn comment_magic(self) -> &'static [u8] {
        match self {
            Self::Vorbis { .. } => b"\x03vorbis",
            Self::Opus { .. } => b"OpusTags",
            Self::Speex { .. } => b"",
        }
    }

    fn parse_comments(self, packet: &[u8]) -> Result<VorbisComments> {
        let magic = self.comment_magic();
        if !packet.starts_with(magic) {
            return Err(MetadataError::MalformedBlock(
                "Second Ogg packet is not a comment header".to_string(),
            ));
        }
        VorbisComments::parse(&packet[magic.len()..])
    }

    fn encode_comments(self, comments: &VorbisComments) -> Result<Vec<u8>> {
        let mut packet = self.comment_magic().to_vec();
        packet.extend(comments.render()?);
        if matches!(self, Self::Vorbis { .. }) {
            // framing bit
            packet.push(1);
        }
        Ok(packet)
    }
}

/// The header packets of the first logical stream and the pages holding them
#[derive(Debug)]
struct Headers {
    codec: Codec,
    serial: u32,
    packets: Vec<Vec<u8>>,
    pages: Vec<Page>,
    /// Offset just past the last header page
    end: u64,
    /// Another stream's pages appeared among the header pages
    multiplexed: bool,
    /// Audio data shares a page with the last header packet
    trailing: bool,
}

fn read_headers(source: &mut dyn ReadSeek) -> Result<Headers> {
    let mut offset = 0;
    let mut serial = None;
    let mut codec = None;
    let mut multiplexed = false;
    let mut packets: Vec<Vec<u8>> = Vec::new();
    let mut pages = Vec::new();
    let mut partial = Vec::new();

    loop {
        let Some(page) = Page::read(source, offset)? else {
            return Err(MetadataError::MalformedBlock(
                "Ogg stream ends inside its header packets".to_string(),
            ));
        };
        offset += page.len();
        match serial {
            None => serial = Some(page.serial),
            Some(expected) if expected != page.serial => {
                multiplexed = true;
                continue;
            }
            Some(_) => {}
        }

        let mut trailing = None;
        let mut pos = 0;
        for (index, &lace) in page.lacing.iter().enumerate() {
            let end = pos + usize::from(lace);
            partial.extend_from_slice(&page.body[pos..end]);
            pos = end;
            if lace == 255 {
                continue;
            }
            packets.push(std::mem::take(&mut partial));
            let detected = match codec {
                Some(codec) => codec,
                None => *codec.insert(Codec::detect(&packets[0])?),
            };
            if packets.len() == detected.header_packets() {
                trailing = Some(index + 1 < page.lacing.len());
                break;
            }
        }
        pages.push(page);

        if let (Some(trailing), Some(codec), Some(serial)) = (trailing, codec, serial) {
            return Ok(Headers {
                codec,
                serial,
                packets,
                pages,
                end: offset,
                multiplexed,
                trailing,
            });
        }
    }
}

/// Granule position of the last page of `serial`, searching the tail
fn last_granule(source: &mut dyn ReadSeek, len: u64, serial: u32) -> Result<Option<u64>> {
    let start = len.saturating_sub(TAIL_SEARCH_LEN);
    let tail = read_up_to(source, start, TAIL_SEARCH_LEN)?;
    let mut end = tail.len();
    while let Some(pos) = tail[..end].windows(4).rposition(|w| w == b"OggS") {
        end = pos;
        if pos + PAGE_HEADER_LEN > tail.len() {
            continue;
        }
        let page_serial =
            u32::from_le_bytes([tail[pos + 14], tail[pos + 15], tail[pos + 16], tail[pos + 17]]);
        let granule = read_u64_le(&tail, pos + 6)?;
        if page_serial == serial && granule != NO_GRANULE {
            return Ok(Some(granule));
        }
    }
    Ok(None)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OggHandler;

impl FormatHandler for OggHandler {
    fn kind(&self) -> FormatKind {
        FormatKind::Ogg
    }

    fn parse(&self, source: &mut dyn ReadSeek) -> Result<ParsedMetadata> {
        let len = stream_len(source)?;
        let headers = read_headers(source)?;
        let comments = headers.codec.parse_comments(&headers.packets[1])?;
        let granule = last_granule(source, len, headers.serial)?;

        let (seconds, nominal, sample_rate, channels) = match headers.codec {
            Codec::Vorbis {
                sample_rate,
                nominal_bitrate,
                channels,
            } => {
                let seconds = match granule {
                    Some(granule) if sample_rate > 0 => granule as f64 / f64::from(sample_rate),
                    _ => 0.0,
                };
                let nominal = u32::try_from(nominal_bitrate).unwrap_or(0);
                (seconds, nominal, sample_rate, channels)
            }
            Codec::Opus {
                pre_skip,
                input_rate,
                channels,
            } => {
                let seconds = granule.map_or(0.0, |granule| {
                    granule.saturating_sub(u64::from(pre_skip)) as f64 / f64::from(OPUS_RATE)
                });
                let rate = if input_rate > 0 { input_rate } else { OPUS_RATE };
                (seconds, 0, rate, channels)
            }
            Codec::Speex {
                sample_rate,
                bitrate,
                channels,
                ..
            } => {
                let seconds = match granule {
                    Some(granule) if sample_rate > 0 => granule as f64 / f64::from(sample_rate),
                    _ => 0.0,
                };
                // -1 marks variable bitrate
                let nominal = u32::try_from(bitrate).unwrap_or(0);
                (seconds, nominal, sample_rate, channels)
            }
        };
        if granule.is_none() {
            debug!("No granule position found for Ogg stream");
        }

        let bitrate = if nominal > 0 {
            nominal
        } else {
            average_bitrate(len, seconds)
        };

        Ok(ParsedMetadata {
            tags: comments.tags,
            properties: StreamProperties {
                duration: seconds as u64,
                bitrate,
                sample_rate,
                channels: u16::from(channels),
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
        let headers = read_headers(source)?;
        if headers.multiplexed {
            return Err(MetadataError::MalformedBlock(
                "Cannot rewrite multiplexed Ogg header pages".to_string(),
            ));
        }
        if headers.trailing {
            return Err(MetadataError::MalformedBlock(
                "Ogg header packets share a page with audio data".to_string(),
            ));
        }
        let first = &headers.pages[0];
        if first.lacing.iter().filter(|&&lace| lace < 255).count() != 1
            || !matches!(first.lacing.last(), Some(&lace) if lace < 255)
        {
            return Err(MetadataError::MalformedBlock(
                "First Ogg page must hold only the identification packet".to_string(),
            ));
        }

        let codec = headers.codec;
        let comments = codec
            .parse_comments(&headers.packets[1])?
            .with_tags(tags);
        let mut packets = vec![codec.encode_comments(&comments)?];
        packets.extend(headers.packets[2..].iter().cloned());
        let pages = paginate(&packets, headers.serial, first.sequence + 1);

        copy_range(source, dest, 0, first.len())?;
        for page in &pages {
            dest.write_all(&page.render())?;
        }

        let old_last = headers.pages.last().map_or(0, |page| page.sequence);
        let new_last = pages.last().map_or(old_last, |page| page.sequence);
        let delta = new_last.wrapping_sub(old_last);
        if delta == 0 {
            copy_rest(source, dest, headers.end)?;
        } else {
            renumber_rest(source, dest, headers.end, headers.serial, delta)?;
        }

        Ok(WriteReport::default())
    }
}

/// Copy the pages after the headers, shifting sequence numbers of `serial`
fn renumber_rest(
    source: &mut dyn ReadSeek,
    dest: &mut dyn Write,
    mut offset: u64,
    serial: u32,
    delta: u32,
) -> Result<()> {
    while let Some(mut page) = Page::read(source, offset)? {
        offset += page.len();
        if page.serial == serial {
            page.sequence = page.sequence.wrapping_add(delta);
        }
        dest.write_all(&page.render())?;
    }
    // Anything after the last page is carried over untouched
    copy_rest(source, dest, offset)?;
    Ok(())
}
