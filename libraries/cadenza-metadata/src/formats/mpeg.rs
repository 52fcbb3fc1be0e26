//! MPEG audio frame headers and VBR info frames
//!
//! Duration and bitrate come from the first valid frame after the tag. A
//! Xing/Info or VBRI header in that frame overrides the constant-bitrate
//! estimate.
use crate::error::Result;
use crate::formats::{average_bitrate, read_up_to};
use cadenza_core::{ReadSeek, StreamProperties};
use tracing::debug;

/// How far past the tag to look for the first frame
const SYNC_SEARCH_LEN: u64 = 128 * 1024;

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

const BITRATES_V2: [[u32; 15]; 3] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

/// A decoded 4-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    /// 1, 2 or 3
    pub layer: u8,
    /// Bits per second
    pub bitrate: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: u16,
}

impl FrameHeader {
    /// Decode a header; `None` for anything that is not a usable frame
    pub fn parse(bytes: [u8; 4]) -> Option<Self> {
        let word = u32::from_be_bytes(bytes);
        if word >> 21 != 0x7FF {
            return None;
        }
        let version = match (word >> 19) & 0b11 {
            0b00 => MpegVersion::V25,
            0b10 => MpegVersion::V2,
            0b11 => MpegVersion::V1,
            _ => return None,
        };
        let layer = match (word >> 17) & 0b11 {
            0b11 => 1,
            0b10 => 2,
            0b01 => 3,
            _ => return None,
        };
        let bitrate_index = ((word >> 12) & 0xF) as usize;
        // Free-format and the forbidden index carry no usable rate
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let rate_index = ((word >> 10) & 0b11) as usize;
        if rate_index == 3 {
            return None;
        }

        let table = match version {
            MpegVersion::V1 => &BITRATES_V1,
            MpegVersion::V2 | MpegVersion::V25 => &BITRATES_V2,
        };
        let base_rate = [44100, 48000, 32000][rate_index];
        let sample_rate = match version {
            MpegVersion::V1 => base_rate,
            MpegVersion::V2 => base_rate / 2,
            MpegVersion::V25 => base_rate / 4,
        };

        Some(Self {
            version,
            layer,
            bitrate: table[usize::from(layer - 1)][bitrate_index] * 1000,
            sample_rate,
            padding: (word >> 9) & 1 == 1,
            channels: if (word >> 6) & 0b11 == 0b11 { 1 } else { 2 },
        })
    }

    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (1, _) => 384,
            (3, MpegVersion::V2 | MpegVersion::V25) => 576,
            _ => 1152,
        }
    }

    /// Frame length in bytes, header included
    pub fn frame_len(&self) -> usize {
        let padding = u32::from(self.padding);
        let len = if self.layer == 1 {
            (12 * self.bitrate / self.sample_rate + padding) * 4
        } else {
            self.samples_per_frame() / 8 * self.bitrate / self.sample_rate + padding
        };
        len as usize
    }

    /// Offset of a Xing/Info header from the start of the frame
    fn xing_offset(&self) -> usize {
        4 + match (self.version, self.channels) {
            (MpegVersion::V1, 1) => 17,
            (MpegVersion::V1, _) => 32,
            (_, 1) => 9,
            _ => 17,
        }
    }

    fn same_stream(&self, other: &Self) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate == other.sample_rate
    }
}

/// Totals from a Xing/Info or VBRI header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct VbrInfo {
    frames: Option<u32>,
    bytes: Option<u32>,
}

fn be32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn parse_vbr(frame: &[u8], header: &FrameHeader) -> Option<VbrInfo> {
    let xing = header.xing_offset();
    if let Some(magic) = frame.get(xing..xing + 4) {
        if magic == b"Xing" || magic == b"Info" {
            let flags = be32(frame, xing + 4)?;
            let mut at = xing + 8;
            let mut info = VbrInfo::default();
            if flags & 0x1 != 0 {
                info.frames = be32(frame, at);
                at += 4;
            }
            if flags & 0x2 != 0 {
                info.bytes = be32(frame, at);
            }
            return Some(info);
        }
    }
    if frame.get(36..40) == Some(b"VBRI".as_slice()) {
        return Some(VbrInfo {
            bytes: be32(frame, 46),
            frames: be32(frame, 50),
        });
    }
    None
}

/// Find the first frame whose successor, when in range, also parses
fn find_first_frame(buf: &[u8]) -> Option<(usize, FrameHeader)> {
    let mut pos = 0;
    while pos + 4 <= buf.len() {
        if buf[pos] == 0xFF && buf[pos + 1] & 0xE0 == 0xE0 {
            if let Some(header) =
                FrameHeader::parse([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
            {
                let next = pos + header.frame_len();
                let confirmed = match buf.get(next..next + 4) {
                    Some(b) => FrameHeader::parse([b[0], b[1], b[2], b[3]])
                        .is_some_and(|following| following.same_stream(&header)),
                    None => true,
                };
                if confirmed {
                    return Some((pos, header));
                }
            }
        }
        pos += 1;
    }
    None
}

/// Derive stream properties for the audio between `start` and `end`
pub fn probe(source: &mut dyn ReadSeek, start: u64, end: u64) -> Result<StreamProperties> {
    let span = end.saturating_sub(start);
    let buf = read_up_to(source, start, span.min(SYNC_SEARCH_LEN))?;
    let Some((offset, header)) = find_first_frame(&buf) else {
        debug!(start, "No MPEG frame found");
        return Ok(StreamProperties::default());
    };

    let audio_len = span - offset as u64;
    let frame = &buf[offset..];
    let samples = f64::from(header.samples_per_frame());
    let rate = f64::from(header.sample_rate);

    let (seconds, bitrate) = match parse_vbr(frame, &header) {
        Some(VbrInfo {
            frames: Some(frames),
            bytes,
        }) if frames > 0 => {
            let seconds = f64::from(frames) * samples / rate;
            let bytes = bytes.map_or(audio_len, u64::from);
            (seconds, average_bitrate(bytes, seconds))
        }
        _ => {
            let seconds = audio_len as f64 * 8.0 / f64::from(header.bitrate);
            (seconds, header.bitrate)
        }
    };

    Ok(StreamProperties {
        duration: seconds as u64,
        bitrate,
        sample_rate: header.sample_rate,
        channels: header.channels,
        created_at: None,
    })
}
