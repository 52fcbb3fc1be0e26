//! Shared fixtures for integration tests
//!
//! Every builder produces the smallest file its parser accepts, with real
//! structure around a block of filler standing in for audio.
#![allow(dead_code)]

use cadenza_core::{AtomicFile, FileStat, Filesystem, ReadSeek, TagMap, WalkOptions};
use cadenza_metadata::formats::id3v2;
use cadenza_metadata::formats::ogg::crc32;
use cadenza_metadata::formats::vorbis::VorbisComments;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Install a test subscriber once per binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadenza_metadata=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn tag_map(tags: &[(&str, &str)]) -> TagMap {
    let mut map = TagMap::new();
    for (tag, value) in tags {
        map.push(tag, *value);
    }
    map
}

// ---------------------------------------------------------------- MP3

/// MPEG-1 Layer III, 128 kbps, 44.1 kHz: 417-byte frames
pub const MP3_FRAME_LEN: usize = 417;

/// ID3v2.4 tag with 512 bytes of padding, then `frames` CBR frames
pub fn mp3(tags: &[(&str, &str)], frames: usize) -> Vec<u8> {
    let rendered = id3v2::render_frames(&tag_map(tags), &[]).unwrap();
    let mut data = id3v2::render_tag(&rendered, 512).unwrap();
    data.extend(mpeg_frames(frames));
    data
}

pub fn mpeg_frames(count: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(count * MP3_FRAME_LEN);
    for _ in 0..count {
        let start = data.len();
        data.extend([0xFF, 0xFB, 0x90, 0x64]);
        data.resize(start + MP3_FRAME_LEN, 0x55);
    }
    data
}

// ---------------------------------------------------------------- Ogg

const OGG_SERIAL: u32 = 0x0C0F_FEE0;

fn lacing(len: usize) -> Vec<u8> {
    let mut out = vec![255u8; len / 255];
    out.push((len % 255) as u8);
    out
}

/// One Ogg page holding whole packets
pub fn ogg_page(header_type: u8, granule: u64, sequence: u32, packets: &[Vec<u8>]) -> Vec<u8> {
    let mut segments = Vec::new();
    for packet in packets {
        segments.extend(lacing(packet.len()));
    }
    assert!(segments.len() <= 255, "fixture packets too large for one page");

    let mut page = b"OggS\0".to_vec();
    page.push(header_type);
    page.extend(granule.to_le_bytes());
    page.extend(OGG_SERIAL.to_le_bytes());
    page.extend(sequence.to_le_bytes());
    page.extend([0; 4]);
    page.push(segments.len() as u8);
    page.extend(segments);
    for packet in packets {
        page.extend(packet);
    }
    let crc = crc32(&page);
    page[22..26].copy_from_slice(&crc.to_le_bytes());
    page
}

fn vorbis_comment_packet(tags: &[(&str, &str)]) -> Vec<u8> {
    let comments = VorbisComments {
        vendor: "Xiph.Org libVorbis I 20200704 (Reducing Environment)".to_string(),
        tags: tag_map(tags),
        preserved: Vec::new(),
    };
    let mut packet = b"\x03vorbis".to_vec();
    packet.extend(comments.render().unwrap());
    packet.push(1);
    packet
}

/// Ogg Vorbis, 44.1 kHz stereo, 160 kbps nominal, `seconds` long
pub fn ogg_vorbis(tags: &[(&str, &str)], seconds: u64) -> Vec<u8> {
    let mut id = b"\x01vorbis".to_vec();
    id.extend(0u32.to_le_bytes());
    id.push(2);
    id.extend(44_100u32.to_le_bytes());
    id.extend(0i32.to_le_bytes());
    id.extend(160_000i32.to_le_bytes());
    id.extend(0i32.to_le_bytes());
    id.extend([0xB8, 0x01]);

    let mut setup = b"\x05vorbis".to_vec();
    setup.resize(120, 0x42);

    let mut out = ogg_page(0x02, 0, 0, &[id]);
    out.extend(ogg_page(0, 0, 1, &[vorbis_comment_packet(tags), setup]));
    out.extend(ogg_page(0, 44_100, 2, &[vec![0xAA; 200]]));
    out.extend(ogg_page(0x04, 44_100 * seconds, 3, &[vec![0xAB; 200]]));
    out
}

/// Ogg Opus, stereo, 312 samples of pre-skip, `seconds` long
pub fn ogg_opus(tags: &[(&str, &str)], seconds: u64) -> Vec<u8> {
    let mut head = b"OpusHead".to_vec();
    head.push(1);
    head.push(2);
    head.extend(312u16.to_le_bytes());
    head.extend(48_000u32.to_le_bytes());
    head.extend(0i16.to_le_bytes());
    head.push(0);

    let comments = VorbisComments {
        vendor: "libopus 1.3".to_string(),
        tags: tag_map(tags),
        preserved: Vec::new(),
    };
    let mut comment = b"OpusTags".to_vec();
    comment.extend(comments.render().unwrap());

    let mut out = ogg_page(0x02, 0, 0, &[head]);
    out.extend(ogg_page(0, 0, 1, &[comment]));
    out.extend(ogg_page(0x04, 48_000 * seconds + 312, 2, &[vec![0xFC; 300]]));
    out
}

// ---------------------------------------------------------------- FLAC

pub fn flac_stream_info(seconds: u64) -> Vec<u8> {
    let mut data = vec![0u8; 34];
    data[..2].copy_from_slice(&4096u16.to_be_bytes());
    data[2..4].copy_from_slice(&4096u16.to_be_bytes());
    let packed: u64 = (44_100 << 44) | (1 << 41) | (15 << 36) | (44_100 * seconds);
    data[10..18].copy_from_slice(&packed.to_be_bytes());
    data[18..34].copy_from_slice(&[0x5A; 16]);
    data
}

fn flac_block(out: &mut Vec<u8>, kind: u8, data: &[u8], last: bool) {
    out.push(if last { kind | 0x80 } else { kind });
    out.extend(&(data.len() as u32).to_be_bytes()[1..]);
    out.extend(data);
}

/// FLAC with STREAMINFO, a comment block, a picture and `padding` bytes
pub fn flac(tags: &[(&str, &str)], padding: usize) -> Vec<u8> {
    let comments = VorbisComments {
        vendor: "reference libFLAC 1.4.3 20230623".to_string(),
        tags: tag_map(tags),
        preserved: Vec::new(),
    }
    .render()
    .unwrap();

    let mut out = b"fLaC".to_vec();
    flac_block(&mut out, 0, &flac_stream_info(4), false);
    flac_block(&mut out, 4, &comments, false);
    flac_block(&mut out, 6, b"\0\0\0\x03image/png", false);
    flac_block(&mut out, 1, &vec![0; padding], true);
    out.extend(vec![0xF8; 64_000]);
    out
}

/// Byte range of the STREAMINFO payload in a file from [`flac`]
pub const FLAC_STREAM_INFO: std::ops::Range<usize> = 8..42;

// ---------------------------------------------------------------- MP4

pub fn atom(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend(name);
    out.extend(payload);
    out
}

fn full_atom(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend(body);
    atom(name, &payload)
}

fn mp4_data(kind: u32, value: &[u8]) -> Vec<u8> {
    let mut payload = kind.to_be_bytes().to_vec();
    payload.extend([0; 4]);
    payload.extend(value);
    atom(b"data", &payload)
}

/// A UTF-8 `ilst` item
pub fn mp4_text(name: &[u8; 4], value: &str) -> Vec<u8> {
    atom(name, &mp4_data(1, value.as_bytes()))
}

/// `trkn` item with a number and total
pub fn mp4_track(number: u16, total: u16) -> Vec<u8> {
    let mut value = vec![0, 0];
    value.extend(number.to_be_bytes());
    value.extend(total.to_be_bytes());
    value.extend([0, 0]);
    atom(b"trkn", &mp4_data(0, &value))
}

/// M4A with `moov` (holding `items` in its `ilst`) ahead of `mdat`
pub fn m4a(items: &[Vec<u8>], seconds: u32) -> Vec<u8> {
    let ftyp = atom(b"ftyp", b"M4A \0\0\x02\0M4A mp42isom");

    let mut mvhd = Vec::new();
    mvhd.extend(0u32.to_be_bytes());
    mvhd.extend(0u32.to_be_bytes());
    mvhd.extend(1000u32.to_be_bytes());
    mvhd.extend((seconds * 1000).to_be_bytes());
    mvhd.resize(96, 0);

    let mut hdlr = vec![0u8; 4];
    hdlr.extend(b"mdirappl");
    hdlr.resize(21, 0);
    let mut meta = full_atom(b"hdlr", &hdlr);
    meta.extend(atom(b"ilst", &items.concat()));
    meta.extend(atom(b"free", &[0; 128]));

    let mut moov = full_atom(b"mvhd", &mvhd);
    moov.extend(atom(b"udta", &full_atom(b"meta", &meta)));

    let mut out = ftyp;
    out.extend(atom(b"moov", &moov));
    out.extend(atom(b"mdat", &vec![0x21; 24_000]));
    out
}

// ---------------------------------------------------------------- APEv2

/// APEv2 tag with header and footer, every item plain UTF-8 text
pub fn ape_tag(items: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (key, value) in items {
        body.extend((value.len() as u32).to_le_bytes());
        body.extend(0u32.to_le_bytes());
        body.extend(key.as_bytes());
        body.push(0);
        body.extend(value.as_bytes());
    }
    let size = (body.len() + 32) as u32;
    let frame = |flags: u32| {
        let mut out = b"APETAGEX".to_vec();
        out.extend(2000u32.to_le_bytes());
        out.extend(size.to_le_bytes());
        out.extend((items.len() as u32).to_le_bytes());
        out.extend(flags.to_le_bytes());
        out.extend([0; 8]);
        out
    };
    let mut out = frame((1 << 31) | (1 << 29));
    out.extend(body);
    out.extend(frame(1 << 31));
    out
}

/// Musepack SV7, 44.1 kHz, `frames` frames of 1152 samples
pub fn mpc(items: &[(&str, &str)], frames: u32) -> Vec<u8> {
    let mut data = b"MP+\x17".to_vec();
    data.extend(frames.to_le_bytes());
    data.extend(0u32.to_le_bytes());
    data.resize(40_000, 0x33);
    data.extend(ape_tag(items));
    data
}

/// WavPack, 44.1 kHz stereo, `samples` samples
pub fn wavpack(items: &[(&str, &str)], samples: u32) -> Vec<u8> {
    let mut data = b"wvpk".to_vec();
    data.extend(1000u32.to_le_bytes());
    data.extend(0x0410u16.to_le_bytes());
    data.extend([0, 0]);
    data.extend(samples.to_le_bytes());
    data.extend(0u32.to_le_bytes());
    data.extend(samples.to_le_bytes());
    data.extend((9u32 << 23).to_le_bytes());
    data.extend(0u32.to_le_bytes());
    data.resize(30_000, 0x77);
    data.extend(ape_tag(items));
    data
}

// ---------------------------------------------------------------- ASF

fn guid(text: &str) -> [u8; 16] {
    let hex: Vec<u8> = text
        .split('-')
        .flat_map(|group| {
            (0..group.len())
                .step_by(2)
                .map(|i| u8::from_str_radix(&group[i..i + 2], 16).unwrap())
                .collect::<Vec<_>>()
        })
        .collect();
    let mut out = [0u8; 16];
    out[..4].copy_from_slice(&[hex[3], hex[2], hex[1], hex[0]]);
    out[4..6].copy_from_slice(&[hex[5], hex[4]]);
    out[6..8].copy_from_slice(&[hex[7], hex[6]]);
    out[8..].copy_from_slice(&hex[8..]);
    out
}

fn asf_object(id: &str, body: &[u8]) -> Vec<u8> {
    let mut out = guid(id).to_vec();
    out.extend((body.len() as u64 + 24).to_le_bytes());
    out.extend(body);
    out
}

fn utf16z(text: &str) -> Vec<u8> {
    text.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// WMA header with a title and a DWORD `WM/TrackNumber`
pub fn wma(title: &str, track_number: u32, creation_filetime: u64) -> Vec<u8> {
    let mut props = vec![0u8; 16];
    props.extend(0u64.to_le_bytes());
    props.extend(creation_filetime.to_le_bytes());
    props.extend(0u64.to_le_bytes());
    props.extend(1_850_000_000u64.to_le_bytes());
    props.extend(0u64.to_le_bytes());
    props.extend(0u64.to_le_bytes());
    props.extend(2u32.to_le_bytes());
    props.extend(3_200u32.to_le_bytes());
    props.extend(3_200u32.to_le_bytes());
    props.extend(128_000u32.to_le_bytes());

    let fields = [utf16z(title), Vec::new(), Vec::new(), Vec::new(), Vec::new()];
    let mut description = Vec::new();
    for field in &fields {
        description.extend((field.len() as u16).to_le_bytes());
    }
    for field in &fields {
        description.extend(field);
    }

    let name = utf16z("WM/TrackNumber");
    let mut extended = 1u16.to_le_bytes().to_vec();
    extended.extend((name.len() as u16).to_le_bytes());
    extended.extend(name);
    extended.extend(3u16.to_le_bytes());
    extended.extend(4u16.to_le_bytes());
    extended.extend(track_number.to_le_bytes());

    let objects = [
        asf_object("8CABDCA1-A947-11CF-8EE4-00C00C205365", &props),
        asf_object("75B22633-668E-11CF-A6D9-00AA0062CE6C", &description),
        asf_object("D2D0A440-E307-11D2-97F0-00A0C95EA850", &extended),
    ];
    let body = objects.concat();
    let mut out = guid("75B22630-668E-11CF-A6D9-00AA0062CE6C").to_vec();
    out.extend((body.len() as u64 + 30).to_le_bytes());
    out.extend((objects.len() as u32).to_le_bytes());
    out.extend([1, 2]);
    out.extend(body);
    out.extend(vec![0u8; 4096]);
    out
}

// ---------------------------------------------------------------- WAV

/// PCM WAV, 8 kHz mono 16-bit, with an INFO title
pub fn wav(title: &str, seconds: u32) -> Vec<u8> {
    let mut info = b"INFOINAM".to_vec();
    let mut value = title.as_bytes().to_vec();
    value.push(0);
    info.extend((value.len() as u32).to_le_bytes());
    if value.len() % 2 == 1 {
        value.push(0);
    }
    info.extend(value);

    let mut body = b"WAVEfmt ".to_vec();
    body.extend(16u32.to_le_bytes());
    body.extend(1u16.to_le_bytes());
    body.extend(1u16.to_le_bytes());
    body.extend(8_000u32.to_le_bytes());
    body.extend(16_000u32.to_le_bytes());
    body.extend(2u16.to_le_bytes());
    body.extend(16u16.to_le_bytes());
    body.extend(b"LIST");
    body.extend((info.len() as u32).to_le_bytes());
    body.extend(info);
    body.extend(b"data");
    body.extend((16_000 * seconds).to_le_bytes());
    body.extend(vec![0u8; (16_000 * seconds) as usize]);

    let mut out = b"RIFF".to_vec();
    out.extend((body.len() as u32).to_le_bytes());
    out.extend(body);
    out
}

// ---------------------------------------------------------------- Filesystem

/// In-memory [`Filesystem`] for trees too large to build on disk
///
/// Every write bumps a clock so rewritten files get a new mtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilesystem {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, (Arc<Vec<u8>>, SystemTime)>,
    clock: u64,
}

impl MemoryState {
    fn insert(&mut self, path: PathBuf, data: Vec<u8>) {
        self.clock += 1;
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + self.clock);
        self.files.insert(path, (Arc::new(data), mtime));
    }
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.state.lock().unwrap().insert(path.into(), data);
    }

    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state.files.get(path).map(|(data, _)| data.as_ref().clone())
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, path.display().to_string())
}

impl Filesystem for MemoryFilesystem {
    fn walk<'a>(
        &'a self,
        root: &Path,
        _options: WalkOptions,
    ) -> Box<dyn Iterator<Item = io::Result<PathBuf>> + 'a> {
        let paths: Vec<io::Result<PathBuf>> = self
            .state
            .lock()
            .unwrap()
            .files
            .keys()
            .filter(|path| path.starts_with(root))
            .cloned()
            .map(Ok)
            .collect();
        Box::new(paths.into_iter())
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let state = self.state.lock().unwrap();
        if let Some((data, mtime)) = state.files.get(path) {
            return Ok(FileStat {
                mtime: *mtime,
                len: data.len() as u64,
                is_dir: false,
            });
        }
        if state.files.keys().any(|file| file.starts_with(path)) {
            return Ok(FileStat {
                mtime: SystemTime::UNIX_EPOCH,
                len: 0,
                is_dir: true,
            });
        }
        Err(not_found(path))
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>> {
        let state = self.state.lock().unwrap();
        let (data, _) = state.files.get(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(Cursor::new(data.as_ref().clone())))
    }

    fn open_write_atomic(&self, path: &Path) -> io::Result<Box<dyn AtomicFile>> {
        Ok(Box::new(MemoryAtomicFile {
            state: Arc::clone(&self.state),
            path: path.to_path_buf(),
            buf: Vec::new(),
        }))
    }
}

struct MemoryAtomicFile {
    state: Arc<Mutex<MemoryState>>,
    path: PathBuf,
    buf: Vec<u8>,
}

impl Write for MemoryAtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AtomicFile for MemoryAtomicFile {
    fn commit(self: Box<Self>) -> io::Result<()> {
        let this = *self;
        this.state.lock().unwrap().insert(this.path, this.buf);
        Ok(())
    }
}
