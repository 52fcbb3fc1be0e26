//! Format-kind discriminant and per-format tag capabilities
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::tags::is_valid_tag_name;

/// Tags the MP4 writer knows how to map onto `ilst` items
pub const MP4_TAGS: &[&str] = &[
    "title",
    "artist",
    "albumartist",
    "album",
    "composer",
    "genre",
    "lyrics",
    "encodedby",
    "date",
    "tracknumber",
    "discnumber",
    "copyright",
    "bpm",
    "grouping",
    "comment",
];

/// Which parser/writer pair produced a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// MPEG audio with ID3v2 (and ID3v1) tags
    Mp3,
    /// Ogg Vorbis or Ogg Opus with Vorbis comments
    Ogg,
    /// FLAC with a Vorbis comment block
    Flac,
    /// MP4/M4A with iTunes-style `ilst` atoms
    Mp4,
    /// Musepack with APEv2
    Mpc,
    /// WavPack with APEv2
    Wv,
    /// ASF/WMA
    Wma,
    /// RIFF/WAVE
    Wav,
}

/// What a format lets a caller write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSupport {
    /// Nothing can be written
    ReadOnly,
    /// Only the listed tag names
    Fixed(&'static [&'static str]),
    /// Any well-formed tag name
    Any,
}

impl TagSupport {
    /// Check whether `tag` can be written under this capability set
    pub fn allows(&self, tag: &str) -> bool {
        match self {
            Self::ReadOnly => false,
            Self::Fixed(names) => names.iter().any(|name| name.eq_ignore_ascii_case(tag)),
            Self::Any => is_valid_tag_name(tag),
        }
    }

    /// Whether anything at all can be written
    pub fn is_writable(&self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

impl FormatKind {
    /// Every known format kind
    pub const ALL: [FormatKind; 8] = [
        FormatKind::Mp3,
        FormatKind::Ogg,
        FormatKind::Flac,
        FormatKind::Mp4,
        FormatKind::Mpc,
        FormatKind::Wv,
        FormatKind::Wma,
        FormatKind::Wav,
    ];

    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatKind::Mp3 => "mp3",
            FormatKind::Ogg => "ogg",
            FormatKind::Flac => "flac",
            FormatKind::Mp4 => "mp4",
            FormatKind::Mpc => "mpc",
            FormatKind::Wv => "wv",
            FormatKind::Wma => "wma",
            FormatKind::Wav => "wav",
        }
    }

    /// Tags the writer for this format accepts
    pub fn tag_support(&self) -> TagSupport {
        match self {
            FormatKind::Mp3
            | FormatKind::Ogg
            | FormatKind::Flac
            | FormatKind::Mpc
            | FormatKind::Wv => TagSupport::Any,
            FormatKind::Mp4 => TagSupport::Fixed(MP4_TAGS),
            FormatKind::Wma | FormatKind::Wav => TagSupport::ReadOnly,
        }
    }

    /// Whether values beyond the first survive a write
    pub fn is_multi_valued(&self) -> bool {
        !matches!(self, FormatKind::Mp4 | FormatKind::Wma | FormatKind::Wav)
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormatKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown format kind: {}", s))
    }
}
