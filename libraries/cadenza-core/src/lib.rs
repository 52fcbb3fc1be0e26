//! Cadenza Core
//!
//! Format-agnostic domain types and collaborator traits for the Cadenza
//! audio-metadata subsystem.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Domain Types**: `Track`, `TagMap`, `FormatKind`, `StreamProperties`
//! - **Collaborator Traits**: `Filesystem`, `TrackCache`
//! - **Default Cache**: `MemoryTrackCache`, a mutex-guarded map keyed by path
//!
//! Format parsing and writing live in `cadenza-metadata`; nothing here
//! touches file contents.
//!
//! # Example
//!
//! ```rust
//! use cadenza_core::{FormatKind, Track};
//!
//! let mut track = Track::new("/music/song.flac");
//! track.set("artist", ["A", "B"], false);
//! track.set("artist", ["C"], true);
//!
//! assert_eq!(track.get("artist"), "A / B / C");
//! assert!(FormatKind::Flac.tag_support().allows("artist"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod traits;
pub mod types;

pub use cache::MemoryTrackCache;
pub use traits::{AtomicFile, FileStat, Filesystem, ReadSeek, TrackCache, WalkOptions};
pub use types::{
    is_valid_tag_name, FormatKind, IntoTagValue, StreamProperties, TagMap, TagSupport, Track,
    MP4_TAGS,
};
