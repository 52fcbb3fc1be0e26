//! Cadenza Metadata
//!
//! Tag reading, tag writing and library scanning for Cadenza.
//!
//! This crate provides:
//! - Parsers and writers for MP3 (ID3v2/ID3v1), Ogg Vorbis/Opus, FLAC,
//!   MP4/M4A, Musepack and WavPack (APEv2), plus read-only ASF/WMA and WAV
//! - A fixed extension registry dispatching to one handler per format
//! - Atomic write-back through a sibling temporary file
//! - Multi-threaded library scanning with progress and cancellation
//! - An mtime-keyed track cache in front of every read
//!
//! # Example
//!
//! ```rust,no_run
//! use cadenza_metadata::{CancellationToken, MetadataConfig, MetadataEngine};
//! use std::path::PathBuf;
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = MetadataEngine::new(MetadataConfig::default())?;
//!
//! // Read, edit and write back a single file
//! let mut track = engine.read_track("/music/song.flac")?;
//! track.set("artist", ["A", "B"], false);
//! let report = engine.write_track(&mut track)?;
//! assert!(report.is_lossless());
//!
//! // Scan a library
//! let cancel = CancellationToken::new();
//! let report = engine.scan(&[PathBuf::from("/music")], &cancel, |progress| {
//!     println!("{}/{}", progress.processed, progress.total);
//! })?;
//! for track in report {
//!     println!("{}", track.get("title"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod bytes;
pub mod config;
mod engine;
mod error;
pub mod formats;
pub mod fs;
pub mod location;
mod reader;
mod registry;
mod scanner;
pub mod text;
mod writer;

pub use config::{MetadataConfig, ScanSettings, WriteSettings};
pub use engine::MetadataEngine;
pub use error::{MetadataError, Result};
pub use formats::{DroppedValues, FormatHandler, ParsedMetadata, WriteOptions, WriteReport};
pub use fs::LocalFilesystem;
pub use reader::{Loaded, TrackReader};
pub use registry::FormatRegistry;
pub use scanner::{
    CancellationToken, LibraryScanner, ScanProgress, ScanReport, ScanStats, ScanStatus,
};
pub use writer::TrackWriter;
