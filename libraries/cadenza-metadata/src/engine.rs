//! Entry point tying the registry, filesystem, cache and config together
use crate::config::MetadataConfig;
use crate::error::Result;
use crate::formats::WriteReport;
use crate::fs::LocalFilesystem;
use crate::location;
use crate::reader::TrackReader;
use crate::registry::FormatRegistry;
use crate::scanner::{CancellationToken, LibraryScanner, ScanProgress, ScanReport};
use crate::writer::TrackWriter;
use cadenza_core::{Filesystem, MemoryTrackCache, Track, TrackCache};
use std::path::PathBuf;
use std::sync::Arc;

/// The metadata subsystem's public operations
///
/// Cheap to share by reference across threads. The cache is held behind an
/// `Arc` so the embedding application can keep its own handle to it.
pub struct MetadataEngine {
    registry: FormatRegistry,
    fs: Box<dyn Filesystem>,
    cache: Arc<dyn TrackCache>,
    config: MetadataConfig,
}

impl MetadataEngine {
    /// Engine over the local disk with an in-memory cache
    pub fn new(config: MetadataConfig) -> Result<Self> {
        Self::with_collaborators(
            config,
            Box::new(LocalFilesystem::new()),
            Arc::new(MemoryTrackCache::new()),
        )
    }

    /// Engine over caller-supplied filesystem and cache
    pub fn with_collaborators(
        config: MetadataConfig,
        fs: Box<dyn Filesystem>,
        cache: Arc<dyn TrackCache>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: FormatRegistry::new(),
            fs,
            cache,
            config,
        })
    }

    /// Read a track by path or `file://` URI
    ///
    /// Served from the cache when the file's mtime is unchanged.
    pub fn read_track(&self, uri: &str) -> Result<Track> {
        let path = location::resolve(uri)?;
        self.reader().read(&path)
    }

    /// Write a track's tags back to its file
    pub fn write_track(&self, track: &mut Track) -> Result<WriteReport> {
        TrackWriter::new(
            &self.registry,
            self.fs.as_ref(),
            self.cache.as_ref(),
            self.config.write.write_options(),
        )
        .write(track)
    }

    /// Scan directory trees, refreshing the cache
    pub fn scan<F>(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<ScanReport>
    where
        F: FnMut(ScanProgress),
    {
        LibraryScanner::new(
            &self.registry,
            self.fs.as_ref(),
            self.cache.as_ref(),
            self.config.scan.clone(),
        )
        .scan(roots, cancel, progress)
    }

    /// Whether a path or URI names a file of a supported format
    pub fn is_supported(&self, uri: &str) -> bool {
        location::resolve(uri).is_ok_and(|path| self.registry.is_supported(&path))
    }

    pub fn cache(&self) -> Arc<dyn TrackCache> {
        Arc::clone(&self.cache)
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    fn reader(&self) -> TrackReader<'_> {
        TrackReader::new(&self.registry, self.fs.as_ref(), self.cache.as_ref())
    }
}
