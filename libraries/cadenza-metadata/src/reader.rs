//! Cache-aware track reading
use crate::error::{MetadataError, Result};
use crate::registry::FormatRegistry;
use cadenza_core::{Filesystem, StreamProperties, TagMap, Track, TrackCache};
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, trace};

/// Where a [`TrackReader::load`] result came from
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    /// The cached record's mtime matched the file
    Cached(Track),
    /// The file was parsed; the cache has not been updated yet
    Parsed(Track),
}

impl Loaded {
    pub fn track(&self) -> &Track {
        match self {
            Loaded::Cached(track) | Loaded::Parsed(track) => track,
        }
    }

    pub fn into_track(self) -> Track {
        match self {
            Loaded::Cached(track) | Loaded::Parsed(track) => track,
        }
    }
}

/// Reads tracks through the registry, consulting the cache first
///
/// Borrowed collaborators only; the reader itself holds no state.
#[derive(Clone, Copy)]
pub struct TrackReader<'a> {
    registry: &'a FormatRegistry,
    fs: &'a dyn Filesystem,
    cache: &'a dyn TrackCache,
}

impl<'a> TrackReader<'a> {
    pub fn new(
        registry: &'a FormatRegistry,
        fs: &'a dyn Filesystem,
        cache: &'a dyn TrackCache,
    ) -> Self {
        Self {
            registry,
            fs,
            cache,
        }
    }

    /// Return the fresh cached track, or parse and cache the file
    pub fn read(&self, path: &Path) -> Result<Track> {
        match self.load(path)? {
            Loaded::Cached(track) => Ok(track),
            Loaded::Parsed(track) => {
                self.cache.put(path.to_path_buf(), track.clone());
                Ok(track)
            }
        }
    }

    /// Like [`read`](Self::read) but leaves the cache untouched
    ///
    /// Safe to call from many threads at once; the scanner's workers use it
    /// and hand parsed tracks to a single thread that owns cache writes.
    pub fn load(&self, path: &Path) -> Result<Loaded> {
        let kind = self.registry.kind_for_path(path)?;
        let mtime = self.mtime(path)?;

        let cached = self.cache.get(path);
        if let Some(track) = cached.as_ref().filter(|track| track.mtime() == Some(mtime)) {
            trace!(path = %path.display(), "Cache hit");
            return Ok(Loaded::Cached(track.clone()));
        }

        let handler = self.registry.handler(kind)?;
        let mut source = self.fs.open_read(path)?;
        let (tags, properties) = match handler.parse(&mut *source) {
            Ok(parsed) => (parsed.tags, parsed.properties),
            Err(e) if e.is_header_not_found() => {
                debug!(path = %path.display(), error = %e, "No tag header, reading as untagged");
                (TagMap::new(), StreamProperties::default())
            }
            Err(e) => return Err(e),
        };

        // A stale record keeps its user flags across the re-parse
        let track = match cached {
            Some(mut track) => {
                track.refresh(kind, tags, properties, mtime);
                track
            }
            None => Track::from_parsed(path, kind, tags, properties, mtime),
        };
        Ok(Loaded::Parsed(track))
    }

    pub(crate) fn mtime(&self, path: &Path) -> Result<SystemTime> {
        match self.fs.stat(path) {
            Ok(stat) => Ok(stat.mtime),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(MetadataError::FileNotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
