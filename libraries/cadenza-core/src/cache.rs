//! In-memory track cache
use crate::traits::TrackCache;
use crate::types::Track;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A [`TrackCache`] backed by a single mutex-guarded map
#[derive(Debug, Default)]
pub struct MemoryTrackCache {
    tracks: Mutex<HashMap<PathBuf, Track>>,
}

impl MemoryTrackCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all cached locations
    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Track>> {
        self.tracks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrackCache for MemoryTrackCache {
    fn get(&self, path: &Path) -> Option<Track> {
        self.lock().get(path).cloned()
    }

    fn put(&self, path: PathBuf, track: Track) {
        self.lock().insert(path, track);
    }

    fn evict(&self, path: &Path) -> Option<Track> {
        self.lock().remove(path)
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
