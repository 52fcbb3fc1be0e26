//! Collaborator traits
//!
//! The metadata engine talks to the filesystem and to the track cache only
//! through these seams, so tests and embedding applications can swap them.
use crate::types::Track;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A readable, seekable byte source
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Result of a `stat` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Last modification time
    pub mtime: SystemTime,
    /// Size in bytes
    pub len: u64,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// Options for [`Filesystem::walk`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Descend through symbolic links
    pub follow_links: bool,
    /// Skip entries whose name starts with a dot
    pub skip_hidden: bool,
}

/// A file being written that only replaces its target on commit
///
/// Dropping without committing must leave the target untouched and
/// discard the partial output.
pub trait AtomicFile: Write + Send {
    /// Flush and move the new content over the target
    ///
    /// # Errors
    /// Returns an error if the content cannot be synced or renamed
    fn commit(self: Box<Self>) -> io::Result<()>;
}

/// Filesystem abstraction
pub trait Filesystem: Send + Sync {
    /// Recursively list regular files under `root`
    ///
    /// Errors for individual entries are yielded in-line so one unreadable
    /// directory does not end the walk.
    fn walk<'a>(
        &'a self,
        root: &Path,
        options: WalkOptions,
    ) -> Box<dyn Iterator<Item = io::Result<PathBuf>> + 'a>;

    /// Stat a path, following links
    ///
    /// # Errors
    /// Returns an error if the path does not exist or cannot be queried
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Open a file for reading
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>>;

    /// Start an atomic replacement of `path`
    ///
    /// # Errors
    /// Returns an error if the temporary file cannot be created
    fn open_write_atomic(&self, path: &Path) -> io::Result<Box<dyn AtomicFile>>;
}

/// Cache of parsed tracks keyed by location
///
/// Implementations serialize their own access; callers share them by
/// reference across scan workers.
pub trait TrackCache: Send + Sync {
    /// Look up a cached track
    fn get(&self, path: &Path) -> Option<Track>;

    /// Insert or replace a track
    fn put(&self, path: PathBuf, track: Track);

    /// Remove a track, returning it if present
    fn evict(&self, path: &Path) -> Option<Track>;

    /// Number of cached tracks
    fn len(&self) -> usize;

    /// Whether the cache is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
