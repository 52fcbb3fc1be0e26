/// Library scanner implementation
use crate::config::ScanSettings;
use crate::error::{MetadataError, Result};
use crate::reader::{Loaded, TrackReader};
use crate::registry::FormatRegistry;
use cadenza_core::{Filesystem, Track, TrackCache};
use crossbeam_channel::bounded;
use std::io;
use std::panic;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Cooperative stop flag shared between a scan and whoever may cancel it
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the scan to stop; in-flight parses still finish
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Scan progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// Files whose parse has completed, successfully or not
    pub processed: usize,

    /// Supported files found so far
    pub total: usize,

    /// Whether the walk has finished, so `total` is final
    pub walk_finished: bool,
}

/// Scan statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Supported files found by the walk
    pub discovered: usize,

    /// Files parsed and written to the cache
    pub parsed: usize,

    /// Files whose cached record was still fresh
    pub cached: usize,

    /// Files that failed to parse
    pub failed: usize,

    /// Directory entries the walk could not read
    pub walk_errors: usize,
}

impl ScanStats {
    pub fn processed(&self) -> usize {
        self.parsed + self.cached + self.failed
    }
}

/// How a scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

/// Result of a scan
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Tracks in the order their parse completed
    pub tracks: Vec<Track>,

    pub stats: ScanStats,

    /// Files that failed to parse, with the reason
    pub failures: Vec<(PathBuf, String)>,

    pub status: ScanStatus,
}

impl ScanReport {
    pub fn is_cancelled(&self) -> bool {
        self.status == ScanStatus::Cancelled
    }
}

impl IntoIterator for ScanReport {
    type Item = Track;
    type IntoIter = std::vec::IntoIter<Track>;

    fn into_iter(self) -> Self::IntoIter {
        self.tracks.into_iter()
    }
}

/// Walks directory trees and parses every supported file
///
/// One walker thread feeds a bounded pool of parser workers. Results come
/// back to the calling thread, which is the only one that writes the cache
/// and the only one that runs the progress callback.
pub struct LibraryScanner<'a> {
    registry: &'a FormatRegistry,
    fs: &'a dyn Filesystem,
    cache: &'a dyn TrackCache,
    settings: ScanSettings,
}

impl<'a> LibraryScanner<'a> {
    pub fn new(
        registry: &'a FormatRegistry,
        fs: &'a dyn Filesystem,
        cache: &'a dyn TrackCache,
        settings: ScanSettings,
    ) -> Self {
        Self {
            registry,
            fs,
            cache,
            settings,
        }
    }

    /// Scan `roots` for audio files
    ///
    /// # Arguments
    /// * `roots` - Directories (or single files) to scan
    /// * `cancel` - Checked by the walker between entries and by workers between files
    /// * `progress` - Called every `progress_interval` files and once at the end
    ///
    /// Per-file parse errors are counted and reported, never returned. The
    /// only errors are for roots that do not exist.
    pub fn scan<F>(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<ScanReport>
    where
        F: FnMut(ScanProgress),
    {
        for root in roots {
            if let Err(e) = self.fs.stat(root) {
                return Err(if e.kind() == io::ErrorKind::NotFound {
                    MetadataError::FileNotFound(root.display().to_string())
                } else {
                    e.into()
                });
            }
        }

        let started = Instant::now();
        let workers = self.settings.workers.max(1);
        let interval = self.settings.progress_interval.max(1);
        info!(roots = roots.len(), workers, "Starting library scan");

        let reader = TrackReader::new(self.registry, self.fs, self.cache);
        let discovered = AtomicUsize::new(0);
        let walk_finished = AtomicBool::new(false);
        let mut stats = ScanStats::default();
        let mut tracks = Vec::new();
        let mut failures = Vec::new();

        thread::scope(|s| {
            let (path_tx, path_rx) = bounded::<PathBuf>(workers * 4);
            let (result_tx, result_rx) = bounded::<(PathBuf, Result<Loaded>)>(workers * 4);

            let walker = s.spawn(|| {
                let path_tx = path_tx;
                let mut walk_errors = 0;
                'roots: for root in roots {
                    for entry in self.fs.walk(root, self.settings.walk_options()) {
                        if cancel.is_cancelled() {
                            debug!("Walk cancelled");
                            break 'roots;
                        }
                        match entry {
                            Ok(path) if self.registry.is_supported(&path) => {
                                discovered.fetch_add(1, Ordering::Relaxed);
                                if path_tx.send(path).is_err() {
                                    break 'roots;
                                }
                            }
                            Ok(path) => trace!(path = %path.display(), "Skipping unsupported file"),
                            Err(e) => {
                                warn!(root = %root.display(), error = %e, "Unreadable directory entry");
                                walk_errors += 1;
                            }
                        }
                    }
                }
                walk_finished.store(true, Ordering::Relaxed);
                walk_errors
            });

            for _ in 0..workers {
                let path_rx = path_rx.clone();
                let result_tx = result_tx.clone();
                s.spawn(move || {
                    for path in path_rx {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let result = reader.load(&path);
                        if result_tx.send((path, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(path_rx);
            drop(result_tx);

            for (path, result) in result_rx {
                match result {
                    Ok(Loaded::Parsed(track)) => {
                        self.cache.put(path, track.clone());
                        stats.parsed += 1;
                        tracks.push(track);
                    }
                    Ok(Loaded::Cached(track)) => {
                        stats.cached += 1;
                        tracks.push(track);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read track");
                        stats.failed += 1;
                        failures.push((path, e.to_string()));
                    }
                }

                if stats.processed() % interval == 0 {
                    progress(ScanProgress {
                        processed: stats.processed(),
                        total: discovered.load(Ordering::Relaxed),
                        walk_finished: walk_finished.load(Ordering::Relaxed),
                    });
                }
            }

            stats.walk_errors = match walker.join() {
                Ok(walk_errors) => walk_errors,
                Err(payload) => panic::resume_unwind(payload),
            };
        });

        stats.discovered = discovered.into_inner();
        progress(ScanProgress {
            processed: stats.processed(),
            total: stats.discovered,
            walk_finished: true,
        });

        let status = if cancel.is_cancelled() {
            ScanStatus::Cancelled
        } else {
            ScanStatus::Completed
        };
        info!(
            status = ?status,
            parsed = stats.parsed,
            cached = stats.cached,
            failed = stats.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Library scan finished"
        );

        Ok(ScanReport {
            tracks,
            stats,
            failures,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFilesystem;
    use cadenza_core::MemoryTrackCache;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn report_iterates_tracks() {
        let report = ScanReport {
            tracks: vec![Track::new("/a.mp3"), Track::new("/b.mp3")],
            stats: ScanStats::default(),
            failures: Vec::new(),
            status: ScanStatus::Completed,
        };
        assert!(!report.is_cancelled());
        let locations: Vec<PathBuf> = report
            .into_iter()
            .map(|track| track.location().to_path_buf())
            .collect();
        assert_eq!(locations, [PathBuf::from("/a.mp3"), PathBuf::from("/b.mp3")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let registry = FormatRegistry::new();
        let cache = MemoryTrackCache::new();
        let scanner =
            LibraryScanner::new(&registry, &LocalFilesystem, &cache, ScanSettings::default());
        let result = scanner.scan(
            &[dir.path().join("missing")],
            &CancellationToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(MetadataError::FileNotFound(_))));
    }

    #[test]
    fn broken_files_are_counted_not_returned() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.flac"), b"not a flac").unwrap();
        fs::write(dir.path().join("notes.txt"), b"liner notes").unwrap();

        let registry = FormatRegistry::new();
        let cache = MemoryTrackCache::new();
        let settings = ScanSettings {
            workers: 2,
            ..ScanSettings::default()
        };
        let scanner = LibraryScanner::new(&registry, &LocalFilesystem, &cache, settings);

        let mut updates = Vec::new();
        let report = scanner
            .scan(&[dir.path().to_path_buf()], &CancellationToken::new(), |p| {
                updates.push(p);
            })
            .unwrap();

        assert_eq!(report.status, ScanStatus::Completed);
        assert!(report.tracks.is_empty());
        assert_eq!(report.stats.discovered, 1);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.failures[0].0, dir.path().join("broken.flac"));
        assert!(cache.is_empty());
        assert_eq!(
            updates.last(),
            Some(&ScanProgress {
                processed: 1,
                total: 1,
                walk_finished: true,
            })
        );
    }
}
