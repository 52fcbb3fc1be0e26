//! Writing a track's tags back to its file
use crate::error::{MetadataError, Result};
use crate::formats::{WriteOptions, WriteReport};
use crate::reader::TrackReader;
use crate::registry::FormatRegistry;
use cadenza_core::{Filesystem, Track, TrackCache};
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Rewrites files through a sibling temporary and an atomic rename
#[derive(Clone, Copy)]
pub struct TrackWriter<'a> {
    registry: &'a FormatRegistry,
    fs: &'a dyn Filesystem,
    cache: &'a dyn TrackCache,
    options: WriteOptions,
}

impl<'a> TrackWriter<'a> {
    pub fn new(
        registry: &'a FormatRegistry,
        fs: &'a dyn Filesystem,
        cache: &'a dyn TrackCache,
        options: WriteOptions,
    ) -> Self {
        Self {
            registry,
            fs,
            cache,
            options,
        }
    }

    /// Encode `track`'s tags into its file
    ///
    /// On success the track's mtime is refreshed from the filesystem and
    /// the cache holds the written record. When the format could not store
    /// every value the cache entry is evicted instead, so the next read
    /// reflects what is actually on disk. On failure the file is untouched.
    pub fn write(&self, track: &mut Track) -> Result<WriteReport> {
        let path = track.location().to_path_buf();
        let kind = match track.format() {
            Some(kind) => kind,
            None => self.registry.kind_for_path(&path)?,
        };
        let handler = self.registry.handler(kind)?;

        let support = handler.writable_tags();
        let refused = if support.is_writable() {
            track.tags().keys().find(|tag| !support.allows(tag))
        } else {
            Some(track.tags().keys().next().unwrap_or("tags"))
        };
        if let Some(field) = refused {
            return Err(MetadataError::WriteNotSupportedForField {
                format: kind,
                field: field.to_string(),
            });
        }

        let mut source = self.fs.open_read(&path).map_err(|e| not_found(&path, e))?;
        let mut dest = self.fs.open_write_atomic(&path)?;
        let report = handler.write(&mut *source, &mut dest, track.tags(), &self.options)?;
        dest.flush()?;
        drop(source);
        dest.commit()?;

        for dropped in &report.dropped {
            warn!(
                path = %path.display(),
                format = %kind,
                tag = %dropped.tag,
                values = ?dropped.values,
                "Format is single-valued, extra values were not written"
            );
        }

        let mtime = TrackReader::new(self.registry, self.fs, self.cache).mtime(&path)?;
        track.mark_written(mtime);
        if report.is_lossless() {
            self.cache.put(path.clone(), track.clone());
        } else {
            self.cache.evict(&path);
        }
        debug!(path = %path.display(), padding = report.padding, "Wrote tags");
        Ok(report)
    }
}

fn not_found(path: &Path, e: io::Error) -> MetadataError {
    if e.kind() == io::ErrorKind::NotFound {
        MetadataError::FileNotFound(path.display().to_string())
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFilesystem;
    use cadenza_core::{FormatKind, MemoryTrackCache, StreamProperties, TagMap};
    use std::time::SystemTime;

    fn parsed(path: &str, kind: FormatKind, tags: &[(&str, &str)]) -> Track {
        Track::from_parsed(
            path,
            kind,
            tags.iter().copied().collect::<TagMap>(),
            StreamProperties::default(),
            SystemTime::UNIX_EPOCH,
        )
    }

    fn write(track: &mut Track) -> Result<WriteReport> {
        let registry = FormatRegistry::new();
        let cache = MemoryTrackCache::new();
        TrackWriter::new(
            &registry,
            &LocalFilesystem,
            &cache,
            WriteOptions::default(),
        )
        .write(track)
    }

    #[test]
    fn read_only_formats_refuse_before_touching_the_file() {
        let mut track = parsed("/nonexistent/a.wma", FormatKind::Wma, &[("tracknumber", "5")]);
        match write(&mut track) {
            Err(MetadataError::WriteNotSupportedForField { format, field }) => {
                assert_eq!(format, FormatKind::Wma);
                assert_eq!(field, "tracknumber");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut empty = parsed("/nonexistent/a.wav", FormatKind::Wav, &[]);
        assert!(matches!(
            write(&mut empty),
            Err(MetadataError::WriteNotSupportedForField { field, .. }) if field == "tags"
        ));
    }

    #[test]
    fn fixed_tag_formats_refuse_unknown_tags() {
        let mut track = parsed(
            "/nonexistent/a.m4a",
            FormatKind::Mp4,
            &[("title", "t"), ("mood", "calm")],
        );
        assert!(matches!(
            write(&mut track),
            Err(MetadataError::WriteNotSupportedForField { field, .. }) if field == "mood"
        ));
    }

    #[test]
    fn unparsed_track_dispatches_on_extension() {
        let mut track = Track::new("/nonexistent/a.flv");
        assert!(matches!(
            write(&mut track),
            Err(MetadataError::UnsupportedFormat(_))
        ));

        let mut track = Track::new("/nonexistent/a.flac");
        assert!(matches!(
            write(&mut track),
            Err(MetadataError::FileNotFound(_))
        ));
    }
}
