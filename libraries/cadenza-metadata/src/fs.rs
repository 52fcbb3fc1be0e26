//! Local filesystem collaborator
use cadenza_core::{AtomicFile, FileStat, Filesystem, ReadSeek, WalkOptions};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;
use walkdir::{DirEntry, WalkDir};

/// [`Filesystem`] over the local disk
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

impl Filesystem for LocalFilesystem {
    fn walk<'a>(
        &'a self,
        root: &Path,
        options: WalkOptions,
    ) -> Box<dyn Iterator<Item = io::Result<PathBuf>> + 'a> {
        let walker = WalkDir::new(root)
            .follow_links(options.follow_links)
            .into_iter()
            // The root itself is never filtered, even when its name is hidden
            .filter_entry(move |entry| {
                !(options.skip_hidden && entry.depth() > 0 && is_hidden(entry))
            })
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
                Ok(entry) => {
                    trace!(path = %entry.path().display(), "Skipping non-file entry");
                    None
                }
                Err(e) => Some(Err(io::Error::from(e))),
            });
        Box::new(walker)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            mtime: meta.modified()?,
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }

    fn open_write_atomic(&self, path: &Path) -> io::Result<Box<dyn AtomicFile>> {
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".cadenza-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(temp.path(), meta.permissions())?;
        }
        Ok(Box::new(LocalAtomicFile {
            out: BufWriter::new(temp),
            target: path.to_path_buf(),
        }))
    }
}

/// Sibling temporary file renamed over its target on commit
///
/// Dropping it uncommitted deletes the temporary file.
struct LocalAtomicFile {
    out: BufWriter<NamedTempFile>,
    target: PathBuf,
}

impl Write for LocalAtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl AtomicFile for LocalAtomicFile {
    fn commit(self: Box<Self>) -> io::Result<()> {
        let Self { out, target } = *self;
        let temp = out.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }
}
