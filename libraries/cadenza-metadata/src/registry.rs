//! Extension to format-handler dispatch
use crate::error::{MetadataError, Result};
use crate::formats::ape::ApeHandler;
use crate::formats::asf::AsfHandler;
use crate::formats::flac::FlacHandler;
use crate::formats::mp3::Mp3Handler;
use crate::formats::mp4::Mp4Handler;
use crate::formats::ogg::OggHandler;
use crate::formats::wav::WavHandler;
use crate::formats::FormatHandler;
use cadenza_core::{FormatKind, TagSupport};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Recognised file extensions, lowercase
const EXTENSIONS: &[(&str, FormatKind)] = &[
    ("mp3", FormatKind::Mp3),
    ("mp2", FormatKind::Mp3),
    ("ogg", FormatKind::Ogg),
    ("oga", FormatKind::Ogg),
    ("opus", FormatKind::Ogg),
    ("spx", FormatKind::Ogg),
    ("flac", FormatKind::Flac),
    ("m4a", FormatKind::Mp4),
    ("m4b", FormatKind::Mp4),
    ("mp4", FormatKind::Mp4),
    ("mpc", FormatKind::Mpc),
    ("mp+", FormatKind::Mpc),
    ("wv", FormatKind::Wv),
    ("wma", FormatKind::Wma),
    ("asf", FormatKind::Wma),
    ("wav", FormatKind::Wav),
    ("aif", FormatKind::Wav),
    ("aiff", FormatKind::Wav),
    ("au", FormatKind::Wav),
    ("snd", FormatKind::Wav),
];

/// Fixed table of format handlers
///
/// Built once and passed to whatever reads or writes tracks; there is no
/// process-wide instance.
pub struct FormatRegistry {
    extensions: HashMap<&'static str, FormatKind>,
    handlers: HashMap<FormatKind, Box<dyn FormatHandler>>,
}

impl FormatRegistry {
    /// Registry covering every supported format
    pub fn new() -> Self {
        let handlers: [Box<dyn FormatHandler>; 8] = [
            Box::new(Mp3Handler),
            Box::new(OggHandler),
            Box::new(FlacHandler),
            Box::new(Mp4Handler),
            Box::new(ApeHandler::musepack()),
            Box::new(ApeHandler::wavpack()),
            Box::new(AsfHandler),
            Box::new(WavHandler),
        ];
        Self {
            extensions: EXTENSIONS.iter().copied().collect(),
            handlers: handlers
                .into_iter()
                .map(|handler| (handler.kind(), handler))
                .collect(),
        }
    }

    /// Format kind for a path, by its extension
    pub fn kind_for_path(&self, path: &Path) -> Result<FormatKind> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .and_then(|ext| self.extensions.get(ext.as_str()).copied())
            .ok_or_else(|| MetadataError::UnsupportedFormat(path.display().to_string()))
    }

    /// Whether the path has a recognised extension
    pub fn is_supported(&self, path: &Path) -> bool {
        self.kind_for_path(path).is_ok()
    }

    /// Handler for a path, by its extension
    pub fn handler_for(&self, path: &Path) -> Result<&dyn FormatHandler> {
        self.handler(self.kind_for_path(path)?)
    }

    /// Handler for a format kind
    pub fn handler(&self, kind: FormatKind) -> Result<&dyn FormatHandler> {
        self.handlers
            .get(&kind)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| MetadataError::UnsupportedFormat(kind.to_string()))
    }

    /// Tags a path's format can write
    pub fn writable_tags(&self, path: &Path) -> Result<TagSupport> {
        Ok(self.handler_for(path)?.writable_tags())
    }

    /// All recognised extensions
    pub fn extensions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.extensions.keys().copied()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(FormatKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("FormatRegistry")
            .field("formats", &kinds)
            .finish_non_exhaustive()
    }
}
