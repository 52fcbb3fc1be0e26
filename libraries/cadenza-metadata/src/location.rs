//! Track locations given as paths or `file://` URIs
use crate::error::{MetadataError, Result};
use std::path::PathBuf;
use url::Url;

/// Turn a caller-supplied location into a filesystem path
///
/// `file://` URIs are percent-decoded; any other scheme is unsupported.
/// Anything without a `scheme://` prefix is taken as a path.
pub fn resolve(location: &str) -> Result<PathBuf> {
    if !location.contains("://") {
        return Ok(PathBuf::from(location));
    }

    let url = Url::parse(location)
        .map_err(|e| MetadataError::UnsupportedFormat(format!("{location}: {e}")))?;
    if url.scheme() != "file" {
        return Err(MetadataError::UnsupportedFormat(format!(
            "{location}: only local files are supported"
        )));
    }
    url.to_file_path()
        .map_err(|()| MetadataError::UnsupportedFormat(location.to_string()))
}
