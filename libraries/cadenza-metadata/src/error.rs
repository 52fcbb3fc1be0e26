/// Metadata-specific errors
use cadenza_core::FormatKind;
use thiserror::Error;

/// Result type alias using `MetadataError`
pub type Result<T> = std::result::Result<T, MetadataError>;

/// Metadata error types
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Extension not in the format registry
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Unexpected end of data mid-structure
    #[error("Truncated data: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: u64, remaining: u64 },

    /// A synchsafe integer with a high bit set
    #[error("Malformed synchsafe integer: {0:02X?}")]
    MalformedSynchsafe([u8; 4]),

    /// ID3v2 or MPEG frame structure violated
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// MP4 atom structure violated
    #[error("Malformed atom: {0}")]
    MalformedAtom(String),

    /// ASF object structure violated
    #[error("Malformed object: {0}")]
    MalformedObject(String),

    /// FLAC, Ogg, APEv2 or RIFF block structure violated
    #[error("Malformed block: {0}")]
    MalformedBlock(String),

    /// Unknown text encoding marker
    #[error("Unknown text encoding marker: {0:#04x}")]
    BadEncoding(u8),

    /// No tag header where the format allows its absence
    #[error("No {0} header found")]
    HeaderNotFound(&'static str),

    /// The format cannot carry this field
    #[error("Cannot write field '{field}' to {format} files")]
    WriteNotSupportedForField { format: FormatKind, field: String },

    /// A value that cannot be encoded for its field
    #[error("Invalid value for '{field}': {value}")]
    InvalidValue { field: String, value: String },

    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Scan stopped by its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    /// Whether this error only means "no tag present"
    pub fn is_header_not_found(&self) -> bool {
        matches!(self, Self::HeaderNotFound(_))
    }
}
