//! Domain types for Cadenza

mod format;
mod tags;
mod track;

pub use format::{FormatKind, TagSupport, MP4_TAGS};
pub use tags::{is_valid_tag_name, IntoTagValue, TagMap};
pub use track::{StreamProperties, Track};
