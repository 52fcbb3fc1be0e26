//! Track domain type
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::format::FormatKind;
use super::tags::{IntoTagValue, TagMap};

/// Technical stream properties derived by a parser
///
/// Zero means unknown for every numeric field. None of these are ever
/// written back to a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProperties {
    /// Length in whole seconds
    pub duration: u64,
    /// Bits per second
    pub bitrate: u32,
    /// Samples per second
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Creation time as POSIX seconds, when the container records one
    pub created_at: Option<i64>,
}

/// One playable audio resource
///
/// The location is the primary key. Tags are edited through [`Track::set`];
/// everything else is refreshed by a parse or a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    location: PathBuf,
    tags: TagMap,
    properties: StreamProperties,
    format: Option<FormatKind>,
    mtime: Option<SystemTime>,
    blacklisted: bool,
}

impl Track {
    /// Create an unparsed track for a location
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            tags: TagMap::new(),
            properties: StreamProperties::default(),
            format: None,
            mtime: None,
            blacklisted: false,
        }
    }

    /// Build a track from a parser's output
    pub fn from_parsed(
        location: impl Into<PathBuf>,
        format: FormatKind,
        tags: TagMap,
        properties: StreamProperties,
        mtime: SystemTime,
    ) -> Self {
        let mut track = Self::new(location);
        track.refresh(format, tags, properties, mtime);
        track
    }

    /// Replace everything a parse produces
    ///
    /// The blacklist flag survives since it records user intent.
    pub fn refresh(
        &mut self,
        format: FormatKind,
        tags: TagMap,
        properties: StreamProperties,
        mtime: SystemTime,
    ) {
        self.format = Some(format);
        self.tags = tags;
        self.properties = properties;
        self.mtime = Some(mtime);
    }

    /// Record the on-disk timestamp after a successful write
    pub fn mark_written(&mut self, mtime: SystemTime) {
        self.mtime = Some(mtime);
    }

    /// Display form of a tag: all values joined with `" / "`
    pub fn get(&self, tag: &str) -> String {
        self.tags.get(tag).join(" / ")
    }

    /// Replace or append values for a tag
    ///
    /// Replacing with nothing marks the tag cleared so the next write drops
    /// it from the file.
    pub fn set<I, V>(&mut self, tag: &str, values: I, append: bool)
    where
        I: IntoIterator<Item = V>,
        V: IntoTagValue,
    {
        if append {
            self.tags.extend(tag, values);
        } else {
            self.tags.set(tag, values);
        }
    }

    /// Whether the format this track came from can write `tag`
    ///
    /// Unparsed tracks cannot be written at all.
    pub fn can_change(&self, tag: &str) -> bool {
        self.format
            .is_some_and(|format| format.tag_support().allows(tag))
    }

    /// First title value
    pub fn title(&self) -> Option<&str> {
        self.tags.first("title")
    }

    /// First artist value
    pub fn artist(&self) -> Option<&str> {
        self.tags.first("artist")
    }

    /// First album value
    pub fn album(&self) -> Option<&str> {
        self.tags.first("album")
    }

    /// Location on disk
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The tag map
    pub fn tags(&self) -> &TagMap {
        &self.tags
    }

    /// Mutable tag map, for bulk edits
    pub fn tags_mut(&mut self) -> &mut TagMap {
        &mut self.tags
    }

    /// Derived stream properties
    pub fn properties(&self) -> &StreamProperties {
        &self.properties
    }

    /// Length in seconds, 0 when unknown
    pub fn duration(&self) -> u64 {
        self.properties.duration
    }

    /// Bits per second, 0 when unknown
    pub fn bitrate(&self) -> u32 {
        self.properties.bitrate
    }

    /// Parser that produced this record
    pub fn format(&self) -> Option<FormatKind> {
        self.format
    }

    /// Modification time seen at the last parse or write
    pub fn mtime(&self) -> Option<SystemTime> {
        self.mtime
    }

    /// Whether the user hid this track
    pub fn is_blacklisted(&self) -> bool {
        self.blacklisted
    }

    /// Hide or unhide the track
    pub fn set_blacklisted(&mut self, blacklisted: bool) {
        self.blacklisted = blacklisted;
    }
}
