//! Multi-valued tag map
use serde::{Deserialize, Serialize};

/// Check that a tag name can be stored and written
///
/// Names are non-empty printable ASCII without `=` (the Vorbis comment
/// separator). Callers lowercase before storing.
pub fn is_valid_tag_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| (0x20..=0x7D).contains(&b) && b != b'=')
}

/// A value accepted by [`TagMap::set`] and `Track::set`
///
/// `None` and empty strings normalize away.
pub trait IntoTagValue {
    /// Convert into a stored value, or `None` to drop it
    fn into_tag_value(self) -> Option<String>;
}

impl IntoTagValue for String {
    fn into_tag_value(self) -> Option<String> {
        (!self.is_empty()).then_some(self)
    }
}

impl IntoTagValue for &str {
    fn into_tag_value(self) -> Option<String> {
        (!self.is_empty()).then(|| self.to_string())
    }
}

impl IntoTagValue for &String {
    fn into_tag_value(self) -> Option<String> {
        self.as_str().into_tag_value()
    }
}

impl<T: IntoTagValue> IntoTagValue for Option<T> {
    fn into_tag_value(self) -> Option<String> {
        self.and_then(IntoTagValue::into_tag_value)
    }
}

/// Ordered mapping of lowercase tag name to an ordered list of values
///
/// Key order is insertion order. A key may be present with an empty list:
/// that marks a tag the caller cleared, so a writer knows to drop it. For
/// equality and lookups a cleared key behaves exactly like an absent one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagMap {
    entries: Vec<(String, Vec<String>)>,
}

impl TagMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, tag: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(tag))
    }

    /// Values for `tag`; empty when absent or cleared
    pub fn get(&self, tag: &str) -> &[String] {
        self.position(tag)
            .map(|i| self.entries[i].1.as_slice())
            .unwrap_or(&[])
    }

    /// First value for `tag`
    pub fn first(&self, tag: &str) -> Option<&str> {
        self.get(tag).first().map(String::as_str)
    }

    /// Whether `tag` holds at least one value
    pub fn contains(&self, tag: &str) -> bool {
        !self.get(tag).is_empty()
    }

    /// Whether `tag` was explicitly set to an empty list
    pub fn is_cleared(&self, tag: &str) -> bool {
        self.position(tag)
            .is_some_and(|i| self.entries[i].1.is_empty())
    }

    /// Replace the values of `tag`, keeping its position if present
    ///
    /// Setting an empty list marks the tag as cleared.
    pub fn set<I, V>(&mut self, tag: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: IntoTagValue,
    {
        let values: Vec<String> = values
            .into_iter()
            .filter_map(IntoTagValue::into_tag_value)
            .collect();
        match self.position(tag) {
            Some(i) => self.entries[i].1 = values,
            None => self.entries.push((tag.to_ascii_lowercase(), values)),
        }
    }

    /// Append values to `tag`
    pub fn extend<I, V>(&mut self, tag: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: IntoTagValue,
    {
        let values = values.into_iter().filter_map(IntoTagValue::into_tag_value);
        match self.position(tag) {
            Some(i) => self.entries[i].1.extend(values),
            None => self
                .entries
                .push((tag.to_ascii_lowercase(), values.collect())),
        }
    }

    /// Append a single value; used by parsers
    pub fn push(&mut self, tag: &str, value: impl IntoTagValue) {
        self.extend(tag, [value]);
    }

    /// Mark `tag` as cleared
    pub fn clear_tag(&mut self, tag: &str) {
        self.set(tag, std::iter::empty::<String>());
    }

    /// Remove `tag` entirely, returning its values
    pub fn remove(&mut self, tag: &str) -> Option<Vec<String>> {
        self.position(tag).map(|i| self.entries.remove(i).1)
    }

    /// Iterate over all entries, cleared ones included
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Iterate over entries that hold values
    pub fn iter_present(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.iter().filter(|(_, values)| !values.is_empty())
    }

    /// Names of tags that hold values
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter_present().map(|(key, _)| key)
    }

    /// Number of tags that hold values
    pub fn len(&self) -> usize {
        self.iter_present().count()
    }

    /// Whether no tag holds a value
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PartialEq for TagMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter_present()
                .all(|(key, values)| other.get(key) == values)
    }
}

impl Eq for TagMap {}

impl<K: AsRef<str>, V: IntoTagValue> FromIterator<(K, V)> for TagMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = TagMap::new();
        for (key, value) in iter {
            map.push(key.as_ref(), value);
        }
        map
    }
}
