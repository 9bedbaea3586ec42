//! Generic, format agnostic tag properties
//!
//! A [`PropertyMap`] maps upper-cased keys to one or more string values and
//! is the common language between client code and every tag format. Input a
//! format could not represent is recorded in the unsupported data list so a
//! round trip can detect (and optionally drop) it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Whether `key` is usable as a property key: at least one printable ASCII
/// character, excluding `=` and `~`
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| (0x20..=0x7D).contains(&b) && b != b'=')
}

/// Case-insensitive, multi-valued string dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PropertyMap {
    #[serde(flatten)]
    entries: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unsupported: Vec<String>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map holding a single key
    pub fn with_entry<I, V>(key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut map = Self::new();
        map.insert(key, values);
        map
    }

    /// Append `values` to the entry for `key`, creating it if needed
    pub fn insert<I, V>(&mut self, key: &str, values: I) -> bool
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.entries
            .entry(key.to_uppercase())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        true
    }

    /// Discard any existing values for `key` and install `values`
    pub fn replace<I, V>(&mut self, key: &str, values: I) -> bool
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.entries.insert(
            key.to_uppercase(),
            values.into_iter().map(Into::into).collect(),
        );
        true
    }

    /// Remove `key`, returning its values
    pub fn erase(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(&key.to_uppercase())
    }

    /// Remove every key present in `other`
    pub fn erase_all(&mut self, other: &PropertyMap) {
        for key in other.entries.keys() {
            self.entries.remove(key);
        }
    }

    /// Accumulate all of `other` into this map, unsupported data included
    pub fn merge(&mut self, other: &PropertyMap) {
        for (key, values) in &other.entries {
            self.insert(key, values.iter().cloned());
        }
        self.unsupported.extend(other.unsupported.iter().cloned());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_uppercase())
    }

    /// Whether every entry of `other` is present here with an equal value
    /// list. Unsupported data is not compared.
    pub fn contains(&self, other: &PropertyMap) -> bool {
        other
            .entries
            .iter()
            .all(|(key, values)| self.entries.get(key) == Some(values))
    }

    /// Drop every key whose value list is empty
    pub fn remove_empty(&mut self) {
        self.entries.retain(|_, values| !values.is_empty());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(&key.to_uppercase()).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Vec<String>> {
        self.entries.get_mut(&key.to_uppercase())
    }

    /// First value of `key`, or an empty string
    pub fn first(&self, key: &str) -> String {
        self.get(key)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unsupported_data(&self) -> &[String] {
        &self.unsupported
    }

    pub fn add_unsupported_data(&mut self, id: impl Into<String>) {
        self.unsupported.push(id.into());
    }

    pub fn clear_unsupported_data(&mut self) {
        self.unsupported.clear();
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl fmt::Display for PropertyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, values) in &self.entries {
            for value in values {
                writeln!(f, "{}={}", key, value)?;
            }
        }
        if !self.unsupported.is_empty() {
            writeln!(f, "Unsupported Data:")?;
            for id in &self.unsupported {
                writeln!(f, "  {}", id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_accumulates() {
        let mut map = PropertyMap::new();
        map.insert("k", ["a"]);
        map.insert("K", ["b"]);
        assert_eq!(map.get("k").unwrap(), ["a", "b"]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_replace_overwrites() {
        let mut map = PropertyMap::new();
        map.insert("K", ["a"]);
        map.replace("k", ["b"]);
        assert_eq!(map.get("K").unwrap(), ["b"]);
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut map = PropertyMap::new();
        map.insert("Title", ["x"]);
        assert!(map.contains_key("TITLE"));
        assert!(map.contains_key("title"));
        assert_eq!(map.keys().next().unwrap(), "TITLE");
        assert_eq!(map.erase("tItLe"), Some(vec!["x".to_string()]));
        assert!(map.is_empty());
    }

    #[test]
    fn test_erase_all_and_merge() {
        let mut a = PropertyMap::new();
        a.insert("A", ["1"]);
        a.insert("B", ["2"]);
        let mut b = PropertyMap::new();
        b.insert("B", ["3"]);
        b.add_unsupported_data("APIC");

        let mut merged = a.clone();
        merged.merge(&b);
        assert_eq!(merged.get("B").unwrap(), ["2", "3"]);
        assert_eq!(merged.unsupported_data(), ["APIC"]);

        a.erase_all(&b);
        assert!(!a.contains_key("B"));
        assert!(a.contains_key("A"));
    }

    #[test]
    fn test_contains_compares_value_lists() {
        let mut a = PropertyMap::new();
        a.insert("A", ["1", "2"]);
        a.insert("B", ["x"]);
        a.add_unsupported_data("junk");

        let mut b = PropertyMap::new();
        b.insert("A", ["1", "2"]);
        assert!(a.contains(&b));

        b.replace("A", ["2", "1"]);
        assert!(!a.contains(&b));
    }

    #[test]
    fn test_remove_empty() {
        let mut map = PropertyMap::new();
        map.insert("EMPTY", Vec::<String>::new());
        map.insert("FULL", ["v"]);
        map.remove_empty();
        assert!(!map.contains_key("EMPTY"));
        assert!(map.contains_key("FULL"));
    }

    #[test]
    fn test_equality_includes_unsupported_data() {
        let mut a = PropertyMap::with_entry("TITLE", ["t"]);
        let b = a.clone();
        assert_eq!(a, b);
        a.add_unsupported_data("PRIV");
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("TITLE"));
        assert!(is_valid_key("ALBUM ARTIST"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("A=B"));
        assert!(!is_valid_key("A~B"));
        assert!(!is_valid_key("TÍTULO"));
        assert!(!is_valid_key("TAB\t"));
    }

    #[test]
    fn test_display() {
        let mut map = PropertyMap::new();
        map.insert("ARTIST", ["a", "b"]);
        map.add_unsupported_data("APIC");
        assert_eq!(map.to_string(), "ARTIST=a\nARTIST=b\nUnsupported Data:\n  APIC\n");
    }
}
