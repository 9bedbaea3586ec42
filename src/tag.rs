//! The common tag interface
//!
//! Every concrete tag format implements [`Tag`]: the basic fields, the
//! generic [`PropertyMap`] view and, where the format can carry them,
//! complex properties. Formats without complex property support keep the
//! default methods, which report an empty key set and refuse writes.

use crate::property_map::PropertyMap;
use crate::variant::VariantMap;

/// Property keys backed by the basic tag fields
pub const BASIC_KEYS: [&str; 7] = [
    "TITLE",
    "ARTIST",
    "ALBUM",
    "COMMENT",
    "GENRE",
    "DATE",
    "TRACKNUMBER",
];

/// A metadata record in one on-disk dialect
///
/// Basic field getters never fail: an absent value is an empty string or 0.
pub trait Tag {
    fn title(&self) -> String;
    fn artist(&self) -> String;
    fn album(&self) -> String;
    fn comment(&self) -> String;
    fn genre(&self) -> String;
    fn year(&self) -> u32;
    fn track(&self) -> u32;

    fn set_title(&mut self, value: &str);
    fn set_artist(&mut self, value: &str);
    fn set_album(&mut self, value: &str);
    fn set_comment(&mut self, value: &str);
    fn set_genre(&mut self, value: &str);
    fn set_year(&mut self, value: u32);
    fn set_track(&mut self, value: u32);

    /// `true` when every basic field is empty or zero
    fn is_empty(&self) -> bool {
        self.title().is_empty()
            && self.artist().is_empty()
            && self.album().is_empty()
            && self.comment().is_empty()
            && self.genre().is_empty()
            && self.year() == 0
            && self.track() == 0
    }

    /// All fields as a property map
    fn properties(&self) -> PropertyMap {
        basic_properties(self)
    }

    /// Replace the tag's content with `properties`, returning the subset
    /// that could not be stored
    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        apply_basic_properties(self, properties)
    }

    /// Drop the unsupported items named by `ids` (as reported in
    /// [`PropertyMap::unsupported_data`])
    fn remove_unsupported_properties(&mut self, _ids: &[String]) {}

    /// Keys of the complex properties this tag currently holds
    fn complex_property_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Records stored under `key`; empty for an absent key
    fn complex_properties(&self, _key: &str) -> Vec<VariantMap> {
        Vec::new()
    }

    /// Replace every record under `key`. An empty list removes them all.
    ///
    /// Returns `false` when this format cannot represent `key` at all.
    fn set_complex_properties(&mut self, _key: &str, _values: &[VariantMap]) -> bool {
        false
    }
}

/// Build a property map from the basic fields of `tag`
pub fn basic_properties<T: Tag + ?Sized>(tag: &T) -> PropertyMap {
    let mut map = PropertyMap::new();
    let text = [
        ("TITLE", tag.title()),
        ("ARTIST", tag.artist()),
        ("ALBUM", tag.album()),
        ("COMMENT", tag.comment()),
        ("GENRE", tag.genre()),
    ];
    for (key, value) in text {
        if !value.is_empty() {
            map.insert(key, [value]);
        }
    }
    if tag.year() > 0 {
        map.insert("DATE", [tag.year().to_string()]);
    }
    if tag.track() > 0 {
        map.insert("TRACKNUMBER", [tag.track().to_string()]);
    }
    map
}

/// Set the basic fields of `tag` from `properties`.
///
/// Basic keys absent from `properties` are cleared. Only the first value of
/// each basic key is stored; the remaining values and every non-basic key
/// are returned.
pub fn apply_basic_properties<T: Tag + ?Sized>(tag: &mut T, properties: &PropertyMap) -> PropertyMap {
    let first = |key: &str| properties.first(key);

    tag.set_title(&first("TITLE"));
    tag.set_artist(&first("ARTIST"));
    tag.set_album(&first("ALBUM"));
    tag.set_comment(&first("COMMENT"));
    tag.set_genre(&first("GENRE"));
    tag.set_year(parse_leading_number(&first("DATE")));
    tag.set_track(parse_leading_number(&first("TRACKNUMBER")));

    let mut rejected = PropertyMap::new();
    for (key, values) in properties {
        if BASIC_KEYS.contains(&key.as_str()) {
            if values.len() > 1 {
                rejected.insert(key, values[1..].iter().cloned());
            }
        } else {
            rejected.insert(key, values.iter().cloned());
        }
    }
    rejected
}

/// Leading decimal digits of `s` as a number (`"2019-05-01"` → 2019,
/// `"3/12"` → 3), 0 when there are none
pub fn parse_leading_number(s: &str) -> u32 {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Copy the basic fields of `source` into `target`.
///
/// Without `overwrite`, only fields that are empty in `target` are filled.
pub fn duplicate(source: &dyn Tag, target: &mut dyn Tag, overwrite: bool) {
    macro_rules! copy_text {
        ($($get:ident => $set:ident),+) => {
            $(
                if overwrite || target.$get().is_empty() {
                    target.$set(&source.$get());
                }
            )+
        };
    }
    macro_rules! copy_number {
        ($($get:ident => $set:ident),+) => {
            $(
                if overwrite || target.$get() == 0 {
                    target.$set(source.$get());
                }
            )+
        };
    }

    copy_text!(
        title => set_title,
        artist => set_artist,
        album => set_album,
        comment => set_comment,
        genre => set_genre
    );
    copy_number!(year => set_year, track => set_track);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A tag with only the basic fields, used by tests across the crate
    #[derive(Debug, Default, Clone, PartialEq)]
    pub(crate) struct BasicTag {
        pub title: String,
        pub artist: String,
        pub album: String,
        pub comment: String,
        pub genre: String,
        pub year: u32,
        pub track: u32,
    }

    impl Tag for BasicTag {
        fn title(&self) -> String {
            self.title.clone()
        }
        fn artist(&self) -> String {
            self.artist.clone()
        }
        fn album(&self) -> String {
            self.album.clone()
        }
        fn comment(&self) -> String {
            self.comment.clone()
        }
        fn genre(&self) -> String {
            self.genre.clone()
        }
        fn year(&self) -> u32 {
            self.year
        }
        fn track(&self) -> u32 {
            self.track
        }
        fn set_title(&mut self, value: &str) {
            self.title = value.to_string();
        }
        fn set_artist(&mut self, value: &str) {
            self.artist = value.to_string();
        }
        fn set_album(&mut self, value: &str) {
            self.album = value.to_string();
        }
        fn set_comment(&mut self, value: &str) {
            self.comment = value.to_string();
        }
        fn set_genre(&mut self, value: &str) {
            self.genre = value.to_string();
        }
        fn set_year(&mut self, value: u32) {
            self.year = value;
        }
        fn set_track(&mut self, value: u32) {
            self.track = value;
        }
    }

    #[test]
    fn test_basic_properties_round_trip() {
        let mut props = PropertyMap::new();
        props.insert("TITLE", ["Song"]);
        props.insert("ARTIST", ["Band"]);
        props.insert("DATE", ["1999"]);
        props.insert("TRACKNUMBER", ["7"]);

        let mut tag = BasicTag::default();
        let rejected = tag.set_properties(&props);
        assert!(rejected.is_empty());
        assert_eq!(tag.properties(), props);
    }

    #[test]
    fn test_set_properties_reports_rejected() {
        let mut props = PropertyMap::new();
        props.insert("TITLE", ["one", "two"]);
        props.insert("LYRICIST", ["someone"]);

        let mut tag = BasicTag::default();
        let rejected = tag.set_properties(&props);
        assert_eq!(tag.title, "one");
        assert_eq!(rejected.get("TITLE").unwrap(), ["two"]);
        assert_eq!(rejected.get("LYRICIST").unwrap(), ["someone"]);
    }

    #[test]
    fn test_set_properties_clears_missing_basic_fields() {
        let mut tag = BasicTag {
            title: "old".into(),
            track: 4,
            ..Default::default()
        };
        tag.set_properties(&PropertyMap::with_entry("ARTIST", ["new"]));
        assert!(tag.title.is_empty());
        assert_eq!(tag.track, 0);
        assert_eq!(tag.artist, "new");
    }

    #[test]
    fn test_parse_leading_number() {
        assert_eq!(parse_leading_number("2019-05-01"), 2019);
        assert_eq!(parse_leading_number("3/12"), 3);
        assert_eq!(parse_leading_number(" 42 "), 42);
        assert_eq!(parse_leading_number("abc"), 0);
        assert_eq!(parse_leading_number(""), 0);
    }

    #[test]
    fn test_duplicate() {
        let source = BasicTag {
            title: "src".into(),
            artist: "src artist".into(),
            year: 2001,
            ..Default::default()
        };
        let mut target = BasicTag {
            title: "keep".into(),
            ..Default::default()
        };
        duplicate(&source, &mut target, false);
        assert_eq!(target.title, "keep");
        assert_eq!(target.artist, "src artist");
        assert_eq!(target.year, 2001);

        duplicate(&source, &mut target, true);
        assert_eq!(target.title, "src");
    }

    #[test]
    fn test_complex_properties_unsupported_by_default() {
        let mut tag = BasicTag::default();
        assert!(tag.complex_property_keys().is_empty());
        assert!(!tag.set_complex_properties("PICTURE", &[VariantMap::new()]));
        assert!(tag.complex_properties("PICTURE").is_empty());
    }
}
