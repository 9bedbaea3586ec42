//! APEv2 tags
//!
//! Layout: an optional 32 byte header, the items, and a 32 byte footer. The
//! footer is what readers look for, at the end of the file or just before an
//! ID3v1 trailer. Each item is
//!
//! ```text
//! value size (u32 LE) | flags (u32 LE) | key (ASCII, NUL) | value
//! ```
//!
//! Keys are case-insensitive. Text values hold UTF-8 with NUL separating
//! multiple values.

use crate::picture::{mime_from_data, Picture, PictureType, PICTURE_KEY};
use crate::property_map::{is_valid_key, PropertyMap};
use crate::tag::{parse_leading_number, Tag};
use crate::variant::VariantMap;
use anyhow::{bail, Result};

/// APEv2 tag preamble
pub const APE_PREAMBLE: &[u8; 8] = b"APETAGEX";

/// Size of the header and of the footer
pub const APE_FOOTER_SIZE: u64 = 32;

/// APEv2 tag version
const APE_VERSION: u32 = 2000;

/// APEv1 tags have a footer only
const APE_VERSION_1: u32 = 1000;

/// APEv2 tag flags
const APE_FLAG_HEADER_PRESENT: u32 = 1 << 31;
const APE_FLAG_IS_HEADER: u32 = 1 << 29;

/// Item flags
const ITEM_FLAG_READ_ONLY: u32 = 1;
const ITEM_TYPE_SHIFT: u32 = 1;
const ITEM_TYPE_MASK: u32 = 0b11;

const COVER_FRONT: &str = "COVER ART (FRONT)";
const COVER_BACK: &str = "COVER ART (BACK)";

/// APE item key to property key
const KEY_TRANSLATIONS: [(&str, &str); 5] = [
    ("YEAR", "DATE"),
    ("TRACK", "TRACKNUMBER"),
    ("DISC", "DISCNUMBER"),
    ("ALBUM ARTIST", "ALBUMARTIST"),
    ("MIXARTIST", "REMIXER"),
];

fn to_property_key(ape_key: &str) -> String {
    let upper = ape_key.to_uppercase();
    KEY_TRANSLATIONS
        .iter()
        .find(|(ape, _)| *ape == upper)
        .map_or(upper, |(_, prop)| prop.to_string())
}

fn to_ape_key(property_key: &str) -> String {
    let upper = property_key.to_uppercase();
    KEY_TRANSLATIONS
        .iter()
        .find(|(_, prop)| *prop == upper)
        .map_or(upper, |(ape, _)| ape.to_string())
}

/// Whether `key` may name an APE item: 2 to 255 printable ASCII characters
/// and none of the reserved tag identifiers
pub fn is_valid_ape_key(key: &str) -> bool {
    const RESERVED: [&str; 4] = ["ID3", "TAG", "OGGS", "MP+"];
    (2..=255).contains(&key.len())
        && key.bytes().all(|b| (0x20..=0x7E).contains(&b))
        && !RESERVED.contains(&key.to_uppercase().as_str())
}

/// Read u32 little-endian from slice
fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// A parsed APE footer (or header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApeFooter {
    pub version: u32,
    /// Items plus footer, header excluded
    pub tag_size: u32,
    pub item_count: u32,
    pub flags: u32,
}

impl ApeFooter {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < APE_FOOTER_SIZE as usize || &data[0..8] != APE_PREAMBLE {
            return None;
        }
        let footer = Self {
            version: read_u32_le(&data[8..]),
            tag_size: read_u32_le(&data[12..]),
            item_count: read_u32_le(&data[16..]),
            flags: read_u32_le(&data[20..]),
        };
        if (footer.tag_size as u64) < APE_FOOTER_SIZE {
            return None;
        }
        Some(footer)
    }

    pub fn has_header(&self) -> bool {
        self.version != APE_VERSION_1 && self.flags & APE_FLAG_HEADER_PRESENT != 0
    }

    /// Size of the whole tag on disk, header included
    pub fn total_size(&self) -> u64 {
        self.tag_size as u64 + if self.has_header() { APE_FOOTER_SIZE } else { 0 }
    }
}

/// Value of an APE item
#[derive(Debug, Clone, PartialEq)]
pub enum ApeValue {
    Text(Vec<String>),
    Binary(Vec<u8>),
    /// External reference, stored as UTF-8
    Locator(String),
}

impl ApeValue {
    fn kind(&self) -> u32 {
        match self {
            ApeValue::Text(_) => 0,
            ApeValue::Binary(_) => 1,
            ApeValue::Locator(_) => 2,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            ApeValue::Text(values) => values.join("\0").into_bytes(),
            ApeValue::Binary(data) => data.clone(),
            ApeValue::Locator(url) => url.as_bytes().to_vec(),
        }
    }
}

/// APEv2 tag item
#[derive(Debug, Clone, PartialEq)]
pub struct ApeItem {
    pub key: String,
    pub value: ApeValue,
    pub read_only: bool,
}

impl ApeItem {
    pub fn text(key: &str, values: Vec<String>) -> Self {
        Self {
            key: key.to_string(),
            value: ApeValue::Text(values),
            read_only: false,
        }
    }

    pub fn binary(key: &str, data: Vec<u8>) -> Self {
        Self {
            key: key.to_string(),
            value: ApeValue::Binary(data),
            read_only: false,
        }
    }
}

/// APEv2 tag collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApeTag {
    items: Vec<ApeItem>,
}

impl ApeTag {
    /// Create a new empty APE tag
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Parse a complete tag: optional header, items and footer
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < APE_FOOTER_SIZE as usize {
            bail!("APE tag too short");
        }
        let footer_start = data.len() - APE_FOOTER_SIZE as usize;
        let footer = match ApeFooter::parse(&data[footer_start..]) {
            Some(footer) => footer,
            None => bail!("APE footer not found"),
        };
        if footer.version != APE_VERSION && footer.version != APE_VERSION_1 {
            bail!("unsupported APE version {}", footer.version);
        }

        // tag_size includes items + footer, not header
        let tag_size = footer.tag_size as usize;
        if tag_size > data.len() {
            bail!("APE tag size {} exceeds {} available bytes", tag_size, data.len());
        }
        let items_start = data.len() - tag_size;

        let mut tag = ApeTag::new();
        let mut pos = items_start;

        for _ in 0..footer.item_count {
            if pos + 8 > footer_start {
                break;
            }

            let value_size = read_u32_le(&data[pos..]) as usize;
            let flags = read_u32_le(&data[pos + 4..]);
            pos += 8;

            // Find null-terminated key
            let key_start = pos;
            while pos < footer_start && data[pos] != 0 {
                pos += 1;
            }
            if pos >= footer_start {
                break;
            }
            let key = String::from_utf8_lossy(&data[key_start..pos]).to_string();
            pos += 1;

            if value_size > footer_start - pos {
                log::warn!("APE item {} runs past the footer, stopping", key);
                break;
            }
            let raw = &data[pos..pos + value_size];
            pos += value_size;

            if !is_valid_ape_key(&key) {
                log::debug!("skipping APE item with invalid key {:?}", key);
                continue;
            }

            let value = match (flags >> ITEM_TYPE_SHIFT) & ITEM_TYPE_MASK {
                1 => ApeValue::Binary(raw.to_vec()),
                2 => ApeValue::Locator(String::from_utf8_lossy(raw).to_string()),
                _ => ApeValue::Text(
                    String::from_utf8_lossy(raw)
                        .split('\0')
                        .map(str::to_string)
                        .collect(),
                ),
            };
            tag.items.push(ApeItem {
                key,
                value,
                read_only: flags & ITEM_FLAG_READ_ONLY != 0,
            });
        }

        Ok(tag)
    }

    /// Serialize with header and footer; an empty tag renders to nothing
    pub fn render(&self) -> Vec<u8> {
        if self.is_empty() {
            return Vec::new();
        }

        let mut items_data = Vec::new();
        for item in &self.items {
            let value_bytes = item.value.to_bytes();
            let mut flags = item.value.kind() << ITEM_TYPE_SHIFT;
            if item.read_only {
                flags |= ITEM_FLAG_READ_ONLY;
            }
            items_data.extend_from_slice(&(value_bytes.len() as u32).to_le_bytes());
            items_data.extend_from_slice(&flags.to_le_bytes());
            items_data.extend_from_slice(item.key.as_bytes());
            items_data.push(0);
            items_data.extend_from_slice(&value_bytes);
        }

        let tag_size = (items_data.len() as u64 + APE_FOOTER_SIZE) as u32;
        let item_count = self.items.len() as u32;

        let mut result = Vec::with_capacity(items_data.len() + 64);
        let block = |flags: u32, out: &mut Vec<u8>| {
            out.extend_from_slice(APE_PREAMBLE);
            out.extend_from_slice(&APE_VERSION.to_le_bytes());
            out.extend_from_slice(&tag_size.to_le_bytes());
            out.extend_from_slice(&item_count.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&[0u8; 8]);
        };
        block(APE_FLAG_HEADER_PRESENT | APE_FLAG_IS_HEADER, &mut result);
        result.extend_from_slice(&items_data);
        block(APE_FLAG_HEADER_PRESENT, &mut result);
        result
    }

    pub fn items(&self) -> &[ApeItem] {
        &self.items
    }

    /// Get an item by key (case-insensitive)
    pub fn get(&self, key: &str) -> Option<&ApeItem> {
        let key_upper = key.to_uppercase();
        self.items
            .iter()
            .find(|item| item.key.to_uppercase() == key_upper)
    }

    /// First text value of `key`, empty if absent or not text
    pub fn text(&self, key: &str) -> String {
        match self.get(key).map(|item| &item.value) {
            Some(ApeValue::Text(values)) => values.first().cloned().unwrap_or_default(),
            _ => String::new(),
        }
    }

    /// Insert or replace an item, keeping its position when replacing.
    /// Returns `false` for keys APE cannot store.
    pub fn set_item(&mut self, item: ApeItem) -> bool {
        if !is_valid_ape_key(&item.key) {
            return false;
        }
        let key_upper = item.key.to_uppercase();
        match self
            .items
            .iter_mut()
            .find(|existing| existing.key.to_uppercase() == key_upper)
        {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
        true
    }

    /// Set a text item; an empty value removes it
    pub fn set_text(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.remove(key);
        } else {
            self.set_item(ApeItem::text(key, vec![value.to_string()]));
        }
    }

    /// Remove a tag by key
    pub fn remove(&mut self, key: &str) {
        let key_upper = key.to_uppercase();
        self.items
            .retain(|item| item.key.to_uppercase() != key_upper);
    }

    /// Check if tag is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn set_number(&mut self, key: &str, value: u32) {
        if value == 0 {
            self.remove(key);
        } else {
            self.set_text(key, &value.to_string());
        }
    }

    fn is_cover(key: &str) -> bool {
        key.eq_ignore_ascii_case(COVER_FRONT) || key.eq_ignore_ascii_case(COVER_BACK)
    }
}

impl Tag for ApeTag {
    fn title(&self) -> String {
        self.text("TITLE")
    }

    fn artist(&self) -> String {
        self.text("ARTIST")
    }

    fn album(&self) -> String {
        self.text("ALBUM")
    }

    fn comment(&self) -> String {
        self.text("COMMENT")
    }

    fn genre(&self) -> String {
        self.text("GENRE")
    }

    fn year(&self) -> u32 {
        parse_leading_number(&self.text("YEAR"))
    }

    fn track(&self) -> u32 {
        parse_leading_number(&self.text("TRACK"))
    }

    fn set_title(&mut self, value: &str) {
        self.set_text("TITLE", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text("ARTIST", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_text("ALBUM", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.set_text("COMMENT", value);
    }

    fn set_genre(&mut self, value: &str) {
        self.set_text("GENRE", value);
    }

    fn set_year(&mut self, value: u32) {
        self.set_number("YEAR", value);
    }

    fn set_track(&mut self, value: u32) {
        self.set_number("TRACK", value);
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn properties(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        for item in &self.items {
            if Self::is_cover(&item.key) {
                continue;
            }
            let key = to_property_key(&item.key);
            match &item.value {
                ApeValue::Text(values) if is_valid_key(&key) => {
                    map.insert(&key, values.iter().cloned());
                }
                _ => map.add_unsupported_data(item.key.clone()),
            }
        }
        map
    }

    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        // Text items the new map does not mention are dropped
        let stale: Vec<String> = self
            .items
            .iter()
            .filter(|item| matches!(item.value, ApeValue::Text(_)))
            .filter(|item| !properties.contains_key(&to_property_key(&item.key)))
            .map(|item| item.key.clone())
            .collect();
        for key in stale {
            self.remove(&key);
        }

        let mut rejected = PropertyMap::new();
        for (key, values) in properties {
            let ape_key = to_ape_key(key);
            if values.is_empty() {
                self.remove(&ape_key);
            } else if !self.set_item(ApeItem::text(&ape_key, values.clone())) {
                rejected.insert(key, values.iter().cloned());
            }
        }
        rejected
    }

    fn remove_unsupported_properties(&mut self, ids: &[String]) {
        for id in ids {
            self.remove(id);
        }
    }

    fn complex_property_keys(&self) -> Vec<String> {
        if self.items.iter().any(|item| Self::is_cover(&item.key)) {
            vec![PICTURE_KEY.to_string()]
        } else {
            Vec::new()
        }
    }

    fn complex_properties(&self, key: &str) -> Vec<VariantMap> {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return Vec::new();
        }
        let mut pictures = Vec::new();
        for (cover_key, picture_type) in [
            (COVER_FRONT, PictureType::FrontCover),
            (COVER_BACK, PictureType::BackCover),
        ] {
            if let Some(ApeValue::Binary(raw)) = self.get(cover_key).map(|item| &item.value) {
                let (description, data) = match raw.iter().position(|&b| b == 0) {
                    Some(nul) => (
                        String::from_utf8_lossy(&raw[..nul]).to_string(),
                        raw[nul + 1..].to_vec(),
                    ),
                    None => (String::new(), raw.clone()),
                };
                let mime_type = mime_from_data(&data).unwrap_or_default().to_string();
                let picture = Picture {
                    data,
                    mime_type,
                    description,
                    picture_type,
                    ..Default::default()
                };
                pictures.push(picture.to_variant_map());
            }
        }
        pictures
    }

    /// One front and one back cover fit; further pictures of the same slot
    /// are dropped and make the call return `false`
    fn set_complex_properties(&mut self, key: &str, values: &[VariantMap]) -> bool {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return false;
        }
        self.remove(COVER_FRONT);
        self.remove(COVER_BACK);
        let mut all_stored = true;
        for record in values {
            let Some(picture) = Picture::from_variant_map(record) else {
                all_stored = false;
                continue;
            };
            let cover_key = if picture.picture_type == PictureType::BackCover {
                COVER_BACK
            } else {
                COVER_FRONT
            };
            if self.get(cover_key).is_some() {
                log::debug!("APE holds a single {}, dropping extra picture", cover_key);
                all_stored = false;
                continue;
            }
            let mut raw = picture.description.into_bytes();
            raw.push(0);
            raw.extend_from_slice(&picture.data);
            self.set_item(ApeItem::binary(cover_key, raw));
        }
        all_stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::Variant;

    #[test]
    fn test_render_parse() {
        let mut tag = ApeTag::new();
        tag.set_title("Song");
        tag.set_year(2004);
        tag.set_item(ApeItem::text("Artist", vec!["A".into(), "B".into()]));
        tag.set_item(ApeItem::binary("Blob", vec![0, 1, 2]));

        let bytes = tag.render();
        assert_eq!(&bytes[0..8], APE_PREAMBLE);
        let footer = ApeFooter::parse(&bytes[bytes.len() - 32..]).unwrap();
        assert!(footer.has_header());
        assert_eq!(footer.total_size(), bytes.len() as u64);
        assert_eq!(footer.item_count, 4);

        let parsed = ApeTag::parse(&bytes).unwrap();
        assert_eq!(parsed, tag);
        assert_eq!(parsed.year(), 2004);
    }

    #[test]
    fn test_empty_renders_nothing() {
        assert!(ApeTag::new().render().is_empty());
    }

    #[test]
    fn test_footer_only_tag() {
        let mut tag = ApeTag::new();
        tag.set_title("v1");
        let bytes = tag.render();
        // Drop the header and mark the footer as APEv1
        let mut footer_only = bytes[32..].to_vec();
        let footer_start = footer_only.len() - 32;
        footer_only[footer_start + 8..footer_start + 12].copy_from_slice(&1000u32.to_le_bytes());
        let footer = ApeFooter::parse(&footer_only[footer_start..]).unwrap();
        assert!(!footer.has_header());
        assert_eq!(footer.total_size(), footer_only.len() as u64);
        assert_eq!(ApeTag::parse(&footer_only).unwrap().title(), "v1");
    }

    #[test]
    fn test_truncated_items_are_tolerated() {
        let mut bytes = ApeTag::new().render();
        assert!(ApeTag::parse(&bytes).is_err());

        let mut tag = ApeTag::new();
        tag.set_title("x");
        bytes = tag.render();
        // Claim more items than present
        let footer_start = bytes.len() - 32;
        bytes[footer_start + 16..footer_start + 20].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(ApeTag::parse(&bytes).unwrap().title(), "x");
    }

    #[test]
    fn test_key_rules() {
        assert!(is_valid_ape_key("Title"));
        assert!(!is_valid_ape_key("T"));
        assert!(!is_valid_ape_key("tag"));
        assert!(!is_valid_ape_key("OggS"));
        assert!(!ApeTag::new().set_item(ApeItem::text("ID3", vec!["x".into()])));
    }

    #[test]
    fn test_properties_translate_keys() {
        let mut tag = ApeTag::new();
        tag.set_item(ApeItem::text("Year", vec!["1987".into()]));
        tag.set_item(ApeItem::text("Album Artist", vec!["Various".into()]));
        tag.set_item(ApeItem::binary("Blob", vec![1]));

        let props = tag.properties();
        assert_eq!(props.first("DATE"), "1987");
        assert_eq!(props.first("ALBUMARTIST"), "Various");
        assert_eq!(props.unsupported_data(), ["Blob"]);

        let mut other = ApeTag::new();
        let rejected = other.set_properties(&props);
        assert!(rejected.is_empty());
        assert_eq!(other.text("YEAR"), "1987");
        assert_eq!(other.text("ALBUM ARTIST"), "Various");
    }

    #[test]
    fn test_set_properties_replaces_text_only() {
        let mut tag = ApeTag::new();
        tag.set_title("old");
        tag.set_item(ApeItem::binary("Blob", vec![1]));

        let mut props = PropertyMap::new();
        props.insert("ARTIST", ["new"]);
        props.insert("X", ["short key"]);
        let rejected = tag.set_properties(&props);

        assert_eq!(tag.title(), "");
        assert_eq!(tag.artist(), "new");
        assert!(tag.get("Blob").is_some());
        assert_eq!(rejected.first("X"), "short key");

        tag.remove_unsupported_properties(&["Blob".to_string()]);
        assert!(tag.get("BLOB").is_none());
    }

    #[test]
    fn test_cover_art() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 9, 9];
        let mut front = Picture::front_cover(jpeg.clone());
        front.description = "front".into();
        let mut back = Picture::front_cover(jpeg.clone());
        back.picture_type = PictureType::BackCover;

        let mut tag = ApeTag::new();
        assert!(tag.set_complex_properties(
            "PICTURE",
            &[front.to_variant_map(), back.to_variant_map()]
        ));
        assert_eq!(tag.complex_property_keys(), ["PICTURE"]);
        assert!(tag.properties().unsupported_data().is_empty());

        let parsed = ApeTag::parse(&tag.render()).unwrap();
        let pictures = parsed.complex_properties("PICTURE");
        assert_eq!(pictures.len(), 2);
        assert_eq!(pictures[0].get("description"), Some(&Variant::from("front")));
        assert_eq!(pictures[0].get("data"), Some(&Variant::ByteVector(jpeg)));
        assert_eq!(pictures[1].get("pictureType"), Some(&Variant::from("Back Cover")));

        assert!(tag.set_complex_properties("PICTURE", &[]));
        assert!(tag.complex_property_keys().is_empty());
        assert!(!tag.set_complex_properties("LYRICS", &[]));
    }

    #[test]
    fn test_extra_covers_reported() {
        let first = Picture::front_cover(vec![0xFF, 0xD8, 0xFF, 0xE0, 1]);
        let second = Picture::front_cover(vec![0xFF, 0xD8, 0xFF, 0xE0, 2]);

        let mut tag = ApeTag::new();
        assert!(!tag.set_complex_properties(
            "PICTURE",
            &[first.to_variant_map(), second.to_variant_map()]
        ));
        let stored = tag.complex_properties("PICTURE");
        assert_eq!(stored.len(), 1);
        assert_eq!(Picture::from_variant_map(&stored[0]), Some(first));

        assert!(!tag.set_complex_properties("PICTURE", &[VariantMap::new()]));
        assert!(tag.complex_property_keys().is_empty());
    }
}
