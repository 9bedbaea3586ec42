//! Xiph (Vorbis) comments
//!
//! The body of a FLAC `VORBIS_COMMENT` block: a vendor string followed by
//! `KEY=value` fields, all lengths little-endian. Pictures may arrive as
//! base64 `METADATA_BLOCK_PICTURE` fields; they are held alongside the
//! fields and written back wherever the owning file keeps pictures.

use crate::picture::{pictures_from_records, Picture, PICTURE_KEY};
use crate::property_map::{is_valid_key, PropertyMap};
use crate::tag::{parse_leading_number, Tag};
use crate::variant::VariantMap;
use anyhow::{bail, Result};
use base64::{engine::general_purpose, Engine as _};
use std::collections::BTreeMap;

/// Field holding a base64 encoded FLAC picture block
pub const PICTURE_FIELD: &str = "METADATA_BLOCK_PICTURE";

const DEFAULT_VENDOR: &str = concat!("tagsplice ", env!("CARGO_PKG_VERSION"));

/// Bounds checked little-endian reader
struct LeReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> LeReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        match self.pos.checked_add(len) {
            Some(end) if end <= self.data.len() => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            _ => bail!("Xiph comment truncated at byte {}", self.pos),
        }
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).to_string())
    }
}

/// A Xiph comment
#[derive(Debug, Clone, PartialEq)]
pub struct XiphComment {
    vendor: String,
    fields: BTreeMap<String, Vec<String>>,
    pictures: Vec<Picture>,
}

impl Default for XiphComment {
    fn default() -> Self {
        Self {
            vendor: DEFAULT_VENDOR.to_string(),
            fields: BTreeMap::new(),
            pictures: Vec::new(),
        }
    }
}

impl XiphComment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comment body. Malformed fields are skipped; a body cut short
    /// keeps the fields read so far.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = LeReader { data, pos: 0 };
        let vendor = reader.string()?;
        let count = reader.u32()?;

        let mut comment = Self {
            vendor,
            ..Default::default()
        };

        for _ in 0..count {
            let field = match reader.string() {
                Ok(field) => field,
                Err(e) => {
                    log::warn!("{}", e);
                    break;
                }
            };
            let Some((key, value)) = field.split_once('=') else {
                log::debug!("skipping Xiph field without '='");
                continue;
            };

            if key.eq_ignore_ascii_case(PICTURE_FIELD) {
                match general_purpose::STANDARD
                    .decode(value.trim())
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| Picture::from_flac_bytes(&bytes))
                {
                    Ok(picture) => comment.pictures.push(picture),
                    Err(e) => log::warn!("skipping bad {}: {}", PICTURE_FIELD, e),
                }
                continue;
            }

            if !is_valid_key(key) {
                log::debug!("skipping Xiph field with invalid key {:?}", key);
                continue;
            }
            comment
                .fields
                .entry(key.to_uppercase())
                .or_default()
                .push(value.to_string());
        }

        Ok(comment)
    }

    /// Render the comment body. With `embed_pictures` the pictures are
    /// written as `METADATA_BLOCK_PICTURE` fields.
    pub fn render(&self, embed_pictures: bool) -> Vec<u8> {
        let mut fields: Vec<String> = self
            .fields
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |v| format!("{}={}", key, v)))
            .collect();
        if embed_pictures {
            for picture in &self.pictures {
                let encoded = general_purpose::STANDARD.encode(picture.to_flac_bytes());
                fields.push(format!("{}={}", PICTURE_FIELD, encoded));
            }
        }

        let mut out = Vec::new();
        out.extend_from_slice(&(self.vendor.len() as u32).to_le_bytes());
        out.extend_from_slice(self.vendor.as_bytes());
        out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        for field in fields {
            out.extend_from_slice(&(field.len() as u32).to_le_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Every field, keys upper-cased
    pub fn fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> String {
        self.fields
            .get(&key.to_uppercase())
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_default()
    }

    /// Append a value, or replace all values of `key` when `replace` is set.
    /// Returns `false` for an invalid key.
    pub fn add_field(&mut self, key: &str, value: &str, replace: bool) -> bool {
        if !is_valid_key(key) {
            return false;
        }
        let values = self.fields.entry(key.to_uppercase()).or_default();
        if replace {
            values.clear();
        }
        values.push(value.to_string());
        true
    }

    pub fn remove_field(&mut self, key: &str) {
        self.fields.remove(&key.to_uppercase());
    }

    fn set_field(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.remove_field(key);
        } else {
            self.add_field(key, value, true);
        }
    }

    pub fn pictures(&self) -> &[Picture] {
        &self.pictures
    }

    pub fn add_picture(&mut self, picture: Picture) {
        self.pictures.push(picture);
    }

    pub fn remove_pictures(&mut self) {
        self.pictures.clear();
    }
}

impl Tag for XiphComment {
    fn title(&self) -> String {
        self.field("TITLE")
    }

    fn artist(&self) -> String {
        self.field("ARTIST")
    }

    fn album(&self) -> String {
        self.field("ALBUM")
    }

    fn comment(&self) -> String {
        let comment = self.field("COMMENT");
        if comment.is_empty() {
            self.field("DESCRIPTION")
        } else {
            comment
        }
    }

    fn genre(&self) -> String {
        self.field("GENRE")
    }

    fn year(&self) -> u32 {
        parse_leading_number(&self.field("DATE"))
    }

    fn track(&self) -> u32 {
        parse_leading_number(&self.field("TRACKNUMBER"))
    }

    fn set_title(&mut self, value: &str) {
        self.set_field("TITLE", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_field("ARTIST", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_field("ALBUM", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.remove_field("DESCRIPTION");
        self.set_field("COMMENT", value);
    }

    fn set_genre(&mut self, value: &str) {
        self.set_field("GENRE", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_field("DATE", &text);
    }

    fn set_track(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_field("TRACKNUMBER", &text);
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.pictures.is_empty()
    }

    fn properties(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        for (key, values) in &self.fields {
            map.insert(key, values.iter().cloned());
        }
        map
    }

    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        self.fields.clear();
        let mut rejected = PropertyMap::new();
        for (key, values) in properties {
            if !is_valid_key(key) {
                rejected.insert(key, values.iter().cloned());
                continue;
            }
            if !values.is_empty() {
                self.fields.insert(key.to_uppercase(), values.clone());
            }
        }
        rejected
    }

    fn complex_property_keys(&self) -> Vec<String> {
        if self.pictures.is_empty() {
            Vec::new()
        } else {
            vec![PICTURE_KEY.to_string()]
        }
    }

    fn complex_properties(&self, key: &str) -> Vec<VariantMap> {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return Vec::new();
        }
        self.pictures.iter().map(Picture::to_variant_map).collect()
    }

    fn set_complex_properties(&mut self, key: &str, values: &[VariantMap]) -> bool {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return false;
        }
        self.pictures = pictures_from_records(values);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::PictureType;

    fn field_block(vendor: &str, fields: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        out.extend_from_slice(vendor.as_bytes());
        out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        for field in fields {
            out.extend_from_slice(&(field.len() as u32).to_le_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out
    }

    #[test]
    fn test_parse_fields() {
        let data = field_block(
            "reference libFLAC 1.4.2",
            &["title=Song", "ARTIST=One", "Artist=Two", "broken", "DATE=2020-01-01"],
        );
        let comment = XiphComment::parse(&data).unwrap();
        assert_eq!(comment.vendor(), "reference libFLAC 1.4.2");
        assert_eq!(comment.title(), "Song");
        assert_eq!(comment.fields()["ARTIST"], ["One", "Two"]);
        assert_eq!(comment.year(), 2020);
        assert_eq!(comment.fields().len(), 3);
    }

    #[test]
    fn test_render_parse() {
        let mut comment = XiphComment::new();
        comment.set_title("T");
        comment.add_field("ARTIST", "a", false);
        comment.add_field("ARTIST", "b", false);
        comment.set_track(4);
        let parsed = XiphComment::parse(&comment.render(false)).unwrap();
        assert_eq!(parsed, comment);
        assert!(!comment.add_field("BAD=KEY", "x", false));
    }

    #[test]
    fn test_truncated_body() {
        let data = field_block("v", &["TITLE=a", "ALBUM=b"]);
        let comment = XiphComment::parse(&data[..data.len() - 3]).unwrap();
        assert_eq!(comment.title(), "a");
        assert_eq!(comment.album(), "");
        assert!(XiphComment::parse(&[1, 0]).is_err());
    }

    #[test]
    fn test_embedded_pictures() {
        let picture = Picture {
            data: vec![0xFF, 0xD8, 0xFF, 1],
            mime_type: "image/jpeg".into(),
            picture_type: PictureType::BackCover,
            width: 3,
            ..Default::default()
        };
        let mut comment = XiphComment::new();
        comment.add_picture(picture.clone());

        let without = XiphComment::parse(&comment.render(false)).unwrap();
        assert!(without.pictures().is_empty());

        let with = XiphComment::parse(&comment.render(true)).unwrap();
        assert_eq!(with.pictures(), [picture]);
        assert!(with.properties().is_empty());
        assert_eq!(with.complex_property_keys(), ["PICTURE"]);
    }

    #[test]
    fn test_properties() {
        let mut props = PropertyMap::new();
        props.insert("TITLE", ["x"]);
        props.insert("PERFORMER", ["p1", "p2"]);
        let mut comment = XiphComment::new();
        comment.set_comment("old");
        assert!(comment.set_properties(&props).is_empty());
        assert_eq!(comment.properties(), props);
        assert_eq!(comment.comment(), "");
    }
}
