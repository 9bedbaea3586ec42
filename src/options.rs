//! Tag reading and writing options
//!
//! [`TagOptions`] is passed explicitly to every file and codec that needs
//! it; there is no process-wide default to mutate.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Character set used for ID3v1 text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Id3v1Encoding {
    /// ISO-8859-1, characters outside it written as `?`
    #[default]
    Latin1,
    /// UTF-8 bytes, invalid sequences replaced on read
    Utf8Lossy,
}

/// ID3v2 text frame encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Latin1,
    Utf16,
    Utf16Be,
    #[default]
    Utf8,
}

impl TextEncoding {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TextEncoding::Latin1),
            1 => Some(TextEncoding::Utf16),
            2 => Some(TextEncoding::Utf16Be),
            3 => Some(TextEncoding::Utf8),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            TextEncoding::Latin1 => 0,
            TextEncoding::Utf16 => 1,
            TextEncoding::Utf16Be => 2,
            TextEncoding::Utf8 => 3,
        }
    }
}

/// How much work a scan does beyond locating tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStyle {
    /// Check only the first audio frame header
    Fast,
    /// Confirm the first frame by finding the one after it
    #[default]
    Average,
}

/// Options threaded through file scans and tag rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagOptions {
    pub id3v1_encoding: Id3v1Encoding,
    /// ID3v2 major version written on save, 3 or 4
    pub id3v2_version: u8,
    pub id3v2_text_encoding: TextEncoding,
    /// Padding added when an ID3v2 tag outgrows its old size
    pub id3v2_padding: u32,
    /// Size of the padding block added to FLAC files that have none
    pub flac_padding: u32,
    pub read_style: ReadStyle,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            id3v1_encoding: Id3v1Encoding::Latin1,
            id3v2_version: 4,
            id3v2_text_encoding: TextEncoding::Utf8,
            id3v2_padding: 1024,
            flac_padding: 1024,
            read_style: ReadStyle::Average,
        }
    }
}

impl TagOptions {
    /// Load options from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read: {}", path.display()))?;
        let mut options: TagOptions = serde_json::from_str(&text)
            .with_context(|| format!("Invalid options file: {}", path.display()))?;
        options.normalize();
        Ok(options)
    }

    /// Clamp values to what the writers support
    pub fn normalize(&mut self) {
        if self.id3v2_version != 3 {
            self.id3v2_version = 4;
        }
    }

    /// Text encoding actually usable for the configured ID3v2 version;
    /// v2.3 has no UTF-8 or UTF-16BE
    pub fn effective_id3v2_encoding(&self) -> TextEncoding {
        match (self.id3v2_version, self.id3v2_text_encoding) {
            (3, TextEncoding::Utf8 | TextEncoding::Utf16Be) => TextEncoding::Utf16,
            (_, encoding) => encoding,
        }
    }
}
