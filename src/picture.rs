//! Embedded pictures
//!
//! A [`Picture`] is the typed form of a `PICTURE` complex property record.
//! It converts to and from a [`VariantMap`] with the keys `data`,
//! `mimeType`, `description`, `pictureType`, `width`, `height`,
//! `colorDepth` and `numColors`, and to and from the FLAC
//! `METADATA_BLOCK_PICTURE` layout shared by FLAC and Xiph comments.

use crate::variant::{Variant, VariantMap};
use anyhow::{bail, Result};

/// Complex property key for embedded pictures
pub const PICTURE_KEY: &str = "PICTURE";

/// Picture type codes shared by ID3v2 `APIC` and FLAC `PICTURE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureType {
    #[default]
    Other,
    FileIcon,
    OtherFileIcon,
    FrontCover,
    BackCover,
    LeafletPage,
    Media,
    LeadArtist,
    Artist,
    Conductor,
    Band,
    Composer,
    Lyricist,
    RecordingLocation,
    DuringRecording,
    DuringPerformance,
    MovieScreenCapture,
    ColoredFish,
    Illustration,
    BandLogo,
    PublisherLogo,
}

const PICTURE_TYPES: [(PictureType, &str); 21] = [
    (PictureType::Other, "Other"),
    (PictureType::FileIcon, "File Icon"),
    (PictureType::OtherFileIcon, "Other File Icon"),
    (PictureType::FrontCover, "Front Cover"),
    (PictureType::BackCover, "Back Cover"),
    (PictureType::LeafletPage, "Leaflet Page"),
    (PictureType::Media, "Media"),
    (PictureType::LeadArtist, "Lead Artist"),
    (PictureType::Artist, "Artist"),
    (PictureType::Conductor, "Conductor"),
    (PictureType::Band, "Band"),
    (PictureType::Composer, "Composer"),
    (PictureType::Lyricist, "Lyricist"),
    (PictureType::RecordingLocation, "Recording Location"),
    (PictureType::DuringRecording, "During Recording"),
    (PictureType::DuringPerformance, "During Performance"),
    (PictureType::MovieScreenCapture, "Movie Screen Capture"),
    (PictureType::ColoredFish, "Colored Fish"),
    (PictureType::Illustration, "Illustration"),
    (PictureType::BandLogo, "Band Logo"),
    (PictureType::PublisherLogo, "Publisher Logo"),
];

impl PictureType {
    pub fn from_u8(code: u8) -> Self {
        PICTURE_TYPES
            .get(code as usize)
            .map_or(PictureType::Other, |(ty, _)| *ty)
    }

    pub fn as_u8(self) -> u8 {
        PICTURE_TYPES
            .iter()
            .position(|(ty, _)| *ty == self)
            .unwrap_or(0) as u8
    }

    pub fn name(self) -> &'static str {
        PICTURE_TYPES[self.as_u8() as usize].1
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PICTURE_TYPES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(ty, _)| *ty)
    }
}

/// An embedded picture
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Picture {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub description: String,
    pub picture_type: PictureType,
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub num_colors: u32,
}

impl Picture {
    /// A front cover with the MIME type guessed from `data`
    pub fn front_cover(data: Vec<u8>) -> Self {
        let mime_type = mime_from_data(&data).unwrap_or("image/jpeg").to_string();
        Self {
            data,
            mime_type,
            picture_type: PictureType::FrontCover,
            ..Default::default()
        }
    }

    /// Complex property form. Fields at their default value are left out so
    /// a record holding only `data` and `mimeType` reads back unchanged.
    pub fn to_variant_map(&self) -> VariantMap {
        let mut map = VariantMap::new();
        map.insert("data".into(), Variant::ByteVector(self.data.clone()));
        map.insert("mimeType".into(), Variant::String(self.mime_type.clone()));
        if !self.description.is_empty() {
            map.insert(
                "description".into(),
                Variant::String(self.description.clone()),
            );
        }
        if self.picture_type != PictureType::Other {
            map.insert(
                "pictureType".into(),
                Variant::String(self.picture_type.name().to_string()),
            );
        }
        let dimensions = [
            ("width", self.width),
            ("height", self.height),
            ("colorDepth", self.color_depth),
            ("numColors", self.num_colors),
        ];
        for (key, value) in dimensions {
            if value != 0 {
                map.insert(key.into(), Variant::Int(value as i32));
            }
        }
        map
    }

    /// Build a picture from a complex property record; `None` without
    /// `data`
    pub fn from_variant_map(map: &VariantMap) -> Option<Self> {
        let data = map.get("data")?.value::<Vec<u8>>()?;

        let text = |key: &str| {
            map.get(key)
                .map(Variant::to_string_value)
                .unwrap_or_default()
        };
        let number = |key: &str| match map.get(key) {
            Some(Variant::Int(v)) => (*v).max(0) as u32,
            Some(Variant::UInt(v)) => *v,
            Some(Variant::LongLong(v)) => (*v).clamp(0, u32::MAX as i64) as u32,
            Some(Variant::ULongLong(v)) => (*v).min(u32::MAX as u64) as u32,
            _ => 0,
        };

        let picture_type = match map.get("pictureType") {
            Some(Variant::String(name)) => PictureType::from_name(name).unwrap_or_default(),
            Some(Variant::Int(code)) => PictureType::from_u8(*code as u8),
            Some(Variant::UInt(code)) => PictureType::from_u8(*code as u8),
            _ => PictureType::Other,
        };

        let mut mime_type = text("mimeType");
        if mime_type.is_empty() {
            mime_type = mime_from_data(&data).unwrap_or_default().to_string();
        }

        Some(Self {
            data,
            mime_type,
            description: text("description"),
            picture_type,
            width: number("width"),
            height: number("height"),
            color_depth: number("colorDepth"),
            num_colors: number("numColors"),
        })
    }

    /// Encode as a FLAC `METADATA_BLOCK_PICTURE` body
    pub fn to_flac_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.mime_type.len() + self.data.len());
        out.extend_from_slice(&(self.picture_type.as_u8() as u32).to_be_bytes());
        out.extend_from_slice(&(self.mime_type.len() as u32).to_be_bytes());
        out.extend_from_slice(self.mime_type.as_bytes());
        out.extend_from_slice(&(self.description.len() as u32).to_be_bytes());
        out.extend_from_slice(self.description.as_bytes());
        out.extend_from_slice(&self.width.to_be_bytes());
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(&self.color_depth.to_be_bytes());
        out.extend_from_slice(&self.num_colors.to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode a FLAC `METADATA_BLOCK_PICTURE` body
    pub fn from_flac_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = BlockReader::new(bytes);

        let picture_type = PictureType::from_u8(reader.u32()?.min(255) as u8);
        let mime_len = reader.u32()? as usize;
        let mime_type = String::from_utf8_lossy(reader.take(mime_len)?).to_string();
        let desc_len = reader.u32()? as usize;
        let description = String::from_utf8_lossy(reader.take(desc_len)?).to_string();
        let width = reader.u32()?;
        let height = reader.u32()?;
        let color_depth = reader.u32()?;
        let num_colors = reader.u32()?;
        let data_len = reader.u32()? as usize;
        let data = reader.take(data_len)?.to_vec();

        Ok(Self {
            data,
            mime_type,
            description,
            picture_type,
            width,
            height,
            color_depth,
            num_colors,
        })
    }
}

/// Bounds checked big-endian reader over a picture block
struct BlockReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlockReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = match self.pos.checked_add(len) {
            Some(end) if end <= self.data.len() => end,
            _ => bail!("picture block truncated at byte {}", self.pos),
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Guess an image MIME type from its magic bytes
pub fn mime_from_data(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if data.starts_with(b"GIF8") {
        Some("image/gif")
    } else if data.starts_with(b"BM") {
        Some("image/bmp")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Decode every `PICTURE` record in `records`, skipping ones without data
pub fn pictures_from_records(records: &[VariantMap]) -> Vec<Picture> {
    records.iter().filter_map(Picture::from_variant_map).collect()
}
