//! ID3v2 tags
//!
//! Versions 2.3 and 2.4 are read; either is written, as configured in
//! [`TagOptions`]. Frames the tag understands are decoded into [`Frame`]
//! variants. Everything else is carried through untouched as
//! [`Frame::Raw`] and reported as unsupported property data.
//!
//! Frames are kept in v2.4 form in memory; v2.3 specific ids are upgraded
//! on read and downgraded again when a v2.3 tag is rendered.

use crate::id3v1::GENRES;
use crate::options::{TagOptions, TextEncoding};
use crate::picture::{Picture, PictureType, PICTURE_KEY};
use crate::property_map::{is_valid_key, PropertyMap};
use crate::tag::{parse_leading_number, Tag};
use crate::variant::VariantMap;
use anyhow::{bail, Result};

/// ID3v2 header (and footer) size
pub const ID3V2_HEADER_SIZE: u64 = 10;

/// ID3v2 identifier
pub const ID3V2_ID: &[u8; 3] = b"ID3";

const FRAME_HEADER_SIZE: usize = 10;

// Header flags
const FLAG_UNSYNCHRONISATION: u8 = 0x80;
const FLAG_EXTENDED_HEADER: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;

// v2.4 frame format flags
const V4_GROUPING: u16 = 0x0040;
const V4_COMPRESSION: u16 = 0x0008;
const V4_ENCRYPTION: u16 = 0x0004;
const V4_UNSYNCHRONISATION: u16 = 0x0002;
const V4_DATA_LENGTH: u16 = 0x0001;

// v2.3 frame format flags
const V3_COMPRESSION: u16 = 0x0080;
const V3_ENCRYPTION: u16 = 0x0040;
const V3_GROUPING: u16 = 0x0020;

/// Text frame id to property key
const FRAME_KEYS: [(&str, &str); 34] = [
    ("TALB", "ALBUM"),
    ("TBPM", "BPM"),
    ("TCOM", "COMPOSER"),
    ("TCON", "GENRE"),
    ("TCOP", "COPYRIGHT"),
    ("TDOR", "ORIGINALDATE"),
    ("TDRC", "DATE"),
    ("TDRL", "RELEASEDATE"),
    ("TENC", "ENCODEDBY"),
    ("TEXT", "LYRICIST"),
    ("TIT1", "WORK"),
    ("TIT2", "TITLE"),
    ("TIT3", "SUBTITLE"),
    ("TKEY", "INITIALKEY"),
    ("TLAN", "LANGUAGE"),
    ("TMED", "MEDIA"),
    ("TMOO", "MOOD"),
    ("TOAL", "ORIGINALALBUM"),
    ("TOPE", "ORIGINALARTIST"),
    ("TPE1", "ARTIST"),
    ("TPE2", "ALBUMARTIST"),
    ("TPE3", "CONDUCTOR"),
    ("TPE4", "REMIXER"),
    ("TPOS", "DISCNUMBER"),
    ("TPUB", "LABEL"),
    ("TRCK", "TRACKNUMBER"),
    ("TSO2", "ALBUMARTISTSORT"),
    ("TSOA", "ALBUMSORT"),
    ("TSOC", "COMPOSERSORT"),
    ("TSOP", "ARTISTSORT"),
    ("TSOT", "TITLESORT"),
    ("TSRC", "ISRC"),
    ("TSSE", "ENCODING"),
    ("TSST", "DISCSUBTITLE"),
];

/// v2.3 ids and their v2.4 replacement
const V3_UPGRADES: [(&str, &str); 2] = [("TYER", "TDRC"), ("TORY", "TDOR")];

fn key_for_frame(id: &str) -> Option<&'static str> {
    FRAME_KEYS.iter().find(|(f, _)| *f == id).map(|(_, k)| *k)
}

fn frame_for_key(key: &str) -> Option<&'static str> {
    FRAME_KEYS.iter().find(|(_, k)| *k == key).map(|(f, _)| *f)
}

/// Decode a 28 bit synchsafe integer
pub fn synchsafe_decode(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, b| (acc << 7) | (*b & 0x7F) as u32)
}

/// Encode a synchsafe integer; values are limited to 28 bits
pub fn synchsafe_encode(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

/// Undo unsynchronisation: every `FF 00` becomes `FF`
pub fn remove_unsynchronisation(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut prev = 0u8;
    for &b in data {
        if !(prev == 0xFF && b == 0x00) {
            out.push(b);
        }
        prev = b;
    }
    out
}

/// The 10 byte tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Id3v2Header {
    pub major: u8,
    pub revision: u8,
    pub flags: u8,
    /// Tag size excluding header and footer
    pub size: u32,
}

impl Id3v2Header {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < ID3V2_HEADER_SIZE as usize || &data[0..3] != ID3V2_ID {
            return None;
        }
        if data[3] == 0xFF || data[4] == 0xFF || data[6..10].iter().any(|b| b & 0x80 != 0) {
            return None;
        }
        Some(Self {
            major: data[3],
            revision: data[4],
            flags: data[5],
            size: synchsafe_decode(&data[6..10]),
        })
    }

    pub fn unsynchronisation(&self) -> bool {
        self.flags & FLAG_UNSYNCHRONISATION != 0
    }

    pub fn extended_header(&self) -> bool {
        self.major >= 3 && self.flags & FLAG_EXTENDED_HEADER != 0
    }

    pub fn has_footer(&self) -> bool {
        self.major >= 4 && self.flags & FLAG_FOOTER != 0
    }

    /// Size of the whole tag on disk
    pub fn total_size(&self) -> u64 {
        ID3V2_HEADER_SIZE
            + self.size as u64
            + if self.has_footer() { ID3V2_HEADER_SIZE } else { 0 }
    }
}

/// Text with a language code and a content description (`COMM`, `USLT`)
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageText {
    pub language: String,
    pub description: String,
    pub text: String,
}

impl LanguageText {
    pub fn new(description: &str, text: &str) -> Self {
        Self {
            language: "eng".into(),
            description: description.to_string(),
            text: text.to_string(),
        }
    }
}

/// A decoded ID3v2 frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `T***` text frames other than `TXXX`
    Text { id: String, values: Vec<String> },
    /// `TXXX`
    UserText {
        description: String,
        values: Vec<String>,
    },
    /// `COMM`
    Comment(LanguageText),
    /// `USLT`
    Lyrics(LanguageText),
    /// `APIC`
    Picture(Picture),
    /// Any other frame, kept as read
    Raw {
        id: String,
        /// Version of the tag the frame was read from
        version: u8,
        flags: u16,
        data: Vec<u8>,
    },
}

impl Frame {
    pub fn id(&self) -> &str {
        match self {
            Frame::Text { id, .. } | Frame::Raw { id, .. } => id.as_str(),
            Frame::UserText { .. } => "TXXX",
            Frame::Comment(_) => "COMM",
            Frame::Lyrics(_) => "USLT",
            Frame::Picture(_) => "APIC",
        }
    }

    /// Frames whose content is expressed through the property map
    fn is_property_frame(&self) -> bool {
        match self {
            Frame::Text { id, .. } => key_for_frame(id).is_some(),
            Frame::UserText { .. } | Frame::Comment(_) | Frame::Lyrics(_) => true,
            Frame::Picture(_) | Frame::Raw { .. } => false,
        }
    }
}

// =============================================================================
// Text encoding
// =============================================================================

fn terminator_len(encoding: TextEncoding) -> usize {
    match encoding {
        TextEncoding::Latin1 | TextEncoding::Utf8 => 1,
        TextEncoding::Utf16 | TextEncoding::Utf16Be => 2,
    }
}

/// Position of the first terminator, aligned for UTF-16
fn find_terminator(data: &[u8], encoding: TextEncoding) -> Option<usize> {
    match terminator_len(encoding) {
        1 => data.iter().position(|&b| b == 0),
        _ => data
            .chunks_exact(2)
            .position(|c| c == [0, 0])
            .map(|i| i * 2),
    }
}

fn decode_string(data: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Latin1 => data.iter().map(|&b| b as char).collect(),
        TextEncoding::Utf8 => String::from_utf8_lossy(data).to_string(),
        TextEncoding::Utf16 => match data {
            [0xFF, 0xFE, rest @ ..] => utf16_decode(rest, u16::from_le_bytes),
            [0xFE, 0xFF, rest @ ..] => utf16_decode(rest, u16::from_be_bytes),
            _ => utf16_decode(data, u16::from_be_bytes),
        },
        TextEncoding::Utf16Be => utf16_decode(data, u16::from_be_bytes),
    }
}

fn utf16_decode(data: &[u8], endianness: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| endianness([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Split off one terminated string; without a terminator the rest is taken
fn take_string(data: &[u8], encoding: TextEncoding) -> (String, &[u8]) {
    match find_terminator(data, encoding) {
        Some(end) => (
            decode_string(&data[..end], encoding),
            &data[end + terminator_len(encoding)..],
        ),
        None => (decode_string(data, encoding), &[]),
    }
}

/// All terminator separated strings; a trailing terminator adds no value
fn decode_strings(mut data: &[u8], encoding: TextEncoding) -> Vec<String> {
    let mut values = Vec::new();
    while !data.is_empty() {
        let (value, rest) = take_string(data, encoding);
        values.push(value);
        data = rest;
    }
    values
}

fn encode_string(text: &str, encoding: TextEncoding, terminated: bool) -> Vec<u8> {
    let mut out = match encoding {
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
            .collect::<Vec<u8>>(),
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Utf16 => {
            let mut encoded = vec![0xFF, 0xFE];
            for unit in text.encode_utf16() {
                encoded.extend_from_slice(&unit.to_le_bytes());
            }
            encoded
        }
        TextEncoding::Utf16Be => text
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect::<Vec<u8>>(),
    };
    if terminated {
        out.extend(std::iter::repeat(0).take(terminator_len(encoding)));
    }
    out
}

/// The configured encoding, or a Unicode one when Latin-1 cannot hold `texts`
fn pick_encoding<'a>(
    preferred: TextEncoding,
    version: u8,
    texts: impl IntoIterator<Item = &'a str>,
) -> TextEncoding {
    if preferred != TextEncoding::Latin1 {
        return preferred;
    }
    if texts.into_iter().all(|t| t.chars().all(|c| (c as u32) < 0x100)) {
        TextEncoding::Latin1
    } else if version == 3 {
        TextEncoding::Utf16
    } else {
        TextEncoding::Utf8
    }
}

/// `(17)`, `(17)Rock` and `17` style genres as a genre name
fn genre_text(value: &str) -> String {
    let lookup = |digits: &str| {
        digits
            .parse::<usize>()
            .ok()
            .and_then(|i| GENRES.get(i))
            .map(|g| g.to_string())
    };
    if let Some(rest) = value.strip_prefix('(') {
        if let Some((digits, tail)) = rest.split_once(')') {
            if !tail.is_empty() {
                return tail.to_string();
            }
            if let Some(name) = lookup(digits) {
                return name;
            }
        }
    }
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Some(name) = lookup(value) {
            return name;
        }
    }
    value.to_string()
}

// =============================================================================
// Frame parsing
// =============================================================================

fn is_valid_frame_id(id: &[u8]) -> bool {
    id.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn parse_frame(id: &str, body: &[u8]) -> Option<Frame> {
    let (&encoding_byte, rest) = body.split_first()?;

    if id == "TXXX" {
        let encoding = TextEncoding::from_byte(encoding_byte)?;
        let (description, rest) = take_string(rest, encoding);
        return Some(Frame::UserText {
            description,
            values: decode_strings(rest, encoding),
        });
    }

    if id.starts_with('T') {
        let encoding = TextEncoding::from_byte(encoding_byte)?;
        return Some(Frame::Text {
            id: id.to_string(),
            values: decode_strings(rest, encoding),
        });
    }

    match id {
        "COMM" | "USLT" => {
            let encoding = TextEncoding::from_byte(encoding_byte)?;
            if rest.len() < 3 {
                return None;
            }
            let language = String::from_utf8_lossy(&rest[..3]).to_string();
            let (description, rest) = take_string(&rest[3..], encoding);
            let (text, _) = take_string(rest, encoding);
            let content = LanguageText {
                language,
                description,
                text,
            };
            Some(if id == "COMM" {
                Frame::Comment(content)
            } else {
                Frame::Lyrics(content)
            })
        }
        "APIC" => {
            let encoding = TextEncoding::from_byte(encoding_byte)?;
            let (mime_type, rest) = take_string(rest, TextEncoding::Latin1);
            let (&type_byte, rest) = rest.split_first()?;
            let (description, data) = take_string(rest, encoding);
            Some(Frame::Picture(Picture {
                data: data.to_vec(),
                mime_type,
                description,
                picture_type: PictureType::from_u8(type_byte),
                ..Default::default()
            }))
        }
        _ => None,
    }
}

fn upgrade_v3_id(id: &str) -> String {
    V3_UPGRADES
        .iter()
        .find(|(old, _)| *old == id)
        .map_or(id.to_string(), |(_, new)| new.to_string())
}

// =============================================================================
// Tag
// =============================================================================

/// An ID3v2.3 or ID3v2.4 tag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Id3v2Tag {
    frames: Vec<Frame>,
    /// Version the tag was read as, 0 for a new tag
    version: u8,
    /// Size on disk when read, header and padding included
    disk_size: u64,
}

impl Id3v2Tag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete tag starting at its header
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = match Id3v2Header::parse(data) {
            Some(header) => header,
            None => bail!("not an ID3v2 tag"),
        };
        if header.major < 3 || header.major > 4 {
            bail!("unsupported ID3v2 version 2.{}", header.major);
        }

        let end = (ID3V2_HEADER_SIZE as usize + header.size as usize).min(data.len());
        let mut body = data[ID3V2_HEADER_SIZE as usize..end].to_vec();
        if header.major == 3 && header.unsynchronisation() {
            body = remove_unsynchronisation(&body);
        }

        let mut pos = 0usize;
        if header.extended_header() && body.len() >= 4 {
            pos = if header.major == 3 {
                4 + u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize
            } else {
                synchsafe_decode(&body[0..4]) as usize
            };
        }

        let mut frames = Vec::new();
        while pos + FRAME_HEADER_SIZE <= body.len() {
            let raw_id = &body[pos..pos + 4];
            if raw_id[0] == 0 {
                break; // padding
            }
            if !is_valid_frame_id(raw_id) {
                log::warn!("invalid ID3v2 frame id at offset {}, skipping rest of tag", pos);
                break;
            }
            let id = String::from_utf8_lossy(raw_id).to_string();
            let size_bytes = &body[pos + 4..pos + 8];
            let size = (if header.major == 4 {
                synchsafe_decode(size_bytes)
            } else {
                u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]])
            }) as usize;
            let flags = u16::from_be_bytes([body[pos + 8], body[pos + 9]]);
            pos += FRAME_HEADER_SIZE;

            if size > body.len() - pos {
                log::warn!("ID3v2 frame {} overruns the tag, skipping rest of tag", id);
                break;
            }
            let data = &body[pos..pos + size];
            pos += size;

            frames.push(Self::decode_frame(id, header.major, flags, data));
        }

        Ok(Self {
            frames,
            version: header.major,
            disk_size: header.total_size(),
        })
    }

    fn decode_frame(id: String, version: u8, flags: u16, data: &[u8]) -> Frame {
        let raw = |id: String| Frame::Raw {
            id,
            version,
            flags,
            data: data.to_vec(),
        };

        let (opaque, grouping) = if version == 4 {
            (
                flags & (V4_COMPRESSION | V4_ENCRYPTION) != 0,
                flags & V4_GROUPING != 0,
            )
        } else {
            (
                flags & (V3_COMPRESSION | V3_ENCRYPTION) != 0,
                flags & V3_GROUPING != 0,
            )
        };
        if opaque {
            return raw(id);
        }

        let mut body = data;
        if grouping {
            body = body.get(1..).unwrap_or_default();
        }
        if version == 4 && flags & V4_DATA_LENGTH != 0 {
            body = body.get(4..).unwrap_or_default();
        }
        let unsynced;
        if version == 4 && flags & V4_UNSYNCHRONISATION != 0 {
            unsynced = remove_unsynchronisation(body);
            body = &unsynced;
        }

        let canonical = if version == 3 { upgrade_v3_id(&id) } else { id.clone() };
        match parse_frame(&canonical, body) {
            Some(frame) => frame,
            None => raw(id),
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Version read from disk, 0 for a tag created in memory
    pub fn version(&self) -> u8 {
        self.version
    }

    /// On-disk size of the tag this one was read from, 0 if none
    pub fn disk_size(&self) -> u64 {
        self.disk_size
    }

    /// Record the size of the tag after it has been written
    pub fn set_disk_size(&mut self, size: u64) {
        self.disk_size = size;
    }

    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn remove_frames(&mut self, id: &str) {
        self.frames.retain(|frame| frame.id() != id);
    }

    /// Values of the text frame `id`
    pub fn text_values(&self, id: &str) -> Vec<String> {
        self.frames
            .iter()
            .find_map(|frame| match frame {
                Frame::Text { id: frame_id, values } if frame_id == id => Some(values.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn text(&self, id: &str) -> String {
        self.text_values(id).into_iter().next().unwrap_or_default()
    }

    /// Replace the text frame `id`; no values removes it
    pub fn set_text_values(&mut self, id: &str, values: Vec<String>) {
        let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
        if values.is_empty() {
            self.remove_frames(id);
            return;
        }
        let slot = self.frames.iter_mut().find_map(|frame| match frame {
            Frame::Text { id: frame_id, values } if frame_id == id => Some(values),
            _ => None,
        });
        match slot {
            Some(existing) => *existing = values,
            None => self.frames.push(Frame::Text {
                id: id.to_string(),
                values,
            }),
        }
    }

    fn set_text(&mut self, id: &str, value: &str) {
        self.set_text_values(id, vec![value.to_string()]);
    }

    fn comment_frame(&self) -> Option<&LanguageText> {
        let comments = || {
            self.frames.iter().filter_map(|frame| match frame {
                Frame::Comment(content) => Some(content),
                _ => None,
            })
        };
        comments()
            .find(|c| c.description.is_empty())
            .or_else(|| comments().next())
    }

    /// Render the tag for writing. An empty tag renders to nothing.
    ///
    /// When the result fits in the space the tag occupied on disk it is
    /// padded to exactly that size, otherwise `options.id3v2_padding` bytes
    /// of padding are added.
    pub fn render(&self, options: &TagOptions) -> Result<Vec<u8>> {
        let version = if options.id3v2_version == 3 { 3 } else { 4 };
        let preferred = options.effective_id3v2_encoding();

        let mut frames_data = Vec::new();
        for frame in &self.frames {
            if let Some((id, flags, body)) = self.render_frame(frame, version, preferred) {
                if body.len() > 0x0FFF_FFFF {
                    bail!("ID3v2 frame {} too large ({} bytes)", id, body.len());
                }
                frames_data.extend_from_slice(id.as_bytes());
                if version == 4 {
                    frames_data.extend_from_slice(&synchsafe_encode(body.len() as u32));
                } else {
                    frames_data.extend_from_slice(&(body.len() as u32).to_be_bytes());
                }
                frames_data.extend_from_slice(&flags.to_be_bytes());
                frames_data.extend_from_slice(&body);
            }
        }
        if frames_data.is_empty() {
            return Ok(Vec::new());
        }

        let needed = ID3V2_HEADER_SIZE + frames_data.len() as u64;
        let padding = if self.disk_size >= needed {
            self.disk_size - needed
        } else {
            options.id3v2_padding as u64
        };
        let size = frames_data.len() as u64 + padding;
        if size > 0x0FFF_FFFF {
            bail!("ID3v2 tag too large ({} bytes)", size);
        }

        let mut out = Vec::with_capacity((ID3V2_HEADER_SIZE + size) as usize);
        out.extend_from_slice(ID3V2_ID);
        out.push(version);
        out.push(0);
        out.push(0);
        out.extend_from_slice(&synchsafe_encode(size as u32));
        out.extend_from_slice(&frames_data);
        out.resize(out.len() + padding as usize, 0);
        Ok(out)
    }

    fn render_frame(
        &self,
        frame: &Frame,
        version: u8,
        preferred: TextEncoding,
    ) -> Option<(String, u16, Vec<u8>)> {
        let mut body = Vec::new();
        let id = match frame {
            Frame::Text { id, values } => {
                let (id, values) = match (version, id.as_str()) {
                    (3, "TDRC") => (
                        "TYER".to_string(),
                        values
                            .iter()
                            .map(|v| v.chars().take(4).collect::<String>())
                            .collect::<Vec<String>>(),
                    ),
                    (3, "TDOR") => ("TORY".to_string(), values.clone()),
                    _ => (id.clone(), values.clone()),
                };
                let encoding = pick_encoding(preferred, version, values.iter().map(String::as_str));
                body.push(encoding.as_byte());
                body.extend(encode_string(&values.join("\0"), encoding, false));
                id
            }
            Frame::UserText {
                description,
                values,
            } => {
                let texts = std::iter::once(description.as_str()).chain(values.iter().map(String::as_str));
                let encoding = pick_encoding(preferred, version, texts);
                body.push(encoding.as_byte());
                body.extend(encode_string(description, encoding, true));
                body.extend(encode_string(&values.join("\0"), encoding, false));
                "TXXX".to_string()
            }
            Frame::Comment(content) | Frame::Lyrics(content) => {
                let texts = [content.description.as_str(), content.text.as_str()];
                let encoding = pick_encoding(preferred, version, texts);
                body.push(encoding.as_byte());
                let mut language = content.language.as_bytes().to_vec();
                language.resize(3, b' ');
                body.extend_from_slice(&language[..3]);
                body.extend(encode_string(&content.description, encoding, true));
                body.extend(encode_string(&content.text, encoding, false));
                frame.id().to_string()
            }
            Frame::Picture(picture) => {
                let encoding = pick_encoding(preferred, version, [picture.description.as_str()]);
                body.push(encoding.as_byte());
                body.extend(encode_string(&picture.mime_type, TextEncoding::Latin1, true));
                body.push(picture.picture_type.as_u8());
                body.extend(encode_string(&picture.description, encoding, true));
                body.extend_from_slice(&picture.data);
                "APIC".to_string()
            }
            Frame::Raw {
                id,
                version: source,
                flags,
                data,
            } => {
                if *source == version || *flags == 0 {
                    return Some((id.clone(), *flags, data.clone()));
                }
                log::warn!(
                    "dropping ID3v2.{} frame {} with flags {:#06x} from a v2.{} tag",
                    source,
                    id,
                    flags,
                    version
                );
                return None;
            }
        };
        Some((id, 0, body))
    }
}

impl Tag for Id3v2Tag {
    fn title(&self) -> String {
        self.text("TIT2")
    }

    fn artist(&self) -> String {
        self.text("TPE1")
    }

    fn album(&self) -> String {
        self.text("TALB")
    }

    fn comment(&self) -> String {
        self.comment_frame()
            .map(|c| c.text.clone())
            .unwrap_or_default()
    }

    fn genre(&self) -> String {
        genre_text(&self.text("TCON"))
    }

    fn year(&self) -> u32 {
        parse_leading_number(&self.text("TDRC"))
    }

    fn track(&self) -> u32 {
        parse_leading_number(&self.text("TRCK"))
    }

    fn set_title(&mut self, value: &str) {
        self.set_text("TIT2", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text("TPE1", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_text("TALB", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.frames
            .retain(|frame| !matches!(frame, Frame::Comment(c) if c.description.is_empty()));
        if !value.is_empty() {
            self.frames
                .push(Frame::Comment(LanguageText::new("", value)));
        }
    }

    fn set_genre(&mut self, value: &str) {
        self.set_text("TCON", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("TDRC", &text);
    }

    fn set_track(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text("TRCK", &text);
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn properties(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        for frame in &self.frames {
            match frame {
                Frame::Text { id, values } => match key_for_frame(id) {
                    Some("GENRE") => {
                        map.insert("GENRE", values.iter().map(|v| genre_text(v)));
                    }
                    Some(key) => {
                        map.insert(key, values.iter().cloned());
                    }
                    None => map.add_unsupported_data(id.clone()),
                },
                Frame::UserText {
                    description,
                    values,
                } => {
                    let key = description.to_uppercase();
                    if is_valid_key(&key) {
                        map.insert(&key, values.iter().cloned());
                    } else {
                        map.add_unsupported_data(format!("TXXX/{}", description));
                    }
                }
                Frame::Comment(content) | Frame::Lyrics(content) => {
                    let base = if matches!(frame, Frame::Comment(_)) {
                        "COMMENT"
                    } else {
                        "LYRICS"
                    };
                    let key = if content.description.is_empty() {
                        base.to_string()
                    } else {
                        format!("{}:{}", base, content.description.to_uppercase())
                    };
                    if is_valid_key(&key) {
                        map.insert(&key, [content.text.clone()]);
                    } else {
                        map.add_unsupported_data(frame.id().to_string());
                    }
                }
                Frame::Picture(_) => {}
                Frame::Raw { id, .. } => map.add_unsupported_data(id.clone()),
            }
        }
        map
    }

    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        self.frames.retain(|frame| !frame.is_property_frame());

        let mut rejected = PropertyMap::new();
        for (key, values) in properties {
            if values.is_empty() {
                continue;
            }
            let language_frame = [("COMMENT", true), ("LYRICS", false)]
                .into_iter()
                .find_map(|(base, is_comment)| {
                    if key == base {
                        return Some((is_comment, ""));
                    }
                    key.strip_prefix(base)
                        .and_then(|rest| rest.strip_prefix(':'))
                        .map(|description| (is_comment, description))
                });

            if let Some((is_comment, description)) = language_frame {
                // One frame per language and description
                let content = LanguageText::new(description, &values[0]);
                self.frames.push(if is_comment {
                    Frame::Comment(content)
                } else {
                    Frame::Lyrics(content)
                });
                if values.len() > 1 {
                    rejected.insert(key, values[1..].iter().cloned());
                }
            } else if let Some(id) = frame_for_key(key) {
                self.set_text_values(id, values.clone());
            } else {
                self.frames.push(Frame::UserText {
                    description: key.clone(),
                    values: values.clone(),
                });
            }
        }
        rejected
    }

    fn remove_unsupported_properties(&mut self, ids: &[String]) {
        for id in ids {
            if let Some(description) = id.strip_prefix("TXXX/") {
                self.frames.retain(|frame| {
                    !matches!(frame, Frame::UserText { description: d, .. } if d == description)
                });
            } else {
                self.remove_frames(id);
            }
        }
    }

    fn complex_property_keys(&self) -> Vec<String> {
        if self.frames.iter().any(|f| matches!(f, Frame::Picture(_))) {
            vec![PICTURE_KEY.to_string()]
        } else {
            Vec::new()
        }
    }

    fn complex_properties(&self, key: &str) -> Vec<VariantMap> {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return Vec::new();
        }
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Picture(picture) => Some(picture.to_variant_map()),
                _ => None,
            })
            .collect()
    }

    fn set_complex_properties(&mut self, key: &str, values: &[VariantMap]) -> bool {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return false;
        }
        self.remove_frames("APIC");
        for record in values {
            if let Some(mut picture) = Picture::from_variant_map(record) {
                // APIC has no room for dimensions
                picture.width = 0;
                picture.height = 0;
                picture.color_depth = 0;
                picture.num_colors = 0;
                self.frames.push(Frame::Picture(picture));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::Variant;

    fn options(version: u8) -> TagOptions {
        TagOptions {
            id3v2_version: version,
            id3v2_padding: 16,
            ..Default::default()
        }
    }

    fn sample() -> Id3v2Tag {
        let mut tag = Id3v2Tag::new();
        tag.set_title("Title ünïcode");
        tag.set_artist("Artist");
        tag.set_year(2011);
        tag.set_track(3);
        tag.set_comment("A comment");
        tag
    }

    #[test]
    fn test_synchsafe() {
        assert_eq!(synchsafe_encode(0x0FFF_FFFF), [0x7F; 4]);
        assert_eq!(synchsafe_decode(&[0x00, 0x00, 0x02, 0x01]), 257);
        assert_eq!(synchsafe_decode(&synchsafe_encode(123_456)), 123_456);
    }

    #[test]
    fn test_unsynchronisation() {
        assert_eq!(
            remove_unsynchronisation(&[0xFF, 0x00, 0xE0, 0x01, 0xFF, 0x00, 0x00]),
            [0xFF, 0xE0, 0x01, 0xFF, 0x00]
        );
    }

    #[test]
    fn test_header() {
        let header = Id3v2Header::parse(b"ID3\x04\x00\x10\x00\x00\x01\x00").unwrap();
        assert_eq!(header.size, 128);
        assert!(header.has_footer());
        assert_eq!(header.total_size(), 148);
        assert!(Id3v2Header::parse(b"ID3\x04\x00\x00\x80\x00\x00\x00").is_none());
        assert!(Id3v2Header::parse(b"ID3\x04").is_none());
    }

    #[test]
    fn test_render_parse_v4() {
        let tag = sample();
        let bytes = tag.render(&options(4)).unwrap();
        assert_eq!(&bytes[0..4], b"ID3\x04");

        let parsed = Id3v2Tag::parse(&bytes).unwrap();
        assert_eq!(parsed.version(), 4);
        assert_eq!(parsed.disk_size(), bytes.len() as u64);
        assert_eq!(parsed.title(), "Title ünïcode");
        assert_eq!(parsed.year(), 2011);
        assert_eq!(parsed.track(), 3);
        assert_eq!(parsed.comment(), "A comment");
        assert_eq!(parsed.frames(), tag.frames());
    }

    #[test]
    fn test_render_parse_v3() {
        let mut tag = sample();
        tag.set_text_values("TDRC", vec!["2011-04-02".into()]);
        let bytes = tag.render(&options(3)).unwrap();
        assert_eq!(bytes[3], 3);
        // v2.3 has no TDRC and no UTF-8
        assert!(bytes.windows(4).any(|w| w == b"TYER"));
        assert!(!bytes.windows(4).any(|w| w == b"TDRC"));

        let parsed = Id3v2Tag::parse(&bytes).unwrap();
        assert_eq!(parsed.title(), "Title ünïcode");
        assert_eq!(parsed.text("TDRC"), "2011");
    }

    #[test]
    fn test_padding_reuses_disk_size() {
        let tag = sample();
        let first = tag.render(&options(4)).unwrap();
        let mut parsed = Id3v2Tag::parse(&first).unwrap();

        parsed.set_title("T");
        let smaller = parsed.render(&options(4)).unwrap();
        assert_eq!(smaller.len(), first.len());

        parsed.set_title(&"long ".repeat(100));
        let grown = parsed.render(&options(4)).unwrap();
        let header = Id3v2Header::parse(&grown).unwrap();
        assert!(grown.len() > first.len());
        assert_eq!(grown[grown.len() - 16..], [0u8; 16]);
        assert_eq!(header.total_size(), grown.len() as u64);
    }

    #[test]
    fn test_empty_tag_renders_nothing() {
        assert!(Id3v2Tag::new().render(&TagOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_latin1_preference_falls_back() {
        let mut opts = options(4);
        opts.id3v2_text_encoding = TextEncoding::Latin1;
        let mut tag = Id3v2Tag::new();
        tag.set_title("Café");
        tag.set_artist("東京");
        let parsed = Id3v2Tag::parse(&tag.render(&opts).unwrap()).unwrap();
        assert_eq!(parsed.title(), "Café");
        assert_eq!(parsed.artist(), "東京");
    }

    #[test]
    fn test_text_decoding() {
        let utf16 = encode_string("lø", TextEncoding::Utf16, true);
        assert_eq!(utf16, [0xFF, 0xFE, b'l', 0, 0xF8, 0, 0, 0]);
        assert_eq!(take_string(&utf16, TextEncoding::Utf16).0, "lø");
        assert_eq!(
            decode_string(&[0xFE, 0xFF, 0, b'a'], TextEncoding::Utf16),
            "a"
        );
        assert_eq!(
            decode_strings(b"one\0two\0", TextEncoding::Latin1),
            ["one", "two"]
        );
    }

    #[test]
    fn test_genre_text() {
        assert_eq!(genre_text("(17)"), "Rock");
        assert_eq!(genre_text("(17)Rocking"), "Rocking");
        assert_eq!(genre_text("9"), "Metal");
        assert_eq!(genre_text("Shoegaze"), "Shoegaze");
    }

    #[test]
    fn test_properties() {
        let mut tag = Id3v2Tag::new();
        let mut props = PropertyMap::new();
        props.insert("TITLE", ["t"]);
        props.insert("ARTIST", ["a", "b"]);
        props.insert("COMMENT", ["c"]);
        props.insert("COMMENT:NOTES", ["n"]);
        props.insert("LYRICS", ["la"]);
        props.insert("MUSICBRAINZ_ALBUMID", ["mb"]);
        assert!(tag.set_properties(&props).is_empty());
        assert_eq!(tag.properties(), props);

        let parsed = Id3v2Tag::parse(&tag.render(&options(4)).unwrap()).unwrap();
        assert_eq!(parsed.properties(), props);
    }

    #[test]
    fn test_raw_frames_are_unsupported_data() {
        let mut tag = sample();
        tag.add_frame(Frame::Raw {
            id: "PRIV".into(),
            version: 4,
            flags: 0,
            data: b"owner\0data".to_vec(),
        });
        let parsed = Id3v2Tag::parse(&tag.render(&options(4)).unwrap()).unwrap();
        let props = parsed.properties();
        assert_eq!(props.unsupported_data(), ["PRIV"]);

        let mut parsed = parsed;
        parsed.set_properties(&props);
        assert_eq!(parsed.properties().unsupported_data(), ["PRIV"]);
        parsed.remove_unsupported_properties(&props.unsupported_data().to_vec());
        assert!(parsed.properties().unsupported_data().is_empty());
    }

    #[test]
    fn test_truncated_frame_is_tolerated() {
        let bytes = sample().render(&options(4)).unwrap();
        // Cut into the middle of the frames but keep the header size
        let parsed = Id3v2Tag::parse(&bytes[..24]).unwrap();
        assert!(parsed.frames().len() <= 1);
        assert!(Id3v2Tag::parse(b"ID3\x02\x00\x00\x00\x00\x00\x00").is_err());
    }

    #[test]
    fn test_pictures() {
        let picture = Picture {
            data: vec![0x89, b'P', b'N', b'G', 1, 2],
            mime_type: "image/png".into(),
            description: "art".into(),
            picture_type: PictureType::FrontCover,
            width: 10,
            ..Default::default()
        };
        let mut tag = Id3v2Tag::new();
        assert!(tag.set_complex_properties("PICTURE", &[picture.to_variant_map()]));
        let parsed = Id3v2Tag::parse(&tag.render(&options(3)).unwrap()).unwrap();
        let records = parsed.complex_properties("PICTURE");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("description"), Some(&Variant::from("art")));
        assert_eq!(records[0].get("pictureType"), Some(&Variant::from("Front Cover")));
        assert!(records[0].get("width").is_none());

        let mut minimal = VariantMap::new();
        minimal.insert("data".into(), Variant::ByteVector(vec![1, 2, 3]));
        minimal.insert("mimeType".into(), Variant::from("image/jpeg"));
        tag.set_complex_properties("PICTURE", &[minimal.clone()]);
        assert_eq!(tag.complex_properties("PICTURE"), [minimal]);
    }
}
