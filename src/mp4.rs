//! MP4/M4A files and iTunes-style metadata
//!
//! MP4 file structure:
//! ```text
//! ftyp (file type)
//! moov (movie/metadata container)
//!   ├── mvhd (movie header)
//!   ├── trak (track)
//!   │   └── mdia/minf/stbl/stco|co64 (chunk offsets)
//!   └── udta (user data)
//!       └── meta (metadata)
//!           ├── hdlr (handler)
//!           └── ilst (iTunes metadata list)
//!               ├── ©nam, ©ART, trkn, covr, ...
//!               └── ---- (freeform items)
//! mdat (media data)
//! ```
//!
//! The whole `moov` box is read into memory, rebuilt with the new `ilst`
//! and spliced back in one edit. When `mdat` follows `moov`, every chunk
//! offset is moved by the size difference.

use crate::file::{
    check_writable, named_ranges, slot, slot_mut, splice, AudioFile, NamedRange, TagKind,
};
use crate::options::TagOptions;
use crate::picture::{pictures_from_records, Picture, PICTURE_KEY};
use crate::property_map::{is_valid_key, PropertyMap};
use crate::stream::{ByteStore, FileStream};
use crate::surgery::{BinaryFile, ByteRange};
use crate::tag::{parse_leading_number, Tag};
use crate::union::{TagUnion, TagView};
use crate::variant::VariantMap;
use anyhow::{bail, Context, Result};
use std::io::{Cursor, Read};
use std::path::Path;

/// iTunes namespace for freeform items
pub const ITUNES_NAMESPACE: &str = "com.apple.iTunes";

/// MP4 box/atom types
const FTYP: u32 = u32::from_be_bytes(*b"ftyp");
const MOOV: u32 = u32::from_be_bytes(*b"moov");
const UDTA: u32 = u32::from_be_bytes(*b"udta");
const META: u32 = u32::from_be_bytes(*b"meta");
const ILST: u32 = u32::from_be_bytes(*b"ilst");
const MDAT: u32 = u32::from_be_bytes(*b"mdat");
const FREEFORM: u32 = u32::from_be_bytes(*b"----");
const MEAN: u32 = u32::from_be_bytes(*b"mean");
const NAME: u32 = u32::from_be_bytes(*b"name");
const DATA: u32 = u32::from_be_bytes(*b"data");
const STCO: u32 = u32::from_be_bytes(*b"stco");
const CO64: u32 = u32::from_be_bytes(*b"co64");
const TRAK: u32 = u32::from_be_bytes(*b"trak");
const MDIA: u32 = u32::from_be_bytes(*b"mdia");
const MINF: u32 = u32::from_be_bytes(*b"minf");
const STBL: u32 = u32::from_be_bytes(*b"stbl");

/// Data atom type codes
pub const TYPE_IMPLICIT: u32 = 0;
pub const TYPE_UTF8: u32 = 1;
pub const TYPE_GIF: u32 = 12;
pub const TYPE_JPEG: u32 = 13;
pub const TYPE_PNG: u32 = 14;
pub const TYPE_BE_SIGNED: u32 = 21;
pub const TYPE_BMP: u32 = 27;

/// Cover art item
const COVR: [u8; 4] = *b"covr";
const TRKN: [u8; 4] = *b"trkn";
const DISK: [u8; 4] = *b"disk";
const CPIL: [u8; 4] = *b"cpil";
const TMPO: [u8; 4] = *b"tmpo";

/// Text items and their property keys
const TEXT_KEYS: [([u8; 4], &str); 8] = [
    (*b"\xA9nam", "TITLE"),
    (*b"\xA9ART", "ARTIST"),
    (*b"\xA9alb", "ALBUM"),
    (*b"\xA9cmt", "COMMENT"),
    (*b"\xA9gen", "GENRE"),
    (*b"\xA9day", "DATE"),
    (*b"aART", "ALBUMARTIST"),
    (*b"\xA9wrt", "COMPOSER"),
];

fn text_key(fourcc: &[u8; 4]) -> Option<&'static str> {
    TEXT_KEYS
        .iter()
        .find(|(code, _)| code == fourcc)
        .map(|(_, key)| *key)
}

fn text_fourcc(key: &str) -> Option<[u8; 4]> {
    TEXT_KEYS
        .iter()
        .find(|(_, k)| *k == key)
        .map(|(code, _)| *code)
}

/// Fourcc as text; `©` is byte 0xA9 on disk
pub fn fourcc_str(fourcc: &[u8; 4]) -> String {
    fourcc.iter().map(|&b| b as char).collect()
}

// =============================================================================
// Boxes
// =============================================================================

/// MP4 box header
#[derive(Debug, Clone)]
struct BoxHeader {
    size: u64,
    box_type: u32,
    header_size: u8, // 8 for normal, 16 for extended size
}

impl BoxHeader {
    fn read<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; 8];
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let box_type = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let (size, header_size) = if size == 1 {
            // Extended size
            let mut ext_buf = [0u8; 8];
            reader.read_exact(&mut ext_buf)?;
            (u64::from_be_bytes(ext_buf), 16)
        } else if size == 0 {
            // Box extends to end of file
            (0, 8)
        } else {
            (size as u64, 8)
        };

        Ok(Some(BoxHeader {
            size,
            box_type,
            header_size,
        }))
    }
}

/// A box placed inside its parent: header start, content start and end
#[derive(Debug, Clone, Copy)]
struct Located {
    pos: usize,
    content: usize,
    end: usize,
}

/// Place the box whose header sits at `pos`. A size that reaches past
/// `parent_end`, or is smaller than its own header, is an error.
fn locate(pos: usize, header: &BoxHeader, parent_end: usize) -> Result<Located> {
    let content = pos + header.header_size as usize;
    let end = if header.size == 0 {
        parent_end
    } else {
        usize::try_from(header.size)
            .ok()
            .and_then(|size| pos.checked_add(size))
            .unwrap_or(usize::MAX)
    };
    if end > parent_end || end < content {
        bail!(
            "{} box at {} overruns its parent",
            fourcc_str(&header.box_type.to_be_bytes()),
            pos
        );
    }
    Ok(Located { pos, content, end })
}

/// Find a box within `data[start..end]`
fn find_box_in_container(
    data: &[u8],
    start: usize,
    end: usize,
    box_type: u32,
) -> Result<Option<Located>> {
    let end = end.min(data.len());
    let mut pos = start;

    while pos + 8 <= end {
        let mut cursor = Cursor::new(&data[pos..end]);
        let Some(header) = BoxHeader::read(&mut cursor)? else {
            break;
        };
        let located = locate(pos, &header, end)?;
        if header.box_type == box_type {
            return Ok(Some(located));
        }
        pos = located.end;
    }

    Ok(None)
}

/// Children of `data`, as `(type, content)` pairs
fn child_boxes(data: &[u8]) -> Vec<(u32, &[u8])> {
    let mut children = Vec::new();
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let mut cursor = Cursor::new(&data[pos..]);
        let Ok(Some(header)) = BoxHeader::read(&mut cursor) else {
            break;
        };
        match locate(pos, &header, data.len()) {
            Ok(child) => {
                children.push((header.box_type, &data[child.content..child.end]));
                pos = child.end;
            }
            Err(e) => {
                log::warn!("{:#}", e);
                break;
            }
        }
    }
    children
}

fn make_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let size = 8 + content.len() as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(content);
    out
}

fn create_hdlr_box() -> Vec<u8> {
    let mut hdlr = Vec::new();
    hdlr.extend_from_slice(&[0u8; 4]); // version/flags
    hdlr.extend_from_slice(&[0u8; 4]); // pre_defined
    hdlr.extend_from_slice(b"mdir"); // handler_type
    hdlr.extend_from_slice(b"appl"); // manufacturer
    hdlr.extend_from_slice(&[0u8; 8]); // reserved
    hdlr.push(0); // name
    make_box(b"hdlr", &hdlr)
}

fn create_meta_box(ilst: &[u8]) -> Vec<u8> {
    let mut content = vec![0u8; 4]; // version/flags
    content.extend_from_slice(&create_hdlr_box());
    content.extend_from_slice(ilst);
    make_box(b"meta", &content)
}

fn update_box_size(data: &mut [u8], box_pos: usize, size_diff: i64) {
    if box_pos + 8 > data.len() {
        return;
    }
    let current = u32::from_be_bytes([
        data[box_pos],
        data[box_pos + 1],
        data[box_pos + 2],
        data[box_pos + 3],
    ]);
    match current {
        // Extends to EOF
        0 => {}
        1 if box_pos + 16 <= data.len() => {
            let mut ext = [0u8; 8];
            ext.copy_from_slice(&data[box_pos + 8..box_pos + 16]);
            let new_size = (u64::from_be_bytes(ext) as i64 + size_diff) as u64;
            data[box_pos + 8..box_pos + 16].copy_from_slice(&new_size.to_be_bytes());
        }
        1 => {}
        _ => {
            let new_size = (current as i64 + size_diff) as u32;
            data[box_pos..box_pos + 4].copy_from_slice(&new_size.to_be_bytes());
        }
    }
}

/// The `udta`/`meta`/`ilst` chain inside a `moov` box
#[derive(Debug, Clone, Copy)]
struct MetaPath {
    moov: Located,
    udta: Option<Located>,
    meta: Option<Located>,
    ilst: Option<Located>,
}

impl MetaPath {
    /// Walk `moov` down to `ilst`. Any box on the way that overruns its
    /// parent fails the walk.
    fn locate(moov: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(moov);
        let header = BoxHeader::read(&mut cursor)?.context("moov box truncated")?;
        let moov_box = locate(0, &header, moov.len())?;
        let udta = find_box_in_container(moov, moov_box.content, moov_box.end, UDTA)?;
        let meta = match udta {
            Some(udta) => find_box_in_container(moov, udta.content, udta.end, META)?,
            None => None,
        };
        let ilst = match meta {
            // meta box has 4-byte version/flags before its children
            Some(meta) => find_box_in_container(moov, meta.content + 4, meta.end, ILST)?,
            None => None,
        };
        Ok(Self {
            moov: moov_box,
            udta,
            meta,
            ilst,
        })
    }
}

/// Replace, insert or remove the `ilst` inside a `moov` box held in `moov`.
/// Returns the rebuilt box.
fn rebuild_moov(moov: &[u8], ilst: Option<&[u8]>) -> Result<Vec<u8>> {
    let path = MetaPath::locate(moov)?;

    let (at, old_len, inserted) = match (path.ilst, ilst) {
        (None, None) => return Ok(moov.to_vec()),
        (Some(old), new) => (old.pos, old.end - old.pos, new.unwrap_or_default().to_vec()),
        (None, Some(new)) => match (path.udta, path.meta) {
            (_, Some(meta)) => (meta.end, 0, new.to_vec()),
            (Some(udta), None) => (udta.end, 0, create_meta_box(new)),
            (None, None) => (
                path.moov.end,
                0,
                make_box(b"udta", &create_meta_box(new)),
            ),
        },
    };
    // Every box on the chain encloses the edit
    let parents = [Some(path.moov), path.udta, path.meta];

    let mut out = Vec::with_capacity(moov.len() + inserted.len());
    out.extend_from_slice(&moov[..at]);
    out.extend_from_slice(&inserted);
    out.extend_from_slice(&moov[at + old_len..]);
    let diff = inserted.len() as i64 - old_len as i64;
    for parent in parents.iter().flatten() {
        update_box_size(&mut out, parent.pos, diff);
    }
    Ok(out)
}

/// Move every `stco`/`co64` chunk offset inside `data[start..end]`
fn update_offsets_recursive(data: &mut [u8], start: usize, end: usize, size_diff: i64) {
    let mut pos = start;

    while pos + 8 <= end {
        let size = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
        let box_type =
            u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);

        if size < 8 || pos + size as usize > end {
            break;
        }

        match box_type {
            STCO | CO64 => {
                let width = if box_type == STCO { 4 } else { 8 };
                let entry_count_pos = pos + 12;
                if entry_count_pos + 4 <= data.len() {
                    let entry_count = u32::from_be_bytes([
                        data[entry_count_pos],
                        data[entry_count_pos + 1],
                        data[entry_count_pos + 2],
                        data[entry_count_pos + 3],
                    ]);

                    let mut offset_pos = entry_count_pos + 4;
                    for _ in 0..entry_count {
                        if offset_pos + width > pos + size as usize {
                            break;
                        }
                        let field = &mut data[offset_pos..offset_pos + width];
                        if width == 4 {
                            let offset = u32::from_be_bytes([field[0], field[1], field[2], field[3]]);
                            let new_offset = (offset as i64 + size_diff) as u32;
                            field.copy_from_slice(&new_offset.to_be_bytes());
                        } else {
                            let mut buf = [0u8; 8];
                            buf.copy_from_slice(field);
                            let new_offset = (u64::from_be_bytes(buf) as i64 + size_diff) as u64;
                            field.copy_from_slice(&new_offset.to_be_bytes());
                        }
                        offset_pos += width;
                    }
                }
            }
            TRAK | MDIA | MINF | STBL | MOOV => {
                // Container boxes - recurse into them
                update_offsets_recursive(data, pos + 8, pos + size as usize, size_diff);
            }
            _ => {}
        }

        pos += size as usize;
    }
}

// =============================================================================
// ilst items
// =============================================================================

/// Item identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ident {
    Fourcc([u8; 4]),
    Freeform { mean: String, name: String },
}

impl Ident {
    pub fn freeform(name: &str) -> Self {
        Ident::Freeform {
            mean: ITUNES_NAMESPACE.to_string(),
            name: name.to_string(),
        }
    }

    /// Identifier used in the unsupported data list
    pub fn id_string(&self) -> String {
        match self {
            Ident::Fourcc(code) => fourcc_str(code),
            Ident::Freeform { mean, name } => format!("----:{}:{}", mean, name),
        }
    }
}

/// A `data` atom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAtom {
    pub type_code: u32,
    pub data: Vec<u8>,
}

impl DataAtom {
    pub fn text(value: &str) -> Self {
        Self {
            type_code: TYPE_UTF8,
            data: value.as_bytes().to_vec(),
        }
    }

    fn as_text(&self) -> Option<String> {
        (self.type_code == TYPE_UTF8).then(|| String::from_utf8_lossy(&self.data).to_string())
    }
}

/// One `ilst` child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Item {
    pub ident: Ident,
    pub values: Vec<DataAtom>,
}

/// An `ilst` item list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mp4Tag {
    items: Vec<Mp4Item>,
}

/// Decode the `data` children of an item
fn parse_data_atoms(children: &[(u32, &[u8])]) -> Vec<DataAtom> {
    children
        .iter()
        .filter(|(box_type, content)| *box_type == DATA && content.len() >= 8)
        .map(|(_, content)| DataAtom {
            // 1 byte version, 3 byte type, 4 byte locale
            type_code: u32::from_be_bytes([0, content[1], content[2], content[3]]),
            data: content[8..].to_vec(),
        })
        .collect()
}

/// Content of a `mean` or `name` box, after its version/flags
fn full_box_text(content: &[u8]) -> String {
    String::from_utf8_lossy(content.get(4..).unwrap_or_default()).to_string()
}

fn render_data(atom: &DataAtom) -> Vec<u8> {
    let mut content = Vec::with_capacity(8 + atom.data.len());
    content.extend_from_slice(&atom.type_code.to_be_bytes());
    content.extend_from_slice(&[0u8; 4]); // locale
    content.extend_from_slice(&atom.data);
    make_box(b"data", &content)
}

fn pair_data(number: u16, total: u16, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    data[2..4].copy_from_slice(&number.to_be_bytes());
    data[4..6].copy_from_slice(&total.to_be_bytes());
    data
}

fn read_pair(data: &[u8]) -> (u16, u16) {
    let number = data.get(2..4).map_or(0, |b| u16::from_be_bytes([b[0], b[1]]));
    let total = data.get(4..6).map_or(0, |b| u16::from_be_bytes([b[0], b[1]]));
    (number, total)
}

fn format_pair(number: u16, total: u16) -> String {
    if total > 0 {
        format!("{}/{}", number, total)
    } else {
        number.to_string()
    }
}

fn parse_pair(value: &str) -> (u16, u16) {
    let (number, total) = value.split_once('/').unwrap_or((value, ""));
    (
        parse_leading_number(number).min(u16::MAX as u32) as u16,
        parse_leading_number(total).min(u16::MAX as u32) as u16,
    )
}

fn image_type_code(mime_type: &str) -> u32 {
    match mime_type {
        "image/png" => TYPE_PNG,
        "image/bmp" => TYPE_BMP,
        "image/gif" => TYPE_GIF,
        _ => TYPE_JPEG,
    }
}

fn image_mime(type_code: u32, data: &[u8]) -> String {
    match type_code {
        TYPE_PNG => "image/png",
        TYPE_BMP => "image/bmp",
        TYPE_GIF => "image/gif",
        TYPE_JPEG => "image/jpeg",
        _ => crate::picture::mime_from_data(data).unwrap_or("image/jpeg"),
    }
    .to_string()
}

impl Mp4Tag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the content of an `ilst` box
    pub fn parse(content: &[u8]) -> Result<Self> {
        let mut tag = Self::new();
        for (box_type, item) in child_boxes(content) {
            let children = child_boxes(item);
            let ident = if box_type == FREEFORM {
                let mean = children.iter().find(|(t, _)| *t == MEAN);
                let name = children.iter().find(|(t, _)| *t == NAME);
                match (mean, name) {
                    (Some((_, mean)), Some((_, name))) => Ident::Freeform {
                        mean: full_box_text(mean),
                        name: full_box_text(name),
                    },
                    _ => {
                        log::warn!("skipping freeform item without mean/name");
                        continue;
                    }
                }
            } else {
                Ident::Fourcc(box_type.to_be_bytes())
            };
            let values = parse_data_atoms(&children);
            if values.is_empty() {
                log::debug!("skipping item {} without data", ident.id_string());
                continue;
            }
            tag.items.push(Mp4Item { ident, values });
        }
        Ok(tag)
    }

    /// Render a complete `ilst` box
    pub fn render(&self) -> Vec<u8> {
        let mut content = Vec::new();
        for item in &self.items {
            let mut body = Vec::new();
            let box_type = match &item.ident {
                Ident::Fourcc(code) => *code,
                Ident::Freeform { mean, name } => {
                    let mut mean_box = vec![0u8; 4];
                    mean_box.extend_from_slice(mean.as_bytes());
                    body.extend_from_slice(&make_box(b"mean", &mean_box));
                    let mut name_box = vec![0u8; 4];
                    name_box.extend_from_slice(name.as_bytes());
                    body.extend_from_slice(&make_box(b"name", &name_box));
                    *b"----"
                }
            };
            for atom in &item.values {
                body.extend_from_slice(&render_data(atom));
            }
            content.extend_from_slice(&make_box(&box_type, &body));
        }
        make_box(b"ilst", &content)
    }

    pub fn items(&self) -> &[Mp4Item] {
        &self.items
    }

    pub fn item(&self, ident: &Ident) -> Option<&Mp4Item> {
        self.items.iter().find(|item| &item.ident == ident)
    }

    /// Replace the item with the same identifier, or append
    pub fn set_item(&mut self, item: Mp4Item) {
        match self.items.iter_mut().find(|i| i.ident == item.ident) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    pub fn remove_item(&mut self, ident: &Ident) {
        self.items.retain(|item| &item.ident != ident);
    }

    fn text(&self, fourcc: &[u8; 4]) -> String {
        self.item(&Ident::Fourcc(*fourcc))
            .and_then(|item| item.values.first())
            .and_then(DataAtom::as_text)
            .unwrap_or_default()
    }

    fn set_text(&mut self, fourcc: &[u8; 4], value: &str) {
        let ident = Ident::Fourcc(*fourcc);
        if value.is_empty() {
            self.remove_item(&ident);
        } else {
            self.set_item(Mp4Item {
                ident,
                values: vec![DataAtom::text(value)],
            });
        }
    }

    fn pair(&self, fourcc: &[u8; 4]) -> (u16, u16) {
        self.item(&Ident::Fourcc(*fourcc))
            .and_then(|item| item.values.first())
            .map_or((0, 0), |atom| read_pair(&atom.data))
    }

    fn set_pair(&mut self, fourcc: &[u8; 4], number: u16, total: u16) {
        let ident = Ident::Fourcc(*fourcc);
        if number == 0 && total == 0 {
            self.remove_item(&ident);
            return;
        }
        let len = if *fourcc == TRKN { 8 } else { 6 };
        self.set_item(Mp4Item {
            ident,
            values: vec![DataAtom {
                type_code: TYPE_IMPLICIT,
                data: pair_data(number, total, len),
            }],
        });
    }

    fn integer(&self, fourcc: &[u8; 4]) -> Option<i64> {
        let atom = self.item(&Ident::Fourcc(*fourcc))?.values.first()?;
        let value = match atom.data.len() {
            1 => atom.data[0] as i8 as i64,
            2 => i16::from_be_bytes([atom.data[0], atom.data[1]]) as i64,
            4 => i32::from_be_bytes([atom.data[0], atom.data[1], atom.data[2], atom.data[3]])
                as i64,
            _ => return None,
        };
        Some(value)
    }

    fn set_integer(&mut self, fourcc: &[u8; 4], data: Vec<u8>) {
        self.set_item(Mp4Item {
            ident: Ident::Fourcc(*fourcc),
            values: vec![DataAtom {
                type_code: TYPE_BE_SIGNED,
                data,
            }],
        });
    }

    /// Property key of an item, `None` when the item is not a property
    fn property_key(&self, item: &Mp4Item) -> Option<String> {
        match &item.ident {
            Ident::Fourcc(code) if *code == TRKN => Some("TRACKNUMBER".into()),
            Ident::Fourcc(code) if *code == DISK => Some("DISCNUMBER".into()),
            Ident::Fourcc(code) if *code == CPIL => Some("COMPILATION".into()),
            Ident::Fourcc(code) if *code == TMPO => Some("BPM".into()),
            Ident::Fourcc(code) => text_key(code).map(str::to_string),
            Ident::Freeform { mean, name } if mean == ITUNES_NAMESPACE => {
                let text = item.values.iter().all(|v| v.type_code == TYPE_UTF8);
                (text && is_valid_key(name)).then(|| name.to_uppercase())
            }
            Ident::Freeform { .. } => None,
        }
    }
}

impl Tag for Mp4Tag {
    fn title(&self) -> String {
        self.text(b"\xA9nam")
    }

    fn artist(&self) -> String {
        self.text(b"\xA9ART")
    }

    fn album(&self) -> String {
        self.text(b"\xA9alb")
    }

    fn comment(&self) -> String {
        self.text(b"\xA9cmt")
    }

    fn genre(&self) -> String {
        self.text(b"\xA9gen")
    }

    fn year(&self) -> u32 {
        parse_leading_number(&self.text(b"\xA9day"))
    }

    fn track(&self) -> u32 {
        self.pair(&TRKN).0 as u32
    }

    fn set_title(&mut self, value: &str) {
        self.set_text(b"\xA9nam", value);
    }

    fn set_artist(&mut self, value: &str) {
        self.set_text(b"\xA9ART", value);
    }

    fn set_album(&mut self, value: &str) {
        self.set_text(b"\xA9alb", value);
    }

    fn set_comment(&mut self, value: &str) {
        self.set_text(b"\xA9cmt", value);
    }

    fn set_genre(&mut self, value: &str) {
        self.set_text(b"\xA9gen", value);
    }

    fn set_year(&mut self, value: u32) {
        let text = if value == 0 { String::new() } else { value.to_string() };
        self.set_text(b"\xA9day", &text);
    }

    fn set_track(&mut self, value: u32) {
        let total = self.pair(&TRKN).1;
        self.set_pair(&TRKN, value.min(u16::MAX as u32) as u16, total);
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn properties(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        for item in &self.items {
            let Some(key) = self.property_key(item) else {
                if !matches!(item.ident, Ident::Fourcc(COVR)) {
                    map.add_unsupported_data(item.ident.id_string());
                }
                continue;
            };
            match &item.ident {
                Ident::Fourcc(code) if *code == TRKN || *code == DISK => {
                    let (number, total) = self.pair(code);
                    map.insert(&key, [format_pair(number, total)]);
                }
                Ident::Fourcc(code) if *code == CPIL || *code == TMPO => {
                    if let Some(value) = self.integer(code) {
                        map.insert(&key, [value.to_string()]);
                    }
                }
                _ => {
                    map.insert(&key, item.values.iter().filter_map(DataAtom::as_text));
                }
            }
        }
        map
    }

    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        let keep: Vec<Mp4Item> = self
            .items
            .iter()
            .filter(|item| self.property_key(item).is_none())
            .cloned()
            .collect();
        self.items = keep;

        let mut rejected = PropertyMap::new();
        for (key, values) in properties {
            let Some(first) = values.first() else {
                continue;
            };
            match key.as_str() {
                "TRACKNUMBER" => {
                    let (number, total) = parse_pair(first);
                    self.set_pair(&TRKN, number, total);
                }
                "DISCNUMBER" => {
                    let (number, total) = parse_pair(first);
                    self.set_pair(&DISK, number, total);
                }
                "COMPILATION" => {
                    self.set_integer(&CPIL, vec![(parse_leading_number(first) != 0) as u8]);
                }
                "BPM" => {
                    let bpm = parse_leading_number(first).min(u16::MAX as u32) as u16;
                    self.set_integer(&TMPO, bpm.to_be_bytes().to_vec());
                }
                _ if !is_valid_key(key) => {
                    rejected.insert(key, values.iter().cloned());
                }
                _ => {
                    let ident = match text_fourcc(key) {
                        Some(code) => Ident::Fourcc(code),
                        None => Ident::freeform(key),
                    };
                    self.set_item(Mp4Item {
                        ident,
                        values: values.iter().map(|v| DataAtom::text(v)).collect(),
                    });
                }
            }
        }
        rejected
    }

    fn remove_unsupported_properties(&mut self, ids: &[String]) {
        self.items
            .retain(|item| !ids.contains(&item.ident.id_string()));
    }

    fn complex_property_keys(&self) -> Vec<String> {
        if self.item(&Ident::Fourcc(COVR)).is_some() {
            vec![PICTURE_KEY.to_string()]
        } else {
            Vec::new()
        }
    }

    fn complex_properties(&self, key: &str) -> Vec<VariantMap> {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return Vec::new();
        }
        let Some(item) = self.item(&Ident::Fourcc(COVR)) else {
            return Vec::new();
        };
        item.values
            .iter()
            .map(|atom| {
                Picture {
                    data: atom.data.clone(),
                    mime_type: image_mime(atom.type_code, &atom.data),
                    ..Default::default()
                }
                .to_variant_map()
            })
            .collect()
    }

    fn set_complex_properties(&mut self, key: &str, values: &[VariantMap]) -> bool {
        if !key.eq_ignore_ascii_case(PICTURE_KEY) {
            return false;
        }
        let ident = Ident::Fourcc(COVR);
        let atoms: Vec<DataAtom> = pictures_from_records(values)
            .into_iter()
            .map(|picture| DataAtom {
                type_code: image_type_code(&picture.mime_type),
                data: picture.data,
            })
            .collect();
        if atoms.is_empty() {
            self.remove_item(&ident);
        } else {
            self.set_item(Mp4Item {
                ident,
                values: atoms,
            });
        }
        true
    }
}

// =============================================================================
// File
// =============================================================================

/// An MP4 file
pub struct Mp4File<S: ByteStore> {
    file: BinaryFile<S>,
    tag: Option<Mp4Tag>,
    moov_range: Option<ByteRange>,
    mdat_range: Option<ByteRange>,
    options: TagOptions,
}

impl Mp4File<FileStream> {
    pub fn open(path: &Path, options: &TagOptions) -> Result<Self> {
        Self::new(FileStream::open(path)?, options)
    }
}

impl<S: ByteStore> Mp4File<S> {
    pub fn new(store: S, options: &TagOptions) -> Result<Self> {
        let mut mp4 = Self {
            file: BinaryFile::new(store),
            tag: None,
            moov_range: None,
            mdat_range: None,
            options: options.clone(),
        };
        mp4.scan()?;
        Ok(mp4)
    }

    fn scan(&mut self) -> Result<()> {
        let len = self.file.len()?;
        let mut pos = 0;
        while pos + 8 <= len {
            let bytes = self.file.read_block_at(pos, 16)?;
            let Some(header) = BoxHeader::read(&mut Cursor::new(&bytes))? else {
                break;
            };
            if pos == 0 && header.box_type != FTYP {
                break;
            }
            let size = if header.size == 0 { len - pos } else { header.size };
            let overruns = pos.checked_add(size).map_or(true, |end| end > len);
            if size < header.header_size as u64 || overruns {
                log::warn!("{}: top-level box at {} overruns the file", self.file.name(), pos);
                break;
            }
            match header.box_type {
                MOOV if self.moov_range.is_none() => {
                    self.moov_range = Some(ByteRange::new(pos, size));
                }
                MDAT if self.mdat_range.is_none() => {
                    self.mdat_range = Some(ByteRange::new(pos, size));
                }
                _ => {}
            }
            pos += size;
        }

        let Some(moov) = self.moov_range else {
            log::warn!("{}: no ftyp/moov boxes", self.file.name());
            self.file.set_valid(false);
            return Ok(());
        };

        let data = self.file.read_block_at(moov.offset, moov.length as usize)?;
        // A damaged chain leaves no tag; saving then fails in rebuild_moov
        self.tag = match find_ilst(&data) {
            Ok(Some((start, end))) => Some(Mp4Tag::parse(&data[start..end])?),
            Ok(None) => Some(Mp4Tag::new()),
            Err(e) => {
                log::warn!("{}: metadata boxes are damaged: {:#}", self.file.name(), e);
                None
            }
        };
        log::debug!(
            "{}: moov {:?}, mdat {:?}",
            self.file.name(),
            self.moov_range,
            self.mdat_range
        );
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_valid()
    }

    pub fn options(&self) -> &TagOptions {
        &self.options
    }

    pub fn mp4_tag(&mut self, create: bool) -> Option<&mut Mp4Tag> {
        if create && self.is_valid() && self.tag.is_none() {
            self.tag = Some(Mp4Tag::new());
        }
        self.tag.as_mut()
    }

    pub fn tag(&mut self) -> TagUnion<'_> {
        TagUnion::new(vec![slot_mut(&mut self.tag)])
    }

    pub fn tag_view(&self) -> TagView<'_> {
        TagView::new(vec![slot(&self.tag)])
    }

    fn write_moov(&mut self) -> Result<()> {
        check_writable(&self.file)?;
        let Some(moov_range) = self.moov_range else {
            bail!("{}: no moov box", self.file.name());
        };

        let moov = self
            .file
            .read_block_at(moov_range.offset, moov_range.length as usize)?;
        let ilst = self
            .tag
            .as_ref()
            .filter(|tag| !tag.is_empty())
            .map(Mp4Tag::render);
        let mut new_moov = rebuild_moov(&moov, ilst.as_deref())?;

        let diff = new_moov.len() as i64 - moov.len() as i64;
        let mdat_follows = self
            .mdat_range
            .is_some_and(|mdat| mdat.offset > moov_range.offset);
        if diff != 0 && mdat_follows {
            let header_size = BoxHeader::read(&mut Cursor::new(&new_moov))?
                .map_or(8, |h| h.header_size as usize);
            let end = new_moov.len();
            update_offsets_recursive(&mut new_moov, header_size, end, diff);
        }

        let edit = splice(
            &mut self.file,
            Some(moov_range),
            moov_range.offset,
            &new_moov,
        )?;
        if let Some(edit) = edit {
            edit.shift(&mut self.mdat_range);
            self.moov_range = edit.range();
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        self.write_moov()
    }

    pub fn strip(&mut self, kinds: &[TagKind]) -> Result<()> {
        check_writable(&self.file)?;
        if kinds.contains(&TagKind::Mp4) {
            self.tag = None;
            self.write_moov()?;
        }
        Ok(())
    }

    pub fn ranges(&self) -> Vec<NamedRange> {
        named_ranges(&[("moov", self.moov_range), ("mdat", self.mdat_range)])
    }

    pub fn into_store(self) -> S {
        self.file.into_inner()
    }
}

/// Content range of `moov/udta/meta/ilst` within a `moov` box
fn find_ilst(moov: &[u8]) -> Result<Option<(usize, usize)>> {
    Ok(MetaPath::locate(moov)?
        .ilst
        .map(|ilst| (ilst.content, ilst.end)))
}

impl<S: ByteStore> AudioFile for Mp4File<S> {
    fn format_name(&self) -> &'static str {
        "MP4"
    }

    fn is_valid(&self) -> bool {
        Mp4File::is_valid(self)
    }

    fn tag(&mut self) -> TagUnion<'_> {
        Mp4File::tag(self)
    }

    fn tag_view(&self) -> TagView<'_> {
        Mp4File::tag_view(self)
    }

    fn supported_tags(&self) -> &'static [TagKind] {
        &[TagKind::Mp4]
    }

    fn present_tags(&self) -> Vec<TagKind> {
        if self.tag.as_ref().is_some_and(|t| !t.is_empty()) {
            vec![TagKind::Mp4]
        } else {
            Vec::new()
        }
    }

    fn save(&mut self) -> Result<()> {
        Mp4File::save(self)
    }

    fn strip(&mut self, kinds: &[TagKind]) -> Result<()> {
        Mp4File::strip(self, kinds)
    }

    fn ranges(&self) -> Vec<NamedRange> {
        Mp4File::ranges(self)
    }
}
