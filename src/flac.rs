//! FLAC files
//!
//! Layout: optional ID3v2 tag, `fLaC`, metadata blocks (STREAMINFO first),
//! audio frames, optional ID3v1 trailer. The Xiph comment lives in the
//! VORBIS_COMMENT block; PICTURE blocks are presented through it.
//!
//! On save the whole metadata block list is rebuilt in one splice. Existing
//! padding absorbs size changes when it can; otherwise a fresh padding block
//! of `flac_padding` bytes is written. An ID3v2 tag in front of the stream
//! is not part of the format and is removed on save after its basic fields
//! have been folded into the Xiph comment.

use crate::file::{
    check_writable, named_ranges, slot, slot_mut, splice, AudioFile, NamedRange, TagKind,
};
use crate::id3v1::{Id3v1Tag, ID3V1_ID, ID3V1_SIZE};
use crate::id3v2::{Id3v2Header, Id3v2Tag, ID3V2_HEADER_SIZE};
use crate::options::TagOptions;
use crate::picture::{Picture, PICTURE_KEY};
use crate::stream::{ByteStore, FileStream};
use crate::surgery::{BinaryFile, ByteRange};
use crate::tag::{duplicate, Tag};
use crate::union::{TagUnion, TagView};
use crate::xiph::XiphComment;
use anyhow::{bail, Result};
use std::path::Path;

pub const FLAC_ID: &[u8; 4] = b"fLaC";

const BLOCK_HEADER_SIZE: u64 = 4;
const MAX_BLOCK_SIZE: usize = 0xFF_FFFF;

/// Metadata block types
pub const STREAMINFO: u8 = 0;
pub const PADDING: u8 = 1;
pub const VORBIS_COMMENT: u8 = 4;
pub const PICTURE: u8 = 6;
const INVALID: u8 = 127;

/// A metadata block kept verbatim across saves
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBlock {
    pub block_type: u8,
    pub data: Vec<u8>,
}

/// A FLAC file
pub struct FlacFile<S: ByteStore> {
    file: BinaryFile<S>,
    options: TagOptions,
    xiph: Option<XiphComment>,
    id3v2: Option<Id3v2Tag>,
    id3v2_range: Option<ByteRange>,
    id3v1: Option<Id3v1Tag>,
    id3v1_range: Option<ByteRange>,
    /// STREAMINFO and every block not rebuilt on save, in file order
    blocks: Vec<MetadataBlock>,
    /// Block list after the `fLaC` marker, padding included
    metadata_range: Option<ByteRange>,
}

impl FlacFile<FileStream> {
    pub fn open(path: &Path, options: &TagOptions) -> Result<Self> {
        Self::new(FileStream::open(path)?, options)
    }
}

impl<S: ByteStore> FlacFile<S> {
    pub fn new(store: S, options: &TagOptions) -> Result<Self> {
        let mut flac = Self {
            file: BinaryFile::new(store),
            options: options.clone(),
            xiph: None,
            id3v2: None,
            id3v2_range: None,
            id3v1: None,
            id3v1_range: None,
            blocks: Vec::new(),
            metadata_range: None,
        };
        flac.scan()?;
        Ok(flac)
    }

    fn scan(&mut self) -> Result<()> {
        let len = self.file.len()?;

        let head = self.file.read_block_at(0, ID3V2_HEADER_SIZE as usize)?;
        if let Some(header) = Id3v2Header::parse(&head) {
            let size = header.total_size().min(len);
            self.id3v2_range = Some(ByteRange::new(0, size));
            let data = self.file.read_block_at(0, size as usize)?;
            self.id3v2 = match Id3v2Tag::parse(&data) {
                Ok(tag) => Some(tag),
                Err(e) => {
                    log::warn!("{}: skipping ID3v2 tag: {:#}", self.file.name(), e);
                    None
                }
            };
        }

        let stream_start = self.id3v2_range.map_or(0, |r| r.end());
        let marker = self.file.read_block_at(stream_start, FLAC_ID.len())?;
        if marker != FLAC_ID {
            log::warn!("{}: no fLaC marker at {}", self.file.name(), stream_start);
            return self.invalidate();
        }

        if !self.read_blocks(stream_start + FLAC_ID.len() as u64, len)? {
            return self.invalidate();
        }

        let audio_end = self.metadata_range.map_or(len, |r| r.end());
        if len >= audio_end + ID3V1_SIZE {
            let data = self.file.read_block_at(len - ID3V1_SIZE, ID3V1_SIZE as usize)?;
            if data.starts_with(ID3V1_ID) {
                self.id3v1_range = Some(ByteRange::new(len - ID3V1_SIZE, ID3V1_SIZE));
                self.id3v1 = Id3v1Tag::parse(&data, self.options.id3v1_encoding).ok();
            }
        }

        if self.xiph.is_none() {
            self.xiph = Some(XiphComment::new());
        }
        Ok(())
    }

    /// Walk the metadata blocks starting at `start`. Returns `false` when
    /// the list is structurally broken.
    fn read_blocks(&mut self, start: u64, len: u64) -> Result<bool> {
        let mut pos = start;
        let mut pictures = Vec::new();
        loop {
            let header = self.file.read_block_at(pos, BLOCK_HEADER_SIZE as usize)?;
            if header.len() < BLOCK_HEADER_SIZE as usize {
                log::warn!("{}: metadata truncated at {}", self.file.name(), pos);
                return Ok(false);
            }
            let is_last = header[0] & 0x80 != 0;
            let block_type = header[0] & 0x7F;
            let size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as u64;
            let data_start = pos + BLOCK_HEADER_SIZE;

            if data_start + size > len {
                log::warn!("{}: metadata block overruns the file", self.file.name());
                return Ok(false);
            }
            if pos == start && block_type != STREAMINFO {
                log::warn!("{}: first metadata block is not STREAMINFO", self.file.name());
                return Ok(false);
            }
            if block_type == INVALID {
                log::warn!("{}: invalid metadata block type", self.file.name());
                return Ok(false);
            }

            match block_type {
                PADDING => {}
                VORBIS_COMMENT if self.xiph.is_none() => {
                    let data = self.file.read_block_at(data_start, size as usize)?;
                    match XiphComment::parse(&data) {
                        Ok(comment) => self.xiph = Some(comment),
                        Err(e) => log::warn!("{}: dropping comment: {:#}", self.file.name(), e),
                    }
                }
                VORBIS_COMMENT => {
                    log::debug!("{}: dropping extra comment block", self.file.name());
                }
                PICTURE => {
                    let data = self.file.read_block_at(data_start, size as usize)?;
                    match Picture::from_flac_bytes(&data) {
                        Ok(picture) => pictures.push(picture),
                        Err(e) => log::warn!("{}: dropping picture: {:#}", self.file.name(), e),
                    }
                }
                _ => {
                    let data = self.file.read_block_at(data_start, size as usize)?;
                    self.blocks.push(MetadataBlock { block_type, data });
                }
            }

            pos = data_start + size;
            if is_last {
                break;
            }
        }

        if !pictures.is_empty() {
            let xiph = self.xiph.get_or_insert_with(XiphComment::new);
            for picture in pictures {
                xiph.add_picture(picture);
            }
        }
        self.metadata_range = Some(ByteRange::new(start, pos - start));
        log::debug!(
            "{}: {} kept metadata blocks, metadata ends at {}",
            self.file.name(),
            self.blocks.len(),
            pos
        );
        Ok(true)
    }

    fn invalidate(&mut self) -> Result<()> {
        self.file.set_valid(false);
        self.xiph = None;
        self.id3v2 = None;
        self.blocks.clear();
        self.metadata_range = None;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_valid()
    }

    pub fn xiph_comment(&mut self, create: bool) -> Option<&mut XiphComment> {
        if create && self.is_valid() && self.xiph.is_none() {
            self.xiph = Some(XiphComment::new());
        }
        self.xiph.as_mut()
    }

    /// The ID3v2 tag found in front of the stream, if any. None is created.
    pub fn id3v2_tag(&mut self) -> Option<&mut Id3v2Tag> {
        self.id3v2.as_mut()
    }

    pub fn id3v1_tag(&mut self, create: bool) -> Option<&mut Id3v1Tag> {
        if create && self.is_valid() && self.id3v1.is_none() {
            self.id3v1 = Some(Id3v1Tag::new(self.options.id3v1_encoding));
        }
        self.id3v1.as_mut()
    }

    /// STREAMINFO and the other blocks kept verbatim
    pub fn metadata_blocks(&self) -> &[MetadataBlock] {
        &self.blocks
    }

    pub fn pictures(&self) -> &[Picture] {
        self.xiph
            .as_ref()
            .map(|x| x.pictures())
            .unwrap_or_default()
    }

    pub fn tag(&mut self) -> TagUnion<'_> {
        TagUnion::new(vec![
            slot_mut(&mut self.xiph),
            slot_mut(&mut self.id3v2),
            slot_mut(&mut self.id3v1),
        ])
    }

    pub fn tag_view(&self) -> TagView<'_> {
        TagView::new(vec![slot(&self.xiph), slot(&self.id3v2), slot(&self.id3v1)])
    }

    /// Encode the rebuilt block list, padding sized to fit `available`
    /// bytes when possible
    fn render_metadata(&self, available: u64) -> Result<Vec<u8>> {
        let mut blocks: Vec<(u8, Vec<u8>)> = self
            .blocks
            .iter()
            .map(|b| (b.block_type, b.data.clone()))
            .collect();
        if let Some(xiph) = &self.xiph {
            blocks.push((VORBIS_COMMENT, xiph.render(false)));
            for picture in xiph.pictures() {
                blocks.push((PICTURE, picture.to_flac_bytes()));
            }
        }

        let used: u64 = blocks
            .iter()
            .map(|(_, data)| BLOCK_HEADER_SIZE + data.len() as u64)
            .sum();
        if used != available {
            let padding = if used + BLOCK_HEADER_SIZE <= available {
                available - used - BLOCK_HEADER_SIZE
            } else {
                self.options.flac_padding as u64
            };
            blocks.push((PADDING, vec![0; (padding as usize).min(MAX_BLOCK_SIZE)]));
        }

        let mut out = Vec::with_capacity(used as usize);
        let count = blocks.len();
        for (i, (block_type, data)) in blocks.into_iter().enumerate() {
            if data.len() > MAX_BLOCK_SIZE {
                bail!("metadata block of {} bytes is too large", data.len());
            }
            let last = if i + 1 == count { 0x80 } else { 0 };
            out.push(block_type | last);
            out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    fn metadata_range(&self) -> Result<ByteRange> {
        match self.metadata_range {
            Some(range) => Ok(range),
            None => bail!("{}: no metadata block list", self.file.name()),
        }
    }

    /// Replace the block list on disk with `rendered`
    fn splice_metadata(&mut self, rendered: &[u8]) -> Result<()> {
        let range = self.metadata_range()?;
        if let Some(edit) = splice(&mut self.file, Some(range), range.offset, rendered)? {
            edit.shift(&mut self.id3v1_range);
            self.metadata_range = edit.range();
        }
        Ok(())
    }

    fn write_metadata(&mut self) -> Result<()> {
        let rendered = self.render_metadata(self.metadata_range()?.length)?;
        self.splice_metadata(&rendered)
    }

    fn remove_id3v2(&mut self) -> Result<()> {
        if let Some(edit) = splice(&mut self.file, self.id3v2_range, 0, &[])? {
            edit.shift(&mut self.metadata_range);
            edit.shift(&mut self.id3v1_range);
        }
        self.id3v2_range = None;
        self.id3v2 = None;
        Ok(())
    }

    /// Rebuild the metadata blocks, drop any ID3v2 tag and write ID3v1.
    /// The block list is rendered before anything on disk changes.
    pub fn save(&mut self) -> Result<()> {
        check_writable(&self.file)?;
        let range = self.metadata_range()?;

        if let (Some(id3v2), Some(xiph)) = (&self.id3v2, self.xiph.as_mut()) {
            fold_id3v2(id3v2, xiph);
        }
        // Removing ID3v2 moves the block list but keeps its length
        let rendered = self.render_metadata(range.length)?;
        self.remove_id3v2()?;
        self.splice_metadata(&rendered)?;

        let rendered = match &self.id3v1 {
            Some(tag) if !tag.is_empty() => tag.render(),
            _ => Vec::new(),
        };
        let insert_at = self.file.len()?;
        if let Some(edit) = splice(&mut self.file, self.id3v1_range, insert_at, &rendered)? {
            self.id3v1_range = edit.range();
        }
        Ok(())
    }

    pub fn strip(&mut self, kinds: &[TagKind]) -> Result<()> {
        check_writable(&self.file)?;
        if kinds.contains(&TagKind::Id3v2) {
            self.remove_id3v2()?;
        }
        if kinds.contains(&TagKind::Xiph) {
            self.xiph = None;
            self.write_metadata()?;
        }
        if kinds.contains(&TagKind::Id3v1) {
            splice(&mut self.file, self.id3v1_range, 0, &[])?;
            self.id3v1_range = None;
            self.id3v1 = None;
        }
        Ok(())
    }

    pub fn ranges(&self) -> Vec<NamedRange> {
        let audio = self.metadata_range.map(|meta| {
            let end = match self.id3v1_range {
                Some(r) => r.offset,
                None => self.file.len().unwrap_or(meta.end()),
            };
            ByteRange::new(meta.end(), end.saturating_sub(meta.end()))
        });
        named_ranges(&[
            ("ID3v2", self.id3v2_range),
            ("metadata", self.metadata_range),
            ("audio", audio),
            ("ID3v1", self.id3v1_range),
        ])
    }

    pub fn into_store(self) -> S {
        self.file.into_inner()
    }
}

/// Copy what `id3v2` holds into `xiph` without overwriting anything:
/// the basic fields, every other property and the pictures
fn fold_id3v2(id3v2: &Id3v2Tag, xiph: &mut XiphComment) {
    duplicate(id3v2, xiph, false);

    let mut properties = xiph.properties();
    for (key, values) in id3v2.properties().iter() {
        if !properties.contains_key(key) {
            properties.replace(key, values.iter().cloned());
        }
    }
    let rejected = xiph.set_properties(&properties);
    if !rejected.is_empty() {
        log::debug!("ID3v2 properties not folded: {}", rejected);
    }

    if xiph.pictures().is_empty() {
        let pictures = id3v2.complex_properties(PICTURE_KEY);
        if !pictures.is_empty() {
            xiph.set_complex_properties(PICTURE_KEY, &pictures);
        }
    }
}

impl<S: ByteStore> AudioFile for FlacFile<S> {
    fn format_name(&self) -> &'static str {
        "FLAC"
    }

    fn is_valid(&self) -> bool {
        FlacFile::is_valid(self)
    }

    fn tag(&mut self) -> TagUnion<'_> {
        FlacFile::tag(self)
    }

    fn tag_view(&self) -> TagView<'_> {
        FlacFile::tag_view(self)
    }

    fn supported_tags(&self) -> &'static [TagKind] {
        &[TagKind::Xiph, TagKind::Id3v2, TagKind::Id3v1]
    }

    fn present_tags(&self) -> Vec<TagKind> {
        let mut kinds = Vec::new();
        if self.xiph.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Xiph);
        }
        if self.id3v2.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Id3v2);
        }
        if self.id3v1.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Id3v1);
        }
        kinds
    }

    fn save(&mut self) -> Result<()> {
        FlacFile::save(self)
    }

    fn strip(&mut self, kinds: &[TagKind]) -> Result<()> {
        FlacFile::strip(self, kinds)
    }

    fn ranges(&self) -> Vec<NamedRange> {
        FlacFile::ranges(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::id3v2::Frame;
    use crate::property_map::PropertyMap;
    use crate::stream::MemoryStream;

    pub(crate) const AUDIO: &[u8] = &[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x11, 0x22, 0x33];

    /// `fLaC`, STREAMINFO, `padding` bytes of padding, then audio
    pub(crate) fn stream(padding: usize) -> Vec<u8> {
        let mut data = FLAC_ID.to_vec();
        let last = if padding == 0 { 0x80 } else { 0 };
        data.extend_from_slice(&[STREAMINFO | last, 0, 0, 34]);
        data.extend_from_slice(&[0x10; 34]);
        if padding > 0 {
            data.push(PADDING | 0x80);
            data.extend_from_slice(&(padding as u32).to_be_bytes()[1..]);
            data.extend(std::iter::repeat(0).take(padding));
        }
        data.extend_from_slice(AUDIO);
        data
    }

    fn open(data: Vec<u8>) -> FlacFile<MemoryStream> {
        FlacFile::new(MemoryStream::new(data), &TagOptions::default()).unwrap()
    }

    fn audio_of(data: &[u8]) -> &[u8] {
        &data[data.len() - AUDIO.len()..]
    }

    #[test]
    fn test_scan() {
        let flac = open(stream(100));
        assert!(flac.is_valid());
        assert_eq!(flac.metadata_blocks().len(), 1);
        assert_eq!(flac.metadata_blocks()[0].block_type, STREAMINFO);
        assert_eq!(flac.metadata_range, Some(ByteRange::new(4, 38 + 104)));
        assert!(flac.tag_view().is_empty());
    }

    #[test]
    fn test_not_flac() {
        let mut flac = open(b"OggS\0\x02".to_vec());
        assert!(!flac.is_valid());
        assert!(flac.xiph_comment(true).is_none());
        assert!(flac.save().is_err());

        let mut bad_first = FLAC_ID.to_vec();
        bad_first.extend_from_slice(&[0x84, 0, 0, 0]);
        assert!(!open(bad_first).is_valid());
    }

    #[test]
    fn test_padding_absorbs_growth() {
        let original = stream(1000);
        let mut flac = open(original.clone());
        flac.tag().set_title("Padded");
        flac.save().unwrap();

        let data = flac.into_store().into_inner();
        assert_eq!(data.len(), original.len());
        assert_eq!(audio_of(&data), AUDIO);
        let reopened = open(data);
        assert_eq!(reopened.tag_view().title(), "Padded");
    }

    #[test]
    fn test_new_padding_when_none_fits() {
        let mut flac = open(stream(0));
        flac.tag().set_artist("Someone");
        flac.save().unwrap();

        let data = flac.into_store().into_inner();
        assert_eq!(audio_of(&data), AUDIO);
        let reopened = open(data);
        assert_eq!(reopened.tag_view().artist(), "Someone");
        let meta = reopened.metadata_range.unwrap();
        assert!(meta.length > TagOptions::default().flac_padding as u64);
    }

    #[test]
    fn test_pictures_as_blocks() {
        let mut flac = open(stream(10));
        let cover = Picture::front_cover(vec![0x89, b'P', b'N', b'G', 1, 2]);
        assert!(flac.set_complex_properties(PICTURE_KEY, &[cover.to_variant_map()]));
        flac.save().unwrap();

        let reopened = open(flac.into_store().into_inner());
        assert_eq!(reopened.pictures(), [cover.clone()]);
        let records = reopened.complex_properties("PICTURE");
        assert_eq!(records.len(), 1);
        assert_eq!(Picture::from_variant_map(&records[0]), Some(cover));
    }

    #[test]
    fn test_id3v2_folded_and_removed() {
        let mut id3 = Id3v2Tag::new();
        id3.add_frame(Frame::Text {
            id: "TIT2".into(),
            values: vec!["From ID3".into()],
        });
        let mut data = id3.render(&TagOptions::default()).unwrap();
        data.extend(stream(50));

        let mut flac = open(data);
        assert_eq!(flac.tag_view().title(), "From ID3");
        flac.save().unwrap();

        let data = flac.into_store().into_inner();
        assert!(data.starts_with(FLAC_ID));
        let reopened = open(data);
        assert_eq!(reopened.tag_view().title(), "From ID3");
        assert_eq!(reopened.present_tags(), [TagKind::Xiph]);
    }

    #[test]
    fn test_id3v2_extras_folded() {
        let mut id3 = Id3v2Tag::new();
        let mut props = PropertyMap::new();
        props.insert("TITLE", ["Main"]);
        props.insert("SESSION", ["CAT-7"]);
        assert!(id3.set_properties(&props).is_empty());
        let cover = Picture::front_cover(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2]);
        assert!(id3.set_complex_properties(PICTURE_KEY, &[cover.to_variant_map()]));
        let mut data = id3.render(&TagOptions::default()).unwrap();
        data.extend(stream(50));

        let mut flac = open(data);
        flac.xiph_comment(true).unwrap().set_title("Kept");
        flac.save().unwrap();

        let reopened = open(flac.into_store().into_inner());
        assert_eq!(reopened.present_tags(), [TagKind::Xiph]);
        assert_eq!(reopened.tag_view().title(), "Kept");
        let props = reopened.tag_view().properties();
        assert_eq!(props.get("SESSION"), Some(&["CAT-7".to_string()][..]));
        assert_eq!(reopened.pictures(), [cover]);
    }

    #[test]
    fn test_failed_save_leaves_file() {
        let mut id3 = Id3v2Tag::new();
        id3.add_frame(Frame::Text {
            id: "TIT2".into(),
            values: vec!["Safe".into()],
        });
        let mut data = id3.render(&TagOptions::default()).unwrap();
        data.extend(stream(50));

        let mut flac = open(data.clone());
        let huge = Picture::front_cover(vec![0; MAX_BLOCK_SIZE + 1]);
        assert!(flac.set_complex_properties(PICTURE_KEY, &[huge.to_variant_map()]));
        assert!(flac.save().is_err());
        assert_eq!(flac.into_store().into_inner(), data);
    }

    #[test]
    fn test_strip_xiph() {
        let mut flac = open(stream(0));
        flac.tag().set_album("A");
        flac.save().unwrap();
        flac.strip(&[TagKind::Xiph]).unwrap();
        let data = flac.into_store().into_inner();
        assert_eq!(audio_of(&data), AUDIO);
        assert!(open(data).tag_view().is_empty());
    }
}
