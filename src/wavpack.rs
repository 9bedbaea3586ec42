//! WavPack files
//!
//! Audio is a run of `wvpk` blocks. Tags live at the end: APE, optionally
//! followed by an ID3v1 trailer. APE takes precedence.

use crate::ape::ApeTag;
use crate::file::{
    check_writable, named_ranges, slot, slot_mut, splice, AudioFile, NamedRange, TagKind,
};
use crate::id3v1::{Id3v1Tag, ID3V1_ID, ID3V1_SIZE};
use crate::mpeg::find_ape;
use crate::options::TagOptions;
use crate::stream::{ByteStore, FileStream};
use crate::surgery::{BinaryFile, ByteRange};
use crate::tag::Tag;
use crate::union::{TagUnion, TagView};
use anyhow::Result;
use std::path::Path;

pub const WAVPACK_ID: &[u8; 4] = b"wvpk";

/// Size of a block header, `ckSize` counts the bytes after the first eight
const BLOCK_HEADER_SIZE: u64 = 32;

/// A WavPack file
pub struct WavPackFile<S: ByteStore> {
    file: BinaryFile<S>,
    options: TagOptions,
    ape: Option<ApeTag>,
    ape_range: Option<ByteRange>,
    /// An APE tag on disk that could not be parsed
    ape_unreadable: bool,
    id3v1: Option<Id3v1Tag>,
    id3v1_range: Option<ByteRange>,
    audio_end: u64,
}

impl WavPackFile<FileStream> {
    pub fn open(path: &Path, options: &TagOptions) -> Result<Self> {
        Self::new(FileStream::open(path)?, options)
    }
}

impl<S: ByteStore> WavPackFile<S> {
    pub fn new(store: S, options: &TagOptions) -> Result<Self> {
        let mut wv = Self {
            file: BinaryFile::new(store),
            options: options.clone(),
            ape: None,
            ape_range: None,
            ape_unreadable: false,
            id3v1: None,
            id3v1_range: None,
            audio_end: 0,
        };
        wv.scan()?;
        Ok(wv)
    }

    fn scan(&mut self) -> Result<()> {
        let len = self.file.len()?;
        let head = self.file.read_block_at(0, BLOCK_HEADER_SIZE as usize)?;
        if head.len() < BLOCK_HEADER_SIZE as usize || !head.starts_with(WAVPACK_ID) {
            log::warn!("{}: no WavPack block header", self.file.name());
            self.file.set_valid(false);
            return Ok(());
        }

        let mut trailer_start = len;
        if len >= ID3V1_SIZE + BLOCK_HEADER_SIZE {
            let data = self.file.read_block_at(len - ID3V1_SIZE, ID3V1_SIZE as usize)?;
            if data.starts_with(ID3V1_ID) {
                trailer_start = len - ID3V1_SIZE;
                self.id3v1_range = Some(ByteRange::new(trailer_start, ID3V1_SIZE));
                self.id3v1 = Id3v1Tag::parse(&data, self.options.id3v1_encoding).ok();
            }
        }

        if let Some((range, tag)) = find_ape(&mut self.file, trailer_start, BLOCK_HEADER_SIZE)? {
            self.ape_range = Some(range);
            self.ape_unreadable = tag.is_none();
            self.ape = tag;
            trailer_start = range.offset;
        }
        self.audio_end = trailer_start;

        let block_size = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as u64 + 8;
        if block_size < BLOCK_HEADER_SIZE || block_size > self.audio_end {
            log::warn!(
                "{}: first block of {} bytes runs past the audio end at {}",
                self.file.name(),
                block_size,
                self.audio_end
            );
            self.file.set_valid(false);
            self.ape = None;
            self.id3v1 = None;
            return Ok(());
        }
        log::debug!(
            "{}: first block {} bytes, audio ends at {}",
            self.file.name(),
            block_size,
            self.audio_end
        );

        if self.ape.is_none() {
            self.ape = Some(ApeTag::new());
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_valid()
    }

    pub fn ape_tag(&mut self, create: bool) -> Option<&mut ApeTag> {
        if create && self.is_valid() && self.ape.is_none() {
            self.ape = Some(ApeTag::new());
        }
        self.ape.as_mut()
    }

    pub fn id3v1_tag(&mut self, create: bool) -> Option<&mut Id3v1Tag> {
        if create && self.is_valid() && self.id3v1.is_none() {
            self.id3v1 = Some(Id3v1Tag::new(self.options.id3v1_encoding));
        }
        self.id3v1.as_mut()
    }

    pub fn tag(&mut self) -> TagUnion<'_> {
        TagUnion::new(vec![slot_mut(&mut self.ape), slot_mut(&mut self.id3v1)])
    }

    pub fn tag_view(&self) -> TagView<'_> {
        TagView::new(vec![slot(&self.ape), slot(&self.id3v1)])
    }

    /// Write APE, then ID3v1
    pub fn save(&mut self) -> Result<()> {
        check_writable(&self.file)?;

        // An unreadable tag stays until something replaces it
        let rendered = self.ape.as_ref().map(ApeTag::render).unwrap_or_default();
        if !(rendered.is_empty() && self.ape_unreadable) {
            let insert_at = self.id3v1_range.map_or(self.audio_end, |r| r.offset);
            if let Some(edit) = splice(&mut self.file, self.ape_range, insert_at, &rendered)? {
                edit.shift(&mut self.id3v1_range);
                self.ape_range = edit.range();
                self.ape_unreadable = false;
            }
        }

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
        if kinds.contains(&TagKind::Ape) {
            if let Some(edit) = splice(&mut self.file, self.ape_range, 0, &[])? {
                edit.shift(&mut self.id3v1_range);
            }
            self.ape_range = None;
            self.ape_unreadable = false;
            self.ape = None;
        }
        if kinds.contains(&TagKind::Id3v1) {
            splice(&mut self.file, self.id3v1_range, 0, &[])?;
            self.id3v1_range = None;
            self.id3v1 = None;
        }
        Ok(())
    }

    pub fn ranges(&self) -> Vec<NamedRange> {
        let audio = self.is_valid().then(|| ByteRange::new(0, self.audio_end));
        named_ranges(&[
            ("audio", audio),
            ("APE", self.ape_range),
            ("ID3v1", self.id3v1_range),
        ])
    }

    pub fn into_store(self) -> S {
        self.file.into_inner()
    }
}

impl<S: ByteStore> AudioFile for WavPackFile<S> {
    fn format_name(&self) -> &'static str {
        "WavPack"
    }

    fn is_valid(&self) -> bool {
        WavPackFile::is_valid(self)
    }

    fn tag(&mut self) -> TagUnion<'_> {
        WavPackFile::tag(self)
    }

    fn tag_view(&self) -> TagView<'_> {
        WavPackFile::tag_view(self)
    }

    fn supported_tags(&self) -> &'static [TagKind] {
        &[TagKind::Ape, TagKind::Id3v1]
    }

    fn present_tags(&self) -> Vec<TagKind> {
        let mut kinds = Vec::new();
        if self.ape.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Ape);
        }
        if self.id3v1.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Id3v1);
        }
        kinds
    }

    fn save(&mut self) -> Result<()> {
        WavPackFile::save(self)
    }

    fn strip(&mut self, kinds: &[TagKind]) -> Result<()> {
        WavPackFile::strip(self, kinds)
    }

    fn ranges(&self) -> Vec<NamedRange> {
        WavPackFile::ranges(self)
    }
}
