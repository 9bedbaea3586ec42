//! MPEG audio files (MP3, MP2)
//!
//! Sub-tags: ID3v2 at the start, APE and ID3v1 at the end, read in that
//! order of precedence. The stream marker is a valid MPEG audio frame
//! header after any ID3v2 tag.

use crate::ape::{ApeFooter, ApeTag, APE_FOOTER_SIZE};
use crate::file::{
    check_writable, named_ranges, slot, slot_mut, splice, AudioFile, NamedRange, TagKind,
};
use crate::id3v1::{Id3v1Tag, ID3V1_ID, ID3V1_SIZE};
use crate::id3v2::{Id3v2Header, Id3v2Tag, ID3V2_HEADER_SIZE};
use crate::options::{ReadStyle, TagOptions};
use crate::stream::{ByteStore, FileStream};
use crate::surgery::{BinaryFile, ByteRange};
use crate::tag::Tag;
use crate::union::{TagUnion, TagView};
use anyhow::Result;
use std::path::Path;

/// How far past the ID3v2 tag the first frame is looked for
const SYNC_SEARCH_LIMIT: u64 = 64 * 1024;

// =============================================================================
// Frame header
// =============================================================================

/// MPEG version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

impl MpegVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            MpegVersion::Mpeg1 => "MPEG1",
            MpegVersion::Mpeg2 => "MPEG2",
            MpegVersion::Mpeg25 => "MPEG2.5",
        }
    }
}

/// Parsed MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: u8,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub frame_size: usize,
}

impl FrameHeader {
    /// Whether `other` could belong to the same stream
    fn matches(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate == other.sample_rate
    }
}

/// Bitrate tables, indexed by `[version is MPEG1][layer - 1]`
const BITRATE_TABLE: [[[u32; 15]; 3]; 2] = [
    // MPEG2/2.5
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    ],
    // MPEG1
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
    ],
];

/// Sample rate table
const SAMPLE_RATE_TABLE: [[u32; 3]; 3] = [
    [44100, 48000, 32000], // MPEG1
    [22050, 24000, 16000], // MPEG2
    [11025, 12000, 8000],  // MPEG2.5
];

/// Parse a 4-byte frame header
pub fn parse_header(header: &[u8]) -> Option<FrameHeader> {
    if header.len() < 4 {
        return None;
    }

    // Check sync word (11 bits: 0xFF + upper 3 bits of second byte)
    if header[0] != 0xFF || (header[1] & 0xE0) != 0xE0 {
        return None;
    }

    // MPEG version (bits 4-3 of byte 1)
    let version = match (header[1] >> 3) & 0x03 {
        0b00 => MpegVersion::Mpeg25,
        0b10 => MpegVersion::Mpeg2,
        0b11 => MpegVersion::Mpeg1,
        _ => return None,
    };

    // Layer (bits 2-1 of byte 1)
    let layer = match (header[1] >> 1) & 0x03 {
        0b11 => 1,
        0b10 => 2,
        0b01 => 3,
        _ => return None,
    };

    // Bitrate index (bits 7-4 of byte 2); free format is not located
    let bitrate_index = ((header[2] >> 4) & 0x0F) as usize;
    if bitrate_index == 0 || bitrate_index == 15 {
        return None;
    }
    let is_mpeg1 = (version == MpegVersion::Mpeg1) as usize;
    let bitrate_kbps = BITRATE_TABLE[is_mpeg1][layer as usize - 1][bitrate_index];

    // Sample rate index (bits 3-2 of byte 2)
    let sr_index = ((header[2] >> 2) & 0x03) as usize;
    if sr_index == 3 {
        return None;
    }
    let version_index = match version {
        MpegVersion::Mpeg1 => 0,
        MpegVersion::Mpeg2 => 1,
        MpegVersion::Mpeg25 => 2,
    };
    let sample_rate = SAMPLE_RATE_TABLE[version_index][sr_index];

    // Padding (bit 1 of byte 2)
    let padding = (header[2] & 0x02) != 0;

    let frame_size = match layer {
        1 => (12 * bitrate_kbps as usize * 1000 / sample_rate as usize + padding as usize) * 4,
        _ => {
            let samples_per_frame = match (layer, version) {
                (3, MpegVersion::Mpeg2 | MpegVersion::Mpeg25) => 576,
                _ => 1152,
            };
            (samples_per_frame * bitrate_kbps as usize * 125) / sample_rate as usize
                + padding as usize
        }
    };

    Some(FrameHeader {
        version,
        layer,
        bitrate_kbps,
        sample_rate,
        padding,
        frame_size,
    })
}

// =============================================================================
// File
// =============================================================================

/// An MPEG audio file
pub struct MpegFile<S: ByteStore> {
    file: BinaryFile<S>,
    options: TagOptions,
    id3v2: Option<Id3v2Tag>,
    id3v2_range: Option<ByteRange>,
    /// An ID3v2 tag on disk that could not be parsed, e.g. v2.2
    id3v2_unreadable: bool,
    ape: Option<ApeTag>,
    ape_range: Option<ByteRange>,
    /// An APE tag on disk that could not be parsed
    ape_unreadable: bool,
    id3v1: Option<Id3v1Tag>,
    id3v1_range: Option<ByteRange>,
    first_frame: Option<u64>,
    header: Option<FrameHeader>,
}

impl MpegFile<FileStream> {
    pub fn open(path: &Path, options: &TagOptions) -> Result<Self> {
        Self::new(FileStream::open(path)?, options)
    }
}

impl<S: ByteStore> MpegFile<S> {
    /// Scan `store` for tags and the first audio frame
    pub fn new(store: S, options: &TagOptions) -> Result<Self> {
        let mut mpeg = Self {
            file: BinaryFile::new(store),
            options: options.clone(),
            id3v2: None,
            id3v2_range: None,
            id3v2_unreadable: false,
            ape: None,
            ape_range: None,
            ape_unreadable: false,
            id3v1: None,
            id3v1_range: None,
            first_frame: None,
            header: None,
        };
        mpeg.scan()?;
        Ok(mpeg)
    }

    fn scan(&mut self) -> Result<()> {
        let len = self.file.len()?;

        // ID3v2 at the start
        let head = self.file.read_block_at(0, ID3V2_HEADER_SIZE as usize)?;
        if let Some(header) = Id3v2Header::parse(&head) {
            let size = header.total_size().min(len);
            self.id3v2_range = Some(ByteRange::new(0, size));
            let data = self.file.read_block_at(0, size as usize)?;
            match Id3v2Tag::parse(&data) {
                Ok(tag) => self.id3v2 = Some(tag),
                Err(e) => {
                    log::warn!("{}: keeping unreadable ID3v2 tag: {:#}", self.file.name(), e);
                    self.id3v2_unreadable = true;
                }
            }
        }

        // ID3v1 at the end
        let mut trailer_start = len;
        if len >= ID3V1_SIZE {
            let data = self.file.read_block_at(len - ID3V1_SIZE, ID3V1_SIZE as usize)?;
            if data.starts_with(ID3V1_ID) {
                trailer_start = len - ID3V1_SIZE;
                self.id3v1_range = Some(ByteRange::new(trailer_start, ID3V1_SIZE));
                self.id3v1 = Id3v1Tag::parse(&data, self.options.id3v1_encoding).ok();
            }
        }

        // APE before ID3v1
        let audio_start = self.id3v2_range.map_or(0, |r| r.end());
        if let Some((range, tag)) = find_ape(&mut self.file, trailer_start, audio_start)? {
            self.ape_range = Some(range);
            self.ape_unreadable = tag.is_none();
            self.ape = tag;
            trailer_start = range.offset;
        }

        // First audio frame
        match self.find_first_frame(audio_start, trailer_start)? {
            Some((offset, header)) => {
                log::debug!(
                    "{}: first {} layer {} frame at {}",
                    self.file.name(),
                    header.version.as_str(),
                    header.layer,
                    offset
                );
                self.first_frame = Some(offset);
                self.header = Some(header);
            }
            None => {
                log::warn!("{}: no MPEG audio frame found", self.file.name());
                self.file.set_valid(false);
                self.id3v2 = None;
                self.ape = None;
                self.id3v1 = None;
                return Ok(());
            }
        }

        // Default tags, written on save if they receive content
        if self.id3v2.is_none() {
            self.id3v2 = Some(Id3v2Tag::new());
        }
        if self.id3v1.is_none() {
            self.id3v1 = Some(Id3v1Tag::new(self.options.id3v1_encoding));
        }
        Ok(())
    }

    /// First offset in `[start, end)` holding a frame header whose successor
    /// is also a frame header, or which runs exactly to `end`
    fn find_first_frame(&mut self, start: u64, end: u64) -> Result<Option<(u64, FrameHeader)>> {
        let limit = end.min(start + SYNC_SEARCH_LIMIT);
        let mut pos = start;
        while pos < limit {
            let Some(candidate) = self.file.find(&[0xFF], pos, None) else {
                return Ok(None);
            };
            if candidate >= limit {
                return Ok(None);
            }
            let bytes = self.file.read_block_at(candidate, 4)?;
            if let Some(header) = parse_header(&bytes) {
                if self.options.read_style == ReadStyle::Fast {
                    return Ok(Some((candidate, header)));
                }
                let next = candidate + header.frame_size as u64;
                if next == end {
                    return Ok(Some((candidate, header)));
                }
                if next + 4 <= end {
                    let following = self.file.read_block_at(next, 4)?;
                    if parse_header(&following).is_some_and(|h| h.matches(&header)) {
                        return Ok(Some((candidate, header)));
                    }
                }
            }
            pos = candidate + 1;
        }
        Ok(None)
    }

    pub fn is_valid(&self) -> bool {
        self.file.is_valid()
    }

    pub fn options(&self) -> &TagOptions {
        &self.options
    }

    /// Header of the first audio frame
    pub fn frame_header(&self) -> Option<FrameHeader> {
        self.header
    }

    /// The ID3v2 tag; with `create`, an empty one is made if absent
    pub fn id3v2_tag(&mut self, create: bool) -> Option<&mut Id3v2Tag> {
        if create && self.is_valid() && self.id3v2.is_none() {
            self.id3v2 = Some(Id3v2Tag::new());
        }
        self.id3v2.as_mut()
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

    /// Union in precedence order ID3v2, APE, ID3v1
    pub fn tag(&mut self) -> TagUnion<'_> {
        TagUnion::new(vec![
            slot_mut(&mut self.id3v2),
            slot_mut(&mut self.ape),
            slot_mut(&mut self.id3v1),
        ])
    }

    pub fn tag_view(&self) -> TagView<'_> {
        TagView::new(vec![slot(&self.id3v2), slot(&self.ape), slot(&self.id3v1)])
    }

    /// Write ID3v2, then APE, then ID3v1. Empty tags are removed from disk.
    pub fn save(&mut self) -> Result<()> {
        check_writable(&self.file)?;

        // ID3v2
        if let Some(tag) = self.id3v2.as_mut() {
            let rendered = tag.render(&self.options)?;
            if !(rendered.is_empty() && self.id3v2_unreadable) {
                if let Some(edit) = splice(&mut self.file, self.id3v2_range, 0, &rendered)? {
                    edit.shift(&mut self.ape_range);
                    edit.shift(&mut self.id3v1_range);
                    edit.shift_offset(&mut self.first_frame);
                    self.id3v2_range = edit.range();
                    self.id3v2_unreadable = false;
                    tag.set_disk_size(rendered.len() as u64);
                }
            }
        }

        // APE, before any ID3v1 trailer
        let rendered = self.ape.as_ref().map(ApeTag::render).unwrap_or_default();
        if !(rendered.is_empty() && self.ape_unreadable) {
            let insert_at = match self.id3v1_range {
                Some(range) => range.offset,
                None => self.file.len()?,
            };
            if let Some(edit) = splice(&mut self.file, self.ape_range, insert_at, &rendered)? {
                edit.shift(&mut self.id3v1_range);
                self.ape_range = edit.range();
                self.ape_unreadable = false;
            }
        }

        // ID3v1 trailer
        let rendered = match &self.id3v1 {
            Some(tag) if !tag.is_empty() => tag.render(),
            _ => Vec::new(),
        };
        let insert_at = self.file.len()?;
        if let Some(edit) = splice(&mut self.file, self.id3v1_range, insert_at, &rendered)? {
            self.id3v1_range = edit.range();
        }

        log::debug!("{}: saved", self.file.name());
        Ok(())
    }

    /// Remove the given tags from the file and from memory
    pub fn strip(&mut self, kinds: &[TagKind]) -> Result<()> {
        check_writable(&self.file)?;

        if kinds.contains(&TagKind::Id3v2) {
            if let Some(edit) = splice(&mut self.file, self.id3v2_range, 0, &[])? {
                edit.shift(&mut self.ape_range);
                edit.shift(&mut self.id3v1_range);
                edit.shift_offset(&mut self.first_frame);
            }
            self.id3v2_range = None;
            self.id3v2_unreadable = false;
            self.id3v2 = None;
        }
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
        let audio = self.first_frame.map(|start| {
            let end = [self.ape_range, self.id3v1_range]
                .iter()
                .flatten()
                .map(|r| r.offset)
                .min()
                .or_else(|| self.file.len().ok())
                .unwrap_or(start);
            ByteRange::new(start, end.saturating_sub(start))
        });
        named_ranges(&[
            ("ID3v2", self.id3v2_range),
            ("audio", audio),
            ("APE", self.ape_range),
            ("ID3v1", self.id3v1_range),
        ])
    }

    pub fn into_store(self) -> S {
        self.file.into_inner()
    }
}

/// Locate an APE tag whose footer ends at `end`, not reaching below `floor`
pub(crate) fn find_ape<S: ByteStore>(
    file: &mut BinaryFile<S>,
    end: u64,
    floor: u64,
) -> Result<Option<(ByteRange, Option<ApeTag>)>> {
    if end < floor + APE_FOOTER_SIZE {
        return Ok(None);
    }
    let footer_bytes = file.read_block_at(end - APE_FOOTER_SIZE, APE_FOOTER_SIZE as usize)?;
    let Some(footer) = ApeFooter::parse(&footer_bytes) else {
        return Ok(None);
    };
    let size = footer.total_size();
    if size > end - floor {
        log::warn!("{}: APE tag size {} is out of bounds", file.name(), size);
        return Ok(None);
    }
    let range = ByteRange::new(end - size, size);
    let data = file.read_block_at(range.offset, size as usize)?;
    let tag = match ApeTag::parse(&data) {
        Ok(tag) => Some(tag),
        Err(e) => {
            log::warn!("{}: unreadable APE tag: {:#}", file.name(), e);
            None
        }
    };
    Ok(Some((range, tag)))
}

impl<S: ByteStore> AudioFile for MpegFile<S> {
    fn format_name(&self) -> &'static str {
        "MPEG"
    }

    fn is_valid(&self) -> bool {
        MpegFile::is_valid(self)
    }

    fn tag(&mut self) -> TagUnion<'_> {
        MpegFile::tag(self)
    }

    fn tag_view(&self) -> TagView<'_> {
        MpegFile::tag_view(self)
    }

    fn supported_tags(&self) -> &'static [TagKind] {
        &[TagKind::Id3v2, TagKind::Ape, TagKind::Id3v1]
    }

    fn present_tags(&self) -> Vec<TagKind> {
        let mut kinds = Vec::new();
        if self.id3v2.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Id3v2);
        }
        if self.ape.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Ape);
        }
        if self.id3v1.as_ref().is_some_and(|t| !t.is_empty()) {
            kinds.push(TagKind::Id3v1);
        }
        kinds
    }

    fn save(&mut self) -> Result<()> {
        MpegFile::save(self)
    }

    fn strip(&mut self, kinds: &[TagKind]) -> Result<()> {
        MpegFile::strip(self, kinds)
    }

    fn ranges(&self) -> Vec<NamedRange> {
        MpegFile::ranges(self)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ape::ApeItem;
    use crate::stream::MemoryStream;

    /// MPEG1 Layer III, 128 kbps, 44.1 kHz, no padding: 417 byte frames
    pub(crate) fn frames(count: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..count {
            data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
            data.extend(std::iter::repeat((i % 251) as u8).take(413));
        }
        data
    }

    fn open(data: Vec<u8>) -> MpegFile<MemoryStream> {
        MpegFile::new(MemoryStream::new(data), &TagOptions::default()).unwrap()
    }

    #[test]
    fn test_parse_valid_header() {
        let header = parse_header(&[0xFF, 0xFB, 0x90, 0x00]).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg1);
        assert_eq!(header.layer, 3);
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.frame_size, 417);

        // MPEG1 Layer II, 192 kbps, 48 kHz
        let header = parse_header(&[0xFF, 0xFD, 0xA4, 0x00]).unwrap();
        assert_eq!(header.layer, 2);
        assert_eq!(header.bitrate_kbps, 192);
        assert_eq!(header.frame_size, 576);
    }

    #[test]
    fn test_parse_invalid_header() {
        assert!(parse_header(&[0x00, 0x00, 0x00, 0x00]).is_none());
        assert!(parse_header(&[0xFF, 0xFB, 0xF0, 0x00]).is_none());
        assert!(parse_header(&[0xFF, 0xFB]).is_none());
    }

    #[test]
    fn test_invalid_file_guard() {
        let mut mpeg = open(vec![0x42; 2000]);
        assert!(!mpeg.is_valid());
        assert_eq!(mpeg.tag().title(), "");
        assert_eq!(mpeg.tag().year(), 0);
        assert!(mpeg.properties().is_empty());
        assert!(mpeg.id3v2_tag(true).is_none());
        assert!(mpeg.save().is_err());
    }

    #[test]
    fn test_set_title_and_save() {
        let audio = frames(5);
        let mut mpeg = open(audio.clone());
        assert!(mpeg.is_valid());
        assert_eq!(mpeg.first_frame, Some(0));

        mpeg.tag().set_title("Hello");
        mpeg.save().unwrap();

        let data = mpeg.into_store().into_inner();
        assert!(data.starts_with(b"ID3"));
        assert_eq!(&data[data.len() - 128..data.len() - 125], b"TAG");

        let reopened = open(data);
        assert_eq!(reopened.tag_view().title(), "Hello");
        let ranges = reopened.ranges();
        let audio_range = ranges.iter().find(|r| r.name == "audio").unwrap().range;
        let data = reopened.into_store().into_inner();
        let start = audio_range.offset as usize;
        assert_eq!(&data[start..start + audio_range.length as usize], &audio[..]);
    }

    #[test]
    fn test_ape_and_id3v1_precedence() {
        let mut ape = ApeTag::new();
        ape.set_item(ApeItem::text("Title", vec!["from ape".into()]));
        let mut v1 = Id3v1Tag::default();
        v1.set_title("from v1");
        v1.set_artist("v1 artist");

        let mut data = frames(3);
        data.extend(ape.render());
        data.extend(v1.render());

        let mut mpeg = open(data);
        assert!(mpeg.ape_range.is_some());
        assert_eq!(mpeg.tag_view().title(), "from ape");
        assert_eq!(mpeg.tag_view().artist(), "v1 artist");

        // Growing the ID3v2 tag moves both trailers
        mpeg.tag().set_album(&"x".repeat(3000));
        mpeg.save().unwrap();
        let reopened = open(mpeg.into_store().into_inner());
        assert_eq!(reopened.tag_view().album(), "x".repeat(3000));
        assert_eq!(reopened.ape.as_ref().unwrap().album(), "x".repeat(3000));
        assert_eq!(reopened.id3v1.as_ref().unwrap().album().len(), 30);
    }

    /// A rendered APE tag whose header and footer claim version 3000
    pub(crate) fn future_ape() -> Vec<u8> {
        let mut ape = ApeTag::new();
        ape.set_item(ApeItem::text("Title", vec!["future".into()]));
        let mut trailer = ape.render();
        let footer = trailer.len() - APE_FOOTER_SIZE as usize;
        for block in [0, footer] {
            trailer[block + 8..block + 12].copy_from_slice(&3000u32.to_le_bytes());
        }
        trailer
    }

    #[test]
    fn test_unreadable_ape_kept() {
        let trailer = future_ape();
        let mut data = frames(3);
        data.extend(&trailer);

        let mut mpeg = open(data);
        assert!(mpeg.ape_range.is_some());
        assert!(mpeg.ape.is_none());
        mpeg.tag().set_title("Hello");
        mpeg.save().unwrap();

        let data = mpeg.into_store().into_inner();
        assert!(data.windows(trailer.len()).any(|w| w == &trailer[..]));
        let reopened = open(data);
        assert_eq!(reopened.tag_view().title(), "Hello");
        assert_eq!(
            reopened.ape_range.map(|r| r.length),
            Some(trailer.len() as u64)
        );
    }

    #[test]
    fn test_strip() {
        let mut mpeg = open(frames(4));
        mpeg.tag().set_title("gone soon");
        mpeg.save().unwrap();
        mpeg.strip(&TagKind::ALL).unwrap();
        assert!(mpeg.id3v2.is_none());
        assert_eq!(mpeg.into_store().into_inner(), frames(4));
    }

    #[test]
    fn test_unchanged_save_is_stable() {
        let mut mpeg = open(frames(4));
        mpeg.tag().set_artist("Band");
        mpeg.save().unwrap();
        let first = mpeg.into_store().into_inner();

        let mut again = open(first.clone());
        again.save().unwrap();
        assert_eq!(again.into_store().into_inner(), first);
    }

    #[test]
    fn test_read_only_save_fails() {
        let mut mpeg =
            MpegFile::new(MemoryStream::read_only(frames(3)), &TagOptions::default()).unwrap();
        mpeg.tag().set_title("nope");
        assert!(mpeg.save().is_err());
        assert_eq!(mpeg.into_store().into_inner(), frames(3));
    }
}
