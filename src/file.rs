//! Behaviour shared by the format orchestrators
//!
//! Every orchestrator owns its sub-tags in `Option` slots and remembers the
//! byte range each one occupied on disk. Saving walks the sub-tags in a
//! fixed order, header tags first, and after each edit shifts the ranges
//! that lie behind it. [`splice`] is that single step.

use crate::property_map::PropertyMap;
use crate::stream::ByteStore;
use crate::surgery::{shift_range, BinaryFile, ByteRange};
use crate::tag::Tag;
use crate::union::{TagUnion, TagView};
use crate::variant::VariantMap;
use anyhow::{bail, Result};
use serde::Serialize;
use std::fmt;

/// Tag dialects a file can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TagKind {
    Id3v1,
    Id3v2,
    Ape,
    Xiph,
    Mp4,
}

impl TagKind {
    pub const ALL: [TagKind; 5] = [
        TagKind::Id3v1,
        TagKind::Id3v2,
        TagKind::Ape,
        TagKind::Xiph,
        TagKind::Mp4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Id3v1 => "ID3v1",
            TagKind::Id3v2 => "ID3v2",
            TagKind::Ape => "APE",
            TagKind::Xiph => "Xiph",
            TagKind::Mp4 => "MP4",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A region of a file, named for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NamedRange {
    pub name: &'static str,
    #[serde(flatten)]
    pub range: ByteRange,
}

/// Collect the ranges that are present
pub fn named_ranges(ranges: &[(&'static str, Option<ByteRange>)]) -> Vec<NamedRange> {
    ranges
        .iter()
        .filter_map(|(name, range)| range.map(|range| NamedRange { name: *name, range }))
        .collect()
}

/// An edit made by [`splice`]: `old_len` bytes at `at` became `new_len`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub at: u64,
    pub old_len: u64,
    pub new_len: u64,
}

impl Edit {
    /// Move a range that lies behind this edit
    pub fn shift(&self, range: &mut Option<ByteRange>) {
        shift_range(range, self.at, self.old_len, self.new_len);
    }

    pub fn shift_offset(&self, offset: &mut Option<u64>) {
        if let Some(o) = offset.as_mut() {
            if *o >= self.at + self.old_len {
                *o = *o + self.new_len - self.old_len;
            }
        }
    }

    /// Where the written block now lives, `None` after a removal
    pub fn range(&self) -> Option<ByteRange> {
        (self.new_len > 0).then(|| ByteRange::new(self.at, self.new_len))
    }
}

/// Write one rendered sub-tag.
///
/// - an existing range is replaced by `rendered` (removed when it is empty);
/// - without a range, a non-empty `rendered` is inserted at `insert_at`;
/// - nothing on disk and nothing to write is a no-op.
pub fn splice<S: ByteStore>(
    file: &mut BinaryFile<S>,
    existing: Option<ByteRange>,
    insert_at: u64,
    rendered: &[u8],
) -> Result<Option<Edit>> {
    let edit = match existing {
        Some(range) => Edit {
            at: range.offset,
            old_len: range.length,
            new_len: rendered.len() as u64,
        },
        None if rendered.is_empty() => return Ok(None),
        None => Edit {
            at: insert_at,
            old_len: 0,
            new_len: rendered.len() as u64,
        },
    };
    if edit.old_len == edit.new_len && edit.new_len > 0 {
        let current = file.read_block_at(edit.at, edit.old_len as usize)?;
        if current == rendered {
            return Ok(Some(edit));
        }
    }
    file.insert(rendered, edit.at, edit.old_len)?;
    Ok(Some(edit))
}

/// Refuse to save files that failed their scan or cannot be written
pub fn check_writable<S: ByteStore>(file: &BinaryFile<S>) -> Result<()> {
    if !file.is_valid() {
        bail!("{}: not a valid file, refusing to save", file.name());
    }
    if file.is_read_only() {
        log::warn!("{}: opened read-only, cannot save", file.name());
        bail!("{} is read-only", file.name());
    }
    Ok(())
}

/// Present a concrete slot to a [`TagUnion`]
pub fn slot_mut<T: Tag>(tag: &mut Option<T>) -> Option<&mut dyn Tag> {
    tag.as_mut().map(|t| t as &mut dyn Tag)
}

/// Present a concrete slot to a [`TagView`]
pub fn slot<T: Tag>(tag: &Option<T>) -> Option<&dyn Tag> {
    tag.as_ref().map(|t| t as &dyn Tag)
}

/// The operations every format orchestrator offers
pub trait AudioFile {
    /// Short format name, e.g. `"MPEG"`
    fn format_name(&self) -> &'static str;

    /// `false` when the scan did not find the format's stream marker
    fn is_valid(&self) -> bool;

    /// Read-write view over every sub-tag present
    fn tag(&mut self) -> TagUnion<'_>;

    /// Read-only view over every sub-tag present
    fn tag_view(&self) -> TagView<'_>;

    /// Kinds of tag this format can hold
    fn supported_tags(&self) -> &'static [TagKind];

    /// Kinds of tag currently present in memory
    fn present_tags(&self) -> Vec<TagKind>;

    /// Write every sub-tag back to the store
    fn save(&mut self) -> Result<()>;

    /// Remove the given sub-tags from the store and from memory
    fn strip(&mut self, kinds: &[TagKind]) -> Result<()>;

    /// Current on-disk ranges of the sub-tags and the audio
    fn ranges(&self) -> Vec<NamedRange>;

    fn properties(&self) -> PropertyMap {
        self.tag_view().properties()
    }

    /// Store `properties`, returning what no sub-tag could hold
    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        self.tag().set_properties(properties)
    }

    fn remove_unsupported_properties(&mut self, ids: &[String]) {
        self.tag().remove_unsupported_properties(ids);
    }

    fn complex_property_keys(&self) -> Vec<String> {
        self.tag_view().complex_property_keys()
    }

    fn complex_properties(&self, key: &str) -> Vec<VariantMap> {
        self.tag_view().complex_properties(key)
    }

    fn set_complex_properties(&mut self, key: &str, values: &[VariantMap]) -> bool {
        self.tag().set_complex_properties(key, values)
    }
}
