//! Binary surgery on a byte store
//!
//! [`BinaryFile`] wraps a [`ByteStore`] and adds the operations every tag
//! writer needs: windowed pattern search in both directions, and a single
//! `insert` primitive that replaces a byte range with a block of a different
//! size while keeping everything around it intact.
//!
//! Only the bytes after the edited range are moved, in bounded chunks, so a
//! trailer tag edit touches a few hundred bytes and a header tag edit never
//! needs the whole audio payload in memory.

use crate::stream::ByteStore;
use anyhow::{bail, Context, Result};
use std::io::{Read, SeekFrom, Write};

/// Window size used by `find` and `rfind`
pub const BUFFER_SIZE: usize = 1024;

/// Chunk size used when shifting the tail of the store
const MOVE_CHUNK_SIZE: usize = 64 * 1024;

/// A contiguous region of the store: `(offset, length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Move this range to account for an edit that replaced `old_len` bytes
    /// at `at` with `new_len` bytes. Ranges before the edit are unchanged; a
    /// range starting exactly at a pure insertion point moves with the data
    /// after it.
    pub fn shift_after_edit(&mut self, at: u64, old_len: u64, new_len: u64) {
        if self.offset >= at + old_len {
            self.offset = self.offset + new_len - old_len;
        }
    }
}

/// Shift an optional range, see [`ByteRange::shift_after_edit`]
pub fn shift_range(range: &mut Option<ByteRange>, at: u64, old_len: u64, new_len: u64) {
    if let Some(r) = range.as_mut() {
        r.shift_after_edit(at, old_len, new_len);
    }
}

/// A byte store plus the search and splice operations tag writers use
#[derive(Debug)]
pub struct BinaryFile<S: ByteStore> {
    store: S,
    valid: bool,
}

impl<S: ByteStore> BinaryFile<S> {
    pub fn new(store: S) -> Self {
        Self { store, valid: true }
    }

    /// `false` once a scan found the file structurally broken
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    pub fn name(&self) -> String {
        self.store.name()
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.store.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.store.stream_position()?)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.store.seek(pos)?)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    // =========================================================================
    // Block I/O
    // =========================================================================

    /// Read up to `len` bytes from the current position; the result is shorter
    /// only when the end of the store is reached
    pub fn read_block(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(MOVE_CHUNK_SIZE));
        (&mut self.store)
            .take(len as u64)
            .read_to_end(&mut buf)
            .with_context(|| format!("Failed to read from: {}", self.store.name()))?;
        Ok(buf)
    }

    pub fn read_block_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.store.seek(SeekFrom::Start(offset))?;
        self.read_block(len)
    }

    pub fn write_block(&mut self, data: &[u8]) -> Result<()> {
        if self.store.is_read_only() {
            bail!("{} is read-only", self.store.name());
        }
        self.store
            .write_all(data)
            .with_context(|| format!("Failed to write: {}", self.store.name()))
    }

    pub fn write_block_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.store.seek(SeekFrom::Start(offset))?;
        self.write_block(data)
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Offset of the first `pattern` at or after `from`.
    ///
    /// With `before`, the match only counts if no `before` occurs ahead of it.
    pub fn find(&mut self, pattern: &[u8], from: u64, before: Option<&[u8]>) -> Option<u64> {
        match self.try_find(pattern, from, before) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("{}: find failed: {:#}", self.store.name(), e);
                None
            }
        }
    }

    fn try_find(&mut self, pattern: &[u8], from: u64, before: Option<&[u8]>) -> Result<Option<u64>> {
        if pattern.is_empty() {
            return Ok(None);
        }

        let before = before.filter(|b| !b.is_empty());
        let overlap = pattern.len().max(before.map_or(0, |b| b.len())) - 1;

        let mut carry: Vec<u8> = Vec::new();
        let mut window_start = from;

        loop {
            let window = self.read_block_at(window_start, BUFFER_SIZE)?;
            if window.is_empty() {
                return Ok(None);
            }

            let base = window_start - carry.len() as u64;
            let mut buffer = std::mem::take(&mut carry);
            buffer.extend_from_slice(&window);

            let hit = find_in(&buffer, pattern);
            let stop = before.and_then(|b| find_in(&buffer, b));

            match (hit, stop) {
                (Some(p), Some(b)) if b < p => return Ok(None),
                (Some(p), _) => return Ok(Some(base + p as u64)),
                (None, Some(_)) => return Ok(None),
                (None, None) => {}
            }

            window_start += window.len() as u64;
            let keep = overlap.min(buffer.len());
            carry = buffer[buffer.len() - keep..].to_vec();
        }
    }

    /// Offset of the last `pattern` that starts at or before `from` (default:
    /// the end of the store), scanning backwards.
    ///
    /// With `before`, the match only counts if no `before` occurs after it.
    pub fn rfind(
        &mut self,
        pattern: &[u8],
        from: Option<u64>,
        before: Option<&[u8]>,
    ) -> Option<u64> {
        match self.try_rfind(pattern, from, before) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("{}: rfind failed: {:#}", self.store.name(), e);
                None
            }
        }
    }

    fn try_rfind(
        &mut self,
        pattern: &[u8],
        from: Option<u64>,
        before: Option<&[u8]>,
    ) -> Result<Option<u64>> {
        if pattern.is_empty() {
            return Ok(None);
        }

        let len = self.len()?;
        let before = before.filter(|b| !b.is_empty());
        let overlap = pattern.len().max(before.map_or(0, |b| b.len())) - 1;

        let mut window_end = match from {
            Some(from) => len.min(from.saturating_add(pattern.len() as u64)),
            None => len,
        };

        let mut carry: Vec<u8> = Vec::new();

        while window_end > 0 {
            let window_start = window_end.saturating_sub(BUFFER_SIZE as u64);
            let mut buffer = self.read_block_at(window_start, (window_end - window_start) as usize)?;
            buffer.extend_from_slice(&carry);

            let hit = rfind_in(&buffer, pattern);
            let stop = before.and_then(|b| rfind_in(&buffer, b));

            match (hit, stop) {
                (Some(p), Some(b)) if b > p => return Ok(None),
                (Some(p), _) => return Ok(Some(window_start + p as u64)),
                (None, Some(_)) => return Ok(None),
                (None, None) => {}
            }

            let keep = overlap.min(buffer.len());
            carry = buffer[..keep].to_vec();
            window_end = window_start;
        }

        Ok(None)
    }

    // =========================================================================
    // Splicing
    // =========================================================================

    /// Replace `replace` bytes at `at` with `data`.
    ///
    /// `replace == 0` inserts, `data.len() == replace` overwrites in place and
    /// an empty `data` removes. Bytes after the edited range move by
    /// `data.len() - replace`.
    pub fn insert(&mut self, data: &[u8], at: u64, replace: u64) -> Result<()> {
        if self.store.is_read_only() {
            log::warn!("{}: refusing to write a read-only store", self.store.name());
            bail!("{} is read-only", self.store.name());
        }

        let len = self.len()?;
        if at > len {
            bail!("insert offset {} is past the end of the store ({})", at, len);
        }

        let replace = replace.min(len - at);
        let new_len = data.len() as u64;
        let tail_start = at + replace;

        if new_len > replace {
            let delta = new_len - replace;
            self.move_tail_back(tail_start, len, delta)?;
            self.write_block_at(at, data)?;
        } else if new_len < replace {
            let delta = replace - new_len;
            self.write_block_at(at, data)?;
            self.move_tail_forward(tail_start, len, delta)?;
            self.store
                .truncate(len - delta)
                .with_context(|| format!("Failed to truncate: {}", self.store.name()))?;
        } else {
            self.write_block_at(at, data)?;
        }

        self.store.flush()?;
        log::debug!(
            "{}: replaced {} bytes at {} with {} bytes",
            self.store.name(),
            replace,
            at,
            new_len
        );
        Ok(())
    }

    /// Remove `len` bytes at `at`
    pub fn remove_block(&mut self, at: u64, len: u64) -> Result<()> {
        self.insert(&[], at, len)
    }

    pub fn truncate(&mut self, len: u64) -> Result<()> {
        if self.store.is_read_only() {
            bail!("{} is read-only", self.store.name());
        }
        self.store
            .truncate(len)
            .with_context(|| format!("Failed to truncate: {}", self.store.name()))
    }

    /// Move `[start, end)` to `start + delta`, copying from the back so the
    /// source is never overwritten before it is read
    fn move_tail_back(&mut self, start: u64, end: u64, delta: u64) -> Result<()> {
        let mut pos = end;
        while pos > start {
            let chunk_start = pos.saturating_sub(MOVE_CHUNK_SIZE as u64).max(start);
            let chunk = self.read_exact_at(chunk_start, (pos - chunk_start) as usize)?;
            self.write_block_at(chunk_start + delta, &chunk)?;
            pos = chunk_start;
        }
        Ok(())
    }

    /// Move `[start, end)` to `start - delta`, copying from the front
    fn move_tail_forward(&mut self, start: u64, end: u64, delta: u64) -> Result<()> {
        let mut pos = start;
        while pos < end {
            let chunk_end = (pos + MOVE_CHUNK_SIZE as u64).min(end);
            let chunk = self.read_exact_at(pos, (chunk_end - pos) as usize)?;
            self.write_block_at(pos - delta, &chunk)?;
            pos = chunk_end;
        }
        Ok(())
    }

    fn read_exact_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let block = self.read_block_at(offset, len)?;
        if block.len() != len {
            bail!(
                "{}: short read at {} ({} of {} bytes)",
                self.store.name(),
                offset,
                block.len(),
                len
            );
        }
        Ok(block)
    }
}

/// First index of `needle` in `haystack`
pub fn find_in(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Last index of `needle` in `haystack`
pub fn rfind_in(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
