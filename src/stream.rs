//! Seekable byte stores
//!
//! Everything that edits a tag goes through a [`ByteStore`]: random access
//! reads and writes plus an exact-length truncate. Two stores are provided,
//! one over a file on disk and one over an in-memory buffer.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Random access read/write storage for an audio file
pub trait ByteStore: Read + Write + Seek {
    /// Current length of the store in bytes
    fn len(&self) -> io::Result<u64>;

    /// Shrink (or zero-extend) the store to exactly `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Whether writes are refused
    fn is_read_only(&self) -> bool;

    /// A name for diagnostics, usually the file path
    fn name(&self) -> String {
        String::new()
    }

    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl<S: ByteStore + ?Sized> ByteStore for Box<S> {
    fn len(&self) -> io::Result<u64> {
        (**self).len()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        (**self).truncate(len)
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

fn read_only_error() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only")
}

// =============================================================================
// File store
// =============================================================================

/// A store backed by a file on disk
#[derive(Debug)]
pub struct FileStream {
    file: File,
    path: PathBuf,
    read_only: bool,
}

impl FileStream {
    /// Open a file for reading and writing, falling back to read-only access
    /// when the file cannot be opened for writing
    pub fn open(path: &Path) -> Result<Self> {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => Ok(Self {
                file,
                path: path.to_path_buf(),
                read_only: false,
            }),
            Err(e) => {
                log::warn!(
                    "{}: opening read-only ({})",
                    path.display(),
                    e
                );
                Self::open_read_only(path)
            }
        }
    }

    /// Open a file that will never be written
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            read_only: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.read_only {
            return Err(read_only_error());
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.flush()
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl ByteStore for FileStream {
    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if self.read_only {
            return Err(read_only_error());
        }
        self.file.set_len(len)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

// =============================================================================
// Memory store
// =============================================================================

/// A store backed by a growable in-memory buffer
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: u64,
    read_only: bool,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            read_only: false,
        }
    }

    pub fn read_only(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            read_only: true,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = (self.pos as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.read_only {
            return Err(read_only_error());
        }

        let start = self.pos as usize;
        let end = start + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => (self.data.len() as u64).checked_add_signed(delta),
        };

        match target {
            Some(target) => {
                self.pos = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

impl ByteStore for MemoryStream {
    fn len(&self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if self.read_only {
            return Err(read_only_error());
        }
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn name(&self) -> String {
        "<memory>".to_string()
    }
}
