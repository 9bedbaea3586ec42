//! Picking the right orchestrator for a file
//!
//! [`FileRef`] opens any supported file behind the [`AudioFile`] trait.
//! Detection runs client resolvers first, then the extension table, then
//! content sniffing. Nothing matching is `Ok(None)`, not an error.

use crate::file::AudioFile;
use crate::flac::{FlacFile, FLAC_ID};
use crate::id3v2::Id3v2Header;
use crate::mp4::Mp4File;
use crate::mpeg::{parse_header, MpegFile};
use crate::options::TagOptions;
use crate::stream::{ByteStore, FileStream};
use crate::surgery::BinaryFile;
use crate::wavpack::{WavPackFile, WAVPACK_ID};
use anyhow::Result;
use std::path::Path;

/// Bytes handed to resolvers and the sniffer
const SNIFF_SIZE: usize = 4096;

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Mpeg,
    WavPack,
    Flac,
    Mp4,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Mpeg => "MPEG",
            FileKind::WavPack => "WavPack",
            FileKind::Flac => "FLAC",
            FileKind::Mp4 => "MP4",
        }
    }

    /// Kind implied by a file extension, case-insensitive
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" | "mp2" => Some(FileKind::Mpeg),
            "wv" => Some(FileKind::WavPack),
            "flac" => Some(FileKind::Flac),
            "m4a" | "m4b" | "mp4" | "aac" => Some(FileKind::Mp4),
            _ => None,
        }
    }

    /// Kind implied by the first bytes of a file
    pub fn sniff(header: &[u8]) -> Option<Self> {
        if header.starts_with(WAVPACK_ID) {
            return Some(FileKind::WavPack);
        }
        if header.starts_with(FLAC_ID) {
            return Some(FileKind::Flac);
        }
        if header.len() >= 8 && &header[4..8] == b"ftyp" {
            return Some(FileKind::Mp4);
        }
        if let Some(id3) = Id3v2Header::parse(header) {
            // FLAC files sometimes carry an ID3v2 tag in front of the marker
            let end = id3.total_size() as usize;
            if header.get(end..end + FLAC_ID.len()) == Some(&FLAC_ID[..]) {
                return Some(FileKind::Flac);
            }
            return Some(FileKind::Mpeg);
        }
        if parse_header(header).is_some() {
            return Some(FileKind::Mpeg);
        }
        None
    }
}

/// Client hook deciding a file's kind before the built-in rules
pub trait FileTypeResolver {
    /// `path` is `None` when opening a bare store
    fn resolve(&self, path: Option<&Path>, header: &[u8]) -> Option<FileKind>;
}

/// Registered resolvers, consulted in registration order
#[derive(Default)]
pub struct Resolvers {
    resolvers: Vec<Box<dyn FileTypeResolver>>,
}

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resolver: Box<dyn FileTypeResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    fn resolve(&self, path: Option<&Path>, header: &[u8]) -> Option<FileKind> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(path, header))
    }
}

/// An opened file of any supported format
pub enum FileRef<S: ByteStore> {
    Mpeg(MpegFile<S>),
    WavPack(WavPackFile<S>),
    Flac(FlacFile<S>),
    Mp4(Mp4File<S>),
}

impl FileRef<FileStream> {
    /// Open `path` with the built-in detection only
    pub fn open(path: &Path, options: &TagOptions) -> Result<Option<Self>> {
        Self::open_with(path, options, &Resolvers::new())
    }

    pub fn open_with(
        path: &Path,
        options: &TagOptions,
        resolvers: &Resolvers,
    ) -> Result<Option<Self>> {
        let mut file = BinaryFile::new(FileStream::open(path)?);
        let header = file.read_block_at(0, SNIFF_SIZE)?;

        let kind = resolvers
            .resolve(Some(path), &header)
            .or_else(|| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(FileKind::from_extension)
            })
            .or_else(|| FileKind::sniff(&header));

        match kind {
            Some(kind) => Self::with_kind(file.into_inner(), kind, options).map(Some),
            None => {
                log::debug!("{}: unrecognised file type", path.display());
                Ok(None)
            }
        }
    }
}

impl<S: ByteStore> FileRef<S> {
    /// Detect the format of `store` by resolvers and content only
    pub fn from_store(
        store: S,
        options: &TagOptions,
        resolvers: &Resolvers,
    ) -> Result<Option<Self>> {
        let mut file = BinaryFile::new(store);
        let header = file.read_block_at(0, SNIFF_SIZE)?;
        let kind = resolvers
            .resolve(None, &header)
            .or_else(|| FileKind::sniff(&header));
        match kind {
            Some(kind) => Self::with_kind(file.into_inner(), kind, options).map(Some),
            None => Ok(None),
        }
    }

    /// Open `store` as a known kind
    pub fn with_kind(store: S, kind: FileKind, options: &TagOptions) -> Result<Self> {
        log::debug!("opening {} as {}", store.name(), kind.as_str());
        Ok(match kind {
            FileKind::Mpeg => FileRef::Mpeg(MpegFile::new(store, options)?),
            FileKind::WavPack => FileRef::WavPack(WavPackFile::new(store, options)?),
            FileKind::Flac => FileRef::Flac(FlacFile::new(store, options)?),
            FileKind::Mp4 => FileRef::Mp4(Mp4File::new(store, options)?),
        })
    }

    pub fn kind(&self) -> FileKind {
        match self {
            FileRef::Mpeg(_) => FileKind::Mpeg,
            FileRef::WavPack(_) => FileKind::WavPack,
            FileRef::Flac(_) => FileKind::Flac,
            FileRef::Mp4(_) => FileKind::Mp4,
        }
    }

    pub fn file(&self) -> &dyn AudioFile {
        match self {
            FileRef::Mpeg(f) => f,
            FileRef::WavPack(f) => f,
            FileRef::Flac(f) => f,
            FileRef::Mp4(f) => f,
        }
    }

    pub fn file_mut(&mut self) -> &mut dyn AudioFile {
        match self {
            FileRef::Mpeg(f) => f,
            FileRef::WavPack(f) => f,
            FileRef::Flac(f) => f,
            FileRef::Mp4(f) => f,
        }
    }

    pub fn into_store(self) -> S {
        match self {
            FileRef::Mpeg(f) => f.into_store(),
            FileRef::WavPack(f) => f.into_store(),
            FileRef::Flac(f) => f.into_store(),
            FileRef::Mp4(f) => f.into_store(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;
    use crate::tag::Tag;

    struct AlwaysFlac;

    impl FileTypeResolver for AlwaysFlac {
        fn resolve(&self, _path: Option<&Path>, _header: &[u8]) -> Option<FileKind> {
            Some(FileKind::Flac)
        }
    }

    fn detect(data: Vec<u8>) -> Option<FileKind> {
        FileRef::from_store(MemoryStream::new(data), &TagOptions::default(), &Resolvers::new())
            .unwrap()
            .map(|f| f.kind())
    }

    #[test]
    fn test_extensions() {
        assert_eq!(FileKind::from_extension("MP3"), Some(FileKind::Mpeg));
        assert_eq!(FileKind::from_extension("m4b"), Some(FileKind::Mp4));
        assert_eq!(FileKind::from_extension("wv"), Some(FileKind::WavPack));
        assert_eq!(FileKind::from_extension("ogg"), None);
    }

    #[test]
    fn test_sniffing() {
        assert_eq!(detect(crate::mpeg::tests::frames(3)), Some(FileKind::Mpeg));
        assert_eq!(detect(crate::flac::tests::stream(8)), Some(FileKind::Flac));
        assert_eq!(detect(crate::wavpack::tests::block()), Some(FileKind::WavPack));
        assert_eq!(detect(crate::mp4::tests::skeleton()), Some(FileKind::Mp4));
        assert_eq!(detect(b"plain text, not audio".to_vec()), None);
    }

    #[test]
    fn test_id3_in_front_of_flac() {
        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x0A".to_vec();
        data.extend_from_slice(&[0; 10]);
        data.extend(crate::flac::tests::stream(8));
        assert_eq!(detect(data), Some(FileKind::Flac));

        let mut data = b"ID3\x04\x00\x00\x00\x00\x00\x0A".to_vec();
        data.extend_from_slice(&[0; 10]);
        data.extend(crate::mpeg::tests::frames(3));
        assert_eq!(detect(data), Some(FileKind::Mpeg));
    }

    #[test]
    fn test_resolver_wins() {
        let mut resolvers = Resolvers::new();
        resolvers.register(Box::new(AlwaysFlac));
        let file = FileRef::from_store(
            MemoryStream::new(crate::mpeg::tests::frames(3)),
            &TagOptions::default(),
            &resolvers,
        )
        .unwrap()
        .unwrap();
        assert_eq!(file.kind(), FileKind::Flac);
        assert!(!file.file().is_valid());
    }

    #[test]
    fn test_edit_through_file_ref() {
        let options = TagOptions::default();
        let mut file = FileRef::from_store(
            MemoryStream::new(crate::wavpack::tests::block()),
            &options,
            &Resolvers::new(),
        )
        .unwrap()
        .unwrap();
        file.file_mut().tag().set_genre("Jazz");
        file.file_mut().save().unwrap();

        let reopened = FileRef::from_store(file.into_store(), &options, &Resolvers::new())
            .unwrap()
            .unwrap();
        assert_eq!(reopened.file().tag_view().genre(), "Jazz");
        assert_eq!(reopened.file().format_name(), "WavPack");
    }
}
