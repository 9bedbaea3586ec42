//! # tagsplice
//!
//! In-place audio tag editing - read and rewrite ID3v1, ID3v2, APE, Xiph
//! and MP4 metadata without touching the audio.
//!
//! Every edit is a splice: the byte range a tag occupied is replaced by the
//! newly rendered tag and only the bytes behind it are moved. The audio
//! payload is never decoded or re-encoded.
//!
//! ## Features
//!
//! - **Lossless**: Audio bytes are preserved exactly
//! - **Multi-tag**: Files carrying several tag dialects are read through one
//!   view with a fixed precedence and written to all of them at once
//! - **Generic properties**: A [`PropertyMap`] of `KEY=values` plus complex
//!   properties such as embedded pictures
//! - **Formats**: MPEG (MP3/MP2), WavPack, FLAC, MP4/M4A
//!
//! ## Example
//!
//! ```no_run
//! use tagsplice::{FileRef, Tag, TagOptions};
//! use std::path::Path;
//!
//! let options = TagOptions::default();
//! if let Some(mut file) = FileRef::open(Path::new("song.mp3"), &options).unwrap() {
//!     println!("{}", file.file().tag_view().title());
//!     file.file_mut().tag().set_title("New title");
//!     file.file_mut().save().unwrap();
//! }
//! ```
//!
//! ## Technical Details
//!
//! Tags are rendered fully in memory; the audio is moved through the store
//! in bounded chunks. A file whose stream marker is not found is flagged
//! invalid: reads return defaults and `save` refuses to write.

pub mod ape;
pub mod file;
pub mod flac;
pub mod id3v1;
pub mod id3v2;
pub mod mp4;
pub mod mpeg;
pub mod options;
pub mod picture;
pub mod probe;
pub mod property_map;
pub mod stream;
pub mod surgery;
pub mod tag;
pub mod union;
pub mod variant;
pub mod wavpack;
pub mod xiph;

pub use file::{AudioFile, NamedRange, TagKind};
pub use flac::FlacFile;
pub use mp4::Mp4File;
pub use mpeg::MpegFile;
pub use options::{Id3v1Encoding, ReadStyle, TagOptions, TextEncoding};
pub use picture::{Picture, PictureType, PICTURE_KEY};
pub use probe::{FileKind, FileRef, FileTypeResolver, Resolvers};
pub use property_map::PropertyMap;
pub use stream::{ByteStore, FileStream, MemoryStream};
pub use surgery::{BinaryFile, ByteRange};
pub use tag::Tag;
pub use union::{TagUnion, TagView};
pub use variant::{Variant, VariantList, VariantMap, VariantType};
pub use wavpack::WavPackFile;
