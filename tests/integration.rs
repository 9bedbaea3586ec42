//! Round trips through real files on disk

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tagsplice::{
    FileKind, FileRef, FileStream, MpegFile, Picture, PropertyMap, Resolvers, Tag, TagKind,
    TagOptions, PICTURE_KEY,
};

/// Global counter for unique file names
static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Helper to write generated file contents to a unique temp path
fn write_temp(ext: &str, data: &[u8]) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "tagsplice_test_{}_{}.{}",
        std::process::id(),
        id,
        ext
    ));
    fs::write(&path, data).expect("Failed to write test file");
    path
}

/// Helper to cleanup temp file
fn cleanup(path: &Path) {
    let _ = fs::remove_file(path);
}

// =============================================================================
// Generated files
// =============================================================================

// MPEG1 Layer III, 128 kbps, 44.1 kHz: 417-byte frames
fn mpeg_frames(count: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..count {
        data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        data.extend(std::iter::repeat((i % 251) as u8).take(413));
    }
    data
}

const FLAC_AUDIO: &[u8] = &[0xFF, 0xF8, 0x69, 0x08, 0x00, 0x11, 0x22, 0x33];

fn flac_stream() -> Vec<u8> {
    let mut data = b"fLaC".to_vec();
    data.extend_from_slice(&[0x00, 0, 0, 34]);
    data.extend_from_slice(&[0x10; 34]);
    data.extend_from_slice(&[0x81, 0, 0, 64]);
    data.extend_from_slice(&[0; 64]);
    data.extend_from_slice(FLAC_AUDIO);
    data
}

fn wavpack_block() -> Vec<u8> {
    let mut data = b"wvpk".to_vec();
    data.extend_from_slice(&(300u32 - 8).to_le_bytes());
    data.extend_from_slice(&[0x10, 0x04]);
    data.resize(300, 0x33);
    data
}

const MP4_PAYLOAD: &[u8] = b"some-aac-frames";

fn atom(name: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let mut out = ((content.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(name);
    out.extend_from_slice(content);
    out
}

fn mp4_file() -> Vec<u8> {
    let mut stco = vec![0u8; 4];
    stco.extend_from_slice(&1u32.to_be_bytes());
    stco.extend_from_slice(&0u32.to_be_bytes());
    let trak = atom(
        b"trak",
        &atom(b"mdia", &atom(b"minf", &atom(b"stbl", &atom(b"stco", &stco)))),
    );
    let mut moov = atom(b"mvhd", &[0u8; 20]);
    moov.extend_from_slice(&trak);

    let mut data = atom(b"ftyp", b"M4A \0\0\0\0M4A mp42");
    data.extend_from_slice(&atom(b"moov", &moov));
    let payload_offset = (data.len() + 8) as u32;
    data.extend_from_slice(&atom(b"mdat", MP4_PAYLOAD));

    let entry = data.len() - MP4_PAYLOAD.len() - 8 - 4;
    data[entry..entry + 4].copy_from_slice(&payload_offset.to_be_bytes());
    data
}

fn mp4_chunk_offset(data: &[u8]) -> usize {
    let pos = data.windows(4).position(|w| w == b"stco").unwrap();
    u32::from_be_bytes([data[pos + 12], data[pos + 13], data[pos + 14], data[pos + 15]]) as usize
}

fn open(path: &Path) -> FileRef<FileStream> {
    FileRef::open(path, &TagOptions::default()).unwrap().unwrap()
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn test_mpeg_title_round_trip() {
    let audio = mpeg_frames(6);
    let path = write_temp("mp3", &audio);

    let mut file = open(&path);
    assert_eq!(file.kind(), FileKind::Mpeg);
    file.file_mut().tag().set_title("Opening");
    file.file_mut().tag().set_track(3);
    file.file_mut().save().unwrap();
    drop(file);

    let file = open(&path);
    assert_eq!(file.file().tag_view().title(), "Opening");
    assert_eq!(file.file().tag_view().track(), 3);
    assert_eq!(
        file.file().present_tags(),
        [TagKind::Id3v2, TagKind::Id3v1]
    );

    let ranges = file.file().ranges();
    let audio_range = ranges.iter().find(|r| r.name == "audio").unwrap().range;
    let data = fs::read(&path).unwrap();
    let start = audio_range.offset as usize;
    assert_eq!(&data[start..start + audio.len()], &audio[..]);
    cleanup(&path);
}

#[test]
fn test_mpeg_strip_restores_audio() {
    let audio = mpeg_frames(4);
    let path = write_temp("mp3", &audio);

    let mut file = open(&path);
    file.file_mut().tag().set_artist("Someone");
    file.file_mut().save().unwrap();
    assert_ne!(fs::read(&path).unwrap(), audio);

    file.file_mut().strip(&TagKind::ALL).unwrap();
    drop(file);
    assert_eq!(fs::read(&path).unwrap(), audio);
    cleanup(&path);
}

#[test]
fn test_flac_properties_round_trip() {
    let path = write_temp("flac", &flac_stream());

    let mut file = open(&path);
    let mut properties = PropertyMap::new();
    properties.insert("ARTIST", ["First", "Second"]);
    properties.insert("PERFORMER", ["Band"]);
    let rejected = file.file_mut().set_properties(&properties);
    assert!(rejected.is_empty());
    file.file_mut().save().unwrap();
    drop(file);

    let file = open(&path);
    let read = file.file().properties();
    assert_eq!(read.get("ARTIST").unwrap(), ["First", "Second"]);
    assert_eq!(read.get("PERFORMER").unwrap(), ["Band"]);
    assert!(fs::read(&path).unwrap().ends_with(FLAC_AUDIO));
    cleanup(&path);
}

#[test]
fn test_flac_picture_round_trip() {
    let path = write_temp("flac", &flac_stream());
    let cover = Picture::front_cover(b"\x89PNG\r\n\x1a\n-not-really-an-image".to_vec());

    let mut file = open(&path);
    assert!(file
        .file_mut()
        .set_complex_properties(PICTURE_KEY, &[cover.to_variant_map()]));
    file.file_mut().save().unwrap();
    drop(file);

    let file = open(&path);
    assert_eq!(file.file().complex_property_keys(), [PICTURE_KEY]);
    let records = file.file().complex_properties(PICTURE_KEY);
    assert_eq!(records.len(), 1);
    let read = Picture::from_variant_map(&records[0]).unwrap();
    assert_eq!(read.data, cover.data);
    assert_eq!(read.mime_type, "image/png");
    assert!(fs::read(&path).unwrap().ends_with(FLAC_AUDIO));
    cleanup(&path);
}

#[test]
fn test_wavpack_round_trip() {
    let audio = wavpack_block();
    let path = write_temp("wv", &audio);

    let mut file = open(&path);
    file.file_mut().tag().set_album("Live");
    file.file_mut().save().unwrap();
    drop(file);

    let file = open(&path);
    assert_eq!(file.file().tag_view().album(), "Live");
    assert_eq!(file.file().present_tags(), [TagKind::Ape]);
    assert_eq!(&fs::read(&path).unwrap()[..audio.len()], &audio[..]);
    cleanup(&path);
}

#[test]
fn test_mp4_round_trip_keeps_chunk_offsets() {
    let path = write_temp("m4a", &mp4_file());

    let mut file = open(&path);
    assert_eq!(file.kind(), FileKind::Mp4);
    file.file_mut().tag().set_title("Chapter One");
    file.file_mut().tag().set_year(2004);
    file.file_mut().save().unwrap();
    drop(file);

    let data = fs::read(&path).unwrap();
    let offset = mp4_chunk_offset(&data);
    assert_eq!(&data[offset..offset + MP4_PAYLOAD.len()], MP4_PAYLOAD);

    let file = open(&path);
    assert_eq!(file.file().tag_view().title(), "Chapter One");
    assert_eq!(file.file().tag_view().year(), 2004);
    cleanup(&path);
}

#[test]
fn test_unknown_file_is_none() {
    let path = write_temp("txt", b"just some text");
    assert!(FileRef::open(&path, &TagOptions::default())
        .unwrap()
        .is_none());
    cleanup(&path);
}

#[test]
fn test_invalid_file_refuses_to_save() {
    let garbage = vec![0x42; 2000];
    let path = write_temp("mp3", &garbage);

    let mut file = open(&path);
    assert!(!file.file().is_valid());
    assert_eq!(file.file().tag_view().title(), "");
    file.file_mut().tag().set_title("ignored");
    assert!(file.file_mut().save().is_err());
    drop(file);
    assert_eq!(fs::read(&path).unwrap(), garbage);
    cleanup(&path);
}

#[test]
fn test_read_only_store_refuses_to_save() {
    let audio = mpeg_frames(3);
    let path = write_temp("mp3", &audio);

    let store = FileStream::open_read_only(&path).unwrap();
    let mut file = MpegFile::new(store, &TagOptions::default()).unwrap();
    assert!(file.is_valid());
    file.tag().set_title("nope");
    assert!(file.save().is_err());
    assert_eq!(fs::read(&path).unwrap(), audio);
    cleanup(&path);
}

#[test]
fn test_extension_overrides_content() {
    // MPEG frames behind a .flac name open as an invalid FLAC file
    let path = write_temp("flac", &mpeg_frames(3));
    let file = FileRef::open_with(&path, &TagOptions::default(), &Resolvers::new())
        .unwrap()
        .unwrap();
    assert_eq!(file.kind(), FileKind::Flac);
    assert!(!file.file().is_valid());
    cleanup(&path);
}
