//! ID3v1 trailer tags
//!
//! A fixed 128 byte block at the very end of the file. Fields are tiny and
//! silently truncated on write. The track number is stored the v1.1 way,
//! in the last byte of the comment field.

use crate::options::Id3v1Encoding;
use crate::property_map::PropertyMap;
use crate::tag::{apply_basic_properties, basic_properties, parse_leading_number, Tag};
use anyhow::{bail, Result};

/// ID3v1 tag size
pub const ID3V1_SIZE: u64 = 128;

/// ID3v1 identifier
pub const ID3V1_ID: &[u8; 3] = b"TAG";

/// Genre byte for "no genre"
const NO_GENRE: u8 = 255;

/// The ID3v1 genre list, including the Winamp extensions
pub const GENRES: [&str; 192] = [
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop",
    "Jazz", "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock",
    "Techno", "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack",
    "Euro-Techno", "Ambient", "Trip-Hop", "Vocal", "Jazz-Funk", "Fusion", "Trance",
    "Classical", "Instrumental", "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise",
    "Alternative Rock", "Bass", "Soul", "Punk", "Space", "Meditative", "Instrumental Pop",
    "Instrumental Rock", "Ethnic", "Gothic", "Darkwave", "Techno-Industrial", "Electronic",
    "Pop-Folk", "Eurodance", "Dream", "Southern Rock", "Comedy", "Cult", "Gangsta",
    "Top 40", "Christian Rap", "Pop/Funk", "Jungle", "Native American", "Cabaret",
    "New Wave", "Psychedelic", "Rave", "Showtunes", "Trailer", "Lo-Fi", "Tribal",
    "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical", "Rock & Roll", "Hard Rock",
    "Folk", "Folk-Rock", "National Folk", "Swing", "Fast Fusion", "Bebop", "Latin",
    "Revival", "Celtic", "Bluegrass", "Avant-garde", "Gothic Rock", "Progressive Rock",
    "Psychedelic Rock", "Symphonic Rock", "Slow Rock", "Big Band", "Chorus",
    "Easy Listening", "Acoustic", "Humour", "Speech", "Chanson", "Opera", "Chamber Music",
    "Sonata", "Symphony", "Booty Bass", "Primus", "Porn Groove", "Satire", "Slow Jam",
    "Club", "Tango", "Samba", "Folklore", "Ballad", "Power Ballad", "Rhythmic Soul",
    "Freestyle", "Duet", "Punk Rock", "Drum Solo", "A Cappella", "Euro-House",
    "Dance Hall", "Goa", "Drum & Bass", "Club-House", "Hardcore Techno", "Terror",
    "Indie", "Britpop", "Worldbeat", "Polsk Punk", "Beat", "Christian Gangsta Rap",
    "Heavy Metal", "Black Metal", "Crossover", "Contemporary Christian", "Christian Rock",
    "Merengue", "Salsa", "Thrash Metal", "Anime", "Jpop", "Synthpop", "Abstract",
    "Art Rock", "Baroque", "Bhangra", "Big Beat", "Breakbeat", "Chillout", "Downtempo",
    "Dub", "EBM", "Eclectic", "Electro", "Electroclash", "Emo", "Experimental", "Garage",
    "Global", "IDM", "Illbient", "Industro-Goth", "Jam Band", "Krautrock", "Leftfield",
    "Lounge", "Math Rock", "New Romantic", "Nu-Breakz", "Post-Punk", "Post-Rock",
    "Psytrance", "Shoegaze", "Space Rock", "Trop Rock", "World Music", "Neoclassical",
    "Audiobook", "Audio Theatre", "Neue Deutsche Welle", "Podcast", "Indie Rock",
    "G-Funk", "Dubstep", "Garage Rock", "Psybient",
];

/// Genre index for `name`, matched case-insensitively
pub fn genre_index(name: &str) -> Option<u8> {
    GENRES
        .iter()
        .position(|g| g.eq_ignore_ascii_case(name.trim()))
        .map(|i| i as u8)
}

/// An ID3v1.1 tag
#[derive(Debug, Clone, PartialEq)]
pub struct Id3v1Tag {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: String,
    pub comment: String,
    pub track: u8,
    pub genre: u8,
    encoding: Id3v1Encoding,
}

impl Default for Id3v1Tag {
    fn default() -> Self {
        Self::new(Id3v1Encoding::Latin1)
    }
}

impl Id3v1Tag {
    pub fn new(encoding: Id3v1Encoding) -> Self {
        Self {
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            year: String::new(),
            comment: String::new(),
            track: 0,
            genre: NO_GENRE,
            encoding,
        }
    }

    /// Parse a 128 byte block starting with `TAG`
    pub fn parse(data: &[u8], encoding: Id3v1Encoding) -> Result<Self> {
        if data.len() < ID3V1_SIZE as usize || &data[0..3] != ID3V1_ID {
            bail!("not an ID3v1 tag");
        }

        let body = &data[3..];
        let decode = |bytes: &[u8]| decode_text(bytes, encoding);

        // v1.1: a zero byte before a non-zero track byte at the end of the comment
        let (comment, track) = if body[122] == 0 && body[123] != 0 {
            (decode(&body[94..122]), body[123])
        } else {
            (decode(&body[94..124]), 0)
        };

        Ok(Self {
            title: decode(&body[0..30]),
            artist: decode(&body[30..60]),
            album: decode(&body[60..90]),
            year: decode(&body[90..94]),
            comment,
            track,
            genre: body[124],
            encoding,
        })
    }

    /// Render the 128 byte tag
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ID3V1_SIZE as usize);
        out.extend_from_slice(ID3V1_ID);
        out.extend_from_slice(&encode_text(&self.title, 30, self.encoding));
        out.extend_from_slice(&encode_text(&self.artist, 30, self.encoding));
        out.extend_from_slice(&encode_text(&self.album, 30, self.encoding));
        out.extend_from_slice(&encode_text(&self.year, 4, self.encoding));
        out.extend_from_slice(&encode_text(&self.comment, 28, self.encoding));
        out.push(0);
        out.push(self.track);
        out.push(self.genre);
        out
    }
}

fn decode_text(bytes: &[u8], encoding: Id3v1Encoding) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];
    let text = match encoding {
        Id3v1Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect::<String>(),
        Id3v1Encoding::Utf8Lossy => String::from_utf8_lossy(bytes).to_string(),
    };
    text.trim_end().to_string()
}

fn encode_text(text: &str, size: usize, encoding: Id3v1Encoding) -> Vec<u8> {
    let mut out = match encoding {
        Id3v1Encoding::Latin1 => text
            .chars()
            .take(size)
            .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
            .collect::<Vec<u8>>(),
        Id3v1Encoding::Utf8Lossy => {
            let mut end = text.len().min(size);
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.as_bytes()[..end].to_vec()
        }
    };
    out.resize(size, 0);
    out
}

impl Tag for Id3v1Tag {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn artist(&self) -> String {
        self.artist.clone()
    }

    fn album(&self) -> String {
        self.album.clone()
    }

    fn comment(&self) -> String {
        self.comment.clone()
    }

    fn genre(&self) -> String {
        GENRES
            .get(self.genre as usize)
            .map(|g| g.to_string())
            .unwrap_or_default()
    }

    fn year(&self) -> u32 {
        parse_leading_number(&self.year)
    }

    fn track(&self) -> u32 {
        self.track as u32
    }

    fn set_title(&mut self, value: &str) {
        self.title = value.to_string();
    }

    fn set_artist(&mut self, value: &str) {
        self.artist = value.to_string();
    }

    fn set_album(&mut self, value: &str) {
        self.album = value.to_string();
    }

    fn set_comment(&mut self, value: &str) {
        self.comment = value.to_string();
    }

    fn set_genre(&mut self, value: &str) {
        self.genre = genre_index(value).unwrap_or(NO_GENRE);
    }

    fn set_year(&mut self, value: u32) {
        self.year = if value == 0 {
            String::new()
        } else {
            value.to_string()
        };
    }

    fn set_track(&mut self, value: u32) {
        self.track = u8::try_from(value).unwrap_or(0);
    }

    fn properties(&self) -> PropertyMap {
        basic_properties(self)
    }

    /// Genres outside the ID3v1 list cannot be stored and are reported back
    fn set_properties(&mut self, properties: &PropertyMap) -> PropertyMap {
        let mut rejected = apply_basic_properties(self, properties);
        let genre = properties.first("GENRE");
        if !genre.is_empty() && genre_index(&genre).is_none() {
            rejected.insert("GENRE", [genre]);
        }
        rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Id3v1Tag {
        let mut tag = Id3v1Tag::default();
        tag.set_title("Title");
        tag.set_artist("Artist");
        tag.set_album("Album");
        tag.set_year(1999);
        tag.set_comment("Comment");
        tag.set_track(7);
        tag.set_genre("Rock");
        tag
    }

    #[test]
    fn test_render_parse() {
        let tag = sample();
        let bytes = tag.render();
        assert_eq!(bytes.len(), 128);
        assert_eq!(&bytes[0..3], b"TAG");
        assert_eq!(bytes[127], 17);
        assert_eq!(Id3v1Tag::parse(&bytes, Id3v1Encoding::Latin1).unwrap(), tag);
    }

    #[test]
    fn test_v10_comment_without_track() {
        let mut bytes = sample().render();
        bytes[125] = b'x';
        bytes[126] = b'y';
        let tag = Id3v1Tag::parse(&bytes, Id3v1Encoding::Latin1).unwrap();
        assert_eq!(tag.track(), 0);
        assert!(tag.comment.starts_with("Comment"));
    }

    #[test]
    fn test_truncation_and_latin1() {
        let mut tag = Id3v1Tag::default();
        tag.set_title("ÄÖÜ 日本 and a title that is much longer than thirty bytes");
        let parsed = Id3v1Tag::parse(&tag.render(), Id3v1Encoding::Latin1).unwrap();
        assert_eq!(parsed.title.chars().count(), 30);
        assert!(parsed.title.starts_with("ÄÖÜ ?? and"));
    }

    #[test]
    fn test_utf8_truncates_on_char_boundary() {
        let mut tag = Id3v1Tag::new(Id3v1Encoding::Utf8Lossy);
        tag.set_title(&"é".repeat(20));
        let parsed = Id3v1Tag::parse(&tag.render(), Id3v1Encoding::Utf8Lossy).unwrap();
        assert_eq!(parsed.title, "é".repeat(15));
    }

    #[test]
    fn test_genres() {
        assert_eq!(genre_index("rock"), Some(17));
        assert_eq!(GENRES[191], "Psybient");
        let mut tag = Id3v1Tag::default();
        assert_eq!(tag.genre(), "");
        tag.set_genre("Not A Genre");
        assert_eq!(tag.genre, 255);
    }

    #[test]
    fn test_properties() {
        let tag = sample();
        let props = tag.properties();
        assert_eq!(props.first("DATE"), "1999");
        assert_eq!(props.first("GENRE"), "Rock");

        let mut other = Id3v1Tag::default();
        let mut input = props.clone();
        input.insert("LYRICS", ["la la"]);
        let rejected = other.set_properties(&input);
        assert_eq!(rejected.get("LYRICS").unwrap(), ["la la"]);
        assert_eq!(other.properties(), props);

        let rejected = other.set_properties(&PropertyMap::with_entry("GENRE", ["Vaporwave"]));
        assert_eq!(rejected.first("GENRE"), "Vaporwave");
    }

    #[test]
    fn test_rejects_non_tag() {
        assert!(Id3v1Tag::parse(&[0u8; 128], Id3v1Encoding::Latin1).is_err());
        assert!(Id3v1Tag::parse(b"TAG", Id3v1Encoding::Latin1).is_err());
    }
}
