//! ID3v1 trailer and the shared genre table
//!
//! ID3v1 is read only as a fallback for MP3 files without an ID3v2 tag.
//! When a file already carries one, writes refresh it so the two never
//! disagree.
use crate::error::Result;
use crate::formats::read_at;
use cadenza_core::{ReadSeek, TagMap};

/// Size of the fixed trailer
pub const TAG_LEN: u64 = 128;

/// ID3v1 genre names by index, including the Winamp extensions
pub const GENRES: &[&str] = &[
    "Blues", "Classic Rock", "Country", "Dance", "Disco", "Funk", "Grunge", "Hip-Hop", "Jazz",
    "Metal", "New Age", "Oldies", "Other", "Pop", "R&B", "Rap", "Reggae", "Rock", "Techno",
    "Industrial", "Alternative", "Ska", "Death Metal", "Pranks", "Soundtrack", "Euro-Techno",
    "Ambient", "Trip-Hop", "Vocal", "Jazz+Funk", "Fusion", "Trance", "Classical", "Instrumental",
    "Acid", "House", "Game", "Sound Clip", "Gospel", "Noise", "Alt. Rock", "Bass", "Soul",
    "Punk", "Space", "Meditative", "Instrumental Pop", "Instrumental Rock", "Ethnic", "Gothic",
    "Darkwave", "Techno-Industrial", "Electronic", "Pop-Folk", "Eurodance", "Dream",
    "Southern Rock", "Comedy", "Cult", "Gangsta Rap", "Top 40", "Christian Rap", "Pop/Funk",
    "Jungle", "Native American", "Cabaret", "New Wave", "Psychedelic", "Rave", "Showtunes",
    "Trailer", "Lo-Fi", "Tribal", "Acid Punk", "Acid Jazz", "Polka", "Retro", "Musical",
    "Rock & Roll", "Hard Rock", "Folk", "Folk-Rock", "National Folk", "Swing", "Fast-Fusion",
    "Bebop", "Latin", "Revival", "Celtic", "Bluegrass", "Avantgarde", "Gothic Rock",
    "Progressive Rock", "Psychedelic Rock", "Symphonic Rock", "Slow Rock", "Big Band", "Chorus",
    "Easy Listening", "Acoustic", "Humour", "Speech", "Chanson", "Opera", "Chamber Music",
    "Sonata", "Symphony", "Booty Bass", "Primus", "Porn Groove", "Satire", "Slow Jam", "Club",
    "Tango", "Samba", "Folklore", "Ballad", "Power Ballad", "Rhythmic Soul", "Freestyle", "Duet",
    "Punk Rock", "Drum Solo", "A Cappella", "Euro-House", "Dance Hall", "Goa", "Drum & Bass",
    "Club-House", "Hardcore", "Terror", "Indie", "BritPop", "Afro-Punk", "Polsk Punk", "Beat",
    "Christian Gangsta Rap", "Heavy Metal", "Black Metal", "Crossover", "Contemporary Christian",
    "Christian Rock", "Merengue", "Salsa", "Thrash Metal", "Anime", "JPop", "Synthpop",
];

/// Genre name for an ID3v1 index
pub fn genre_name(index: usize) -> Option<&'static str> {
    GENRES.get(index).copied()
}

/// ID3v1 index for a genre name, compared case-insensitively
pub fn genre_index(name: &str) -> Option<u8> {
    GENRES
        .iter()
        .position(|genre| genre.eq_ignore_ascii_case(name.trim()))
        .and_then(|index| u8::try_from(index).ok())
}

/// Whether the stream ends in an ID3v1 trailer
pub fn has_tag(source: &mut dyn ReadSeek, len: u64) -> Result<bool> {
    if len < TAG_LEN {
        return Ok(false);
    }
    let magic = read_at(source, len - TAG_LEN, 3)?;
    Ok(magic == b"TAG")
}

/// Read the trailer, if any
pub fn read(source: &mut dyn ReadSeek, len: u64) -> Result<Option<TagMap>> {
    if !has_tag(source, len)? {
        return Ok(None);
    }
    let data = read_at(source, len - TAG_LEN, TAG_LEN)?;
    Ok(Some(parse(&data)))
}

fn field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    bytes[..end]
        .iter()
        .map(|&b| char::from(b))
        .collect::<String>()
        .trim_end()
        .to_string()
}

/// Decode a 128-byte trailer
pub fn parse(data: &[u8]) -> TagMap {
    let mut tags = TagMap::new();
    if data.len() < TAG_LEN as usize || &data[..3] != b"TAG" {
        return tags;
    }
    tags.push("title", field(&data[3..33]));
    tags.push("artist", field(&data[33..63]));
    tags.push("album", field(&data[63..93]));
    tags.push("date", field(&data[93..97]));

    // ID3v1.1 steals the last comment byte for the track number
    let comment = &data[97..127];
    if comment[28] == 0 && comment[29] != 0 {
        tags.push("comment", field(&comment[..28]));
        tags.push("tracknumber", comment[29].to_string());
    } else {
        tags.push("comment", field(comment));
    }
    if let Some(genre) = genre_name(usize::from(data[127])) {
        tags.push("genre", genre);
    }
    tags
}

fn put_latin1(slot: &mut [u8], value: Option<&str>) {
    let encoded = value
        .unwrap_or_default()
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'));
    for (dst, byte) in slot.iter_mut().zip(encoded) {
        *dst = byte;
    }
}

/// Encode a trailer from the first value of each field
///
/// Text is truncated to the fixed field widths; characters outside Latin-1
/// become `?`.
pub fn render(tags: &TagMap) -> [u8; TAG_LEN as usize] {
    let mut out = [0u8; TAG_LEN as usize];
    out[..3].copy_from_slice(b"TAG");
    put_latin1(&mut out[3..33], tags.first("title"));
    put_latin1(&mut out[33..63], tags.first("artist"));
    put_latin1(&mut out[63..93], tags.first("album"));
    put_latin1(&mut out[93..97], tags.first("date"));
    put_latin1(&mut out[97..125], tags.first("comment"));
    if let Some((track, _)) = tags.first("tracknumber").and_then(super::parse_number_pair) {
        out[126] = u8::try_from(track).unwrap_or(0);
    }
    out[127] = tags.first("genre").and_then(genre_index).unwrap_or(255);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailer() -> Vec<u8> {
        let mut data = vec![0u8; 128];
        data[..3].copy_from_slice(b"TAG");
        data[3..8].copy_from_slice(b"Title");
        data[33..39].copy_from_slice(b"Artist");
        data[93..97].copy_from_slice(b"1999");
        data[97..101].copy_from_slice(b"Note");
        data[126] = 7;
        data[127] = 17;
        data
    }

    #[test]
    fn parses_v11_track_number() {
        let tags = parse(&trailer());
        assert_eq!(tags.get("title"), ["Title"]);
        assert_eq!(tags.get("artist"), ["Artist"]);
        assert_eq!(tags.get("date"), ["1999"]);
        assert_eq!(tags.get("comment"), ["Note"]);
        assert_eq!(tags.get("tracknumber"), ["7"]);
        assert_eq!(tags.get("genre"), ["Rock"]);
        assert!(!tags.contains("album"));
    }

    #[test]
    fn unknown_genre_index_is_dropped() {
        let mut data = trailer();
        data[127] = 255;
        assert!(!parse(&data).contains("genre"));
    }

    #[test]
    fn render_then_parse_keeps_first_values() {
        let mut tags = TagMap::new();
        tags.set("title", ["Caf\u{e9} \u{263a}", "ignored"]);
        tags.set("tracknumber", ["4/10"]);
        tags.set("genre", ["hip-hop"]);
        let parsed = parse(&render(&tags));
        assert_eq!(parsed.get("title"), ["Caf\u{e9} ?"]);
        assert_eq!(parsed.get("tracknumber"), ["4"]);
        assert_eq!(parsed.get("genre"), ["Hip-Hop"]);
    }

    #[test]
    fn genre_table_lookups() {
        assert_eq!(genre_name(0), Some("Blues"));
        assert_eq!(genre_name(147), Some("Synthpop"));
        assert_eq!(genre_name(148), None);
        assert_eq!(genre_index("rock"), Some(17));
    }
}
