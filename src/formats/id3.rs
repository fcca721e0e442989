//! ID3v2 tag parser for MP3 files
//!
//! Only the tag at the start of the file is read. Frames that run past the
//! fetched window end the scan; whatever was decoded up to that point is kept.

use super::HeaderParser;
use crate::{
    byte_reader::{ByteOrder, ByteReader},
    error::{Error, Result},
    record::MetadataRecord,
};

const TAG_HEADER_SIZE: usize = 10;

// Header flags
const FLAG_EXTENDED_HEADER: u8 = 0x40;

// Frame format flags that make the payload unreadable without further work
const V23_COMPRESSED_OR_ENCRYPTED: u16 = 0x00C0;
const V24_COMPRESSED_OR_ENCRYPTED: u16 = 0x000C;

/// Text frame ids (v2.3/v2.4 and v2.2) and the field they fill
const TEXT_FRAMES: &[(&str, &str)] = &[
    ("TIT2", "title"),
    ("TT2", "title"),
    ("TPE1", "artist"),
    ("TP1", "artist"),
    ("TALB", "album"),
    ("TAL", "album"),
    ("TYER", "year"),
    ("TDRC", "year"),
    ("TYE", "year"),
    ("TCON", "genre"),
    ("TCO", "genre"),
    ("TRCK", "track"),
    ("TRK", "track"),
];

/// MP3 parser reading the ID3v2 tag
pub struct Id3Parser;

impl HeaderParser for Id3Parser {
    const ID: &'static str = "id3";
    const FILTER: &'static str = r"\.mp3$";
    const HEADER_BYTES: usize = 64 * 1024;

    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord> {
        reader.set_byte_order(ByteOrder::BigEndian);
        if reader.read_bytes(3)? != b"ID3" {
            return Err(Error::signature(Self::ID, "missing ID3v2 tag"));
        }

        let major = reader.read_u8()?;
        let revision = reader.read_u8()?;
        if !(2..=4).contains(&major) {
            return Err(Error::signature(
                Self::ID,
                format!("unsupported ID3v2 version 2.{major}"),
            ));
        }
        let flags = reader.read_u8()?;
        let tag_size = syncsafe(reader.read_u32()?)? as usize;

        let mut record = MetadataRecord::new();
        record.set("id3_version", format!("2.{major}.{revision}"));

        let tag_end = TAG_HEADER_SIZE + tag_size;
        if flags & FLAG_EXTENDED_HEADER != 0 && major >= 3 {
            let size = reader.read_u32()?;
            // v2.3 excludes the size field itself, v2.4 includes it
            let skip = if major == 3 {
                size as usize
            } else {
                (syncsafe(size)? as usize).saturating_sub(4)
            };
            reader.skip(skip)?;
        }

        let header_len = if major == 2 { 6 } else { 10 };
        while reader.position() + header_len <= tag_end.min(reader.len()) {
            let Some(frame) = read_frame_header(reader, major)? else {
                break;
            };
            if frame.size > reader.remaining() {
                break;
            }
            let mut body = reader.read_slice(frame.size)?;
            if frame.unreadable {
                continue;
            }

            let Some(&(_, key)) = TEXT_FRAMES.iter().find(|(id, _)| *id == frame.id) else {
                continue;
            };
            if record.get(key).is_some() {
                continue;
            }
            let text = read_text(&mut body)?;
            if !text.is_empty() {
                record.set(key, text);
            }
        }

        Ok(record)
    }
}

struct FrameHeader {
    id: String,
    size: usize,
    unreadable: bool,
}

/// Read a frame header; `None` at the padding area
fn read_frame_header(reader: &mut ByteReader, major: u8) -> Result<Option<FrameHeader>> {
    let id_len = if major == 2 { 3 } else { 4 };
    let id = reader.read_string(id_len)?;
    if !id.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
        return Ok(None);
    }

    let (size, flags) = match major {
        2 => (reader.read_u24()?, 0),
        3 => (reader.read_u32()?, reader.read_u16()?),
        _ => (syncsafe(reader.read_u32()?)?, reader.read_u16()?),
    };
    let unreadable = match major {
        3 => flags & V23_COMPRESSED_OR_ENCRYPTED != 0,
        4 => flags & V24_COMPRESSED_OR_ENCRYPTED != 0,
        _ => false,
    };

    Ok(Some(FrameHeader {
        id,
        size: size as usize,
        unreadable,
    }))
}

/// Decode a text frame body: encoding byte followed by the string
fn read_text(body: &mut ByteReader) -> Result<String> {
    if body.is_empty() {
        return Ok(String::new());
    }
    let encoding = body.read_u8()?;
    let length = body.remaining();
    let text = match encoding {
        0 => body.read_string(length)?,
        1 => body.read_string_utf16(length, ByteOrder::LittleEndian)?,
        2 => body.read_string_utf16(length, ByteOrder::BigEndian)?,
        3 => String::from_utf8_lossy(body.read_bytes(length)?).into_owned(),
        other => {
            return Err(Error::InvalidFormat(format!(
                "id3: unknown text encoding {other}"
            )))
        }
    };
    // Multiple values are NUL separated; keep the first
    Ok(text.split('\0').next().unwrap_or_default().trim().to_string())
}

/// Decode a 28-bit syncsafe integer (7 bits per byte)
fn syncsafe(value: u32) -> Result<u32> {
    if value & 0x8080_8080 != 0 {
        return Err(Error::InvalidFormat(format!(
            "id3: {value:#010x} is not a syncsafe integer"
        )));
    }
    Ok((value & 0x7F)
        | ((value >> 8) & 0x7F) << 7
        | ((value >> 16) & 0x7F) << 14
        | ((value >> 24) & 0x7F) << 21)
}
