//! MP4 / ISO Base Media File Format header parser
//!
//! Walks the box tree inside the fetched window looking for the movie
//! header (duration), the first visual track header (dimensions) and the
//! iTunes-style `ilst` tags. Files whose `moov` sits after `mdat` simply
//! yield fewer fields.
//!
//! Reference: ISO/IEC 14496-12:2022

use super::HeaderParser;
use crate::{
    byte_reader::{ByteOrder, ByteReader, Whence},
    error::{Error, Result},
    record::MetadataRecord,
};

// BMFF constants
const HEADER_SIZE: u64 = 8; // 4 byte size + 4 byte type
const HEADER_SIZE_LARGE: u64 = 16; // 4 byte size + 4 byte type + 8 byte large size

/// Deepest box nesting followed (moov/udta/meta/ilst/item/data is 6)
const MAX_DEPTH: usize = 8;

/// Boxes whose payload is a plain list of child boxes
const CONTAINER_BOXES: &[&[u8; 4]] = &[b"moov", b"trak", b"mdia", b"udta", b"ilst"];

/// `ilst` items and the field they fill
const ILST_ITEMS: &[(&[u8; 4], &str)] = &[
    (b"\xA9nam", "title"),
    (b"\xA9ART", "artist"),
    (b"\xA9alb", "album"),
    (b"\xA9day", "year"),
    (b"\xA9gen", "genre"),
];

/// Lightweight box header
struct BoxHeaderLite {
    fourcc: [u8; 4],
    /// Payload size; `None` when the box runs to the end of its parent
    body_size: Option<u64>,
}

impl BoxHeaderLite {
    fn read(reader: &mut ByteReader) -> Result<Self> {
        let size = reader.read_u32()?;
        let mut fourcc = [0u8; 4];
        fourcc.copy_from_slice(reader.read_bytes(4)?);

        let body_size = match size {
            // Size goes to the end of the enclosing box
            0 => None,
            1 => {
                let large_size = reader.read_u64()?;
                Some(checked_body(&fourcc, large_size, HEADER_SIZE_LARGE)?)
            }
            _ => Some(checked_body(&fourcc, u64::from(size), HEADER_SIZE)?),
        };
        Ok(Self { fourcc, body_size })
    }

    /// True if a whole header (including any 64-bit size) is left in `reader`
    fn fits(reader: &mut ByteReader) -> Result<bool> {
        let remaining = reader.remaining() as u64;
        if remaining < HEADER_SIZE {
            return Ok(false);
        }
        reader.push_seek(0, Whence::Current)?;
        let size = reader.read_u32();
        reader.pop_seek()?;
        Ok(size? != 1 || remaining >= HEADER_SIZE_LARGE)
    }
}

fn checked_body(fourcc: &[u8; 4], size: u64, header: u64) -> Result<u64> {
    size.checked_sub(header).ok_or_else(|| {
        Error::InvalidFormat(format!(
            "mpeg: box {:?} declares size {size}",
            String::from_utf8_lossy(fourcc)
        ))
    })
}

/// MP4/MOV parser
pub struct MpegParser;

impl HeaderParser for MpegParser {
    const ID: &'static str = "mpeg";
    const FILTER: &'static str = r"\.(mp4|m4v|m4a|mov|3gp)$";
    const HEADER_BYTES: usize = 256 * 1024;

    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord> {
        reader.set_byte_order(ByteOrder::BigEndian);

        let first = BoxHeaderLite::read(reader)?;
        if &first.fourcc != b"ftyp" {
            return Err(Error::signature(Self::ID, "first box is not ftyp"));
        }
        let brand = reader.read_string(4)?;

        let mut record = MetadataRecord::new();
        record.set("brand", brand.trim_end());

        reader.seek(0, Whence::Start)?;
        walk_boxes(reader, &mut record, 0)?;
        Ok(record)
    }
}

fn walk_boxes(reader: &mut ByteReader, record: &mut MetadataRecord, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Ok(());
    }

    // A header cut by the window ends the walk like a cut body does
    while BoxHeaderLite::fits(reader)? {
        let header = BoxHeaderLite::read(reader)?;
        let remaining = reader.remaining() as u64;
        let wanted = header.body_size.unwrap_or(remaining);
        let truncated = wanted > remaining;
        let mut body = reader.read_slice(wanted.min(remaining) as usize)?;

        match &header.fourcc {
            fourcc if CONTAINER_BOXES.contains(&fourcc) => {
                walk_boxes(&mut body, record, depth + 1)?;
            }
            b"meta" => {
                // Full box in MP4, plain container in QuickTime
                if body.remaining() >= 4 && body.read_u32()? != 0 {
                    body.seek(0, Whence::Start)?;
                }
                walk_boxes(&mut body, record, depth + 1)?;
            }
            b"mvhd" if !truncated => parse_mvhd(&mut body, record)?,
            b"tkhd" if !truncated => parse_tkhd(&mut body, record)?,
            fourcc => {
                if let Some(&(_, key)) = ILST_ITEMS.iter().find(|(id, _)| *id == fourcc) {
                    if !truncated {
                        parse_ilst_item(&mut body, record, key)?;
                    }
                }
            }
        }

        if truncated {
            // The rest of the file is outside the window
            break;
        }
    }
    Ok(())
}

/// Movie header: timescale and duration
fn parse_mvhd(body: &mut ByteReader, record: &mut MetadataRecord) -> Result<()> {
    let version = body.read_u8()?;
    body.skip(3)?; // flags
    let (timescale, duration) = if version == 1 {
        body.skip(16)?; // creation and modification time
        (body.read_u32()?, body.read_u64()?)
    } else {
        body.skip(8)?;
        (body.read_u32()?, u64::from(body.read_u32()?))
    };
    if timescale > 0 {
        record.set("duration", duration as f64 / f64::from(timescale));
    }
    Ok(())
}

/// Track header: 16.16 fixed-point presentation size
fn parse_tkhd(body: &mut ByteReader, record: &mut MetadataRecord) -> Result<()> {
    let version = body.read_u8()?;
    body.skip(3)?; // flags
    if version == 1 {
        body.skip(8 + 8 + 4 + 4 + 8)?;
    } else {
        body.skip(4 + 4 + 4 + 4 + 4)?;
    }
    // reserved, layer, alternate group, volume, reserved, matrix
    body.skip(8 + 2 + 2 + 2 + 2 + 36)?;
    let width = body.read_u32()? >> 16;
    let height = body.read_u32()? >> 16;

    // Audio tracks report 0x0; the first visual track wins
    if width > 0 && height > 0 && record.width.is_none() {
        record.width = Some(width);
        record.height = Some(height);
    }
    Ok(())
}

/// `ilst` item holding a `data` box with a UTF-8 payload
fn parse_ilst_item(body: &mut ByteReader, record: &mut MetadataRecord, key: &str) -> Result<()> {
    while BoxHeaderLite::fits(body)? {
        let header = BoxHeaderLite::read(body)?;
        let remaining = body.remaining() as u64;
        let size = header.body_size.unwrap_or(remaining);
        if size > remaining {
            break;
        }
        let mut data = body.read_slice(size as usize)?;
        if &header.fourcc == b"data" && data.remaining() >= 8 {
            data.skip(8)?; // type indicator and locale
            let length = data.remaining();
            let text = String::from_utf8_lossy(data.read_bytes(length)?).into_owned();
            if !text.is_empty() && record.get(key).is_none() {
                record.set(key, text);
            }
            break;
        }
    }
    Ok(())
}
