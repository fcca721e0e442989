//! JPEG header parser with EXIF (TIFF) metadata
//!
//! JPEG Structure:
//! - SOI marker (FF D8)
//! - Marker segments: FF xx, 2-byte big-endian length (including itself), payload
//! - SOFn segments carry precision, height, width
//! - APP1 segments starting with "Exif\0\0" carry a TIFF structure
//!
//! TIFF Structure:
//! - Header: byte order (II/MM), magic (0x002A), IFD0 offset
//! - IFD (Image File Directory): tag count, tags (12 bytes each), next IFD offset
//! - Tags: tag ID (2), type (2), count (4), value/offset (4)
//!
//! Offsets inside the TIFF structure are relative to the TIFF header.

use super::HeaderParser;
use crate::{
    byte_reader::{ByteOrder, ByteReader, Whence},
    error::{Error, Result},
    record::MetadataRecord,
};

// JPEG markers
const SOI: u16 = 0xFFD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP1: u8 = 0xE1;
const TEM: u8 = 0x01;
const RST0: u8 = 0xD0;
const RST7: u8 = 0xD7;

const EXIF_SIGNATURE: &[u8] = b"Exif\0\0";

/// TIFF/EXIF tag IDs
mod tags {
    // IFD0 (main image) tags
    pub const MAKE: u16 = 0x010F;
    pub const MODEL: u16 = 0x0110;
    pub const ORIENTATION: u16 = 0x0112;
    pub const SOFTWARE: u16 = 0x0131;
    pub const DATE_TIME: u16 = 0x0132;
    pub const EXIF_IFD_POINTER: u16 = 0x8769;

    // EXIF sub-IFD tags
    pub const EXPOSURE_TIME: u16 = 0x829A;
    pub const F_NUMBER: u16 = 0x829D;
    pub const ISO_SPEED: u16 = 0x8827;
    pub const DATE_TIME_ORIGINAL: u16 = 0x9003;
    pub const FOCAL_LENGTH: u16 = 0x920A;
    pub const PIXEL_X_DIMENSION: u16 = 0xA002;
    pub const PIXEL_Y_DIMENSION: u16 = 0xA003;
}

/// TIFF data types
mod types {
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
}

/// Maximum number of tags in an IFD (prevents DOS attacks)
const MAX_IFD_TAGS: u16 = 1000;

/// JPEG parser: SOF dimensions plus EXIF camera fields
pub struct ExifParser;

impl HeaderParser for ExifParser {
    const ID: &'static str = "jpeg";
    const FILTER: &'static str = r"\.jpe?g$";
    const HEADER_BYTES: usize = 256 * 1024;

    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord> {
        reader.set_byte_order(ByteOrder::BigEndian);
        if reader.read_u16()? != SOI {
            return Err(Error::signature(Self::ID, "missing SOI marker"));
        }

        let mut record = MetadataRecord::new();
        let mut exif_size: Option<(u32, u32)> = None;

        // Marker prefix, marker, two length bytes
        while reader.remaining() >= 4 {
            if reader.read_u8()? != 0xFF {
                return Err(Error::InvalidFormat(format!(
                    "jpeg: expected marker at offset {}",
                    reader.position() - 1
                )));
            }
            // Fill bytes may run to the end of the window
            let mut marker = reader.read_u8()?;
            while marker == 0xFF && reader.remaining() > 0 {
                marker = reader.read_u8()?;
            }
            if marker == 0xFF {
                break;
            }

            if marker == SOS || marker == EOI {
                break;
            }
            if marker == TEM || (RST0..=RST7).contains(&marker) {
                continue;
            }

            if reader.remaining() < 2 {
                break;
            }
            let length = reader.read_u16()? as usize;
            if length < 2 {
                return Err(Error::InvalidFormat(format!(
                    "jpeg: segment length {length} for marker {marker:#04x}"
                )));
            }
            if length - 2 > reader.remaining() {
                // Segment continues past the fetched window
                break;
            }
            let mut segment = reader.read_slice(length - 2)?;

            if is_sof(marker) && record.width.is_none() {
                let _precision = segment.read_u8()?;
                let height = segment.read_u16()?;
                let width = segment.read_u16()?;
                record.width = Some(u32::from(width));
                record.height = Some(u32::from(height));
            } else if marker == APP1 && segment.remaining() > EXIF_SIGNATURE.len() {
                if segment.read_bytes(EXIF_SIGNATURE.len())? != EXIF_SIGNATURE {
                    continue;
                }
                let remaining = segment.remaining();
                let tiff = segment.read_slice(remaining)?;
                match parse_tiff(tiff, &mut record) {
                    Ok(size) => exif_size = exif_size.or(size),
                    Err(e) => tracing::debug!("jpeg: ignoring malformed EXIF block: {e}"),
                }
            }
        }

        if record.width.is_none() {
            if let Some((width, height)) = exif_size {
                record.width = Some(width);
                record.height = Some(height);
            }
        }

        Ok(record)
    }
}

/// SOF0..SOF15 except DHT (C4), JPG (C8) and DAC (CC)
fn is_sof(marker: u8) -> bool {
    (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// One 12-byte IFD entry; `value_at` is the position of the value/offset field
#[derive(Debug, Clone, Copy)]
struct IfdEntry {
    tag: u16,
    kind: u16,
    count: u32,
    value_at: usize,
}

/// Parse a TIFF structure, filling camera fields into `record`
///
/// Returns the pixel dimensions recorded in the EXIF sub-IFD, if any.
fn parse_tiff(mut tiff: ByteReader, record: &mut MetadataRecord) -> Result<Option<(u32, u32)>> {
    let order = match tiff.read_bytes(2)? {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return Err(Error::InvalidFormat("exif: bad TIFF byte order".into())),
    };
    tiff.set_byte_order(order);

    if tiff.read_u16()? != 0x002A {
        return Err(Error::InvalidFormat("exif: bad TIFF magic".into()));
    }

    let ifd0_offset = tiff.read_u32()?;
    let mut exif_ifd_offset = None;

    for entry in read_ifd(&mut tiff, ifd0_offset)? {
        match entry.tag {
            tags::MAKE => set_text(record, "make", &mut tiff, entry)?,
            tags::MODEL => set_text(record, "model", &mut tiff, entry)?,
            tags::SOFTWARE => set_text(record, "software", &mut tiff, entry)?,
            tags::DATE_TIME => set_text(record, "date_time", &mut tiff, entry)?,
            tags::ORIENTATION => {
                if let Some(orientation) = read_integer(&mut tiff, entry)? {
                    record.set("orientation", orientation);
                }
            }
            tags::EXIF_IFD_POINTER => exif_ifd_offset = read_integer(&mut tiff, entry)?,
            _ => {}
        }
    }

    let Some(offset) = exif_ifd_offset else {
        return Ok(None);
    };

    let mut pixel_x = None;
    let mut pixel_y = None;
    for entry in read_ifd(&mut tiff, offset)? {
        match entry.tag {
            tags::DATE_TIME_ORIGINAL => set_text(record, "date_time_original", &mut tiff, entry)?,
            tags::ISO_SPEED => {
                if let Some(iso) = read_integer(&mut tiff, entry)? {
                    record.set("iso", iso);
                }
            }
            tags::EXPOSURE_TIME => set_rational(record, "exposure_time", &mut tiff, entry)?,
            tags::F_NUMBER => set_rational(record, "f_number", &mut tiff, entry)?,
            tags::FOCAL_LENGTH => set_rational(record, "focal_length", &mut tiff, entry)?,
            tags::PIXEL_X_DIMENSION => pixel_x = read_integer(&mut tiff, entry)?,
            tags::PIXEL_Y_DIMENSION => pixel_y = read_integer(&mut tiff, entry)?,
            _ => {}
        }
    }

    Ok(pixel_x.zip(pixel_y))
}

/// Read the entries of the IFD at `offset`
fn read_ifd(tiff: &mut ByteReader, offset: u32) -> Result<Vec<IfdEntry>> {
    tiff.seek(i64::from(offset), Whence::Start)?;
    let tag_count = tiff.read_u16()?;
    if tag_count > MAX_IFD_TAGS {
        return Err(Error::InvalidFormat(format!(
            "exif: {tag_count} tags in IFD at {offset}"
        )));
    }

    let mut entries = Vec::with_capacity(tag_count as usize);
    for _ in 0..tag_count {
        let tag = tiff.read_u16()?;
        let kind = tiff.read_u16()?;
        let count = tiff.read_u32()?;
        let value_at = tiff.position();
        tiff.skip(4)?;
        entries.push(IfdEntry {
            tag,
            kind,
            count,
            value_at,
        });
    }
    Ok(entries)
}

/// SHORT or LONG value stored inline
fn read_integer(tiff: &mut ByteReader, entry: IfdEntry) -> Result<Option<u32>> {
    if entry.count == 0 {
        return Ok(None);
    }
    tiff.push_seek(entry.value_at as i64, Whence::Start)?;
    let value = match entry.kind {
        types::SHORT => Some(u32::from(tiff.read_u16()?)),
        types::LONG => Some(tiff.read_u32()?),
        _ => None,
    };
    tiff.pop_seek()?;
    Ok(value)
}

fn set_text(
    record: &mut MetadataRecord,
    key: &str,
    tiff: &mut ByteReader,
    entry: IfdEntry,
) -> Result<()> {
    if entry.kind != types::ASCII || entry.count == 0 {
        return Ok(());
    }

    let count = entry.count as usize;
    let position = if count <= 4 {
        // Value is inline in the tag
        entry.value_at as i64
    } else {
        tiff.push_seek(entry.value_at as i64, Whence::Start)?;
        let offset = tiff.read_u32();
        tiff.pop_seek()?;
        i64::from(offset?)
    };

    tiff.push_seek(position, Whence::Start)?;
    let text = tiff.read_null_terminated_string(count);
    tiff.pop_seek()?;

    let text = text?;
    let text = text.trim_end_matches('\0').trim();
    if !text.is_empty() {
        record.set(key, text);
    }
    Ok(())
}

fn set_rational(
    record: &mut MetadataRecord,
    key: &str,
    tiff: &mut ByteReader,
    entry: IfdEntry,
) -> Result<()> {
    if entry.kind != types::RATIONAL || entry.count == 0 {
        return Ok(());
    }

    tiff.push_seek(entry.value_at as i64, Whence::Start)?;
    let offset = tiff.read_u32();
    tiff.pop_seek()?;

    tiff.push_seek(i64::from(offset?), Whence::Start)?;
    let numerator = tiff.read_u32();
    let denominator = tiff.read_u32();
    tiff.pop_seek()?;

    let (numerator, denominator) = (numerator?, denominator?);
    if denominator != 0 {
        record.set(key, f64::from(numerator) / f64::from(denominator));
    }
    Ok(())
}
