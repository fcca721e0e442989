//! Still-image headers: PNG, BMP, GIF and WEBP
//!
//! PNG, BMP and GIF keep their dimensions at a fixed offset and share
//! [`parse_fixed_header`]. WEBP needs a look at the first chunk to pick the
//! bitstream layout.

use super::{
    dimension, parse_fixed_header, verify_signature, FixedLayout, HeaderParser, SignatureCheck,
};
use crate::{
    byte_reader::{ByteOrder, ByteReader, Whence},
    error::{Error, Result},
    record::MetadataRecord,
};

// PNG signature: 89 50 4E 47 0D 0A 1A 0A
const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

const PNG_LAYOUT: FixedLayout = FixedLayout {
    format: PngParser::ID,
    byte_order: ByteOrder::BigEndian,
    signatures: &[
        SignatureCheck {
            offset: 0,
            alternatives: &[PNG_SIGNATURE],
        },
        SignatureCheck {
            offset: 12,
            alternatives: &[b"IHDR"],
        },
    ],
    dimensions_at: 16,
    dimension_width: 4,
    signed: false,
};

const BMP_LAYOUT: FixedLayout = FixedLayout {
    format: BmpParser::ID,
    byte_order: ByteOrder::LittleEndian,
    signatures: &[SignatureCheck {
        offset: 0,
        alternatives: &[b"BM"],
    }],
    dimensions_at: 18,
    dimension_width: 4,
    signed: true,
};

const GIF_LAYOUT: FixedLayout = FixedLayout {
    format: GifParser::ID,
    byte_order: ByteOrder::LittleEndian,
    signatures: &[SignatureCheck {
        offset: 0,
        alternatives: &[b"GIF87a", b"GIF89a"],
    }],
    dimensions_at: 6,
    dimension_width: 2,
    signed: false,
};

/// PNG: signature, IHDR, big-endian width and height
pub struct PngParser;

impl HeaderParser for PngParser {
    const ID: &'static str = "png";
    const FILTER: &'static str = r"\.png$";
    const HEADER_BYTES: usize = 24;

    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord> {
        parse_fixed_header(reader, &PNG_LAYOUT)
    }
}

/// BMP: "BM", little-endian width and height at byte 18
pub struct BmpParser;

impl HeaderParser for BmpParser {
    const ID: &'static str = "bmp";
    const FILTER: &'static str = r"\.bmp$";
    const HEADER_BYTES: usize = 26;

    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord> {
        parse_fixed_header(reader, &BMP_LAYOUT)
    }
}

/// GIF: GIF87a/GIF89a, then the logical screen size
pub struct GifParser;

impl HeaderParser for GifParser {
    const ID: &'static str = "gif";
    const FILTER: &'static str = r"\.gif$";
    const HEADER_BYTES: usize = 10;

    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord> {
        parse_fixed_header(reader, &GIF_LAYOUT)
    }
}

// VP8 key frame start code, bytes 9d 01 2a
const VP8_START_CODE: u32 = 0x2a019d;
// VP8L signature byte
const VP8L_SIGNATURE: u8 = 0x2f;

/// WEBP: RIFF container with a VP8, VP8L or VP8X first chunk
pub struct WebpParser;

impl HeaderParser for WebpParser {
    const ID: &'static str = "webp";
    const FILTER: &'static str = r"\.webp$";
    const HEADER_BYTES: usize = 30;

    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord> {
        reader.set_byte_order(ByteOrder::LittleEndian);
        verify_signature(
            reader,
            Self::ID,
            &SignatureCheck {
                offset: 0,
                alternatives: &[b"RIFF"],
            },
        )?;
        verify_signature(
            reader,
            Self::ID,
            &SignatureCheck {
                offset: 8,
                alternatives: &[b"WEBP"],
            },
        )?;

        reader.seek(12, Whence::Start)?;
        let chunk = reader.read_string(4)?;
        let (width, height) = match chunk.as_str() {
            "VP8 " => {
                reader.seek(23, Whence::Start)?;
                let low = u32::from(reader.read_u16()?);
                let high = u32::from(reader.read_u8()?);
                let start_code = (high << 16) | low;
                if start_code != VP8_START_CODE {
                    return Err(Error::signature(
                        Self::ID,
                        format!("bad VP8 start code {start_code:#08x}"),
                    ));
                }
                let field = reader.read_u32()?;
                (field & 0x3fff, (field >> 16) & 0x3fff)
            }
            "VP8L" => {
                reader.seek(20, Whence::Start)?;
                let signature = reader.read_u8()?;
                if signature != VP8L_SIGNATURE {
                    return Err(Error::signature(
                        Self::ID,
                        format!("bad VP8L signature {signature:#04x}"),
                    ));
                }
                let field = reader.read_u32()?;
                ((field & 0x3fff) + 1, ((field >> 14) & 0x3fff) + 1)
            }
            "VP8X" => {
                // Canvas size minus one, 24 bits each
                reader.seek(24, Whence::Start)?;
                (reader.read_u24()? + 1, reader.read_u24()? + 1)
            }
            other => {
                return Err(Error::signature(
                    Self::ID,
                    format!("unknown first chunk {other:?}"),
                ))
            }
        };

        Ok(MetadataRecord::with_dimensions(
            dimension(Self::ID, u64::from(width))?,
            dimension(Self::ID, u64::from(height))?,
        ))
    }
}
