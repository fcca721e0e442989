//! Synthetic header builders for tests.
//!
//! Each builder produces the smallest byte sequence the matching parser
//! accepts, so tests can corrupt single bytes and check the outcome.
//!
//! # Usage
//!
//! ```
//! use media_meta::test_utils::*;
//!
//! let png = png_header(100, 50);
//! assert_eq!(png.len(), 24);
//!
//! let mp4 = Mp4Builder::new(b"isom")
//!     .movie_header(0, 1000, 5_000)
//!     .track(1920, 1080)
//!     .build();
//! assert_eq!(&mp4[4..8], b"ftyp");
//! ```

use crate::byte_reader::ByteOrder;

fn u16_bytes(order: ByteOrder, value: u16) -> [u8; 2] {
    match order {
        ByteOrder::BigEndian => value.to_be_bytes(),
        ByteOrder::LittleEndian => value.to_le_bytes(),
    }
}

fn u32_bytes(order: ByteOrder, value: u32) -> [u8; 4] {
    match order {
        ByteOrder::BigEndian => value.to_be_bytes(),
        ByteOrder::LittleEndian => value.to_le_bytes(),
    }
}

// ---------------------------------------------------------------------------
// Still images
// ---------------------------------------------------------------------------

/// PNG signature followed by the IHDR length, type, width and height
pub fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut out = b"\x89PNG\r\n\x1a\n".to_vec();
    out.extend_from_slice(&13u32.to_be_bytes());
    out.extend_from_slice(b"IHDR");
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out
}

/// BITMAPFILEHEADER plus the start of a BITMAPINFOHEADER
pub fn bmp_header(width: i32, height: i32) -> Vec<u8> {
    let mut out = b"BM".to_vec();
    out.extend_from_slice(&0u32.to_le_bytes()); // file size
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved
    out.extend_from_slice(&54u32.to_le_bytes()); // pixel data offset
    out.extend_from_slice(&40u32.to_le_bytes()); // info header size
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out
}

/// GIF signature with `version` (e.g. `b"89a"`) and logical screen size
pub fn gif_header(version: &[u8; 3], width: u16, height: u16) -> Vec<u8> {
    let mut out = b"GIF".to_vec();
    out.extend_from_slice(version);
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out
}

fn riff_webp(chunk: &[u8; 4], chunk_size: u32) -> Vec<u8> {
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&(chunk_size + 12).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(chunk);
    out.extend_from_slice(&chunk_size.to_le_bytes());
    out
}

/// Simple (lossy) WEBP: VP8 key frame header
pub fn webp_lossy_header(width: u16, height: u16) -> Vec<u8> {
    let mut out = riff_webp(b"VP8 ", 10);
    out.extend_from_slice(&[0x10, 0x02, 0x00]); // frame tag
    out.extend_from_slice(&[0x9d, 0x01, 0x2a]); // start code
    out.extend_from_slice(&width.to_le_bytes());
    out.extend_from_slice(&height.to_le_bytes());
    out
}

/// Lossless WEBP: VP8L signature and packed 14-bit sizes
pub fn webp_lossless_header(width: u32, height: u32) -> Vec<u8> {
    let mut out = riff_webp(b"VP8L", 5);
    out.push(0x2f);
    let packed = (width - 1) & 0x3fff | ((height - 1) & 0x3fff) << 14;
    out.extend_from_slice(&packed.to_le_bytes());
    out.resize(30, 0);
    out
}

/// Extended WEBP: VP8X flags and 24-bit canvas size
pub fn webp_extended_header(width: u32, height: u32) -> Vec<u8> {
    let mut out = riff_webp(b"VP8X", 10);
    out.extend_from_slice(&[0u8; 4]); // flags and reserved
    out.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    out.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    out
}

// ---------------------------------------------------------------------------
// JPEG / EXIF
// ---------------------------------------------------------------------------

/// Contents of the EXIF block written by [`jpeg_header`]
#[derive(Debug, Clone, Default)]
pub struct ExifFixture {
    pub order: ByteOrder,
    pub make: Option<&'static str>,
    pub model: Option<&'static str>,
    pub orientation: Option<u16>,
    pub date_time_original: Option<&'static str>,
    /// PixelXDimension / PixelYDimension in the EXIF sub-IFD
    pub pixel_size: Option<(u32, u32)>,
}

enum TiffValue {
    Inline([u8; 4]),
    Data(Vec<u8>),
}

struct TiffEntry {
    tag: u16,
    kind: u16,
    count: u32,
    value: TiffValue,
}

impl TiffEntry {
    fn ascii(tag: u16, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        let count = bytes.len() as u32;
        let value = if bytes.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..bytes.len()].copy_from_slice(&bytes);
            TiffValue::Inline(inline)
        } else {
            TiffValue::Data(bytes)
        };
        Self {
            tag,
            kind: 2,
            count,
            value,
        }
    }

    fn short(order: ByteOrder, tag: u16, value: u16) -> Self {
        let mut inline = [0u8; 4];
        inline[..2].copy_from_slice(&u16_bytes(order, value));
        Self {
            tag,
            kind: 3,
            count: 1,
            value: TiffValue::Inline(inline),
        }
    }

    fn long(order: ByteOrder, tag: u16, value: u32) -> Self {
        Self {
            tag,
            kind: 4,
            count: 1,
            value: TiffValue::Inline(u32_bytes(order, value)),
        }
    }
}

fn ifd_len(entries: &[TiffEntry]) -> usize {
    2 + entries.len() * 12 + 4
}

/// Append one IFD; out-of-line values go to `data`, which starts at `data_at`
fn write_ifd(
    order: ByteOrder,
    entries: &[TiffEntry],
    out: &mut Vec<u8>,
    data: &mut Vec<u8>,
    data_at: usize,
) {
    out.extend_from_slice(&u16_bytes(order, entries.len() as u16));
    for entry in entries {
        out.extend_from_slice(&u16_bytes(order, entry.tag));
        out.extend_from_slice(&u16_bytes(order, entry.kind));
        out.extend_from_slice(&u32_bytes(order, entry.count));
        match &entry.value {
            TiffValue::Inline(bytes) => out.extend_from_slice(bytes),
            TiffValue::Data(bytes) => {
                let offset = (data_at + data.len()) as u32;
                out.extend_from_slice(&u32_bytes(order, offset));
                data.extend_from_slice(bytes);
            }
        }
    }
    out.extend_from_slice(&0u32.to_be_bytes()); // no next IFD
}

/// TIFF structure holding the fixture's fields
pub fn tiff_block(fixture: &ExifFixture) -> Vec<u8> {
    let order = fixture.order;

    let mut sub = Vec::new();
    if let Some(date) = fixture.date_time_original {
        sub.push(TiffEntry::ascii(0x9003, date));
    }
    if let Some((x, y)) = fixture.pixel_size {
        sub.push(TiffEntry::long(order, 0xA002, x));
        sub.push(TiffEntry::long(order, 0xA003, y));
    }

    let mut ifd0 = Vec::new();
    if let Some(make) = fixture.make {
        ifd0.push(TiffEntry::ascii(0x010F, make));
    }
    if let Some(model) = fixture.model {
        ifd0.push(TiffEntry::ascii(0x0110, model));
    }
    if let Some(orientation) = fixture.orientation {
        ifd0.push(TiffEntry::short(order, 0x0112, orientation));
    }
    let sub_at = 8 + ifd_len(&ifd0) + if sub.is_empty() { 0 } else { 12 };
    if !sub.is_empty() {
        ifd0.push(TiffEntry::long(order, 0x8769, sub_at as u32));
    }

    let data_at = sub_at + if sub.is_empty() { 0 } else { ifd_len(&sub) };

    let mut out = match order {
        ByteOrder::BigEndian => b"MM".to_vec(),
        ByteOrder::LittleEndian => b"II".to_vec(),
    };
    out.extend_from_slice(&u16_bytes(order, 0x002A));
    out.extend_from_slice(&u32_bytes(order, 8));

    let mut data = Vec::new();
    write_ifd(order, &ifd0, &mut out, &mut data, data_at);
    if !sub.is_empty() {
        write_ifd(order, &sub, &mut out, &mut data, data_at);
    }
    out.extend_from_slice(&data);
    out
}

/// SOI, optional APP1 Exif, SOF0, SOS and EOI
pub fn jpeg_header(exif: Option<&ExifFixture>, width: u16, height: u16) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];

    if let Some(fixture) = exif {
        let tiff = tiff_block(fixture);
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
        out.extend_from_slice(b"Exif\0\0");
        out.extend_from_slice(&tiff);
    }

    // Baseline frame header, three components
    out.extend_from_slice(&[0xFF, 0xC0, 0x00, 17, 8]);
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&[3, 1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1]);

    out.extend_from_slice(&[0xFF, 0xDA, 0x00, 12, 3, 1, 0x00, 2, 0x11, 3, 0x11, 0, 0x3F, 0]);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

// ---------------------------------------------------------------------------
// ID3v2
// ---------------------------------------------------------------------------

/// One ID3v2 text frame
#[derive(Debug, Clone)]
pub struct Id3Frame {
    pub id: &'static str,
    /// Encoding byte followed by the encoded text
    pub body: Vec<u8>,
}

impl Id3Frame {
    /// ISO-8859-1 text (encoding 0)
    pub fn latin1(id: &'static str, text: &str) -> Self {
        let mut body = vec![0];
        body.extend(text.chars().map(|c| c as u8));
        Self { id, body }
    }

    /// UTF-16 with a little-endian BOM (encoding 1)
    pub fn utf16(id: &'static str, text: &str) -> Self {
        let mut body = vec![1, 0xFF, 0xFE];
        for unit in text.encode_utf16() {
            body.extend_from_slice(&unit.to_le_bytes());
        }
        Self { id, body }
    }

    /// UTF-8 text (encoding 3)
    pub fn utf8(id: &'static str, text: &str) -> Self {
        let mut body = vec![3];
        body.extend_from_slice(text.as_bytes());
        Self { id, body }
    }
}

/// Encode a value below 2^28 as a syncsafe integer
pub fn syncsafe_bytes(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

/// ID3v2.`major` tag without padding
pub fn id3_tag(major: u8, frames: &[Id3Frame]) -> Vec<u8> {
    let mut body = Vec::new();
    for frame in frames {
        body.extend_from_slice(frame.id.as_bytes());
        let size = frame.body.len() as u32;
        match major {
            2 => body.extend_from_slice(&size.to_be_bytes()[1..]),
            3 => body.extend_from_slice(&size.to_be_bytes()),
            _ => body.extend_from_slice(&syncsafe_bytes(size)),
        }
        if major >= 3 {
            body.extend_from_slice(&[0, 0]); // frame flags
        }
        body.extend_from_slice(&frame.body);
    }

    let mut out = b"ID3".to_vec();
    out.extend_from_slice(&[major, 0, 0]);
    out.extend_from_slice(&syncsafe_bytes(body.len() as u32));
    out.extend_from_slice(&body);
    out
}

// ---------------------------------------------------------------------------
// MP4
// ---------------------------------------------------------------------------

/// Serialize one box with a 32-bit size
pub fn bmff_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

/// Builds `ftyp` plus an optional `moov` with mvhd, tracks and ilst tags
#[derive(Debug, Clone)]
pub struct Mp4Builder {
    brand: [u8; 4],
    movie_header: Option<Vec<u8>>,
    tracks: Vec<Vec<u8>>,
    tags: Vec<Vec<u8>>,
}

impl Mp4Builder {
    pub fn new(brand: &[u8; 4]) -> Self {
        Self {
            brand: *brand,
            movie_header: None,
            tracks: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// `mvhd` of the given version
    pub fn movie_header(mut self, version: u8, timescale: u32, duration: u64) -> Self {
        let mut body = vec![version, 0, 0, 0];
        if version == 1 {
            body.extend_from_slice(&[0u8; 16]); // creation, modification
            body.extend_from_slice(&timescale.to_be_bytes());
            body.extend_from_slice(&duration.to_be_bytes());
        } else {
            body.extend_from_slice(&[0u8; 8]);
            body.extend_from_slice(&timescale.to_be_bytes());
            body.extend_from_slice(&(duration as u32).to_be_bytes());
        }
        body.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
        body.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
        body.extend_from_slice(&[0u8; 10]);
        body.extend_from_slice(&[0u8; 36]); // matrix
        body.extend_from_slice(&[0u8; 24]); // pre-defined
        body.extend_from_slice(&2u32.to_be_bytes()); // next track id
        self.movie_header = Some(bmff_box(b"mvhd", &body));
        self
    }

    /// `trak` holding a version 0 `tkhd`; use 0x0 for audio tracks
    pub fn track(mut self, width: u32, height: u32) -> Self {
        let mut body = vec![0, 0, 0, 3];
        body.extend_from_slice(&[0u8; 8]); // creation, modification
        body.extend_from_slice(&(self.tracks.len() as u32 + 1).to_be_bytes());
        body.extend_from_slice(&[0u8; 8]); // reserved, duration
        body.extend_from_slice(&[0u8; 8 + 2 + 2 + 2 + 2 + 36]);
        body.extend_from_slice(&(width << 16).to_be_bytes());
        body.extend_from_slice(&(height << 16).to_be_bytes());
        self.tracks.push(bmff_box(b"trak", &bmff_box(b"tkhd", &body)));
        self
    }

    /// iTunes-style text item, e.g. `b"\xA9nam"`
    pub fn tag(mut self, item: &[u8; 4], text: &str) -> Self {
        let mut data = 1u32.to_be_bytes().to_vec(); // UTF-8
        data.extend_from_slice(&0u32.to_be_bytes()); // locale
        data.extend_from_slice(text.as_bytes());
        self.tags.push(bmff_box(item, &bmff_box(b"data", &data)));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut ftyp = self.brand.to_vec();
        ftyp.extend_from_slice(&0u32.to_be_bytes());
        ftyp.extend_from_slice(&self.brand);
        ftyp.extend_from_slice(b"mp41");
        let mut out = bmff_box(b"ftyp", &ftyp);

        let mut moov = Vec::new();
        if let Some(mvhd) = &self.movie_header {
            moov.extend_from_slice(mvhd);
        }
        for track in &self.tracks {
            moov.extend_from_slice(track);
        }
        if !self.tags.is_empty() {
            let mut hdlr = vec![0u8; 8];
            hdlr.extend_from_slice(b"mdir");
            hdlr.extend_from_slice(&[0u8; 13]);

            let mut meta = vec![0u8; 4]; // full box version and flags
            meta.extend_from_slice(&bmff_box(b"hdlr", &hdlr));
            meta.extend_from_slice(&bmff_box(b"ilst", &self.tags.concat()));
            moov.extend_from_slice(&bmff_box(b"udta", &bmff_box(b"meta", &meta)));
        }
        if !moov.is_empty() {
            out.extend_from_slice(&bmff_box(b"moov", &moov));
        }
        out
    }
}
