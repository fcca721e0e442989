//! Bounds-checked cursor over a fetched header window
//!
//! Every format header is a fixed grammar of integers and strings at known
//! offsets. [`ByteReader`] is the one place that knows about bounds and byte
//! order, so parsers never index raw slices themselves.
//!
//! Reads and seeks that leave the buffer fail with [`Error::OutOfBounds`];
//! the reader never clamps or wraps.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use std::sync::Arc;

/// Immutable prefix of a file's contents
///
/// `file_offset` records where in the original file the first byte of the
/// buffer sits, so nested readers can still report absolute positions.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: Arc<[u8]>,
    file_offset: u64,
}

impl ByteBuffer {
    /// Wrap `data` which starts at `file_offset` in the original file
    pub fn new(data: impl Into<Arc<[u8]>>, file_offset: u64) -> Self {
        Self {
            data: data.into(),
            file_offset,
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Offset of the first byte within the original file
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data, 0)
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self::new(data, 0)
    }
}

/// Interpretation of multi-byte integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Most significant byte first
    #[default]
    BigEndian,
    /// Least significant byte first
    LittleEndian,
}

/// Reference point for [`ByteReader::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Whence {
    /// Absolute position from the start of the reader
    #[default]
    Start,
    /// Relative to the current position
    Current,
    /// Relative to the end of the reader
    End,
}

/// Cursor over a [`ByteBuffer`] (or a slice of one)
#[derive(Debug, Clone)]
pub struct ByteReader {
    data: Arc<[u8]>,
    start: usize,
    end: usize,
    position: usize,
    byte_order: ByteOrder,
    file_offset: u64,
    seek_stack: Vec<usize>,
}

impl ByteReader {
    /// Create a reader positioned at byte 0 of `buffer`, big-endian
    pub fn new(buffer: &ByteBuffer) -> Self {
        Self {
            data: Arc::clone(&buffer.data),
            start: 0,
            end: buffer.data.len(),
            position: 0,
            byte_order: ByteOrder::default(),
            file_offset: buffer.file_offset,
            seek_stack: Vec::new(),
        }
    }

    /// Create a reader over an owned byte vector starting at file offset 0
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Self {
        Self::new(&ByteBuffer::new(data, 0))
    }

    /// Set the byte order for subsequent multi-byte reads
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Current byte order
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Cursor position relative to the start of this reader
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of bytes visible through this reader
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// True if the reader covers no bytes
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes left between the cursor and the end
    pub fn remaining(&self) -> usize {
        self.len() - self.position
    }

    /// Absolute file offset of byte 0 of this reader
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Absolute file offset of the cursor
    pub fn file_position(&self) -> u64 {
        self.file_offset + self.position as u64
    }

    /// Move the cursor relative to `whence`
    ///
    /// Fails if the target is negative or past the end. Seeking exactly to
    /// the end is allowed.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<()> {
        let base = match whence {
            Whence::Start => 0i64,
            Whence::Current => self.position as i64,
            Whence::End => self.len() as i64,
        };
        let target = base
            .checked_add(offset)
            .ok_or_else(|| self.out_of_bounds(i64::MAX))?;
        if target < 0 || target > self.len() as i64 {
            return Err(self.out_of_bounds(target));
        }
        self.position = target as usize;
        Ok(())
    }

    /// Advance the cursor by `count` bytes
    pub fn skip(&mut self, count: usize) -> Result<()> {
        let offset = i64::try_from(count).map_err(|_| self.out_of_bounds(i64::MAX))?;
        self.seek(offset, Whence::Current)
    }

    /// Save the current position and seek
    pub fn push_seek(&mut self, offset: i64, whence: Whence) -> Result<()> {
        let saved = self.position;
        self.seek(offset, whence)?;
        self.seek_stack.push(saved);
        Ok(())
    }

    /// Restore the position saved by the matching [`push_seek`](Self::push_seek)
    pub fn pop_seek(&mut self) -> Result<()> {
        let saved = self
            .seek_stack
            .pop()
            .ok_or_else(|| Error::InvalidFormat("pop_seek without push_seek".into()))?;
        self.position = saved;
        Ok(())
    }

    /// Borrow the next `length` bytes and advance
    pub fn read_bytes(&mut self, length: usize) -> Result<&[u8]> {
        let range = self.take(length)?;
        Ok(&self.data[range])
    }

    /// Read `length` bytes as a one-byte-per-character string
    pub fn read_string(&mut self, length: usize) -> Result<String> {
        let bytes = self.read_bytes(length)?;
        Ok(bytes.iter().map(|&b| char::from(b)).collect())
    }

    /// Read a NUL-terminated string occupying at most `max_length` bytes
    ///
    /// The terminator is consumed but not returned. Bytes after it are not
    /// required; running out before the terminator or `max_length` is an
    /// [`Error::OutOfBounds`] and leaves the cursor where it was.
    pub fn read_null_terminated_string(&mut self, max_length: usize) -> Result<String> {
        let available = &self.data[self.start + self.position..self.end];
        let window = &available[..max_length.min(available.len())];
        let (text, consumed) = match window.iter().position(|&b| b == 0) {
            Some(nul) => (&window[..nul], nul + 1),
            None if window.len() == max_length => (window, max_length),
            None => return Err(self.out_of_bounds_after(max_length)),
        };
        let text = text.iter().map(|&b| char::from(b)).collect();
        self.position += consumed;
        Ok(text)
    }

    /// Read `length` bytes of UTF-16 text
    ///
    /// A leading byte order mark overrides `order`. Decoding stops at the
    /// first NUL code unit; unpaired surrogates become U+FFFD.
    pub fn read_string_utf16(&mut self, length: usize, order: ByteOrder) -> Result<String> {
        let bytes = self.read_bytes(length)?;
        let (order, body) = match bytes {
            [0xFE, 0xFF, rest @ ..] => (ByteOrder::BigEndian, rest),
            [0xFF, 0xFE, rest @ ..] => (ByteOrder::LittleEndian, rest),
            _ => (order, bytes),
        };
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| match order {
                ByteOrder::BigEndian => BigEndian::read_u16(pair),
                ByteOrder::LittleEndian => LittleEndian::read_u16(pair),
            })
            .take_while(|&unit| unit != 0)
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }

    /// Read an unsigned integer of `width` bytes (1 to 8)
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        check_width(width)?;
        let order = self.byte_order;
        let bytes = self.read_bytes(width)?;
        Ok(match order {
            ByteOrder::BigEndian => BigEndian::read_uint(bytes, width),
            ByteOrder::LittleEndian => LittleEndian::read_uint(bytes, width),
        })
    }

    /// Read a two's complement integer of `width` bytes (1 to 8)
    pub fn read_int(&mut self, width: usize) -> Result<i64> {
        check_width(width)?;
        let order = self.byte_order;
        let bytes = self.read_bytes(width)?;
        Ok(match order {
            ByteOrder::BigEndian => BigEndian::read_int(bytes, width),
            ByteOrder::LittleEndian => LittleEndian::read_int(bytes, width),
        })
    }

    /// Read a 1, 2, 4 or 8 byte integer, unsigned unless `signed`
    ///
    /// Widened to `i128` so every unsigned 64-bit value stays exact.
    pub fn read_scalar(&mut self, width: usize, signed: bool) -> Result<i128> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(Error::InvalidFormat(format!(
                "Scalar width must be 1, 2, 4 or 8 (got {width})"
            )));
        }
        if signed {
            self.read_int(width).map(i128::from)
        } else {
            self.read_uint(width).map(i128::from)
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        Ok(self.read_uint(3)? as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_uint(4)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_uint(8)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_int(4)? as i32)
    }

    /// Split off the next `length` bytes as an independent reader and advance
    ///
    /// The slice shares the underlying buffer, inherits the byte order, and
    /// reports file offsets relative to the original file.
    pub fn read_slice(&mut self, length: usize) -> Result<ByteReader> {
        let file_offset = self.file_position();
        let range = self.take(length)?;
        Ok(ByteReader {
            data: Arc::clone(&self.data),
            start: range.start,
            end: range.end,
            position: 0,
            byte_order: self.byte_order,
            file_offset,
            seek_stack: Vec::new(),
        })
    }

    fn check_available(&self, length: usize) -> Result<()> {
        if length > self.remaining() {
            return Err(self.out_of_bounds_after(length));
        }
        Ok(())
    }

    fn out_of_bounds_after(&self, length: usize) -> Error {
        let end = i64::try_from(self.position.saturating_add(length)).unwrap_or(i64::MAX);
        self.out_of_bounds(end)
    }

    /// Absolute index range of the next `length` bytes; advances the cursor
    fn take(&mut self, length: usize) -> Result<std::ops::Range<usize>> {
        self.check_available(length)?;
        let begin = self.start + self.position;
        self.position += length;
        Ok(begin..begin + length)
    }

    fn out_of_bounds(&self, position: i64) -> Error {
        Error::OutOfBounds {
            position,
            length: self.len(),
        }
    }
}

fn check_width(width: usize) -> Result<()> {
    if (1..=8).contains(&width) {
        Ok(())
    } else {
        Err(Error::InvalidFormat(format!(
            "Integer width must be between 1 and 8 (got {width})"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order() {
        let mut reader = ByteReader::from_bytes(vec![0x01, 0x00, 0x00, 0x00]);
        reader.set_byte_order(ByteOrder::LittleEndian);
        assert_eq!(reader.read_scalar(4, false).unwrap(), 1);

        reader.seek(0, Whence::Start).unwrap();
        reader.set_byte_order(ByteOrder::BigEndian);
        assert_eq!(reader.read_scalar(4, false).unwrap(), 16_777_216);
    }

    #[test]
    fn test_signed_and_wide_scalars() {
        let mut reader = ByteReader::from_bytes(vec![0xFF, 0xFE]);
        assert_eq!(reader.read_scalar(2, true).unwrap(), -2);

        let mut reader = ByteReader::from_bytes(vec![0xFF; 8]);
        assert_eq!(reader.read_scalar(8, false).unwrap(), u64::MAX as i128);

        let mut reader = ByteReader::from_bytes(vec![0; 8]);
        assert!(matches!(
            reader.read_scalar(3, false),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_seek_bounds() {
        let mut reader = ByteReader::from_bytes(vec![0u8; 10]);
        assert!(reader.seek(10, Whence::Start).is_ok());
        assert!(matches!(
            reader.seek(11, Whence::Start),
            Err(Error::OutOfBounds { position: 11, length: 10 })
        ));
        assert!(matches!(
            reader.seek(-1, Whence::Start),
            Err(Error::OutOfBounds { .. })
        ));
        // A failed seek leaves the cursor where it was
        assert_eq!(reader.position(), 10);

        reader.seek(-4, Whence::End).unwrap();
        assert_eq!(reader.position(), 6);
        reader.seek(2, Whence::Current).unwrap();
        assert_eq!(reader.position(), 8);
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = ByteReader::from_bytes(vec![1, 2, 3]);
        reader.skip(2).unwrap();
        assert!(matches!(reader.read_u16(), Err(Error::OutOfBounds { .. })));
        assert!(matches!(
            reader.read_string(2),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(reader.read_u8().unwrap(), 3);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_strings() {
        let mut reader = ByteReader::from_bytes(b"GIF89a\xE9abc\0zz".to_vec());
        assert_eq!(reader.read_string(6).unwrap(), "GIF89a");
        assert_eq!(reader.read_string(1).unwrap(), "\u{e9}");
        assert_eq!(reader.read_null_terminated_string(6).unwrap(), "abc");
        assert_eq!(reader.position(), 11);
    }

    #[test]
    fn test_null_terminated_near_end() {
        // Terminator before the window ends; max_length reaches past it
        let mut reader = ByteReader::from_bytes(b"Canon\0".to_vec());
        assert_eq!(reader.read_null_terminated_string(32).unwrap(), "Canon");
        assert_eq!(reader.remaining(), 0);

        // Cut at max_length without a terminator
        let mut reader = ByteReader::from_bytes(b"abcdef".to_vec());
        assert_eq!(reader.read_null_terminated_string(4).unwrap(), "abcd");
        assert_eq!(reader.position(), 4);

        // Window ends first
        let mut reader = ByteReader::from_bytes(b"abc".to_vec());
        assert!(matches!(
            reader.read_null_terminated_string(8),
            Err(Error::OutOfBounds { .. })
        ));
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_utf16_with_bom() {
        let mut data = vec![0xFF, 0xFE];
        data.extend("hé".encode_utf16().flat_map(|u| u.to_le_bytes()));
        let len = data.len();
        let mut reader = ByteReader::from_bytes(data);
        assert_eq!(
            reader.read_string_utf16(len, ByteOrder::BigEndian).unwrap(),
            "hé"
        );
    }

    #[test]
    fn test_push_pop_seek() {
        let mut reader = ByteReader::from_bytes(vec![0u8; 16]);
        reader.skip(3).unwrap();
        reader.push_seek(12, Whence::Start).unwrap();
        assert_eq!(reader.position(), 12);
        reader.pop_seek().unwrap();
        assert_eq!(reader.position(), 3);
        assert!(reader.pop_seek().is_err());
    }

    #[test]
    fn test_slice_is_independent() {
        let buffer = ByteBuffer::new(vec![0, 1, 2, 3, 4, 5, 6, 7], 100);
        let mut reader = ByteReader::new(&buffer);
        reader.skip(2).unwrap();

        let mut slice = reader.read_slice(4).unwrap();
        assert_eq!(reader.position(), 6);
        assert_eq!(slice.len(), 4);
        assert_eq!(slice.file_offset(), 102);
        assert_eq!(slice.read_u8().unwrap(), 2);
        assert!(slice.seek(5, Whence::Start).is_err());
        slice.seek(0, Whence::End).unwrap();
        assert_eq!(slice.file_position(), 106);
    }
}
