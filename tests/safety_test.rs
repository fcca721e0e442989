//! Safety tests - bounds checking and hostile input
//!
//! These tests verify that no input makes a reader or parser panic.
//! Comprehensive testing should be done with fuzzing (cargo-fuzz).

use media_meta::{ByteReader, Error, Format, Whence};
use proptest::prelude::*;

proptest! {
    #[test]
    fn reads_past_end_fail_without_moving(
        data in proptest::collection::vec(any::<u8>(), 0..64),
        start in 0usize..64,
        length in 0usize..128,
    ) {
        let mut reader = ByteReader::from_bytes(data.clone());
        let start = start.min(data.len());
        reader.seek(start as i64, Whence::Start).unwrap();

        let result = reader.read_bytes(length).map(|b| b.to_vec());
        if start + length <= data.len() {
            prop_assert_eq!(result.unwrap(), data[start..start + length].to_vec());
            prop_assert_eq!(reader.position(), start + length);
        } else {
            let is_out_of_bounds = matches!(result, Err(Error::OutOfBounds { .. }));
            prop_assert!(is_out_of_bounds);
            prop_assert_eq!(reader.position(), start);
        }
    }

    #[test]
    fn seek_outside_reader_is_rejected(
        len in 0usize..32,
        offset in -64i64..64,
    ) {
        let mut reader = ByteReader::from_bytes(vec![0u8; len]);
        let result = reader.seek(offset, Whence::Start);
        prop_assert_eq!(result.is_ok(), (0..=len as i64).contains(&offset));
        if result.is_err() {
            prop_assert_eq!(reader.position(), 0);
        }
    }

    #[test]
    fn parsers_never_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        for format in Format::all() {
            let mut reader = ByteReader::from_bytes(data.clone());
            let _ = format.parse_header(&mut reader);
        }
    }
}

#[test]
fn test_huge_lengths_are_out_of_bounds() {
    let mut reader = ByteReader::from_bytes(vec![1u8, 2, 3]);
    assert!(matches!(
        reader.read_bytes(usize::MAX),
        Err(Error::OutOfBounds { .. })
    ));
    assert!(reader.skip(usize::MAX).is_err());
    assert!(reader.seek(i64::MAX, Whence::Current).is_err());
    assert!(reader.read_slice(4).is_err());
    assert_eq!(reader.position(), 0);
}

#[test]
fn test_empty_input_for_every_format() {
    for format in Format::all() {
        let mut reader = ByteReader::from_bytes(Vec::new());
        assert!(format.parse_header(&mut reader).is_err(), "{format}");
    }
}

#[cfg(feature = "test-utils")]
mod truncation {
    use super::*;
    use media_meta::test_utils::*;

    /// Every prefix of a valid header must parse or fail cleanly
    fn check_prefixes(format: Format, full: &[u8]) {
        for cut in 0..full.len() {
            let mut reader = ByteReader::from_bytes(full[..cut].to_vec());
            let _ = format.parse_header(&mut reader);
        }
        let mut reader = ByteReader::from_bytes(full.to_vec());
        assert!(format.parse_header(&mut reader).is_ok(), "{format}");
    }

    #[test]
    #[cfg(feature = "images")]
    fn test_image_prefixes() {
        check_prefixes(Format::Png, &png_header(10, 10));
        check_prefixes(Format::Bmp, &bmp_header(10, -10));
        check_prefixes(Format::Gif, &gif_header(b"89a", 10, 10));
        check_prefixes(Format::Webp, &webp_lossy_header(10, 10));
        check_prefixes(Format::Webp, &webp_lossless_header(10, 10));
    }

    #[test]
    #[cfg(feature = "exif")]
    fn test_jpeg_prefixes() {
        let fixture = ExifFixture {
            make: Some("Leica Camera AG"),
            date_time_original: Some("2023:01:01 00:00:00"),
            pixel_size: Some((100, 100)),
            ..ExifFixture::default()
        };
        check_prefixes(Format::Jpeg, &jpeg_header(Some(&fixture), 100, 100));
    }

    #[test]
    #[cfg(feature = "id3")]
    fn test_id3_prefixes() {
        let tag = id3_tag(
            3,
            &[
                Id3Frame::utf16("TIT2", "Freddie Freeloader"),
                Id3Frame::latin1("TRCK", "2"),
            ],
        );
        check_prefixes(Format::Id3, &tag);
    }

    #[test]
    #[cfg(feature = "mpeg")]
    fn test_mp4_prefixes() {
        let mp4 = Mp4Builder::new(b"M4A ")
            .movie_header(1, 44_100, 441_000)
            .track(0, 0)
            .tag(b"\xA9alb", "Kind of Blue")
            .build();
        check_prefixes(Format::Mpeg, &mp4);
    }
}
