//! Format-specific header parsers
//!
//! Each parser implements [`HeaderParser`] and is listed once in the
//! `register_formats!` invocation at the bottom of this file, which generates
//! the closed [`Format`] enum used everywhere else.

use crate::{
    byte_reader::{ByteOrder, ByteReader, Whence},
    error::{Error, Result},
    record::MetadataRecord,
};

/// Static description of one header parser
pub trait HeaderParser {
    /// Short format tag, e.g. `"png"`
    const ID: &'static str;

    /// Default case-insensitive filter matched against the resource name
    const FILTER: &'static str;

    /// Number of leading bytes the dispatcher must fetch
    const HEADER_BYTES: usize;

    /// Validate the signature and extract fields from a reader at byte 0
    fn parse_header(reader: &mut ByteReader) -> Result<MetadataRecord>;
}

#[cfg(feature = "images")]
pub(crate) mod image;

#[cfg(feature = "exif")]
pub(crate) mod exif;

#[cfg(feature = "id3")]
pub(crate) mod id3;

#[cfg(feature = "mpeg")]
pub(crate) mod mpeg;

/// Magic bytes expected at a fixed offset; any alternative may match
pub(crate) struct SignatureCheck {
    pub offset: usize,
    pub alternatives: &'static [&'static [u8]],
}

/// Byte layout of a header whose dimensions sit at a fixed offset
pub(crate) struct FixedLayout {
    pub format: &'static str,
    pub byte_order: ByteOrder,
    pub signatures: &'static [SignatureCheck],
    /// Offset of the width field; height follows immediately
    pub dimensions_at: usize,
    /// Size of each dimension field in bytes
    pub dimension_width: usize,
    /// Dimensions are two's complement and may be negative (e.g. top-down BMP)
    pub signed: bool,
}

/// Shared parse for formats described by a [`FixedLayout`]
pub(crate) fn parse_fixed_header(
    reader: &mut ByteReader,
    layout: &FixedLayout,
) -> Result<MetadataRecord> {
    reader.set_byte_order(layout.byte_order);
    for check in layout.signatures {
        verify_signature(reader, layout.format, check)?;
    }

    reader.seek(layout.dimensions_at as i64, Whence::Start)?;
    let (width, height) = if layout.signed {
        let width = reader.read_int(layout.dimension_width)?;
        let height = reader.read_int(layout.dimension_width)?;
        (width.unsigned_abs(), height.unsigned_abs())
    } else {
        (
            reader.read_uint(layout.dimension_width)?,
            reader.read_uint(layout.dimension_width)?,
        )
    };

    Ok(MetadataRecord::with_dimensions(
        dimension(layout.format, width)?,
        dimension(layout.format, height)?,
    ))
}

/// Check the bytes at `check.offset` against every alternative
pub(crate) fn verify_signature(
    reader: &mut ByteReader,
    format: &'static str,
    check: &SignatureCheck,
) -> Result<()> {
    let longest = check
        .alternatives
        .iter()
        .map(|a| a.len())
        .max()
        .unwrap_or(0);
    reader.seek(check.offset as i64, Whence::Start)?;
    let found = reader.read_bytes(longest)?;
    if check
        .alternatives
        .iter()
        .any(|alt| found.starts_with(alt))
    {
        return Ok(());
    }
    Err(Error::signature(
        format,
        format!(
            "expected {} at offset {}",
            describe_alternatives(check.alternatives),
            check.offset
        ),
    ))
}

fn describe_alternatives(alternatives: &[&[u8]]) -> String {
    alternatives
        .iter()
        .map(|a| format!("{:?}", String::from_utf8_lossy(a)))
        .collect::<Vec<_>>()
        .join(" or ")
}

pub(crate) fn dimension(format: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| Error::InvalidFormat(format!("{format}: dimension {value} out of range")))
}

// ============================================================================
// Format Registration Macro
// ============================================================================

/// Register all supported formats in one place
///
/// This macro generates:
/// - the `Format` enum (one variant per parser)
/// - `Format::all()` in registration order
/// - id / filter / header size lookups
/// - `Format::parse_header()` delegating to the parser
macro_rules! register_formats {
    ($(
        $(#[$meta:meta])*
        $variant:ident => $module:ident :: $parser:ident
    ),* $(,)?) => {
        /// Closed set of compiled-in formats
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Format {
            $(
                $(#[$meta])*
                $variant,
            )*
        }

        impl Format {
            /// Every compiled-in format in registration order
            pub fn all() -> &'static [Format] {
                &[
                    $(
                        $(#[$meta])*
                        Format::$variant,
                    )*
                ]
            }

            /// Short format tag, e.g. `"png"`
            #[allow(unreachable_patterns)]
            pub fn id(&self) -> &'static str {
                match self {
                    $(
                        $(#[$meta])*
                        Format::$variant => <$module::$parser as HeaderParser>::ID,
                    )*
                }
            }

            /// Look up a format by its tag (case-insensitive)
            pub fn from_id(id: &str) -> Option<Format> {
                Format::all()
                    .iter()
                    .copied()
                    .find(|f| f.id().eq_ignore_ascii_case(id))
            }

            /// Default name filter for this format
            #[allow(unreachable_patterns)]
            pub fn default_filter(&self) -> &'static str {
                match self {
                    $(
                        $(#[$meta])*
                        Format::$variant => <$module::$parser as HeaderParser>::FILTER,
                    )*
                }
            }

            /// Number of leading bytes the parser needs
            #[allow(unreachable_patterns)]
            pub fn header_bytes(&self) -> usize {
                match self {
                    $(
                        $(#[$meta])*
                        Format::$variant => <$module::$parser as HeaderParser>::HEADER_BYTES,
                    )*
                }
            }

            /// Validate the signature and extract fields
            #[allow(unreachable_patterns)]
            pub fn parse_header(&self, reader: &mut ByteReader) -> Result<MetadataRecord> {
                match self {
                    $(
                        $(#[$meta])*
                        Format::$variant => <$module::$parser as HeaderParser>::parse_header(reader),
                    )*
                }
            }
        }

        impl std::fmt::Display for Format {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.id())
            }
        }
    };
}

// ============================================================================
// SINGLE POINT OF REGISTRATION
// To add a new format, add one line here!
// ============================================================================
register_formats! {
    #[cfg(feature = "images")]
    Png => image::PngParser,

    #[cfg(feature = "images")]
    Bmp => image::BmpParser,

    #[cfg(feature = "images")]
    Gif => image::GifParser,

    #[cfg(feature = "images")]
    Webp => image::WebpParser,

    #[cfg(feature = "exif")]
    Jpeg => exif::ExifParser,

    #[cfg(feature = "id3")]
    Id3 => id3::Id3Parser,

    #[cfg(feature = "mpeg")]
    Mpeg => mpeg::MpegParser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_layout_rejects_each_alternative() {
        const LAYOUT: FixedLayout = FixedLayout {
            format: "toy",
            byte_order: ByteOrder::LittleEndian,
            signatures: &[SignatureCheck {
                offset: 0,
                alternatives: &[b"AB1", b"AB2"],
            }],
            dimensions_at: 3,
            dimension_width: 2,
            signed: false,
        };

        let mut ok = ByteReader::from_bytes(b"AB2\x02\x00\x03\x00".to_vec());
        let record = parse_fixed_header(&mut ok, &LAYOUT).unwrap();
        assert_eq!((record.width, record.height), (Some(2), Some(3)));

        let mut bad = ByteReader::from_bytes(b"AB3\x02\x00\x03\x00".to_vec());
        assert!(matches!(
            parse_fixed_header(&mut bad, &LAYOUT),
            Err(Error::SignatureMismatch { format: "toy", .. })
        ));
    }

    #[test]
    fn test_format_ids_round_trip() {
        for format in Format::all() {
            assert_eq!(Format::from_id(format.id()), Some(*format));
            assert!(format.header_bytes() > 0);
        }
        assert_eq!(Format::from_id("nope"), None);
    }
}
