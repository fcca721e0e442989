//! Parser registration and format detection by resource name

use crate::{error::Result, formats::Format};
use regex::{Regex, RegexBuilder};

/// Pattern that matches no input, used for an empty registry
const MATCH_NOTHING: &str = r"[^\s\S]";

/// Registration record for one parser
#[derive(Debug, Clone)]
pub struct ParserDescriptor {
    format: Format,
    filter: Regex,
    header_bytes: usize,
}

impl ParserDescriptor {
    /// Descriptor using the format's default filter and header size
    pub fn new(format: Format) -> Result<Self> {
        Ok(Self {
            format,
            filter: compile(format.default_filter())?,
            header_bytes: format.header_bytes(),
        })
    }

    /// Replace the name filter (matched case-insensitively)
    pub fn with_filter(mut self, pattern: &str) -> Result<Self> {
        self.filter = compile(pattern)?;
        Ok(self)
    }

    /// Override how many leading bytes are fetched for this parser
    pub fn with_header_bytes(mut self, header_bytes: usize) -> Self {
        self.header_bytes = header_bytes;
        self
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Source text of the name filter
    pub fn filter(&self) -> &str {
        self.filter.as_str()
    }

    /// Number of leading bytes to fetch before parsing
    pub fn header_bytes(&self) -> usize {
        self.header_bytes
    }

    /// True if `name` passes this descriptor's filter
    pub fn matches(&self, name: &str) -> bool {
        self.filter.is_match(name)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Ok(RegexBuilder::new(pattern).case_insensitive(true).build()?)
}

/// Ordered list of parser descriptors
///
/// Registration order is priority order: when several filters match a name,
/// the first registered descriptor wins. Entries are never removed.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    descriptors: Vec<ParserDescriptor>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every compiled-in format with its defaults
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        for format in Format::all() {
            registry.register(ParserDescriptor::new(*format)?);
        }
        Ok(registry)
    }

    /// Append a descriptor
    pub fn register(&mut self, descriptor: ParserDescriptor) {
        tracing::debug!(
            format = %descriptor.format(),
            filter = descriptor.filter(),
            "registered parser"
        );
        self.descriptors.push(descriptor);
    }

    pub fn descriptors(&self) -> &[ParserDescriptor] {
        &self.descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Combined case-insensitive alternation of every filter
    ///
    /// Hosts use it to skip resources no parser would accept before sending
    /// a request at all.
    pub fn build_filter_pattern(&self) -> String {
        if self.descriptors.is_empty() {
            return MATCH_NOTHING.to_string();
        }
        let alternatives = self
            .descriptors
            .iter()
            .map(|d| format!("(?:{})", d.filter()))
            .collect::<Vec<_>>()
            .join("|");
        format!("(?i){alternatives}")
    }

    /// First descriptor (in registration order) whose filter matches `name`
    pub fn detect(&self, name: &str) -> Option<&ParserDescriptor> {
        self.descriptors.iter().find(|d| d.matches(name))
    }
}

/// Compile a combined pattern received from [`Registry::build_filter_pattern`]
pub fn compile_filter_pattern(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(pattern)?)
}

#[cfg(all(test, feature = "images", feature = "exif", feature = "id3", feature = "mpeg"))]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_case_insensitive() {
        let registry = Registry::with_defaults().unwrap();
        let png = registry.detect("/photos/HOLIDAY.PNG").unwrap();
        assert_eq!(png.format(), Format::Png);
        assert_eq!(png.header_bytes(), 24);

        assert_eq!(
            registry.detect("clip.Mp4").map(|d| d.format()),
            Some(Format::Mpeg)
        );
        assert_eq!(
            registry.detect("a.jpeg").map(|d| d.format()),
            Some(Format::Jpeg)
        );
        assert!(registry.detect("notes.txt").is_none());
        assert!(registry.detect("png").is_none());
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = Registry::new();
        registry.register(
            ParserDescriptor::new(Format::Gif)
                .unwrap()
                .with_filter(r"\.img$")
                .unwrap(),
        );
        registry.register(
            ParserDescriptor::new(Format::Png)
                .unwrap()
                .with_filter(r"\.(png|img)$")
                .unwrap(),
        );

        assert_eq!(registry.detect("x.img").unwrap().format(), Format::Gif);
        assert_eq!(registry.detect("x.png").unwrap().format(), Format::Png);
    }

    #[test]
    fn test_combined_pattern_agrees_with_detect() {
        let registry = Registry::with_defaults().unwrap();
        let combined = compile_filter_pattern(&registry.build_filter_pattern()).unwrap();
        for name in ["a.png", "b.GIF", "c.webp", "d.bmp", "e.JPG", "f.mp3", "g.mov", "h.doc", "i.pngx"] {
            assert_eq!(
                combined.is_match(name),
                registry.detect(name).is_some(),
                "{name}"
            );
        }
    }

    #[test]
    fn test_empty_registry_matches_nothing() {
        let registry = Registry::new();
        let combined = compile_filter_pattern(&registry.build_filter_pattern()).unwrap();
        assert!(!combined.is_match(""));
        assert!(!combined.is_match("a.png"));
    }

    #[test]
    fn test_invalid_filter() {
        let result = ParserDescriptor::new(Format::Png).unwrap().with_filter("(");
        assert!(matches!(result, Err(crate::Error::Pattern(_))));
    }
}
