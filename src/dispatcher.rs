//! Per-resource extraction pipeline
//!
//! [`Dispatcher::process_one`] runs four stages in order, each handing its
//! result to the next:
//!
//! 1. `detectFormat` - pick the first registered parser whose filter matches
//! 2. `getEntry` - resolve the identifier to a readable handle
//! 3. `getFile` - read the parser's header window
//! 4. `parseHeader` - validate the signature and extract fields
//!
//! A failure in any stage becomes a [`StageError`] naming that stage. Nothing
//! is shared between calls except the read-only registry.

use crate::{
    byte_reader::{ByteBuffer, ByteReader},
    error::Error,
    record::MetadataRecord,
    registry::{ParserDescriptor, Registry},
    source::{FileHandle, FileSource},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pipeline stage, named as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    DetectFormat,
    GetEntry,
    GetFile,
    ParseHeader,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DetectFormat => "detectFormat",
            Self::GetEntry => "getEntry",
            Self::GetFile => "getFile",
            Self::ParseHeader => "parseHeader",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse classification of a pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unsupported,
    NotFound,
    Io,
    OutOfBounds,
    Signature,
    Malformed,
}

impl From<&Error> for FailureKind {
    fn from(error: &Error) -> Self {
        match error {
            Error::UnsupportedFormat => Self::Unsupported,
            Error::NotFound(_) => Self::NotFound,
            Error::Io(_) => Self::Io,
            Error::OutOfBounds { .. } => Self::OutOfBounds,
            Error::SignatureMismatch { .. } => Self::Signature,
            _ => Self::Malformed,
        }
    }
}

/// Failure of one pipeline stage, as reported across the worker boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{stage} failed: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: FailureKind,
    /// Format tag of the selected parser, once one was selected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub message: String,
}

impl StageError {
    pub fn new(stage: Stage, error: &Error) -> Self {
        Self {
            stage,
            kind: FailureKind::from(error),
            format: None,
            message: error.to_string(),
        }
    }

    fn for_format(mut self, descriptor: &ParserDescriptor) -> Self {
        self.format = Some(descriptor.format().id().to_string());
        self
    }
}

/// Runs the extraction pipeline against a registry and a file source
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    source: Arc<dyn FileSource>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, source: Arc<dyn FileSource>) -> Self {
        Self { registry, source }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Combined filter of every registered parser
    pub fn filter_pattern(&self) -> String {
        self.registry.build_filter_pattern()
    }

    /// Extract metadata for one resource
    pub fn process_one(&self, resource: &str) -> Result<MetadataRecord, StageError> {
        let descriptor = self.detect_format(resource)?;
        let handle = self
            .resolve_entry(resource)
            .map_err(|e| e.for_format(descriptor))?;
        let buffer = self
            .fetch_header(handle, descriptor)
            .map_err(|e| e.for_format(descriptor))?;
        self.parse_header(descriptor, &buffer)
            .map_err(|e| e.for_format(descriptor))
    }

    fn detect_format(&self, resource: &str) -> Result<&ParserDescriptor, StageError> {
        self.registry
            .detect(resource)
            .ok_or_else(|| StageError::new(Stage::DetectFormat, &Error::UnsupportedFormat))
    }

    fn resolve_entry(&self, resource: &str) -> Result<Box<dyn FileHandle>, StageError> {
        self.source
            .resolve(resource)
            .map_err(|e| StageError::new(Stage::GetEntry, &e))
    }

    fn fetch_header(
        &self,
        mut handle: Box<dyn FileHandle>,
        descriptor: &ParserDescriptor,
    ) -> Result<ByteBuffer, StageError> {
        handle
            .read_range(0, descriptor.header_bytes())
            .map_err(|e| StageError::new(Stage::GetFile, &e))
    }

    fn parse_header(
        &self,
        descriptor: &ParserDescriptor,
        buffer: &ByteBuffer,
    ) -> Result<MetadataRecord, StageError> {
        let mut reader = ByteReader::new(buffer);
        descriptor
            .format()
            .parse_header(&mut reader)
            .map_err(|e| StageError::new(Stage::ParseHeader, &e))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "images"))]
mod tests {
    use super::*;
    use crate::{source::MemorySource, test_utils};

    fn dispatcher(source: Arc<MemorySource>) -> Dispatcher {
        Dispatcher::new(Arc::new(Registry::with_defaults().unwrap()), source)
    }

    #[test]
    fn test_happy_path() {
        let source = Arc::new(MemorySource::new());
        let mut file = test_utils::png_header(100, 50);
        file.extend_from_slice(&[0u8; 4096]);
        source.insert("a.png", file);

        let record = dispatcher(source).process_one("a.png").unwrap();
        assert_eq!(record, MetadataRecord::with_dimensions(100, 50));
    }

    #[test]
    fn test_each_stage_reports_itself() {
        let source = Arc::new(MemorySource::new());
        source.insert("short.png", test_utils::png_header(1, 1)[..12].to_vec());
        source.insert("wrong.png", test_utils::gif_header(b"89a", 1, 1));
        let dispatcher = dispatcher(source.clone());

        let unsupported = dispatcher.process_one("a.txt").unwrap_err();
        assert_eq!(unsupported.stage, Stage::DetectFormat);
        assert_eq!(unsupported.kind, FailureKind::Unsupported);
        assert_eq!(unsupported.format, None);
        assert_eq!(source.resolutions(), 0);

        let missing = dispatcher.process_one("missing.png").unwrap_err();
        assert_eq!(missing.stage, Stage::GetEntry);
        assert_eq!(missing.kind, FailureKind::NotFound);
        assert_eq!(missing.format.as_deref(), Some("png"));

        let short = dispatcher.process_one("short.png").unwrap_err();
        assert_eq!(short.stage, Stage::ParseHeader);
        assert_eq!(short.kind, FailureKind::OutOfBounds);

        let wrong = dispatcher.process_one("wrong.png").unwrap_err();
        assert_eq!(wrong.stage, Stage::ParseHeader);
        assert_eq!(wrong.kind, FailureKind::Signature);
    }

    #[test]
    fn test_stage_error_wire_shape() {
        let error = StageError::new(Stage::GetEntry, &Error::NotFound("x".into()));
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["stage"], "getEntry");
        assert_eq!(json["kind"], "not_found");
        assert!(json.get("format").is_none());
    }
}
