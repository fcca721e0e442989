//! Header-window metadata extraction for media files.
//!
//! This crate reads a small fixed-size window at the start of a file and
//! extracts descriptive metadata (dimensions, camera fields, tags) without
//! decoding the media itself.
//!
//! # Design Principles
//!
//! - **Bounded reads**: each format declares how many leading bytes it needs
//! - **Checked access**: every read goes through [`ByteReader`] and fails
//!   with [`Error::OutOfBounds`] instead of panicking
//! - **Isolation**: extraction runs on a worker thread and talks to the
//!   caller only through JSON messages
//! - **Coalescing**: [`MetadataCache`] sends at most one request per resource
//!
//! # Quick Start
//!
//! Run the pipeline directly:
//!
//! ```no_run
//! use media_meta::{Dispatcher, FsSource, Registry};
//! use std::sync::Arc;
//!
//! # fn main() -> media_meta::Result<()> {
//! let registry = Arc::new(Registry::with_defaults()?);
//! let dispatcher = Dispatcher::new(registry, Arc::new(FsSource::new()));
//!
//! match dispatcher.process_one("photo.jpg") {
//!     Ok(record) => println!("{:?}x{:?}", record.width, record.height),
//!     Err(e) => println!("{} failed: {}", e.stage, e.message),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Worker And Cache
//!
//! ```no_run
//! use media_meta::{spawn_worker, Dispatcher, FsSource, MetadataCache, Registry, WorkerConfig};
//! use std::{sync::Arc, time::Duration};
//!
//! # fn main() -> media_meta::Result<()> {
//! let dispatcher = Dispatcher::new(Arc::new(Registry::with_defaults()?), Arc::new(FsSource::new()));
//! let (transport, worker) = spawn_worker(dispatcher, WorkerConfig::new())?;
//!
//! let mut cache = MetadataCache::new(transport)?;
//! cache.fetch("clip.mp4", |lookup| {
//!     println!("duration: {:?}", lookup.record.get("duration"));
//! })?;
//! cache.run_until_idle(Duration::from_secs(5))?;
//!
//! drop(cache);
//! worker.join()?;
//! # Ok(())
//! # }
//! ```

mod byte_reader;
mod cache;
mod dispatcher;
mod error;
mod formats;
mod protocol;
mod record;
mod registry;
mod source;
mod worker;

pub use byte_reader::{ByteBuffer, ByteOrder, ByteReader, Whence};
pub use cache::{Callback, Lookup, MetadataCache};
pub use dispatcher::{Dispatcher, FailureKind, Stage, StageError};
pub use error::{Error, Result};
pub use formats::{Format, HeaderParser};
pub use protocol::{channel_pair, ChannelTransport, Message, Transport};
pub use record::{FieldValue, MetadataRecord};
pub use registry::{compile_filter_pattern, ParserDescriptor, Registry};
#[cfg(feature = "memory-mapped")]
pub use source::MmapSource;
pub use source::{FileHandle, FileSource, FsSource, MemorySource};
pub use worker::{spawn_worker, DispatcherWorker, WorkerConfig, WorkerHandle};

// Test utilities - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
