//! File resolution and range reads
//!
//! The dispatcher only needs two capabilities: turn a resource identifier
//! into a readable handle, and read a byte range from it. [`FsSource`] reads
//! from the local filesystem, [`MemorySource`] serves in-memory blobs.

use crate::{
    byte_reader::ByteBuffer,
    error::{Error, Result},
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Resolves resource identifiers to readable handles
pub trait FileSource: Send + Sync {
    /// Resolve `resource` (a path or `file://` URL) to a handle
    fn resolve(&self, resource: &str) -> Result<Box<dyn FileHandle>>;
}

/// A resolved, readable file
pub trait FileHandle: Send {
    /// Total size of the file in bytes
    fn len(&self) -> u64;

    /// True if the file is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `length` bytes starting at `offset`
    ///
    /// Returns fewer bytes when the file ends first.
    fn read_range(&mut self, offset: u64, length: usize) -> Result<ByteBuffer>;
}

impl<S: FileSource + ?Sized> FileSource for Arc<S> {
    fn resolve(&self, resource: &str) -> Result<Box<dyn FileHandle>> {
        (**self).resolve(resource)
    }
}

/// Strip a `file://` scheme if present
fn resource_path(resource: &str) -> &str {
    resource.strip_prefix("file://").unwrap_or(resource)
}

/// Local filesystem source
///
/// Relative identifiers are resolved against `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FsSource {
    root: Option<PathBuf>,
}

impl FsSource {
    /// Resolve identifiers as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative identifiers under `root`
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
        }
    }

    fn path_for(&self, resource: &str) -> PathBuf {
        let path = Path::new(resource_path(resource));
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl FileSource for FsSource {
    fn resolve(&self, resource: &str) -> Result<Box<dyn FileHandle>> {
        let path = self.path_for(resource);
        let metadata = std::fs::metadata(&path)
            .map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(Error::NotFound(format!("{} is not a file", path.display())));
        }
        let file = File::open(&path)?;
        Ok(Box::new(FsHandle {
            file,
            len: metadata.len(),
        }))
    }
}

struct FsHandle {
    file: File,
    len: u64,
}

impl FileHandle for FsHandle {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&mut self, offset: u64, length: usize) -> Result<ByteBuffer> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = Vec::with_capacity(length.min(self.len.saturating_sub(offset) as usize));
        (&mut self.file).take(length as u64).read_to_end(&mut data)?;
        Ok(ByteBuffer::new(data, offset))
    }
}

/// In-memory source keyed by resource identifier
///
/// Counts resolutions so callers can observe how often the dispatcher
/// actually reached the file layer.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: RwLock<HashMap<String, Arc<[u8]>>>,
    resolutions: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&self, resource: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.files.write().insert(resource.into(), data.into());
    }

    /// Remove a file
    pub fn remove(&self, resource: &str) {
        self.files.write().remove(resource);
    }

    /// Number of successful and failed `resolve` calls so far
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

impl FileSource for MemorySource {
    fn resolve(&self, resource: &str) -> Result<Box<dyn FileHandle>> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        let data = self
            .files
            .read()
            .get(resource)
            .cloned()
            .ok_or_else(|| Error::NotFound(resource.to_string()))?;
        Ok(Box::new(MemoryHandle { data }))
    }
}

struct MemoryHandle {
    data: Arc<[u8]>,
}

impl FileHandle for MemoryHandle {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_range(&mut self, offset: u64, length: usize) -> Result<ByteBuffer> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let end = start.saturating_add(length).min(self.data.len());
        Ok(ByteBuffer::new(&self.data[start..end], offset))
    }
}

/// Memory-mapped filesystem source
#[cfg(feature = "memory-mapped")]
#[derive(Debug, Clone, Default)]
pub struct MmapSource;

#[cfg(feature = "memory-mapped")]
impl FileSource for MmapSource {
    fn resolve(&self, resource: &str) -> Result<Box<dyn FileHandle>> {
        let path = Path::new(resource_path(resource));
        let file = File::open(path).map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
        // SAFETY: the map is only read, and only within its own length
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Box::new(MmapHandle { mmap }))
    }
}

#[cfg(feature = "memory-mapped")]
struct MmapHandle {
    mmap: memmap2::Mmap,
}

#[cfg(feature = "memory-mapped")]
impl FileHandle for MmapHandle {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_range(&mut self, offset: u64, length: usize) -> Result<ByteBuffer> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.mmap.len());
        let end = start.saturating_add(length).min(self.mmap.len());
        Ok(ByteBuffer::new(&self.mmap[start..end], offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fs_source_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gif");
        File::create(&path).unwrap().write_all(b"GIF89a").unwrap();

        let source = FsSource::with_root(dir.path());
        let mut handle = source.resolve("tiny.gif").unwrap();
        assert_eq!(handle.len(), 6);

        let buffer = handle.read_range(0, 10).unwrap();
        assert_eq!(buffer.as_bytes(), b"GIF89a");
        assert_eq!(buffer.file_offset(), 0);

        let tail = handle.read_range(3, 10).unwrap();
        assert_eq!(tail.as_bytes(), b"89a");
        assert_eq!(tail.file_offset(), 3);
    }

    #[test]
    fn test_fs_source_file_url_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        File::create(&path).unwrap().write_all(&[1, 2, 3]).unwrap();

        let source = FsSource::new();
        let url = format!("file://{}", path.display());
        assert!(source.resolve(&url).is_ok());

        let missing = dir.path().join("b.png");
        assert!(matches!(
            source.resolve(missing.to_str().unwrap()),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            source.resolve(dir.path().to_str().unwrap()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new();
        source.insert("x.bmp", vec![1u8, 2, 3, 4]);

        let mut handle = source.resolve("x.bmp").unwrap();
        assert_eq!(handle.read_range(2, 100).unwrap().as_bytes(), &[3, 4]);
        assert_eq!(handle.read_range(10, 1).unwrap().len(), 0);

        assert!(source.resolve("y.bmp").is_err());
        assert_eq!(source.resolutions(), 2);
    }
}
