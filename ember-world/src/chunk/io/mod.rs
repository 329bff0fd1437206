use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use thiserror::Error;

use super::CompressionError;
use crate::coordinates::RegionPos;

pub mod region;
pub mod region_cache;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Io error: {0}")]
    IoError(std::io::ErrorKind),
    #[error("Region file {0:?} is already closed")]
    Closed(PathBuf),
    #[error("Region file header is invalid")]
    InvalidHeader,
    #[error("Chunk data at sector {0} is invalid")]
    InvalidChunkData(u32),
    #[error("Compression error {0}")]
    Compression(CompressionError),
    #[error("Chunk needs {0} sectors, a region allows at most 255")]
    ChunkTooLarge(usize),
    #[error("Local chunk coordinates ({0}, {1}) are outside of the region")]
    OutOfBounds(i32, i32),
    #[error("Region file has no sector offsets left")]
    RegionFull,
}

impl From<std::io::Error> for RegionError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value.kind())
    }
}

/// Lazily yields the payload of every chunk stored in a region.
pub type RegionChunks<'a> = Box<dyn Iterator<Item = Result<Vec<u8>, RegionError>> + Send + 'a>;

/// A file holding the serialized chunks of one 32x32 region. Coordinates are local to the
/// region, both in `0..32`.
pub trait RegionFile: Send + Sync {
    fn has_chunk(&self, local_x: i32, local_z: i32) -> Result<bool, RegionError>;

    /// The uncompressed payload, or `None` when nothing is stored there.
    fn read_chunk(&self, local_x: i32, local_z: i32) -> Result<Option<Vec<u8>>, RegionError>;

    fn write_chunk(&self, local_x: i32, local_z: i32, data: &[u8]) -> Result<(), RegionError>;

    /// A fresh pass over every stored chunk each time it is called.
    fn chunks(&self) -> Result<RegionChunks<'_>, RegionError>;

    fn close(&self) -> Result<(), RegionError>;
}

/// Opens (or creates) the region file at a path.
pub trait RegionFileOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn RegionFile>, RegionError>;
}

/// A region file owned by the region cache.
///
/// Once the cache evicts the handle it is closed for good; anyone still holding it gets
/// [`RegionError::Closed`] instead of touching the file. Closing waits for calls already in
/// progress.
pub struct RegionHandle {
    region: RegionPos,
    path: PathBuf,
    file: RwLock<Option<Box<dyn RegionFile>>>,
}

impl RegionHandle {
    pub fn new(region: RegionPos, path: PathBuf, file: Box<dyn RegionFile>) -> Self {
        Self {
            region,
            path,
            file: RwLock::new(Some(file)),
        }
    }

    pub fn region(&self) -> RegionPos {
        self.region
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.read().is_none()
    }

    fn with_file<T>(
        &self,
        action: impl FnOnce(&dyn RegionFile) -> Result<T, RegionError>,
    ) -> Result<T, RegionError> {
        let guard = self.file.read();
        match guard.as_deref() {
            Some(file) => action(file),
            None => Err(RegionError::Closed(self.path.clone())),
        }
    }

    pub fn has_chunk(&self, local_x: i32, local_z: i32) -> Result<bool, RegionError> {
        self.with_file(|file| file.has_chunk(local_x, local_z))
    }

    pub fn read_chunk(&self, local_x: i32, local_z: i32) -> Result<Option<Vec<u8>>, RegionError> {
        self.with_file(|file| file.read_chunk(local_x, local_z))
    }

    pub fn write_chunk(&self, local_x: i32, local_z: i32, data: &[u8]) -> Result<(), RegionError> {
        self.with_file(|file| file.write_chunk(local_x, local_z, data))
    }

    /// Collects every stored payload. The file stays read locked until the pass is done.
    pub fn read_all_chunks(&self) -> Result<Vec<Result<Vec<u8>, RegionError>>, RegionError> {
        self.with_file(|file| Ok(file.chunks()?.collect()))
    }

    /// Closes the underlying file. Only the first call does anything.
    pub(crate) fn close(&self) -> Result<(), RegionError> {
        let file = self.file.write().take();
        match file {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

pub type SharedRegionHandle = Arc<RegionHandle>;
