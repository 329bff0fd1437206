use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use ember_config::advanced_config;
use flate2::bufread::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use log::{trace, warn};
use parking_lot::Mutex;

use super::{RegionChunks, RegionError, RegionFile, RegionFileOpener};
use crate::{
    chunk::CompressionError,
    coordinates::{REGION_CHUNK_COUNT, REGION_SIZE, local_index},
};

pub const SECTOR_BYTES: usize = 4096;
/// Location table and timestamp table.
const HEADER_SECTORS: usize = 2;
const HEADER_BYTES: usize = HEADER_SECTORS * SECTOR_BYTES;
/// The sector count of a location entry is a single byte.
pub const MAX_CHUNK_SECTORS: usize = 255;
/// Sector offsets are stored in three bytes.
const MAX_SECTOR_OFFSET: usize = 0xFF_FFFF;
/// u32 length followed by the compression id.
const CHUNK_HEADER_BYTES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// GZip Compression
    GZip = 1,
    /// ZLib Compression
    ZLib = 2,
    /// Uncompressed
    None = 3,
}

impl From<ember_config::Compression> for Compression {
    fn from(value: ember_config::Compression) -> Self {
        match value {
            ember_config::Compression::GZip => Self::GZip,
            ember_config::Compression::ZLib => Self::ZLib,
            ember_config::Compression::None => Self::None,
        }
    }
}

impl Compression {
    pub fn from_byte(byte: u8) -> Result<Self, CompressionError> {
        match byte {
            1 => Ok(Self::GZip),
            2 => Ok(Self::ZLib),
            3 => Ok(Self::None),
            // Unknown format, or a payload stored outside of the region
            _ => Err(CompressionError::UnknownCompression(byte)),
        }
    }

    fn decompress_data(&self, compressed_data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::GZip => {
                let mut decoder = GzDecoder::new(compressed_data);
                let mut chunk_data = Vec::new();
                decoder
                    .read_to_end(&mut chunk_data)
                    .map_err(CompressionError::GZipError)?;
                Ok(chunk_data)
            }
            Compression::ZLib => {
                let mut decoder = ZlibDecoder::new(compressed_data);
                let mut chunk_data = Vec::new();
                decoder
                    .read_to_end(&mut chunk_data)
                    .map_err(CompressionError::ZlibError)?;
                Ok(chunk_data)
            }
            Compression::None => Ok(compressed_data.to_vec()),
        }
    }

    fn compress_data(
        &self,
        uncompressed_data: &[u8],
        compression_level: u32,
    ) -> Result<Vec<u8>, CompressionError> {
        match self {
            Compression::GZip => {
                let mut encoder = GzEncoder::new(
                    uncompressed_data,
                    flate2::Compression::new(compression_level),
                );
                let mut chunk_data = Vec::new();
                encoder
                    .read_to_end(&mut chunk_data)
                    .map_err(CompressionError::GZipError)?;
                Ok(chunk_data)
            }
            Compression::ZLib => {
                let mut encoder = ZlibEncoder::new(
                    uncompressed_data,
                    flate2::Compression::new(compression_level),
                );
                let mut chunk_data = Vec::new();
                encoder
                    .read_to_end(&mut chunk_data)
                    .map_err(CompressionError::ZlibError)?;
                Ok(chunk_data)
            }
            Compression::None => Ok(uncompressed_data.to_vec()),
        }
    }
}

struct RegionState {
    file: File,
    /// `offset << 8 | sector_count`, 0 when the chunk is absent.
    locations: Box<[u32; REGION_CHUNK_COUNT]>,
    timestamps: Box<[u32; REGION_CHUNK_COUNT]>,
    used_sectors: Vec<bool>,
}

impl RegionState {
    fn read_payload(&mut self, location: u32) -> Result<Vec<u8>, RegionError> {
        let offset = location >> 8;
        let sector_count = (location & 0xFF) as usize;

        self.file
            .seek(SeekFrom::Start(offset as u64 * SECTOR_BYTES as u64))?;
        let mut header = [0u8; CHUNK_HEADER_BYTES];
        self.file.read_exact(&mut header)?;

        // length includes the compression byte
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if length == 0 || length + 4 > sector_count * SECTOR_BYTES {
            return Err(RegionError::InvalidChunkData(offset));
        }
        let compression = Compression::from_byte(header[4]).map_err(RegionError::Compression)?;

        let mut chunk_data = vec![0; length - 1];
        self.file.read_exact(&mut chunk_data)?;

        match compression {
            Compression::None => Ok(chunk_data),
            compression => compression
                .decompress_data(&chunk_data)
                .map_err(RegionError::Compression),
        }
    }

    /// First run of `count` free sectors, possibly running past the end of the file.
    fn find_free_sectors(&self, count: usize) -> usize {
        let mut run_start = HEADER_SECTORS;
        let mut run_length = 0;
        for sector in HEADER_SECTORS..self.used_sectors.len() {
            if self.used_sectors[sector] {
                run_start = sector + 1;
                run_length = 0;
            } else {
                run_length += 1;
                if run_length == count {
                    return run_start;
                }
            }
        }
        run_start
    }

    fn mark_sectors(&mut self, offset: usize, count: usize, used: bool) {
        if self.used_sectors.len() < offset + count {
            self.used_sectors.resize(offset + count, false);
        }
        self.used_sectors[offset..offset + count].fill(used);
    }

    fn write_header_entry(&mut self, index: usize) -> Result<(), RegionError> {
        self.file.seek(SeekFrom::Start((index * 4) as u64))?;
        self.file.write_all(&self.locations[index].to_be_bytes())?;
        self.file
            .seek(SeekFrom::Start((SECTOR_BYTES + index * 4) as u64))?;
        self.file.write_all(&self.timestamps[index].to_be_bytes())?;
        Ok(())
    }
}

/// A region file in the vanilla Anvil layout.
///
/// | sector 0       | sector 1   | sector 2..                                |
/// | location table | timestamps | `u32 length` `u8 compression` payload ... |
pub struct AnvilRegionFile {
    path: PathBuf,
    compression: Compression,
    compression_level: u32,
    state: Mutex<Option<RegionState>>,
}

impl AnvilRegionFile {
    /// Opens the region file at `path`, creating it when missing.
    pub fn open(
        path: &Path,
        compression: Compression,
        compression_level: u32,
    ) -> Result<Self, RegionError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_length = file.metadata()?.len() as usize;
        let mut header = vec![0u8; HEADER_BYTES];
        if file_length < HEADER_BYTES {
            if file_length > 0 {
                warn!("Region file {path:?} has a truncated header, padding it");
            }
            file.read_exact(&mut header[..file_length])?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header)?;
            file.flush()?;
        } else {
            file.read_exact(&mut header)?;
        }

        let total_sectors = file_length.max(HEADER_BYTES).div_ceil(SECTOR_BYTES);
        let mut used_sectors = vec![false; total_sectors];
        used_sectors[..HEADER_SECTORS].fill(true);

        let mut locations = Box::new([0u32; REGION_CHUNK_COUNT]);
        let mut timestamps = Box::new([0u32; REGION_CHUNK_COUNT]);
        for index in 0..REGION_CHUNK_COUNT {
            let at = index * 4;
            let location = u32::from_be_bytes([
                header[at],
                header[at + 1],
                header[at + 2],
                header[at + 3],
            ]);
            let at = SECTOR_BYTES + index * 4;
            timestamps[index] = u32::from_be_bytes([
                header[at],
                header[at + 1],
                header[at + 2],
                header[at + 3],
            ]);
            if location == 0 {
                continue;
            }

            let offset = (location >> 8) as usize;
            let sector_count = (location & 0xFF) as usize;
            if offset < HEADER_SECTORS || sector_count == 0 || offset + sector_count > total_sectors
            {
                warn!(
                    "Region file {path:?} points chunk {index} at sectors {offset}..{} which do not exist, dropping it",
                    offset + sector_count
                );
                continue;
            }
            used_sectors[offset..offset + sector_count].fill(true);
            locations[index] = location;
        }

        Ok(Self {
            path: path.to_path_buf(),
            compression,
            compression_level,
            state: Mutex::new(Some(RegionState {
                file,
                locations,
                timestamps,
                used_sectors,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last modification of a chunk in seconds since the epoch, 0 when absent.
    pub fn timestamp(&self, local_x: i32, local_z: i32) -> Result<u32, RegionError> {
        let index = checked_index(local_x, local_z)?;
        self.with_state(|state| Ok(state.timestamps[index]))
    }

    fn with_state<T>(
        &self,
        action: impl FnOnce(&mut RegionState) -> Result<T, RegionError>,
    ) -> Result<T, RegionError> {
        let mut guard = self.state.lock();
        match guard.as_mut() {
            Some(state) => action(state),
            None => Err(RegionError::Closed(self.path.clone())),
        }
    }
}

fn checked_index(local_x: i32, local_z: i32) -> Result<usize, RegionError> {
    if !(0..REGION_SIZE).contains(&local_x) || !(0..REGION_SIZE).contains(&local_z) {
        return Err(RegionError::OutOfBounds(local_x, local_z));
    }
    Ok(local_index(local_x, local_z))
}

impl RegionFile for AnvilRegionFile {
    fn has_chunk(&self, local_x: i32, local_z: i32) -> Result<bool, RegionError> {
        let index = checked_index(local_x, local_z)?;
        self.with_state(|state| Ok(state.locations[index] != 0))
    }

    fn read_chunk(&self, local_x: i32, local_z: i32) -> Result<Option<Vec<u8>>, RegionError> {
        let index = checked_index(local_x, local_z)?;
        self.with_state(|state| match state.locations[index] {
            0 => Ok(None),
            location => state.read_payload(location).map(Some),
        })
    }

    fn write_chunk(&self, local_x: i32, local_z: i32, data: &[u8]) -> Result<(), RegionError> {
        let index = checked_index(local_x, local_z)?;

        // Compress before taking the lock
        let compressed_data = self
            .compression
            .compress_data(data, self.compression_level)
            .map_err(RegionError::Compression)?;

        // Length of compressed data + compression type
        let length = compressed_data.len() + 1;
        let sector_count = (length + 4).div_ceil(SECTOR_BYTES);
        if sector_count > MAX_CHUNK_SECTORS {
            return Err(RegionError::ChunkTooLarge(sector_count));
        }

        // | 0 1 2 3 |        4         |        5..      | padding |
        // | length  | compression type | compressed data | 0 ...   |
        let mut chunk_payload = Vec::with_capacity(sector_count * SECTOR_BYTES);
        chunk_payload.extend_from_slice(&(length as u32).to_be_bytes());
        chunk_payload.push(self.compression as u8);
        chunk_payload.extend_from_slice(&compressed_data);
        chunk_payload.resize(sector_count * SECTOR_BYTES, 0);

        self.with_state(|state| {
            let old_location = state.locations[index];
            let old_offset = (old_location >> 8) as usize;
            let old_count = (old_location & 0xFF) as usize;

            let in_place = old_location != 0 && old_count >= sector_count;
            let offset = if in_place {
                old_offset
            } else {
                let offset = state.find_free_sectors(sector_count);
                if offset + sector_count > MAX_SECTOR_OFFSET {
                    return Err(RegionError::RegionFull);
                }
                offset
            };

            trace!(
                "Writing {} bytes to {:?} at sector {offset}",
                chunk_payload.len(),
                self.path
            );
            state
                .file
                .seek(SeekFrom::Start((offset * SECTOR_BYTES) as u64))?;
            state.file.write_all(&chunk_payload)?;

            // Seconds since the epoch fit a u32 until 2106
            let epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |time| time.as_secs() as u32);
            let old_timestamp = state.timestamps[index];
            state.locations[index] = ((offset as u32) << 8) | sector_count as u32;
            state.timestamps[index] = epoch;
            if let Err(error) = state.write_header_entry(index) {
                state.locations[index] = old_location;
                state.timestamps[index] = old_timestamp;
                return Err(error);
            }

            // The allocation only changes once the header points at the new data
            if in_place {
                state.mark_sectors(old_offset + sector_count, old_count - sector_count, false);
            } else {
                if old_location != 0 {
                    state.mark_sectors(old_offset, old_count, false);
                }
                state.mark_sectors(offset, sector_count, true);
            }

            state.file.flush()?;
            Ok(())
        })
    }

    fn chunks(&self) -> Result<RegionChunks<'_>, RegionError> {
        let stored: Vec<usize> = self.with_state(|state| {
            Ok((0..REGION_CHUNK_COUNT)
                .filter(|index| state.locations[*index] != 0)
                .collect())
        })?;

        // Locations are looked up again for every chunk, a rewrite may have moved it
        Ok(Box::new(stored.into_iter().filter_map(move |index| {
            self.with_state(|state| match state.locations[index] {
                0 => Ok(None),
                location => state.read_payload(location).map(Some),
            })
            .transpose()
        })))
    }

    fn close(&self) -> Result<(), RegionError> {
        let Some(state) = self.state.lock().take() else {
            return Ok(());
        };
        trace!("Closing region file {:?}", self.path);
        state.file.sync_all()?;
        Ok(())
    }
}

/// Opens [`AnvilRegionFile`]s compressing with the configured algorithm and level.
pub struct AnvilRegionOpener {
    compression: Compression,
    compression_level: u32,
}

impl AnvilRegionOpener {
    pub fn new(compression: Compression, compression_level: u32) -> Self {
        Self {
            compression,
            compression_level,
        }
    }

    pub fn from_config() -> Self {
        let config = &advanced_config().storage.compression;
        Self::new(config.algorithm.into(), config.level)
    }
}

impl Default for AnvilRegionOpener {
    fn default() -> Self {
        Self::from_config()
    }
}

impl RegionFileOpener for AnvilRegionOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn RegionFile>, RegionError> {
        trace!("Opening region file from disk: {path:?}");
        let region_file = AnvilRegionFile::open(path, self.compression, self.compression_level)?;
        Ok(Box::new(region_file))
    }
}
