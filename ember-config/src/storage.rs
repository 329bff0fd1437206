use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// How many region files may be open at once. The least recently used one is closed when
    /// another has to be opened.
    pub region_cache_size: usize,
    pub compression: ChunkCompression,
    /// File next to `level.dat` holding the properties vanilla does not know about.
    pub extension_file_name: String,
    /// Copy `level.dat` to `level.dat_old` before it is overwritten.
    pub backup_level_dat: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region_cache_size: 256,
            compression: ChunkCompression::default(),
            extension_file_name: "level_ember.dat".to_string(),
            backup_level_dat: true,
        }
    }
}

impl StorageConfig {
    pub(crate) fn validate(&self) {
        assert!(
            self.region_cache_size > 0,
            "The region cache must be able to hold at least one region file"
        );
        assert!(
            self.compression.level <= 9,
            "Compression level must be between 0 and 9"
        );
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ChunkCompression {
    pub algorithm: Compression,
    pub level: u32,
}

impl Default for ChunkCompression {
    fn default() -> Self {
        Self {
            algorithm: Compression::ZLib,
            level: 6,
        }
    }
}

/// How chunk payloads are compressed inside a region file.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    /// GZip Compression
    GZip,
    /// ZLib Compression
    ZLib,
    /// Stored as is
    None,
}
