use std::{
    fs::{self, File},
    io::BufReader,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use ember_config::advanced_config;
use ember_nbt::{
    data_view::DataView,
    nbt_compress::{read_gzip_compound_tag, write_gzip_compound_tag_to_bytes},
};
use log::{debug, error, warn};

use crate::level::LevelFolder;

use super::{WorldInfoError, WorldInfoReader, WorldInfoWriter, WorldProperties};

pub const LEVEL_DAT_FILE_NAME: &str = "level.dat";
pub const LEVEL_DAT_BACKUP_FILE_NAME: &str = "level.dat_old";

/// Compound holding everything inside `level.dat`.
const DATA: &str = "Data";

/// Reads and writes the gzip compressed `level.dat` and the extension file next to it.
#[derive(Clone, Debug)]
pub struct AnvilLevelInfo {
    extension_file_name: String,
    backup_level_dat: bool,
}

impl AnvilLevelInfo {
    pub fn new(extension_file_name: String, backup_level_dat: bool) -> Self {
        Self {
            extension_file_name,
            backup_level_dat,
        }
    }

    pub fn from_config() -> Self {
        let storage = &advanced_config().storage;
        Self::new(
            storage.extension_file_name.clone(),
            storage.backup_level_dat,
        )
    }

    pub fn extension_file_name(&self) -> &str {
        &self.extension_file_name
    }

    fn read_level_dat(path: &Path) -> Result<DataView, WorldInfoError> {
        let mut root = read_file(path)?;
        match root.remove_local(DATA) {
            Some(ember_nbt::NbtTag::Compound(data)) => Ok(data),
            _ => Err(WorldInfoError::MissingData),
        }
    }

    fn write_level_dat(
        &self,
        data: &DataView,
        level_folder: &LevelFolder,
    ) -> Result<(), WorldInfoError> {
        let path = level_folder.root_folder.join(LEVEL_DAT_FILE_NAME);
        if self.backup_level_dat && path.exists() {
            let backup_path = level_folder.root_folder.join(LEVEL_DAT_BACKUP_FILE_NAME);
            if let Err(err) = fs::copy(&path, &backup_path) {
                warn!(
                    "Failed to back up {LEVEL_DAT_FILE_NAME} to {LEVEL_DAT_BACKUP_FILE_NAME}: {err}"
                );
            }
        }

        let mut data = data.clone();
        // 0 if the clock is set before the epoch
        let last_played = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |time| time.as_millis() as i64);
        data.put_local("LastPlayed", last_played);

        let mut root = DataView::new();
        root.put_local(DATA, data);
        write_file(&path, &root)
    }
}

fn read_file(path: &Path) -> Result<DataView, WorldInfoError> {
    let file = BufReader::new(File::open(path)?);
    Ok(read_gzip_compound_tag(file)?)
}

fn write_file(path: &Path, view: &DataView) -> Result<(), WorldInfoError> {
    let bytes = write_gzip_compound_tag_to_bytes(view)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Logs a failed read of one file. A missing file is normal for a new world.
fn log_read_failure(file_name: &str, err: &WorldInfoError) {
    match err {
        WorldInfoError::InfoNotFound => debug!("{file_name} does not exist yet"),
        err => error!("Failed to read {file_name}: {err}"),
    }
}

impl WorldInfoReader for AnvilLevelInfo {
    fn read_world_info(&self, level_folder: &LevelFolder) -> WorldProperties {
        let level_data =
            Self::read_level_dat(&level_folder.root_folder.join(LEVEL_DAT_FILE_NAME))
                .inspect_err(|err| log_read_failure(LEVEL_DAT_FILE_NAME, err))
                .ok();
        let extension = read_file(&level_folder.root_folder.join(&self.extension_file_name))
            .inspect_err(|err| log_read_failure(&self.extension_file_name, err))
            .ok();

        WorldProperties {
            level_data,
            extension,
        }
    }
}

impl WorldInfoWriter for AnvilLevelInfo {
    fn write_world_info(&self, properties: &WorldProperties, level_folder: &LevelFolder) -> bool {
        let mut written = true;

        if let Some(data) = &properties.level_data {
            if let Err(err) = self.write_level_dat(data, level_folder) {
                error!("Failed to write {LEVEL_DAT_FILE_NAME}: {err}");
                written = false;
            }
        }

        if let Some(extension) = &properties.extension {
            let path = level_folder.root_folder.join(&self.extension_file_name);
            if let Err(err) = write_file(&path, extension) {
                error!("Failed to write {}: {err}", self.extension_file_name);
                written = false;
            }
        }
        written
    }
}
