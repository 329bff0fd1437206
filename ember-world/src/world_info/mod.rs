use ember_nbt::data_view::DataView;
use ember_util::math::vector3::Vector3;
use thiserror::Error;

use crate::level::LevelFolder;

pub mod anvil;

pub(crate) trait WorldInfoReader {
    fn read_world_info(&self, level_folder: &LevelFolder) -> WorldProperties;
}

pub(crate) trait WorldInfoWriter: Sync + Send {
    /// Writes whatever `properties` holds. False if any file failed.
    fn write_world_info(&self, properties: &WorldProperties, level_folder: &LevelFolder) -> bool;
}

/// The properties of a world, split over two files that are read and written independently.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldProperties {
    /// The `Data` compound of `level.dat`, `None` when it is missing or unreadable.
    pub level_data: Option<DataView>,
    /// Properties the vanilla format has no place for.
    pub extension: Option<DataView>,
}

impl WorldProperties {
    pub fn level_name(&self) -> Option<&str> {
        self.level_data.as_ref()?.get_string("LevelName")
    }

    pub fn seed(&self) -> Option<i64> {
        self.level_data.as_ref()?.get_long("RandomSeed")
    }

    pub fn spawn(&self) -> Option<Vector3<i32>> {
        let data = self.level_data.as_ref()?;
        Some(Vector3::new(
            data.get_int("SpawnX")?,
            data.get_int("SpawnY")?,
            data.get_int("SpawnZ")?,
        ))
    }

    /// `level.dat` data, created empty when absent.
    pub fn level_data_mut(&mut self) -> &mut DataView {
        self.level_data.get_or_insert_with(DataView::new)
    }

    pub fn extension_mut(&mut self) -> &mut DataView {
        self.extension.get_or_insert_with(DataView::new)
    }
}

#[derive(Error, Debug)]
pub enum WorldInfoError {
    #[error("Io error: {0}")]
    IoError(std::io::ErrorKind),
    #[error("Info not found!")]
    InfoNotFound,
    #[error("Invalid tag stream: {0}")]
    Nbt(#[from] ember_nbt::Error),
    #[error("File has no Data compound")]
    MissingData,
}

impl From<std::io::Error> for WorldInfoError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => Self::InfoNotFound,
            value => Self::IoError(value),
        }
    }
}
