use log::warn;
use logging::LoggingConfig;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use storage::StorageConfig;

use std::path::PathBuf;
use std::{env, fs, path::Path, sync::LazyLock};

pub mod logging;
pub mod storage;

pub use storage::{ChunkCompression, Compression};

const CONFIG_ROOT_FOLDER: &str = "config/";

pub static BASIC_CONFIG: LazyLock<BasicConfiguration> = LazyLock::new(|| {
    let exec_dir = env::current_dir().expect("Failed to get the current working directory");
    BasicConfiguration::load(&exec_dir)
});

#[cfg(not(feature = "test_helper"))]
static ADVANCED_CONFIG: LazyLock<AdvancedConfiguration> = LazyLock::new(|| {
    let exec_dir = env::current_dir().expect("Failed to get the current working directory");
    AdvancedConfiguration::load(&exec_dir)
});

#[cfg(not(feature = "test_helper"))]
pub fn advanced_config() -> &'static AdvancedConfiguration {
    &ADVANCED_CONFIG
}

#[cfg(feature = "test_helper")]
use std::cell::RefCell;

// Leaked on purpose so tests hand out the same `&'static` the real config does
#[cfg(feature = "test_helper")]
thread_local! {
    // Thread local so one test does not change the config of another running test
    static ADVANCED_CONFIG: RefCell<&'static AdvancedConfiguration> = RefCell::new(Box::leak(Box::new(AdvancedConfiguration::default())));
}

#[cfg(feature = "test_helper")]
pub fn override_config_for_testing(config: AdvancedConfiguration) {
    ADVANCED_CONFIG.with_borrow_mut(|ref_config| {
        *ref_config = Box::leak(Box::new(config));
    });
}

#[cfg(feature = "test_helper")]
pub fn advanced_config() -> &'static AdvancedConfiguration {
    ADVANCED_CONFIG.with_borrow(|config| *config)
}

/// Tuning for the storage engine. Everything has a default that reads and writes vanilla
/// compatible worlds.
#[derive(Deserialize, Serialize, Default, Clone, Debug)]
#[serde(default)]
pub struct AdvancedConfiguration {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct BasicConfiguration {
    /// Folder holding `level.dat` and the `region` folder.
    pub world_path: PathBuf,
}

impl Default for BasicConfiguration {
    fn default() -> Self {
        Self {
            world_path: PathBuf::from("./world"),
        }
    }
}

impl BasicConfiguration {
    pub fn get_world_path(&self) -> PathBuf {
        self.world_path.clone()
    }
}

trait LoadConfiguration {
    fn load(exec_dir: &Path) -> Self
    where
        Self: Sized + Default + Serialize + DeserializeOwned,
    {
        let config_dir = exec_dir.join(CONFIG_ROOT_FOLDER);
        if !config_dir.exists() {
            log::debug!("creating new config root folder");
            fs::create_dir(&config_dir).expect("Failed to create config root folder");
        }
        let path = config_dir.join(Self::get_path());

        let config = if path.exists() {
            let file_content = fs::read_to_string(&path)
                .unwrap_or_else(|_| panic!("Couldn't read configuration file at {:?}", &path));

            toml::from_str(&file_content).unwrap_or_else(|err| {
                panic!(
                    "Couldn't parse config at {:?}. Reason: {}. This is probably caused by a config update; just delete the old config and start again",
                    &path,
                    err.message()
                )
            })
        } else {
            let content = Self::default();

            match toml::to_string(&content) {
                Ok(serialized) => {
                    if let Err(err) = fs::write(&path, serialized) {
                        warn!("Couldn't write default config to {:?}. Reason: {}", &path, err);
                    }
                }
                Err(err) => warn!("Couldn't serialize default config. Reason: {}", err),
            }

            content
        };

        config.validate();
        config
    }

    fn get_path() -> &'static Path;

    fn validate(&self);
}

impl LoadConfiguration for AdvancedConfiguration {
    fn get_path() -> &'static Path {
        Path::new("features.toml")
    }

    fn validate(&self) {
        self.storage.validate();
    }
}

impl LoadConfiguration for BasicConfiguration {
    fn get_path() -> &'static Path {
        Path::new("configuration.toml")
    }

    fn validate(&self) {
        assert!(
            !self.world_path.as_os_str().is_empty(),
            "The world path must not be empty"
        );
    }
}
