use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
    pub threads: bool,
    pub color: bool,
    pub timestamp: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            threads: true,
            color: true,
            timestamp: true,
        }
    }
}

impl LoggingConfig {
    /// The configured level, falling back to `info` for anything unrecognized.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
