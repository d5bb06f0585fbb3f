use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default import map file, relative to the working directory.
pub const DEFAULT_MAP_FILE: &str = "importmap.json";

/// Runtime configuration for the pinmap CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Import map file read before and written after each command.
    pub map_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            map_path: cwd.join(DEFAULT_MAP_FILE),
            cwd,
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            map_path: cwd.join(DEFAULT_MAP_FILE),
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Set the map file; relative paths are taken from the working directory.
    #[must_use]
    pub fn with_map_path(mut self, path: PathBuf) -> Self {
        self.map_path = if path.is_absolute() {
            path
        } else {
            self.cwd.join(path)
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_path_follows_cwd() {
        let config = Config::new(PathBuf::from("/work"));
        assert_eq!(config.map_path, PathBuf::from("/work/importmap.json"));

        let config = config.with_map_path(PathBuf::from("public/map.json"));
        assert_eq!(config.map_path, PathBuf::from("/work/public/map.json"));

        let config = config.with_map_path(PathBuf::from("/abs/map.json"));
        assert_eq!(config.map_path, PathBuf::from("/abs/map.json"));
    }
}
