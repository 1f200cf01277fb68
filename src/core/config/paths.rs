//! On-disk layout.
//!
//! Everything the service writes (vector store, logs, secrets, generated admin
//! key) lives under one data directory. Only the public config file may sit
//! elsewhere.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "docchat";
const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
    config_file: PathBuf,
}

impl AppPaths {
    /// Data dir: `DOCCHAT_DATA_DIR`, else `./data` in debug builds, else the
    /// per-user platform data directory.
    ///
    /// Config file: `DOCCHAT_CONFIG_PATH`, else `config.yml` inside the data
    /// dir when one exists there, else `./config.yml`.
    pub fn from_env() -> Self {
        let data_dir = env::var_os("DOCCHAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let config_file = env::var_os("DOCCHAT_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let beside_data = data_dir.join(CONFIG_FILE);
                if beside_data.is_file() {
                    beside_data
                } else {
                    PathBuf::from(CONFIG_FILE)
                }
            });

        Self {
            data_dir,
            config_file,
        }
    }

    /// Everything, config included, under `dir`.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        let data_dir = dir.into();
        let config_file = data_dir.join(CONFIG_FILE);
        Self {
            data_dir,
            config_file,
        }
    }

    /// Creates the data directory and its `logs/` subdirectory.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.log_dir())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.data_dir.join("secrets.yaml")
    }

    pub fn store_file(&self) -> PathBuf {
        self.data_dir.join("vectors.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn admin_key_file(&self) -> PathBuf {
        self.data_dir.join(".admin_key")
    }
}

fn default_data_dir() -> PathBuf {
    if cfg!(debug_assertions) {
        return PathBuf::from("data");
    }

    let home = || env::var_os("HOME").map(PathBuf::from);
    let base = if cfg!(target_os = "windows") {
        env::var_os("LOCALAPPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        home().map(|home| home.join("Library").join("Application Support"))
    } else {
        env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| home().map(|home| home.join(".local").join("share")))
    };

    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}
