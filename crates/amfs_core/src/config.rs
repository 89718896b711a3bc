//! Layered configuration for the amfs engine (§6.5).
//!
//! Resolution order, lowest to highest priority: built-in defaults, a TOML
//! file (if present), then environment variables prefixed `AMFS_`. A missing
//! config file is not an error - the engine falls back to defaults, matching
//! the rest of the ambient stack's policy of degrading gracefully on missing
//! optional configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Effective configuration for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `folder.automerge`, blob store entries and
    /// mergeable document entries (§6.1).
    pub data_dir: PathBuf,

    /// Scratch directory for staging files backing open handles.
    pub scratch_dir: PathBuf,

    /// TCP address the sync protocol listens on.
    pub sync_listen: String,

    /// Optional Unix domain socket path the sync protocol also listens on.
    pub sync_unix_socket: Option<PathBuf>,

    /// `log`/`tracing` filter string, e.g. `"info"` or `"amfs_core=debug"`.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./fs"),
            scratch_dir: std::env::temp_dir().join("amfs-scratch"),
            sync_listen: "127.0.0.1:51023".to_string(),
            sync_unix_socket: None,
            log_level: "info".to_string(),
        }
    }
}

/// On-disk shape of the TOML config file. Every field is optional so a
/// partial file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    sync_listen: Option<String>,
    sync_unix_socket: Option<PathBuf>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration: defaults, then `path` if it exists, then
    /// `AMFS_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = path {
            match std::fs::read_to_string(path) {
                Ok(contents) => {
                    let file: FileConfig = toml::from_str(&contents)?;
                    config.apply_file(file);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("no config file at {}, using defaults", path.display());
                }
                Err(err) => return Err(err.into()),
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.scratch_dir {
            self.scratch_dir = v;
        }
        if let Some(v) = file.sync_listen {
            self.sync_listen = v;
        }
        if file.sync_unix_socket.is_some() {
            self.sync_unix_socket = file.sync_unix_socket;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AMFS_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AMFS_SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AMFS_SYNC_LISTEN") {
            self.sync_listen = v;
        }
        if let Ok(v) = std::env::var("AMFS_SYNC_UNIX_SOCKET") {
            self.sync_unix_socket = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("AMFS_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_used_when_no_file_present() {
        let config = Config::load(Some(Path::new("/nonexistent/amfs.toml"))).unwrap();
        assert_eq!(config.sync_listen, "127.0.0.1:51023");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amfs.toml");
        std::fs::write(&path, "sync_listen = \"0.0.0.0:9000\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.sync_listen, "0.0.0.0:9000");
        assert_eq!(config.data_dir, PathBuf::from("./fs"));
    }

    #[test]
    fn env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amfs.toml");
        std::fs::write(&path, "sync_listen = \"0.0.0.0:9000\"\n").unwrap();

        // SAFETY: test is single-threaded with respect to this env var.
        unsafe {
            std::env::set_var("AMFS_SYNC_LISTEN", "0.0.0.0:9999");
        }
        let config = Config::load(Some(&path)).unwrap();
        unsafe {
            std::env::remove_var("AMFS_SYNC_LISTEN");
        }
        assert_eq!(config.sync_listen, "0.0.0.0:9999");
    }
}
