//! Owned config files under a server's `configs/` directory
//!
//! Single-shot edits to one config at a time, each under the per-server
//! lock. Reads are lock-free. Untouched lines round-trip byte-for-byte
//! through every edit.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::config::{self, ConfigFile};
use crate::error::{Error, Result};
use crate::paths::EtsmPaths;
use crate::server::lock::{ServerLock, DEFAULT_LOCK_TIMEOUT};

/// Handle on one server's owned configs
#[derive(Debug)]
pub struct ConfigStore {
    paths: EtsmPaths,
    server_dir: PathBuf,
    server_name: String,
    lock_timeout: Duration,
}

impl ConfigStore {
    pub fn open(paths: &EtsmPaths, server_name: &str) -> Result<Self> {
        let server_dir = paths.server_dir(server_name);
        if !server_dir.is_dir() {
            return Err(Error::ServerNotFound {
                name: server_name.to_string(),
            });
        }
        Ok(Self {
            paths: paths.clone(),
            server_dir,
            server_name: server_name.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn config_path(&self, file_name: &str) -> PathBuf {
        self.server_dir.join("configs").join(file_name)
    }

    /// Create an owned config, optionally seeded from template text
    ///
    /// Returns the normalized file name.
    pub fn create(&self, name: &str, template_text: Option<&str>, force: bool) -> Result<String> {
        let file_name = config::normalize_config_name(name)?;
        let _lock = ServerLock::acquire(&self.paths, &self.server_name, self.lock_timeout)?;

        let path = self.config_path(&file_name);
        if path.exists() && !force {
            return Err(Error::ConfigExists {
                server: self.server_name.clone(),
                name: file_name,
            });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::write(&path, template_text.unwrap_or("")).map_err(|e| Error::io(&path, e))?;
        info!("Created config '{}' in server '{}'", file_name, self.server_name);
        Ok(file_name)
    }

    /// Owned config file names, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.server_dir.join("configs");
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".cfg") && entry.path().is_file() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> Result<ConfigFile> {
        let file_name = config::normalize_config_name(name)?;
        let path = self.config_path(&file_name);
        if !path.is_file() {
            return Err(Error::ConfigMissing {
                server: self.server_name.clone(),
                name: file_name,
            });
        }
        let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Ok(ConfigFile::parse(&content))
    }

    pub fn get_cvar(&self, name: &str, key: &str) -> Result<Option<String>> {
        Ok(self.load(name)?.get_cvar(key).map(str::to_string))
    }

    pub fn cvars(&self, name: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .load(name)?
            .cvars()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    pub fn execs(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .load(name)?
            .execs()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    pub fn set_cvar(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.edit(name, |file| file.upsert(key, value))
    }

    pub fn set_bot(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.edit(name, |file| file.upsert_bot(key, value))
    }

    pub fn add_exec(&self, name: &str, target: &str) -> Result<()> {
        self.edit(name, |file| file.add_exec(target))
    }

    /// Remove every `exec` line naming the target; returns how many
    pub fn remove_exec(&self, name: &str, target: &str) -> Result<usize> {
        let mut removed = 0;
        self.edit(name, |file| {
            removed = file.remove_exec(target);
            Ok(())
        })?;
        Ok(removed)
    }

    /// Load, patch, write back, under the server lock
    fn edit(&self, name: &str, apply: impl FnOnce(&mut ConfigFile) -> Result<()>) -> Result<()> {
        let file_name = config::normalize_config_name(name)?;
        let _lock = ServerLock::acquire(&self.paths, &self.server_name, self.lock_timeout)?;

        let mut file = self.load(&file_name)?;
        apply(&mut file)?;

        let path = self.config_path(&file_name);
        std::fs::write(&path, file.to_string()).map_err(|e| Error::io(&path, e))?;
        Ok(())
    }
}
