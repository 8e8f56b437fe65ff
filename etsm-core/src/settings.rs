//! Operator settings (settings.yaml in the user config directory)
//!
//! A small file holding the default server name and the sources URL.
//! Never ambient state: the CLI resolves the effective server name once
//! at dispatch and passes it down explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default catalog base URL when settings don't override it
pub const DEFAULT_SOURCES_URL: &str = "http://etsm.symnet.io";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Server name used when a command omits an explicit one
    #[serde(default)]
    pub default_server: Option<String>,

    /// Catalog base URL
    #[serde(default)]
    pub sources_url: Option<String>,
}

impl Settings {
    /// Load from the platform config directory, default when absent
    pub fn load() -> Result<Self> {
        Ok(match Self::default_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        })
    }

    /// Load from an explicit path, default when the file is absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_yaml_ng::from_str(&content).map_err(|source| Error::YamlParse {
            what: format!("settings file {}", path.display()),
            source,
        })
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::default_path().ok_or_else(|| Error::InvalidRoot {
            reason: "could not determine a user config directory for settings".to_string(),
        })?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let content = serde_yaml_ng::to_string(self).map_err(|source| Error::YamlParse {
            what: "settings".to_string(),
            source,
        })?;
        std::fs::write(path, content).map_err(|e| Error::io(path, e))
    }

    /// `<user config dir>/etsm/settings.yaml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "symnet", "etsm")
            .map(|dirs| dirs.config_dir().join("settings.yaml"))
    }

    /// Resolve the effective server name: explicit argument wins, then
    /// the stored default; absence of both is a hard error naming the
    /// setting so the operator knows what to fix
    pub fn resolve_server(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(name) = explicit {
            return Ok(name.to_string());
        }
        self.default_server.clone().ok_or(Error::NoServerSelected)
    }

    /// Effective sources URL: explicit flag > setting > built-in default
    pub fn resolve_sources_url(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.sources_url.clone())
            .unwrap_or_else(|| DEFAULT_SOURCES_URL.to_string())
    }
}
