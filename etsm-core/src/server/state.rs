//! Observed server state and the persisted server.json record
//!
//! [`observe`] is a read-only scan of a server directory: which cache
//! entry each link points at, which owned configs exist, and what the
//! persisted record says. Reconciliation diffs against it; `server
//! status` prints it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File name of the persisted state record inside a server directory
pub const RECORD_FILE: &str = "server.json";

/// Name and resolved version of an installed asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledAsset {
    pub name: String,
    pub version: String,
}

/// Persisted summary of a server's effective configuration
///
/// Owned by the activation engine; written only when its serialized form
/// actually changed so an unchanged reconciliation leaves the file's
/// modification time alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServerRecord {
    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub engine: Option<InstalledAsset>,

    #[serde(default, rename = "mod")]
    pub game_mod: Option<InstalledAsset>,

    /// Ordered config names (with .cfg extension) loaded at startup
    #[serde(default)]
    pub startup_configs: Vec<String>,
}

impl ServerRecord {
    pub fn load(server_dir: &Path) -> Result<Option<Self>> {
        let path = server_dir.join(RECORD_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let record = serde_json::from_str(&content).map_err(|source| Error::RecordParse {
            path: path.clone(),
            source,
        })?;
        Ok(Some(record))
    }

    /// Write the record; returns whether bytes actually changed
    pub fn save_if_changed(&self, server_dir: &Path) -> Result<bool> {
        let path = server_dir.join(RECORD_FILE);
        let mut content = serde_json::to_string_pretty(self).map_err(|source| {
            Error::RecordParse {
                path: path.clone(),
                source,
            }
        })?;
        content.push('\n');

        if path.exists() {
            let existing = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            if existing == content {
                return Ok(false);
            }
        }
        std::fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
        Ok(true)
    }
}

/// Observed layout of a server directory
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    /// Target of the `engine` link, if present
    pub engine_target: Option<PathBuf>,

    /// Top-level mod links: link name -> target
    pub mod_links: BTreeMap<String, PathBuf>,

    /// `etmain/*.pk3` links: file name -> target (paks and maps)
    pub pk3_links: BTreeMap<String, PathBuf>,

    /// `etmain/*.cfg` activation links: file name -> target
    pub config_links: BTreeMap<String, PathBuf>,

    /// Owned config file names under `configs/`
    pub owned_configs: Vec<String>,

    pub record: Option<ServerRecord>,
}

impl ServerState {
    /// Whether `name.cfg` is active at startup according to the record
    pub fn is_startup(&self, name: &str) -> bool {
        let want = if name.ends_with(".cfg") {
            name.to_string()
        } else {
            format!("{name}.cfg")
        };
        self.record
            .as_ref()
            .map(|r| r.startup_configs.contains(&want))
            .unwrap_or(false)
    }
}

/// Read-only scan of a server directory
pub fn observe(server_dir: &Path) -> Result<ServerState> {
    if !server_dir.is_dir() {
        let name = server_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("?")
            .to_string();
        return Err(Error::ServerNotFound { name });
    }

    let mut state = ServerState {
        record: ServerRecord::load(server_dir)?,
        ..Default::default()
    };

    for entry in std::fs::read_dir(server_dir).map_err(|e| Error::io(server_dir, e))? {
        let entry = entry.map_err(|e| Error::io(server_dir, e))?;
        let path = entry.path();
        if !path.is_symlink() {
            continue;
        }
        let target = std::fs::read_link(&path).map_err(|e| Error::io(&path, e))?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name == "engine" {
            state.engine_target = Some(target);
        } else {
            state.mod_links.insert(name, target);
        }
    }

    let etmain = server_dir.join("etmain");
    if etmain.is_dir() {
        for entry in std::fs::read_dir(&etmain).map_err(|e| Error::io(&etmain, e))? {
            let entry = entry.map_err(|e| Error::io(&etmain, e))?;
            let path = entry.path();
            if !path.is_symlink() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let target = std::fs::read_link(&path).map_err(|e| Error::io(&path, e))?;
            if name.ends_with(".pk3") {
                state.pk3_links.insert(name, target);
            } else if name.ends_with(".cfg") {
                state.config_links.insert(name, target);
            }
        }
    }

    let configs = server_dir.join("configs");
    if configs.is_dir() {
        for entry in std::fs::read_dir(&configs).map_err(|e| Error::io(&configs, e))? {
            let entry = entry.map_err(|e| Error::io(&configs, e))?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if name.ends_with(".cfg") {
                        state.owned_configs.push(name.to_string());
                    }
                }
            }
        }
        state.owned_configs.sort();
    }

    Ok(state)
}
