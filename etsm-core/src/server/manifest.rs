//! Declared server state (the operator-authored YAML manifest)
//!
//! ```yaml
//! server_name: match1
//! ip: 0.0.0.0
//! port: 27960
//! mod:
//!   name: legacy
//! maps: [adlernest, caen_4]
//! configs:
//!   - name: test_server
//!     from: etl_server
//!     cvars:
//!       sv_hostname: "testserver etsm"
//! build_mapvote: true
//! startup_configs: [test_server]
//! ```
//!
//! Read-only input to reconciliation; defaults follow the original
//! server schema (etl engine, legacy mod, 0.0.0.0:27960).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

static SERVER_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    27960
}

fn default_engine_name() -> String {
    "etl".to_string()
}

fn default_mod_name() -> String {
    "legacy".to_string()
}

/// Engine build selection; version omitted means latest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSelector {
    #[serde(default = "default_engine_name")]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for EngineSelector {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            version: None,
        }
    }
}

/// Mod selection; version omitted means latest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModSelector {
    #[serde(default = "default_mod_name")]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for ModSelector {
    fn default() -> Self {
        Self {
            name: default_mod_name(),
            version: None,
        }
    }
}

/// One declared config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSpec {
    pub name: String,

    /// Template to copy from, by template-config catalog name
    #[serde(default)]
    pub from: Option<String>,

    /// Cvar upserts applied over the template (or an empty file)
    #[serde(default)]
    pub cvars: BTreeMap<String, String>,

    /// Bot option upserts
    #[serde(default)]
    pub bots: BTreeMap<String, String>,
}

/// Declared desired state for one named server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerManifest {
    pub server_name: String,

    #[serde(default = "default_ip")]
    pub ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Catalog base URL override for this server's assets
    #[serde(default)]
    pub sources_url: Option<String>,

    #[serde(default)]
    pub engine: EngineSelector,

    #[serde(default, rename = "mod")]
    pub game_mod: ModSelector,

    /// Ordered map names
    #[serde(default)]
    pub maps: Vec<String>,

    #[serde(default)]
    pub configs: Vec<ConfigSpec>,

    /// Regenerate the map-rotation config on every reconciliation
    #[serde(default)]
    pub build_mapvote: bool,

    /// Ordered config names loaded at server startup
    #[serde(default)]
    pub startup_configs: Vec<String>,
}

impl ServerManifest {
    /// A minimal manifest for `server create <name>` without a file
    pub fn with_defaults(server_name: &str) -> Self {
        Self {
            server_name: server_name.to_string(),
            ip: default_ip(),
            port: default_port(),
            sources_url: None,
            engine: EngineSelector::default(),
            game_mod: ModSelector::default(),
            maps: Vec::new(),
            configs: vec![ConfigSpec {
                name: "etl_server".to_string(),
                from: Some("etl_server".to_string()),
                cvars: BTreeMap::new(),
                bots: BTreeMap::new(),
            }],
            build_mapvote: false,
            startup_configs: vec!["etl_server".to_string()],
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let manifest: ServerManifest =
            serde_yaml_ng::from_str(content).map_err(|source| Error::YamlParse {
                what: "server manifest".to_string(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Fail fast on names that cannot appear on disk, before any mutation
    pub fn validate(&self) -> Result<()> {
        if !SERVER_NAME_RE.is_match(&self.server_name) {
            return Err(Error::InvalidManifest {
                reason: format!(
                    "invalid server name '{}' (allowed: letters, digits, '_')",
                    self.server_name
                ),
            });
        }
        for config in &self.configs {
            crate::config::normalize_config_name(&config.name)?;
            if let Some(from) = &config.from {
                crate::config::normalize_config_name(from)?;
            }
        }
        for name in &self.startup_configs {
            crate::config::normalize_config_name(name)?;
        }
        Ok(())
    }
}
