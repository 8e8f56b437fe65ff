//! Filesystem layout under the etsm root
//!
//! All state lives under a single root (default `/var/lib/etsm`):
//!
//! ```text
//! <root>/
//!   cache/                    # content cache, shared by all servers
//!     <kind>/...              # verified entries, one path per (kind, name, version)
//!     tmp/                    # staging area, swept on promote failure
//!     locks/                  # per-entry advisory lock files
//!   servers/
//!     .locks/<name>.lock      # per-server reconciliation locks
//!     <name>/                 # one directory per named server
//! ```
//!
//! Resolution order for the root: CLI flag > `ETSM_ROOT` > default.

use std::path::{Path, PathBuf};

use crate::catalog::AssetKind;
use crate::error::Result;

/// Default root when neither the CLI flag nor `ETSM_ROOT` is set
pub const DEFAULT_ROOT: &str = "/var/lib/etsm";

/// Environment variable overriding the default root
pub const ROOT_ENV_VAR: &str = "ETSM_ROOT";

/// Resolved filesystem layout for one invocation
#[derive(Debug, Clone)]
pub struct EtsmPaths {
    root: PathBuf,
}

impl EtsmPaths {
    /// Resolve the root without a CLI override
    pub fn discover() -> Result<Self> {
        Self::discover_with_override(None)
    }

    /// Resolve the root, preferring a CLI override when given
    ///
    /// An override must be an absolute path; the environment variable and
    /// the default are trusted as-is.
    pub fn discover_with_override(cli_override: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = cli_override {
            if !root.is_absolute() {
                return Err(crate::Error::InvalidRoot {
                    reason: format!("--root must be an absolute path (got: {})", root.display()),
                });
            }
            return Ok(Self { root });
        }

        if let Ok(env_root) = std::env::var(ROOT_ENV_VAR) {
            if !env_root.is_empty() {
                return Ok(Self {
                    root: PathBuf::from(env_root),
                });
            }
        }

        Ok(Self {
            root: PathBuf::from(DEFAULT_ROOT),
        })
    }

    /// A layout rooted at an explicit path, for tests and embedding
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn cache_kind_dir(&self, kind: AssetKind) -> PathBuf {
        self.cache_dir().join(kind.to_string())
    }

    pub fn cache_tmp_dir(&self) -> PathBuf {
        self.cache_dir().join("tmp")
    }

    pub fn cache_locks_dir(&self) -> PathBuf {
        self.cache_dir().join("locks")
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.root.join("servers")
    }

    pub fn server_dir(&self, server_name: &str) -> PathBuf {
        self.servers_dir().join(server_name)
    }

    /// Lock file guarding one server's reconciliation; lives outside the
    /// server directory so acquiring it never creates the server
    pub fn server_lock_path(&self, server_name: &str) -> PathBuf {
        self.servers_dir()
            .join(".locks")
            .join(format!("{server_name}.lock"))
    }

    /// List the names of existing server directories, sorted
    pub fn list_servers(&self) -> Result<Vec<String>> {
        let dir = self.servers_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| crate::Error::io(&dir, e))? {
            let entry = entry.map_err(|e| crate::Error::io(&dir, e))?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    // `.locks` and other dot directories are not servers
                    if !name.starts_with('.') {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
