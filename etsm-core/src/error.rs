//! Error taxonomy for the asset cache and activation engine
//!
//! Every failure either aborts the current operation cleanly (prior
//! committed state intact) or is retried internally within a documented
//! bound. Messages name the dependency, config or cvar that caused the
//! failure so an operator can act on them directly.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::AssetKind;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors, surfaced unmodified to the CLI
#[derive(Error, Debug)]
pub enum Error {
    /// The catalog has no entry under this (kind, name)
    #[error("No {kind} named '{name}' in the catalog.\n\nRun:\n  etsm catalog list {kind}\nto see what is available, or 'etsm sources update' to refresh the index.")]
    NotFound { kind: AssetKind, name: String },

    /// The (kind, name) exists but not at the requested version
    #[error("{kind} '{name}' has no version '{version}'.\n\nRun:\n  etsm catalog list {kind} {name}\nto see the published versions.")]
    VersionNotFound {
        kind: AssetKind,
        name: String,
        version: String,
    },

    /// A config's `from` field names an unknown template
    #[error("Config template '{name}' was not found.\n\nRun:\n  etsm catalog list template-config\nto see the available templates.")]
    TemplateNotFound { name: String },

    /// A named server directory does not exist
    #[error("Server '{name}' does not exist.\n\nRun:\n  etsm server create {name}\nto create it, or 'etsm server list' to see existing servers.")]
    ServerNotFound { name: String },

    /// Refusing to overwrite an existing server without --force
    #[error("Server '{name}' already exists. Pass --force to reconcile it anyway.")]
    ServerExists { name: String },

    /// Downloaded bytes did not match the catalog's declared checksum
    #[error("Checksum mismatch for {kind} '{name}' version {version}!\n\nExpected: {expected}\nActual:   {actual}\n\nThe staged download was discarded and any previously cached copy was left untouched. The published asset may be corrupt; try 'etsm sources update' to refresh the index.")]
    Integrity {
        kind: AssetKind,
        name: String,
        version: String,
        expected: String,
        actual: String,
    },

    /// Fetch failed terminally, or the retry budget was exhausted
    #[error("Failed to fetch {url} after {attempts} attempt(s): {reason}")]
    Fetch {
        url: String,
        attempts: u32,
        reason: String,
    },

    /// A patch request contained characters illegal for the config format
    #[error("Invalid cvar request: {reason}")]
    CvarFormat { reason: String },

    /// Another invocation holds the reconciliation lock for this server
    #[error("Server '{server}' is locked by another etsm invocation.\n\nWaited {waited_ms}ms for the lock. Retry once the other operation finishes.")]
    Locked { server: String, waited_ms: u64 },

    /// Filesystem failure, tagged with the path involved
    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A YAML document (index, manifest, settings) failed to parse
    #[error("Failed to parse {what}")]
    YamlParse {
        what: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// The server.json state record failed to parse
    #[error("Failed to parse server state record at {path}")]
    RecordParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Manifest content that fails validation before any mutation
    #[error("Invalid server manifest: {reason}")]
    InvalidManifest { reason: String },

    /// Refusing to overwrite an existing owned config without --force
    #[error("Config '{name}' already exists in server '{server}'. Pass --force to overwrite it.")]
    ConfigExists { server: String, name: String },

    /// An owned config that a startup/activation operation expects
    #[error("Config '{name}' does not exist in server '{server}'.\n\nRun:\n  etsm server config list --server {server}\nto see its configs.")]
    ConfigMissing { server: String, name: String },

    /// No explicit server name and no configured default
    #[error("No server name given and no default_server configured.\n\nPass --server <name> or run:\n  etsm settings set default_server <name>")]
    NoServerSelected,

    /// A pk3 (zip) archive that could not be read
    #[error("Failed to read pk3 archive {path}: {reason}")]
    Pk3Read { path: PathBuf, reason: String },

    /// A bad `--root` / `ETSM_ROOT` value
    #[error("Invalid etsm root: {reason}")]
    InvalidRoot { reason: String },
}

impl Error {
    /// Tag an io::Error with the path it occurred at
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Lock conflicts are the one retryable condition; callers may
    /// distinguish them from hard failures
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Locked { .. })
    }
}
