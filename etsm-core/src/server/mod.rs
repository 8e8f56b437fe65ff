//! Server instances: declared manifests, observed state, activation
//!
//! A server is one directory under `<root>/servers/<name>`, composed of
//! symlinks into the shared content cache and owned config files. The
//! activation engine reconciles a declared [`ServerManifest`] against the
//! observed directory with the minimum set of filesystem mutations, under
//! an exclusive per-server lock.

mod activation;
mod configs;
mod lock;
mod manifest;
mod state;

pub use activation::{ActivationEngine, ReconcileReport};
pub use configs::ConfigStore;
pub use lock::ServerLock;
pub use manifest::{ConfigSpec, EngineSelector, ModSelector, ServerManifest};
pub use state::{observe, ServerRecord, ServerState};
