//! Catalog of remotely published assets
//!
//! The catalog is an in-memory, read-only view of the remote asset
//! listing: engine builds, data paks, mods, maps and template configs,
//! each carrying name, version, checksum and fetch location. It is
//! refreshed by fetching `index.yaml` from the sources URL and treated
//! as an immutable snapshot for the duration of one invocation.

mod index;

pub use index::{fetch_index, AssetKind, CatalogEntry, CatalogIndex};
