//! etsm-core - Asset cache and activation engine for dedicated game servers
//!
//! This crate resolves declared server state (a manifest naming an engine
//! build, a mod, maps and config files) into a concrete, space-efficient
//! on-disk tree, keeps that tree consistent across repeated invocations,
//! and performs idempotent structural edits to config text.
//!
//! # Architecture
//!
//! ```text
//! Remote catalog (index.yaml + assets)
//!     │
//!     ▼
//! CatalogIndex ──► ContentCache ──► ActivationEngine ──► Server Directory
//!   (resolve)      (download,        (links + owned         (consumed by
//!                   verify, share)    configs, startup set)   the supervisor)
//! ```
//!
//! The Content Cache owns asset bytes; server directories hold non-owning
//! symlinks into it. Config files are owned per server and patched in
//! place, losslessly for every line not being changed.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod lockfile;
pub mod paths;
pub mod pk3;
pub mod server;
pub mod settings;

pub use error::{Error, Result};
