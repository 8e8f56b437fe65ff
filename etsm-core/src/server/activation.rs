//! The activation engine: reconcile declared state onto a server directory
//!
//! Reconciliation is resolve-then-commit. Every dependency the manifest
//! names is resolved against the catalog and ensured in the cache before
//! the first filesystem mutation in the server directory; a resolution or
//! download failure therefore leaves the server untouched. The commit
//! phase then diffs links, configs and the startup set against what is on
//! disk and performs only the mutations needed, so a reconciliation of an
//! already-converged server is a no-op.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{CacheEntry, ContentCache};
use crate::catalog::{AssetKind, CatalogIndex};
use crate::config::{self, build_mapvote_cycle, ConfigFile, MapvoteMap, MAPVOTE_CONFIG};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::paths::EtsmPaths;
use crate::server::lock::{ServerLock, DEFAULT_LOCK_TIMEOUT};
use crate::server::manifest::ServerManifest;
use crate::server::state::{InstalledAsset, ServerRecord};

/// Counters for one reconciliation; all zero means the server was
/// already converged
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub links_created: usize,
    pub links_removed: usize,
    pub configs_written: usize,
    pub startup_added: usize,
    pub startup_removed: usize,
    pub record_written: bool,
}

impl ReconcileReport {
    pub fn mutation_count(&self) -> usize {
        self.links_created
            + self.links_removed
            + self.configs_written
            + self.startup_added
            + self.startup_removed
            + usize::from(self.record_written)
    }

    pub fn is_noop(&self) -> bool {
        self.mutation_count() == 0
    }
}

/// Everything resolved and cached up front, before any mutation
struct ResolvedAssets {
    engine: CacheEntry,
    game_mod: CacheEntry,
    /// Latest version of every published pak, keyed by file name
    paks: BTreeMap<String, CacheEntry>,
    /// Requested maps, keyed by file name
    maps: BTreeMap<String, CacheEntry>,
    /// Parsed templates, keyed by the normalized config name using them
    templates: BTreeMap<String, ConfigFile>,
}

/// Reconciles [`ServerManifest`]s against server directories
pub struct ActivationEngine<'a> {
    catalog: &'a CatalogIndex,
    cache: &'a ContentCache,
    fetcher: &'a dyn Fetcher,
    paths: &'a EtsmPaths,
    lock_timeout: Duration,
}

impl<'a> ActivationEngine<'a> {
    pub fn new(
        catalog: &'a CatalogIndex,
        cache: &'a ContentCache,
        fetcher: &'a dyn Fetcher,
        paths: &'a EtsmPaths,
    ) -> Self {
        Self {
            catalog,
            cache,
            fetcher,
            paths,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Override the bounded wait on the per-server lock
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Create a server directory and converge it to the manifest
    ///
    /// Refuses to touch an existing server unless `force` is set.
    pub async fn create(&self, manifest: &ServerManifest, force: bool) -> Result<ReconcileReport> {
        let server_dir = self.paths.server_dir(&manifest.server_name);
        if server_dir.exists() && !force {
            return Err(Error::ServerExists {
                name: manifest.server_name.clone(),
            });
        }
        self.reconcile(manifest).await
    }

    /// Converge the server directory to the manifest's declared state
    pub async fn reconcile(&self, manifest: &ServerManifest) -> Result<ReconcileReport> {
        manifest.validate()?;

        let _lock = ServerLock::acquire(self.paths, &manifest.server_name, self.lock_timeout)?;

        // Resolution mutates only the cache; the server directory is not
        // created until every dependency has resolved, so a failed
        // create leaves no directory behind
        let assets = self.resolve_assets(manifest).await?;

        let server_dir = self.paths.server_dir(&manifest.server_name);
        let etmain = server_dir.join("etmain");
        let configs_dir = server_dir.join("configs");
        std::fs::create_dir_all(&etmain).map_err(|e| Error::io(&etmain, e))?;
        std::fs::create_dir_all(&configs_dir).map_err(|e| Error::io(&configs_dir, e))?;

        let mut report = ReconcileReport::default();
        self.reconcile_links(&server_dir, manifest, &assets, &mut report)?;
        self.reconcile_configs(&configs_dir, manifest, &assets, &mut report)?;

        let mut startup = Vec::new();
        for name in &manifest.startup_configs {
            startup.push(config::normalize_config_name(name)?);
        }
        if manifest.build_mapvote {
            let mapvote_name = self.write_mapvote(&configs_dir, manifest, &mut report)?;
            if !startup.contains(&mapvote_name) {
                startup.push(mapvote_name);
            }
        }
        self.reconcile_startup(&server_dir, manifest, &startup, &mut report)?;

        let record = ServerRecord {
            ip: manifest.ip.clone(),
            port: manifest.port,
            engine: Some(InstalledAsset {
                name: assets.engine.entry().name.clone(),
                version: assets.engine.entry().version.clone(),
            }),
            game_mod: Some(InstalledAsset {
                name: assets.game_mod.entry().name.clone(),
                version: assets.game_mod.entry().version.clone(),
            }),
            startup_configs: startup,
        };
        report.record_written = record.save_if_changed(&server_dir)?;

        if report.is_noop() {
            info!("Server '{}' already converged", manifest.server_name);
        } else {
            info!(
                "Reconciled server '{}': {} mutation(s)",
                manifest.server_name,
                report.mutation_count()
            );
        }
        Ok(report)
    }

    /// Resolve and cache every dependency, mutating nothing in the
    /// server directory
    async fn resolve_assets(&self, manifest: &ServerManifest) -> Result<ResolvedAssets> {
        let engine_entry = self.catalog.resolve(
            AssetKind::EngineBuild,
            &manifest.engine.name,
            manifest.engine.version.as_deref(),
        )?;
        let engine = self.cache.ensure(engine_entry, self.fetcher).await?;

        let mod_entry = self.catalog.resolve(
            AssetKind::Mod,
            &manifest.game_mod.name,
            manifest.game_mod.version.as_deref(),
        )?;
        let game_mod = self.cache.ensure(mod_entry, self.fetcher).await?;

        // Every published pak at its latest version is part of a
        // functioning install
        let mut paks = BTreeMap::new();
        if let Some(names) = self.catalog.entries.get(&AssetKind::Pak) {
            let mut sorted: Vec<&String> = names.keys().collect();
            sorted.sort();
            for name in sorted {
                let entry = self.catalog.resolve(AssetKind::Pak, name, None)?;
                let cached = self.cache.ensure(entry, self.fetcher).await?;
                paks.insert(format!("{name}.pk3"), cached);
            }
        }

        let mut maps = BTreeMap::new();
        for name in &manifest.maps {
            let name = name.trim_end_matches(".pk3");
            let entry = self.catalog.resolve(AssetKind::Map, name, None)?;
            let cached = self.cache.ensure(entry, self.fetcher).await?;
            maps.insert(format!("{name}.pk3"), cached);
        }

        let mut templates = BTreeMap::new();
        for spec in &manifest.configs {
            let Some(from) = &spec.from else {
                continue;
            };
            let template_name = from.trim_end_matches(".cfg");
            let entry = self
                .catalog
                .resolve(AssetKind::TemplateConfig, template_name, None)
                .map_err(|e| match e {
                    Error::NotFound { .. } | Error::VersionNotFound { .. } => {
                        Error::TemplateNotFound {
                            name: template_name.to_string(),
                        }
                    }
                    other => other,
                })?;
            let cached = self.cache.ensure(entry, self.fetcher).await?;
            let text = self.cache.read_text(&cached)?;
            templates.insert(
                config::normalize_config_name(&spec.name)?,
                ConfigFile::parse(&text),
            );
        }

        Ok(ResolvedAssets {
            engine,
            game_mod,
            paks,
            maps,
            templates,
        })
    }

    /// Engine, mod and pk3 links: create what the manifest wants, remove
    /// cache-targeted links it no longer wants
    fn reconcile_links(
        &self,
        server_dir: &Path,
        manifest: &ServerManifest,
        assets: &ResolvedAssets,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        if ensure_link(&server_dir.join("engine"), assets.engine.path())? {
            report.links_created += 1;
        }

        let mod_link = server_dir.join(&manifest.game_mod.name);
        if ensure_link(&mod_link, assets.game_mod.path())? {
            report.links_created += 1;
        }

        // Links left over from a previous mod selection
        let mod_cache_dir = self.paths.cache_kind_dir(AssetKind::Mod);
        for entry in std::fs::read_dir(server_dir).map_err(|e| Error::io(server_dir, e))? {
            let entry = entry.map_err(|e| Error::io(server_dir, e))?;
            let path = entry.path();
            if !path.is_symlink() || path == mod_link || entry.file_name() == "engine" {
                continue;
            }
            let target = std::fs::read_link(&path).map_err(|e| Error::io(&path, e))?;
            if target.starts_with(&mod_cache_dir) {
                debug!("Removing stale mod link {}", path.display());
                std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                report.links_removed += 1;
            }
        }

        let etmain = server_dir.join("etmain");
        let mut desired: BTreeMap<&String, &CacheEntry> = BTreeMap::new();
        desired.extend(assets.paks.iter());
        desired.extend(assets.maps.iter());

        for (file_name, cached) in &desired {
            if ensure_link(&etmain.join(file_name), cached.path())? {
                report.links_created += 1;
            }
        }

        // pk3 links into the cache that are no longer desired; foreign
        // links and real files stay
        let cache_dir = self.paths.cache_dir();
        for entry in std::fs::read_dir(&etmain).map_err(|e| Error::io(&etmain, e))? {
            let entry = entry.map_err(|e| Error::io(&etmain, e))?;
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.ends_with(".pk3") || !path.is_symlink() || desired.contains_key(&name) {
                continue;
            }
            let target = std::fs::read_link(&path).map_err(|e| Error::io(&path, e))?;
            if target.starts_with(&cache_dir) {
                debug!("Removing stale pk3 link {}", path.display());
                std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                report.links_removed += 1;
            }
        }

        Ok(())
    }

    /// Render each declared config and write it only when bytes differ
    fn reconcile_configs(
        &self,
        configs_dir: &Path,
        manifest: &ServerManifest,
        assets: &ResolvedAssets,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        for spec in &manifest.configs {
            let file_name = config::normalize_config_name(&spec.name)?;
            let template = assets.templates.get(&file_name);
            let rendered = config::render(template, &spec.cvars, &spec.bots)?;
            if write_if_changed(&configs_dir.join(&file_name), &rendered.to_string())? {
                report.configs_written += 1;
            }
        }
        Ok(())
    }

    /// Regenerate the map-rotation config from the manifest's map list
    fn write_mapvote(
        &self,
        configs_dir: &Path,
        manifest: &ServerManifest,
        report: &mut ReconcileReport,
    ) -> Result<String> {
        let maps: Vec<MapvoteMap> = manifest
            .maps
            .iter()
            .map(|name| MapvoteMap::new(name.trim_end_matches(".pk3")))
            .collect();
        let rendered = build_mapvote_cycle(&maps);
        let file_name = config::normalize_config_name(MAPVOTE_CONFIG)?;
        if write_if_changed(&configs_dir.join(&file_name), &rendered.to_string())? {
            report.configs_written += 1;
        }
        Ok(file_name)
    }

    /// Activation links from `etmain/` into `configs/` for the startup
    /// set; removals delete the link only, never the owned file
    fn reconcile_startup(
        &self,
        server_dir: &Path,
        manifest: &ServerManifest,
        startup: &[String],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let etmain = server_dir.join("etmain");
        let configs_dir = server_dir.join("configs");
        let desired: BTreeSet<&String> = startup.iter().collect();

        for name in startup {
            let owned = configs_dir.join(name);
            if !owned.is_file() {
                return Err(Error::ConfigMissing {
                    server: manifest.server_name.clone(),
                    name: name.clone(),
                });
            }
            if ensure_link(&etmain.join(name), &owned)? {
                report.startup_added += 1;
            }
        }

        for entry in std::fs::read_dir(&etmain).map_err(|e| Error::io(&etmain, e))? {
            let entry = entry.map_err(|e| Error::io(&etmain, e))?;
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.ends_with(".cfg") || !path.is_symlink() || desired.contains(&name) {
                continue;
            }
            let target = std::fs::read_link(&path).map_err(|e| Error::io(&path, e))?;
            if target.starts_with(&configs_dir) {
                std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                report.startup_removed += 1;
            }
        }

        Ok(())
    }

    /// Link one map into a server, ensuring it in the cache first
    pub async fn add_map(&self, server_name: &str, map_name: &str) -> Result<bool> {
        let server_dir = self.require_server(server_name)?;
        let _lock = ServerLock::acquire(self.paths, server_name, self.lock_timeout)?;

        let name = map_name.trim_end_matches(".pk3");
        let entry = self.catalog.resolve(AssetKind::Map, name, None)?;
        let cached = self.cache.ensure(entry, self.fetcher).await?;

        let link = server_dir.join("etmain").join(format!("{name}.pk3"));
        ensure_link(&link, cached.path())
    }

    /// Remove a map link; cached bytes stay
    pub fn remove_map(&self, server_name: &str, map_name: &str) -> Result<bool> {
        let server_dir = self.require_server(server_name)?;
        let _lock = ServerLock::acquire(self.paths, server_name, self.lock_timeout)?;

        let name = map_name.trim_end_matches(".pk3");
        let link = server_dir.join("etmain").join(format!("{name}.pk3"));
        if !link.is_symlink() {
            return Ok(false);
        }
        std::fs::remove_file(&link).map_err(|e| Error::io(&link, e))?;
        Ok(true)
    }

    /// Add an owned config to the startup set
    pub fn activate_config(&self, server_name: &str, config_name: &str) -> Result<bool> {
        let server_dir = self.require_server(server_name)?;
        let _lock = ServerLock::acquire(self.paths, server_name, self.lock_timeout)?;

        let file_name = config::normalize_config_name(config_name)?;
        let owned = server_dir.join("configs").join(&file_name);
        if !owned.is_file() {
            return Err(Error::ConfigMissing {
                server: server_name.to_string(),
                name: file_name,
            });
        }

        let created = ensure_link(&server_dir.join("etmain").join(&file_name), &owned)?;

        let mut record = ServerRecord::load(&server_dir)?.unwrap_or_default();
        if !record.startup_configs.contains(&file_name) {
            record.startup_configs.push(file_name);
        }
        record.save_if_changed(&server_dir)?;
        Ok(created)
    }

    /// Remove a config from the startup set; the owned file stays
    pub fn deactivate_config(&self, server_name: &str, config_name: &str) -> Result<bool> {
        let server_dir = self.require_server(server_name)?;
        let _lock = ServerLock::acquire(self.paths, server_name, self.lock_timeout)?;

        let file_name = config::normalize_config_name(config_name)?;
        let link = server_dir.join("etmain").join(&file_name);
        let mut removed = false;
        if link.is_symlink() {
            std::fs::remove_file(&link).map_err(|e| Error::io(&link, e))?;
            removed = true;
        }

        if let Some(mut record) = ServerRecord::load(&server_dir)? {
            record.startup_configs.retain(|n| n != &file_name);
            record.save_if_changed(&server_dir)?;
        }
        Ok(removed)
    }

    /// Install (or switch to) a mod build and relink it
    pub async fn install_mod(
        &self,
        server_name: &str,
        mod_name: &str,
        version: Option<&str>,
    ) -> Result<CacheEntry> {
        let server_dir = self.require_server(server_name)?;
        let _lock = ServerLock::acquire(self.paths, server_name, self.lock_timeout)?;

        let entry = self.catalog.resolve(AssetKind::Mod, mod_name, version)?;
        let cached = self.cache.ensure(entry, self.fetcher).await?;
        ensure_link(&server_dir.join(mod_name), cached.path())?;

        let mut record = ServerRecord::load(&server_dir)?.unwrap_or_default();
        record.game_mod = Some(InstalledAsset {
            name: entry.name.clone(),
            version: entry.version.clone(),
        });
        record.save_if_changed(&server_dir)?;
        Ok(cached)
    }

    /// Install (or switch to) an engine build and relink it
    pub async fn install_engine(
        &self,
        server_name: &str,
        engine_name: &str,
        version: Option<&str>,
    ) -> Result<CacheEntry> {
        let server_dir = self.require_server(server_name)?;
        let _lock = ServerLock::acquire(self.paths, server_name, self.lock_timeout)?;

        let entry = self
            .catalog
            .resolve(AssetKind::EngineBuild, engine_name, version)?;
        let cached = self.cache.ensure(entry, self.fetcher).await?;
        ensure_link(&server_dir.join("engine"), cached.path())?;

        let mut record = ServerRecord::load(&server_dir)?.unwrap_or_default();
        record.engine = Some(InstalledAsset {
            name: entry.name.clone(),
            version: entry.version.clone(),
        });
        record.save_if_changed(&server_dir)?;
        Ok(cached)
    }

    /// Update the recorded bind address
    pub fn set_ip(&self, server_name: &str, ip: &str) -> Result<()> {
        self.update_record(server_name, |record| record.ip = ip.to_string())
    }

    /// Update the recorded port
    pub fn set_port(&self, server_name: &str, port: u16) -> Result<()> {
        self.update_record(server_name, |record| record.port = port)
    }

    fn update_record(&self, server_name: &str, apply: impl FnOnce(&mut ServerRecord)) -> Result<()> {
        let server_dir = self.require_server(server_name)?;
        let _lock = ServerLock::acquire(self.paths, server_name, self.lock_timeout)?;

        let mut record = ServerRecord::load(&server_dir)?.unwrap_or_default();
        apply(&mut record);
        record.save_if_changed(&server_dir)?;
        Ok(())
    }

    /// Command line for launching the dedicated server, in exec order
    pub fn launch_args(&self, server_name: &str) -> Result<Vec<String>> {
        let server_dir = self.require_server(server_name)?;
        let record = ServerRecord::load(&server_dir)?.ok_or_else(|| Error::ServerNotFound {
            name: server_name.to_string(),
        })?;

        let home = server_dir.display();
        let mut args = vec![
            server_dir.join("engine").join("etlded").display().to_string(),
            format!("+set fs_homepath {home}"),
            format!("+set fs_basepath {home}"),
            format!("+set net_ip {}", record.ip),
            format!("+set net_port {}", record.port),
            "+set dedicated 2".to_string(),
        ];
        if let Some(game_mod) = &record.game_mod {
            args.push(format!("+set fs_game {}", game_mod.name));
        }
        for name in &record.startup_configs {
            args.push(format!("+exec {name}"));
        }
        Ok(args)
    }

    fn require_server(&self, server_name: &str) -> Result<PathBuf> {
        let server_dir = self.paths.server_dir(server_name);
        if !server_dir.is_dir() {
            return Err(Error::ServerNotFound {
                name: server_name.to_string(),
            });
        }
        Ok(server_dir)
    }
}

/// Make `link` a symlink to `target`; returns whether anything changed
fn ensure_link(link: &Path, target: &Path) -> Result<bool> {
    match std::fs::read_link(link) {
        Ok(existing) if existing == target => return Ok(false),
        Ok(_) => {
            std::fs::remove_file(link).map_err(|e| Error::io(link, e))?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(_) if link.exists() => {
            // A regular file where a link belongs, inside an
            // engine-managed location
            std::fs::remove_file(link).map_err(|e| Error::io(link, e))?;
        }
        Err(e) => return Err(Error::io(link, e)),
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link).map_err(|e| Error::io(link, e))?;
    #[cfg(windows)]
    {
        if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, link).map_err(|e| Error::io(link, e))?;
        } else {
            std::os::windows::fs::symlink_file(target, link).map_err(|e| Error::io(link, e))?;
        }
    }
    Ok(true)
}

/// Write `content` to `path` only when the bytes differ
fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if path.is_file() {
        let existing = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        if existing == content {
            return Ok(false);
        }
    }
    std::fs::write(path, content).map_err(|e| Error::io(path, e))?;
    Ok(true)
}
