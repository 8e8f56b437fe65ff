//! Content cache - local, checksum-verified store of downloaded assets
//!
//! The cache is keyed by (kind, name, version) and holds downloaded bytes
//! once, reusable by any number of server instances. The dominant
//! invariant is **no redundant downloads**: an `ensure` for an entry that
//! is already present and verified performs zero network activity.
//!
//! Staging discipline: bytes are fetched into a unique temporary location
//! under `cache/tmp/`, hashed, and only promoted (atomic rename) into the
//! permanent path when the digest matches the catalog's declared
//! checksum. A mismatch discards the staging and leaves any prior cached
//! copy untouched. A half-written file is never visible under the
//! permanent path.
//!
//! Archive kinds (engine builds, mods) are stored extracted, with a
//! `.checksum` marker recording the verified archive digest as the
//! cache-hit witness. Single-file kinds (paks, maps, template configs)
//! are stored verbatim; their witness is re-hashing the file.

use std::io::Cursor;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::catalog::{AssetKind, CatalogEntry, CatalogIndex};
use crate::digest;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::lockfile::LockFile;
use crate::paths::EtsmPaths;

/// Marker file inside extracted archive entries
const CHECKSUM_MARKER: &str = ".checksum";

/// Retry budget for transient fetch failures
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// A verified, locally stored asset
///
/// Only constructed by [`ContentCache`] after checksum verification:
/// holding a `CacheEntry` is proof the bytes on disk matched the
/// catalog's declared checksum when it was issued.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    entry: CatalogEntry,
    path: PathBuf,
}

impl CacheEntry {
    pub fn entry(&self) -> &CatalogEntry {
        &self.entry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Options for bulk cache population
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Ensure every published version instead of only the latest
    pub all_versions: bool,
    /// Also ensure every map entry
    pub with_maps: bool,
}

/// Outcome of a bulk sync; per-entry failures do not abort the sweep
#[derive(Debug, Default)]
pub struct SyncReport {
    pub ensured: usize,
    pub failures: Vec<(String, Error)>,
}

/// Local content-addressed store keyed by (kind, name, version)
pub struct ContentCache {
    paths: EtsmPaths,
}

impl ContentCache {
    pub fn new(paths: EtsmPaths) -> Self {
        Self { paths }
    }

    /// Permanent path for an entry: a directory for archive kinds, a
    /// single file (with the kind's extension) otherwise
    pub fn entry_path(&self, entry: &CatalogEntry) -> PathBuf {
        let kind_dir = self.paths.cache_kind_dir(entry.kind);
        match entry.kind.file_extension() {
            Some(ext) => kind_dir.join(format!("{}.{}", entry.slug(), ext)),
            None => kind_dir.join(entry.slug()),
        }
    }

    /// Whether the entry is present and still matches its declared checksum
    pub fn is_cached(&self, entry: &CatalogEntry) -> Result<bool> {
        let path = self.entry_path(entry);
        if entry.kind.is_archive() {
            let marker = path.join(CHECKSUM_MARKER);
            if !marker.is_file() {
                return Ok(false);
            }
            let recorded =
                std::fs::read_to_string(&marker).map_err(|e| Error::io(&marker, e))?;
            Ok(recorded.trim() == entry.checksum)
        } else {
            if !path.is_file() {
                return Ok(false);
            }
            Ok(digest::checksum_file(&path)? == entry.checksum)
        }
    }

    /// Ensure an entry is present and verified, downloading it if needed
    ///
    /// Cache hit: returns without any network activity. Miss: fetches
    /// (with capped exponential backoff on transient failures), verifies,
    /// and promotes atomically. Per-entry exclusivity is an advisory file
    /// lock; a waiter re-checks the hit condition after acquiring so the
    /// second of two concurrent invocations observes the first's work.
    pub async fn ensure(&self, entry: &CatalogEntry, fetcher: &dyn Fetcher) -> Result<CacheEntry> {
        let path = self.entry_path(entry);

        if self.is_cached(entry)? {
            debug!("Cache hit: {} {} {}", entry.kind, entry.name, entry.version);
            return Ok(CacheEntry {
                entry: entry.clone(),
                path,
            });
        }

        let lock_path = self
            .paths
            .cache_locks_dir()
            .join(format!("{}-{}.lock", entry.kind, entry.slug()));
        let _lock = LockFile::acquire_blocking(&lock_path)?;

        // Another invocation may have promoted while we waited
        if self.is_cached(entry)? {
            debug!(
                "Cache hit after lock wait: {} {} {}",
                entry.kind, entry.name, entry.version
            );
            return Ok(CacheEntry {
                entry: entry.clone(),
                path,
            });
        }

        info!(
            "Downloading {} '{}' version {} from {}",
            entry.kind, entry.name, entry.version, entry.url
        );
        let bytes = self.fetch_with_retry(fetcher, &entry.url).await?;

        let actual = digest::checksum(&bytes);
        if actual != entry.checksum {
            return Err(Error::Integrity {
                kind: entry.kind,
                name: entry.name.clone(),
                version: entry.version.clone(),
                expected: entry.checksum.clone(),
                actual,
            });
        }

        if entry.kind.is_archive() {
            self.promote_archive(entry, &bytes, &path)?;
        } else {
            self.promote_file(&bytes, &path)?;
        }

        info!(
            "Cached {} '{}' version {} at {}",
            entry.kind,
            entry.name,
            entry.version,
            path.display()
        );
        Ok(CacheEntry {
            entry: entry.clone(),
            path,
        })
    }

    /// Bulk-populate the cache from the index
    ///
    /// Ensures the latest (or all) version of every engine build, mod,
    /// pak and config template, and optionally every map. Failures are
    /// collected per entry; one bad entry does not abort the sweep. Bulk
    /// modes populate the cache only and never alter resolution
    /// precedence: an explicit manifest version stays authoritative.
    pub async fn sync_sources(
        &self,
        index: &CatalogIndex,
        fetcher: &dyn Fetcher,
        opts: SyncOptions,
    ) -> SyncReport {
        let mut kinds = vec![
            AssetKind::EngineBuild,
            AssetKind::Mod,
            AssetKind::Pak,
            AssetKind::TemplateConfig,
        ];
        if opts.with_maps {
            kinds.push(AssetKind::Map);
        }

        let mut report = SyncReport::default();
        for kind in kinds {
            let Some(names) = index.entries.get(&kind) else {
                continue;
            };
            for versions in names.values() {
                let wanted: Vec<&CatalogEntry> = if opts.all_versions {
                    versions.iter().collect()
                } else {
                    versions.first().into_iter().collect()
                };
                for entry in wanted {
                    match self.ensure(entry, fetcher).await {
                        Ok(_) => report.ensured += 1,
                        Err(e) => {
                            let what =
                                format!("{} {} {}", entry.kind, entry.name, entry.version);
                            warn!("Failed to sync {}: {}", what, e);
                            report.failures.push((what, e));
                        }
                    }
                }
            }
        }
        report
    }

    /// Ensure the named maps at their latest published version
    pub async fn download_maps(
        &self,
        index: &CatalogIndex,
        fetcher: &dyn Fetcher,
        names: &[String],
    ) -> Result<Vec<CacheEntry>> {
        let mut cached = Vec::with_capacity(names.len());
        for name in names {
            let name = name.trim_end_matches(".pk3");
            let entry = index.resolve(AssetKind::Map, name, None)?;
            cached.push(self.ensure(entry, fetcher).await?);
        }
        Ok(cached)
    }

    /// Read a cached single-file entry as text (template configs)
    pub fn read_text(&self, cached: &CacheEntry) -> Result<String> {
        std::fs::read_to_string(cached.path()).map_err(|e| Error::io(cached.path(), e))
    }

    async fn fetch_with_retry(&self, fetcher: &dyn Fetcher, url: &str) -> Result<Vec<u8>> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match fetcher.fetch(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(failure) if failure.is_transient() && attempts <= MAX_RETRIES => {
                    warn!(
                        "Fetch attempt {} of {} failed ({}), retrying in {:?}",
                        attempts,
                        MAX_RETRIES + 1,
                        failure.reason(),
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(failure) => {
                    return Err(Error::Fetch {
                        url: url.to_string(),
                        attempts,
                        reason: failure.reason().to_string(),
                    })
                }
            }
        }
    }

    /// Stage a verified single file and rename it into place
    fn promote_file(&self, bytes: &[u8], dest: &Path) -> Result<()> {
        let tmp_dir = self.paths.cache_tmp_dir();
        std::fs::create_dir_all(&tmp_dir).map_err(|e| Error::io(&tmp_dir, e))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let mut staged =
            tempfile::NamedTempFile::new_in(&tmp_dir).map_err(|e| Error::io(&tmp_dir, e))?;
        staged.write_all(bytes).map_err(|e| Error::io(staged.path(), e))?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| Error::io(staged.path(), e))?;
        staged
            .persist(dest)
            .map_err(|e| Error::io(dest, e.error))?;
        Ok(())
    }

    /// Extract a verified tar.gz into staging, stamp the checksum marker,
    /// and rename the tree into place
    fn promote_archive(&self, entry: &CatalogEntry, bytes: &[u8], dest: &Path) -> Result<()> {
        let tmp_dir = self.paths.cache_tmp_dir();
        std::fs::create_dir_all(&tmp_dir).map_err(|e| Error::io(&tmp_dir, e))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let staging = tempfile::tempdir_in(&tmp_dir).map_err(|e| Error::io(&tmp_dir, e))?;
        let decoder = flate2::read::GzDecoder::new(Cursor::new(bytes));
        let mut archive = tar::Archive::new(decoder);
        archive
            .unpack(staging.path())
            .map_err(|e| Error::io(staging.path(), e))?;

        // Archives typically carry one top-level directory (for example
        // etlegacy-v2.82.0-i386); promote that tree, not the wrapper.
        let staged_root = single_subdir(staging.path())?.unwrap_or_else(|| staging.path().to_path_buf());

        let marker = staged_root.join(CHECKSUM_MARKER);
        std::fs::write(&marker, format!("{}\n", entry.checksum))
            .map_err(|e| Error::io(&marker, e))?;

        if dest.exists() {
            // A stale (checksum-mismatched) prior extraction; safe to
            // replace while the per-entry lock is held
            std::fs::remove_dir_all(dest).map_err(|e| Error::io(dest, e))?;
        }
        std::fs::rename(&staged_root, dest).map_err(|e| Error::io(dest, e))?;
        Ok(())
    }
}

/// If `dir` contains exactly one entry and it is a directory, return it
fn single_subdir(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        entries.push(entry.path());
    }
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(Some(only.clone())),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: AssetKind, name: &str, version: &str) -> CatalogEntry {
        CatalogEntry {
            kind,
            name: name.to_string(),
            version: version.to_string(),
            checksum: digest::checksum(b"bytes"),
            url: format!("http://example.net/{name}"),
        }
    }

    #[test]
    fn test_entry_paths_by_kind() {
        let paths = EtsmPaths::at_root("/var/lib/etsm");
        let cache = ContentCache::new(paths);

        assert_eq!(
            cache.entry_path(&entry(AssetKind::Map, "adlernest", "b1")),
            Path::new("/var/lib/etsm/cache/map/adlernest-b1.pk3")
        );
        assert_eq!(
            cache.entry_path(&entry(AssetKind::TemplateConfig, "etl_server", "1.0.0")),
            Path::new("/var/lib/etsm/cache/template-config/etl_server-1.0.0.cfg")
        );
        assert_eq!(
            cache.entry_path(&entry(AssetKind::EngineBuild, "etl", "2.82.0")),
            Path::new("/var/lib/etsm/cache/engine-build/etl-2.82.0")
        );
    }

    #[test]
    fn test_file_hit_requires_matching_bytes() {
        let root = tempfile::TempDir::new().unwrap();
        let cache = ContentCache::new(EtsmPaths::at_root(root.path()));

        let mut map = entry(AssetKind::Map, "beach", "1");
        map.checksum = digest::checksum(b"map bytes");

        assert!(!cache.is_cached(&map).unwrap());

        let path = cache.entry_path(&map);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"map bytes").unwrap();
        assert!(cache.is_cached(&map).unwrap());

        // Corrupted on disk: no longer a hit
        std::fs::write(&path, b"other bytes").unwrap();
        assert!(!cache.is_cached(&map).unwrap());
    }

    #[test]
    fn test_archive_hit_uses_marker() {
        let root = tempfile::TempDir::new().unwrap();
        let cache = ContentCache::new(EtsmPaths::at_root(root.path()));

        let build = entry(AssetKind::EngineBuild, "etl", "2.82.0");
        let path = cache.entry_path(&build);
        std::fs::create_dir_all(&path).unwrap();
        assert!(!cache.is_cached(&build).unwrap());

        std::fs::write(path.join(CHECKSUM_MARKER), format!("{}\n", build.checksum)).unwrap();
        assert!(cache.is_cached(&build).unwrap());

        std::fs::write(path.join(CHECKSUM_MARKER), "sha256:stale\n").unwrap();
        assert!(!cache.is_cached(&build).unwrap());
    }
}
