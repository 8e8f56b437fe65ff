//! Catalog index parsing and version resolution
//!
//! The index.yaml file lists every published asset with its versions,
//! checksums and download URLs:
//!
//! ```yaml
//! apiVersion: etsm/v1
//! generated: "2024-01-01T00:00:00Z"
//! entries:
//!   engine-build:
//!     etl:
//!       - name: etl
//!         version: "2.82.0"
//!         checksum: "sha256:..."
//!         url: builds/etl-2.82.0.tar.gz
//! ```
//!
//! Version lists are sorted newest-first at load time: semantic-version
//! comparison where both sides parse, lexicographic otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::fetch::Fetcher;

/// The five kinds of fetchable assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    EngineBuild,
    Pak,
    Mod,
    Map,
    TemplateConfig,
}

impl AssetKind {
    pub const ALL: [AssetKind; 5] = [
        AssetKind::EngineBuild,
        AssetKind::Pak,
        AssetKind::Mod,
        AssetKind::Map,
        AssetKind::TemplateConfig,
    ];

    /// Archive kinds are stored extracted in the cache; the rest are
    /// single files stored verbatim
    pub fn is_archive(&self) -> bool {
        matches!(self, AssetKind::EngineBuild | AssetKind::Mod)
    }

    /// On-disk extension for single-file kinds
    pub fn file_extension(&self) -> Option<&'static str> {
        match self {
            AssetKind::Pak | AssetKind::Map => Some("pk3"),
            AssetKind::TemplateConfig => Some("cfg"),
            AssetKind::EngineBuild | AssetKind::Mod => None,
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetKind::EngineBuild => "engine-build",
            AssetKind::Pak => "pak",
            AssetKind::Mod => "mod",
            AssetKind::Map => "map",
            AssetKind::TemplateConfig => "template-config",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AssetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "engine-build" => Ok(AssetKind::EngineBuild),
            "pak" => Ok(AssetKind::Pak),
            "mod" => Ok(AssetKind::Mod),
            "map" => Ok(AssetKind::Map),
            "template-config" => Ok(AssetKind::TemplateConfig),
            other => Err(format!(
                "unknown asset kind '{other}' (expected one of: engine-build, pak, mod, map, template-config)"
            )),
        }
    }
}

/// One published asset at one version
///
/// Immutable once published; uniquely identified by (kind, name, version).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Populated from the entry's position in the index at load time
    #[serde(skip, default = "default_kind")]
    pub kind: AssetKind,

    pub name: String,

    pub version: String,

    /// Declared content digest, `sha256:<hex>`
    pub checksum: String,

    /// Absolute URL, or relative to the catalog base (absolutized at load)
    pub url: String,
}

fn default_kind() -> AssetKind {
    AssetKind::Pak
}

impl CatalogEntry {
    /// Cache path stem for this entry: `<name>-<version>`
    pub fn slug(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// A catalog index (index.yaml), sorted newest-first per (kind, name)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogIndex {
    pub api_version: String,

    pub generated: DateTime<Utc>,

    /// kind -> name -> versions (newest first after load)
    pub entries: HashMap<AssetKind, HashMap<String, Vec<CatalogEntry>>>,
}

impl CatalogIndex {
    /// An index with no entries, for operations that never resolve assets
    pub fn empty() -> Self {
        Self {
            api_version: "etsm/v1".to_string(),
            generated: Utc::now(),
            entries: HashMap::new(),
        }
    }

    /// Parse an index from YAML and normalize it: tag each entry with its
    /// kind, sort versions newest-first, drop duplicate versions
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut index: CatalogIndex =
            serde_yaml_ng::from_str(content).map_err(|source| Error::YamlParse {
                what: "catalog index".to_string(),
                source,
            })?;

        for (kind, names) in index.entries.iter_mut() {
            for versions in names.values_mut() {
                for entry in versions.iter_mut() {
                    entry.kind = *kind;
                }
                versions.sort_by(|a, b| compare_versions_desc(&a.version, &b.version));
                versions.dedup_by(|a, b| a.version == b.version);
            }
        }

        Ok(index)
    }

    /// Rewrite relative entry URLs to absolute ones under `base_url`
    pub fn absolutize_urls(&mut self, base_url: &str) {
        let base = base_url.trim_end_matches('/');
        for names in self.entries.values_mut() {
            for versions in names.values_mut() {
                for entry in versions.iter_mut() {
                    if !entry.url.contains("://") {
                        entry.url = format!("{}/{}", base, entry.url.trim_start_matches('/'));
                    }
                }
            }
        }
    }

    /// All versions of a (kind, name), newest first
    pub fn versions(&self, kind: AssetKind, name: &str) -> Option<&[CatalogEntry]> {
        self.entries
            .get(&kind)
            .and_then(|names| names.get(name))
            .map(|v| v.as_slice())
    }

    /// Latest version of a (kind, name)
    pub fn latest(&self, kind: AssetKind, name: &str) -> Option<&CatalogEntry> {
        self.versions(kind, name).and_then(|v| v.first())
    }

    /// Resolve a (kind, name, version-or-latest) to a concrete entry
    ///
    /// An explicit version must match exactly or resolution fails with
    /// `VersionNotFound`; an omitted version resolves to the newest.
    pub fn resolve(
        &self,
        kind: AssetKind,
        name: &str,
        version: Option<&str>,
    ) -> Result<&CatalogEntry> {
        let versions = self.versions(kind, name).ok_or_else(|| Error::NotFound {
            kind,
            name: name.to_string(),
        })?;

        match version {
            None => versions.first().ok_or_else(|| Error::NotFound {
                kind,
                name: name.to_string(),
            }),
            Some(v) => versions
                .iter()
                .find(|e| e.version == v)
                .ok_or_else(|| Error::VersionNotFound {
                    kind,
                    name: name.to_string(),
                    version: v.to_string(),
                }),
        }
    }

    /// List entries of a kind, all versions, optionally filtered by name
    pub fn list(&self, kind: AssetKind, name: Option<&str>) -> Vec<&CatalogEntry> {
        let Some(names) = self.entries.get(&kind) else {
            return Vec::new();
        };
        let mut result: Vec<&CatalogEntry> = match name {
            Some(n) => names.get(n).map(|v| v.iter().collect()).unwrap_or_default(),
            None => names.values().flatten().collect(),
        };
        result.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| compare_versions_desc(&a.version, &b.version))
        });
        result
    }

    /// Search by name substring (case-insensitive), latest version of
    /// each match, across all kinds unless one is given
    pub fn search(&self, kind: Option<AssetKind>, query: &str) -> Vec<&CatalogEntry> {
        let query_lower = query.to_lowercase();
        let mut result: Vec<&CatalogEntry> = self
            .entries
            .iter()
            .filter(|(k, _)| kind.map_or(true, |want| **k == want))
            .flat_map(|(_, names)| names.values())
            .filter_map(|versions| versions.first())
            .filter(|e| e.name.to_lowercase().contains(&query_lower))
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    /// Total number of entries across all kinds and versions
    pub fn entry_count(&self) -> usize {
        self.entries
            .values()
            .flat_map(|names| names.values())
            .map(|v| v.len())
            .sum()
    }
}

/// Newest-first ordering: semver where both parse, else lexicographic
fn compare_versions_desc(a: &str, b: &str) -> std::cmp::Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => vb.cmp(&va),
        _ => b.cmp(a),
    }
}

/// Download `<base>/index.yaml` and load it as a normalized index
pub async fn fetch_index(fetcher: &dyn Fetcher, base_url: &str) -> Result<CatalogIndex> {
    let base = base_url.trim_end_matches('/');
    let url = format!("{base}/index.yaml");
    tracing::debug!("Fetching catalog index from {}", url);

    let bytes = fetcher.fetch(&url).await.map_err(|e| Error::Fetch {
        url: url.clone(),
        attempts: 1,
        reason: e.reason().to_string(),
    })?;

    let content = String::from_utf8_lossy(&bytes);
    let mut index = CatalogIndex::from_yaml(&content)?;
    index.absolutize_urls(base);

    tracing::info!(
        "Loaded catalog index: {} entries, generated {}",
        index.entry_count(),
        index.generated
    );
    Ok(index)
}
