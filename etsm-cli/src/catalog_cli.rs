//! `etsm catalog` - browsing published assets

use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use etsm_core::cache::ContentCache;
use etsm_core::catalog::{self, AssetKind, CatalogEntry, CatalogIndex};
use etsm_core::fetch::HttpFetcher;
use etsm_core::paths::EtsmPaths;
use etsm_core::settings::Settings;

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// List published assets, all versions
    List {
        /// Asset kind (engine-build, pak, mod, map, template-config)
        kind: Option<String>,

        /// Filter by asset name
        name: Option<String>,

        /// Catalog base URL (overrides the configured sources_url)
        #[clap(long)]
        url: Option<String>,
    },

    /// Search assets by name substring
    Search {
        /// Search query
        query: String,

        /// Restrict to one asset kind
        #[clap(long)]
        kind: Option<String>,

        /// Catalog base URL (overrides the configured sources_url)
        #[clap(long)]
        url: Option<String>,
    },
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Cached")]
    cached: String,
}

fn parse_kind(s: &str) -> Result<AssetKind> {
    s.parse().map_err(|e: String| anyhow!(e))
}

async fn load_index(settings: &Settings, url: Option<&str>) -> Result<CatalogIndex> {
    let base = settings.resolve_sources_url(url);
    let fetcher = HttpFetcher::new()?;
    catalog::fetch_index(&fetcher, &base)
        .await
        .with_context(|| format!("failed to fetch catalog index from {base}"))
}

fn print_entries(paths: &EtsmPaths, entries: &[&CatalogEntry]) {
    if entries.is_empty() {
        println!("No matching catalog entries.");
        return;
    }

    let cache = ContentCache::new(paths.clone());
    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|entry| EntryRow {
            kind: entry.kind.to_string(),
            name: entry.name.clone(),
            version: entry.version.clone(),
            cached: match cache.is_cached(entry) {
                Ok(true) => "yes".to_string(),
                Ok(false) => "no".to_string(),
                Err(_) => "?".to_string(),
            },
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}

impl CatalogCommand {
    pub async fn execute(self, paths: &EtsmPaths, settings: &Settings) -> Result<()> {
        match self {
            CatalogCommand::List { kind, name, url } => {
                let index = load_index(settings, url.as_deref()).await?;
                let kinds = match kind {
                    Some(k) => vec![parse_kind(&k)?],
                    None => AssetKind::ALL.to_vec(),
                };
                let mut entries = Vec::new();
                for kind in kinds {
                    entries.extend(index.list(kind, name.as_deref()));
                }
                print_entries(paths, &entries);
                Ok(())
            }
            CatalogCommand::Search { query, kind, url } => {
                let index = load_index(settings, url.as_deref()).await?;
                let kind = kind.as_deref().map(parse_kind).transpose()?;
                let entries = index.search(kind, &query);
                print_entries(paths, &entries);
                Ok(())
            }
        }
    }
}
