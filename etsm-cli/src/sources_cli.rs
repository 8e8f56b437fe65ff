//! `etsm sources` - index refresh and bulk cache population

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use etsm_core::cache::{ContentCache, SyncOptions};
use etsm_core::catalog;
use etsm_core::fetch::HttpFetcher;
use etsm_core::paths::EtsmPaths;
use etsm_core::settings::Settings;

#[derive(Subcommand, Debug)]
pub enum SourcesCommand {
    /// Fetch the catalog index and ensure its entries in the cache
    Update {
        /// Catalog base URL (overrides the configured sources_url)
        #[clap(long)]
        url: Option<String>,

        /// Cache every published version instead of only the latest
        #[clap(long)]
        all_versions: bool,

        /// Also cache every published map
        #[clap(long)]
        with_maps: bool,
    },
}

impl SourcesCommand {
    pub async fn execute(self, paths: &EtsmPaths, settings: &Settings) -> Result<()> {
        match self {
            SourcesCommand::Update {
                url,
                all_versions,
                with_maps,
            } => {
                let base = settings.resolve_sources_url(url.as_deref());
                let fetcher = HttpFetcher::new()?;
                let index = catalog::fetch_index(&fetcher, &base)
                    .await
                    .with_context(|| format!("failed to fetch catalog index from {base}"))?;
                println!("Fetched index from {base} ({} entries)", index.entry_count());

                let cache = ContentCache::new(paths.clone());
                let report = cache
                    .sync_sources(
                        &index,
                        &fetcher,
                        SyncOptions {
                            all_versions,
                            with_maps,
                        },
                    )
                    .await;

                println!("Ensured {} cache entries", report.ensured);
                if !report.failures.is_empty() {
                    for (what, err) in &report.failures {
                        eprintln!("Failed: {what}: {err}");
                    }
                    bail!("{} entries failed to sync", report.failures.len());
                }
                Ok(())
            }
        }
    }
}
