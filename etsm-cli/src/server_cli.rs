//! `etsm server` - server instance lifecycle
//!
//! Every verb resolves the target server name (explicit flag or the
//! configured default) and calls into the activation engine; nothing here
//! touches the filesystem directly.

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

use etsm_core::cache::ContentCache;
use etsm_core::catalog::{self, AssetKind, CatalogIndex};
use etsm_core::fetch::HttpFetcher;
use etsm_core::paths::EtsmPaths;
use etsm_core::pk3;
use etsm_core::server::{observe, ActivationEngine, ReconcileReport, ServerManifest};
use etsm_core::settings::Settings;

#[derive(Subcommand, Debug)]
pub enum ServerCommand {
    /// Create a server from defaults or from a manifest file
    Create {
        /// Server name (when no manifest file is given)
        name: Option<String>,

        /// Manifest file describing the desired state
        #[clap(long)]
        manifest: Option<PathBuf>,

        /// Reconcile even if the server already exists
        #[clap(long)]
        force: bool,

        /// Catalog base URL (overrides the configured sources_url)
        #[clap(long)]
        url: Option<String>,
    },

    /// Reconcile an existing server to a manifest file
    Apply {
        /// Manifest file describing the desired state
        manifest: PathBuf,

        /// Catalog base URL (overrides the configured sources_url)
        #[clap(long)]
        url: Option<String>,
    },

    /// List server directories
    List,

    /// Show a server's observed state
    Status {
        #[clap(long)]
        server: Option<String>,

        /// Output the state record as JSON
        #[clap(long)]
        json: bool,
    },

    /// Print the launch command for the external supervisor
    RunArgs {
        #[clap(long)]
        server: Option<String>,
    },

    /// Update the recorded bind address
    SetIp {
        ip: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Update the recorded port
    SetPort {
        port: u16,

        #[clap(long)]
        server: Option<String>,
    },

    /// Manage the server's mod
    Mod {
        #[clap(subcommand)]
        command: ModCommand,
    },

    /// Manage the server's engine build
    Engine {
        #[clap(subcommand)]
        command: EngineCommand,
    },

    /// Manage the server's maps
    Map {
        #[clap(subcommand)]
        command: MapCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ModCommand {
    /// Download (if needed) and link a mod build
    Install {
        /// Mod name
        name: String,

        /// Specific version (latest when omitted)
        #[clap(long)]
        version: Option<String>,

        #[clap(long)]
        server: Option<String>,

        #[clap(long)]
        url: Option<String>,
    },

    /// List the server's mod links
    List {
        #[clap(long)]
        server: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum EngineCommand {
    /// Download (if needed) and link an engine build
    Set {
        /// Engine build name
        #[clap(default_value = "etl")]
        name: String,

        /// Specific version (latest when omitted)
        #[clap(long)]
        version: Option<String>,

        #[clap(long)]
        server: Option<String>,

        #[clap(long)]
        url: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MapCommand {
    /// List maps published in the catalog
    Available {
        #[clap(long)]
        url: Option<String>,
    },

    /// List maps linked into the server
    List {
        #[clap(long)]
        server: Option<String>,
    },

    /// Download (if needed) and link a map
    Add {
        /// Map name
        name: String,

        #[clap(long)]
        server: Option<String>,

        #[clap(long)]
        url: Option<String>,
    },

    /// Unlink a map (cached bytes stay)
    Remove {
        /// Map name
        name: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Download maps into the cache without linking them
    Download {
        /// Map names
        #[clap(required = true)]
        names: Vec<String>,

        #[clap(long)]
        url: Option<String>,
    },
}

async fn load_index(settings: &Settings, url: Option<&str>) -> Result<CatalogIndex> {
    let base = settings.resolve_sources_url(url);
    let fetcher = HttpFetcher::new()?;
    catalog::fetch_index(&fetcher, &base)
        .await
        .with_context(|| format!("failed to fetch catalog index from {base}"))
}

fn print_report(server_name: &str, report: &ReconcileReport) {
    if report.is_noop() {
        println!("Server '{server_name}' is already up to date.");
    } else {
        println!(
            "Server '{server_name}' reconciled: {} links created, {} removed, {} configs written, startup +{}/-{}",
            report.links_created,
            report.links_removed,
            report.configs_written,
            report.startup_added,
            report.startup_removed,
        );
    }
}

#[derive(Tabled)]
struct LinkRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Target")]
    target: String,
}

#[derive(Tabled)]
struct MapRow {
    #[tabled(rename = "File")]
    name: String,
    #[tabled(rename = "Maps")]
    maps: String,
}

impl ServerCommand {
    pub async fn execute(self, paths: &EtsmPaths, settings: &Settings) -> Result<()> {
        let cache = ContentCache::new(paths.clone());
        let fetcher = HttpFetcher::new()?;

        match self {
            ServerCommand::Create {
                name,
                manifest,
                force,
                url,
            } => {
                let manifest = match (manifest, name) {
                    (Some(path), _) => ServerManifest::from_file(&path)?,
                    (None, Some(name)) => ServerManifest::with_defaults(&name),
                    (None, None) => bail!("pass a server name or --manifest <file>"),
                };
                let url = url.as_deref().or(manifest.sources_url.as_deref());
                let index = load_index(settings, url).await?;
                let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                let report = engine.create(&manifest, force).await?;
                print_report(&manifest.server_name, &report);
                Ok(())
            }

            ServerCommand::Apply { manifest, url } => {
                let manifest = ServerManifest::from_file(&manifest)?;
                let url = url.as_deref().or(manifest.sources_url.as_deref());
                let index = load_index(settings, url).await?;
                let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                let report = engine.reconcile(&manifest).await?;
                print_report(&manifest.server_name, &report);
                Ok(())
            }

            ServerCommand::List => {
                let servers = paths.list_servers()?;
                if servers.is_empty() {
                    println!("No servers. Run 'etsm server create <name>' to create one.");
                } else {
                    for name in servers {
                        println!("{name}");
                    }
                }
                Ok(())
            }

            ServerCommand::Status { server, json } => {
                let server = settings.resolve_server(server.as_deref())?;
                let state = observe(&paths.server_dir(&server))?;

                if json {
                    let record = state.record.unwrap_or_default();
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    return Ok(());
                }

                println!("Server: {server}");
                if let Some(record) = &state.record {
                    println!("Address: {}:{}", record.ip, record.port);
                    if let Some(engine) = &record.engine {
                        println!("Engine: {} {}", engine.name, engine.version);
                    }
                    if let Some(game_mod) = &record.game_mod {
                        println!("Mod: {} {}", game_mod.name, game_mod.version);
                    }
                    println!("Startup configs: {}", record.startup_configs.join(", "));
                }
                println!("Linked pk3s: {}", state.pk3_links.len());
                println!("Owned configs: {}", state.owned_configs.join(", "));
                Ok(())
            }

            ServerCommand::RunArgs { server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let index = CatalogIndex::empty();
                let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                println!("{}", engine.launch_args(&server)?.join(" "));
                Ok(())
            }

            ServerCommand::SetIp { ip, server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let index = CatalogIndex::empty();
                let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                engine.set_ip(&server, &ip)?;
                println!("Set ip of '{server}' to {ip}");
                Ok(())
            }

            ServerCommand::SetPort { port, server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let index = CatalogIndex::empty();
                let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                engine.set_port(&server, port)?;
                println!("Set port of '{server}' to {port}");
                Ok(())
            }

            ServerCommand::Mod { command } => match command {
                ModCommand::Install {
                    name,
                    version,
                    server,
                    url,
                } => {
                    let server = settings.resolve_server(server.as_deref())?;
                    let index = load_index(settings, url.as_deref()).await?;
                    let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                    let cached = engine
                        .install_mod(&server, &name, version.as_deref())
                        .await?;
                    println!(
                        "Installed mod {} {} into '{server}'",
                        cached.entry().name,
                        cached.entry().version
                    );
                    Ok(())
                }
                ModCommand::List { server } => {
                    let server = settings.resolve_server(server.as_deref())?;
                    let state = observe(&paths.server_dir(&server))?;
                    let rows: Vec<LinkRow> = state
                        .mod_links
                        .iter()
                        .map(|(name, target)| LinkRow {
                            name: name.clone(),
                            target: target.display().to_string(),
                        })
                        .collect();
                    if rows.is_empty() {
                        println!("No mods linked into '{server}'.");
                    } else {
                        print_links(&rows);
                    }
                    Ok(())
                }
            },

            ServerCommand::Engine { command } => match command {
                EngineCommand::Set {
                    name,
                    version,
                    server,
                    url,
                } => {
                    let server = settings.resolve_server(server.as_deref())?;
                    let index = load_index(settings, url.as_deref()).await?;
                    let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                    let cached = engine
                        .install_engine(&server, &name, version.as_deref())
                        .await?;
                    println!(
                        "Engine of '{server}' set to {} {}",
                        cached.entry().name,
                        cached.entry().version
                    );
                    Ok(())
                }
            },

            ServerCommand::Map { command } => match command {
                MapCommand::Available { url } => {
                    let index = load_index(settings, url.as_deref()).await?;
                    let mut entries = index.list(AssetKind::Map, None);
                    entries.sort_by(|a, b| a.name.cmp(&b.name));
                    for entry in entries {
                        println!("{} {}", entry.name, entry.version);
                    }
                    Ok(())
                }
                MapCommand::List { server } => {
                    let server = settings.resolve_server(server.as_deref())?;
                    let state = observe(&paths.server_dir(&server))?;
                    let map_dir = paths.cache_kind_dir(AssetKind::Map);
                    let rows: Vec<MapRow> = state
                        .pk3_links
                        .iter()
                        .filter(|(_, target)| target.starts_with(&map_dir))
                        .map(|(name, target)| MapRow {
                            name: name.clone(),
                            // bsp entries inside the pk3 are what the
                            // server can actually rotate to
                            maps: match pk3::bsp_names(target) {
                                Ok(bsps) => bsps.join(", "),
                                Err(_) => "?".to_string(),
                            },
                        })
                        .collect();
                    if rows.is_empty() {
                        println!("No maps linked into '{server}'.");
                    } else {
                        let table = Table::new(&rows)
                            .with(Style::rounded())
                            .with(Modify::new(Rows::first()).with(Alignment::center()))
                            .to_string();
                        println!("{table}");
                    }
                    Ok(())
                }
                MapCommand::Add { name, server, url } => {
                    let server = settings.resolve_server(server.as_deref())?;
                    let index = load_index(settings, url.as_deref()).await?;
                    let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                    if engine.add_map(&server, &name).await? {
                        println!("Added map '{name}' to '{server}'");
                    } else {
                        println!("Map '{name}' is already linked into '{server}'");
                    }
                    Ok(())
                }
                MapCommand::Remove { name, server } => {
                    let server = settings.resolve_server(server.as_deref())?;
                    let index = CatalogIndex::empty();
                    let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                    if engine.remove_map(&server, &name)? {
                        println!("Removed map '{name}' from '{server}'");
                    } else {
                        println!("Map '{name}' is not linked into '{server}'");
                    }
                    Ok(())
                }
                MapCommand::Download { names, url } => {
                    let index = load_index(settings, url.as_deref()).await?;
                    let cached = cache.download_maps(&index, &fetcher, &names).await?;
                    for entry in cached {
                        println!(
                            "Cached map {} {}",
                            entry.entry().name,
                            entry.entry().version
                        );
                    }
                    Ok(())
                }
            },
        }
    }
}

fn print_links(rows: &[LinkRow]) {
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
}
