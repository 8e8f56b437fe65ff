//! `etsm config` - owned config files and the startup set

use anyhow::{Context, Result};
use clap::Subcommand;

use etsm_core::cache::ContentCache;
use etsm_core::catalog::{self, AssetKind, CatalogIndex};
use etsm_core::fetch::HttpFetcher;
use etsm_core::paths::EtsmPaths;
use etsm_core::server::{ActivationEngine, ConfigStore};
use etsm_core::settings::Settings;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Create an owned config, optionally from a catalog template
    Create {
        /// Config name
        name: String,

        /// Template-config name to copy from
        #[clap(long)]
        from: Option<String>,

        /// Overwrite an existing config
        #[clap(long)]
        force: bool,

        #[clap(long)]
        server: Option<String>,

        /// Catalog base URL (overrides the configured sources_url)
        #[clap(long)]
        url: Option<String>,
    },

    /// List the server's owned configs
    List {
        #[clap(long)]
        server: Option<String>,
    },

    /// List config templates published in the catalog
    Templates {
        #[clap(long)]
        url: Option<String>,
    },

    /// List a config's cvar assignments
    Cvars {
        name: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// List a config's exec directives
    Execs {
        name: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Print one cvar's value
    Get {
        name: String,
        key: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Set a cvar (updated in place, appended if absent)
    Set {
        name: String,
        key: String,
        value: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Set a bot option
    SetBot {
        name: String,
        key: String,
        value: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Append an exec directive
    Exec {
        name: String,
        target: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Remove all exec directives naming a target
    RemoveExec {
        name: String,
        target: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Add a config to the startup set
    Activate {
        name: String,

        #[clap(long)]
        server: Option<String>,
    },

    /// Remove a config from the startup set (the file stays)
    Deactivate {
        name: String,

        #[clap(long)]
        server: Option<String>,
    },
}

impl ConfigCommand {
    pub async fn execute(self, paths: &EtsmPaths, settings: &Settings) -> Result<()> {
        match self {
            ConfigCommand::Create {
                name,
                from,
                force,
                server,
                url,
            } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;

                let template_text = match from {
                    Some(from) => {
                        let base = settings.resolve_sources_url(url.as_deref());
                        let fetcher = HttpFetcher::new()?;
                        let index = catalog::fetch_index(&fetcher, &base)
                            .await
                            .with_context(|| {
                                format!("failed to fetch catalog index from {base}")
                            })?;
                        let entry = index.resolve(
                            AssetKind::TemplateConfig,
                            from.trim_end_matches(".cfg"),
                            None,
                        )?;
                        let cache = ContentCache::new(paths.clone());
                        let cached = cache.ensure(entry, &fetcher).await?;
                        Some(cache.read_text(&cached)?)
                    }
                    None => None,
                };

                let file_name = store.create(&name, template_text.as_deref(), force)?;
                println!("Created config '{file_name}' in '{server}'");
                Ok(())
            }

            ConfigCommand::List { server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                for name in store.list()? {
                    println!("{name}");
                }
                Ok(())
            }

            ConfigCommand::Templates { url } => {
                let base = settings.resolve_sources_url(url.as_deref());
                let fetcher = HttpFetcher::new()?;
                let index = catalog::fetch_index(&fetcher, &base)
                    .await
                    .with_context(|| format!("failed to fetch catalog index from {base}"))?;
                let mut entries = index.list(AssetKind::TemplateConfig, None);
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                for entry in entries {
                    println!("{} {}", entry.name, entry.version);
                }
                Ok(())
            }

            ConfigCommand::Cvars { name, server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                for (key, value) in store.cvars(&name)? {
                    println!("{key} = \"{value}\"");
                }
                Ok(())
            }

            ConfigCommand::Execs { name, server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                for target in store.execs(&name)? {
                    println!("{target}");
                }
                Ok(())
            }

            ConfigCommand::Get { name, key, server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                match store.get_cvar(&name, &key)? {
                    Some(value) => println!("{value}"),
                    None => println!("(not set)"),
                }
                Ok(())
            }

            ConfigCommand::Set {
                name,
                key,
                value,
                server,
            } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                store.set_cvar(&name, &key, &value)?;
                println!("Set {key} = \"{value}\" in '{name}'");
                Ok(())
            }

            ConfigCommand::SetBot {
                name,
                key,
                value,
                server,
            } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                store.set_bot(&name, &key, &value)?;
                println!("Set bot {key} {value} in '{name}'");
                Ok(())
            }

            ConfigCommand::Exec {
                name,
                target,
                server,
            } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                store.add_exec(&name, &target)?;
                println!("Added exec '{target}' to '{name}'");
                Ok(())
            }

            ConfigCommand::RemoveExec {
                name,
                target,
                server,
            } => {
                let server = settings.resolve_server(server.as_deref())?;
                let store = ConfigStore::open(paths, &server)?;
                let removed = store.remove_exec(&name, &target)?;
                println!("Removed {removed} exec line(s) naming '{target}' from '{name}'");
                Ok(())
            }

            ConfigCommand::Activate { name, server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let index = CatalogIndex::empty();
                let cache = ContentCache::new(paths.clone());
                let fetcher = HttpFetcher::new()?;
                let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                engine.activate_config(&server, &name)?;
                println!("Activated '{name}' in '{server}'");
                Ok(())
            }

            ConfigCommand::Deactivate { name, server } => {
                let server = settings.resolve_server(server.as_deref())?;
                let index = CatalogIndex::empty();
                let cache = ContentCache::new(paths.clone());
                let fetcher = HttpFetcher::new()?;
                let engine = ActivationEngine::new(&index, &cache, &fetcher, paths);
                if engine.deactivate_config(&server, &name)? {
                    println!("Deactivated '{name}' in '{server}'");
                } else {
                    println!("'{name}' was not active in '{server}'");
                }
                Ok(())
            }
        }
    }
}
