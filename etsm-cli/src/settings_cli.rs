//! `etsm settings` - the operator settings file

use anyhow::{bail, Result};
use clap::Subcommand;

use etsm_core::settings::{Settings, DEFAULT_SOURCES_URL};

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Show the effective settings
    Get,

    /// Set a setting (default_server, sources_url)
    Set {
        /// Setting name
        key: String,

        /// New value
        value: String,
    },

    /// Clear a setting back to its default
    Unset {
        /// Setting name
        key: String,
    },
}

impl SettingsCommand {
    pub async fn execute(self, settings: &Settings) -> Result<()> {
        match self {
            SettingsCommand::Get => {
                println!(
                    "default_server: {}",
                    settings.default_server.as_deref().unwrap_or("(unset)")
                );
                println!(
                    "sources_url: {}",
                    settings
                        .sources_url
                        .as_deref()
                        .unwrap_or(DEFAULT_SOURCES_URL)
                );
                Ok(())
            }

            SettingsCommand::Set { key, value } => {
                let mut updated = settings.clone();
                match key.as_str() {
                    "default_server" => updated.default_server = Some(value.clone()),
                    "sources_url" => updated.sources_url = Some(value.clone()),
                    other => bail!(
                        "unknown setting '{other}' (expected default_server or sources_url)"
                    ),
                }
                updated.save()?;
                println!("Set {key} = {value}");
                Ok(())
            }

            SettingsCommand::Unset { key } => {
                let mut updated = settings.clone();
                match key.as_str() {
                    "default_server" => updated.default_server = None,
                    "sources_url" => updated.sources_url = None,
                    other => bail!(
                        "unknown setting '{other}' (expected default_server or sources_url)"
                    ),
                }
                updated.save()?;
                println!("Unset {key}");
                Ok(())
            }
        }
    }
}
