//! Config patch engine
//!
//! Structural, idempotent edits to line-oriented game config text. Each
//! line is tagged as a recognized cvar assignment (`set key "value"`), a
//! recognized directive (`exec name`, `bot key value`) or an opaque
//! pass-through line; anything not explicitly targeted round-trips
//! byte-for-byte.

mod file;
mod mapvote;

pub use file::ConfigFile;
pub use mapvote::{build_mapvote_cycle, MapvoteMap, DEFAULT_GAMETYPE, MAPVOTE_CONFIG};

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

static CONFIG_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._]+$").unwrap());
static CVAR_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Validate a config name and give it its `.cfg` extension
pub fn normalize_config_name(name: &str) -> Result<String> {
    if !CONFIG_NAME_RE.is_match(name) {
        return Err(Error::CvarFormat {
            reason: format!("invalid config name '{name}' (allowed: letters, digits, '.', '_')"),
        });
    }
    if name.ends_with(".cfg") {
        Ok(name.to_string())
    } else {
        Ok(format!("{name}.cfg"))
    }
}

pub(crate) fn validate_cvar_key(key: &str) -> Result<()> {
    if !CVAR_KEY_RE.is_match(key) {
        return Err(Error::CvarFormat {
            reason: format!("invalid cvar key '{key}' (allowed: letters, digits, '_')"),
        });
    }
    Ok(())
}

pub(crate) fn validate_cvar_value(key: &str, value: &str) -> Result<()> {
    if value.contains('"') || value.contains('\n') {
        return Err(Error::CvarFormat {
            reason: format!("value for cvar '{key}' must not contain '\"' or newlines"),
        });
    }
    Ok(())
}

/// Render a config: a full copy of the template's lines (or an empty
/// file), then upsert each cvar and bot option
///
/// Deterministic for a given input, so reconciliation can compare the
/// rendered bytes against disk and skip needless writes.
pub fn render(
    template: Option<&ConfigFile>,
    cvars: &BTreeMap<String, String>,
    bots: &BTreeMap<String, String>,
) -> Result<ConfigFile> {
    let mut file = match template {
        Some(t) => t.clone(),
        None => ConfigFile::default(),
    };
    for (key, value) in cvars {
        file.upsert(key, value)?;
    }
    for (key, value) in bots {
        file.upsert_bot(key, value)?;
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_config_name() {
        assert_eq!(normalize_config_name("etl_server").unwrap(), "etl_server.cfg");
        assert_eq!(normalize_config_name("etl_server.cfg").unwrap(), "etl_server.cfg");
        assert!(normalize_config_name("../escape").is_err());
        assert!(normalize_config_name("bad name").is_err());
    }

    #[test]
    fn test_render_from_template_overrides_one_line() {
        let template = ConfigFile::parse(
            "// etl_server template\nset sv_hostname \"ET host\"\nset g_motd \"welcome\"\n",
        );

        let mut cvars = BTreeMap::new();
        cvars.insert("sv_hostname".to_string(), "testserver etsm".to_string());
        let rendered = render(Some(&template), &cvars, &BTreeMap::new()).unwrap();

        assert_eq!(
            rendered.to_string(),
            "// etl_server template\nset sv_hostname \"testserver etsm\"\nset g_motd \"welcome\"\n"
        );
    }

    #[test]
    fn test_render_without_template_appends() {
        let mut cvars = BTreeMap::new();
        cvars.insert("sv_maxclients".to_string(), "32".to_string());
        let rendered = render(None, &cvars, &BTreeMap::new()).unwrap();
        assert_eq!(rendered.to_string(), "set sv_maxclients \"32\"\n");
    }

    #[test]
    fn test_render_rejects_bad_value() {
        let mut cvars = BTreeMap::new();
        cvars.insert("sv_hostname".to_string(), "has \" quote".to_string());
        assert!(render(None, &cvars, &BTreeMap::new()).is_err());
    }
}
