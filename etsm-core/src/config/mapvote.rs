//! Derived map-rotation config
//!
//! One rotation entry per map, in declared order, each chaining to the
//! next via `vstr`; the last entry wraps back to the first. Output is
//! deterministic (no timestamps) so regenerating with an unchanged map
//! list is byte-identical, which reconciliation relies on to skip the
//! write.

use super::ConfigFile;

/// Name of the generated rotation config
pub const MAPVOTE_CONFIG: &str = "mapvotecycle";

/// Gametype used when a map does not specify one
pub const DEFAULT_GAMETYPE: u8 = 6;

/// One map in the rotation, with its per-map options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapvoteMap {
    pub name: String,
    pub gametype: u8,
}

impl MapvoteMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gametype: DEFAULT_GAMETYPE,
        }
    }
}

/// Build the rotation config for the given maps, in order
pub fn build_mapvote_cycle(maps: &[MapvoteMap]) -> ConfigFile {
    let mut text = String::new();
    for (i, map) in maps.iter().enumerate() {
        let next = (i + 1) % maps.len();
        text.push_str(&format!(
            "set d{i} \"set g_gametype {} ; map {} ; set nextmap vstr d{next}\"\n",
            map.gametype,
            map.name.to_lowercase(),
        ));
    }
    text.push_str("vstr d0\n");
    ConfigFile::parse(&text)
}
