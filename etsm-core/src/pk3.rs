//! pk3 (zip) archive inspection
//!
//! A pk3 is a zip-format game data archive. The only structural fact the
//! engine cares about is which maps it actually ships: the `.bsp` entries
//! under `maps/`. A pk3's file name is a best guess at its map name; the
//! bsp listing is authoritative.

use std::fs::File;
use std::path::Path;

use crate::error::{Error, Result};

/// Map names declared by the `.bsp` entries of a pk3
pub fn bsp_names(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let archive = zip::ZipArchive::new(file).map_err(|e| Error::Pk3Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter_map(|name| {
            name.strip_prefix("maps/")
                .and_then(|rest| rest.strip_suffix(".bsp"))
                .map(|stem| stem.to_string())
        })
        .collect();
    names.sort();
    Ok(names)
}
