//! Catalog file location.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Default catalog path: `~/.config/hatchery/catalog.json`.
pub fn default_catalog_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("hatchery").join("catalog.json"))
}

/// Resolve the catalog path: explicit flag (or `HATCHERY_CATALOG`) wins,
/// otherwise the default location.
pub fn resolve_catalog_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(path),
        None => default_catalog_path(),
    }
}
