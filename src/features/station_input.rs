use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::types::StationId;

/// Parse a newline-delimited station list. Blank lines are ignored and
/// repeated IDs keep their first position.
pub fn parse_station_ids(text: &str) -> Vec<StationId> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(l.to_string()))
        .map(StationId::from)
        .collect()
}

pub fn load_station_ids(path: &Path) -> Result<Vec<StationId>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading station list {}", path.display()))?;
    let ids = parse_station_ids(&text);
    info!("Loaded {} station IDs from {}", ids.len(), path.display());
    Ok(ids)
}
