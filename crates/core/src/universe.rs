//! The tracked-security universe: an ordered list of security identifiers
//! read from a plain text file, one per line. Order matters downstream (the
//! portfolio report lists securities in universe order), so loading preserves
//! it and deduplication keeps the first occurrence.

use crate::config::Settings;
use anyhow::Context;
use std::collections::HashSet;
use std::path::Path;

const MAX_UNIVERSE_SIZE: usize = 1000;

pub async fn load_universe(path: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read universe file {}", path.display()))?;
    parse_universe(&raw).with_context(|| format!("invalid universe file {}", path.display()))
}

pub async fn load_universe_from_settings(settings: &Settings) -> anyhow::Result<Vec<String>> {
    load_universe(settings.require_universe_file()?).await
}

fn parse_universe(raw: &str) -> anyhow::Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if seen.insert(line.to_string()) {
            out.push(line.to_string());
        }
    }

    anyhow::ensure!(!out.is_empty(), "universe file contains no securities");
    anyhow::ensure!(
        out.len() <= MAX_UNIVERSE_SIZE,
        "universe file lists {} securities (max {MAX_UNIVERSE_SIZE})",
        out.len()
    );

    Ok(out)
}
