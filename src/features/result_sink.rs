//! Output files: the JSON-lines results stream, optional per-key CSV exports,
//! and one descriptor file per finished batch.
//!
//! Each result key appears at most once in `aadt_results.jsonl`. A station
//! that failed and is harvested again on a later run replaces its earlier
//! lines rather than adding to them.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::OutputConfig;
use crate::core::types::{AadtRecord, BatchDescriptor};

/// One line of `aadt_results.jsonl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLine {
    pub id: String,
    pub aadt: Vec<AadtRecord>,
}

/// Just the key of a results line.
#[derive(Deserialize)]
struct KeyOnly {
    id: String,
}

pub struct ResultSink {
    results_path: PathBuf,
    batches_dir: PathBuf,
    csv_dir: Option<PathBuf>,
    keys: HashSet<String>,
}

impl ResultSink {
    pub fn create(output: &OutputConfig) -> Result<Self> {
        std::fs::create_dir_all(&output.dir)
            .with_context(|| format!("creating output dir {}", output.dir.display()))?;
        let batches_dir = output.batches_dir();
        std::fs::create_dir_all(&batches_dir)
            .with_context(|| format!("creating batch dir {}", batches_dir.display()))?;
        let csv_dir = if output.csv_export {
            let dir = output.csv_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating csv dir {}", dir.display()))?;
            Some(dir)
        } else {
            None
        };
        let results_path = output.results_path();
        let keys = scan_keys(&results_path)?;
        terminate_last_line(&results_path)?;
        if !keys.is_empty() {
            info!("📄 {} result sets already in {}", keys.len(), results_path.display());
        }
        Ok(Self {
            results_path,
            batches_dir,
            csv_dir,
            keys,
        })
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Append one result set as a single JSON line (and its CSV when enabled).
    /// An earlier line with the same key is removed first.
    pub fn append(&mut self, key: &str, records: &[AadtRecord]) -> Result<()> {
        let line = serde_json::to_string(&ResultLine {
            id: key.to_string(),
            aadt: records.to_vec(),
        })?;

        if self.keys.contains(key) {
            debug!("replacing earlier result set for {}", key);
            self.remove_key(key)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.results_path)
            .with_context(|| format!("opening {}", self.results_path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("appending to {}", self.results_path.display()))?;
        file.flush()?;
        self.keys.insert(key.to_string());

        if let Some(dir) = &self.csv_dir {
            let path = dir.join(format!("historical_aadt_{}.csv", file_safe(key)));
            export_csv(&path, records)?;
        }
        debug!("💾 {} → {} records", key, records.len());
        Ok(())
    }

    /// Rewrite the results file without `key`, via `.tmp` + rename.
    fn remove_key(&mut self, key: &str) -> Result<()> {
        let raw = std::fs::read_to_string(&self.results_path)
            .with_context(|| format!("reading {}", self.results_path.display()))?;
        let mut kept = String::with_capacity(raw.len());
        for line in raw.lines() {
            let same_key = serde_json::from_str::<KeyOnly>(line).is_ok_and(|k| k.id == key);
            if !same_key && !line.trim().is_empty() {
                kept.push_str(line);
                kept.push('\n');
            }
        }

        let tmp = self.results_path.with_extension("jsonl.tmp");
        let mut file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(kept.as_bytes())
            .with_context(|| format!("writing {}", tmp.display()))?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.results_path).with_context(|| {
            format!("replacing {} with {}", self.results_path.display(), tmp.display())
        })?;
        self.keys.remove(key);
        Ok(())
    }

    /// Write a finished batch. Batch files are never overwritten.
    pub fn write_batch(&self, batch: &BatchDescriptor) -> Result<PathBuf> {
        let path = self
            .batches_dir
            .join(format!("batch_{:04}.json", batch.batch_number));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("creating batch file {}", path.display()))?;
        let json = serde_json::to_string_pretty(batch)?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("writing batch file {}", path.display()))?;
        file.sync_all()?;
        Ok(path)
    }
}

/// Keys already present in a results file. Lines that don't parse (a torn
/// final write) are skipped with a warning.
fn scan_keys(path: &Path) -> Result<HashSet<String>> {
    let mut keys = HashSet::new();
    if !path.exists() {
        return Ok(keys);
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<KeyOnly>(&line) {
            Ok(k) => {
                keys.insert(k.id);
            }
            Err(e) => warn!("{}:{} skipped: {}", path.display(), n + 1, e),
        }
    }
    Ok(keys)
}

/// Make sure the next append starts on its own line.
fn terminate_last_line(path: &Path) -> Result<()> {
    let Ok(raw) = std::fs::read(path) else {
        return Ok(());
    };
    if raw.last().is_some_and(|b| *b != b'\n') {
        let mut file = OpenOptions::new()
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn file_safe(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Years compare numerically when both parse, textually otherwise.
fn year_order(a: &AadtRecord, b: &AadtRecord) -> Ordering {
    match (a.year.trim().parse::<i64>(), b.year.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.year.cmp(&b.year),
    }
}

/// `year,aadt` CSV, ascending by year.
pub fn export_csv(path: &Path, records: &[AadtRecord]) -> Result<()> {
    let mut sorted = records.to_vec();
    sorted.sort_by(year_order);

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating csv {}", path.display()))?;
    writer.write_record(["year", "aadt"])?;
    for r in &sorted {
        writer.write_record([r.year.as_str(), r.count.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a results stream back, one JSON object per non-blank line.
pub fn read_results(path: &Path) -> Result<Vec<ResultLine>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str(&line)
            .with_context(|| format!("{}:{} is not a result object", path.display(), n + 1))?;
        out.push(parsed);
    }
    Ok(out)
}
