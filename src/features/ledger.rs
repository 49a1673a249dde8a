//! Progress ledger: which stations are done, which failed, and the last
//! batch that reached its boundary.
//!
//! Persisted as `progress.json`, replaced wholesale via `progress.json.tmp` +
//! rename so a reader never observes a half-written file. A sibling
//! `progress.lock` is held with an exclusive advisory lock for the lifetime of
//! the [`LedgerStore`], so two harvests can never write the same ledger.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::error::LedgerError;
use crate::core::types::StationId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLedger {
    #[serde(default)]
    pub completed_ids: BTreeSet<StationId>,
    #[serde(default)]
    pub failed_ids: BTreeSet<StationId>,
    #[serde(default)]
    pub last_batch: Option<u64>,
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressLedger {
    pub fn is_completed(&self, station: &StationId) -> bool {
        self.completed_ids.contains(station)
    }

    pub fn mark_completed(&mut self, station: &StationId) {
        self.failed_ids.remove(station);
        self.completed_ids.insert(station.clone());
    }

    pub fn mark_failed(&mut self, station: &StationId) {
        if !self.completed_ids.contains(station) {
            self.failed_ids.insert(station.clone());
        }
    }

    /// Number the next batch continues from.
    pub fn next_batch_number(&self) -> u64 {
        self.last_batch.map_or(0, |b| b + 1)
    }

    pub fn finish_batch(&mut self, batch_number: u64, batch_len: usize) {
        self.last_batch = Some(batch_number);
        self.total_processed += batch_len as u64;
    }

    /// A station can't be both completed and failed; completion wins.
    fn normalize(&mut self) -> usize {
        let overlap: Vec<StationId> = self
            .failed_ids
            .intersection(&self.completed_ids)
            .cloned()
            .collect();
        for id in &overlap {
            self.failed_ids.remove(id);
        }
        overlap.len()
    }
}

/// What to do with a progress file that exists but can't be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptLedgerPolicy {
    #[default]
    Abort,
    /// Move the file aside and start from an empty ledger.
    Reset,
}

/// Exclusive handle on the ledger file.
pub struct LedgerStore {
    path: PathBuf,
    lock: File,
}

impl LedgerStore {
    /// Lock and load the ledger at `path` (an empty ledger when absent).
    pub fn open(path: &Path, policy: CorruptLedgerPolicy) -> Result<(Self, ProgressLedger), LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|source| LedgerError::Io {
                path: lock_path.clone(),
                source,
            })?;
        if let Err(e) = FileExt::try_lock_exclusive(&lock) {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(LedgerError::Locked(path.to_path_buf()));
            }
            return Err(LedgerError::Io {
                path: lock_path,
                source: e,
            });
        }

        let store = Self {
            path: path.to_path_buf(),
            lock,
        };
        let ledger = store.load(policy)?;
        Ok((store, ledger))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self, policy: CorruptLedgerPolicy) -> Result<ProgressLedger, LedgerError> {
        if !self.path.exists() {
            info!("📒 No progress ledger at {}, starting fresh", self.path.display());
            return Ok(ProgressLedger::default());
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;

        match serde_json::from_str::<ProgressLedger>(&contents) {
            Ok(mut ledger) => {
                let overlap = ledger.normalize();
                if overlap > 0 {
                    warn!(
                        "📒 {} stations were listed as both completed and failed; kept as completed",
                        overlap
                    );
                }
                info!(
                    "📒 Resuming from {}: {} completed, {} failed, last batch {}",
                    self.path.display(),
                    ledger.completed_ids.len(),
                    ledger.failed_ids.len(),
                    ledger
                        .last_batch
                        .map_or_else(|| "none".to_string(), |b| b.to_string())
                );
                Ok(ledger)
            }
            Err(e) => {
                let corrupt = LedgerError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                };
                match policy {
                    CorruptLedgerPolicy::Abort => Err(corrupt),
                    CorruptLedgerPolicy::Reset => {
                        let aside = self.path.with_extension(format!(
                            "json.corrupt-{}",
                            Utc::now().format("%Y%m%dT%H%M%S")
                        ));
                        std::fs::rename(&self.path, &aside).map_err(|source| LedgerError::Io {
                            path: aside.clone(),
                            source,
                        })?;
                        warn!(
                            "📒 {}; moved to {} and starting from an empty ledger",
                            corrupt,
                            aside.display()
                        );
                        Ok(ProgressLedger::default())
                    }
                }
            }
        }
    }

    /// Persist the full ledger atomically.
    pub fn save(&self, ledger: &ProgressLedger) -> Result<(), LedgerError> {
        let mut snapshot = ledger.clone();
        snapshot.updated_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&snapshot)?;

        let tmp = self.path.with_extension("json.tmp");
        let write_tmp = || -> std::io::Result<()> {
            let mut f = File::create(&tmp)?;
            f.write_all(json.as_bytes())?;
            f.sync_all()
        };
        write_tmp().map_err(|source| LedgerError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

impl Drop for LedgerStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_empty_ledger() {
        let dir = tempdir().unwrap();
        let (_store, ledger) =
            LedgerStore::open(&dir.path().join("progress.json"), CorruptLedgerPolicy::Abort).unwrap();
        assert_eq!(ledger, ProgressLedger::default());
        assert_eq!(ledger.next_batch_number(), 0);
    }

    #[test]
    fn saved_ledger_is_reloaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let mut ledger = ProgressLedger::default();
        ledger.mark_completed(&"S1".into());
        ledger.mark_failed(&"S2".into());
        ledger.finish_batch(0, 2);
        {
            let (store, _) = LedgerStore::open(&path, CorruptLedgerPolicy::Abort).unwrap();
            store.save(&ledger).unwrap();
        }

        let (_store, reloaded) = LedgerStore::open(&path, CorruptLedgerPolicy::Abort).unwrap();
        assert!(reloaded.is_completed(&"S1".into()));
        assert!(reloaded.failed_ids.contains(&StationId::from("S2")));
        assert_eq!(reloaded.last_batch, Some(0));
        assert_eq!(reloaded.total_processed, 2);
        assert_eq!(reloaded.next_batch_number(), 1);
        assert!(reloaded.updated_at.is_some());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn completion_clears_failure_and_failure_never_demotes_completion() {
        let mut ledger = ProgressLedger::default();
        ledger.mark_failed(&"S1".into());
        ledger.mark_completed(&"S1".into());
        ledger.mark_failed(&"S1".into());
        assert!(ledger.is_completed(&"S1".into()));
        assert!(ledger.failed_ids.is_empty());
    }

    #[test]
    fn corrupt_ledger_aborts_by_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = LedgerStore::open(&path, CorruptLedgerPolicy::Abort).err().unwrap();
        assert!(matches!(err, LedgerError::Corrupt { .. }), "{err}");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn corrupt_ledger_reset_moves_file_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let (_store, ledger) = LedgerStore::open(&path, CorruptLedgerPolicy::Reset).unwrap();
        assert_eq!(ledger, ProgressLedger::default());
        assert!(!path.exists());
        let moved = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("progress.json.corrupt-"));
        assert!(moved);
    }

    #[test]
    fn second_writer_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let (_first, _) = LedgerStore::open(&path, CorruptLedgerPolicy::Abort).unwrap();
        let second = LedgerStore::open(&path, CorruptLedgerPolicy::Abort);
        assert!(matches!(second, Err(LedgerError::Locked(_))));
    }
}
