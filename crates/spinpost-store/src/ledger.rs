use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collections::TRIGGERED;
use crate::error::Result;
use crate::repo::Repository;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LedgerEntry {
    schedule_id: String,
    recorded_at: DateTime<Utc>,
}

/// Persisted set of schedule occurrences that have already fired.
///
/// Occurrence ids have the form `{schedule_id}@{date}` so each calendar
/// occurrence of a schedule maps to exactly one key.
#[derive(Clone)]
pub struct TriggeredLedger {
    repo: Arc<dyn Repository>,
}

impl TriggeredLedger {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    pub fn occurrence_id(schedule_id: &str, date: chrono::NaiveDate) -> String {
        format!("{schedule_id}@{date}")
    }

    /// Record an occurrence once. Returns `true` when newly inserted.
    ///
    /// The insert is a single conditional write, so two evaluations racing
    /// on the same occurrence cannot both see `true`.
    pub fn record_once(&self, schedule_id: &str, occurrence_id: &str) -> Result<bool> {
        let entry = LedgerEntry {
            schedule_id: schedule_id.to_string(),
            recorded_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        let inserted = self.repo.insert_if_absent(TRIGGERED, occurrence_id, &bytes)?;
        if inserted {
            debug!(schedule_id, occurrence_id, "occurrence recorded");
        }
        Ok(inserted)
    }

    pub fn contains(&self, occurrence_id: &str) -> Result<bool> {
        Ok(self.repo.get(TRIGGERED, occurrence_id)?.is_some())
    }

    /// Drop entries older than `retention`. Returns how many were removed.
    pub fn prune_older_than(&self, retention: Duration) -> Result<usize> {
        let cutoff = Utc::now() - retention;
        let mut removed = 0;
        for (key, bytes) in self.repo.list(TRIGGERED)? {
            let old = serde_json::from_slice::<LedgerEntry>(&bytes)
                .map(|e| e.recorded_at < cutoff)
                .unwrap_or(true);
            if old && self.repo.delete(TRIGGERED, &key)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "pruned triggered-ledger entries");
        }
        Ok(removed)
    }

    /// Remove every entry belonging to `schedule_id`.
    pub fn forget_schedule(&self, schedule_id: &str) -> Result<usize> {
        let mut removed = 0;
        for (key, bytes) in self.repo.list(TRIGGERED)? {
            let owned = serde_json::from_slice::<LedgerEntry>(&bytes)
                .is_ok_and(|e| e.schedule_id == schedule_id);
            if owned && self.repo.delete(TRIGGERED, &key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
