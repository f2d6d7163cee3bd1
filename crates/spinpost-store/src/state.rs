use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use spinpost_core::{CampaignId, Progress, RunFlags};
use tracing::{info, warn};

use crate::collections::{PROGRESS, RUN_FLAGS};
use crate::repo::{Repository, RepositoryExt};

const FLAGS_KEY: &str = "current";
const PROGRESS_KEY: &str = "current";

/// Restart-safe mirror of the global run flags and the progress line.
///
/// Reads are served from memory. Every mutation is written through to the
/// repository before the method returns, so nothing here depends on process
/// memory surviving an `.await`. Storage failures are logged and the store
/// keeps running memory-only.
pub struct StateStore {
    repo: Arc<dyn Repository>,
    flags: Mutex<RunFlags>,
    progress: Mutex<Progress>,
    degraded: AtomicBool,
    /// Flags found on disk at cold start, before the reset to idle.
    recovered: Option<RunFlags>,
}

impl StateStore {
    /// Cold-start constructor: rehydrate once, then force the run flags back
    /// to idle.
    ///
    /// A fresh process is never in the middle of a campaign, so any
    /// `is_running` found on disk is stale. It is kept in
    /// [`recovered_flags`](Self::recovered_flags) for cleanup and then cleared.
    pub fn hydrate(repo: Arc<dyn Repository>) -> Self {
        let mut degraded = false;

        let stored_flags: Option<RunFlags> = match repo.get_json(RUN_FLAGS, FLAGS_KEY) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "failed to read run flags, starting idle");
                degraded = true;
                None
            }
        };
        let progress: Progress = match repo.get_json(PROGRESS, PROGRESS_KEY) {
            Ok(p) => p.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "failed to read progress");
                degraded = true;
                Progress::default()
            }
        };

        let recovered = stored_flags.filter(|f| *f != RunFlags::idle());
        if let Some(ref stale) = recovered {
            warn!(
                is_running = stale.is_running,
                is_stopping = stale.is_stopping,
                active = ?stale.active_campaign_id,
                "discarding stale run flags from previous process"
            );
        }

        let store = Self {
            repo,
            flags: Mutex::new(RunFlags::idle()),
            progress: Mutex::new(progress),
            degraded: AtomicBool::new(degraded),
            recovered,
        };
        store.persist_flags(&RunFlags::idle());
        store
    }

    pub fn recovered_flags(&self) -> Option<&RunFlags> {
        self.recovered.as_ref()
    }

    /// True once any durable write has failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn flags(&self) -> RunFlags {
        self.flags.lock().unwrap().clone()
    }

    /// Replace the flags and write them through.
    pub fn set_flags(&self, flags: RunFlags) {
        let mut guard = self.flags.lock().unwrap();
        self.persist_flags(&flags);
        *guard = flags;
    }

    /// Take the global run slot for `id`.
    ///
    /// Check-and-set happens under one lock. On conflict nothing is written
    /// and the current holder's flags are returned.
    pub fn try_acquire(&self, id: &CampaignId) -> std::result::Result<(), RunFlags> {
        let mut guard = self.flags.lock().unwrap();
        if guard.is_running {
            return Err(guard.clone());
        }
        let next = RunFlags {
            is_running: true,
            active_campaign_id: Some(id.clone()),
            is_stopping: false,
        };
        self.persist_flags(&next);
        *guard = next;
        info!(campaign_id = %id, "run slot acquired");
        Ok(())
    }

    /// Release the run slot if `id` holds it. Returns whether it did.
    pub fn release(&self, id: &CampaignId) -> bool {
        let mut guard = self.flags.lock().unwrap();
        if guard.active_campaign_id.as_ref() != Some(id) {
            return false;
        }
        self.persist_flags(&RunFlags::idle());
        *guard = RunFlags::idle();
        info!(campaign_id = %id, "run slot released");
        true
    }

    /// Raise the stopping flag. Returns `false` when nothing is running.
    pub fn request_stop(&self) -> bool {
        let mut guard = self.flags.lock().unwrap();
        if !guard.is_running {
            return false;
        }
        let mut next = guard.clone();
        next.is_stopping = true;
        self.persist_flags(&next);
        *guard = next;
        true
    }

    pub fn is_stopping(&self) -> bool {
        self.flags.lock().unwrap().is_stopping
    }

    /// Unconditionally clear the run flags (the `resetStaleState` command).
    pub fn reset(&self) {
        self.set_flags(RunFlags::idle());
    }

    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap().clone()
    }

    pub fn set_progress(&self, text: impl Into<String>, started: bool, done: bool) {
        let next = Progress {
            text: text.into(),
            started,
            done,
        };
        let mut guard = self.progress.lock().unwrap();
        if let Err(e) = self.repo.put_json(PROGRESS, PROGRESS_KEY, &next) {
            self.mark_degraded(&e.to_string());
        }
        *guard = next;
    }

    fn persist_flags(&self, flags: &RunFlags) {
        if let Err(e) = self.repo.put_json(RUN_FLAGS, FLAGS_KEY, flags) {
            self.mark_degraded(&e.to_string());
        }
    }

    fn mark_degraded(&self, reason: &str) {
        // Warn once per process; later failures are debug-level noise.
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(reason, "durable write failed, continuing memory-only");
        } else {
            tracing::debug!(reason, "durable write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;

    fn store() -> (Arc<dyn Repository>, StateStore) {
        let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let store = StateStore::hydrate(repo.clone());
        (repo, store)
    }

    #[test]
    fn acquire_conflict_leaves_state_untouched() {
        let (repo, store) = store();
        let a = CampaignId::from("a");
        store.try_acquire(&a).unwrap();
        let before = repo.get(RUN_FLAGS, FLAGS_KEY).unwrap();

        let holder = store.try_acquire(&CampaignId::from("b")).unwrap_err();
        assert_eq!(holder.active_campaign_id, Some(a));
        assert_eq!(repo.get(RUN_FLAGS, FLAGS_KEY).unwrap(), before);
    }

    #[test]
    fn release_only_by_holder() {
        let (_, store) = store();
        let a = CampaignId::from("a");
        store.try_acquire(&a).unwrap();
        assert!(!store.release(&CampaignId::from("b")));
        assert!(store.flags().is_running);
        assert!(store.release(&a));
        assert_eq!(store.flags(), RunFlags::idle());
    }

    #[test]
    fn stop_requires_running_campaign() {
        let (_, store) = store();
        assert!(!store.request_stop());
        store.try_acquire(&CampaignId::from("a")).unwrap();
        assert!(store.request_stop());
        assert!(store.is_stopping());
    }

    #[test]
    fn writes_go_through_before_return() {
        let (repo, store) = store();
        store.try_acquire(&CampaignId::from("a")).unwrap();
        let on_disk: RunFlags = repo.get_json(RUN_FLAGS, FLAGS_KEY).unwrap().unwrap();
        assert!(on_disk.is_running);

        store.set_progress("Posting 1/3", true, false);
        let p: Progress = repo.get_json(PROGRESS, PROGRESS_KEY).unwrap().unwrap();
        assert_eq!(p.text, "Posting 1/3");
    }
}
