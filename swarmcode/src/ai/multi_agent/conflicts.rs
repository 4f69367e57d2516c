//! Per-path write ownership for one batch

use crate::ai::multi_agent::types::FileConflict;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tracks which agent owns which path while a batch runs.
///
/// A path is owned by the first agent that writes it until that agent is
/// released. A different agent writing the same path is refused and the
/// contention is recorded as a [`FileConflict`] for the executor to resolve.
#[derive(Debug, Default)]
pub struct ConflictTracker {
    locks: DashMap<PathBuf, String>,
    pending: Mutex<Vec<FileConflict>>,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for `agent_id`. Succeeds when free or already ours.
    pub fn acquire(&self, path: &Path, agent_id: &str) -> Result<(), FileConflict> {
        let owner = {
            let entry = self
                .locks
                .entry(path.to_path_buf())
                .or_insert_with(|| agent_id.to_string());
            entry.value().clone()
        };

        if owner == agent_id {
            return Ok(());
        }

        log::warn!(
            "[CONFLICTS] {} wants {} which is held by {}",
            agent_id,
            path.display(),
            owner
        );

        let mut pending = self.pending.lock();
        if let Some(existing) = pending.iter_mut().find(|c| c.path == path) {
            if !existing.agents.iter().any(|a| a == &owner) {
                existing.agents.insert(0, owner.clone());
            }
            if !existing.agents.iter().any(|a| a == agent_id) {
                existing.agents.push(agent_id.to_string());
            }
            return Err(existing.clone());
        }

        let conflict = FileConflict::new(path.to_path_buf(), &owner, agent_id);
        pending.push(conflict.clone());
        Err(conflict)
    }

    /// Drop every lock held by `agent_id`, returning how many were freed
    pub fn release_agent(&self, agent_id: &str) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, owner| owner != agent_id);
        let freed = before.saturating_sub(self.locks.len());
        if freed > 0 {
            log::debug!("[CONFLICTS] Released {} lock(s) held by {}", freed, agent_id);
        }
        freed
    }

    pub fn release_path(&self, path: &Path) -> bool {
        self.locks.remove(path).is_some()
    }

    /// Conflicts detected since the last call
    pub fn take_pending_conflicts(&self) -> Vec<FileConflict> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every lock and pending conflict. Leaves the tracker empty.
    pub fn clear_all_locks(&self) {
        let held = self.locks.len();
        self.locks.clear();
        self.pending.lock().clear();
        if held > 0 {
            log::debug!("[CONFLICTS] Cleared {} residual lock(s)", held);
        }
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

/// Handle an agent's tool context uses to claim paths before writing
#[derive(Debug, Clone)]
pub struct FileClaim {
    tracker: Arc<ConflictTracker>,
    agent_id: String,
}

impl FileClaim {
    pub fn new(tracker: Arc<ConflictTracker>, agent_id: impl Into<String>) -> Self {
        FileClaim {
            tracker,
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Claim a path, turning contention into a message for the model
    pub fn claim(&self, path: &Path) -> Result<(), String> {
        self.tracker.acquire(path, &self.agent_id).map_err(|conflict| {
            let owner = conflict
                .agents
                .first()
                .cloned()
                .unwrap_or_else(|| "another agent".to_string());
            format!(
                "File conflict: {} is being modified by {}. Write refused; work on other files or retry later.",
                path.display(),
                owner
            )
        })
    }

    /// Release everything this agent holds
    pub fn release(&self) -> usize {
        self.tracker.release_agent(&self.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_same_agent_is_idempotent() {
        let tracker = ConflictTracker::new();
        let path = Path::new("/w/src/lib.rs");
        assert!(tracker.acquire(path, "a").is_ok());
        assert!(tracker.acquire(path, "a").is_ok());
        assert_eq!(tracker.lock_count(), 1);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_second_agent_records_conflict() {
        let tracker = ConflictTracker::new();
        let path = Path::new("/w/src/lib.rs");
        tracker.acquire(path, "a").unwrap();

        let conflict = tracker.acquire(path, "b").unwrap_err();
        assert_eq!(conflict.agents, vec!["a".to_string(), "b".to_string()]);

        // A third contender extends the same record
        let conflict = tracker.acquire(path, "c").unwrap_err();
        assert_eq!(conflict.agents.len(), 3);
        // Repeat attempts do not duplicate
        tracker.acquire(path, "b").unwrap_err();

        let pending = tracker.take_pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].agents.len(), 3);
        assert!(tracker.take_pending_conflicts().is_empty());
    }

    #[test]
    fn test_release_agent_frees_only_its_paths() {
        let tracker = ConflictTracker::new();
        tracker.acquire(Path::new("/w/a"), "a").unwrap();
        tracker.acquire(Path::new("/w/b"), "a").unwrap();
        tracker.acquire(Path::new("/w/c"), "b").unwrap();

        assert_eq!(tracker.release_agent("a"), 2);
        assert_eq!(tracker.lock_count(), 1);
        assert!(tracker.acquire(Path::new("/w/a"), "b").is_ok());
        assert!(tracker.release_path(Path::new("/w/c")));
        assert!(!tracker.release_path(Path::new("/w/c")));
    }

    #[test]
    fn test_clear_all_locks_leaves_nothing() {
        let tracker = ConflictTracker::new();
        tracker.acquire(Path::new("/w/a"), "a").unwrap();
        let _ = tracker.acquire(Path::new("/w/a"), "b");
        tracker.clear_all_locks();
        assert_eq!(tracker.lock_count(), 0);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_file_claim_message_names_owner() {
        let tracker = Arc::new(ConflictTracker::new());
        let first = FileClaim::new(tracker.clone(), "agent-1");
        let second = FileClaim::new(tracker.clone(), "agent-2");
        first.claim(Path::new("/w/main.rs")).unwrap();

        let err = second.claim(Path::new("/w/main.rs")).unwrap_err();
        assert!(err.contains("agent-1"));
        assert_eq!(first.release(), 1);
        assert!(second.claim(Path::new("/w/main.rs")).is_ok());
    }
}
