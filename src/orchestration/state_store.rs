//! In-memory loop state storage with snapshot/restore.
//!
//! Holds every loop the process has run, plus point-in-time snapshots a
//! caller can roll a loop back to. Nothing here is durable; the event
//! sink is the externally visible record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::core::branch::LoopState;

/// Metadata describing one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Snapshot identifier.
    pub snapshot_id: String,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// One stored snapshot: metadata plus the full state clone.
#[derive(Debug, Clone)]
struct Snapshot {
    info: SnapshotInfo,
    state: LoopState,
}

/// In-memory store of loop states.
#[derive(Debug, Default)]
pub struct StateStore {
    states: HashMap<String, LoopState>,
    snapshots: HashMap<String, Vec<Snapshot>>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves (or replaces) a loop state.
    pub fn save_state(&mut self, mut state: LoopState) {
        state.updated_at = Utc::now();
        debug!(loop_id = state.loop_id, "saved loop state");
        self.states.insert(state.loop_id.clone(), state);
    }

    /// Loads a loop state by ID.
    #[must_use]
    pub fn load_state(&self, loop_id: &str) -> Option<&LoopState> {
        self.states.get(loop_id)
    }

    /// All stored loop IDs.
    #[must_use]
    pub fn list_loops(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Deletes a loop state and its snapshots. Returns whether anything
    /// was removed.
    pub fn delete_state(&mut self, loop_id: &str) -> bool {
        let removed = self.states.remove(loop_id).is_some();
        if removed {
            self.snapshots.remove(loop_id);
            info!(loop_id, "deleted loop state");
        }
        removed
    }

    /// Takes a full snapshot of a loop's current state.
    ///
    /// Returns the snapshot ID, or `None` when the loop is unknown.
    pub fn create_snapshot(&mut self, loop_id: &str) -> Option<String> {
        let state = self.states.get(loop_id)?.clone();
        let info = SnapshotInfo {
            snapshot_id: format!("{loop_id}-{}", crate::core::short_id()),
            timestamp: Utc::now(),
        };
        let snapshot_id = info.snapshot_id.clone();
        self.snapshots
            .entry(loop_id.to_string())
            .or_default()
            .push(Snapshot { info, state });
        info!(loop_id, snapshot_id, "created snapshot");
        Some(snapshot_id)
    }

    /// Snapshot metadata for a loop, oldest first.
    #[must_use]
    pub fn list_snapshots(&self, loop_id: &str) -> Vec<SnapshotInfo> {
        self.snapshots
            .get(loop_id)
            .map(|snapshots| snapshots.iter().map(|s| s.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Restores a loop to a snapshot. Returns whether the snapshot was
    /// found.
    pub fn restore_snapshot(&mut self, loop_id: &str, snapshot_id: &str) -> bool {
        let Some(snapshot) = self
            .snapshots
            .get(loop_id)
            .and_then(|snapshots| snapshots.iter().find(|s| s.info.snapshot_id == snapshot_id))
        else {
            return false;
        };
        self.states
            .insert(loop_id.to_string(), snapshot.state.clone());
        info!(loop_id, snapshot_id, "restored snapshot");
        true
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::core::branch::{Branch, LoopMode};

    fn state_with_branch() -> (LoopState, String) {
        let mut state = LoopState::new(1, None, None);
        let branch = Branch::new("q", LoopMode::SearchSummarize, None, None, 1000);
        let branch_id = branch.id.clone();
        state.add_branch(branch);
        (state, branch_id)
    }

    #[test]
    fn test_save_load_delete() {
        let mut store = StateStore::new();
        let (state, _) = state_with_branch();
        let loop_id = state.loop_id.clone();

        store.save_state(state);
        assert!(store.load_state(&loop_id).is_some());
        assert_eq!(store.list_loops(), vec![loop_id.clone()]);

        assert!(store.delete_state(&loop_id));
        assert!(store.load_state(&loop_id).is_none());
        assert!(!store.delete_state(&loop_id));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut store = StateStore::new();
        let (state, branch_id) = state_with_branch();
        let loop_id = state.loop_id.clone();
        store.save_state(state);

        let snapshot_id = store
            .create_snapshot(&loop_id)
            .unwrap_or_else(|| panic!("snapshot failed"));

        // Mutate the live state after the snapshot
        let mut mutated = store
            .load_state(&loop_id)
            .cloned()
            .unwrap_or_else(|| panic!("state missing"));
        mutated.add_branch(Branch::new("extra", LoopMode::SearchSummarize, None, None, 1000));
        store.save_state(mutated);
        assert_eq!(
            store.load_state(&loop_id).map(|s| s.branches.len()),
            Some(2)
        );

        // Restore rolls back to the single-branch state
        assert!(store.restore_snapshot(&loop_id, &snapshot_id));
        let restored = store
            .load_state(&loop_id)
            .unwrap_or_else(|| panic!("state missing"));
        assert_eq!(restored.branches.len(), 1);
        assert!(restored.branches.contains_key(&branch_id));
    }

    #[test]
    fn test_snapshot_unknown_loop() {
        let mut store = StateStore::new();
        assert!(store.create_snapshot("nope").is_none());
        assert!(store.list_snapshots("nope").is_empty());
        assert!(!store.restore_snapshot("nope", "snap"));
    }

    #[test]
    fn test_snapshot_listing_order() {
        let mut store = StateStore::new();
        let (state, _) = state_with_branch();
        let loop_id = state.loop_id.clone();
        store.save_state(state);

        let first = store.create_snapshot(&loop_id).unwrap_or_default();
        let second = store.create_snapshot(&loop_id).unwrap_or_default();
        let listed: Vec<String> = store
            .list_snapshots(&loop_id)
            .into_iter()
            .map(|s| s.snapshot_id)
            .collect();
        assert_eq!(listed, vec![first, second]);
    }
}
