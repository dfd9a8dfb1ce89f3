use crate::snapshot::{LoadOutcome, SessionKey, Snapshot, SnapshotStore, StoreError};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Process-local store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemorySnapshotStore {
    rows: Mutex<HashMap<SessionKey, Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> Result<MutexGuard<'_, HashMap<SessionKey, Snapshot>>, StoreError> {
        self.rows.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self, key: &SessionKey, current_version: u32) -> Result<LoadOutcome, StoreError> {
        let rows = self.rows()?;
        Ok(match rows.get(key) {
            None => LoadOutcome::Fresh(Snapshot::empty(&key.practice_id, current_version)),
            Some(s) if s.version != current_version => {
                tracing::warn!(%key, stored = s.version, current = current_version, "snapshot version mismatch");
                LoadOutcome::ResetRequired {
                    stored: s.version,
                    current: current_version,
                }
            }
            Some(s) => LoadOutcome::Ready(s.clone()),
        })
    }

    fn save(&self, key: &SessionKey, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut rows = self.rows()?;
        if let Some(stored) = rows.get(key) {
            if stored.version != snapshot.version {
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                    stored: stored.version,
                    attempted: snapshot.version,
                });
            }
        }
        rows.insert(key.clone(), snapshot.clone());
        Ok(())
    }

    fn reset(&self, key: &SessionKey, new_version: u32) -> Result<Snapshot, StoreError> {
        let snapshot = Snapshot::empty(&key.practice_id, new_version);
        self.rows()?.insert(key.clone(), snapshot.clone());
        Ok(snapshot)
    }

    fn list(&self, learner_id: &str) -> Result<Vec<(String, u32)>, StoreError> {
        let mut out: Vec<(String, u32)> = self
            .rows()?
            .iter()
            .filter(|(k, _)| k.learner_id == learner_id)
            .map(|(k, s)| (k.practice_id.clone(), s.version))
            .collect();
        out.sort();
        Ok(out)
    }
}
