use gitdojo_core::{InvariantViolation, RepoState};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identity of one learner's run through one practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub learner_id: String,
    pub practice_id: String,
}

impl SessionKey {
    pub fn new(learner_id: impl Into<String>, practice_id: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            practice_id: practice_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.learner_id, self.practice_id)
    }
}

/// Persisted session payload.
///
/// `state: None` means the learner has not changed anything yet and the
/// practice's initial state applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub practice_id: String,
    pub state: Option<RepoState>,
    pub version: u32,
    /// Accepted command lines, in order.
    #[serde(default)]
    pub history: Vec<String>,
}

impl Snapshot {
    pub fn empty(practice_id: impl Into<String>, version: u32) -> Self {
        Self {
            practice_id: practice_id.into(),
            state: None,
            version,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Ready(Snapshot),
    /// Nothing stored yet. The snapshot is empty and has not been written.
    Fresh(Snapshot),
    /// The stored row was recorded against another practice version. It is
    /// left in place until the key is reset.
    ResetRequired { stored: u32, current: u32 },
}

impl LoadOutcome {
    /// The usable snapshot, or [`StoreError::ResetRequired`].
    pub fn into_snapshot(self, key: &SessionKey) -> Result<Snapshot, StoreError> {
        match self {
            LoadOutcome::Ready(s) | LoadOutcome::Fresh(s) => Ok(s),
            LoadOutcome::ResetRequired { stored, current } => Err(StoreError::ResetRequired {
                key: key.to_string(),
                stored,
                current,
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot for {key} is stored at version {stored}; refusing to overwrite it with version {attempted}")]
    VersionConflict {
        key: String,
        stored: u32,
        attempted: u32,
    },

    #[error("progress for {key} was recorded against version {stored} of the practice, which is now at version {current}; reset to continue")]
    ResetRequired {
        key: String,
        stored: u32,
        current: u32,
    },

    #[error("stored state for {key} is inconsistent: {violation}")]
    Corrupt {
        key: String,
        violation: InvariantViolation,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("snapshot encoding: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot store lock poisoned")]
    Poisoned,
}

/// Versioned snapshot persistence keyed by [`SessionKey`].
///
/// Implementations are synchronous; async callers run them on a blocking
/// thread. Every method is atomic with respect to the key.
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot for `key` as seen by practice version `current_version`.
    fn load(&self, key: &SessionKey, current_version: u32) -> Result<LoadOutcome, StoreError>;

    /// Insert or replace. Replacing a row stamped with a different version
    /// fails with [`StoreError::VersionConflict`].
    fn save(&self, key: &SessionKey, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Drop everything stored for `key` and write an empty snapshot at `new_version`.
    fn reset(&self, key: &SessionKey, new_version: u32) -> Result<Snapshot, StoreError>;

    /// Practice ids and versions with stored progress for a learner.
    fn list(&self, learner_id: &str) -> Result<Vec<(String, u32)>, StoreError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_required_converts_to_error() {
        let key = SessionKey::new("ada", "merging");
        let err = LoadOutcome::ResetRequired { stored: 1, current: 3 }
            .into_snapshot(&key)
            .unwrap_err();
        assert!(matches!(err, StoreError::ResetRequired { stored: 1, current: 3, .. }));
        assert!(err.to_string().contains("ada/merging"));
    }

    #[test]
    fn snapshot_json_shape() {
        let json = serde_json::to_value(Snapshot::empty("p", 4)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "practice_id": "p", "state": null, "version": 4, "history": [] })
        );
    }
}
