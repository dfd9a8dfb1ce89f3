use gitdojo_core::RepoState;
use gitdojo_store::SessionKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Notification that a session changed.
///
/// Published on a broadcast channel. Renderers (terminal view, commit graph)
/// subscribe and redraw from `state`; they never drive the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEvent {
    /// `evt_<ulid>`
    pub id: String,
    /// RFC 3339
    pub ts: String,
    pub learner_id: String,
    pub practice_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Executed {
        command: String,
        state: Arc<RepoState>,
    },
    Validated {
        is_correct: bool,
        score: f64,
    },
    Reset {
        version: u32,
        state: Arc<RepoState>,
    },
}

impl StateEvent {
    pub(crate) fn new(key: &SessionKey, kind: EventKind) -> Self {
        Self {
            id: format!("evt_{}", ulid::Ulid::new()),
            ts: now_rfc3339(),
            learner_id: key.learner_id.clone(),
            practice_id: key.practice_id.clone(),
            kind,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.learner_id, &self.practice_id)
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
