use gitdojo_core::InvariantViolation;
use gitdojo_store::StoreError;
use thiserror::Error;

/// Failures of the facade itself.
///
/// Parse and transition errors are not here: they are ordinary command
/// feedback and come back inside an [`crate::ExecResponse`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown practice \"{0}\"")]
    UnknownPractice(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The engine produced an inconsistent state. The session is halted.
    #[error("internal error, session halted: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("session {key} is halted after an internal error ({reason}); reset the practice to continue")]
    Poisoned { key: String, reason: String },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SessionError {
    /// `(stored, current)` versions when the learner must confirm a reset.
    pub fn reset_required(&self) -> Option<(u32, u32)> {
        match self {
            SessionError::Store(StoreError::ResetRequired { stored, current, .. }) => {
                Some((*stored, *current))
            }
            SessionError::Store(StoreError::VersionConflict {
                stored, attempted, ..
            }) => Some((*stored, *attempted)),
            _ => None,
        }
    }

    /// Stable snake_case code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::UnknownPractice(_) => "unknown_practice",
            SessionError::Store(StoreError::ResetRequired { .. })
            | SessionError::Store(StoreError::VersionConflict { .. }) => "reset_required",
            SessionError::Store(_) => "store_error",
            SessionError::Invariant(_) | SessionError::Poisoned { .. } => "session_halted",
            SessionError::Join(_) => "internal_error",
        }
    }
}
