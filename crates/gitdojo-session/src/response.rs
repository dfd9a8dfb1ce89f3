use gitdojo_check::CompiledPractice;
use gitdojo_core::{Output, ParseError, RepoState, StatusReport, TransitionError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The line could not be understood; retype it.
    Parse,
    /// The command is not possible in the current state.
    Transition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
}

impl From<&ParseError> for CommandError {
    fn from(err: &ParseError) -> Self {
        Self {
            kind: ErrorKind::Parse,
            code: "parse_error".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<&TransitionError> for CommandError {
    fn from(err: &TransitionError) -> Self {
        Self {
            kind: ErrorKind::Transition,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of one terminal line.
///
/// `state` is always the session's current state: the new one on success,
/// the unchanged one on error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub ok: bool,
    /// Terminal lines to print.
    pub output: Vec<String>,
    /// Structured form of `output`, for renderers that draw their own view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Output>,
    pub state: Arc<RepoState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl ExecResponse {
    pub(crate) fn success(output: Output, state: Arc<RepoState>) -> Self {
        Self {
            ok: true,
            output: output.render(),
            detail: Some(output),
            state,
            error: None,
        }
    }

    pub(crate) fn failure(error: CommandError, state: Arc<RepoState>) -> Self {
        Self {
            ok: false,
            output: vec![error.message.clone()],
            detail: None,
            state,
            error: Some(error),
        }
    }
}

/// Current state of a session as seen by a renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub learner_id: String,
    pub practice_id: String,
    pub version: u32,
    pub state: Arc<RepoState>,
    pub status: StatusReport,
    pub history: Vec<String>,
}

/// Listing entry for a loaded practice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: u32,
    pub hints: Vec<String>,
    pub rule_count: usize,
}

impl From<&CompiledPractice> for PracticeSummary {
    fn from(p: &CompiledPractice) -> Self {
        Self {
            id: p.practice.id.clone(),
            title: p.practice.title.clone(),
            description: p.practice.description.clone(),
            version: p.practice.version,
            hints: p.practice.hints.clone(),
            rule_count: p.rules.len(),
        }
    }
}
