//! Error taxonomy of the engine.
//!
//! - [`ParseError`]: malformed input line. Recoverable, the learner retypes it.
//! - [`TransitionError`]: operation illegal in the current state. Recoverable,
//!   shown as command feedback; the state is left untouched.
//! - [`InvariantViolation`]: the model is internally inconsistent. Fatal.

use crate::state::CommitId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unterminated quote in: {0}")]
    UnterminatedQuote(String),

    #[error("'{0}' is not a known command")]
    UnknownCommand(String),

    #[error("{command}: missing {expected}")]
    MissingArgument {
        command: String,
        expected: String,
    },

    #[error("{command}: invalid argument '{token}': {reason}")]
    InvalidArgument {
        command: String,
        token: String,
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn missing(command: &str, expected: &str) -> Self {
        Self::MissingArgument {
            command: command.to_string(),
            expected: expected.to_string(),
        }
    }

    pub(crate) fn invalid(command: &str, token: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command: command.to_string(),
            token: token.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("nothing to commit (use \"git add\" to stage changes)")]
    NothingToCommit,

    #[error("aborting commit due to empty commit message (use -m <message>)")]
    MissingMessage,

    #[error("cannot amend: there is no commit yet")]
    NothingToAmend,

    #[error("branch '{0}' does not have any commits yet")]
    NoCommitsYet(String),

    #[error("a branch named '{0}' already exists")]
    BranchAlreadyExists(String),

    #[error("branch '{0}' not found")]
    UnknownBranch(String),

    #[error("'{0}' did not match any branch or commit")]
    UnknownRef(String),

    #[error("'{0}' is not a branch (use --detach to check out a commit)")]
    NotABranch(String),

    #[error("HEAD is detached; not on any branch")]
    DetachedHead,

    #[error("cannot delete branch '{0}': HEAD is on it")]
    CannotDeleteCurrentBranch(String),

    #[error("branch '{0}' is not fully merged (use -D to delete it anyway)")]
    BranchNotMerged(String),

    #[error("pathspec '{0}' did not match any files")]
    PathspecNoMatch(String),

    #[error("{0}: No such file")]
    NoSuchFile(String),

    #[error("your local changes would be overwritten: {}", .paths.join(", "))]
    LocalChangesWouldBeOverwritten { paths: Vec<String> },

    #[error("you have staged changes; commit or reset them before merging")]
    UncommittedChanges,

    #[error("a merge is in progress (commit it or run \"git merge --abort\")")]
    MergeInProgress,

    #[error("there is no merge to abort")]
    NoMergeInProgress,

    #[error("refusing to merge unrelated histories")]
    UnrelatedHistories,

    #[error("not possible to fast-forward to '{0}'")]
    NotFastForward(String),

    #[error("merge conflict in: {}", .paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    #[error("internal error: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl TransitionError {
    /// Fatal errors mean the engine itself is broken and the session must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }

    /// Stable snake_case code for the UI.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NothingToCommit => "nothing_to_commit",
            Self::MissingMessage => "missing_message",
            Self::NothingToAmend => "nothing_to_amend",
            Self::NoCommitsYet(_) => "no_commits_yet",
            Self::BranchAlreadyExists(_) => "branch_already_exists",
            Self::UnknownBranch(_) => "unknown_branch",
            Self::UnknownRef(_) => "unknown_ref",
            Self::NotABranch(_) => "not_a_branch",
            Self::DetachedHead => "detached_head",
            Self::CannotDeleteCurrentBranch(_) => "cannot_delete_current_branch",
            Self::BranchNotMerged(_) => "branch_not_merged",
            Self::PathspecNoMatch(_) => "pathspec_no_match",
            Self::NoSuchFile(_) => "no_such_file",
            Self::LocalChangesWouldBeOverwritten { .. } => "local_changes_would_be_overwritten",
            Self::UncommittedChanges => "uncommitted_changes",
            Self::MergeInProgress => "merge_in_progress",
            Self::NoMergeInProgress => "no_merge_in_progress",
            Self::UnrelatedHistories => "unrelated_histories",
            Self::NotFastForward(_) => "not_fast_forward",
            Self::MergeConflict { .. } => "merge_conflict",
            Self::Invariant(_) => "invariant_violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("branch '{branch}' points at missing commit {commit}")]
    DanglingBranch { branch: String, commit: CommitId },

    #[error("HEAD points at missing commit {0}")]
    DanglingHead(CommitId),

    #[error("merge head points at missing commit {0}")]
    DanglingMergeHead(CommitId),

    #[error("commit {commit} references missing parent {parent}")]
    MissingParent { commit: CommitId, parent: CommitId },

    #[error("commit {commit} has {count} parents (at most 2 allowed)")]
    TooManyParents { commit: CommitId, count: usize },

    #[error("commit {commit} tree entry '{path}' references missing blob {blob}")]
    MissingBlob {
        commit: CommitId,
        path: String,
        blob: String,
    },

    #[error("commit stored under {key} hashes to {computed}")]
    CommitIdMismatch { key: CommitId, computed: CommitId },

    #[error("blob stored under {key} hashes to {computed}")]
    BlobIdMismatch { key: String, computed: String },

    #[error("commit graph has a cycle through {0}")]
    Cycle(CommitId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_offending_token() {
        let err = ParseError::invalid("reset", "--sideways", "unknown flag");
        assert_eq!(
            err.to_string(),
            "reset: invalid argument '--sideways': unknown flag"
        );
    }

    #[test]
    fn conflict_lists_all_paths() {
        let err = TransitionError::MergeConflict {
            paths: vec!["a.txt".into(), "b.txt".into()],
        };
        assert_eq!(err.to_string(), "merge conflict in: a.txt, b.txt");
        assert_eq!(err.code(), "merge_conflict");
    }

    #[test]
    fn only_invariant_errors_are_fatal() {
        assert!(!TransitionError::NothingToCommit.is_fatal());
        let fatal: TransitionError =
            InvariantViolation::DanglingHead(CommitId::from("abc")).into();
        assert!(fatal.is_fatal());
    }
}
