//! Typed operations produced by the command interpreter.
//!
//! Operations are plain data. Adding a subcommand means adding a variant here
//! and one arm in [`crate::apply::apply`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Init {
        initial_branch: Option<String>,
    },
    /// `git add`; `all` stages every pending edit.
    Add {
        pathspecs: Vec<String>,
        all: bool,
    },
    /// `git rm`: stage deletions.
    Remove {
        paths: Vec<String>,
    },
    /// `git restore`: discard unstaged edits, or unstage with `staged`.
    Restore {
        paths: Vec<String>,
        staged: bool,
    },
    Commit(CommitArgs),
    Branch(BranchOp),
    Checkout {
        target: String,
        mode: CheckoutMode,
    },
    Merge(MergeOp),
    Reset {
        target: Option<String>,
        mode: ResetMode,
    },
    Log {
        target: Option<String>,
        limit: Option<usize>,
        oneline: bool,
    },
    Status,
    /// Shell `touch`.
    Touch {
        paths: Vec<String>,
    },
    /// Shell `echo text > path` / `>>`.
    WriteFile {
        path: String,
        text: String,
        append: bool,
    },
    /// Shell `rm`.
    DeleteFile {
        paths: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitArgs {
    pub message: Option<String>,
    pub all: bool,
    pub amend: bool,
    pub allow_empty: bool,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BranchOp {
    List,
    Create {
        name: String,
        start: Option<String>,
    },
    Delete {
        name: String,
        force: bool,
    },
    Rename {
        from: Option<String>,
        to: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CheckoutMode {
    /// `checkout <ref>`: branch attaches, anything else detaches.
    Any,
    /// `switch <branch>`: only branches.
    BranchOnly,
    /// `--detach <ref>`.
    Detach,
    /// `-b/-c` (or `-B/-C` with `force`): create `target` and attach to it.
    Create { start: Option<String>, force: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FastForward {
    #[default]
    Allow,
    Never,
    Only,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MergeOp {
    Start {
        source: String,
        ff: FastForward,
        commit: bool,
        message: Option<String>,
    },
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    Soft,
    #[default]
    Mixed,
    Hard,
}

impl Operation {
    /// Subcommand name, as typed.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Init { .. } => "init",
            Operation::Add { .. } => "add",
            Operation::Remove { .. } => "rm",
            Operation::Restore { .. } => "restore",
            Operation::Commit(_) => "commit",
            Operation::Branch(_) => "branch",
            Operation::Checkout { .. } => "checkout",
            Operation::Merge(_) => "merge",
            Operation::Reset { .. } => "reset",
            Operation::Log { .. } => "log",
            Operation::Status => "status",
            Operation::Touch { .. } => "touch",
            Operation::WriteFile { .. } => "echo",
            Operation::DeleteFile { .. } => "rm",
        }
    }

    /// True for operations that never change the state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Operation::Log { .. } | Operation::Status | Operation::Branch(BranchOp::List)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_serialize_with_tag() {
        let op = Operation::Reset {
            target: Some("HEAD~1".into()),
            mode: ResetMode::Hard,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "reset");
        assert_eq!(json["mode"], "hard");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn read_only_classification() {
        assert!(Operation::Status.is_read_only());
        assert!(Operation::Branch(BranchOp::List).is_read_only());
        assert!(!Operation::Commit(CommitArgs::default()).is_read_only());
    }
}
