//! Simulated Git repository: state model, command interpreter and transition engine.

pub mod apply;
pub mod digest;
pub mod error;
pub mod graph;
pub mod op;
pub mod parse;
pub mod state;

pub use apply::{apply, status, ChangeKind, FileChange, LogEntry, Outcome, Output, StatusReport};
pub use error::{InvariantViolation, ParseError, TransitionError};
pub use op::{BranchOp, CheckoutMode, CommitArgs, FastForward, MergeOp, Operation, ResetMode};
pub use parse::{parse, tokenize, validate_branch_name};
pub use state::{
    Commit, CommitId, Head, RepoState, Tree, WorkEntry, WorkingTree, DEFAULT_AUTHOR, DEFAULT_BRANCH,
};
