//! Execution facade.
//!
//! Ties the interpreter, transition engine, validator and snapshot store
//! together behind one request/response contract. Every call on a
//! `(learner, practice)` pair is serialized, so a validate always grades the
//! most recently persisted state.

pub mod error;
pub mod event;
pub mod executor;
pub mod response;

pub use error::SessionError;
pub use event::{EventKind, StateEvent};
pub use executor::{Executor, DEFAULT_SAVE_ATTEMPTS};
pub use response::{CommandError, ErrorKind, ExecResponse, PracticeSummary, SessionView};
