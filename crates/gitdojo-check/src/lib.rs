//! Goal validation for gitdojo practices.
//!
//! A learner's [`RepoState`](gitdojo_core::RepoState) is graded against an
//! instructor goal with an ordered list of [`ValidationRule`]s. Practices are
//! authored as YAML and compiled once into their starting and goal states.

pub mod engine;
pub mod practice;
pub mod rule;
pub mod shape;

pub use engine::{command_matches, default_rules, validate, RuleResult, Verdict};
pub use practice::{
    load_dir, load_practice, parse_practice, replay, CompiledPractice, ExpectedCommand, Goal,
    Practice,
};
pub use rule::{RuleError, RuleSpec, ValidationRule};
