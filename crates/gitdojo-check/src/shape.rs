//! Structural commit signatures.
//!
//! A commit's shape is a hash over its parents' shapes, in parent order, and
//! nothing else. Two histories built with different messages, authors or
//! file contents but the same branching structure have equal shapes, which
//! is what lets a learner's state be compared with an instructor's goal.

use gitdojo_core::digest::shape_hash;
use gitdojo_core::graph;
use gitdojo_core::{CommitId, RepoState};
use std::collections::HashMap;

/// Shape of every commit in `state`.
pub fn commit_shapes(state: &RepoState) -> HashMap<CommitId, String> {
    let mut shapes: HashMap<CommitId, String> = HashMap::with_capacity(state.commits().len());

    for root in state.commits().keys() {
        // Post-order walk: a commit is hashed once all of its parents are.
        let mut stack = vec![(root.clone(), false)];
        while let Some((id, expanded)) = stack.pop() {
            if shapes.contains_key(&id) {
                continue;
            }
            let Some(commit) = state.commit(&id) else {
                continue;
            };
            if expanded {
                let parents: Vec<String> = commit
                    .parents
                    .iter()
                    .filter_map(|p| shapes.get(p).cloned())
                    .collect();
                shapes.insert(id, shape_hash(&parents));
            } else {
                stack.push((id.clone(), true));
                for parent in &commit.parents {
                    if !shapes.contains_key(parent) {
                        stack.push((parent.clone(), false));
                    }
                }
            }
        }
    }
    shapes
}

/// Sorted shapes of every reachable commit; equal signatures mean equal DAG shape.
pub fn dag_signature(state: &RepoState, shapes: &HashMap<CommitId, String>) -> Vec<String> {
    let mut sig: Vec<String> = graph::reachable(state)
        .iter()
        .filter_map(|id| shapes.get(id).cloned())
        .collect();
    sig.sort();
    sig
}

/// Short human description of a history, for verdict diagnostics.
pub fn describe(state: &RepoState) -> String {
    let reachable = graph::reachable(state);
    let merges = reachable
        .iter()
        .filter_map(|id| state.commit(id))
        .filter(|c| c.is_merge())
        .count();
    let branches: Vec<&str> = state.branches().keys().map(String::as_str).collect();
    let commits = match reachable.len() {
        1 => "1 commit".to_string(),
        n => format!("{n} commits"),
    };
    let merges = match merges {
        0 => String::new(),
        1 => ", 1 merge".to_string(),
        n => format!(", {n} merges"),
    };
    if branches.is_empty() {
        format!("{commits}{merges}, no branches")
    } else {
        format!("{commits}{merges}, branches: {}", branches.join(", "))
    }
}
