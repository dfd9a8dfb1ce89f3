//! Read-only walks over the commit DAG.

use crate::state::{Commit, CommitId, RepoState, Tree};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Every commit reachable from `start`, including `start`.
pub fn ancestors(state: &RepoState, start: &CommitId) -> HashSet<CommitId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start.clone()]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(commit) = state.commit(&id) {
            queue.extend(commit.parents.iter().cloned());
        }
    }
    seen
}

/// True when `ancestor` is reachable from `descendant` (a commit is its own ancestor).
pub fn is_ancestor(state: &RepoState, ancestor: &CommitId, descendant: &CommitId) -> bool {
    ancestor == descendant || ancestors(state, descendant).contains(ancestor)
}

/// Breadth-first join over both histories. Each round expands one level on
/// each side, parents in order; the first commit seen from both sides wins.
pub fn merge_base(state: &RepoState, a: &CommitId, b: &CommitId) -> Option<CommitId> {
    if a == b {
        return Some(a.clone());
    }
    let mut seen_a = HashSet::from([a.clone()]);
    let mut seen_b = HashSet::from([b.clone()]);
    let mut frontier_a = vec![a.clone()];
    let mut frontier_b = vec![b.clone()];

    while !frontier_a.is_empty() || !frontier_b.is_empty() {
        if let Some(hit) = expand(state, &mut frontier_a, &mut seen_a, &seen_b) {
            return Some(hit);
        }
        if let Some(hit) = expand(state, &mut frontier_b, &mut seen_b, &seen_a) {
            return Some(hit);
        }
    }
    None
}

fn expand(
    state: &RepoState,
    frontier: &mut Vec<CommitId>,
    seen: &mut HashSet<CommitId>,
    other: &HashSet<CommitId>,
) -> Option<CommitId> {
    let mut next = Vec::new();
    for id in frontier.drain(..) {
        let Some(commit) = state.commit(&id) else {
            continue;
        };
        for parent in &commit.parents {
            if other.contains(parent) {
                return Some(parent.clone());
            }
            if seen.insert(parent.clone()) {
                next.push(parent.clone());
            }
        }
    }
    *frontier = next;
    None
}

/// Ancestry of `start`, most recent first (logical timestamp, then id).
pub fn log<'a>(state: &'a RepoState, start: &CommitId) -> Vec<&'a Commit> {
    let mut commits: Vec<&Commit> = ancestors(state, start)
        .iter()
        .filter_map(|id| state.commit(id))
        .collect();
    commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    commits
}

/// Commits reachable from any branch, HEAD or an in-progress merge.
pub fn reachable(state: &RepoState) -> BTreeSet<CommitId> {
    let mut roots: Vec<&CommitId> = state.branches().values().collect();
    roots.extend(state.head_commit_id());
    roots.extend(state.merge_head());

    let mut out = BTreeSet::new();
    for root in roots {
        if out.contains(root) {
            continue;
        }
        out.extend(ancestors(state, root));
    }
    out
}

/// Three-way tree merge. A path changed on both sides to different results
/// is a conflict; all conflicting paths are returned, sorted.
pub fn three_way(base: &Tree, ours: &Tree, theirs: &Tree) -> Result<Tree, Vec<String>> {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut merged = Tree::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let result = if o == t || t == b {
            o
        } else if o == b {
            t
        } else {
            conflicts.push(path.clone());
            continue;
        };
        if let Some(blob) = result {
            merged.insert(path.clone(), blob.clone());
        }
    }

    if conflicts.is_empty() {
        Ok(merged)
    } else {
        Err(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apply, parse};

    fn run(lines: &[&str]) -> RepoState {
        let mut state = RepoState::default();
        for line in lines {
            let op = parse(line).unwrap();
            state = apply(&state, &op)
                .unwrap_or_else(|e| panic!("{line}: {e}"))
                .state;
        }
        state
    }

    fn tree(pairs: &[(&str, &str)]) -> Tree {
        pairs
            .iter()
            .map(|(p, b)| (p.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn merge_base_of_diverged_branches() {
        let s = run(&[
            "touch a",
            "git add a",
            "git commit -m base",
            "git branch feature",
            "git add b",
            "git commit -m main-work",
            "git checkout feature",
            "git add c",
            "git commit -m feature-work",
        ]);
        let main = s.branch("main").unwrap();
        let feature = s.branch("feature").unwrap();
        let base = merge_base(&s, main, feature).unwrap();
        assert_eq!(s.commit(&base).unwrap().message, "base");
        assert_eq!(merge_base(&s, feature, main), Some(base));
    }

    #[test]
    fn merge_base_with_ancestor_is_the_ancestor() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git add b",
            "git commit -m two",
        ]);
        let head = s.head_commit_id().unwrap();
        let first = s.resolve("HEAD~1").unwrap();
        assert_eq!(merge_base(&s, head, &first), Some(first.clone()));
        assert!(is_ancestor(&s, &first, head));
        assert!(!is_ancestor(&s, head, &first));
    }

    #[test]
    fn log_is_newest_first() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git add b",
            "git commit -m two",
            "git add c",
            "git commit -m three",
        ]);
        let msgs: Vec<&str> = log(&s, s.head_commit_id().unwrap())
            .iter()
            .map(|c| c.message.as_str())
            .collect();
        assert_eq!(msgs, vec!["three", "two", "one"]);
    }

    #[test]
    fn reachable_ignores_orphaned_commits() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git add b",
            "git commit -m two",
            "git reset --hard HEAD~1",
        ]);
        assert_eq!(s.commits().len(), 2);
        assert_eq!(reachable(&s).len(), 1);
    }

    #[test]
    fn three_way_takes_one_sided_changes() {
        let base = tree(&[("a", "1"), ("b", "1"), ("gone", "1")]);
        let ours = tree(&[("a", "2"), ("b", "1"), ("gone", "1")]);
        let theirs = tree(&[("a", "1"), ("b", "3"), ("new", "1")]);
        let merged = three_way(&base, &ours, &theirs).unwrap();
        assert_eq!(merged, tree(&[("a", "2"), ("b", "3"), ("new", "1")]));
    }

    #[test]
    fn three_way_reports_every_conflict() {
        let base = tree(&[("a", "1"), ("b", "1")]);
        let ours = tree(&[("a", "2"), ("b", "2")]);
        let theirs = tree(&[("a", "3"), ("c", "1")]);
        assert_eq!(
            three_way(&base, &ours, &theirs).unwrap_err(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn identical_changes_do_not_conflict() {
        let base = tree(&[]);
        let both = tree(&[("a", "x")]);
        assert_eq!(three_way(&base, &both, &both).unwrap(), both);
    }
}
