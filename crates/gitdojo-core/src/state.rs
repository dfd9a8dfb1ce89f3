//! Repository state model.
//!
//! A [`RepoState`] is an immutable value: fields are readable through
//! accessors and only the transition engine (inside this crate) builds new
//! states. Two states with identical commits, branches, HEAD and working
//! tree compare equal. Serialization round-trips through plain JSON, and
//! deserialization re-checks every invariant before a state is handed out.

use crate::digest::{blob_hash, commit_hash};
use crate::error::InvariantViolation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Name HEAD is attached to in a brand-new repository.
pub const DEFAULT_BRANCH: &str = "main";

/// Commit author used when a command does not name one.
pub const DEFAULT_AUTHOR: &str = "Learner <learner@gitdojo.local>";

/// Content-derived commit id (64 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form shown in terminal output.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(7)]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Path → blob id.
pub type Tree = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub author: String,
    /// Logical clock value at creation; strictly increasing within a state.
    pub timestamp: u64,
    pub message: String,
    pub tree: Tree,
}

#[derive(Serialize)]
struct CommitBody<'a> {
    parents: &'a [CommitId],
    author: &'a str,
    timestamp: u64,
    message: &'a str,
    tree: &'a Tree,
}

impl Commit {
    pub(crate) fn new(
        parents: Vec<CommitId>,
        author: &str,
        timestamp: u64,
        message: &str,
        tree: Tree,
    ) -> Self {
        let id = Self::compute_id(&parents, author, timestamp, message, &tree);
        Self {
            id,
            parents,
            author: author.to_string(),
            timestamp,
            message: message.to_string(),
            tree,
        }
    }

    fn compute_id(
        parents: &[CommitId],
        author: &str,
        timestamp: u64,
        message: &str,
        tree: &Tree,
    ) -> CommitId {
        CommitId(commit_hash(&CommitBody {
            parents,
            author,
            timestamp,
            message,
            tree,
        }))
    }

    fn recomputed_id(&self) -> CommitId {
        Self::compute_id(
            &self.parents,
            &self.author,
            self.timestamp,
            &self.message,
            &self.tree,
        )
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Head {
    /// HEAD follows a branch, which may not exist yet (unborn).
    Attached(String),
    Detached(CommitId),
}

/// One uncommitted edit. `content: None` means the path is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkEntry {
    pub content: Option<String>,
    pub staged: bool,
}

/// Uncommitted edits relative to the HEAD tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkingTree {
    entries: BTreeMap<String, WorkEntry>,
}

impl WorkingTree {
    pub fn get(&self, path: &str) -> Option<&WorkEntry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &WorkEntry)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_staged(&self) -> bool {
        self.entries.values().any(|e| e.staged)
    }

    pub fn staged(&self) -> impl Iterator<Item = (&String, &WorkEntry)> {
        self.entries.iter().filter(|(_, e)| e.staged)
    }

    pub fn unstaged(&self) -> impl Iterator<Item = (&String, &WorkEntry)> {
        self.entries.iter().filter(|(_, e)| !e.staged)
    }

    pub(crate) fn get_mut(&mut self, path: &str) -> Option<&mut WorkEntry> {
        self.entries.get_mut(path)
    }

    pub(crate) fn insert(&mut self, path: String, entry: WorkEntry) {
        self.entries.insert(path, entry);
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<WorkEntry> {
        self.entries.remove(path)
    }

    pub(crate) fn retain(&mut self, f: impl FnMut(&String, &mut WorkEntry) -> bool) {
        self.entries.retain(f);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// The aggregate repository value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRepoState")]
pub struct RepoState {
    pub(crate) commits: BTreeMap<CommitId, Commit>,
    pub(crate) blobs: BTreeMap<String, String>,
    pub(crate) branches: BTreeMap<String, CommitId>,
    pub(crate) head: Head,
    pub(crate) working_tree: WorkingTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) merge_head: Option<CommitId>,
    pub(crate) clock: u64,
}

/// Unchecked wire form; becomes a [`RepoState`] only after invariant checks.
#[derive(Deserialize)]
struct RawRepoState {
    #[serde(default)]
    commits: BTreeMap<CommitId, Commit>,
    #[serde(default)]
    blobs: BTreeMap<String, String>,
    #[serde(default)]
    branches: BTreeMap<String, CommitId>,
    head: Head,
    #[serde(default)]
    working_tree: WorkingTree,
    #[serde(default)]
    merge_head: Option<CommitId>,
    #[serde(default)]
    clock: u64,
}

impl TryFrom<RawRepoState> for RepoState {
    type Error = InvariantViolation;

    fn try_from(raw: RawRepoState) -> Result<Self, Self::Error> {
        let state = RepoState {
            commits: raw.commits,
            blobs: raw.blobs,
            branches: raw.branches,
            head: raw.head,
            working_tree: raw.working_tree,
            merge_head: raw.merge_head,
            clock: raw.clock,
        };
        state.check_invariants()?;
        Ok(state)
    }
}

impl RepoState {
    /// Decode a stored state. Malformed JSON is the outer error; a
    /// well-formed state that breaks an invariant is the inner one.
    pub fn from_json(json: &str) -> Result<Result<Self, InvariantViolation>, serde_json::Error> {
        let raw: RawRepoState = serde_json::from_str(json)?;
        Ok(RepoState::try_from(raw))
    }
}

impl Default for RepoState {
    fn default() -> Self {
        Self::new(DEFAULT_BRANCH)
    }
}

impl RepoState {
    /// Empty repository with HEAD attached to an unborn `default_branch`.
    pub fn new(default_branch: &str) -> Self {
        Self {
            commits: BTreeMap::new(),
            blobs: BTreeMap::new(),
            branches: BTreeMap::new(),
            head: Head::Attached(default_branch.to_string()),
            working_tree: WorkingTree::default(),
            merge_head: None,
            clock: 0,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn commits(&self) -> &BTreeMap<CommitId, Commit> {
        &self.commits
    }

    pub fn commit(&self, id: &CommitId) -> Option<&Commit> {
        self.commits.get(id)
    }

    pub fn branches(&self) -> &BTreeMap<String, CommitId> {
        &self.branches
    }

    pub fn branch(&self, name: &str) -> Option<&CommitId> {
        self.branches.get(name)
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn working_tree(&self) -> &WorkingTree {
        &self.working_tree
    }

    pub fn merge_head(&self) -> Option<&CommitId> {
        self.merge_head.as_ref()
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn blob(&self, id: &str) -> Option<&str> {
        self.blobs.get(id).map(String::as_str)
    }

    /// Branch HEAD is attached to, whether or not it has commits.
    pub fn current_branch(&self) -> Option<&str> {
        match &self.head {
            Head::Attached(name) => Some(name),
            Head::Detached(_) => None,
        }
    }

    /// Commit HEAD resolves to; `None` on an unborn branch.
    pub fn head_commit_id(&self) -> Option<&CommitId> {
        match &self.head {
            Head::Attached(name) => self.branches.get(name),
            Head::Detached(id) => Some(id),
        }
    }

    pub fn head_commit(&self) -> Option<&Commit> {
        self.head_commit_id().and_then(|id| self.commits.get(id))
    }

    pub fn is_unborn(&self) -> bool {
        self.head_commit_id().is_none()
    }

    /// Tree of the HEAD commit; empty on an unborn branch.
    pub fn head_tree(&self) -> Tree {
        self.head_commit()
            .map(|c| c.tree.clone())
            .unwrap_or_default()
    }

    /// Content of `path` in the HEAD commit.
    pub fn committed_content(&self, path: &str) -> Option<&str> {
        let commit = self.head_commit()?;
        let blob = commit.tree.get(path)?;
        self.blob(blob)
    }

    /// Content of `path` as the learner currently sees it (edits applied).
    pub fn file_content(&self, path: &str) -> Option<&str> {
        match self.working_tree.get(path) {
            Some(entry) => entry.content.as_deref(),
            None => self.committed_content(path),
        }
    }

    /// True when there are no pending edits and no merge in progress.
    pub fn is_clean(&self) -> bool {
        self.working_tree.is_empty() && self.merge_head.is_none()
    }

    // ── Revision resolution ─────────────────────────────────────────

    /// Resolve a revision: `HEAD`/`@`, a branch name, a full id or a unique
    /// id prefix (4+ hex chars), optionally followed by `~N`, `^` or `^N`.
    pub fn resolve(&self, rev: &str) -> Option<CommitId> {
        let split = rev.find(['~', '^']).unwrap_or(rev.len());
        let (base, mut suffix) = rev.split_at(split);
        let mut id = self.resolve_base(base)?;

        loop {
            let mut chars = suffix.chars();
            let Some(op) = chars.next() else { break };
            if op != '~' && op != '^' {
                return None;
            }
            suffix = chars.as_str();
            let digits = suffix
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(suffix.len());
            let (n, rest) = suffix.split_at(digits);
            suffix = rest;
            let n: usize = if n.is_empty() { 1 } else { n.parse().ok()? };
            let commit = self.commits.get(&id)?;
            id = match op {
                '~' => {
                    let mut cur = commit;
                    for _ in 0..n {
                        let parent = cur.parents.first()?;
                        cur = self.commits.get(parent)?;
                    }
                    cur.id.clone()
                }
                '^' if n == 0 => id,
                '^' => commit.parents.get(n - 1)?.clone(),
                _ => return None,
            };
        }
        Some(id)
    }

    fn resolve_base(&self, base: &str) -> Option<CommitId> {
        if base == "HEAD" || base == "@" {
            return self.head_commit_id().cloned();
        }
        if let Some(id) = self.branches.get(base) {
            return Some(id.clone());
        }
        if base.len() < 4 || !base.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let needle = base.to_ascii_lowercase();
        let mut matches = self
            .commits
            .range(CommitId(needle.clone())..)
            .take_while(|(id, _)| id.0.starts_with(&needle));
        let first = matches.next()?;
        if matches.next().is_some() {
            return None; // ambiguous
        }
        Some(first.0.clone())
    }

    // ── Invariants ──────────────────────────────────────────────────

    /// Verify referential closure, content addressing and acyclicity.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (key, blob) in &self.blobs {
            let computed = blob_hash(blob);
            if *key != computed {
                return Err(InvariantViolation::BlobIdMismatch {
                    key: key.clone(),
                    computed,
                });
            }
        }

        for (key, commit) in &self.commits {
            let computed = commit.recomputed_id();
            if *key != commit.id || computed != commit.id {
                return Err(InvariantViolation::CommitIdMismatch {
                    key: key.clone(),
                    computed,
                });
            }
            if commit.parents.len() > 2 {
                return Err(InvariantViolation::TooManyParents {
                    commit: key.clone(),
                    count: commit.parents.len(),
                });
            }
            for parent in &commit.parents {
                if !self.commits.contains_key(parent) {
                    return Err(InvariantViolation::MissingParent {
                        commit: key.clone(),
                        parent: parent.clone(),
                    });
                }
            }
            for (path, blob) in &commit.tree {
                if !self.blobs.contains_key(blob) {
                    return Err(InvariantViolation::MissingBlob {
                        commit: key.clone(),
                        path: path.clone(),
                        blob: blob.clone(),
                    });
                }
            }
        }

        for (branch, commit) in &self.branches {
            if !self.commits.contains_key(commit) {
                return Err(InvariantViolation::DanglingBranch {
                    branch: branch.clone(),
                    commit: commit.clone(),
                });
            }
        }
        if let Head::Detached(id) = &self.head {
            if !self.commits.contains_key(id) {
                return Err(InvariantViolation::DanglingHead(id.clone()));
            }
        }
        if let Some(id) = &self.merge_head {
            if !self.commits.contains_key(id) {
                return Err(InvariantViolation::DanglingMergeHead(id.clone()));
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), InvariantViolation> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&CommitId, Mark> = HashMap::with_capacity(self.commits.len());

        for root in self.commits.keys() {
            if marks.contains_key(root) {
                continue;
            }
            // (node, index of next parent to visit)
            let mut stack: Vec<(&CommitId, usize)> = vec![(root, 0)];
            marks.insert(root, Mark::Visiting);
            while let Some((node, next)) = stack.pop() {
                let parents = self
                    .commits
                    .get(node)
                    .map(|c| c.parents.as_slice())
                    .unwrap_or(&[]);
                if let Some(parent) = parents.get(next) {
                    stack.push((node, next + 1));
                    match marks.get(parent) {
                        Some(Mark::Visiting) => {
                            return Err(InvariantViolation::Cycle(parent.clone()))
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(parent, Mark::Visiting);
                            stack.push((parent, 0));
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                }
            }
        }
        Ok(())
    }
}
