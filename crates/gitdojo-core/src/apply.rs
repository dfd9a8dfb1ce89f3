//! State transition engine.
//!
//! [`apply`] is the single dispatch point: one exhaustive match over
//! [`Operation`]. It works on a clone of the input, so a rejected operation
//! leaves the caller's state untouched, and re-checks the invariants after
//! every state-changing operation.

use crate::digest::blob_hash;
use crate::error::TransitionError;
use crate::graph;
use crate::op::{BranchOp, CheckoutMode, CommitArgs, FastForward, MergeOp, Operation, ResetMode};
use crate::state::{Commit, CommitId, Head, RepoState, Tree, WorkEntry, DEFAULT_AUTHOR};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Result of a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: RepoState,
    pub output: Output,
}

/// Terminal feedback of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Output {
    Message {
        lines: Vec<String>,
    },
    Log {
        entries: Vec<LogEntry>,
        oneline: bool,
    },
    Status(StatusReport),
    Branches {
        current: Option<String>,
        detached_at: Option<CommitId>,
        names: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub author: String,
    pub timestamp: u64,
    pub message: String,
    /// Decorations such as `HEAD -> main` or `feature`.
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub branch: Option<String>,
    pub detached_at: Option<CommitId>,
    pub unborn: bool,
    pub merging: bool,
    pub staged: Vec<FileChange>,
    pub unstaged: Vec<FileChange>,
    pub untracked: Vec<String>,
}

impl Output {
    fn lines(lines: impl IntoIterator<Item = String>) -> Self {
        Output::Message {
            lines: lines.into_iter().collect(),
        }
    }

    fn line(line: impl Into<String>) -> Self {
        Output::Message {
            lines: vec![line.into()],
        }
    }

    fn silent() -> Self {
        Output::Message { lines: Vec::new() }
    }

    /// Render as terminal lines.
    pub fn render(&self) -> Vec<String> {
        match self {
            Output::Message { lines } => lines.clone(),
            Output::Log { entries, oneline } => render_log(entries, *oneline),
            Output::Status(report) => report.render(),
            Output::Branches {
                current,
                detached_at,
                names,
            } => {
                let mut out = Vec::with_capacity(names.len() + 1);
                if let Some(id) = detached_at {
                    out.push(format!("* (HEAD detached at {})", id.short()));
                }
                for name in names {
                    let marker = if current.as_deref() == Some(name.as_str()) { '*' } else { ' ' };
                    out.push(format!("{marker} {name}"));
                }
                out
            }
        }
    }
}

fn render_log(entries: &[LogEntry], oneline: bool) -> Vec<String> {
    let mut out = Vec::new();
    for e in entries {
        let refs = if e.refs.is_empty() {
            String::new()
        } else {
            format!(" ({})", e.refs.join(", "))
        };
        if oneline {
            let summary = e.message.lines().next().unwrap_or("");
            out.push(format!("{}{refs} {summary}", e.id.short()));
            continue;
        }
        out.push(format!("commit {}{refs}", e.id));
        if e.parents.len() > 1 {
            let shorts: Vec<&str> = e.parents.iter().map(CommitId::short).collect();
            out.push(format!("Merge: {}", shorts.join(" ")));
        }
        out.push(format!("Author: {}", e.author));
        out.push(format!("Date:   tick {}", e.timestamp));
        out.push(String::new());
        out.extend(e.message.lines().map(|l| format!("    {l}")));
        out.push(String::new());
    }
    out
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        !self.merging && self.staged.is_empty() && self.unstaged.is_empty() && self.untracked.is_empty()
    }

    pub fn render(&self) -> Vec<String> {
        let mut out = Vec::new();
        match (&self.branch, &self.detached_at) {
            (_, Some(id)) => out.push(format!("HEAD detached at {}", id.short())),
            (Some(name), None) => out.push(format!("On branch {name}")),
            (None, None) => {}
        }
        if self.unborn {
            out.push(String::new());
            out.push("No commits yet".into());
        }
        if self.merging {
            out.push(String::new());
            out.push("All conflicts fixed but you are still merging.".into());
            out.push("  (use \"git commit\" to conclude merge)".into());
        }
        let section = |out: &mut Vec<String>, title: &str, changes: &[FileChange]| {
            if changes.is_empty() {
                return;
            }
            out.push(String::new());
            out.push(title.to_string());
            for c in changes {
                let label = match c.change {
                    ChangeKind::Added => "new file:",
                    ChangeKind::Modified => "modified:",
                    ChangeKind::Deleted => "deleted: ",
                };
                out.push(format!("\t{label}   {}", c.path));
            }
        };
        section(&mut out, "Changes to be committed:", &self.staged);
        section(&mut out, "Changes not staged for commit:", &self.unstaged);
        if !self.untracked.is_empty() {
            out.push(String::new());
            out.push("Untracked files:".into());
            out.extend(self.untracked.iter().map(|p| format!("\t{p}")));
        }
        if self.is_clean() {
            out.push(String::new());
            out.push(if self.unborn {
                "nothing to commit (create/copy files and use \"git add\" to track)".into()
            } else {
                "nothing to commit, working tree clean".into()
            });
        }
        out
    }
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Apply `op` to `state`, returning the successor state and terminal output.
pub fn apply(state: &RepoState, op: &Operation) -> Result<Outcome, TransitionError> {
    let mut next = state.clone();
    let output = match op {
        Operation::Init { initial_branch } => init(&mut next, initial_branch.as_deref()),
        Operation::Add { pathspecs, all } => add(&mut next, pathspecs, *all)?,
        Operation::Remove { paths } => remove(&mut next, paths)?,
        Operation::Restore { paths, staged } => restore(&mut next, paths, *staged)?,
        Operation::Commit(args) => commit(&mut next, args)?,
        Operation::Branch(branch_op) => branch(&mut next, branch_op)?,
        Operation::Checkout { target, mode } => checkout(&mut next, target, mode)?,
        Operation::Merge(MergeOp::Start {
            source,
            ff,
            commit,
            message,
        }) => merge(&mut next, source, *ff, *commit, message.as_deref())?,
        Operation::Merge(MergeOp::Abort) => merge_abort(&mut next)?,
        Operation::Reset { target, mode } => reset(&mut next, target.as_deref(), *mode)?,
        Operation::Log {
            target,
            limit,
            oneline,
        } => log(&next, target.as_deref(), *limit, *oneline)?,
        Operation::Status => Output::Status(status(&next)),
        Operation::Touch { paths } => touch(&mut next, paths),
        Operation::WriteFile { path, text, append } => write_file(&mut next, path, text, *append),
        Operation::DeleteFile { paths } => delete_files(&mut next, paths)?,
    };

    if !op.is_read_only() {
        if let Err(violation) = next.check_invariants() {
            tracing::error!(op = op.name(), %violation, "invariant violated after transition");
            return Err(violation.into());
        }
    }
    tracing::debug!(op = op.name(), clock = next.clock, "operation applied");
    Ok(Outcome {
        state: next,
        output,
    })
}

// ── Working-tree helpers ────────────────────────────────────────────

/// Record `content` for `path`; an entry equal to HEAD's content is dropped.
fn set_entry(state: &mut RepoState, path: &str, content: Option<String>, staged: bool) {
    if state.committed_content(path) == content.as_deref() {
        state.working_tree.remove(path);
    } else {
        state
            .working_tree
            .insert(path.to_string(), WorkEntry { content, staged });
    }
}

/// Drop entries that match HEAD after HEAD moved.
fn normalize_entries(state: &mut RepoState) {
    let tree = state.head_tree();
    let blobs = &state.blobs;
    state.working_tree.retain(|path, entry| {
        let committed = tree.get(path).and_then(|b| blobs.get(b)).map(String::as_str);
        committed != entry.content.as_deref()
    });
}

fn store_blob(state: &mut RepoState, content: &str) -> String {
    let id = blob_hash(content);
    state
        .blobs
        .entry(id.clone())
        .or_insert_with(|| content.to_string());
    id
}

/// HEAD tree with every staged entry applied, storing new blobs.
fn staged_tree(state: &mut RepoState, mut tree: Tree) -> Tree {
    let staged: Vec<(String, Option<String>)> = state
        .working_tree
        .staged()
        .map(|(p, e)| (p.clone(), e.content.clone()))
        .collect();
    for (path, content) in staged {
        match content {
            Some(c) => {
                let blob = store_blob(state, &c);
                tree.insert(path, blob);
            }
            None => {
                tree.remove(&path);
            }
        }
    }
    tree
}

fn tree_of(state: &RepoState, id: Option<&CommitId>) -> Tree {
    id.and_then(|id| state.commit(id))
        .map(|c| c.tree.clone())
        .unwrap_or_default()
}

fn changed_paths(a: &Tree, b: &Tree) -> BTreeSet<String> {
    a.keys()
        .chain(b.keys())
        .filter(|p| a.get(*p) != b.get(*p))
        .cloned()
        .collect()
}

/// Refuse to move HEAD if a pending edit sits on a path the move would change.
fn check_overwrite(state: &RepoState, target: &Tree) -> Result<(), TransitionError> {
    let current = state.head_tree();
    let paths: Vec<String> = state
        .working_tree
        .paths()
        .filter(|p| current.get(*p) != target.get(*p))
        .cloned()
        .collect();
    if paths.is_empty() {
        Ok(())
    } else {
        Err(TransitionError::LocalChangesWouldBeOverwritten { paths })
    }
}

fn move_head_to(state: &mut RepoState, id: CommitId) {
    match &state.head {
        Head::Attached(name) => {
            state.branches.insert(name.clone(), id);
        }
        Head::Detached(_) => state.head = Head::Detached(id),
    }
}

fn head_label(state: &RepoState) -> String {
    match &state.head {
        Head::Attached(name) => name.clone(),
        Head::Detached(_) => "HEAD".to_string(),
    }
}

fn resolve(state: &RepoState, rev: &str) -> Result<CommitId, TransitionError> {
    state
        .resolve(rev)
        .ok_or_else(|| TransitionError::UnknownRef(rev.to_string()))
}

fn head_or_unborn(state: &RepoState) -> Result<CommitId, TransitionError> {
    state
        .head_commit_id()
        .cloned()
        .ok_or_else(|| TransitionError::NoCommitsYet(head_label(state)))
}

fn files_changed_line(n: usize) -> String {
    match n {
        1 => " 1 file changed".to_string(),
        n => format!(" {n} files changed"),
    }
}

// ── Operations ──────────────────────────────────────────────────────

fn init(state: &mut RepoState, initial_branch: Option<&str>) -> Output {
    if state.commits.is_empty() && state.branches.is_empty() {
        if let Some(name) = initial_branch {
            state.head = Head::Attached(name.to_string());
        }
        return Output::line(format!(
            "Initialized empty Git repository on branch '{}'",
            head_label(state)
        ));
    }
    let mut lines = Vec::new();
    if initial_branch.is_some() {
        lines.push("warning: re-init: ignored --initial-branch".to_string());
    }
    lines.push("Reinitialized existing Git repository".to_string());
    Output::lines(lines)
}

fn simulated_content(path: &str, clock: u64) -> String {
    format!("{path} (revision {})\n", clock + 1)
}

fn is_glob(spec: &str) -> bool {
    spec.contains(['*', '?', '['])
}

/// Paths a pathspec selects among `candidates`: exact, directory prefix, or glob.
fn match_pathspec<'a>(
    spec: &str,
    candidates: &'a BTreeSet<String>,
) -> Result<Vec<&'a String>, TransitionError> {
    if is_glob(spec) {
        let matcher = Glob::new(spec)
            .map_err(|_| TransitionError::PathspecNoMatch(spec.to_string()))?
            .compile_matcher();
        return Ok(candidates.iter().filter(|p| matcher.is_match(p.as_str())).collect());
    }
    let dir = format!("{}/", spec.trim_end_matches('/'));
    Ok(candidates
        .iter()
        .filter(|p| p.as_str() == spec || p.starts_with(&dir))
        .collect())
}

fn add(state: &mut RepoState, pathspecs: &[String], all: bool) -> Result<Output, TransitionError> {
    if all {
        state.working_tree.retain(|_, e| {
            e.staged = true;
            true
        });
        return Ok(Output::silent());
    }

    let mut candidates: BTreeSet<String> = state.head_tree().into_keys().collect();
    candidates.extend(state.working_tree.paths().cloned());

    let mut to_stage = BTreeSet::new();
    let mut to_simulate = BTreeSet::new();
    for spec in pathspecs {
        let matched = match_pathspec(spec, &candidates)?;
        if matched.is_empty() {
            if is_glob(spec) {
                return Err(TransitionError::PathspecNoMatch(spec.clone()));
            }
            to_simulate.insert(spec.clone());
            continue;
        }
        for path in matched {
            if state.working_tree.get(path).is_some() {
                to_stage.insert(path.clone());
            } else if path == spec {
                to_simulate.insert(path.clone());
            }
        }
    }

    for path in to_stage {
        if let Some(entry) = state.working_tree.get_mut(&path) {
            entry.staged = true;
        }
    }
    let clock = state.clock;
    for path in to_simulate {
        let content = simulated_content(&path, clock);
        set_entry(state, &path, Some(content), true);
    }
    Ok(Output::silent())
}

fn remove(state: &mut RepoState, paths: &[String]) -> Result<Output, TransitionError> {
    let tree = state.head_tree();
    for path in paths {
        if !tree.contains_key(path) && state.working_tree.get(path).is_none() {
            return Err(TransitionError::PathspecNoMatch(path.clone()));
        }
    }
    let mut lines = Vec::new();
    for path in paths {
        if tree.contains_key(path) {
            set_entry(state, path, None, true);
        } else {
            state.working_tree.remove(path);
        }
        lines.push(format!("rm '{path}'"));
    }
    Ok(Output::lines(lines))
}

fn restore(state: &mut RepoState, paths: &[String], staged: bool) -> Result<Output, TransitionError> {
    let tree = state.head_tree();
    for path in paths {
        if !tree.contains_key(path) && state.working_tree.get(path).is_none() {
            return Err(TransitionError::PathspecNoMatch(path.clone()));
        }
    }
    for path in paths {
        if staged {
            if let Some(entry) = state.working_tree.get_mut(path) {
                entry.staged = false;
            }
        } else if state.working_tree.get(path).is_some_and(|e| !e.staged) {
            state.working_tree.remove(path);
        }
    }
    Ok(Output::silent())
}

fn default_merge_message(state: &RepoState, merge_head: &CommitId) -> String {
    match state.branches.iter().find(|(_, id)| *id == merge_head) {
        Some((name, _)) => format!("Merge branch '{name}'"),
        None => format!("Merge commit '{}'", merge_head.short()),
    }
}

fn commit(state: &mut RepoState, args: &CommitArgs) -> Result<Output, TransitionError> {
    if args.amend && state.merge_head.is_some() {
        return Err(TransitionError::MergeInProgress);
    }
    if args.all {
        let tree = state.head_tree();
        state.working_tree.retain(|path, e| {
            if tree.contains_key(path) {
                e.staged = true;
            }
            true
        });
    }

    let (parents, message, author, base_tree) = if args.amend {
        let head = state
            .head_commit()
            .ok_or(TransitionError::NothingToAmend)?;
        (
            head.parents.clone(),
            args.message.clone().unwrap_or_else(|| head.message.clone()),
            args.author.clone().unwrap_or_else(|| head.author.clone()),
            head.tree.clone(),
        )
    } else {
        if !state.working_tree.has_staged() && !args.allow_empty && state.merge_head.is_none() {
            return Err(TransitionError::NothingToCommit);
        }
        let message = match (&args.message, &state.merge_head) {
            (Some(m), _) => m.clone(),
            (None, Some(mh)) => default_merge_message(state, mh),
            (None, None) => return Err(TransitionError::MissingMessage),
        };
        let mut parents: Vec<CommitId> = state.head_commit_id().cloned().into_iter().collect();
        parents.extend(state.merge_head.clone());
        (
            parents,
            message,
            args.author.clone().unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            state.head_tree(),
        )
    };

    let tree = staged_tree(state, base_tree);
    let first_parent_tree = tree_of(state, parents.first());
    let changed = changed_paths(&first_parent_tree, &tree).len();

    state.clock += 1;
    let commit = Commit::new(parents, &author, state.clock, &message, tree);
    let id = commit.id.clone();
    let root = commit.parents.is_empty();
    let summary = commit.summary().to_string();
    state.commits.insert(id.clone(), commit);
    move_head_to(state, id.clone());
    state.working_tree.retain(|_, e| !e.staged);
    state.merge_head = None;
    normalize_entries(state);

    let label = match &state.head {
        Head::Attached(name) if root => format!("{name} (root-commit)"),
        Head::Attached(name) => name.clone(),
        Head::Detached(_) => "detached HEAD".to_string(),
    };
    Ok(Output::lines([
        format!("[{label} {}] {summary}", id.short()),
        files_changed_line(changed),
    ]))
}

fn branch(state: &mut RepoState, op: &BranchOp) -> Result<Output, TransitionError> {
    match op {
        BranchOp::List => Ok(Output::Branches {
            current: state.current_branch().map(str::to_string),
            detached_at: match &state.head {
                Head::Detached(id) => Some(id.clone()),
                Head::Attached(_) => None,
            },
            names: state.branches.keys().cloned().collect(),
        }),
        BranchOp::Create { name, start } => {
            if state.branches.contains_key(name) {
                return Err(TransitionError::BranchAlreadyExists(name.clone()));
            }
            let target = match start {
                Some(rev) => resolve(state, rev)?,
                None => head_or_unborn(state)?,
            };
            state.branches.insert(name.clone(), target);
            Ok(Output::silent())
        }
        BranchOp::Delete { name, force } => {
            let target = state
                .branches
                .get(name)
                .cloned()
                .ok_or_else(|| TransitionError::UnknownBranch(name.clone()))?;
            if state.current_branch() == Some(name.as_str()) {
                return Err(TransitionError::CannotDeleteCurrentBranch(name.clone()));
            }
            if !force {
                let view: &RepoState = state;
                let merged = view
                    .head_commit_id()
                    .is_some_and(|head| graph::is_ancestor(view, &target, head));
                if !merged {
                    return Err(TransitionError::BranchNotMerged(name.clone()));
                }
            }
            state.branches.remove(name);
            Ok(Output::line(format!(
                "Deleted branch {name} (was {}).",
                target.short()
            )))
        }
        BranchOp::Rename { from, to } => {
            let from = match from {
                Some(f) => f.clone(),
                None => state
                    .current_branch()
                    .map(str::to_string)
                    .ok_or(TransitionError::DetachedHead)?,
            };
            let on_from = state.current_branch() == Some(from.as_str());
            if from == *to {
                return Ok(Output::silent());
            }
            if state.branches.contains_key(to) {
                return Err(TransitionError::BranchAlreadyExists(to.clone()));
            }
            match state.branches.remove(&from) {
                Some(id) => {
                    state.branches.insert(to.clone(), id);
                }
                // Renaming the unborn current branch only re-points HEAD.
                None if on_from => {}
                None => return Err(TransitionError::UnknownBranch(from)),
            }
            if on_from {
                state.head = Head::Attached(to.clone());
            }
            Ok(Output::silent())
        }
    }
}

fn checkout(state: &mut RepoState, target: &str, mode: &CheckoutMode) -> Result<Output, TransitionError> {
    if state.merge_head.is_some() {
        return Err(TransitionError::MergeInProgress);
    }

    if let CheckoutMode::Create { start, force } = mode {
        let exists = state.branches.contains_key(target);
        if exists && !force {
            return Err(TransitionError::BranchAlreadyExists(target.to_string()));
        }
        let commit = match start {
            Some(rev) => Some(resolve(state, rev)?),
            None => state.head_commit_id().cloned(),
        };
        let lines = match commit {
            Some(id) => {
                check_overwrite(state, &tree_of(state, Some(&id)))?;
                state.branches.insert(target.to_string(), id);
                state.head = Head::Attached(target.to_string());
                normalize_entries(state);
                if exists {
                    format!("Switched to and reset branch '{target}'")
                } else {
                    format!("Switched to a new branch '{target}'")
                }
            }
            None => {
                state.head = Head::Attached(target.to_string());
                format!("Switched to a new branch '{target}'")
            }
        };
        return Ok(Output::line(lines));
    }

    let detach = matches!(mode, CheckoutMode::Detach);
    if !detach {
        if state.current_branch() == Some(target) {
            return Ok(Output::line(format!("Already on '{target}'")));
        }
        if let Some(id) = state.branches.get(target).cloned() {
            check_overwrite(state, &tree_of(state, Some(&id)))?;
            state.head = Head::Attached(target.to_string());
            normalize_entries(state);
            return Ok(Output::line(format!("Switched to branch '{target}'")));
        }
        if matches!(mode, CheckoutMode::BranchOnly) {
            return match state.resolve(target) {
                Some(_) => Err(TransitionError::NotABranch(target.to_string())),
                None => Err(TransitionError::UnknownBranch(target.to_string())),
            };
        }
    }

    let id = resolve(state, target)?;
    check_overwrite(state, &tree_of(state, Some(&id)))?;
    let summary = state
        .commit(&id)
        .map(|c| c.summary().to_string())
        .unwrap_or_default();
    let short = id.short().to_string();
    state.head = Head::Detached(id);
    normalize_entries(state);
    Ok(Output::lines([
        format!("Note: switching to '{target}'."),
        "You are in 'detached HEAD' state.".to_string(),
        format!("HEAD is now at {short} {summary}"),
    ]))
}

fn merge(
    state: &mut RepoState,
    source: &str,
    ff: FastForward,
    commit: bool,
    message: Option<&str>,
) -> Result<Output, TransitionError> {
    if state.merge_head.is_some() {
        return Err(TransitionError::MergeInProgress);
    }
    if state.working_tree.has_staged() {
        return Err(TransitionError::UncommittedChanges);
    }
    let theirs = resolve(state, source)?;

    let Some(ours) = state.head_commit_id().cloned() else {
        // Unborn HEAD: adopt the source history.
        check_overwrite(state, &tree_of(state, Some(&theirs)))?;
        move_head_to(state, theirs.clone());
        normalize_entries(state);
        return Ok(Output::lines([
            format!("Updating to {}", theirs.short()),
            "Fast-forward".to_string(),
        ]));
    };

    if graph::is_ancestor(state, &theirs, &ours) {
        return Ok(Output::line("Already up to date."));
    }

    let fast_forward = graph::is_ancestor(state, &ours, &theirs);
    if fast_forward && ff != FastForward::Never {
        let ours_tree = tree_of(state, Some(&ours));
        let theirs_tree = tree_of(state, Some(&theirs));
        check_overwrite(state, &theirs_tree)?;
        move_head_to(state, theirs.clone());
        normalize_entries(state);
        return Ok(Output::lines([
            format!("Updating {}..{}", ours.short(), theirs.short()),
            "Fast-forward".to_string(),
            files_changed_line(changed_paths(&ours_tree, &theirs_tree).len()),
        ]));
    }
    if ff == FastForward::Only {
        return Err(TransitionError::NotFastForward(source.to_string()));
    }

    let base = graph::merge_base(state, &ours, &theirs).ok_or(TransitionError::UnrelatedHistories)?;
    let ours_tree = tree_of(state, Some(&ours));
    let merged = graph::three_way(
        &tree_of(state, Some(&base)),
        &ours_tree,
        &tree_of(state, Some(&theirs)),
    )
    .map_err(|paths| TransitionError::MergeConflict { paths })?;
    check_overwrite(state, &merged)?;

    let changed = changed_paths(&ours_tree, &merged);

    if !commit {
        for path in &changed {
            let content = merged
                .get(path)
                .and_then(|blob| state.blobs.get(blob))
                .cloned();
            set_entry(state, path, content, true);
        }
        state.merge_head = Some(theirs);
        return Ok(Output::line(
            "Automatic merge went well; stopped before committing as requested",
        ));
    }

    let message = match message {
        Some(m) => m.to_string(),
        None if state.branches.contains_key(source) => format!("Merge branch '{source}'"),
        None => format!("Merge commit '{source}'"),
    };
    state.clock += 1;
    let merge_commit = Commit::new(
        vec![ours, theirs],
        DEFAULT_AUTHOR,
        state.clock,
        &message,
        merged,
    );
    let id = merge_commit.id.clone();
    state.commits.insert(id.clone(), merge_commit);
    move_head_to(state, id);
    normalize_entries(state);
    Ok(Output::lines([
        "Merge made by the 'ort' strategy.".to_string(),
        files_changed_line(changed.len()),
    ]))
}

fn merge_abort(state: &mut RepoState) -> Result<Output, TransitionError> {
    if state.merge_head.take().is_none() {
        return Err(TransitionError::NoMergeInProgress);
    }
    state.working_tree.retain(|_, e| !e.staged);
    Ok(Output::line("Merge aborted."))
}

fn reset(state: &mut RepoState, target: Option<&str>, mode: ResetMode) -> Result<Output, TransitionError> {
    state.merge_head = None;
    let old_tree = state.head_tree();

    let target_id = match target {
        Some(rev) => Some(resolve(state, rev)?),
        None => state.head_commit_id().cloned(),
    };
    if let Some(id) = target_id {
        move_head_to(state, id);
    }
    let new_tree = state.head_tree();

    match mode {
        ResetMode::Hard => {
            state.working_tree.clear();
            let line = match state.head_commit() {
                Some(c) => format!("HEAD is now at {} {}", c.id.short(), c.summary()),
                None => "HEAD is now at an empty tree".to_string(),
            };
            return Ok(Output::line(line));
        }
        ResetMode::Mixed => {
            state.working_tree.retain(|_, e| {
                e.staged = false;
                true
            });
        }
        ResetMode::Soft => {}
    }

    // The dropped commits' content stays in the working tree.
    let staged = mode == ResetMode::Soft;
    for path in changed_paths(&old_tree, &new_tree) {
        if state.working_tree.get(&path).is_some() {
            continue;
        }
        let content = old_tree.get(&path).and_then(|b| state.blobs.get(b)).cloned();
        set_entry(state, &path, content, staged);
    }
    normalize_entries(state);

    if mode == ResetMode::Mixed && !state.working_tree.is_empty() {
        let mut lines = vec!["Unstaged changes after reset:".to_string()];
        let tree = state.head_tree();
        lines.extend(state.working_tree.entries().map(|(path, e)| {
            let flag = match (&e.content, tree.contains_key(path)) {
                (None, _) => 'D',
                (Some(_), true) => 'M',
                (Some(_), false) => 'A',
            };
            format!("{flag}\t{path}")
        }));
        return Ok(Output::lines(lines));
    }
    Ok(Output::silent())
}

fn log(
    state: &RepoState,
    target: Option<&str>,
    limit: Option<usize>,
    oneline: bool,
) -> Result<Output, TransitionError> {
    let start = match target {
        Some(rev) => resolve(state, rev)?,
        None => head_or_unborn(state)?,
    };

    let decorations = |id: &CommitId| -> Vec<String> {
        let mut refs = Vec::new();
        match &state.head {
            Head::Detached(h) if h == id => refs.push("HEAD".to_string()),
            Head::Attached(name) if state.branches.get(name) == Some(id) => {
                refs.push(format!("HEAD -> {name}"));
            }
            _ => {}
        }
        for (name, tip) in &state.branches {
            if tip == id && state.current_branch() != Some(name.as_str()) {
                refs.push(name.clone());
            }
        }
        refs
    };

    let entries = graph::log(state, &start)
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|c| LogEntry {
            id: c.id.clone(),
            parents: c.parents.clone(),
            author: c.author.clone(),
            timestamp: c.timestamp,
            message: c.message.clone(),
            refs: decorations(&c.id),
        })
        .collect();
    Ok(Output::Log { entries, oneline })
}

/// Working-tree summary relative to HEAD.
pub fn status(state: &RepoState) -> StatusReport {
    let tree = state.head_tree();
    let mut report = StatusReport {
        branch: state.current_branch().map(str::to_string),
        detached_at: match &state.head {
            Head::Detached(id) => Some(id.clone()),
            Head::Attached(_) => None,
        },
        unborn: state.is_unborn(),
        merging: state.merge_head.is_some(),
        ..StatusReport::default()
    };
    for (path, entry) in state.working_tree.entries() {
        let tracked = tree.contains_key(path);
        let change = match (&entry.content, tracked) {
            (None, _) => ChangeKind::Deleted,
            (Some(_), true) => ChangeKind::Modified,
            (Some(_), false) => ChangeKind::Added,
        };
        if entry.staged {
            report.staged.push(FileChange {
                path: path.clone(),
                change,
            });
        } else if change == ChangeKind::Added {
            report.untracked.push(path.clone());
        } else {
            report.unstaged.push(FileChange {
                path: path.clone(),
                change,
            });
        }
    }
    report
}

fn touch(state: &mut RepoState, paths: &[String]) -> Output {
    for path in paths {
        if state.file_content(path).is_none() {
            set_entry(state, path, Some(String::new()), false);
        }
    }
    Output::silent()
}

fn write_file(state: &mut RepoState, path: &str, text: &str, append: bool) -> Output {
    let mut content = if append {
        state.file_content(path).unwrap_or_default().to_string()
    } else {
        String::new()
    };
    content.push_str(text);
    content.push('\n');
    set_entry(state, path, Some(content), false);
    Output::silent()
}

fn delete_files(state: &mut RepoState, paths: &[String]) -> Result<Output, TransitionError> {
    for path in paths {
        if state.file_content(path).is_none() {
            return Err(TransitionError::NoSuchFile(path.clone()));
        }
    }
    for path in paths {
        set_entry(state, path, None, false);
    }
    Ok(Output::silent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use proptest::prelude::*;

    fn step(state: &RepoState, line: &str) -> Result<Outcome, TransitionError> {
        apply(state, &parse(line).unwrap())
    }

    fn run(lines: &[&str]) -> RepoState {
        let mut state = RepoState::default();
        for line in lines {
            state = step(&state, line)
                .unwrap_or_else(|e| panic!("{line}: {e}"))
                .state;
        }
        state
    }

    fn fails(state: &RepoState, line: &str) -> TransitionError {
        let err = step(state, line).unwrap_err();
        // Rejected operations never change the input.
        assert!(state.check_invariants().is_ok());
        err
    }

    fn head_msg(state: &RepoState) -> String {
        state.head_commit().unwrap().message.clone()
    }

    #[test]
    fn example_scenario_fast_forwards_main() {
        let s = run(&[
            "git add README.md",
            r#"git commit -m "init""#,
            "git branch feature",
            "git checkout feature",
            "git add work.txt",
            r#"git commit -m "work""#,
            "git checkout main",
            "git merge feature",
        ]);
        assert_eq!(s.branch("main"), s.branch("feature"));
        assert_eq!(s.current_branch(), Some("main"));
        assert_eq!(s.commits().len(), 2);
        let head = s.head_commit().unwrap();
        assert_eq!(head.parents.len(), 1);
        assert!(s.commit(&head.parents[0]).unwrap().parents.is_empty());
        assert!(s.is_clean());
    }

    #[test]
    fn commit_on_unborn_creates_branch_lazily() {
        let s = RepoState::default();
        assert!(s.branches().is_empty());
        let out = step(&step(&s, "echo hi > a.txt").unwrap().state, "git add a.txt").unwrap();
        let out = step(&out.state, "git commit -m first").unwrap();
        assert!(out.state.branch("main").is_some());
        assert!(out.output.render()[0].starts_with("[main (root-commit) "));
        assert_eq!(out.state.file_content("a.txt"), Some("hi\n"));
    }

    #[test]
    fn nothing_to_commit_and_allow_empty() {
        let s = run(&["git add a", "git commit -m one"]);
        assert_eq!(fails(&s, "git commit -m two"), TransitionError::NothingToCommit);
        let s = step(&s, "git commit --allow-empty -m two").unwrap().state;
        assert_eq!(s.commits().len(), 2);
    }

    #[test]
    fn commit_keeps_unstaged_edits() {
        let s = run(&["git add a", "git commit -m one", "echo x > b", "git add a"]);
        let s = step(&s, "git commit -m two").unwrap().state;
        assert_eq!(s.working_tree().get("b").unwrap().content.as_deref(), Some("x\n"));
        assert!(!s.working_tree().has_staged());
    }

    #[test]
    fn commit_all_stages_tracked_only() {
        let s = run(&[
            "echo v1 > a",
            "git add a",
            "git commit -m one",
            "echo v2 > a",
            "echo new > b",
            "git commit -am two",
        ]);
        assert_eq!(s.committed_content("a"), Some("v2\n"));
        assert_eq!(s.committed_content("b"), None);
        assert!(s.working_tree().get("b").is_some());
    }

    #[test]
    fn amend_replaces_head() {
        let s = run(&["git add a", "git commit -m one", "git add b", "git commit -m typo"]);
        let before = s.head_commit().unwrap().clone();
        let s = step(&s, "git commit --amend -m fixed").unwrap().state;
        let after = s.head_commit().unwrap();
        assert_ne!(after.id, before.id);
        assert_eq!(after.parents, before.parents);
        assert_eq!(after.message, "fixed");
        assert_eq!(after.tree, before.tree);
        let s = step(&s, "git commit --amend --no-edit").unwrap().state;
        assert_eq!(head_msg(&s), "fixed");
        assert_eq!(
            fails(&RepoState::default(), "git commit --amend -m x"),
            TransitionError::NothingToAmend
        );
    }

    #[test]
    fn detached_commit_moves_detached_head() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git add b",
            "git commit -m two",
            "git checkout HEAD~1",
        ]);
        assert!(matches!(s.head(), Head::Detached(_)));
        let main = s.branch("main").cloned();
        let s = run_on(s, &["git add c", "git commit -m detached"]);
        let Head::Detached(id) = s.head() else {
            panic!("expected detached HEAD");
        };
        assert_eq!(s.commit(id).unwrap().message, "detached");
        assert_eq!(s.branch("main").cloned(), main);
    }

    fn run_on(mut state: RepoState, lines: &[&str]) -> RepoState {
        for line in lines {
            state = step(&state, line)
                .unwrap_or_else(|e| panic!("{line}: {e}"))
                .state;
        }
        state
    }

    #[test]
    fn add_rules() {
        let s = RepoState::default();
        assert!(matches!(
            fails(&s, "git add '*.md'"),
            TransitionError::PathspecNoMatch(_)
        ));
        let s = run(&["echo a > docs/a.md", "echo b > docs/b.md", "echo c > c.txt"]);
        let s = step(&s, "git add '*.md'").unwrap().state;
        assert_eq!(s.working_tree().staged().count(), 2);
        let s = step(&s, "git add .").unwrap().state;
        assert_eq!(s.working_tree().staged().count(), 3);
    }

    #[test]
    fn add_directory_prefix() {
        let s = run(&["echo a > src/a.rs", "echo b > src/b.rs", "echo c > top.rs", "git add src"]);
        let staged: Vec<&String> = s.working_tree().staged().map(|(p, _)| p).collect();
        assert_eq!(staged, vec!["src/a.rs", "src/b.rs"]);
    }

    #[test]
    fn add_simulates_new_revision_of_tracked_file() {
        let s = run(&["git add a", "git commit -m one", "git add a", "git commit -m two"]);
        assert_eq!(s.commits().len(), 2);
        let first = s.resolve("HEAD~1").unwrap();
        assert_ne!(s.commit(&first).unwrap().tree, s.head_commit().unwrap().tree);
    }

    #[test]
    fn branch_create_and_errors() {
        assert_eq!(
            fails(&RepoState::default(), "git branch feature"),
            TransitionError::NoCommitsYet("main".into())
        );
        let s = run(&["git add a", "git commit -m one", "git branch feature"]);
        assert_eq!(s.branch("feature"), s.branch("main"));
        assert_eq!(
            fails(&s, "git branch feature"),
            TransitionError::BranchAlreadyExists("feature".into())
        );
        assert_eq!(
            fails(&s, "git branch x nowhere"),
            TransitionError::UnknownRef("nowhere".into())
        );
    }

    #[test]
    fn branch_delete_rules() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git checkout -b topic",
            "git add b",
            "git commit -m two",
        ]);
        assert_eq!(
            fails(&s, "git branch -d topic"),
            TransitionError::CannotDeleteCurrentBranch("topic".into())
        );
        let s = step(&s, "git checkout main").unwrap().state;
        assert_eq!(
            fails(&s, "git branch -d topic"),
            TransitionError::BranchNotMerged("topic".into())
        );
        assert_eq!(
            fails(&s, "git branch -d ghost"),
            TransitionError::UnknownBranch("ghost".into())
        );
        let s = step(&s, "git branch -D topic").unwrap().state;
        assert!(s.branch("topic").is_none());
    }

    #[test]
    fn branch_rename_reattaches_head() {
        let s = run(&["git add a", "git commit -m one", "git branch -m trunk"]);
        assert_eq!(s.current_branch(), Some("trunk"));
        assert!(s.branch("main").is_none());
        let s = run(&["git branch -m trunk"]);
        assert_eq!(s.current_branch(), Some("trunk"));
        assert!(s.is_unborn());
    }

    #[test]
    fn checkout_refuses_to_overwrite_pending_edits() {
        let s = run(&[
            "echo v1 > a",
            "git add a",
            "git commit -m one",
            "git checkout -b other",
            "echo v2 > a",
            "git commit -am two",
            "git checkout main",
            "echo local > a",
        ]);
        assert_eq!(
            fails(&s, "git checkout other"),
            TransitionError::LocalChangesWouldBeOverwritten {
                paths: vec!["a".into()]
            }
        );
    }

    #[test]
    fn checkout_carries_unrelated_edits() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git branch other",
            "echo note > b",
            "git checkout other",
        ]);
        assert_eq!(s.current_branch(), Some("other"));
        assert_eq!(s.file_content("b"), Some("note\n"));
    }

    #[test]
    fn switch_refuses_commits_without_detach() {
        let s = run(&["git add a", "git commit -m one"]);
        assert_eq!(
            fails(&s, "git switch HEAD"),
            TransitionError::NotABranch("HEAD".into())
        );
        assert_eq!(
            fails(&s, "git switch ghost"),
            TransitionError::UnknownBranch("ghost".into())
        );
        assert_eq!(
            fails(&s, "git checkout ghost"),
            TransitionError::UnknownRef("ghost".into())
        );
        let s = step(&s, "git switch --detach HEAD").unwrap().state;
        assert!(matches!(s.head(), Head::Detached(_)));
    }

    #[test]
    fn checkout_create_on_unborn_repoints_head() {
        let s = run(&["git checkout -b dev"]);
        assert_eq!(s.current_branch(), Some("dev"));
        assert!(s.branches().is_empty());
    }

    #[test]
    fn fast_forward_creates_no_commit() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git checkout -b feature",
            "git add b",
            "git commit -m two",
            "git checkout main",
        ]);
        let before = s.commits().len();
        let out = step(&s, "git merge feature").unwrap();
        assert_eq!(out.state.commits().len(), before);
        assert_eq!(out.state.branch("main"), out.state.branch("feature"));
        assert!(out.output.render().contains(&"Fast-forward".to_string()));
        assert_eq!(
            step(&out.state, "git merge feature").unwrap().output.render(),
            vec!["Already up to date."]
        );
    }

    #[test]
    fn no_ff_and_ff_only() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git checkout -b feature",
            "git add b",
            "git commit -m two",
            "git checkout main",
        ]);
        let merged = step(&s, "git merge --no-ff feature").unwrap().state;
        let head = merged.head_commit().unwrap();
        assert!(head.is_merge());
        assert_eq!(head.message, "Merge branch 'feature'");

        let s = run_on(s, &["git add c", "git commit -m three"]);
        assert_eq!(
            fails(&s, "git merge --ff-only feature"),
            TransitionError::NotFastForward("feature".into())
        );
    }

    #[test]
    fn true_merge_unions_both_sides() {
        let s = run(&[
            "echo base > shared",
            "git add shared",
            "git commit -m base",
            "git checkout -b feature",
            "echo f > feature.txt",
            "git add feature.txt",
            "git commit -m feature",
            "git checkout main",
            "echo m > main.txt",
            "git add main.txt",
            "git commit -m main",
            "git merge feature",
        ]);
        let head = s.head_commit().unwrap();
        assert_eq!(head.parents.len(), 2);
        assert_eq!(&head.parents[1], s.branch("feature").unwrap());
        let paths: Vec<&String> = head.tree.keys().collect();
        assert_eq!(paths, vec!["feature.txt", "main.txt", "shared"]);
    }

    #[test]
    fn conflicting_merge_is_rejected_without_change() {
        let s = run(&[
            "echo base > f",
            "git add f",
            "git commit -m base",
            "git checkout -b feature",
            "echo theirs > f",
            "git commit -am theirs",
            "git checkout main",
            "echo ours > f",
            "git commit -am ours",
        ]);
        assert_eq!(
            fails(&s, "git merge feature"),
            TransitionError::MergeConflict {
                paths: vec!["f".into()]
            }
        );
    }

    #[test]
    fn merge_preconditions() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git branch feature",
            "git add b",
        ]);
        assert_eq!(fails(&s, "git merge feature"), TransitionError::UncommittedChanges);
        let s = run(&["git add a", "git commit -m one", "git checkout -b other"]);
        let s = run_on(s, &["git add b", "git commit -m two", "git checkout main"]);
        let detached = run_on(s, &["git checkout --detach HEAD"]);
        let merged = step(&detached, "git merge other").unwrap().state;
        assert_eq!(merged.head_commit_id(), merged.branch("other"));
    }

    /// Graft the commits of `island` into `base` and point branch `name` at its tip.
    fn graft(base: &RepoState, island: &RepoState, name: &str) -> RepoState {
        let mut value = serde_json::to_value(base).unwrap();
        let other = serde_json::to_value(island).unwrap();
        for table in ["commits", "blobs"] {
            for (k, v) in other[table].as_object().unwrap() {
                value[table][k] = v.clone();
            }
        }
        value["branches"][name] = other["branches"][name].clone();
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn unrelated_histories() {
        let s = run(&["git add a", "git commit -m one"]);
        let island = run(&["git checkout -b island", "git add z", "git commit -m island"]);
        let grafted = graft(&s, &island, "island");
        assert_eq!(
            fails(&grafted, "git merge island"),
            TransitionError::UnrelatedHistories
        );
    }

    #[test]
    fn merge_no_commit_then_commit_and_abort() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git checkout -b feature",
            "git add b",
            "git commit -m two",
            "git checkout main",
            "git add c",
            "git commit -m three",
        ]);
        let pending = step(&s, "git merge --no-commit feature").unwrap().state;
        assert!(pending.merge_head().is_some());
        assert!(pending.working_tree().get("b").unwrap().staged);
        assert_eq!(fails(&pending, "git merge feature"), TransitionError::MergeInProgress);
        assert_eq!(fails(&pending, "git checkout feature"), TransitionError::MergeInProgress);

        let done = step(&pending, "git commit --no-edit").unwrap().state;
        let head = done.head_commit().unwrap();
        assert!(head.is_merge());
        assert_eq!(head.message, "Merge branch 'feature'");
        assert!(done.merge_head().is_none());

        let aborted = step(&pending, "git merge --abort").unwrap().state;
        assert_eq!(aborted, s);
        assert_eq!(fails(&s, "git merge --abort"), TransitionError::NoMergeInProgress);
    }

    #[test]
    fn merge_into_unborn_adopts_source() {
        let s = run(&["git add a", "git commit -m one", "git branch fresh"]);
        let mut value = serde_json::to_value(&s).unwrap();
        value["head"] = serde_json::json!({"kind": "attached", "target": "empty"});
        let unborn: RepoState = serde_json::from_value(value).unwrap();
        assert!(unborn.is_unborn());
        let s = step(&unborn, "git merge fresh").unwrap().state;
        assert_eq!(s.branch("empty"), s.branch("fresh"));
        assert_eq!(s.current_branch(), Some("empty"));
    }

    #[test]
    fn reset_modes() {
        let s = run(&[
            "echo 1 > a",
            "git add a",
            "git commit -m one",
            "echo 2 > a",
            "git commit -am two",
        ]);

        let soft = step(&s, "git reset --soft HEAD~1").unwrap().state;
        assert_eq!(head_msg(&soft), "one");
        let entry = soft.working_tree().get("a").unwrap();
        assert!(entry.staged);
        assert_eq!(entry.content.as_deref(), Some("2\n"));

        let mixed = step(&s, "git reset HEAD~1").unwrap();
        assert_eq!(mixed.output.render(), vec!["Unstaged changes after reset:", "M\ta"]);
        assert!(!mixed.state.working_tree().get("a").unwrap().staged);

        let hard = step(&s, "git reset --hard HEAD~1").unwrap().state;
        assert!(hard.working_tree().is_empty());
        assert_eq!(hard.file_content("a"), Some("1\n"));

        assert_eq!(
            fails(&s, "git reset --hard nowhere"),
            TransitionError::UnknownRef("nowhere".into())
        );
    }

    #[test]
    fn reset_clears_merge_head() {
        let s = run(&[
            "git add a",
            "git commit -m one",
            "git checkout -b feature",
            "git add b",
            "git commit -m two",
            "git checkout main",
            "git add c",
            "git commit -m three",
            "git merge --no-commit feature",
        ]);
        let s = step(&s, "git reset --hard").unwrap().state;
        assert!(s.merge_head().is_none());
        assert!(s.is_clean());
    }

    #[test]
    fn log_output() {
        assert_eq!(
            fails(&RepoState::default(), "git log"),
            TransitionError::NoCommitsYet("main".into())
        );
        let s = run(&["git add a", "git commit -m one", "git add b", "git commit -m two", "git branch side"]);
        let out = step(&s, "git log --oneline -1").unwrap();
        assert_eq!(out.state, s);
        let lines = out.output.render();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" (HEAD -> main, side) two"));

        let Output::Log { entries, .. } = step(&s, "git log").unwrap().output else {
            panic!("expected log output");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "one");
    }

    #[test]
    fn status_report() {
        let s = run(&[
            "echo 1 > a",
            "echo 1 > gone",
            "git add .",
            "git commit -m one",
            "echo 2 > a",
            "echo n > new",
            "git rm gone",
        ]);
        let report = status(&s);
        assert_eq!(report.branch.as_deref(), Some("main"));
        assert_eq!(
            report.staged,
            vec![FileChange {
                path: "gone".into(),
                change: ChangeKind::Deleted
            }]
        );
        assert_eq!(
            report.unstaged,
            vec![FileChange {
                path: "a".into(),
                change: ChangeKind::Modified
            }]
        );
        assert_eq!(report.untracked, vec!["new".to_string()]);
        let clean = run(&["git add a", "git commit -m one"]);
        assert!(status(&clean).is_clean());
        assert_eq!(
            status(&clean).render().last().map(String::as_str),
            Some("nothing to commit, working tree clean")
        );
    }

    #[test]
    fn restore_and_shell_edits() {
        let s = run(&["echo 1 > a", "git add a", "git commit -m one", "echo 2 >> a"]);
        assert_eq!(s.file_content("a"), Some("1\n2\n"));
        let s = run_on(s, &["git add a", "git restore --staged a"]);
        assert!(!s.working_tree().get("a").unwrap().staged);
        let s = run_on(s, &["git restore a"]);
        assert!(s.is_clean());
        let s = run_on(s, &["rm a"]);
        assert_eq!(s.file_content("a"), None);
        assert_eq!(fails(&s, "rm a"), TransitionError::NoSuchFile("a".into()));
        assert!(matches!(fails(&s, "git restore nope"), TransitionError::PathspecNoMatch(_)));
    }

    #[test]
    fn writing_committed_content_back_is_clean() {
        let s = run(&["echo 1 > a", "git add a", "git commit -m one", "echo 2 > a", "echo 1 > a"]);
        assert!(s.is_clean());
    }

    #[test]
    fn init_renames_only_empty_repo() {
        let s = run(&["git init -b trunk"]);
        assert_eq!(s.current_branch(), Some("trunk"));
        let s = run(&["git add a", "git commit -m one"]);
        let out = step(&s, "git init -b trunk").unwrap();
        assert_eq!(out.state, s);
        assert!(out.output.render().last().unwrap().starts_with("Reinitialized"));
    }

    #[test]
    fn read_only_ops_keep_state() {
        let s = run(&["git add a", "git commit -m one", "echo x > b"]);
        for line in ["git status", "git log", "git branch"] {
            assert_eq!(step(&s, line).unwrap().state, s, "{line}");
        }
    }

    #[test]
    fn replay_is_deterministic() {
        let script = [
            "git add a",
            "git commit -m one",
            "git checkout -b f",
            "git add b",
            "git commit -m two",
            "git checkout main",
            "git add c",
            "git commit -m three",
            "git merge f",
        ];
        assert_eq!(run(&script), run(&script));
        assert!(run(&script).check_invariants().is_ok());
    }

    #[test]
    fn malformed_revision_suffix_is_an_unknown_ref() {
        let s = run(&["git add a", "git commit -m one", "git add b", "git commit -m two"]);
        for line in [
            "git checkout HEAD~1é",
            "git reset --hard HEAD^é",
            "git log HEAD~1é",
            "git merge main~1é",
        ] {
            let rev = line.rsplit(' ').next().unwrap();
            assert_eq!(fails(&s, line), TransitionError::UnknownRef(rev.into()), "{line}");
        }
    }

    const VOCAB: &[&str] = &[
        "echo 1 > a",
        "echo 2 > b",
        "echo x >> a",
        "touch c",
        "rm a",
        "git add a",
        "git add .",
        "git rm b",
        "git restore a",
        "git restore --staged a",
        "git commit -m work",
        "git commit -am all",
        "git commit --allow-empty -m empty",
        "git commit --amend --no-edit",
        "git commit --no-edit",
        "git branch feature",
        "git branch -D feature",
        "git checkout -b topic",
        "git checkout main",
        "git checkout feature",
        "git checkout topic",
        "git checkout HEAD~1",
        "git switch --detach HEAD",
        "git merge feature",
        "git merge topic",
        "git merge --no-ff feature",
        "git merge --no-commit topic",
        "git merge --abort",
        "git reset --hard HEAD~1",
        "git reset --soft HEAD~1",
        "git reset HEAD~1",
        "git status",
        "git log --oneline -1",
    ];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn random_sessions_keep_invariants(
            script in proptest::collection::vec(proptest::sample::select(VOCAB.to_vec()), 1..48)
        ) {
            let mut state = RepoState::default();
            let mut accepted = Vec::new();
            for line in &script {
                match step(&state, line) {
                    Ok(out) => {
                        prop_assert!(out.state.check_invariants().is_ok(), "{}", line);
                        let json = serde_json::to_string(&out.state).unwrap();
                        let back: RepoState = serde_json::from_str(&json).unwrap();
                        prop_assert_eq!(&back, &out.state);
                        state = out.state;
                        accepted.push(*line);
                    }
                    Err(err) => prop_assert!(!err.is_fatal(), "{}: {}", line, err),
                }
            }
            prop_assert_eq!(run(&accepted), state);
        }
    }
}
