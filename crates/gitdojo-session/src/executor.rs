use crate::error::SessionError;
use crate::event::{EventKind, StateEvent};
use crate::response::{CommandError, ExecResponse, PracticeSummary, SessionView};
use gitdojo_check::{CompiledPractice, Verdict};
use gitdojo_core::{apply, parse, status, RepoState, TransitionError};
use gitdojo_store::{SessionKey, Snapshot, SnapshotStore, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{broadcast, Mutex};

pub const DEFAULT_SAVE_ATTEMPTS: u32 = 3;
const EVENT_CAPACITY: usize = 256;
const SESSION_CAPACITY: usize = 1024;

/// Per-session slot. Its async mutex is what serializes execute, validate
/// and reset for one `(learner, practice)` pair.
#[derive(Default)]
struct Slot {
    /// Last persisted view; `None` until first loaded.
    view: Option<Loaded>,
    /// Set after an invariant violation; cleared only by reset.
    halted: Option<String>,
}

#[derive(Clone)]
struct Loaded {
    state: Arc<RepoState>,
    history: Vec<String>,
    version: u32,
}

pub struct Executor {
    store: Arc<dyn SnapshotStore>,
    practices: BTreeMap<String, Arc<CompiledPractice>>,
    sessions: StdMutex<HashMap<SessionKey, Arc<Mutex<Slot>>>>,
    events: broadcast::Sender<StateEvent>,
    save_attempts: u32,
    session_capacity: usize,
}

impl Executor {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        practices: impl IntoIterator<Item = CompiledPractice>,
    ) -> Self {
        let practices = practices
            .into_iter()
            .map(|p| (p.id().to_string(), Arc::new(p)))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            practices,
            sessions: StdMutex::new(HashMap::new()),
            events,
            save_attempts: DEFAULT_SAVE_ATTEMPTS,
            session_capacity: SESSION_CAPACITY,
        }
    }

    /// Attempts per snapshot save, at least one.
    pub fn with_save_attempts(mut self, attempts: u32) -> Self {
        self.save_attempts = attempts.max(1);
        self
    }

    /// Cached sessions kept before idle ones are evicted. Evicted sessions
    /// reload from the store on next use.
    pub fn with_session_capacity(mut self, capacity: usize) -> Self {
        self.session_capacity = capacity.max(1);
        self
    }

    pub fn practice(&self, id: &str) -> Option<&Arc<CompiledPractice>> {
        self.practices.get(id)
    }

    pub fn practices(&self) -> Vec<PracticeSummary> {
        self.practices.values().map(|p| PracticeSummary::from(p.as_ref())).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Run one terminal line.
    ///
    /// Parse and transition errors come back as `Ok` with `ok: false`; the
    /// session is unchanged and nothing is written. A successful command is
    /// persisted before the in-memory view moves forward.
    pub async fn execute(&self, key: &SessionKey, line: &str) -> Result<ExecResponse, SessionError> {
        let practice = self.compiled(key)?;
        let cell = self.slot(key);
        let mut slot = cell.lock().await;
        let current = self.ensure_loaded(key, &practice, &mut slot).await?;

        let line = line.trim();
        let op = match parse(line) {
            Ok(op) => op,
            Err(err) => {
                tracing::debug!(%key, %err, "command rejected by parser");
                return Ok(ExecResponse::failure(CommandError::from(&err), current.state));
            }
        };

        let outcome = match apply(&current.state, &op) {
            Ok(outcome) => outcome,
            Err(TransitionError::Invariant(violation)) => {
                tracing::error!(%key, %violation, command = line, "session halted");
                slot.halted = Some(violation.to_string());
                return Err(SessionError::Invariant(violation));
            }
            Err(err) => {
                tracing::debug!(%key, %err, command = line, "command refused");
                return Ok(ExecResponse::failure(CommandError::from(&err), current.state));
            }
        };

        let mut history = current.history;
        history.push(line.to_string());
        let snapshot = Snapshot {
            practice_id: key.practice_id.clone(),
            state: Some(outcome.state),
            version: current.version,
            history,
        };
        let snapshot = self.persist(key, snapshot).await?;

        let state = Arc::new(snapshot.state.unwrap_or_else(|| practice.initial.clone()));
        slot.view = Some(Loaded {
            state: Arc::clone(&state),
            history: snapshot.history,
            version: snapshot.version,
        });
        self.publish(StateEvent::new(
            key,
            EventKind::Executed {
                command: line.to_string(),
                state: Arc::clone(&state),
            },
        ));
        Ok(ExecResponse::success(outcome.output, state))
    }

    /// Grade the most recently persisted state of the session.
    pub async fn validate(&self, key: &SessionKey) -> Result<Verdict, SessionError> {
        let practice = self.compiled(key)?;
        let cell = self.slot(key);
        let mut slot = cell.lock().await;
        let current = self.ensure_loaded(key, &practice, &mut slot).await?;

        let verdict = practice.verdict(&current.state, &current.history);
        tracing::info!(%key, is_correct = verdict.is_correct, score = verdict.score, "validated");
        self.publish(StateEvent::new(
            key,
            EventKind::Validated {
                is_correct: verdict.is_correct,
                score: verdict.score,
            },
        ));
        Ok(verdict)
    }

    /// Discard the learner's progress and start over at the practice's
    /// current version. Also the only way out of a halted session.
    pub async fn reset(&self, key: &SessionKey) -> Result<SessionView, SessionError> {
        let practice = self.compiled(key)?;
        let cell = self.slot(key);
        let mut slot = cell.lock().await;

        let store = Arc::clone(&self.store);
        let (k, version) = (key.clone(), practice.version());
        let snapshot = tokio::task::spawn_blocking(move || store.reset(&k, version)).await??;

        let loaded = Loaded {
            state: Arc::new(practice.initial.clone()),
            history: snapshot.history,
            version: snapshot.version,
        };
        slot.halted = None;
        slot.view = Some(loaded.clone());
        self.publish(StateEvent::new(
            key,
            EventKind::Reset {
                version,
                state: Arc::clone(&loaded.state),
            },
        ));
        Ok(view_of(key, loaded))
    }

    pub async fn state(&self, key: &SessionKey) -> Result<SessionView, SessionError> {
        let practice = self.compiled(key)?;
        let cell = self.slot(key);
        let mut slot = cell.lock().await;
        let current = self.ensure_loaded(key, &practice, &mut slot).await?;
        Ok(view_of(key, current))
    }

    /// Practices with stored progress for a learner, with the version each was saved at.
    pub async fn progress(&self, learner_id: &str) -> Result<Vec<(String, u32)>, SessionError> {
        let store = Arc::clone(&self.store);
        let learner_id = learner_id.to_string();
        Ok(tokio::task::spawn_blocking(move || store.list(&learner_id)).await??)
    }

    fn compiled(&self, key: &SessionKey) -> Result<Arc<CompiledPractice>, SessionError> {
        self.practices
            .get(&key.practice_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownPractice(key.practice_id.clone()))
    }

    fn slot(&self, key: &SessionKey) -> Arc<Mutex<Slot>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if !sessions.contains_key(key) && sessions.len() >= self.session_capacity {
            evict_idle(&mut sessions);
        }
        Arc::clone(sessions.entry(key.clone()).or_default())
    }

    async fn ensure_loaded(
        &self,
        key: &SessionKey,
        practice: &CompiledPractice,
        slot: &mut Slot,
    ) -> Result<Loaded, SessionError> {
        if let Some(reason) = &slot.halted {
            return Err(SessionError::Poisoned {
                key: key.to_string(),
                reason: reason.clone(),
            });
        }
        if let Some(view) = &slot.view {
            return Ok(view.clone());
        }

        let store = Arc::clone(&self.store);
        let (k, version) = (key.clone(), practice.version());
        let outcome = match tokio::task::spawn_blocking(move || store.load(&k, version)).await? {
            Err(StoreError::Corrupt { violation, .. }) => {
                tracing::error!(%key, %violation, "stored state is inconsistent, session halted");
                slot.halted = Some(violation.to_string());
                return Err(violation.into());
            }
            other => other?,
        };
        let snapshot = outcome.into_snapshot(key)?;

        let loaded = Loaded {
            state: Arc::new(snapshot.state.unwrap_or_else(|| practice.initial.clone())),
            history: snapshot.history,
            version: snapshot.version,
        };
        slot.view = Some(loaded.clone());
        Ok(loaded)
    }

    /// Save with retries. Saves are idempotent, so a retry after a failure
    /// that did land is harmless. Version conflicts are never retried.
    async fn persist(&self, key: &SessionKey, snapshot: Snapshot) -> Result<Snapshot, SessionError> {
        let snapshot = Arc::new(snapshot);
        let mut attempt = 1;
        loop {
            let store = Arc::clone(&self.store);
            let (k, s) = (key.clone(), Arc::clone(&snapshot));
            match tokio::task::spawn_blocking(move || store.save(&k, &s)).await? {
                Ok(()) => break,
                Err(err @ StoreError::VersionConflict { .. }) => return Err(err.into()),
                Err(err) if attempt < self.save_attempts => {
                    tracing::warn!(%key, attempt, %err, "snapshot save failed, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Arc::try_unwrap(snapshot).unwrap_or_else(|shared| (*shared).clone()))
    }

    fn publish(&self, event: StateEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Drop slots nobody holds. Halted slots stay, since the halt lives only here.
fn evict_idle(sessions: &mut HashMap<SessionKey, Arc<Mutex<Slot>>>) {
    let before = sessions.len();
    sessions.retain(|_, cell| {
        Arc::strong_count(cell) > 1
            || cell.try_lock().map_or(true, |slot| slot.halted.is_some())
    });
    tracing::debug!(evicted = before - sessions.len(), "evicted idle sessions");
}

fn view_of(key: &SessionKey, loaded: Loaded) -> SessionView {
    SessionView {
        learner_id: key.learner_id.clone(),
        practice_id: key.practice_id.clone(),
        version: loaded.version,
        status: status(&loaded.state),
        state: loaded.state,
        history: loaded.history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdojo_check::parse_practice;
    use gitdojo_core::graph;
    use gitdojo_store::{LoadOutcome, MemorySnapshotStore};
    use gitdojo_core::{CommitId, InvariantViolation};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    const MERGE_PRACTICE: &str = r#"
id: fast-forward
title: Fast-forward a branch
version: 1
goal:
  commands:
    - git add README.md
    - git commit -m init
    - git branch feature
    - git checkout feature
    - git add work.txt
    - git commit -m work
    - git checkout main
    - git merge feature
rules:
  - dag_shape
  - commit_count: 2
  - head_on_branch: main
  - { type: merge_commit_exists, required: false }
"#;

    fn practice(version: u32) -> CompiledPractice {
        let mut p = parse_practice(MERGE_PRACTICE).unwrap();
        p.version = version;
        p.compile().unwrap()
    }

    fn executor(store: Arc<dyn SnapshotStore>, version: u32) -> Executor {
        Executor::new(store, [practice(version)])
    }

    fn key() -> SessionKey {
        SessionKey::new("ada", "fast-forward")
    }

    const SCENARIO: &[&str] = &[
        "git add README.md",
        "git commit -m \"init\"",
        "git branch feature",
        "git checkout feature",
        "echo hello > work.txt",
        "git add work.txt",
        "git commit -m \"work\"",
        "git checkout main",
        "git merge feature",
    ];

    #[tokio::test]
    async fn example_scenario_fast_forwards_and_validates() {
        let exec = executor(Arc::new(MemorySnapshotStore::new()), 1);
        for line in SCENARIO {
            let resp = exec.execute(&key(), line).await.unwrap();
            assert!(resp.ok, "{line}: {:?}", resp.error);
        }

        let view = exec.state(&key()).await.unwrap();
        let state = &view.state;
        assert_eq!(state.current_branch(), Some("main"));
        assert_eq!(state.branch("main"), state.branch("feature"));
        let head = state.head_commit_id().unwrap();
        assert_eq!(graph::ancestors(state, head).len(), 2);
        assert_eq!(view.history.len(), SCENARIO.len());

        let verdict = exec.validate(&key()).await.unwrap();
        assert!(verdict.is_correct, "{:#?}", verdict.results);
        // The advisory merge-commit rule fails on a fast-forward.
        assert!(verdict.score < 1.0);

        // Grading again gives the same verdict.
        assert_eq!(exec.validate(&key()).await.unwrap(), verdict);
    }

    #[tokio::test]
    async fn errors_leave_state_untouched() {
        let store = Arc::new(MemorySnapshotStore::new());
        let exec = executor(store.clone(), 1);
        let before = exec.state(&key()).await.unwrap().state;

        let resp = exec.execute(&key(), "git frobnicate").await.unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error.as_ref().unwrap().kind, crate::ErrorKind::Parse);
        assert_eq!(resp.state, before);

        let resp = exec.execute(&key(), "git commit -m nothing").await.unwrap();
        assert!(!resp.ok);
        let err = resp.error.unwrap();
        assert_eq!(err.kind, crate::ErrorKind::Transition);
        assert_eq!(err.code, "nothing_to_commit");
        assert_eq!(resp.output, vec![err.message]);

        // Nothing was persisted by rejected commands.
        assert!(matches!(store.load(&key(), 1).unwrap(), LoadOutcome::Fresh(_)));
        assert!(exec.state(&key()).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn progress_survives_a_new_executor() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        {
            let exec = executor(Arc::clone(&store), 1);
            exec.execute(&key(), "git add README.md").await.unwrap();
            exec.execute(&key(), "git commit -m init").await.unwrap();
        }
        let exec = executor(Arc::clone(&store), 1);
        let view = exec.state(&key()).await.unwrap();
        assert_eq!(view.history, vec!["git add README.md", "git commit -m init"]);
        assert_eq!(view.state.commits().len(), 1);
    }

    #[tokio::test]
    async fn version_bump_requires_reset() {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        executor(Arc::clone(&store), 1)
            .execute(&key(), "git add README.md")
            .await
            .unwrap();

        let exec = executor(Arc::clone(&store), 2);
        let err = exec.execute(&key(), "git status").await.unwrap_err();
        assert_eq!(err.reset_required(), Some((1, 2)));
        assert_eq!(err.code(), "reset_required");
        assert!(exec.validate(&key()).await.is_err());
        // The old row is still there for the old version.
        assert!(matches!(store.load(&key(), 1).unwrap(), LoadOutcome::Ready(_)));

        let view = exec.reset(&key()).await.unwrap();
        assert_eq!(view.version, 2);
        assert!(view.history.is_empty());
        assert!(exec.execute(&key(), "git status").await.unwrap().ok);
    }

    #[tokio::test]
    async fn unknown_practice() {
        let exec = executor(Arc::new(MemorySnapshotStore::new()), 1);
        let err = exec
            .execute(&SessionKey::new("ada", "nope"), "git status")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownPractice(ref id) if id == "nope"));
    }

    #[tokio::test]
    async fn halted_session_refuses_until_reset() {
        let exec = executor(Arc::new(MemorySnapshotStore::new()), 1);
        exec.slot(&key()).lock().await.halted = Some("dangling branch".into());

        let err = exec.execute(&key(), "git status").await.unwrap_err();
        assert!(matches!(err, SessionError::Poisoned { .. }));
        assert_eq!(err.code(), "session_halted");
        assert!(exec.validate(&key()).await.is_err());

        exec.reset(&key()).await.unwrap();
        assert!(exec.execute(&key(), "git status").await.unwrap().ok);
    }

    #[tokio::test]
    async fn events_follow_each_change() {
        let exec = executor(Arc::new(MemorySnapshotStore::new()), 1);
        let mut rx = exec.subscribe();

        exec.execute(&key(), "git add README.md").await.unwrap();
        exec.execute(&key(), "git bogus").await.unwrap();
        exec.validate(&key()).await.unwrap();
        exec.reset(&key()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.id.starts_with("evt_"));
        assert!(matches!(first.kind, EventKind::Executed { ref command, .. } if command == "git add README.md"));
        // The rejected command published nothing.
        assert!(matches!(rx.recv().await.unwrap().kind, EventKind::Validated { is_correct: false, .. }));
        assert!(matches!(rx.recv().await.unwrap().kind, EventKind::Reset { version: 1, .. }));
    }

    #[tokio::test]
    async fn concurrent_commands_are_serialized() {
        let exec = Arc::new(executor(Arc::new(MemorySnapshotStore::new()), 1));
        let mut handles = Vec::new();
        for i in 0..8 {
            let exec = Arc::clone(&exec);
            handles.push(tokio::spawn(async move {
                exec.execute(&key(), &format!("git add file{i}.txt")).await.unwrap()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap().ok);
        }
        let view = exec.state(&key()).await.unwrap();
        assert_eq!(view.history.len(), 8);
        assert_eq!(view.status.staged.len(), 8);
    }

    #[tokio::test]
    async fn progress_lists_saved_sessions() {
        let exec = executor(Arc::new(MemorySnapshotStore::new()), 1);
        assert!(exec.progress("ada").await.unwrap().is_empty());
        exec.execute(&key(), "git add README.md").await.unwrap();
        assert_eq!(
            exec.progress("ada").await.unwrap(),
            vec![("fast-forward".to_string(), 1)]
        );
    }

    /// Fails the first `failures` saves, then delegates.
    struct Flaky {
        inner: MemorySnapshotStore,
        failures: AtomicU32,
    }

    impl SnapshotStore for Flaky {
        fn load(&self, key: &SessionKey, v: u32) -> Result<LoadOutcome, StoreError> {
            self.inner.load(key, v)
        }
        fn save(&self, key: &SessionKey, s: &Snapshot) -> Result<(), StoreError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Io(std::io::Error::other("disk hiccup")));
            }
            self.inner.save(key, s)
        }
        fn reset(&self, key: &SessionKey, v: u32) -> Result<Snapshot, StoreError> {
            self.inner.reset(key, v)
        }
        fn list(&self, learner_id: &str) -> Result<Vec<(String, u32)>, StoreError> {
            self.inner.list(learner_id)
        }
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            inner: MemorySnapshotStore::new(),
            failures: AtomicU32::new(failures),
        })
    }

    #[tokio::test]
    async fn saves_are_retried() {
        let exec = executor(flaky(2), 1).with_save_attempts(3);
        assert!(exec.execute(&key(), "git add README.md").await.unwrap().ok);
        assert_eq!(exec.state(&key()).await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_view() {
        let exec = executor(flaky(5), 1).with_save_attempts(2);
        let err = exec.execute(&key(), "git add README.md").await.unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Io(_))));
        let view = exec.state(&key()).await.unwrap();
        assert!(view.history.is_empty());
        assert!(view.status.staged.is_empty());
    }

    /// Reports its stored state as inconsistent until reset.
    struct Corrupted {
        inner: MemorySnapshotStore,
        corrupt: AtomicBool,
    }

    impl SnapshotStore for Corrupted {
        fn load(&self, key: &SessionKey, v: u32) -> Result<LoadOutcome, StoreError> {
            if self.corrupt.load(Ordering::SeqCst) {
                return Err(StoreError::Corrupt {
                    key: key.to_string(),
                    violation: InvariantViolation::DanglingHead(CommitId::from("abc")),
                });
            }
            self.inner.load(key, v)
        }
        fn save(&self, key: &SessionKey, s: &Snapshot) -> Result<(), StoreError> {
            self.inner.save(key, s)
        }
        fn reset(&self, key: &SessionKey, v: u32) -> Result<Snapshot, StoreError> {
            self.corrupt.store(false, Ordering::SeqCst);
            self.inner.reset(key, v)
        }
        fn list(&self, learner_id: &str) -> Result<Vec<(String, u32)>, StoreError> {
            self.inner.list(learner_id)
        }
    }

    #[tokio::test]
    async fn inconsistent_stored_state_halts_session() {
        let store = Arc::new(Corrupted {
            inner: MemorySnapshotStore::new(),
            corrupt: AtomicBool::new(true),
        });
        let exec = executor(store, 1);

        let err = exec.execute(&key(), "git status").await.unwrap_err();
        assert!(matches!(err, SessionError::Invariant(_)), "{err}");
        assert_eq!(err.code(), "session_halted");

        let err = exec.state(&key()).await.unwrap_err();
        assert!(matches!(err, SessionError::Poisoned { .. }), "{err}");

        exec.reset(&key()).await.unwrap();
        assert!(exec.execute(&key(), "git status").await.unwrap().ok);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_but_keep_progress() {
        let exec = executor(Arc::new(MemorySnapshotStore::new()), 1).with_session_capacity(2);
        let bob = SessionKey::new("bob", "fast-forward");
        exec.execute(&key(), "git add README.md").await.unwrap();
        exec.slot(&bob).lock().await.halted = Some("dangling branch".into());

        for learner in ["cy", "dee", "eve"] {
            exec.state(&SessionKey::new(learner, "fast-forward")).await.unwrap();
        }
        assert_eq!(exec.sessions.lock().unwrap().len(), 2);

        assert_eq!(exec.state(&key()).await.unwrap().history, vec!["git add README.md"]);
        let err = exec.state(&bob).await.unwrap_err();
        assert!(matches!(err, SessionError::Poisoned { .. }), "{err}");
    }
}
