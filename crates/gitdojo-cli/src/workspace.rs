use anyhow::Context;
use gitdojo_check::{load_dir, CompiledPractice};
use gitdojo_session::Executor;
use gitdojo_store::{DojoConfig, DojoPaths, SessionKey, SqliteSnapshotStore};
use std::path::Path;
use std::sync::Arc;

/// An initialized `.gitdojo/` workspace with its config loaded.
pub struct Workspace {
    pub paths: DojoPaths,
    pub config: DojoConfig,
}

impl Workspace {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let paths = DojoPaths::discover(root);
        if !paths.is_initialized() {
            anyhow::bail!("No .gitdojo/ workspace found. Run `gitdojo init` first.");
        }
        let config = DojoConfig::load(&paths)?;
        tracing::debug!(root = %paths.root.display(), "workspace opened");
        Ok(Self { paths, config })
    }

    /// Load and compile every practice under the configured directory.
    pub fn practices(&self) -> anyhow::Result<Vec<CompiledPractice>> {
        let dir = self.config.practices_dir(&self.paths);
        let practices = load_dir(&dir)
            .with_context(|| format!("loading practices from {}", dir.display()))?;
        practices
            .into_iter()
            .map(|mut p| {
                p.default_branch
                    .get_or_insert_with(|| self.config.default_branch.clone());
                p.compile()
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .inspect(|compiled| {
                tracing::debug!(count = compiled.len(), dir = %dir.display(), "practices loaded");
            })
    }

    pub fn executor(&self) -> anyhow::Result<Executor> {
        let practices = self.practices()?;
        let db = self.config.store_path(&self.paths);
        let store = SqliteSnapshotStore::open_or_create(&db)
            .with_context(|| format!("opening snapshot store {}", db.display()))?;
        tracing::debug!(db = %db.display(), "snapshot store opened");
        Ok(Executor::new(Arc::new(store), practices)
            .with_save_attempts(self.config.save_attempts))
    }
}

/// Build a session key, checking the practice exists first so the error
/// names what is available.
pub fn session_key(executor: &Executor, learner: &str, practice: &str) -> anyhow::Result<SessionKey> {
    if executor.practice(practice).is_none() {
        let known: Vec<String> = executor.practices().into_iter().map(|p| p.id).collect();
        if known.is_empty() {
            anyhow::bail!("unknown practice \"{practice}\" (no practices are installed)");
        }
        anyhow::bail!(
            "unknown practice \"{practice}\" (available: {})",
            known.join(", ")
        );
    }
    Ok(SessionKey::new(learner, practice))
}
