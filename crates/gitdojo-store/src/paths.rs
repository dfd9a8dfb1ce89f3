use std::path::{Path, PathBuf};

/// Well-known paths under `.gitdojo/`.
#[derive(Debug, Clone)]
pub struct DojoPaths {
    pub root: PathBuf,
    pub dojo_dir: PathBuf,
    pub store_db: PathBuf,
    pub config_json: PathBuf,
    pub config_lock: PathBuf,
    pub lock_file: PathBuf,
}

impl DojoPaths {
    /// Derive all paths from a workspace root. Pure computation, no I/O.
    pub fn discover(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dojo_dir = root.join(".gitdojo");
        Self {
            store_db: dojo_dir.join("store.db"),
            config_json: dojo_dir.join("config.json"),
            config_lock: dojo_dir.join("config.lock"),
            lock_file: dojo_dir.join("LOCK"),
            dojo_dir,
            root,
        }
    }

    /// Create `.gitdojo/`. Idempotent.
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dojo_dir)?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.dojo_dir.is_dir()
    }

    /// Resolve a configured path; relative paths are taken from the workspace root.
    pub fn resolve(&self, configured: &Path) -> PathBuf {
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            self.root.join(configured)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_is_pure() {
        let p = DojoPaths::discover("/tmp/nowhere-gitdojo");
        assert_eq!(p.dojo_dir, PathBuf::from("/tmp/nowhere-gitdojo/.gitdojo"));
        assert_eq!(p.store_db, p.dojo_dir.join("store.db"));
        assert!(!p.is_initialized());
    }

    #[test]
    fn ensure_layout_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let p = DojoPaths::discover(tmp.path());
        p.ensure_layout().unwrap();
        p.ensure_layout().unwrap();
        assert!(p.is_initialized());
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let p = DojoPaths::discover("/work");
        assert_eq!(p.resolve(Path::new("practices")), PathBuf::from("/work/practices"));
        assert_eq!(p.resolve(Path::new("/srv/db")), PathBuf::from("/srv/db"));
    }
}
