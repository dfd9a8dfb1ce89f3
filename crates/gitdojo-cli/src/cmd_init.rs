use gitdojo_store::{DojoConfig, DojoPaths, SqliteSnapshotStore};
use std::path::Path;

const STARTER_PRACTICE: &str = "\
id: first-commit
title: Your first commit
description: Stage a file and record it in a commit.
version: 1
goal:
  commands:
    - git add README.md
    - git commit -m \"init\"
expected_commands:
  - git add
  - git commit
ordered: true
rules:
  - commit_count: 1
  - { type: clean_working_tree, message: \"commit everything you staged\" }
hints:
  - Stage a file with `git add README.md`.
  - Record it with `git commit -m \"init\"`.
";

pub fn execute(root: &Path) -> anyhow::Result<()> {
    let paths = DojoPaths::discover(root);

    if paths.is_initialized() {
        println!("Already initialized at {}", paths.dojo_dir.display());
        return Ok(());
    }

    paths.ensure_layout()?;
    let config = DojoConfig::default();
    config.save(&paths)?;

    // Create the store up front so schema problems surface here, not mid-session.
    SqliteSnapshotStore::open_or_create(&config.store_path(&paths))?;

    let practices_dir = config.practices_dir(&paths);
    if !practices_dir.exists() {
        std::fs::create_dir_all(&practices_dir)?;
        std::fs::write(practices_dir.join("first-commit.yaml"), STARTER_PRACTICE)?;
        println!("Wrote starter practice to {}", practices_dir.display());
    }

    println!("Initialized gitdojo workspace at {}", paths.dojo_dir.display());
    println!("Next: gitdojo play first-commit");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;

    #[test]
    fn init_creates_a_usable_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        execute(tmp.path()).unwrap();

        let ws = Workspace::open(tmp.path()).unwrap();
        assert_eq!(ws.config, DojoConfig::default());
        assert!(ws.paths.config_json.exists());
        assert!(ws.config.store_path(&ws.paths).exists());

        let practices = ws.practices().unwrap();
        assert_eq!(practices.len(), 1);
        assert_eq!(practices[0].id(), "first-commit");

        // Second run is a no-op.
        execute(tmp.path()).unwrap();
    }
}
