use clap::Subcommand;
use gitdojo_store::{DojoConfig, DojoPaths};
use std::path::Path;

// ── CLI Schema ──

#[derive(Subcommand)]
pub enum ConfigCmd {
    /// Set a config value
    Set {
        /// Config key (e.g. port)
        key: String,
        /// Config value
        value: String,
    },
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },
    /// List all config values, defaults included
    List,
}

// ── Dispatch ──

pub fn run(cmd: ConfigCmd, root: &Path) -> anyhow::Result<()> {
    let paths = DojoPaths::discover(root);
    if !paths.is_initialized() {
        anyhow::bail!("No .gitdojo/ workspace found. Run `gitdojo init` first.");
    }
    match cmd {
        ConfigCmd::Set { key, value } => set(&paths, &key, &value),
        ConfigCmd::Get { key } => get(&paths, &key),
        ConfigCmd::List => list(&paths),
    }
}

// ── Command Implementations ──

/// `gitdojo config set <key> <value>`
fn set(paths: &DojoPaths, key: &str, value: &str) -> anyhow::Result<()> {
    let config = DojoConfig::set(paths, key, value)?;
    if let Some(val) = config.get(key) {
        println!("{key} = {val}");
    }
    Ok(())
}

/// `gitdojo config get <key>`
fn get(paths: &DojoPaths, key: &str) -> anyhow::Result<()> {
    let config = DojoConfig::load(paths)?;
    match config.get(key) {
        Some(val) => println!("{val}"),
        None => anyhow::bail!(
            "unknown config key \"{key}\" (known keys: {})",
            DojoConfig::keys().join(", ")
        ),
    }
    Ok(())
}

/// `gitdojo config list`
fn list(paths: &DojoPaths) -> anyhow::Result<()> {
    let config = DojoConfig::load(paths)?;
    for (k, v) in config.entries() {
        println!("{k} = {v}");
    }
    Ok(())
}
