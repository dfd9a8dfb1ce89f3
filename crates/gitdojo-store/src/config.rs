//! Workspace configuration stored in `.gitdojo/config.json`.

use crate::fs::{lock_file, write_atomic};
use crate::paths::DojoPaths;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DojoConfig {
    /// Branch HEAD is attached to in a fresh practice repository.
    pub default_branch: String,
    /// SQLite snapshot database, relative to the workspace root.
    pub store_path: PathBuf,
    /// Directory scanned for practice YAML files.
    pub practices_dir: PathBuf,
    pub bind: String,
    pub port: u16,
    /// How many times a failed snapshot save is attempted before giving up.
    pub save_attempts: u32,
}

impl Default for DojoConfig {
    fn default() -> Self {
        Self {
            default_branch: gitdojo_core::DEFAULT_BRANCH.to_string(),
            store_path: PathBuf::from(".gitdojo/store.db"),
            practices_dir: PathBuf::from("practices"),
            bind: "127.0.0.1".to_string(),
            port: 7878,
            save_attempts: 3,
        }
    }
}

impl DojoConfig {
    /// Load the config, falling back to defaults when the file does not exist.
    pub fn load(paths: &DojoPaths) -> anyhow::Result<Self> {
        let map = read_map(&paths.config_json)?;
        Self::from_map(map).with_context(|| format!("invalid {}", paths.config_json.display()))
    }

    pub fn save(&self, paths: &DojoPaths) -> anyhow::Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&paths.config_json, json.as_bytes())
    }

    /// Set one key from its command-line text and persist the result.
    ///
    /// Only the keys already present in the file plus `key` are written, so
    /// unset keys keep following the defaults.
    pub fn set(paths: &DojoPaths, key: &str, raw: &str) -> anyhow::Result<Self> {
        let _guard = lock_file(&paths.config_lock)?;
        let defaults = serde_json::to_value(Self::default())?;
        let Some(current) = defaults.get(key) else {
            anyhow::bail!(
                "unknown config key \"{key}\" (known keys: {})",
                Self::keys().join(", ")
            );
        };
        let value = match current {
            Value::String(_) => Value::String(raw.to_string()),
            _ => parse_value(raw),
        };

        let mut map = read_map(&paths.config_json)?;
        map.insert(key.to_string(), value);
        let config = Self::from_map(map.clone())
            .with_context(|| format!("cannot set {key} to \"{raw}\""))?;

        let json = serde_json::to_string_pretty(&map)?;
        write_atomic(&paths.config_json, json.as_bytes())?;
        tracing::info!(key, value = raw, "config updated");
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        serde_json::to_value(self).ok()?.get(key).cloned()
    }

    /// Every key with its effective value, sorted by key.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        map.into_iter().collect()
    }

    pub fn keys() -> Vec<String> {
        Self::default().entries().into_iter().map(|(k, _)| k).collect()
    }

    pub fn store_path(&self, paths: &DojoPaths) -> PathBuf {
        paths.resolve(&self.store_path)
    }

    pub fn practices_dir(&self, paths: &DojoPaths) -> PathBuf {
        paths.resolve(&self.practices_dir)
    }

    fn from_map(map: Map<String, Value>) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_value(Value::Object(map))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        gitdojo_core::validate_branch_name("config", &self.default_branch)?;
        if self.save_attempts == 0 {
            anyhow::bail!("save_attempts must be at least 1");
        }
        if self.bind.trim().is_empty() {
            anyhow::bail!("bind must not be empty");
        }
        Ok(())
    }
}

/// Read the raw JSON object. Missing file reads as empty.
fn read_map(path: &Path) -> anyhow::Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = std::fs::read_to_string(path)?;
    match serde_json::from_str(&content)? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("{} is not a JSON object", path.display()),
    }
}

/// Interpret command-line text as bool, integer, float or string.
pub fn parse_value(s: &str) -> Value {
    match s {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(n) = s.parse::<i64>() {
                Value::Number(n.into())
            } else if let Ok(f) = s.parse::<f64>() {
                serde_json::json!(f)
            } else {
                Value::String(s.to_string())
            }
        }
    }
}
