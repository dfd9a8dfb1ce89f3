//! Practice definitions authored as YAML.
//!
//! ```yaml
//! id: branch-and-merge
//! title: Branch and merge
//! version: 2
//! setup:
//!   - git add README.md
//!   - git commit -m "init"
//! goal:
//!   commands:
//!     - git branch feature
//!     - git checkout feature
//!     - git add work.txt
//!     - git commit -m "work"
//!     - git checkout main
//!     - git merge feature
//! expected_commands:
//!   - { command: git branch feature, required: false }
//!   - git merge feature
//! rules:
//!   - dag_shape
//!   - branch_exists: feature
//!   - { type: head_on_branch, value: main, message: "finish on main" }
//! ```

use crate::engine::{default_rules, validate, Verdict};
use crate::rule::{RuleSpec, ValidationRule, RULE_TYPES};
use anyhow::{bail, Context, Result};
use gitdojo_core::{apply, parse, RepoState, DEFAULT_BRANCH};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Practice {
    /// Kebab-case id, unique within a practice directory.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Bump whenever setup or goal changes; stale learner snapshots must reset.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub setup: Vec<String>,
    #[serde(default)]
    pub goal: Goal,
    #[serde(default)]
    pub expected_commands: Vec<ExpectedCommand>,
    /// Also grade the relative order of `expected_commands` (advisory).
    #[serde(default)]
    pub ordered: bool,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
    #[serde(default)]
    pub hints: Vec<String>,
}

fn default_version() -> u32 {
    1
}

/// Target of a practice: commands replayed on top of the setup state, or an
/// explicit state. Exactly one of the two may be given; an empty goal means
/// "leave the setup state as it is".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Goal {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Box<RepoState>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedCommand {
    pub command: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// A practice with its starting state, goal state and rule list resolved.
#[derive(Debug, Clone)]
pub struct CompiledPractice {
    pub practice: Practice,
    pub initial: RepoState,
    pub goal: RepoState,
    pub rules: Vec<ValidationRule>,
}

impl CompiledPractice {
    pub fn id(&self) -> &str {
        &self.practice.id
    }

    pub fn version(&self) -> u32 {
        self.practice.version
    }

    /// Grade `current` against the goal.
    pub fn verdict(&self, current: &RepoState, history: &[String]) -> Verdict {
        validate(current, &self.goal, &self.rules, history)
    }
}

impl Practice {
    /// Build the starting state, goal state and effective rules.
    pub fn compile(self) -> Result<CompiledPractice> {
        let initial = self.initial_state()?;
        let goal = match &self.goal.state {
            Some(state) => state.as_ref().clone(),
            None => replay(initial.clone(), &self.goal.commands)
                .with_context(|| format!("building goal of practice '{}'", self.id))?,
        };
        let rules = self.effective_rules();
        Ok(CompiledPractice {
            practice: self,
            initial,
            goal,
            rules,
        })
    }

    pub fn initial_state(&self) -> Result<RepoState> {
        let branch = self.default_branch.as_deref().unwrap_or(DEFAULT_BRANCH);
        replay(RepoState::new(branch), &self.setup)
            .with_context(|| format!("running setup of practice '{}'", self.id))
    }

    /// Declared rules (or the defaults when none are declared), then one
    /// `command_issued` rule per expected command, then an advisory
    /// `command_order` when `ordered` is set.
    pub fn effective_rules(&self) -> Vec<ValidationRule> {
        let mut rules = if self.rules.is_empty() {
            default_rules()
        } else {
            self.rules.clone()
        };
        rules.extend(self.expected_commands.iter().map(|c| ValidationRule {
            spec: RuleSpec::CommandIssued(c.command.clone()),
            required: c.required,
            message: None,
        }));
        if self.ordered && self.expected_commands.len() > 1 {
            rules.push(ValidationRule::advisory(RuleSpec::CommandOrder(
                self.expected_commands
                    .iter()
                    .map(|c| c.command.clone())
                    .collect(),
            )));
        }
        rules
    }
}

/// Apply `commands` in order, failing on the first rejected one.
pub fn replay(start: RepoState, commands: &[String]) -> Result<RepoState> {
    let mut state = start;
    for line in commands {
        let op = parse(line).with_context(|| format!("parsing `{line}`"))?;
        state = apply(&state, &op)
            .with_context(|| format!("applying `{line}`"))?
            .state;
    }
    Ok(state)
}

/// Load and validate a practice from a YAML file.
pub fn load_practice(path: &Path) -> Result<Practice> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_practice(&content).with_context(|| format!("loading {}", path.display()))
}

/// Load every `*.yaml` / `*.yml` practice in `dir`, sorted by id.
pub fn load_dir(dir: &Path) -> Result<Vec<Practice>> {
    let mut practices = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml {
            practices.push(load_practice(&path)?);
        }
    }
    practices.sort_by(|a, b| a.id.cmp(&b.id));
    for pair in practices.windows(2) {
        if pair[0].id == pair[1].id {
            bail!("duplicate practice id '{}' in {}", pair[0].id, dir.display());
        }
    }
    Ok(practices)
}

/// Parse and validate a practice from a YAML string.
pub fn parse_practice(yaml: &str) -> Result<Practice> {
    let mut raw: Value = serde_yaml::from_str(yaml).context("invalid YAML syntax")?;

    normalize_rules(&mut raw)?;
    normalize_expected_commands(&mut raw)?;

    let practice: Practice =
        serde_yaml::from_value(raw).context("practice schema validation failed")?;
    validate_practice(&practice)?;
    Ok(practice)
}

/// Rewrite short-form rules into the tagged form.
///
/// Short: `branch_exists: feature` or a bare `dag_shape`
/// Long:  `{ type: branch_exists, value: feature }`
fn normalize_rules(raw: &mut Value) -> Result<()> {
    let rules = match raw.get_mut("rules") {
        Some(Value::Sequence(seq)) => seq,
        Some(Value::Null) | None => return Ok(()),
        Some(_) => bail!("rules must be a list"),
    };
    for rule in rules.iter_mut() {
        if let Some(normalized) = normalize_one_rule(rule)? {
            *rule = normalized;
        }
    }
    Ok(())
}

fn normalize_one_rule(rule: &Value) -> Result<Option<Value>> {
    let (kind, value) = match rule {
        Value::String(kind) => (kind.as_str(), Value::Null),
        Value::Mapping(map) => {
            if map.contains_key("type") {
                return Ok(None);
            }
            let mut iter = map.iter();
            let (Some((key, value)), None) = (iter.next(), iter.next()) else {
                bail!(
                    "short-form rule must have exactly one key, got {}",
                    map.len()
                );
            };
            let kind = key
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("rule key must be a string"))?;
            (kind, value.clone())
        }
        other => bail!("rule must be a string or a mapping, got: {other:?}"),
    };

    if !RULE_TYPES.contains(&kind) {
        bail!(
            "unknown rule type: \"{kind}\". Valid types: {}",
            RULE_TYPES.join(", ")
        );
    }

    let mut out = Mapping::new();
    out.insert("type".into(), kind.into());
    if !value.is_null() {
        out.insert("value".into(), value);
    }
    Ok(Some(Value::Mapping(out)))
}

fn normalize_expected_commands(raw: &mut Value) -> Result<()> {
    let commands = match raw.get_mut("expected_commands") {
        Some(Value::Sequence(seq)) => seq,
        Some(Value::Null) | None => return Ok(()),
        Some(_) => bail!("expected_commands must be a list"),
    };
    for cmd in commands.iter_mut() {
        if let Value::String(line) = cmd {
            let mut out = Mapping::new();
            out.insert("command".into(), line.clone().into());
            *cmd = Value::Mapping(out);
        }
    }
    Ok(())
}

fn validate_practice(practice: &Practice) -> Result<()> {
    if !is_kebab_case(&practice.id) {
        bail!("practice id must be kebab-case: \"{}\"", practice.id);
    }
    if practice.title.trim().is_empty() {
        bail!("practice '{}' has an empty title", practice.id);
    }
    if practice.goal.state.is_some() && !practice.goal.commands.is_empty() {
        bail!(
            "practice '{}': goal takes either `state` or `commands`, not both",
            practice.id
        );
    }
    if practice.version == 0 {
        bail!("practice '{}': version must be at least 1", practice.id);
    }
    if let Some(branch) = &practice.default_branch {
        gitdojo_core::validate_branch_name("default_branch", branch)?;
    }
    for cmd in &practice.expected_commands {
        if cmd.command.trim().is_empty() {
            bail!("practice '{}': empty expected command", practice.id);
        }
    }
    Ok(())
}

fn is_kebab_case(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && !s.contains("--")
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
