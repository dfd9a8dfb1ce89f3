use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// What a single rule checks.
///
/// On the wire a rule is `{ type, value, message?, required? }`; the short
/// YAML form `- branch_exists: feature` is normalized to that by the
/// practice loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSpec {
    DagShape,
    /// `None` compares against the goal's reachable commit count.
    CommitCount(Option<usize>),
    BranchExists(String),
    BranchAbsent(String),
    BranchMatchesGoal(String),
    BranchesMatchGoal,
    HeadMatchesGoal,
    HeadOnBranch(String),
    HeadDetached,
    FileExists(String),
    FileAbsent(String),
    CommitMessage(String),
    CleanWorkingTree,
    MergeCommitExists,
    CommandIssued(String),
    CommandOrder(Vec<String>),
}

pub const RULE_TYPES: &[&str] = &[
    "dag_shape",
    "commit_count",
    "branch_exists",
    "branch_absent",
    "branch_matches_goal",
    "branches_match_goal",
    "head_matches_goal",
    "head_on_branch",
    "head_detached",
    "file_exists",
    "file_absent",
    "commit_message",
    "clean_working_tree",
    "merge_commit_exists",
    "command_issued",
    "command_order",
];

impl RuleSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleSpec::DagShape => "dag_shape",
            RuleSpec::CommitCount(_) => "commit_count",
            RuleSpec::BranchExists(_) => "branch_exists",
            RuleSpec::BranchAbsent(_) => "branch_absent",
            RuleSpec::BranchMatchesGoal(_) => "branch_matches_goal",
            RuleSpec::BranchesMatchGoal => "branches_match_goal",
            RuleSpec::HeadMatchesGoal => "head_matches_goal",
            RuleSpec::HeadOnBranch(_) => "head_on_branch",
            RuleSpec::HeadDetached => "head_detached",
            RuleSpec::FileExists(_) => "file_exists",
            RuleSpec::FileAbsent(_) => "file_absent",
            RuleSpec::CommitMessage(_) => "commit_message",
            RuleSpec::CleanWorkingTree => "clean_working_tree",
            RuleSpec::MergeCommitExists => "merge_commit_exists",
            RuleSpec::CommandIssued(_) => "command_issued",
            RuleSpec::CommandOrder(_) => "command_order",
        }
    }

    fn value(&self) -> Value {
        match self {
            RuleSpec::DagShape
            | RuleSpec::BranchesMatchGoal
            | RuleSpec::HeadMatchesGoal
            | RuleSpec::HeadDetached
            | RuleSpec::CleanWorkingTree
            | RuleSpec::MergeCommitExists => Value::Null,
            RuleSpec::CommitCount(n) => n.map(Value::from).unwrap_or(Value::Null),
            RuleSpec::BranchExists(s)
            | RuleSpec::BranchAbsent(s)
            | RuleSpec::BranchMatchesGoal(s)
            | RuleSpec::HeadOnBranch(s)
            | RuleSpec::FileExists(s)
            | RuleSpec::FileAbsent(s)
            | RuleSpec::CommitMessage(s)
            | RuleSpec::CommandIssued(s) => Value::from(s.as_str()),
            RuleSpec::CommandOrder(list) => Value::from(list.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("unknown rule type \"{0}\"")]
    UnknownType(String),

    #[error("rule {rule}: value must be {expected}")]
    InvalidValue {
        rule: &'static str,
        expected: &'static str,
    },
}

/// A rule plus its grading metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRule", into = "RawRule")]
pub struct ValidationRule {
    pub spec: RuleSpec,
    /// Required rules decide `is_correct`; advisory ones only feed the score.
    pub required: bool,
    /// Instructor feedback shown when the rule fails.
    pub message: Option<String>,
}

impl ValidationRule {
    pub fn required(spec: RuleSpec) -> Self {
        Self {
            spec,
            required: true,
            message: None,
        }
    }

    pub fn advisory(spec: RuleSpec) -> Self {
        Self {
            spec,
            required: false,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRule {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default = "default_required")]
    required: bool,
}

fn default_required() -> bool {
    true
}

impl From<ValidationRule> for RawRule {
    fn from(rule: ValidationRule) -> Self {
        RawRule {
            kind: rule.spec.type_name().to_string(),
            value: rule.spec.value(),
            message: rule.message,
            required: rule.required,
        }
    }
}

impl TryFrom<RawRule> for ValidationRule {
    type Error = RuleError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let spec = spec_from(&raw.kind, &raw.value)?;
        Ok(ValidationRule {
            spec,
            required: raw.required,
            message: raw.message,
        })
    }
}

fn text(rule: &'static str, value: &Value) -> Result<String, RuleError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(RuleError::InvalidValue {
            rule,
            expected: "a non-empty string",
        }),
    }
}

fn spec_from(kind: &str, value: &Value) -> Result<RuleSpec, RuleError> {
    let spec = match kind {
        "dag_shape" => RuleSpec::DagShape,
        "commit_count" => match value {
            Value::Null => RuleSpec::CommitCount(None),
            v => RuleSpec::CommitCount(Some(
                v.as_u64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or(RuleError::InvalidValue {
                        rule: "commit_count",
                        expected: "a non-negative integer",
                    })?,
            )),
        },
        "branch_exists" => RuleSpec::BranchExists(text("branch_exists", value)?),
        "branch_absent" => RuleSpec::BranchAbsent(text("branch_absent", value)?),
        "branch_matches_goal" => RuleSpec::BranchMatchesGoal(text("branch_matches_goal", value)?),
        "branches_match_goal" => RuleSpec::BranchesMatchGoal,
        "head_matches_goal" => RuleSpec::HeadMatchesGoal,
        "head_on_branch" => RuleSpec::HeadOnBranch(text("head_on_branch", value)?),
        "head_detached" => RuleSpec::HeadDetached,
        "file_exists" => RuleSpec::FileExists(text("file_exists", value)?),
        "file_absent" => RuleSpec::FileAbsent(text("file_absent", value)?),
        "commit_message" => RuleSpec::CommitMessage(text("commit_message", value)?),
        "clean_working_tree" => RuleSpec::CleanWorkingTree,
        "merge_commit_exists" => RuleSpec::MergeCommitExists,
        "command_issued" => RuleSpec::CommandIssued(text("command_issued", value)?),
        "command_order" => {
            let invalid = RuleError::InvalidValue {
                rule: "command_order",
                expected: "a list of command strings",
            };
            let items = value.as_array().ok_or_else(|| invalid.clone())?;
            let commands = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(invalid)?;
            RuleSpec::CommandOrder(commands)
        }
        other => return Err(RuleError::UnknownType(other.to_string())),
    };
    Ok(spec)
}
