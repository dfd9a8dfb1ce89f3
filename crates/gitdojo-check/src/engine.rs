use crate::rule::{RuleSpec, ValidationRule};
use crate::shape::{commit_shapes, dag_signature, describe};
use gitdojo_core::graph;
use gitdojo_core::{tokenize, CommitId, Head, RepoState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: String,
    pub passed: bool,
    pub required: bool,
    pub expected: String,
    pub actual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Graded comparison of a learner's state against a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// AND of all required rules.
    pub is_correct: bool,
    pub results: Vec<RuleResult>,
    /// Fraction of rules passed, required and advisory alike.
    pub score: f64,
}

impl Verdict {
    pub fn failed_required(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| r.required && !r.passed)
    }
}

/// Evaluate `rules` in order. Pure: the same inputs always give the same verdict.
pub fn validate(
    current: &RepoState,
    goal: &RepoState,
    rules: &[ValidationRule],
    history: &[String],
) -> Verdict {
    let ctx = Ctx::new(current, goal, history);
    let results: Vec<RuleResult> = rules
        .iter()
        .map(|rule| {
            let (passed, expected, actual) = ctx.check(&rule.spec);
            RuleResult {
                rule: rule.spec.type_name().to_string(),
                passed,
                required: rule.required,
                expected,
                actual,
                message: if passed { None } else { rule.message.clone() },
            }
        })
        .collect();

    let is_correct = results.iter().filter(|r| r.required).all(|r| r.passed);
    let score = if results.is_empty() {
        1.0
    } else {
        results.iter().filter(|r| r.passed).count() as f64 / results.len() as f64
    };
    tracing::debug!(rules = results.len(), is_correct, score, "validated");
    Verdict {
        is_correct,
        results,
        score,
    }
}

/// Rules used when a practice declares none.
pub fn default_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::required(RuleSpec::DagShape),
        ValidationRule::required(RuleSpec::BranchesMatchGoal),
        ValidationRule::required(RuleSpec::HeadMatchesGoal),
    ]
}

struct Ctx<'a> {
    current: &'a RepoState,
    goal: &'a RepoState,
    history: &'a [String],
    current_shapes: HashMap<CommitId, String>,
    goal_shapes: HashMap<CommitId, String>,
}

impl<'a> Ctx<'a> {
    fn new(current: &'a RepoState, goal: &'a RepoState, history: &'a [String]) -> Self {
        Self {
            current,
            goal,
            history,
            current_shapes: commit_shapes(current),
            goal_shapes: commit_shapes(goal),
        }
    }

    fn current_branch_shape(&self, name: &str) -> Option<&String> {
        self.current
            .branch(name)
            .and_then(|id| self.current_shapes.get(id))
    }

    fn goal_branch_shape(&self, name: &str) -> Option<&String> {
        self.goal.branch(name).and_then(|id| self.goal_shapes.get(id))
    }

    /// `(passed, expected, actual)`.
    fn check(&self, spec: &RuleSpec) -> (bool, String, String) {
        let current = self.current;
        match spec {
            RuleSpec::DagShape => (
                dag_signature(current, &self.current_shapes)
                    == dag_signature(self.goal, &self.goal_shapes),
                describe(self.goal),
                describe(current),
            ),
            RuleSpec::CommitCount(n) => {
                let expected = n.unwrap_or_else(|| graph::reachable(self.goal).len());
                let actual = graph::reachable(current).len();
                (
                    expected == actual,
                    format!("{expected} commits"),
                    format!("{actual} commits"),
                )
            }
            RuleSpec::BranchExists(name) => (
                current.branch(name).is_some(),
                format!("branch '{name}' exists"),
                branch_list(current),
            ),
            RuleSpec::BranchAbsent(name) => (
                current.branch(name).is_none(),
                format!("no branch '{name}'"),
                branch_list(current),
            ),
            RuleSpec::BranchMatchesGoal(name) => {
                let want = self.goal_branch_shape(name);
                let have = self.current_branch_shape(name);
                let expected = match want {
                    Some(_) => format!("'{name}' at the goal's position"),
                    None => format!("no branch '{name}'"),
                };
                let actual = match (have, want) {
                    (None, _) => format!("no branch '{name}'"),
                    (Some(h), Some(w)) if h == w => format!("'{name}' at the goal's position"),
                    (Some(_), _) => format!("'{name}' at a different position"),
                };
                (want == have, expected, actual)
            }
            RuleSpec::BranchesMatchGoal => {
                let mismatched: Vec<&str> = self
                    .goal
                    .branches()
                    .keys()
                    .filter(|name| {
                        let want = self.goal_branch_shape(name);
                        want.is_none() || want != self.current_branch_shape(name)
                    })
                    .map(String::as_str)
                    .collect();
                let expected = branch_list(self.goal);
                let actual = if mismatched.is_empty() {
                    expected.clone()
                } else {
                    format!("mismatched: {}", mismatched.join(", "))
                };
                (mismatched.is_empty(), expected, actual)
            }
            RuleSpec::HeadMatchesGoal => {
                let passed = match (self.goal.head(), current.head()) {
                    (Head::Attached(want), Head::Attached(have)) => want == have,
                    (Head::Detached(want), Head::Detached(have)) => {
                        let want = self.goal_shapes.get(want);
                        want.is_some() && want == self.current_shapes.get(have)
                    }
                    _ => false,
                };
                (passed, head_label(self.goal), head_label(current))
            }
            RuleSpec::HeadOnBranch(name) => (
                current.current_branch() == Some(name.as_str()),
                format!("on branch {name}"),
                head_label(current),
            ),
            RuleSpec::HeadDetached => (
                matches!(current.head(), Head::Detached(_)),
                "HEAD detached".to_string(),
                head_label(current),
            ),
            RuleSpec::FileExists(path) => {
                let present = current.head_tree().contains_key(path);
                (
                    present,
                    format!("'{path}' committed"),
                    presence(path, present),
                )
            }
            RuleSpec::FileAbsent(path) => {
                let present = current.head_tree().contains_key(path);
                (
                    !present,
                    format!("'{path}' not committed"),
                    presence(path, present),
                )
            }
            RuleSpec::CommitMessage(text) => {
                let message = current.head_commit().map(|c| c.message.as_str());
                let passed = message
                    .is_some_and(|m| m.to_lowercase().contains(&text.to_lowercase()));
                (
                    passed,
                    format!("HEAD message containing \"{text}\""),
                    match message {
                        Some(m) => format!("\"{}\"", m.lines().next().unwrap_or("")),
                        None => "no commits".to_string(),
                    },
                )
            }
            RuleSpec::CleanWorkingTree => {
                let wt = current.working_tree();
                let actual = if current.is_clean() {
                    "clean".to_string()
                } else if current.merge_head().is_some() {
                    "merge in progress".to_string()
                } else {
                    let paths: Vec<&str> = wt.paths().map(String::as_str).collect();
                    format!("pending: {}", paths.join(", "))
                };
                (current.is_clean(), "clean".to_string(), actual)
            }
            RuleSpec::MergeCommitExists => {
                let merges = graph::reachable(current)
                    .iter()
                    .filter_map(|id| current.commit(id))
                    .filter(|c| c.is_merge())
                    .count();
                (
                    merges > 0,
                    "at least one merge commit".to_string(),
                    format!("{merges} merge commits"),
                )
            }
            RuleSpec::CommandIssued(expected) => {
                let hit = self
                    .history
                    .iter()
                    .find(|line| command_matches(expected, line));
                (
                    hit.is_some(),
                    format!("ran `{expected}`"),
                    match hit {
                        Some(line) => format!("ran `{line}`"),
                        None => "not run".to_string(),
                    },
                )
            }
            RuleSpec::CommandOrder(expected) => {
                let mut cursor = 0;
                let mut matched = 0;
                for want in expected {
                    match self.history[cursor..]
                        .iter()
                        .position(|line| command_matches(want, line))
                    {
                        Some(offset) => {
                            cursor += offset + 1;
                            matched += 1;
                        }
                        None => break,
                    }
                }
                let actual = match expected.get(matched) {
                    None => "in order".to_string(),
                    Some(next) => format!("`{next}` missing or out of order"),
                };
                (
                    matched == expected.len(),
                    format!("in order: {}", expected.join(" → ")),
                    actual,
                )
            }
        }
    }
}

fn branch_list(state: &RepoState) -> String {
    if state.branches().is_empty() {
        return "no branches".to_string();
    }
    let names: Vec<&str> = state.branches().keys().map(String::as_str).collect();
    format!("branches: {}", names.join(", "))
}

fn head_label(state: &RepoState) -> String {
    match state.head() {
        Head::Attached(name) => format!("on branch {name}"),
        Head::Detached(id) => format!("HEAD detached at {}", id.short()),
    }
}

fn presence(path: &str, present: bool) -> String {
    if present {
        format!("'{path}' committed")
    } else {
        format!("'{path}' not committed")
    }
}

/// Tokens of a command line with the optional `git` prefix removed.
fn normalized_tokens(line: &str) -> Vec<String> {
    let mut tokens =
        tokenize(line).unwrap_or_else(|_| line.split_whitespace().map(str::to_string).collect());
    if tokens.first().is_some_and(|t| t == "git") {
        tokens.remove(0);
    }
    tokens
}

/// Does history `line` satisfy the `expected` command?
///
/// `re:<pattern>` matches the normalized line with a regex; anything else
/// matches when its tokens are a prefix of the line's tokens.
pub fn command_matches(expected: &str, line: &str) -> bool {
    let have = normalized_tokens(line);
    if let Some(pattern) = expected.strip_prefix("re:") {
        return regex::Regex::new(pattern.trim())
            .map(|re| re.is_match(&have.join(" ")))
            .unwrap_or(false);
    }
    let want = normalized_tokens(expected);
    !want.is_empty() && have.len() >= want.len() && have.iter().zip(&want).all(|(h, w)| h == w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitdojo_core::{apply, parse};

    fn run(lines: &[&str]) -> RepoState {
        let mut state = RepoState::default();
        for line in lines {
            state = apply(&state, &parse(line).unwrap()).unwrap().state;
        }
        state
    }

    fn history(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    const SCENARIO: &[&str] = &[
        "git add README.md",
        r#"git commit -m "init""#,
        "git branch feature",
        "git checkout feature",
        "git add work.txt",
        r#"git commit -m "work""#,
        "git checkout main",
        "git merge feature",
    ];

    #[test]
    fn no_rules_is_correct_with_full_score() {
        let s = RepoState::default();
        let v = validate(&s, &s, &[], &[]);
        assert!(v.is_correct);
        assert_eq!(v.score, 1.0);
    }

    #[test]
    fn default_rules_accept_same_shape_with_other_content() {
        let goal = run(SCENARIO);
        let learner = run(&[
            "echo hello > notes.md",
            "git add notes.md",
            "git commit -m first",
            "git checkout -b feature",
            "git add more.md",
            "git commit -m second",
            "git switch main",
            "git merge feature",
        ]);
        let v = validate(&learner, &goal, &default_rules(), &[]);
        assert!(v.is_correct, "{:#?}", v.results);
        assert_eq!(v.score, 1.0);
    }

    #[test]
    fn default_rules_reject_true_merge_when_goal_fast_forwards() {
        let goal = run(SCENARIO);
        let mut lines = SCENARIO.to_vec();
        lines[7] = "git merge --no-ff feature";
        let learner = run(&lines);
        let v = validate(&learner, &goal, &default_rules(), &[]);
        assert!(!v.is_correct);
        let dag = &v.results[0];
        assert_eq!(dag.rule, "dag_shape");
        assert!(!dag.passed);
        assert_eq!(dag.actual, "3 commits, 1 merge, branches: feature, main");
    }

    #[test]
    fn advisory_failures_lower_score_only() {
        let s = run(&["git add a", "git commit -m one"]);
        let rules = vec![
            ValidationRule::required(RuleSpec::BranchExists("main".into())),
            ValidationRule::advisory(RuleSpec::BranchExists("feature".into()))
                .with_message("create a feature branch"),
        ];
        let v = validate(&s, &s, &rules, &[]);
        assert!(v.is_correct);
        assert_eq!(v.score, 0.5);
        assert_eq!(v.results[1].message.as_deref(), Some("create a feature branch"));
        assert!(v.results[0].message.is_none());
        assert_eq!(v.failed_required().count(), 0);
    }

    #[test]
    fn validation_is_idempotent() {
        let goal = run(SCENARIO);
        let learner = run(&SCENARIO[..6]);
        let h = history(SCENARIO);
        let rules = default_rules();
        assert_eq!(
            validate(&learner, &goal, &rules, &h),
            validate(&learner, &goal, &rules, &h)
        );
    }

    #[test]
    fn head_and_branch_rules() {
        let goal = run(SCENARIO);
        let learner = run(&SCENARIO[..6]);
        let check = |spec: RuleSpec| validate(&learner, &goal, &[ValidationRule::required(spec)], &[]);
        assert!(!check(RuleSpec::HeadMatchesGoal).is_correct);
        assert!(check(RuleSpec::HeadOnBranch("feature".into())).is_correct);
        assert!(!check(RuleSpec::HeadDetached).is_correct);
        assert!(check(RuleSpec::BranchMatchesGoal("feature".into())).is_correct);
        assert!(!check(RuleSpec::BranchMatchesGoal("main".into())).is_correct);
        assert!(check(RuleSpec::BranchAbsent("hotfix".into())).is_correct);
        assert!(check(RuleSpec::BranchMatchesGoal("hotfix".into())).is_correct);
        assert!(check(RuleSpec::CommitCount(None)).is_correct);
        assert!(!check(RuleSpec::CommitCount(Some(1))).is_correct);
    }

    #[test]
    fn file_and_message_rules() {
        let s = run(&["git add README.md", "git commit -m 'Add README'", "echo x > scratch"]);
        let check = |spec: RuleSpec| validate(&s, &s, &[ValidationRule::required(spec)], &[]);
        assert!(check(RuleSpec::FileExists("README.md".into())).is_correct);
        assert!(check(RuleSpec::FileAbsent("scratch".into())).is_correct);
        assert!(check(RuleSpec::CommitMessage("readme".into())).is_correct);
        let dirty = check(RuleSpec::CleanWorkingTree);
        assert!(!dirty.is_correct);
        assert_eq!(dirty.results[0].actual, "pending: scratch");
        assert!(!check(RuleSpec::MergeCommitExists).is_correct);
    }

    #[test]
    fn command_matching_normalizes_prefix_and_whitespace() {
        assert!(command_matches("git commit", r#"commit  -m "x""#));
        assert!(command_matches("merge feature", "git merge feature --no-ff"));
        assert!(!command_matches("merge feature", "git merge other"));
        assert!(!command_matches("git commit -a", "git commit -m x"));
        assert!(command_matches(r"re:^checkout (-b|-c) \S+", "git checkout -b topic"));
        assert!(!command_matches("re:(", "anything"));
        assert!(!command_matches("", "git status"));
    }

    #[test]
    fn command_rules_read_history() {
        let s = RepoState::default();
        let h = history(&["git status", "git add a.txt", "commit -m one", "git log"]);
        let check = |spec: RuleSpec| validate(&s, &s, &[ValidationRule::required(spec)], &h);
        assert!(check(RuleSpec::CommandIssued("git add".into())).is_correct);
        assert!(!check(RuleSpec::CommandIssued("git push".into())).is_correct);
        assert!(check(RuleSpec::CommandOrder(vec!["add".into(), "commit".into()])).is_correct);
        let out_of_order = check(RuleSpec::CommandOrder(vec!["commit".into(), "add".into()]));
        assert!(!out_of_order.is_correct);
        assert_eq!(out_of_order.results[0].actual, "`add` missing or out of order");
    }
}
