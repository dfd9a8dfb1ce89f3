use gitdojo_check::Verdict;
use gitdojo_session::{ExecResponse, SessionView};

/// Print a command's terminal output; failures go to stderr.
pub fn print_exec(resp: &ExecResponse) {
    if resp.ok {
        for line in &resp.output {
            println!("{line}");
        }
    } else {
        for line in &resp.output {
            eprintln!("error: {line}");
        }
    }
}

pub fn verdict_lines(verdict: &Verdict) -> Vec<String> {
    let mut lines = Vec::with_capacity(verdict.results.len() + 2);
    for r in &verdict.results {
        let mark = if r.passed { "pass" } else { "FAIL" };
        let advisory = if r.required { "" } else { " (advisory)" };
        lines.push(format!("[{mark}] {}{advisory}", r.rule));
        if !r.passed {
            lines.push(format!("       expected: {}", r.expected));
            lines.push(format!("       actual:   {}", r.actual));
            if let Some(msg) = &r.message {
                lines.push(format!("       hint:     {msg}"));
            }
        }
    }
    lines.push(String::new());
    lines.push(format!(
        "{} (score {:.0}%)",
        if verdict.is_correct { "Solved!" } else { "Not solved yet." },
        verdict.score * 100.0
    ));
    lines
}

pub fn view_lines(view: &SessionView) -> Vec<String> {
    let mut lines = vec![format!(
        "practice {} v{} for {}",
        view.practice_id, view.version, view.learner_id
    )];
    lines.extend(view.status.render());
    if !view.history.is_empty() {
        lines.push(String::new());
        lines.push("history:".to_string());
        lines.extend(view.history.iter().map(|c| format!("  {c}")));
    }
    lines
}

/// Join argv back into one terminal line, quoting words the tokenizer
/// would otherwise split or reinterpret.
pub fn join_argv(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            let plain = !arg.is_empty()
                && !arg
                    .chars()
                    .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | '>'));
            if plain || arg == ">" || arg == ">>" {
                arg.clone()
            } else {
                format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
