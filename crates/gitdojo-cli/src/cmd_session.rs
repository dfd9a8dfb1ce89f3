//! One-shot session commands: exec, validate, reset, list.

use crate::render::{join_argv, print_exec, verdict_lines};
use crate::workspace::{session_key, Workspace};
use gitdojo_store::WorkspaceLock;
use std::io::{BufRead, Write};
use std::path::Path;

/// `gitdojo exec <practice> -- <command...>`
pub fn exec(root: &Path, learner: &str, practice: &str, argv: &[String], json: bool) -> anyhow::Result<()> {
    if argv.is_empty() {
        anyhow::bail!("nothing to run (usage: gitdojo exec <practice> -- git status)");
    }
    let ws = Workspace::open(root)?;
    let _lock = WorkspaceLock::acquire(&ws.paths)?;
    let executor = ws.executor()?;
    let key = session_key(&executor, learner, practice)?;
    let line = join_argv(argv);

    let rt = tokio::runtime::Runtime::new()?;
    let resp = rt.block_on(executor.execute(&key, &line))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        print_exec(&resp);
    }
    if !resp.ok {
        drop(executor);
        std::process::exit(1);
    }
    Ok(())
}

/// `gitdojo validate <practice>`; exits non-zero when unsolved.
pub fn validate(root: &Path, learner: &str, practice: &str, json: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let executor = ws.executor()?;
    let key = session_key(&executor, learner, practice)?;

    let rt = tokio::runtime::Runtime::new()?;
    let verdict = rt.block_on(executor.validate(&key))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        for line in verdict_lines(&verdict) {
            println!("{line}");
        }
    }
    if !verdict.is_correct {
        drop(executor);
        std::process::exit(1);
    }
    Ok(())
}

/// `gitdojo reset <practice> [--yes]`
pub fn reset(root: &Path, learner: &str, practice: &str, yes: bool) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let _lock = WorkspaceLock::acquire(&ws.paths)?;
    let executor = ws.executor()?;
    let key = session_key(&executor, learner, practice)?;

    if !yes && !confirm(&format!("Discard all progress on \"{practice}\"?"))? {
        println!("Aborted.");
        return Ok(());
    }
    let rt = tokio::runtime::Runtime::new()?;
    let view = rt.block_on(executor.reset(&key))?;
    println!("Reset {} to version {}.", view.practice_id, view.version);
    Ok(())
}

/// `gitdojo list`
pub fn list(root: &Path, learner: &str) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let executor = ws.executor()?;
    let rt = tokio::runtime::Runtime::new()?;
    let progress = rt.block_on(executor.progress(learner))?;

    let practices = executor.practices();
    if practices.is_empty() {
        println!("(no practices in {})", ws.config.practices_dir(&ws.paths).display());
        return Ok(());
    }
    for p in practices {
        let saved = progress.iter().find(|(id, _)| *id == p.id).map(|(_, v)| *v);
        let marker = match saved {
            None => String::new(),
            Some(v) if v == p.version => "  [in progress]".to_string(),
            Some(v) => format!("  [saved at v{v}, reset required]"),
        };
        println!("{:<24} v{:<3} {}{marker}", p.id, p.version, p.title);
    }
    Ok(())
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` is no.
pub fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
