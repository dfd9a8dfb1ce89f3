//! Interactive practice session.
//!
//! Lines are sent to the simulated repository as typed. Lines starting with
//! `:` are session commands (`:help` lists them).

use crate::render::{verdict_lines, view_lines};
use crate::workspace::{session_key, Workspace};
use gitdojo_core::{Head, RepoState};
use gitdojo_session::Executor;
use gitdojo_store::{SessionKey, WorkspaceLock};
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;

const HELP: &[&str] = &[
    "Type git commands as you would in a terminal, plus:",
    "  touch <file>, echo <text> > <file>, rm <file>",
    "",
    "  :validate   check your repository against the goal",
    "  :hint       show the next hint",
    "  :state      show status and command history",
    "  :reset      discard progress and start over",
    "  :quit       leave (progress is saved after every command)",
];

#[derive(Debug, PartialEq, Eq)]
enum Meta {
    Validate,
    Hint,
    State,
    Reset,
    Help,
    Quit,
}

impl Meta {
    fn parse(line: &str) -> Option<Result<Meta, String>> {
        let cmd = line.strip_prefix(':')?;
        Some(match cmd.trim() {
            "validate" | "v" => Ok(Meta::Validate),
            "hint" => Ok(Meta::Hint),
            "state" | "s" => Ok(Meta::State),
            "reset" => Ok(Meta::Reset),
            "help" | "h" | "?" => Ok(Meta::Help),
            "quit" | "q" | "exit" => Ok(Meta::Quit),
            other => Err(format!("unknown session command \":{other}\" (try :help)")),
        })
    }
}

pub fn execute(root: &Path, learner: &str, practice: &str) -> anyhow::Result<()> {
    let ws = Workspace::open(root)?;
    let _lock = WorkspaceLock::acquire(&ws.paths)?;
    let executor = ws.executor()?;
    let key = session_key(&executor, learner, practice)?;
    let rt = Runtime::new()?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut repl = Repl::new(&rt, &executor, key);
    repl.run(stdin.lock(), &mut stdout.lock())
}

struct Repl<'a> {
    rt: &'a Runtime,
    executor: &'a Executor,
    key: SessionKey,
    state: Option<Arc<RepoState>>,
    hints_shown: usize,
}

impl<'a> Repl<'a> {
    fn new(rt: &'a Runtime, executor: &'a Executor, key: SessionKey) -> Self {
        Self {
            rt,
            executor,
            key,
            state: None,
            hints_shown: 0,
        }
    }

    fn run<R: BufRead, W: Write>(&mut self, mut input: R, out: &mut W) -> anyhow::Result<()> {
        if let Some(practice) = self.executor.practice(&self.key.practice_id) {
            writeln!(out, "{}", practice.practice.title)?;
            if let Some(desc) = &practice.practice.description {
                writeln!(out, "{desc}")?;
            }
            writeln!(out, "Type :help for session commands.")?;
        }

        if !self.open(&mut input, out)? {
            return Ok(());
        }

        loop {
            write!(out, "{}", self.prompt())?;
            out.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Meta::parse(line) {
                None => self.command(line, out)?,
                Some(Err(msg)) => writeln!(out, "error: {msg}")?,
                Some(Ok(Meta::Quit)) => break,
                Some(Ok(meta)) => self.meta(meta, &mut input, out)?,
            }
        }
        Ok(())
    }

    /// Load the session, offering a reset when the practice has changed
    /// since the learner last played. Returns false if the learner declines.
    fn open<R: BufRead, W: Write>(&mut self, input: &mut R, out: &mut W) -> anyhow::Result<bool> {
        match self.rt.block_on(self.executor.state(&self.key)) {
            Ok(view) => {
                if !view.history.is_empty() {
                    writeln!(out, "Resuming: {} commands so far.", view.history.len())?;
                }
                self.state = Some(view.state);
                Ok(true)
            }
            Err(err) if err.reset_required().is_some() => {
                writeln!(out, "{err}")?;
                if !ask(input, out, "Reset and start over?")? {
                    writeln!(out, "Leaving your saved progress untouched.")?;
                    return Ok(false);
                }
                let view = self.rt.block_on(self.executor.reset(&self.key))?;
                self.state = Some(view.state);
                Ok(true)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn command<W: Write>(&mut self, line: &str, out: &mut W) -> anyhow::Result<()> {
        match self.rt.block_on(self.executor.execute(&self.key, line)) {
            Ok(resp) => {
                let prefix = if resp.ok { "" } else { "error: " };
                for l in &resp.output {
                    writeln!(out, "{prefix}{l}")?;
                }
                self.state = Some(resp.state);
            }
            Err(err) => {
                writeln!(out, "error: {err}")?;
                if err.code() == "session_halted" {
                    writeln!(out, "Use :reset to start over.")?;
                }
            }
        }
        Ok(())
    }

    fn meta<R: BufRead, W: Write>(
        &mut self,
        meta: Meta,
        input: &mut R,
        out: &mut W,
    ) -> anyhow::Result<()> {
        match meta {
            Meta::Validate => match self.rt.block_on(self.executor.validate(&self.key)) {
                Ok(verdict) => {
                    for line in verdict_lines(&verdict) {
                        writeln!(out, "{line}")?;
                    }
                }
                Err(err) => writeln!(out, "error: {err}")?,
            },
            Meta::Hint => {
                let hints = self
                    .executor
                    .practice(&self.key.practice_id)
                    .map(|p| p.practice.hints.as_slice())
                    .unwrap_or_default();
                match hints.get(self.hints_shown) {
                    Some(hint) => {
                        self.hints_shown += 1;
                        writeln!(out, "hint {}/{}: {hint}", self.hints_shown, hints.len())?;
                    }
                    None if hints.is_empty() => writeln!(out, "No hints for this practice.")?,
                    None => writeln!(out, "No more hints.")?,
                }
            }
            Meta::State => match self.rt.block_on(self.executor.state(&self.key)) {
                Ok(view) => {
                    for line in view_lines(&view) {
                        writeln!(out, "{line}")?;
                    }
                }
                Err(err) => writeln!(out, "error: {err}")?,
            },
            Meta::Reset => {
                if ask(input, out, "Discard all progress on this practice?")? {
                    let view = self.rt.block_on(self.executor.reset(&self.key))?;
                    self.state = Some(view.state);
                    self.hints_shown = 0;
                    writeln!(out, "Reset to the starting state.")?;
                }
            }
            Meta::Help => {
                for line in HELP {
                    writeln!(out, "{line}")?;
                }
            }
            Meta::Quit => {}
        }
        Ok(())
    }

    fn prompt(&self) -> String {
        let at = match self.state.as_deref().map(RepoState::head) {
            Some(Head::Attached(branch)) => branch.clone(),
            Some(Head::Detached(id)) => format!("detached {}", id.short()),
            None => "?".to_string(),
        };
        format!("{} ({at})$ ", self.key.practice_id)
    }
}

fn ask<R: BufRead, W: Write>(input: &mut R, out: &mut W, question: &str) -> anyhow::Result<bool> {
    write!(out, "{question} [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
