//! Command interpreter: one terminal line → one [`Operation`].
//!
//! Parsing is pure and does not look at repository state. Whether an
//! operation is legal *now* is decided by the transition engine.

use crate::error::ParseError;
use crate::op::{BranchOp, CheckoutMode, CommitArgs, FastForward, MergeOp, Operation, ResetMode};
use std::collections::VecDeque;

/// Parse a terminal line. A leading `git` is optional.
pub fn parse(line: &str) -> Result<Operation, ParseError> {
    let mut tokens: VecDeque<String> = tokenize(line)?.into();
    let first = tokens.pop_front().ok_or(ParseError::Empty)?;

    if first == "git" {
        let sub = tokens
            .pop_front()
            .ok_or_else(|| ParseError::missing("git", "subcommand"))?;
        return parse_git(&sub, tokens);
    }
    match first.as_str() {
        "touch" => parse_touch(tokens),
        "echo" => parse_echo(tokens),
        "rm" => parse_shell_rm(tokens),
        _ => parse_git(&first, tokens),
    }
}

fn parse_git(sub: &str, tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    match sub {
        "init" => parse_init(tokens),
        "add" => parse_add(tokens),
        "rm" => parse_git_rm(tokens),
        "restore" => parse_restore(tokens),
        "commit" => parse_commit(tokens),
        "branch" => parse_branch(tokens),
        "checkout" => parse_checkout(tokens),
        "switch" => parse_switch(tokens),
        "merge" => parse_merge(tokens),
        "reset" => parse_reset(tokens),
        "log" => parse_log(tokens),
        "status" => parse_status(tokens),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

// ── Tokenizer ───────────────────────────────────────────────────────

/// Split on whitespace, honoring single quotes, double quotes and backslash
/// escapes. Unquoted `>` and `>>` become their own tokens.
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    fn flush(tokens: &mut Vec<String>, cur: &mut String, in_token: &mut bool) {
        if *in_token {
            tokens.push(std::mem::take(cur));
            *in_token = false;
        }
    }

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    cur.push(c);
                }
            }
            Some(_) => match c {
                '"' => quote = None,
                '\\' => match chars.peek() {
                    Some(&n) if n == '"' || n == '\\' => {
                        cur.push(n);
                        chars.next();
                    }
                    _ => cur.push('\\'),
                },
                _ => cur.push(c),
            },
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                '\\' => {
                    if let Some(n) = chars.next() {
                        cur.push(n);
                        in_token = true;
                    }
                }
                '>' => {
                    flush(&mut tokens, &mut cur, &mut in_token);
                    if chars.peek() == Some(&'>') {
                        chars.next();
                        tokens.push(">>".to_string());
                    } else {
                        tokens.push(">".to_string());
                    }
                }
                c if c.is_whitespace() => flush(&mut tokens, &mut cur, &mut in_token),
                _ => {
                    cur.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(ParseError::UnterminatedQuote(line.trim().to_string()));
    }
    flush(&mut tokens, &mut cur, &mut in_token);
    Ok(tokens)
}

// ── Validation helpers ──────────────────────────────────────────────

/// Branch names: 1-64 chars of `[A-Za-z0-9._/-]`, not starting with `-`,
/// no `..`, no `//`, not ending in `/`, `.` or `.lock`.
pub fn validate_branch_name(command: &str, name: &str) -> Result<(), ParseError> {
    let reason = if name.is_empty() || name.len() > 64 {
        Some("branch names must be 1-64 characters")
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
    {
        Some("only [A-Za-z0-9._/-] allowed")
    } else if name.starts_with('-') || name.starts_with('/') {
        Some("must not start with '-' or '/'")
    } else if name.contains("..") || name.contains("//") {
        Some("must not contain '..' or '//'")
    } else if name.ends_with('/') || name.ends_with('.') || name.ends_with(".lock") {
        Some("must not end with '/', '.' or '.lock'")
    } else if name == "HEAD" || name == "@" {
        Some("reserved name")
    } else {
        None
    };
    match reason {
        Some(r) => Err(ParseError::invalid(command, name, r)),
        None => Ok(()),
    }
}

/// Normalize a repository-relative path (`./a/b` → `a/b`).
fn normalize_path(command: &str, raw: &str) -> Result<String, ParseError> {
    let trimmed = raw.trim_start_matches("./");
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return Err(ParseError::invalid(
            command,
            raw,
            "expected a path inside the repository",
        ));
    }
    if trimmed.split('/').any(|seg| seg == ".." || seg.is_empty()) {
        return Err(ParseError::invalid(command, raw, "malformed path"));
    }
    Ok(trimmed.to_string())
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

fn take_value(
    command: &str,
    flag: &str,
    tokens: &mut VecDeque<String>,
) -> Result<String, ParseError> {
    tokens
        .pop_front()
        .ok_or_else(|| ParseError::missing(command, &format!("value for {flag}")))
}

fn unknown_flag(command: &str, flag: &str) -> ParseError {
    ParseError::invalid(command, flag, "unknown option")
}

fn too_many(command: &str, extra: &str) -> ParseError {
    ParseError::invalid(command, extra, "unexpected extra argument")
}

// ── Subcommands ─────────────────────────────────────────────────────

fn parse_init(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "init";
    let mut initial_branch = None;
    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            "-b" | "--initial-branch" => initial_branch = Some(take_value(CMD, &tok, &mut tokens)?),
            "-q" | "--quiet" => {}
            t if t.starts_with("--initial-branch=") => {
                initial_branch = Some(t["--initial-branch=".len()..].to_string());
            }
            t if is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => return Err(ParseError::invalid(CMD, t, "the simulated repository has no directories")),
        }
    }
    if let Some(name) = &initial_branch {
        validate_branch_name(CMD, name)?;
    }
    Ok(Operation::Init { initial_branch })
}

fn parse_add(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "add";
    let mut all = false;
    let mut pathspecs = Vec::new();
    let mut only_paths = false;
    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            "--" if !only_paths => only_paths = true,
            "-A" | "--all" if !only_paths => all = true,
            "." => all = true,
            t if !only_paths && is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => pathspecs.push(normalize_path(CMD, t)?),
        }
    }
    if !all && pathspecs.is_empty() {
        return Err(ParseError::missing(CMD, "pathspec (e.g. `git add README.md` or `git add .`)"));
    }
    if all {
        pathspecs.clear();
    }
    Ok(Operation::Add { pathspecs, all })
}

fn collect_paths(
    command: &str,
    tokens: VecDeque<String>,
    allowed_flags: &[&str],
) -> Result<(Vec<String>, Vec<String>), ParseError> {
    let mut flags = Vec::new();
    let mut paths = Vec::new();
    let mut only_paths = false;
    for tok in tokens {
        if !only_paths && tok == "--" {
            only_paths = true;
        } else if !only_paths && is_flag(&tok) {
            if !allowed_flags.contains(&tok.as_str()) {
                return Err(unknown_flag(command, &tok));
            }
            flags.push(tok);
        } else {
            paths.push(normalize_path(command, &tok)?);
        }
    }
    if paths.is_empty() {
        return Err(ParseError::missing(command, "path"));
    }
    Ok((flags, paths))
}

fn parse_git_rm(tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    let (_, paths) = collect_paths("rm", tokens, &["-r", "--cached", "-q", "--quiet"])?;
    Ok(Operation::Remove { paths })
}

fn parse_restore(tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    let (flags, paths) = collect_paths(
        "restore",
        tokens,
        &["--staged", "-S", "--worktree", "-W"],
    )?;
    let staged = flags.iter().any(|f| f == "--staged" || f == "-S");
    Ok(Operation::Restore { paths, staged })
}

fn parse_commit(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "commit";
    let mut args = CommitArgs::default();
    let mut messages: Vec<String> = Vec::new();
    let mut no_edit = false;

    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            "-m" | "--message" => messages.push(take_value(CMD, &tok, &mut tokens)?),
            "-a" | "--all" => args.all = true,
            "--amend" => args.amend = true,
            "--allow-empty" => args.allow_empty = true,
            "--no-edit" => no_edit = true,
            "--author" => args.author = Some(take_value(CMD, &tok, &mut tokens)?),
            t if t.starts_with("--message=") => messages.push(t["--message=".len()..].to_string()),
            t if t.starts_with("--author=") => args.author = Some(t["--author=".len()..].to_string()),
            t if t.starts_with("--") => return Err(unknown_flag(CMD, t)),
            t if is_flag(t) => {
                // Short cluster such as `-am` or `-mfix`.
                let mut chars = t[1..].char_indices();
                while let Some((i, c)) = chars.next() {
                    match c {
                        'a' => args.all = true,
                        'm' => {
                            let rest = &t[1 + i + 1..];
                            if rest.is_empty() {
                                messages.push(take_value(CMD, "-m", &mut tokens)?);
                            } else {
                                messages.push(rest.to_string());
                            }
                            break;
                        }
                        _ => return Err(unknown_flag(CMD, t)),
                    }
                }
            }
            t => return Err(ParseError::invalid(CMD, t, "committing individual paths is not supported; stage them with `git add`")),
        }
    }

    if messages.iter().any(|m| m.trim().is_empty()) {
        return Err(ParseError::invalid(CMD, "-m", "empty commit message"));
    }
    if !messages.is_empty() {
        args.message = Some(messages.join("\n\n"));
    }
    if args.message.is_none() && !args.amend && !no_edit {
        return Err(ParseError::missing(CMD, "-m <message>"));
    }
    Ok(Operation::Commit(args))
}

fn parse_branch(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "branch";
    let mut delete = false;
    let mut force = false;
    let mut rename = false;
    let mut list = false;
    let mut names = Vec::new();

    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            "-d" | "--delete" => delete = true,
            "-D" => {
                delete = true;
                force = true;
            }
            "-f" | "--force" => force = true,
            "-m" | "--move" => rename = true,
            "-l" | "--list" => list = true,
            t if is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => names.push(t.to_string()),
        }
    }

    if [delete, rename, list].iter().filter(|f| **f).count() > 1 {
        return Err(ParseError::invalid(CMD, "-d/-m/-l", "options cannot be combined"));
    }
    if force && !delete {
        return Err(ParseError::invalid(CMD, "-f", "only supported together with -d"));
    }

    if list || (names.is_empty() && !delete && !rename) {
        if let Some(extra) = names.first() {
            return Err(too_many(CMD, extra));
        }
        return Ok(Operation::Branch(BranchOp::List));
    }

    if delete {
        let mut it = names.into_iter();
        let name = it.next().ok_or_else(|| ParseError::missing(CMD, "branch name"))?;
        if let Some(extra) = it.next() {
            return Err(too_many(CMD, &extra));
        }
        return Ok(Operation::Branch(BranchOp::Delete { name, force }));
    }

    if rename {
        let op = match names.len() {
            0 => return Err(ParseError::missing(CMD, "new branch name")),
            1 => BranchOp::Rename {
                from: None,
                to: names.remove(0),
            },
            2 => {
                let to = names.remove(1);
                BranchOp::Rename {
                    from: Some(names.remove(0)),
                    to,
                }
            }
            _ => return Err(too_many(CMD, &names[2])),
        };
        if let BranchOp::Rename { to, .. } = &op {
            validate_branch_name(CMD, to)?;
        }
        return Ok(Operation::Branch(op));
    }

    if names.len() > 2 {
        return Err(too_many(CMD, &names[2]));
    }
    let mut it = names.into_iter();
    let name = it.next().ok_or_else(|| ParseError::missing(CMD, "branch name"))?;
    validate_branch_name(CMD, &name)?;
    Ok(Operation::Branch(BranchOp::Create {
        name,
        start: it.next(),
    }))
}

fn parse_checkout(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "checkout";
    let mut create: Option<(String, bool)> = None;
    let mut detach = false;
    let mut positional = Vec::new();

    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            "--" => {
                let (_, paths) = collect_paths(CMD, std::mem::take(&mut tokens), &[])?;
                if create.is_some() || detach || !positional.is_empty() {
                    return Err(ParseError::invalid(CMD, "--", "checking out paths from a commit is not supported"));
                }
                return Ok(Operation::Restore {
                    paths,
                    staged: false,
                });
            }
            "-b" | "-B" => {
                if create.is_some() {
                    return Err(ParseError::invalid(CMD, &tok, "only one new branch allowed"));
                }
                let name = take_value(CMD, &tok, &mut tokens)?;
                validate_branch_name(CMD, &name)?;
                create = Some((name, tok == "-B"));
            }
            "--detach" => detach = true,
            t if is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => positional.push(t.to_string()),
        }
    }

    finish_checkout(CMD, create, detach, positional, CheckoutMode::Any)
}

fn parse_switch(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "switch";
    let mut create: Option<(String, bool)> = None;
    let mut detach = false;
    let mut positional = Vec::new();

    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            "-c" | "--create" | "-C" | "--force-create" => {
                if create.is_some() {
                    return Err(ParseError::invalid(CMD, &tok, "only one new branch allowed"));
                }
                let name = take_value(CMD, &tok, &mut tokens)?;
                validate_branch_name(CMD, &name)?;
                create = Some((name, tok == "-C" || tok == "--force-create"));
            }
            "-d" | "--detach" => detach = true,
            t if is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => positional.push(t.to_string()),
        }
    }

    finish_checkout(CMD, create, detach, positional, CheckoutMode::BranchOnly)
}

fn finish_checkout(
    command: &str,
    create: Option<(String, bool)>,
    detach: bool,
    positional: Vec<String>,
    plain: CheckoutMode,
) -> Result<Operation, ParseError> {
    if positional.len() > 1 {
        return Err(too_many(command, &positional[1]));
    }
    let mut positional = positional.into_iter();
    match (create, detach) {
        (Some(_), true) => Err(ParseError::invalid(
            command,
            "--detach",
            "cannot be combined with creating a branch",
        )),
        (Some((name, force)), false) => Ok(Operation::Checkout {
            target: name,
            mode: CheckoutMode::Create {
                start: positional.next(),
                force,
            },
        }),
        (None, true) => Ok(Operation::Checkout {
            target: positional.next().unwrap_or_else(|| "HEAD".to_string()),
            mode: CheckoutMode::Detach,
        }),
        (None, false) => {
            let target = positional
                .next()
                .ok_or_else(|| ParseError::missing(command, "branch or commit"))?;
            Ok(Operation::Checkout {
                target,
                mode: plain,
            })
        }
    }
}

fn parse_merge(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "merge";
    let mut abort = false;
    let mut ff: Option<FastForward> = None;
    let mut commit = true;
    let mut message = None;
    let mut sources = Vec::new();

    while let Some(tok) = tokens.pop_front() {
        let requested = match tok.as_str() {
            "--abort" => {
                abort = true;
                None
            }
            "--ff" => Some(FastForward::Allow),
            "--no-ff" => Some(FastForward::Never),
            "--ff-only" => Some(FastForward::Only),
            "--no-commit" => {
                commit = false;
                None
            }
            "--commit" | "--no-edit" => None,
            "-m" | "--message" => {
                message = Some(take_value(CMD, &tok, &mut tokens)?);
                None
            }
            t if t.starts_with("--message=") => {
                message = Some(t["--message=".len()..].to_string());
                None
            }
            t if is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => {
                sources.push(t.to_string());
                None
            }
        };
        if let Some(mode) = requested {
            if ff.is_some_and(|prev| prev != mode) {
                return Err(ParseError::invalid(CMD, &tok, "conflicting fast-forward options"));
            }
            ff = Some(mode);
        }
    }

    if abort {
        if let Some(extra) = sources.first() {
            return Err(too_many(CMD, extra));
        }
        return Ok(Operation::Merge(MergeOp::Abort));
    }
    if sources.len() > 1 {
        return Err(ParseError::invalid(CMD, &sources[1], "merging more than one branch is not supported"));
    }
    let source = sources
        .pop()
        .ok_or_else(|| ParseError::missing(CMD, "branch to merge"))?;
    let ff = ff.unwrap_or_default();
    if !commit && ff == FastForward::Only {
        return Err(ParseError::invalid(CMD, "--no-commit", "cannot be combined with --ff-only"));
    }
    if !commit && message.is_some() {
        return Err(ParseError::invalid(CMD, "-m", "pass the message to `git commit` after --no-commit"));
    }
    Ok(Operation::Merge(MergeOp::Start {
        source,
        ff,
        commit,
        message,
    }))
}

fn parse_reset(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "reset";
    let mut mode: Option<ResetMode> = None;
    let mut positional = Vec::new();

    while let Some(tok) = tokens.pop_front() {
        let requested = match tok.as_str() {
            "--soft" => ResetMode::Soft,
            "--mixed" => ResetMode::Mixed,
            "--hard" => ResetMode::Hard,
            "--" => {
                let (_, paths) = collect_paths(CMD, std::mem::take(&mut tokens), &[])?;
                if mode.is_some() || positional.iter().any(|p: &String| p != "HEAD") {
                    return Err(ParseError::invalid(CMD, "--", "path reset only supports HEAD"));
                }
                return Ok(Operation::Restore {
                    paths,
                    staged: true,
                });
            }
            t if is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => {
                positional.push(t.to_string());
                continue;
            }
        };
        if mode.is_some_and(|prev| prev != requested) {
            return Err(ParseError::invalid(CMD, &tok, "only one of --soft, --mixed, --hard"));
        }
        mode = Some(requested);
    }

    if positional.len() > 1 {
        return Err(too_many(CMD, &positional[1]));
    }
    Ok(Operation::Reset {
        target: positional.pop(),
        mode: mode.unwrap_or_default(),
    })
}

fn parse_log(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "log";
    let mut oneline = false;
    let mut limit = None;
    let mut positional = Vec::new();

    let parse_count = |flag: &str, raw: &str| -> Result<usize, ParseError> {
        raw.parse::<usize>()
            .map_err(|_| ParseError::invalid(CMD, raw, format!("{flag} expects a number")))
    };

    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            "--oneline" => oneline = true,
            "-n" | "--max-count" => {
                let raw = take_value(CMD, &tok, &mut tokens)?;
                limit = Some(parse_count(&tok, &raw)?);
            }
            t if t.starts_with("--max-count=") => {
                limit = Some(parse_count("--max-count", &t["--max-count=".len()..])?);
            }
            t if t.starts_with("-n") && t.len() > 2 => limit = Some(parse_count("-n", &t[2..])?),
            t if t.len() > 1 && t.starts_with('-') && t[1..].chars().all(|c| c.is_ascii_digit()) => {
                limit = Some(parse_count("-<n>", &t[1..])?);
            }
            t if is_flag(t) => return Err(unknown_flag(CMD, t)),
            t => positional.push(t.to_string()),
        }
    }
    if positional.len() > 1 {
        return Err(too_many(CMD, &positional[1]));
    }
    Ok(Operation::Log {
        target: positional.pop(),
        limit,
        oneline,
    })
}

fn parse_status(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    match tokens.pop_front() {
        None => Ok(Operation::Status),
        Some(t) if is_flag(&t) => Err(unknown_flag("status", &t)),
        Some(t) => Err(too_many("status", &t)),
    }
}

// ── Shell ───────────────────────────────────────────────────────────

fn parse_touch(tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    let (_, paths) = collect_paths("touch", tokens, &[])?;
    Ok(Operation::Touch { paths })
}

fn parse_shell_rm(tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    let (_, paths) = collect_paths("rm", tokens, &["-f"])?;
    Ok(Operation::DeleteFile { paths })
}

fn parse_echo(mut tokens: VecDeque<String>) -> Result<Operation, ParseError> {
    const CMD: &str = "echo";
    let mut words = Vec::new();
    let mut append = None;
    while let Some(tok) = tokens.pop_front() {
        match tok.as_str() {
            ">" => {
                append = Some(false);
                break;
            }
            ">>" => {
                append = Some(true);
                break;
            }
            _ => words.push(tok),
        }
    }
    let append = append.ok_or_else(|| ParseError::missing(CMD, "redirect (`echo text > file`)"))?;
    let raw = tokens
        .pop_front()
        .ok_or_else(|| ParseError::missing(CMD, "file after redirect"))?;
    if let Some(extra) = tokens.front() {
        return Err(too_many(CMD, extra));
    }
    Ok(Operation::WriteFile {
        path: normalize_path(CMD, &raw)?,
        text: words.join(" "),
        append,
    })
}
