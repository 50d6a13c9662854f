//! Line-oriented edit commands: `append`, `remove`, `replace`, `write`.
//!
//! Each command runs inside a `LockedTransaction`. Edits that find nothing
//! to change cancel and return `AtomicError::NotChanged` so the target is
//! left byte-for-byte untouched.

use crate::cli::{AppendArgs, RemoveArgs, ReplaceArgs, WriteArgs};
use atomicfile::config::Config;
use atomicfile::error::{AtomicError, Result};
use atomicfile::exit_codes;
use atomicfile::locked::LockedTransaction;
use regex::Regex;
use std::io::{self, Read, Write};
use tracing::info;

/// Append a line, optionally only if it is not already present.
pub fn cmd_append(args: AppendArgs, config: &Config) -> Result<i32> {
    let config = with_binary(config, false);

    LockedTransaction::run(&args.file, &config, |tx| {
        let content = read_all(tx)?;
        if args.unique && content.lines().any(|line| line == args.line) {
            return Err(AtomicError::NotChanged(format!(
                "'{}' already contains the line",
                args.file.display()
            )));
        }

        let mut updated = content;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&args.line);
        updated.push('\n');

        write_and_commit(tx, updated.as_bytes())
    })?;

    info!(file = %args.file.display(), "appended line");
    Ok(exit_codes::SUCCESS)
}

/// Drop every line matching a regular expression.
pub fn cmd_remove(args: RemoveArgs, config: &Config) -> Result<i32> {
    let pattern = compile(&args.pattern)?;
    let config = with_binary(config, false);

    let removed = LockedTransaction::run(&args.file, &config, |tx| {
        let content = read_all(tx)?;
        let (kept, removed) = remove_lines(&content, &pattern);
        if removed == 0 {
            return Err(AtomicError::NotChanged(format!(
                "no line of '{}' matches '{}'",
                args.file.display(),
                args.pattern
            )));
        }
        write_and_commit(tx, kept.as_bytes())?;
        Ok(removed)
    })?;

    info!(file = %args.file.display(), removed, "removed lines");
    Ok(exit_codes::SUCCESS)
}

/// Substitute regular expression matches on every line.
pub fn cmd_replace(args: ReplaceArgs, config: &Config) -> Result<i32> {
    let pattern = compile(&args.pattern)?;
    let config = with_binary(config, false);

    let changed = LockedTransaction::run(&args.file, &config, |tx| {
        let content = read_all(tx)?;
        let (updated, changed) = replace_lines(&content, &pattern, &args.replacement);
        if changed == 0 {
            return Err(AtomicError::NotChanged(format!(
                "replacing '{}' leaves '{}' unchanged",
                args.pattern,
                args.file.display()
            )));
        }
        write_and_commit(tx, updated.as_bytes())?;
        Ok(changed)
    })?;

    info!(file = %args.file.display(), changed, "replaced lines");
    Ok(exit_codes::SUCCESS)
}

/// Replace the file's content with standard input.
///
/// Stdin is read in full before the lock is taken.
pub fn cmd_write(args: WriteArgs, config: &Config) -> Result<i32> {
    let mut content = Vec::new();
    io::stdin()
        .read_to_end(&mut content)
        .map_err(|e| AtomicError::io("read", "<stdin>", e))?;

    let config = with_binary(config, true);
    LockedTransaction::run(&args.file, &config, |tx| write_and_commit(tx, &content))?;

    info!(file = %args.file.display(), bytes = content.len(), "wrote file");
    Ok(exit_codes::SUCCESS)
}

fn with_binary(config: &Config, binary: bool) -> Config {
    let mut config = config.clone();
    config.transaction.binary = binary;
    config
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| AtomicError::UserError(format!("invalid regex '{}': {}", pattern, e)))
}

fn read_all(tx: &mut LockedTransaction) -> Result<String> {
    let target = tx.transaction().target_path().to_path_buf();
    let mut content = String::new();
    tx.input()?
        .read_to_string(&mut content)
        .map_err(|e| AtomicError::io("read", target, e))?;
    Ok(content)
}

fn write_and_commit(tx: &mut LockedTransaction, content: &[u8]) -> Result<()> {
    let temp = tx.transaction().temp_path().to_path_buf();
    tx.output()?
        .write_all(content)
        .map_err(|e| AtomicError::io("write", temp, e))?;
    tx.commit()
}

/// Split into lines, keeping each line's terminator.
fn split_line(chunk: &str) -> (&str, &str) {
    let body = chunk.strip_suffix('\n').unwrap_or(chunk);
    let body = body.strip_suffix('\r').unwrap_or(body);
    (body, &chunk[body.len()..])
}

fn remove_lines(content: &str, pattern: &Regex) -> (String, usize) {
    let mut kept = String::with_capacity(content.len());
    let mut removed = 0;
    for chunk in content.split_inclusive('\n') {
        let (body, _) = split_line(chunk);
        if pattern.is_match(body) {
            removed += 1;
        } else {
            kept.push_str(chunk);
        }
    }
    (kept, removed)
}

fn replace_lines(content: &str, pattern: &Regex, replacement: &str) -> (String, usize) {
    let mut updated = String::with_capacity(content.len());
    let mut changed = 0;
    for chunk in content.split_inclusive('\n') {
        let (body, ending) = split_line(chunk);
        let replaced = pattern.replace_all(body, replacement);
        if replaced != body {
            changed += 1;
        }
        updated.push_str(&replaced);
        updated.push_str(ending);
    }
    (updated, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_keeps_line_endings() {
        let pattern = Regex::new("^b").unwrap();
        let (kept, removed) = remove_lines("a\r\nbad\nc", &pattern);
        assert_eq!(kept, "a\r\nc");
        assert_eq!(removed, 1);
    }

    #[test]
    fn remove_matches_last_line_without_newline() {
        let pattern = Regex::new("^c$").unwrap();
        let (kept, removed) = remove_lines("a\nc", &pattern);
        assert_eq!(kept, "a\n");
        assert_eq!(removed, 1);
    }

    #[test]
    fn replace_counts_changed_lines() {
        let pattern = Regex::new(r"(\w+)@old").unwrap();
        let (updated, changed) = replace_lines("x@old\ny\nz@old\n", &pattern, "$1@new");
        assert_eq!(updated, "x@new\ny\nz@new\n");
        assert_eq!(changed, 2);
    }

    #[test]
    fn replace_with_identical_text_is_no_change() {
        let pattern = Regex::new("a").unwrap();
        let (updated, changed) = replace_lines("a\n", &pattern, "a");
        assert_eq!(updated, "a\n");
        assert_eq!(changed, 0);
    }

    #[test]
    fn split_line_handles_crlf() {
        assert_eq!(split_line("abc\r\n"), ("abc", "\r\n"));
        assert_eq!(split_line("abc"), ("abc", ""));
        assert_eq!(split_line("\n"), ("", "\n"));
    }
}
