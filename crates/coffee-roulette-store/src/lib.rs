use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use coffee_roulette_core::{History, Identifier, RoundPlan};

/// Parse a participant pool body: one identifier per line, trimmed and
/// lowercased, blank lines ignored.
#[must_use]
pub fn parse_pool(body: &str) -> Vec<Identifier> {
    body.lines().map(Identifier::new).filter(|id| !id.is_empty()).collect()
}

/// Read the participant pool file.
///
/// # Errors
/// Fails when the file cannot be read; the pool is required input.
pub fn read_pool(path: &Path) -> Result<Vec<Identifier>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read pool file {}", path.display()))?;
    Ok(parse_pool(&body))
}

/// Read the append-only history log. A missing file is an empty history (the
/// very first run has nothing to avoid yet).
///
/// # Errors
/// Fails on unreadable files or on a malformed log line, which carries the
/// offending raw line in its message.
pub fn read_history(path: &Path) -> Result<History> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(History::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read history file {}", path.display()))
        }
    };
    History::parse(body.lines())
        .with_context(|| format!("failed to parse history file {}", path.display()))
}

/// Append a finished round to the history log: a blank separator line, then
/// one line per grouping. Creates the log when absent. Nothing calls this
/// unless the whole round computed successfully.
///
/// # Errors
/// Fails when the log cannot be opened or written.
pub fn append_round(path: &Path, plan: &RoundPlan) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open history file {}", path.display()))?;
    let mut block = String::from("\n");
    for line in plan.lines() {
        block.push_str(&line);
        block.push('\n');
    }
    file.write_all(block.as_bytes())
        .with_context(|| format!("failed to append round to history file {}", path.display()))
}
