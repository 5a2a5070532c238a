//! Show a transcript selection in the user's editor with the UI suspended.

use std::io::Write;
use std::path::Path;
use std::process::Command;

use anyhow::Context;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::DefaultTerminal;

const FALLBACK_EDITOR: &str = "vi";

/// Program and leading arguments from `$VISUAL` / `$EDITOR` style values.
pub fn editor_command(visual: Option<&str>, editor: Option<&str>) -> Vec<String> {
    let raw = [visual, editor]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or(FALLBACK_EDITOR);
    raw.split_whitespace().map(str::to_string).collect()
}

fn write_temp(text: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("chatterm-")
        .suffix(".md")
        .tempfile()
        .context("creating temp file")?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn run(command: &[String], path: &Path) -> anyhow::Result<()> {
    let (program, args) = command
        .split_first()
        .context("no editor configured")?;
    let status = Command::new(program)
        .args(args)
        .arg(path)
        .status()
        .with_context(|| format!("launching {program}"))?;
    if !status.success() {
        anyhow::bail!("{program} exited with {status}");
    }
    Ok(())
}

/// Open `text` in the editor and block until it exits. Edits are discarded.
pub fn open(terminal: &mut DefaultTerminal, text: &str) -> anyhow::Result<()> {
    let file = write_temp(text)?;
    let command = editor_command(
        std::env::var("VISUAL").ok().as_deref(),
        std::env::var("EDITOR").ok().as_deref(),
    );
    tracing::debug!(editor = ?command, path = %file.path().display(), "opening editor");

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), LeaveAlternateScreen)?;
    let result = run(&command, file.path());
    crossterm::execute!(std::io::stdout(), EnterAlternateScreen)?;
    crossterm::terminal::enable_raw_mode()?;
    terminal.clear()?;
    result
}
