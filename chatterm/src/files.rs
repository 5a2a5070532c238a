//! `--file` / `--ext` handling: turn paths into user messages for the request prefix.

use std::path::{Path, PathBuf};

use crate::chat::Message;

/// Suffixes that mark a path for recursive expansion.
const RECURSIVE_SUFFIXES: &[&str] = &["/...", "/…"];

/// Injected files: one message per file, plus the spec strings to record on the chat.
#[derive(Debug, Default)]
pub struct Injection {
    pub messages: Vec<Message>,
    pub recorded: Vec<String>,
}

/// Split a recursive marker off a `--file` argument.
fn split_recursive(spec: &str) -> (&str, bool) {
    for suffix in RECURSIVE_SUFFIXES {
        if let Some(base) = spec.strip_suffix(suffix) {
            let base = if base.is_empty() { "." } else { base };
            return (base, true);
        }
    }
    (spec, false)
}

fn normalize_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn matches_ext(path: &Path, exts: &[String]) -> bool {
    if exts.is_empty() {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| exts.contains(&e.to_ascii_lowercase()))
}

/// Expand one `--file` argument into concrete paths, sorted for a stable prefix.
fn expand(spec: &str, exts: &[String]) -> Vec<PathBuf> {
    let (base, recursive) = split_recursive(spec);
    let base = Path::new(base);
    if !base.is_dir() {
        // Explicit files are never filtered by extension.
        return vec![base.to_path_buf()];
    }
    let mut builder = ignore::WalkBuilder::new(base);
    builder.git_ignore(true);
    if !recursive {
        builder.max_depth(Some(1));
    }
    let mut paths: Vec<PathBuf> = builder
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .filter(|p| matches_ext(p, exts))
        .collect();
    paths.sort();
    paths
}

/// Body of the injected message: a header and a fenced block tagged with the extension.
pub fn format_file(path: &Path, content: &str) -> String {
    let lang = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let mut body = format!("File: {}\n```{lang}\n{content}", path.display());
    if !content.ends_with('\n') {
        body.push('\n');
    }
    body.push_str("```");
    body
}

/// Read every path named by `specs`. Unreadable files are skipped with a warning.
pub fn inject(specs: &[String], exts: &[String]) -> Injection {
    let exts: Vec<String> = exts
        .iter()
        .map(|e| normalize_ext(e))
        .filter(|e| !e.is_empty())
        .collect();
    let mut injection = Injection::default();
    for spec in specs {
        let mut any = false;
        for path in expand(spec, &exts) {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    injection.messages.push(Message::user(format_file(&path, &content)));
                    any = true;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping file"),
            }
        }
        if any {
            injection.recorded.push(spec.clone());
        }
    }
    injection
}
