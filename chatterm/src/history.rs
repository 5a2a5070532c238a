//! Persistent, navigable ring of submitted inputs.

use std::io::{self, Write};
use std::path::PathBuf;

pub const HISTORY_CAPACITY: usize = 1_000;

/// Result of a backward step through history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recall {
    pub text: String,
    /// False when already at the oldest entry.
    pub moved: bool,
}

pub struct InputHistory {
    path: Option<PathBuf>,
    entries: Vec<String>,
    cursor: Option<usize>,
    live: Option<String>,
}

impl InputHistory {
    /// History that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            cursor: None,
            live: None,
        }
    }

    /// Load from `path`. A missing file is an empty history.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .filter(|l| !l.is_empty())
                .map(unescape)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut history = Self {
            path: Some(path),
            entries,
            cursor: None,
            live: None,
        };
        history.truncate();
        Ok(history)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry and rewrite the file. Repeats of the newest entry are dropped.
    pub fn add(&mut self, entry: &str) -> io::Result<()> {
        self.reset();
        if entry.trim().is_empty() || self.entries.last().is_some_and(|last| last == entry) {
            return Ok(());
        }
        self.entries.push(entry.to_string());
        self.truncate();
        self.save()
    }

    /// Step back. The first call snapshots `current` as the live buffer.
    pub fn previous(&mut self, current: &str) -> Option<Recall> {
        if self.entries.is_empty() {
            return None;
        }
        let (idx, moved) = match self.cursor {
            None => {
                self.live = Some(current.to_string());
                (self.entries.len() - 1, true)
            }
            Some(0) => (0, false),
            Some(i) => (i - 1, true),
        };
        self.cursor = Some(idx);
        Some(Recall {
            text: self.entries[idx].clone(),
            moved,
        })
    }

    /// Step forward. Past the newest entry the live buffer is restored and navigation ends.
    pub fn next(&mut self) -> Option<String> {
        let idx = self.cursor?;
        if idx + 1 < self.entries.len() {
            self.cursor = Some(idx + 1);
            return Some(self.entries[idx + 1].clone());
        }
        let live = self.live.take().unwrap_or_default();
        self.reset();
        Some(live)
    }

    /// Forget the navigation position and live buffer.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.live = None;
    }

    pub fn is_navigating(&self) -> bool {
        self.cursor.is_some()
    }

    fn truncate(&mut self) {
        let excess = self.entries.len().saturating_sub(HISTORY_CAPACITY);
        if excess > 0 {
            self.entries.drain(..excess);
        }
    }

    /// Atomic full rewrite via a sibling temp file.
    fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        for entry in &self.entries {
            writeln!(tmp, "{}", escape(entry))?;
        }
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Backslashes doubled, newlines written as `\n`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
