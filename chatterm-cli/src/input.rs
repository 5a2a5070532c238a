//! Multi-line prompt editor. The cursor is a byte offset into `text`, always
//! on a char boundary.

use unicode_width::UnicodeWidthStr;

pub const MIN_HEIGHT: u16 = 3;
pub const MAX_HEIGHT: u16 = 20;

#[derive(Debug, Default)]
pub struct TextArea {
    text: String,
    cursor: usize,
}

impl TextArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Replace the buffer, cursor at the end.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.cursor = self.text.len();
    }

    /// Take the buffer, leaving the editor empty.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    /// Which line (0-indexed) the cursor is on.
    pub fn cursor_line(&self) -> usize {
        self.text[..self.cursor].matches('\n').count()
    }

    /// Display column of the cursor within its line.
    pub fn cursor_col(&self) -> usize {
        let before = &self.text[..self.cursor];
        let start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        UnicodeWidthStr::width(&before[start..])
    }

    /// Wrapped row count at `width` columns.
    pub fn rows(&self, width: usize) -> usize {
        self.text
            .split('\n')
            .map(|line| wrapped_rows(line, width))
            .sum()
    }

    /// Widget height including borders, clamped to the allowed range.
    pub fn height(&self, inner_width: usize) -> u16 {
        let rows = self.rows(inner_width).min(u16::MAX as usize) as u16;
        rows.saturating_add(2).clamp(MIN_HEIGHT, MAX_HEIGHT)
    }

    // ─── Editing ────────────────────────────────────────────────────

    pub fn insert_char(&mut self, c: char) {
        self.text.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    pub fn insert_str(&mut self, s: &str) {
        self.text.insert_str(self.cursor, s);
        self.cursor += s.len();
    }

    pub fn newline(&mut self) {
        self.insert_char('\n');
    }

    /// Delete the char before the cursor. False when there was nothing to delete.
    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = self.prev_boundary();
        self.text.drain(prev..self.cursor);
        self.cursor = prev;
        true
    }

    /// Delete the char at the cursor.
    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.text.len() {
            return false;
        }
        let next = self.next_boundary();
        self.text.drain(self.cursor..next);
        true
    }

    /// Delete from the start of the line to the cursor.
    pub fn kill_line_start(&mut self) -> bool {
        let start = self.line_start();
        if start == self.cursor {
            return false;
        }
        self.text.drain(start..self.cursor);
        self.cursor = start;
        true
    }

    /// Delete the word before the cursor, plus any whitespace after it.
    pub fn delete_word(&mut self) -> bool {
        let before = &self.text[..self.cursor];
        let trimmed = before.trim_end();
        let start = trimmed
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        if start == self.cursor {
            return false;
        }
        self.text.drain(start..self.cursor);
        self.cursor = start;
        true
    }

    // ─── Movement ───────────────────────────────────────────────────

    pub fn move_left(&mut self) {
        if self.cursor > 0 {
            self.cursor = self.prev_boundary();
        }
    }

    pub fn move_right(&mut self) {
        if self.cursor < self.text.len() {
            self.cursor = self.next_boundary();
        }
    }

    /// Start of the current line.
    pub fn move_home(&mut self) {
        self.cursor = self.line_start();
    }

    /// End of the current line.
    pub fn move_end(&mut self) {
        let after = &self.text[self.cursor..];
        self.cursor += after.find('\n').unwrap_or(after.len());
    }

    pub fn move_up(&mut self) {
        let start = self.line_start();
        if start == 0 {
            return;
        }
        let col = self.text[start..self.cursor].chars().count();
        let prev_start = self.text[..start - 1]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        self.cursor = advance_chars(&self.text, prev_start, start - 1, col);
    }

    pub fn move_down(&mut self) {
        let start = self.line_start();
        let col = self.text[start..self.cursor].chars().count();
        let Some(nl) = self.text[self.cursor..].find('\n') else {
            return;
        };
        let next_start = self.cursor + nl + 1;
        let next_end = self.text[next_start..]
            .find('\n')
            .map(|i| next_start + i)
            .unwrap_or(self.text.len());
        self.cursor = advance_chars(&self.text, next_start, next_end, col);
    }

    fn line_start(&self) -> usize {
        self.text[..self.cursor]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    fn prev_boundary(&self) -> usize {
        self.text[..self.cursor]
            .char_indices()
            .next_back()
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn next_boundary(&self) -> usize {
        self.text[self.cursor..]
            .char_indices()
            .nth(1)
            .map(|(i, _)| self.cursor + i)
            .unwrap_or(self.text.len())
    }
}

/// Byte offset `n` chars after `from`, stopping at `limit`.
fn advance_chars(text: &str, from: usize, limit: usize, n: usize) -> usize {
    text[from..limit]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(limit)
}

/// How many visual rows a single line takes when wrapped to `width`.
pub fn wrapped_rows(line: &str, width: usize) -> usize {
    if width == 0 {
        return 1;
    }
    let len = UnicodeWidthStr::width(line);
    if len == 0 { 1 } else { len.div_ceil(width) }
}
