use std::collections::HashMap;
use std::sync::OnceLock;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use syntect::easy::HighlightLines;
use syntect::highlighting::ThemeSet;
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::theme;

static SYNTAX_SET: OnceLock<SyntaxSet> = OnceLock::new();
static THEME_SET: OnceLock<ThemeSet> = OnceLock::new();

fn syntax_set() -> &'static SyntaxSet {
    SYNTAX_SET.get_or_init(SyntaxSet::load_defaults_newlines)
}

fn theme_set() -> &'static ThemeSet {
    THEME_SET.get_or_init(ThemeSet::load_defaults)
}

const FENCE: &str = "```";
const DEFAULT_LANG: &str = "md";

// ─── Blocks ─────────────────────────────────────────────────────────

/// A segment of message content split at fenced code boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Text(String),
    Code { lang: String, code: String },
}

impl Block {
    /// Raw text of the block as the user would copy it.
    pub fn content(&self) -> &str {
        match self {
            Block::Text(text) => text,
            Block::Code { code, .. } => code,
        }
    }

    fn hash(&self) -> u32 {
        match self {
            Block::Text(text) => xxhash_rust::xxh32::xxh32(text.as_bytes(), 0),
            Block::Code { lang, code } => {
                let seed = xxhash_rust::xxh32::xxh32(lang.as_bytes(), 1);
                xxhash_rust::xxh32::xxh32(code.as_bytes(), seed)
            }
        }
    }
}

/// Split content into text and fenced code blocks. Fences must start a line;
/// a fence without a language tag is `md`. Tabs in code become two spaces.
/// An unclosed fence at the end still yields a code block.
pub fn parse_blocks(content: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut text = String::new();
    let mut code: Option<(String, String)> = None;

    for line in content.split_inclusive('\n') {
        match code.as_mut() {
            None => {
                if let Some(tag) = line.strip_prefix(FENCE) {
                    if !text.is_empty() {
                        blocks.push(Block::Text(std::mem::take(&mut text)));
                    }
                    let tag = tag.trim();
                    let lang = if tag.is_empty() { DEFAULT_LANG } else { tag };
                    code = Some((lang.to_string(), String::new()));
                } else {
                    text.push_str(line);
                }
            }
            Some((lang, buf)) => {
                if line.trim_end() == FENCE {
                    let mut body = std::mem::take(buf);
                    if body.ends_with('\n') {
                        body.pop();
                    }
                    blocks.push(Block::Code {
                        lang: std::mem::take(lang),
                        code: body,
                    });
                    code = None;
                } else {
                    buf.push_str(&line.replace('\t', "  "));
                }
            }
        }
    }

    if let Some((lang, code)) = code {
        blocks.push(Block::Code { lang, code });
    } else if !text.is_empty() {
        blocks.push(Block::Text(text));
    }
    blocks
}

/// Inverse of [`parse_blocks`] up to normalisation.
#[cfg(test)]
pub fn render_raw(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks {
        match block {
            Block::Text(text) => out.push_str(text),
            Block::Code { lang, code } => {
                out.push_str(FENCE);
                out.push_str(lang);
                out.push('\n');
                out.push_str(code);
                out.push('\n');
                out.push_str(FENCE);
                out.push('\n');
            }
        }
    }
    out
}

// ─── Cached renderer ────────────────────────────────────────────────

struct Cached<T> {
    hash: u32,
    value: T,
}

/// Renders message blocks to styled lines at a fixed width.
///
/// Settled blocks are cached by `(message id, block index)` and validated by a
/// content hash. Finalized messages are cached whole. While streaming, only the
/// last block is considered unsettled: its complete lines are rendered as
/// markdown and the trailing partial line is shown verbatim.
pub struct MarkdownRenderer {
    width: usize,
    blocks: HashMap<(u64, usize), Cached<Vec<Line<'static>>>>,
    messages: HashMap<u64, Cached<Vec<Vec<Line<'static>>>>>,
}

impl MarkdownRenderer {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            blocks: HashMap::new(),
            messages: HashMap::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Changing the width drops every cached rendering.
    pub fn set_width(&mut self, width: usize) {
        if width != self.width {
            self.width = width;
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.messages.clear();
    }

    /// Flattened rendering of one message.
    pub fn render(&mut self, id: u64, blocks: &[Block], finalized: bool) -> Vec<Line<'static>> {
        self.render_blocks(id, blocks, finalized)
            .into_iter()
            .flatten()
            .collect()
    }

    /// Rendering of one message, one entry per block.
    pub fn render_blocks(
        &mut self,
        id: u64,
        blocks: &[Block],
        finalized: bool,
    ) -> Vec<Vec<Line<'static>>> {
        if finalized {
            let hash = blocks
                .iter()
                .fold(blocks.len() as u32, |acc, b| acc.rotate_left(5) ^ b.hash());
            if let Some(hit) = self.messages.get(&id)
                && hit.hash == hash
            {
                return hit.value.clone();
            }
            let rendered: Vec<_> = blocks
                .iter()
                .enumerate()
                .map(|(idx, block)| self.settled(id, idx, block))
                .collect();
            self.messages.insert(
                id,
                Cached {
                    hash,
                    value: rendered.clone(),
                },
            );
            return rendered;
        }

        self.messages.remove(&id);
        let Some((last, settled)) = blocks.split_last() else {
            return Vec::new();
        };
        let mut rendered: Vec<_> = settled
            .iter()
            .enumerate()
            .map(|(idx, block)| self.settled(id, idx, block))
            .collect();
        rendered.push(self.streaming(id, settled.len(), last));
        rendered
    }

    fn settled(&mut self, id: u64, idx: usize, block: &Block) -> Vec<Line<'static>> {
        let hash = block.hash();
        if let Some(hit) = self.blocks.get(&(id, idx))
            && hit.hash == hash
        {
            return hit.value.clone();
        }
        let lines = render_block(block, self.width);
        self.blocks.insert(
            (id, idx),
            Cached {
                hash,
                value: lines.clone(),
            },
        );
        lines
    }

    /// The complete-line prefix goes through the cache; the partial tail is plain.
    fn streaming(&mut self, id: u64, idx: usize, block: &Block) -> Vec<Line<'static>> {
        let body = block.content();
        let split = body.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let (complete, tail) = body.split_at(split);

        let (prefix, tail_line) = match block {
            Block::Text(_) => (
                Block::Text(complete.to_string()),
                Line::from(Span::styled(tail.to_string(), theme::assistant_text())),
            ),
            Block::Code { lang, .. } => (
                Block::Code {
                    lang: lang.clone(),
                    code: complete.to_string(),
                },
                Line::from(vec![
                    Span::styled("│ ", theme::code_chrome()),
                    Span::styled(tail.to_string(), theme::code_content()),
                ]),
            ),
        };

        let mut lines = match block {
            Block::Code { lang, .. } if complete.is_empty() => code_header(lang),
            Block::Text(_) if complete.is_empty() => Vec::new(),
            _ => self.settled(id, idx, &prefix),
        };
        // The trailing blank line of settled markdown would split the tail from its paragraph.
        while lines.last().is_some_and(|l| l.width() == 0) {
            lines.pop();
        }
        if !tail.is_empty() {
            lines.push(tail_line);
        }
        lines
    }
}

/// Render one settled block. Errors fall back to the raw text.
pub fn render_block(block: &Block, width: usize) -> Vec<Line<'static>> {
    match block {
        Block::Text(text) => render_markdown(text, width),
        Block::Code { lang, code } => match highlight(lang, code) {
            Ok(lines) => lines,
            Err(e) => {
                tracing::debug!(%lang, error = %e, "highlight failed, showing raw code");
                let mut lines = code_header(lang);
                lines.extend(code.lines().map(|l| code_line(vec![plain_code(l)])));
                lines
            }
        },
    }
}

// ─── Code ───────────────────────────────────────────────────────────

fn code_header(lang: &str) -> Vec<Line<'static>> {
    vec![Line::from(vec![
        Span::styled("▸ ", theme::code_chrome()),
        Span::styled(lang.to_string(), theme::code_header()),
    ])]
}

fn code_line(mut spans: Vec<Span<'static>>) -> Line<'static> {
    spans.insert(0, Span::styled("│ ", theme::code_chrome()));
    Line::from(spans)
}

fn plain_code(text: &str) -> Span<'static> {
    Span::styled(text.to_string(), theme::code_content())
}

fn highlight(lang: &str, code: &str) -> Result<Vec<Line<'static>>, syntect::Error> {
    let ps = syntax_set();
    let syntax = ps
        .find_syntax_by_token(lang)
        .unwrap_or_else(|| ps.find_syntax_plain_text());
    let Some(syntax_theme) = theme_set().themes.get(theme::SYNTAX_THEME) else {
        return Ok(code_header(lang)
            .into_iter()
            .chain(code.lines().map(|l| code_line(vec![plain_code(l)])))
            .collect());
    };
    let mut h = HighlightLines::new(syntax, syntax_theme);
    let mut lines = code_header(lang);
    for line in LinesWithEndings::from(code) {
        let ranges = h.highlight_line(line, ps)?;
        let spans = ranges
            .into_iter()
            .filter_map(|(style, text)| {
                let text = text.trim_end_matches(['\n', '\r']);
                if text.is_empty() {
                    return None;
                }
                let fg = Color::Rgb(style.foreground.r, style.foreground.g, style.foreground.b);
                Some(Span::styled(text.to_string(), Style::default().fg(fg)))
            })
            .collect();
        lines.push(code_line(spans));
    }
    Ok(lines)
}

// ─── Prose ──────────────────────────────────────────────────────────

/// Pad a string with trailing spaces to reach a target display width.
fn pad_display(s: &str, target: usize) -> String {
    let padding = target.saturating_sub(UnicodeWidthStr::width(s));
    format!("{s}{}", " ".repeat(padding))
}

/// Cut a string to `max_w` display columns, ending in `…` when cut.
fn truncate_display(s: &str, max_w: usize) -> String {
    if UnicodeWidthStr::width(s) <= max_w {
        return s.to_string();
    }
    let budget = max_w.saturating_sub(1);
    let mut out = String::new();
    let mut col = 0;
    for ch in s.chars() {
        let cw = UnicodeWidthChar::width(ch).unwrap_or(0);
        if col + cw > budget {
            break;
        }
        out.push(ch);
        col += cw;
    }
    out.push('…');
    out
}

/// Styled lines for a markdown text block. Tables are fitted to `max_width`.
pub fn render_markdown(text: &str, max_width: usize) -> Vec<Line<'static>> {
    let mut renderer = Prose::new(max_width);
    for event in Parser::new_ext(text, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH) {
        renderer.process(event);
    }
    renderer.flush_line();
    renderer.lines
}

#[derive(Default)]
struct Table {
    head: Vec<String>,
    rows: Vec<Vec<String>>,
    cell: String,
    in_head: bool,
}

struct Prose {
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    styles: Vec<Style>,
    max_width: usize,
    in_code: bool,
    /// One entry per open list; `Some(n)` is the next ordinal of a numbered list.
    lists: Vec<Option<u64>>,
    pending_bullet: Option<String>,
    quote_depth: usize,
    link: Option<String>,
    table: Option<Table>,
}

impl Prose {
    fn new(max_width: usize) -> Self {
        Self {
            lines: Vec::new(),
            spans: Vec::new(),
            styles: vec![theme::assistant_text()],
            max_width,
            in_code: false,
            lists: Vec::new(),
            pending_bullet: None,
            quote_depth: 0,
            link: None,
            table: None,
        }
    }

    fn style(&self) -> Style {
        self.styles
            .last()
            .copied()
            .unwrap_or_else(theme::assistant_text)
    }

    fn push_modifier(&mut self, modifier: Modifier) {
        let base = self.style();
        self.styles.push(base.add_modifier(modifier));
    }

    fn pop_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn flush_line(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        let mut spans = std::mem::take(&mut self.spans);
        if self.quote_depth > 0 {
            spans.insert(0, Span::styled("┃ ".repeat(self.quote_depth), theme::quote()));
        }
        self.lines.push(Line::from(spans));
    }

    fn blank_line(&mut self) {
        if self.lines.last().is_some_and(|l| l.width() > 0) {
            self.lines.push(Line::default());
        }
    }

    fn text(&mut self, text: &str, style: Style) {
        if let Some(bullet) = self.pending_bullet.take() {
            self.spans.push(Span::styled(bullet, theme::assistant_text()));
        }
        self.spans.push(Span::styled(text.to_string(), style));
    }

    fn process(&mut self, event: Event<'_>) {
        if let Some(table) = self.table.as_mut() {
            match event {
                Event::Text(t) | Event::Code(t) => table.cell.push_str(&t),
                Event::Start(Tag::TableHead) => table.in_head = true,
                Event::End(TagEnd::TableHead) => table.in_head = false,
                Event::Start(Tag::TableRow) if !table.in_head => table.rows.push(Vec::new()),
                Event::Start(Tag::TableCell) => table.cell.clear(),
                Event::End(TagEnd::TableCell) => {
                    let cell = std::mem::take(&mut table.cell);
                    if table.in_head {
                        table.head.push(cell);
                    } else if let Some(row) = table.rows.last_mut() {
                        row.push(cell);
                    }
                }
                Event::End(TagEnd::Table) => {
                    if let Some(table) = self.table.take() {
                        self.flush_table(table);
                    }
                }
                _ => {}
            }
            return;
        }

        match event {
            Event::Start(Tag::Table(_)) => {
                self.flush_line();
                self.table = Some(Table::default());
            }

            Event::Start(Tag::Heading { .. }) => {
                self.flush_line();
                self.styles.push(theme::heading());
            }
            Event::End(TagEnd::Heading(_)) => {
                self.flush_line();
                self.pop_style();
                self.blank_line();
            }

            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                self.flush_line();
                if self.lists.is_empty() {
                    self.blank_line();
                }
            }

            Event::Start(Tag::BlockQuote(_)) => {
                self.flush_line();
                self.quote_depth += 1;
                self.styles.push(theme::quote());
            }
            Event::End(TagEnd::BlockQuote(_)) => {
                self.flush_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.pop_style();
                self.blank_line();
            }

            Event::Start(Tag::Strong) => self.push_modifier(Modifier::BOLD),
            Event::Start(Tag::Emphasis) => self.push_modifier(Modifier::ITALIC),
            Event::Start(Tag::Strikethrough) => self.push_modifier(Modifier::CROSSED_OUT),
            Event::End(TagEnd::Strong | TagEnd::Emphasis | TagEnd::Strikethrough) => {
                self.pop_style()
            }
            Event::Code(code) => self.text(&code, theme::inline_code()),

            Event::Start(Tag::Link { dest_url, .. }) => {
                self.link = Some(dest_url.to_string());
                self.styles.push(theme::link());
            }
            Event::End(TagEnd::Link) => {
                self.pop_style();
                if let Some(url) = self.link.take()
                    && !url.is_empty()
                {
                    self.spans
                        .push(Span::styled(format!(" ({url})"), theme::code_header()));
                }
            }

            // Indented code; fenced code never reaches prose rendering.
            Event::Start(Tag::CodeBlock(_)) => {
                self.flush_line();
                self.in_code = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                self.in_code = false;
                self.blank_line();
            }

            Event::Start(Tag::List(first)) => {
                self.flush_line();
                self.lists.push(first);
            }
            Event::End(TagEnd::List(_)) => {
                self.flush_line();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank_line();
                }
            }
            Event::Start(Tag::Item) => {
                self.flush_line();
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => "• ".to_string(),
                };
                self.pending_bullet = Some(format!("{indent}  {marker}"));
            }
            Event::End(TagEnd::Item) => self.flush_line(),
            Event::TaskListMarker(done) => {
                let mark = if done { "[x] " } else { "[ ] " };
                self.text(mark, self.style());
            }

            Event::Text(text) => {
                if self.in_code {
                    for line in text.lines() {
                        self.lines.push(code_line(vec![plain_code(line)]));
                    }
                } else {
                    let style = self.style();
                    self.text(&text, style);
                }
            }
            Event::SoftBreak => self.spans.push(Span::raw(" ")),
            Event::HardBreak => self.flush_line(),

            Event::Rule => {
                self.flush_line();
                let width = self.max_width.clamp(1, 40);
                self.lines
                    .push(Line::from(Span::styled("─".repeat(width), theme::code_chrome())));
                self.blank_line();
            }

            _ => {}
        }
    }

    /// Box-drawn table with columns shrunk proportionally to fit `max_width`.
    fn flush_table(&mut self, table: Table) {
        let Table { head, rows, .. } = table;
        let cols = rows.iter().map(Vec::len).chain([head.len()]).max().unwrap_or(0);
        if cols == 0 {
            return;
        }
        let mut widths = vec![0usize; cols];
        for row in std::iter::once(&head).chain(rows.iter()) {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(UnicodeWidthStr::width(cell.as_str()));
            }
        }
        fit_columns(&mut widths, self.max_width);

        let chrome = theme::code_chrome();
        let row_line = |cells: &[String], style: Style| -> Line<'static> {
            let mut spans = vec![Span::styled("│", chrome)];
            for (i, w) in widths.iter().enumerate() {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                let shown = pad_display(&truncate_display(cell, *w), *w);
                spans.push(Span::styled(format!(" {shown} "), style));
                spans.push(Span::styled("│", chrome));
            }
            Line::from(spans)
        };
        let rule = |left: &str, mid: &str, right: &str| -> Line<'static> {
            let inner: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            Line::from(Span::styled(
                format!("{left}{}{right}", inner.join(mid)),
                chrome,
            ))
        };

        self.lines.push(rule("┌", "┬", "┐"));
        if !head.is_empty() {
            self.lines
                .push(row_line(&head, theme::assistant_text().add_modifier(Modifier::BOLD)));
            self.lines.push(rule("├", "┼", "┤"));
        }
        for row in &rows {
            self.lines.push(row_line(row, theme::assistant_text()));
        }
        self.lines.push(rule("└", "┴", "┘"));
        self.blank_line();
    }
}

/// Shrink column widths (minimum 3) until borders and padding fit in `max_width`.
fn fit_columns(widths: &mut [usize], max_width: usize) {
    const MIN_COL: usize = 3;
    if max_width == 0 || widths.is_empty() {
        return;
    }
    let available = max_width.saturating_sub(1 + widths.len() * 3);
    let total: usize = widths.iter().sum();
    if total <= available || available == 0 {
        return;
    }
    for w in widths.iter_mut() {
        *w = ((*w * available) / total).max(MIN_COL);
    }
    let mut sum: usize = widths.iter().sum();
    while sum > available {
        let Some(widest) = widths
            .iter_mut()
            .filter(|w| **w > MIN_COL)
            .max_by_key(|w| **w)
        else {
            break;
        };
        *widest -= 1;
        sum -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(lines: &[Line<'_>]) -> String {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ── parse_blocks ──

    #[test]
    fn splits_text_and_code() {
        let blocks = parse_blocks("intro\n```rust\nfn main() {}\n```\noutro");
        assert_eq!(
            blocks,
            vec![
                Block::Text("intro\n".into()),
                Block::Code {
                    lang: "rust".into(),
                    code: "fn main() {}".into()
                },
                Block::Text("outro".into()),
            ]
        );
    }

    #[test]
    fn untagged_fence_defaults_to_md_and_tabs_are_expanded() {
        let blocks = parse_blocks("```\n\tindented\n```\n");
        assert_eq!(
            blocks,
            vec![Block::Code {
                lang: "md".into(),
                code: "  indented".into()
            }]
        );
    }

    #[test]
    fn fence_must_start_the_line() {
        let blocks = parse_blocks("see ```this``` inline\n");
        assert_eq!(blocks, vec![Block::Text("see ```this``` inline\n".into())]);
    }

    #[test]
    fn unclosed_fence_is_still_code() {
        let blocks = parse_blocks("```py\nprint(1)\npri");
        assert_eq!(
            blocks,
            vec![Block::Code {
                lang: "py".into(),
                code: "print(1)\npri".into()
            }]
        );
    }

    #[test]
    fn parse_is_idempotent_through_raw() {
        let samples = [
            "plain",
            "a\n```\nx\n```\nb\n",
            "```rs\n\tfn f() {}\n\n```\n\n```\n```",
            "```js\nopen",
            "```\nx\n",
            "text\n```sh\nls\n```",
            "",
        ];
        for s in samples {
            let once = parse_blocks(s);
            assert_eq!(parse_blocks(&render_raw(&once)), once, "sample {s:?}");
        }
    }

    // ── renderer ──

    #[test]
    fn incremental_render_matches_batch() {
        let s = "# Title\n\nSome *text* here.\n\n```rust\nfn main() {\n\tprintln!(\"hi\");\n}\n```\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\nbye";
        let mut streaming = MarkdownRenderer::new(60);
        let mut acc = String::new();
        for ch in s.chars() {
            acc.push(ch);
            let _ = streaming.render(7, &parse_blocks(&acc), false);
        }
        let incremental = streaming.render(7, &parse_blocks(&acc), true);
        let batch = MarkdownRenderer::new(60).render(7, &parse_blocks(s), true);
        assert_eq!(incremental, batch);
    }

    #[test]
    fn streaming_tail_is_plain() {
        let mut r = MarkdownRenderer::new(80);
        let lines = r.render(1, &parse_blocks("**done**\n**parti"), false);
        assert_eq!(text_of(&lines), "done\n**parti");
    }

    #[test]
    fn streaming_code_shows_partial_line() {
        let mut r = MarkdownRenderer::new(80);
        let lines = r.render(1, &parse_blocks("```sh\nls -la\nech"), false);
        let text = text_of(&lines);
        assert!(text.starts_with("▸ sh"));
        assert!(text.contains("│ ls -la"));
        assert!(text.ends_with("│ ech"));
    }

    #[test]
    fn finalized_render_is_cached_and_width_invalidates() {
        let mut r = MarkdownRenderer::new(80);
        let blocks = parse_blocks("hello");
        let a = r.render(3, &blocks, true);
        assert_eq!(r.render(3, &blocks, true), a);
        r.set_width(20);
        assert!(r.messages.is_empty());
        assert!(r.blocks.is_empty());
    }

    #[test]
    fn code_block_has_header_and_chrome() {
        let lines = render_block(
            &Block::Code {
                lang: "rust".into(),
                code: "let x = 1;".into(),
            },
            80,
        );
        assert_eq!(lines.len(), 2);
        assert!(text_of(&lines).contains("│ let x = 1;"));
    }

    #[test]
    fn unknown_language_still_renders() {
        let lines = render_block(
            &Block::Code {
                lang: "no-such-lang".into(),
                code: "a\nb".into(),
            },
            80,
        );
        assert_eq!(text_of(&lines), "▸ no-such-lang\n│ a\n│ b");
    }

    // ── prose ──

    #[test]
    fn lists_are_bulleted_and_numbered() {
        let text = text_of(&render_markdown("- one\n- two\n\n1. first\n2. second", 80));
        assert!(text.contains("• one"));
        assert!(text.contains("• two"));
        assert!(text.contains("1. first"));
        assert!(text.contains("2. second"));
    }

    #[test]
    fn links_show_destination() {
        let text = text_of(&render_markdown("[docs](https://example.org)", 80));
        assert!(text.contains("docs (https://example.org)"));
    }

    #[test]
    fn table_fits_narrow_width() {
        let lines = render_markdown(
            "| Name | Description |\n|---|---|\n| short | A very long description that must be cut |",
            30,
        );
        let text = text_of(&lines);
        assert!(text.contains('┌'));
        assert!(text.contains('…'));
        for line in &lines {
            assert!(line.width() <= 30, "{line:?}");
        }
    }

    #[test]
    fn pad_and_truncate_use_display_width() {
        assert_eq!(pad_display("世", 5), "世   ");
        assert_eq!(truncate_display("abcdef", 4), "abc…");
        assert_eq!(truncate_display("abc", 4), "abc");
    }
}
