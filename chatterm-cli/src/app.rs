use std::time::{Duration, Instant};

use chatterm_core::history::InputHistory;
use crossterm::event::{Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::style::Style;
use ratatui::text::{Line, Span};
use unicode_width::UnicodeWidthChar;

use crate::event::AppEvent;
use crate::input::TextArea;
use crate::markdown::MarkdownRenderer;
use crate::message::{Kind, RuntimeMessage};
use crate::producer::RENDER_INTERVAL;
use crate::session::{Notice, Phase, Session};
use crate::theme;
use crate::ui;

pub const TOAST_TTL: Duration = Duration::from_secs(3);
pub const SCROLL_STEP: usize = 3;
/// Columns reserved left of every transcript line for the selection mark.
pub const GUTTER: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Input,
    Viewport,
}

#[derive(Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    Quit,
    /// Suspend the UI and show this text in `$EDITOR`.
    OpenEditor(String),
}

pub struct Toast {
    pub text: String,
    pub error: bool,
    pub expires: Instant,
}

/// Rows `[start, end)` of one navigable block in the transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRows {
    pub message: usize,
    pub block: usize,
    pub start: usize,
    pub end: usize,
}

/// The viewport content, already wrapped to the viewport width.
#[derive(Default)]
pub struct Transcript {
    pub lines: Vec<Line<'static>>,
    pub blocks: Vec<BlockRows>,
}

pub struct App {
    pub session: Session,
    pub input: TextArea,
    history: InputHistory,
    pub focus: Focus,
    /// Selected `(message, block)`.
    pub selection: Option<(usize, usize)>,
    /// First visible transcript row.
    pub scroll: usize,
    /// Stick to the bottom as content arrives.
    pub follow: bool,
    /// Bring the selection into view on the next layout.
    reveal: bool,
    renderer: MarkdownRenderer,
    pub transcript: Transcript,
    pub viewport_rows: usize,
    input_height: u16,
    pub toast: Option<Toast>,
    pub dirty: bool,
    /// Spinner frame counter.
    pub tick: usize,
    /// When session events last requested a redraw.
    last_redraw: Option<Instant>,
}

impl App {
    pub fn new(session: Session, history: InputHistory) -> Self {
        Self {
            session,
            input: TextArea::new(),
            history,
            focus: Focus::Input,
            selection: None,
            scroll: 0,
            follow: true,
            reveal: false,
            renderer: MarkdownRenderer::new(80),
            transcript: Transcript::default(),
            viewport_rows: 0,
            input_height: 0,
            toast: None,
            dirty: true,
            tick: 0,
            last_redraw: None,
        }
    }

    // ─── Events ─────────────────────────────────────────────────────

    pub fn handle_event(&mut self, event: AppEvent) -> KeyOutcome {
        match event {
            AppEvent::Terminal(TermEvent::Key(key)) => return self.handle_key(key),
            AppEvent::Terminal(TermEvent::Paste(text)) => {
                if self.focus == Focus::Input && self.session.phase() != Phase::AwaitingConfirm {
                    self.input.insert_str(&text.replace('\r', ""));
                    self.history.reset();
                    self.dirty = true;
                }
            }
            AppEvent::Terminal(TermEvent::Resize(..)) => self.dirty = true,
            AppEvent::Terminal(_) => {}
            AppEvent::Tick => self.on_tick(Instant::now()),
            AppEvent::Quit => return KeyOutcome::Quit,
            ev @ (AppEvent::Stream { .. } | AppEvent::ToolFinished { .. }) => {
                if self.session.handle(ev) {
                    self.dirty = true;
                    self.last_redraw = Some(Instant::now());
                }
            }
        }
        self.drain_notices();
        KeyOutcome::Continue
    }

    /// Advances the spinner. The frame is only drawn when no session redraw
    /// happened within the render interval.
    fn on_tick(&mut self, now: Instant) {
        if matches!(
            self.session.phase(),
            Phase::Streaming | Phase::Cancelling | Phase::Executing
        ) {
            self.tick = self.tick.wrapping_add(1);
            if self
                .last_redraw
                .is_none_or(|at| now.saturating_duration_since(at) >= RENDER_INTERVAL)
            {
                self.dirty = true;
                self.last_redraw = Some(now);
            }
        }
        if self.toast.as_ref().is_some_and(|t| t.expires <= now) {
            self.toast = None;
            self.dirty = true;
        }
    }

    fn drain_notices(&mut self) {
        if let Some(Notice { text, error }) = self.session.take_notices().pop() {
            self.show_toast(text, error);
        }
    }

    pub fn show_toast(&mut self, text: impl Into<String>, error: bool) {
        self.toast = Some(Toast {
            text: text.into(),
            error,
            expires: Instant::now() + TOAST_TTL,
        });
        self.dirty = true;
    }

    // ─── Keys ───────────────────────────────────────────────────────

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyOutcome {
        if key.kind != KeyEventKind::Press {
            return KeyOutcome::Continue;
        }
        self.dirty = true;
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);

        match key.code {
            KeyCode::Char('c') if ctrl => {
                return match self.session.phase() {
                    Phase::Streaming | Phase::Executing => {
                        self.session.interrupt();
                        KeyOutcome::Continue
                    }
                    Phase::Cancelling => KeyOutcome::Continue,
                    Phase::Idle | Phase::AwaitingConfirm => KeyOutcome::Quit,
                };
            }
            KeyCode::Tab | KeyCode::BackTab => {
                self.focus = match self.focus {
                    Focus::Input => Focus::Viewport,
                    Focus::Viewport => Focus::Input,
                };
                return KeyOutcome::Continue;
            }
            KeyCode::Char('t') if alt => {
                let effort = self.session.cycle_effort();
                self.show_toast(format!("Reasoning effort: {}", effort.as_str()), false);
                return KeyOutcome::Continue;
            }
            _ => {}
        }

        if self.session.phase() == Phase::AwaitingConfirm {
            match key.code {
                KeyCode::Char('y' | 'Y') | KeyCode::Enter => self.session.approve(),
                KeyCode::Char('n' | 'N') | KeyCode::Esc => self.session.reject(),
                _ => {}
            }
            self.follow = true;
            self.drain_notices();
            return KeyOutcome::Continue;
        }

        match self.focus {
            Focus::Input => {
                self.input_key(key, ctrl, alt);
                KeyOutcome::Continue
            }
            Focus::Viewport => self.viewport_key(key, ctrl, alt),
        }
    }

    fn input_key(&mut self, key: KeyEvent, ctrl: bool, alt: bool) {
        let edited = match key.code {
            KeyCode::Char('j') if ctrl => {
                self.submit();
                return;
            }
            KeyCode::Char('p') if alt => {
                if let Some(recall) = self.history.previous(self.input.text()) {
                    self.input.set_text(recall.text);
                }
                return;
            }
            KeyCode::Char('n') if alt => {
                if let Some(text) = self.history.next() {
                    self.input.set_text(text);
                }
                return;
            }
            KeyCode::Char('u') if ctrl => self.input.kill_line_start(),
            KeyCode::Char('w') if ctrl => self.input.delete_word(),
            KeyCode::Char('a') if ctrl => {
                self.input.move_home();
                false
            }
            KeyCode::Char('e') if ctrl => {
                self.input.move_end();
                false
            }
            KeyCode::Char(c) if !ctrl && !alt => {
                self.input.insert_char(c);
                true
            }
            KeyCode::Enter => {
                self.input.newline();
                true
            }
            KeyCode::Backspace => self.input.backspace(),
            KeyCode::Delete => self.input.delete(),
            KeyCode::Left => {
                self.input.move_left();
                false
            }
            KeyCode::Right => {
                self.input.move_right();
                false
            }
            KeyCode::Up => {
                self.input.move_up();
                false
            }
            KeyCode::Down => {
                self.input.move_down();
                false
            }
            KeyCode::Home => {
                self.input.move_home();
                false
            }
            KeyCode::End => {
                self.input.move_end();
                false
            }
            KeyCode::PageUp => {
                self.scroll_up(self.viewport_rows.max(1));
                false
            }
            KeyCode::PageDown => {
                self.scroll_down(self.viewport_rows.max(1));
                false
            }
            _ => false,
        };
        if edited {
            self.history.reset();
        }
    }

    fn viewport_key(&mut self, key: KeyEvent, ctrl: bool, alt: bool) -> KeyOutcome {
        match key.code {
            KeyCode::Char('{') if alt => self.select_message(-1),
            KeyCode::Char('}') if alt => self.select_message(1),
            KeyCode::Char('[') if alt => self.select_block(-1),
            KeyCode::Char(']') if alt => self.select_block(1),
            KeyCode::Char('<') if alt => self.top(),
            KeyCode::Char('>') if alt => self.bottom(),
            KeyCode::Char('p') if ctrl => self.scroll_up(SCROLL_STEP),
            KeyCode::Char('n') if ctrl => self.scroll_down(SCROLL_STEP),
            KeyCode::Up => self.scroll_up(1),
            KeyCode::Down => self.scroll_down(1),
            KeyCode::PageUp => self.scroll_up(self.viewport_rows.max(1)),
            KeyCode::PageDown => self.scroll_down(self.viewport_rows.max(1)),
            KeyCode::Char('w') if alt => self.copy_selection(),
            KeyCode::Char('o') if ctrl => {
                if let Some(text) = self.selected_text() {
                    return KeyOutcome::OpenEditor(text);
                }
                self.show_toast("Nothing selected", false);
            }
            KeyCode::Esc => self.selection = None,
            _ => {}
        }
        KeyOutcome::Continue
    }

    fn submit(&mut self) {
        if self.session.phase() != Phase::Idle {
            return;
        }
        let text = self.input.text().to_string();
        if !self.session.submit(&text) {
            return;
        }
        if let Err(e) = self.history.add(&text) {
            tracing::warn!(error = %e, "failed to save input history");
        }
        self.input.take();
        self.selection = None;
        self.follow = true;
    }

    // ─── Navigation ─────────────────────────────────────────────────

    /// Navigable `(message, block)` units; a message without blocks is one unit.
    fn units(&self) -> Vec<(usize, usize)> {
        self.session
            .messages()
            .iter()
            .enumerate()
            .flat_map(|(mi, m)| (0..m.blocks.len().max(1)).map(move |bi| (mi, bi)))
            .collect()
    }

    fn select(&mut self, unit: Option<(usize, usize)>) {
        if unit.is_some() {
            self.selection = unit;
            self.follow = false;
            self.reveal = true;
        }
    }

    fn select_block(&mut self, delta: isize) {
        let units = self.units();
        let next = match self.selection.and_then(|s| units.iter().position(|u| *u == s)) {
            Some(pos) => pos.checked_add_signed(delta).and_then(|p| units.get(p)),
            None if delta < 0 => units.last(),
            None => units.first(),
        };
        self.select(next.copied());
    }

    fn select_message(&mut self, delta: isize) {
        let count = self.session.messages().len();
        if count == 0 {
            return;
        }
        let target = match self.selection {
            Some((mi, _)) => mi.saturating_add_signed(delta).min(count - 1),
            None if delta < 0 => count - 1,
            None => 0,
        };
        self.select(Some((target, 0)));
    }

    fn top(&mut self) {
        self.select(self.units().first().copied());
        self.scroll = 0;
    }

    fn bottom(&mut self) {
        self.selection = self.units().last().copied();
        self.reveal = false;
        self.follow = true;
    }

    pub fn scroll_up(&mut self, amount: usize) {
        self.scroll = self.scroll.saturating_sub(amount);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, amount: usize) {
        let max = self.max_scroll();
        self.scroll = self.scroll.saturating_add(amount).min(max);
        if self.scroll >= max {
            self.follow = true;
        }
    }

    fn max_scroll(&self) -> usize {
        self.transcript.lines.len().saturating_sub(self.viewport_rows)
    }

    pub fn selected_text(&self) -> Option<String> {
        let (mi, bi) = self.selection?;
        let msg = self.session.messages().get(mi)?;
        Some(match msg.blocks.get(bi) {
            Some(block) => block.content().to_string(),
            None => msg.content.clone(),
        })
    }

    fn copy_selection(&mut self) {
        let Some(text) = self.selected_text() else {
            self.show_toast("Nothing selected", false);
            return;
        };
        let copied = arboard::Clipboard::new().and_then(|mut cb| cb.set_text(text.clone()));
        match copied {
            Ok(()) => self.show_toast(format!("Copied {} chars", text.chars().count()), false),
            Err(e) => {
                tracing::warn!(error = %e, "clipboard copy failed");
                self.show_toast(format!("Copy failed: {e}"), true);
            }
        }
    }

    // ─── Layout ─────────────────────────────────────────────────────

    /// Recompute the transcript and scroll position for a `width`×`height` screen.
    pub fn prepare(&mut self, width: u16, height: u16) {
        let heights = ui::heights(self, width, height);
        if self.input_height != 0 && heights.bottom != self.input_height && !self.follow {
            let delta = heights.bottom as isize - self.input_height as isize;
            self.scroll = self.scroll.saturating_add_signed(delta);
        }
        self.input_height = heights.bottom;
        self.viewport_rows = heights.viewport as usize;
        self.transcript = self.build_transcript(width as usize);
        self.sync_scroll();
    }

    fn sync_scroll(&mut self) {
        let max = self.max_scroll();
        if self.reveal {
            self.reveal = false;
            if let Some(sel) = self.selection
                && let Some(rows) = self
                    .transcript
                    .blocks
                    .iter()
                    .find(|b| (b.message, b.block) == sel)
            {
                if rows.start < self.scroll || rows.end > self.scroll + self.viewport_rows {
                    self.scroll = rows.start;
                }
            }
        } else if self.follow {
            self.scroll = max;
        }
        self.scroll = self.scroll.min(max);
    }

    pub fn build_transcript(&mut self, width: usize) -> Transcript {
        let content_width = width.saturating_sub(GUTTER).max(1);
        self.renderer.set_width(content_width);
        let mut out = Transcript::default();
        let mut rows = Vec::new();
        let renderer = &mut self.renderer;

        for (mi, msg) in self.session.messages().iter().enumerate() {
            if mi > 0 {
                out.lines.push(Line::default());
            }
            if let Some(header) = message_header(msg) {
                push_wrapped(&mut out.lines, header, content_width, None);
            }
            let blocks = render_message(renderer, msg);
            if blocks.is_empty() {
                let start = out.lines.len();
                if msg.kind == Kind::User {
                    push_wrapped(&mut out.lines, prompt_line(Vec::new()), content_width, None);
                }
                rows.push(BlockRows {
                    message: mi,
                    block: 0,
                    start,
                    end: out.lines.len().max(start + 1),
                });
            }
            for (bi, lines) in blocks.into_iter().enumerate() {
                let start = out.lines.len();
                let mark = (self.selection == Some((mi, bi))).then(theme::selection);
                for line in lines {
                    push_wrapped(&mut out.lines, line, content_width, mark);
                }
                rows.push(BlockRows {
                    message: mi,
                    block: bi,
                    start,
                    end: out.lines.len(),
                });
            }
            if let Some(err) = &msg.error {
                let line = Line::from(Span::styled(format!("✗ {err}"), theme::error()));
                push_wrapped(&mut out.lines, line, content_width, None);
            }
        }

        if let Some(status) = self.activity() {
            let frame = theme::SPINNER_FRAMES[self.tick % theme::SPINNER_FRAMES.len()];
            out.lines.push(Line::default());
            out.lines.push(Line::from(vec![
                Span::raw(" ".repeat(GUTTER)),
                Span::styled(format!("{frame} "), theme::spinner()),
                Span::styled(status, theme::status_text()),
            ]));
        }
        out.blocks = rows;
        out
    }

    /// Status shown under the transcript while something is in flight.
    fn activity(&self) -> Option<&'static str> {
        match self.session.phase() {
            Phase::Streaming => Some("generating"),
            Phase::Cancelling => Some("cancelling"),
            Phase::Executing => Some("running tool"),
            Phase::Idle | Phase::AwaitingConfirm => None,
        }
    }
}

fn render_message(renderer: &mut MarkdownRenderer, msg: &RuntimeMessage) -> Vec<Vec<Line<'static>>> {
    match msg.kind {
        Kind::User => {
            let mut first = true;
            msg.blocks
                .iter()
                .map(|block| {
                    block
                        .content()
                        .split('\n')
                        .map(|text| {
                            let span = Span::styled(text.to_string(), theme::user_text());
                            if std::mem::take(&mut first) {
                                prompt_line(vec![span])
                            } else {
                                Line::from(vec![Span::raw("  "), span])
                            }
                        })
                        .collect()
                })
                .collect()
        }
        Kind::Reasoning | Kind::System => {
            let style = match msg.kind {
                Kind::Reasoning => theme::reasoning(),
                _ => theme::system_message(),
            };
            renderer
                .render_blocks(msg.id, &msg.blocks, !msg.streaming)
                .into_iter()
                .map(|lines| lines.into_iter().map(|l| l.patch_style(style)).collect())
                .collect()
        }
        _ => renderer.render_blocks(msg.id, &msg.blocks, !msg.streaming),
    }
}

fn prompt_line(mut spans: Vec<Span<'static>>) -> Line<'static> {
    spans.insert(0, Span::styled(format!("{} ", theme::PROMPT_CHAR), theme::prompt()));
    Line::from(spans)
}

fn message_header(msg: &RuntimeMessage) -> Option<Line<'static>> {
    let text = match msg.kind {
        Kind::ToolCall => format!("⚙ {}", msg.tool_name.as_deref().unwrap_or("tool")),
        Kind::ToolResult => "↳ output".to_string(),
        Kind::Reasoning => "thinking".to_string(),
        _ => return None,
    };
    Some(Line::from(Span::styled(text, theme::tool_label())))
}

/// Hard-wrap `line` to `width` columns and append it behind the gutter.
fn push_wrapped(out: &mut Vec<Line<'static>>, line: Line<'static>, width: usize, mark: Option<Style>) {
    let gutter = match mark {
        Some(style) => Span::styled(format!("{} ", theme::GUTTER_MARK), style),
        None => Span::raw(" ".repeat(GUTTER)),
    };
    for mut row in wrap_line(line, width) {
        row.spans.insert(0, gutter.clone());
        out.push(row);
    }
}

/// Split a styled line into rows of at most `width` display columns.
pub fn wrap_line(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    let style = line.style;
    let mut rows = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut used = 0usize;
    for span in line.spans {
        let mut chunk = String::new();
        for ch in span.content.chars() {
            let w = ch.width().unwrap_or(0);
            if used + w > width && used > 0 {
                if !chunk.is_empty() {
                    current.push(Span::styled(std::mem::take(&mut chunk), span.style));
                }
                rows.push(Line::from(std::mem::take(&mut current)).style(style));
                used = 0;
            }
            chunk.push(ch);
            used += w;
        }
        if !chunk.is_empty() {
            current.push(Span::styled(chunk, span.style));
        }
    }
    rows.push(Line::from(current).style(style));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionDeps;
    use crate::test_support::{FlakyStore, ScriptedGenerator, Step, chunks};
    use chatterm_core::chat::{Chat, ToolCall};
    use chatterm_core::generator::StreamEvent;
    use chatterm_core::generator::RequestConfig;
    use chatterm_core::tools::ToolRegistry;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn app(scripts: Vec<Vec<Step>>) -> (App, UnboundedReceiver<AppEvent>) {
        app_with(scripts, ToolRegistry::new())
    }

    fn app_with(
        scripts: Vec<Vec<Step>>,
        tools: ToolRegistry,
    ) -> (App, UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let deps = SessionDeps {
            generator: Arc::new(ScriptedGenerator::new(scripts)),
            store: Arc::new(FlakyStore::new()),
            tools: Arc::new(tools),
            summary: None,
        };
        let session = Session::new(
            Chat::new(),
            false,
            Vec::new(),
            RequestConfig::default(),
            deps,
            tx,
        );
        (App::new(session, InputHistory::in_memory()), rx)
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn alt(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::ALT)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_text(app: &mut App, text: &str) {
        for c in text.chars() {
            app.handle_key(key(KeyCode::Char(c)));
        }
    }

    async fn settle(app: &mut App, rx: &mut UnboundedReceiver<AppEvent>) {
        while app.session.is_streaming() {
            let ev = rx.recv().await.unwrap();
            app.handle_event(ev);
        }
    }

    /// Like `settle`, but also waits out tool runs.
    async fn settle_tools(app: &mut App, rx: &mut UnboundedReceiver<AppEvent>) {
        while app.session.is_streaming() || app.session.phase() == Phase::Executing {
            let ev = rx.recv().await.unwrap();
            app.handle_event(ev);
        }
    }

    fn shell_call(id: &str, command: &str) -> Step {
        Step::Event(StreamEvent::ToolCall(ToolCall {
            id: id.into(),
            name: "exec_shell".into(),
            arguments: serde_json::json!({ "command": command }).to_string(),
        }))
    }

    #[tokio::test]
    async fn history_navigation() {
        let (mut app, mut rx) = app(vec![chunks(&["ok"])]);
        type_text(&mut app, "abc");
        app.handle_key(ctrl('j'));
        assert!(app.input.is_empty());
        settle(&mut app, &mut rx).await;

        type_text(&mut app, "de");
        app.handle_key(alt('p'));
        assert_eq!(app.input.text(), "abc");
        app.handle_key(alt('n'));
        assert_eq!(app.input.text(), "de");

        app.handle_key(alt('p'));
        assert_eq!(app.input.text(), "abc");
        app.handle_key(alt('p'));
        assert_eq!(app.input.text(), "abc");

        app.handle_key(key(KeyCode::Char('x')));
        assert_eq!(app.input.text(), "abcx");
        app.handle_key(alt('n'));
        assert_eq!(app.input.text(), "abcx");
    }

    #[tokio::test]
    async fn ctrl_c_interrupts_then_quits() {
        let (mut app, mut rx) = app(vec![vec![Step::Hang]]);
        type_text(&mut app, "hi");
        app.handle_key(ctrl('j'));
        assert_eq!(app.handle_key(ctrl('c')), KeyOutcome::Continue);
        assert_eq!(app.session.phase(), Phase::Cancelling);
        settle(&mut app, &mut rx).await;
        assert_eq!(app.toast.as_ref().map(|t| t.text.as_str()), Some("Interrupted"));
        assert_eq!(app.handle_key(ctrl('c')), KeyOutcome::Quit);
    }

    #[tokio::test]
    async fn submit_is_ignored_while_streaming() {
        let (mut app, mut rx) = app(vec![vec![Step::Hang]]);
        type_text(&mut app, "one");
        app.handle_key(ctrl('j'));
        type_text(&mut app, "two");
        app.handle_key(ctrl('j'));
        assert_eq!(app.input.text(), "two");
        app.handle_key(ctrl('c'));
        settle(&mut app, &mut rx).await;
    }

    #[tokio::test]
    async fn tab_toggles_focus_and_alt_t_cycles_effort() {
        let (mut app, _rx) = app(Vec::new());
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.focus, Focus::Viewport);
        app.handle_key(key(KeyCode::Tab));
        assert_eq!(app.focus, Focus::Input);
        app.handle_key(alt('t'));
        assert_eq!(app.session.config().reasoning_effort.as_str(), "low");
        assert!(app.toast.is_some());
    }

    #[tokio::test]
    async fn transcript_shows_prompt_and_answer() {
        let (mut app, mut rx) = app(vec![chunks(&["hel", "lo"])]);
        type_text(&mut app, "hi");
        app.handle_key(ctrl('j'));
        settle(&mut app, &mut rx).await;

        let t = app.build_transcript(40);
        let text: Vec<String> = t
            .lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect();
        assert!(text.iter().any(|l| l.trim_end() == "  > hi"), "{text:?}");
        assert!(text.iter().any(|l| l.trim_end() == "  hello"), "{text:?}");
        assert_eq!(t.blocks.len(), 2);
    }

    #[tokio::test]
    async fn block_navigation_marks_selection() {
        let (mut app, mut rx) = app(vec![chunks(&["text\n```sh\nls\n```\n"])]);
        type_text(&mut app, "q");
        app.handle_key(ctrl('j'));
        settle(&mut app, &mut rx).await;

        app.handle_key(key(KeyCode::Tab));
        app.handle_key(alt('['));
        assert_eq!(app.selection, Some((1, 1)));
        assert_eq!(app.selected_text().as_deref(), Some("ls"));
        app.handle_key(alt('['));
        assert_eq!(app.selection, Some((1, 0)));
        app.handle_key(alt('{'));
        assert_eq!(app.selection, Some((0, 0)));
        app.handle_key(alt('}'));
        assert_eq!(app.selection, Some((1, 0)));
        assert!(!app.follow);

        let t = app.build_transcript(40);
        let marked = t
            .lines
            .iter()
            .filter(|l| l.spans[0].content.starts_with(theme::GUTTER_MARK))
            .count();
        let rows = t.blocks.iter().find(|b| (b.message, b.block) == (1, 0)).unwrap();
        assert_eq!(marked, rows.end - rows.start);

        assert!(matches!(app.handle_key(ctrl('o')), KeyOutcome::OpenEditor(s) if s.starts_with("text")));
        app.handle_key(alt('>'));
        assert!(app.follow);
    }

    #[tokio::test]
    async fn scrolling_and_follow() {
        let long: String = (0..50).map(|i| format!("line {i}\n\n")).collect();
        let (mut app, mut rx) = app(vec![chunks(&[&long])]);
        type_text(&mut app, "q");
        app.handle_key(ctrl('j'));
        settle(&mut app, &mut rx).await;

        app.prepare(60, 30);
        let max = app.transcript.lines.len() - app.viewport_rows;
        assert_eq!(app.scroll, max);

        app.handle_key(key(KeyCode::Tab));
        app.handle_key(ctrl('p'));
        assert_eq!(app.scroll, max - SCROLL_STEP);
        assert!(!app.follow);
        app.handle_key(ctrl('n'));
        assert_eq!(app.scroll, max);
        assert!(app.follow);

        app.handle_key(alt('<'));
        app.prepare(60, 30);
        assert_eq!(app.scroll, 0);
    }

    #[tokio::test]
    async fn growing_input_shifts_scroll() {
        let long: String = (0..50).map(|i| format!("line {i}\n\n")).collect();
        let (mut app, mut rx) = app(vec![chunks(&[&long])]);
        type_text(&mut app, "q");
        app.handle_key(ctrl('j'));
        settle(&mut app, &mut rx).await;
        app.prepare(60, 30);
        app.scroll_up(10);
        let before = app.scroll;

        app.handle_key(key(KeyCode::Enter));
        app.handle_key(key(KeyCode::Enter));
        app.prepare(60, 30);
        assert_eq!(app.scroll, before + 2);
    }

    #[tokio::test]
    async fn confirm_dialog_owns_the_keyboard() {
        let (mut app, mut rx) = app_with(
            vec![
                vec![shell_call("t1", "printf one")],
                vec![shell_call("t2", "printf two")],
            ],
            ToolRegistry::builtin(),
        );
        type_text(&mut app, "go");
        app.handle_key(ctrl('j'));
        settle_tools(&mut app, &mut rx).await;
        assert_eq!(app.session.phase(), Phase::AwaitingConfirm);

        // Typing and submit keys do not reach the textarea.
        type_text(&mut app, "xyz");
        app.handle_key(ctrl('j'));
        app.handle_key(key(KeyCode::Backspace));
        assert_eq!(app.input.text(), "");
        assert_eq!(app.session.phase(), Phase::AwaitingConfirm);

        app.handle_key(key(KeyCode::Enter));
        assert_eq!(app.session.phase(), Phase::Executing);
        settle_tools(&mut app, &mut rx).await;
        assert_eq!(app.session.phase(), Phase::AwaitingConfirm);
        assert_eq!(app.session.confirm().unwrap().call.id, "t2");

        app.handle_key(key(KeyCode::Esc));
        assert_eq!(app.session.phase(), Phase::Idle);
        let last = app.session.messages().last().unwrap();
        assert_eq!(last.kind, Kind::ToolResult);
        assert_eq!(last.error.as_deref(), Some(crate::session::CANCELLED));
        assert!(
            app.session
                .messages()
                .iter()
                .any(|m| m.kind == Kind::ToolResult && m.content == "one")
        );
    }

    #[tokio::test]
    async fn confirm_accepts_letter_keys() {
        let (mut app, mut rx) = app_with(
            vec![
                vec![shell_call("t1", "true"), shell_call("t2", "true")],
                chunks(&["done"]),
            ],
            ToolRegistry::builtin(),
        );
        type_text(&mut app, "go");
        app.handle_key(ctrl('j'));
        settle_tools(&mut app, &mut rx).await;

        app.handle_key(key(KeyCode::Char('Y')));
        settle_tools(&mut app, &mut rx).await;
        assert_eq!(app.session.confirm().unwrap().call.id, "t2");
        app.handle_key(key(KeyCode::Char('n')));
        assert_eq!(app.session.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn ctrl_c_stops_a_running_tool() {
        let (mut app, mut rx) = app_with(
            vec![vec![shell_call("t1", "sleep 10")]],
            ToolRegistry::builtin(),
        );
        type_text(&mut app, "wait");
        app.handle_key(ctrl('j'));
        settle_tools(&mut app, &mut rx).await;
        app.handle_key(key(KeyCode::Char('y')));
        assert_eq!(app.session.phase(), Phase::Executing);

        assert_eq!(app.handle_key(ctrl('c')), KeyOutcome::Continue);
        settle_tools(&mut app, &mut rx).await;
        assert_eq!(app.session.phase(), Phase::Idle);
        assert_eq!(app.toast.as_ref().map(|t| t.text.as_str()), Some("Tool cancelled"));
    }

    #[tokio::test]
    async fn spinner_ticks_stay_under_the_render_ceiling() {
        let (mut app, mut rx) = app(vec![vec![Step::Hang]]);
        type_text(&mut app, "hi");
        app.handle_key(ctrl('j'));

        let t0 = Instant::now();
        app.last_redraw = Some(t0);
        app.dirty = false;
        app.on_tick(t0 + Duration::from_millis(30));
        assert_eq!(app.tick, 1);
        assert!(!app.dirty);

        app.on_tick(t0 + RENDER_INTERVAL);
        assert_eq!(app.tick, 2);
        assert!(app.dirty);

        app.dirty = false;
        app.on_tick(t0 + RENDER_INTERVAL + Duration::from_millis(10));
        assert!(!app.dirty);

        app.handle_key(ctrl('c'));
        settle(&mut app, &mut rx).await;
    }

    #[tokio::test]
    async fn session_redraws_are_timestamped() {
        let (mut app, mut rx) = app(vec![chunks(&["a", "b"])]);
        type_text(&mut app, "hi");
        app.handle_key(ctrl('j'));
        settle(&mut app, &mut rx).await;
        assert!(app.last_redraw.is_some());
    }

    #[test]
    fn toast_expires_on_tick() {
        let (mut app, _rx) = app(Vec::new());
        app.show_toast("Copied", false);
        let shown = app.toast.as_ref().unwrap().expires;
        app.on_tick(shown - Duration::from_millis(100));
        assert!(app.toast.is_some());
        app.on_tick(shown);
        assert!(app.toast.is_none());
    }

    #[test]
    fn wrap_line_splits_on_display_width() {
        let line = Line::from(vec![
            Span::raw("abcd"),
            Span::styled("efgh", theme::error()),
        ]);
        let rows = wrap_line(line, 3);
        let text: Vec<String> = rows
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect();
        assert_eq!(text, vec!["abc", "def", "gh"]);
        assert_eq!(rows[1].spans[1].style, theme::error());

        let wide = wrap_line(Line::from("你好世界"), 5);
        assert_eq!(wide.len(), 2);
        assert_eq!(wrap_line(Line::default(), 10).len(), 1);
    }
}
