use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};
use chatterm_core::generator::StopReason;
use unicode_width::UnicodeWidthStr;

use crate::app::{App, Focus, wrap_line};
use crate::session::Phase;
use crate::theme;

/// Inner rows of the confirm dialog are capped so the transcript stays visible.
const CONFIRM_MAX_HEIGHT: u16 = 12;
/// Columns taken by the "> " / "  " prefix in the textarea.
const INPUT_PREFIX: usize = 2;

/// Row budget of each screen region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heights {
    pub title: u16,
    pub viewport: u16,
    pub bottom: u16,
    pub status: u16,
}

pub fn heights(app: &App, width: u16, height: u16) -> Heights {
    let title = title_rows(app, width as usize).len().max(1) as u16;
    let bottom = match app.session.phase() {
        Phase::AwaitingConfirm => confirm_height(app, width),
        _ => app
            .input
            .height((width as usize).saturating_sub(INPUT_PREFIX).max(1)),
    };
    let status = 1;
    Heights {
        title,
        viewport: height.saturating_sub(title + bottom + status),
        bottom,
        status,
    }
}

pub fn draw(frame: &mut Frame, app: &App) {
    frame.render_widget(Block::default().style(theme::history_bg()), frame.area());

    let area = frame.area();
    let h = heights(app, area.width, area.height);
    let chunks = Layout::vertical([
        Constraint::Length(h.title),
        Constraint::Min(0),
        Constraint::Length(h.bottom),
        Constraint::Length(h.status),
    ])
    .split(area);

    draw_title(frame, app, chunks[0]);
    draw_transcript(frame, app, chunks[1]);
    if app.session.phase() == Phase::AwaitingConfirm {
        draw_confirm(frame, app, chunks[2]);
    } else {
        draw_input(frame, app, chunks[2]);
    }
    draw_status(frame, app, chunks[3]);
}

// ─── Title ──────────────────────────────────────────────────────────

fn title_rows(app: &App, width: usize) -> Vec<Line<'static>> {
    let session = &app.session;
    let sep = || Span::styled(theme::STATUS_SEP, theme::status_separator());
    let mut spans = vec![
        Span::styled(" chatterm", theme::app_title()),
        sep(),
        Span::styled(session.chat().display_title().to_string(), theme::chat_title()),
        sep(),
        Span::styled(session.config().model.clone(), theme::status_text()),
        sep(),
        Span::styled(
            format!("think {}", session.config().reasoning_effort.as_str()),
            theme::status_text(),
        ),
    ];
    let usage = session.usage_total();
    if !usage.is_empty() {
        let mut text = format!(
            "{} in · {} out",
            format_tokens(usage.quantity("input")),
            format_tokens(usage.quantity("output")),
        );
        let price = usage.total_price();
        if price > 0.0 {
            text.push_str(&format!(" · ${price:.4}"));
        }
        let last = session.usage_last();
        if !last.is_empty() {
            text.push_str(&format!(" (last {})", format_tokens(last.quantity("output"))));
        }
        spans.push(sep());
        spans.push(Span::styled(text, theme::status_text()));
    }
    if let Some(note) = session.stop_reason().and_then(stop_note) {
        spans.push(sep());
        spans.push(Span::styled(note, theme::toast_error()));
    }
    wrap_line(Line::from(spans), width.max(1))
}

fn draw_title(frame: &mut Frame, app: &App, area: Rect) {
    let bar = Paragraph::new(title_rows(app, area.width as usize)).style(theme::bar_bg());
    frame.render_widget(bar, area);
}

/// Stop reasons worth surfacing; normal ends are not.
fn stop_note(reason: &StopReason) -> Option<&'static str> {
    match reason {
        StopReason::MaxTokens => Some("truncated"),
        StopReason::ContentFilter => Some("filtered"),
        _ => None,
    }
}

pub fn format_tokens(n: i32) -> String {
    let n = n.max(0) as f64;
    if n >= 1_000_000.0 {
        format!("{:.1}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.1}k", n / 1_000.0)
    } else {
        format!("{n}")
    }
}

// ─── Transcript ─────────────────────────────────────────────────────

fn draw_transcript(frame: &mut Frame, app: &App, area: Rect) {
    let lines = &app.transcript.lines;
    let start = app.scroll.min(lines.len());
    let end = (start + area.height as usize).min(lines.len());
    let view = Paragraph::new(lines[start..end].to_vec()).style(theme::history_bg());
    frame.render_widget(view, area);
}

// ─── Input ──────────────────────────────────────────────────────────

fn draw_input(frame: &mut Frame, app: &App, area: Rect) {
    let focused = app.focus == Focus::Input;
    let width = (area.width as usize).saturating_sub(INPUT_PREFIX).max(1);
    let mut rows: Vec<Line> = Vec::new();
    for (i, text) in app.input.text().split('\n').enumerate() {
        let line = Line::from(Span::styled(text.to_string(), theme::user_text()));
        for (j, mut row) in wrap_line(line, width).into_iter().enumerate() {
            let prefix = if i == 0 && j == 0 {
                Span::styled(format!("{} ", theme::PROMPT_CHAR), theme::prompt())
            } else {
                Span::raw(" ".repeat(INPUT_PREFIX))
            };
            row.spans.insert(0, prefix);
            rows.push(row);
        }
    }

    let (cursor_row, cursor_col) = cursor_position(app.input.text(), app.input.cursor(), width);
    let inner = area.height.saturating_sub(2) as usize;
    let offset = cursor_row.saturating_sub(inner.saturating_sub(1));

    let input = Paragraph::new(rows).scroll((offset as u16, 0)).block(
        Block::default()
            .borders(Borders::TOP | Borders::BOTTOM)
            .border_style(theme::input_border(focused)),
    );
    frame.render_widget(input, area);

    if focused {
        let x = area.x + (INPUT_PREFIX + cursor_col) as u16;
        let y = area.y + 1 + (cursor_row - offset) as u16;
        frame.set_cursor_position((x.min(area.right().saturating_sub(1)), y));
    }
}

/// Visual `(row, col)` of byte offset `cursor` when each line wraps at `width`.
fn cursor_position(text: &str, cursor: usize, width: usize) -> (usize, usize) {
    let before = &text[..cursor];
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut row: usize = text[..line_start.saturating_sub(1)]
        .split('\n')
        .take(before.matches('\n').count())
        .map(|line| crate::input::wrapped_rows(line, width))
        .sum();
    let col = UnicodeWidthStr::width(&text[line_start..cursor]);
    row += col / width;
    (row, col % width)
}

// ─── Confirm dialog ─────────────────────────────────────────────────

fn confirm_rows(app: &App, width: u16) -> Vec<Line<'static>> {
    let Some(confirm) = app.session.confirm() else {
        return Vec::new();
    };
    let inner = (width as usize).saturating_sub(4).max(1);
    let mut rows = Vec::new();
    for text in confirm.summary.split('\n') {
        let line = Line::from(Span::styled(text.to_string(), theme::code_content()));
        rows.extend(wrap_line(line, inner));
    }
    rows.push(Line::default());
    rows.push(Line::from(vec![
        Span::styled("y/Enter", theme::help_key()),
        Span::styled(" approve  ", theme::help_desc()),
        Span::styled("n/Esc", theme::help_key()),
        Span::styled(" reject", theme::help_desc()),
    ]));
    rows
}

fn confirm_height(app: &App, width: u16) -> u16 {
    let rows = confirm_rows(app, width).len().min(u16::MAX as usize) as u16;
    rows.saturating_add(2).clamp(4, CONFIRM_MAX_HEIGHT)
}

fn draw_confirm(frame: &mut Frame, app: &App, area: Rect) {
    let name = app
        .session
        .confirm()
        .map(|c| c.call.name.clone())
        .unwrap_or_default();
    let rows = confirm_rows(app, area.width);
    // Keep the key hint visible when the summary is clipped.
    let inner = area.height.saturating_sub(2) as usize;
    let skip = rows.len().saturating_sub(inner);
    let dialog = Paragraph::new(rows).scroll((skip as u16, 0)).block(
        Block::bordered()
            .border_style(theme::confirm_border())
            .title(Span::styled(format!(" Run {name}? "), theme::confirm_border())),
    );
    frame.render_widget(Clear, area);
    frame.render_widget(dialog, area);
}

// ─── Status ─────────────────────────────────────────────────────────

fn draw_status(frame: &mut Frame, app: &App, area: Rect) {
    let line = match &app.toast {
        Some(toast) => {
            let style = if toast.error {
                theme::toast_error()
            } else {
                theme::toast()
            };
            Line::from(Span::styled(format!(" {}", toast.text), style))
        }
        None => hints(app),
    };
    frame.render_widget(Paragraph::new(line).style(theme::bar_bg()), area);
}

fn hints(app: &App) -> Line<'static> {
    let pairs: &[(&str, &str)] = match (app.session.phase(), app.focus) {
        (Phase::Streaming | Phase::Executing, _) => &[("^C", "cancel"), ("Tab", "focus")],
        (Phase::AwaitingConfirm, _) => &[("y", "approve"), ("n", "reject"), ("^C", "quit")],
        (_, Focus::Input) => &[
            ("^J", "send"),
            ("M-p/M-n", "history"),
            ("M-t", "think"),
            ("Tab", "focus"),
            ("^C", "quit"),
        ],
        (_, Focus::Viewport) => &[
            ("M-{ M-}", "message"),
            ("M-[ M-]", "block"),
            ("^P/^N", "scroll"),
            ("M-w", "copy"),
            ("^O", "editor"),
            ("Tab", "focus"),
        ],
    };
    let mut spans = vec![Span::raw(" ")];
    for (key, desc) in pairs {
        spans.push(Span::styled(key.to_string(), theme::help_key()));
        spans.push(Span::styled(format!(" {desc}  "), theme::help_desc()));
    }
    Line::from(spans)
}
