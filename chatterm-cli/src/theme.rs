use ratatui::style::{Color, Modifier, Style};

// ── Ink: backgrounds ───────────────────────────────────────────────
pub const INK: Color = Color::Rgb(16, 18, 22);
pub const INK_BAR: Color = Color::Rgb(24, 27, 33);

// ── Slate: rules, borders, secondary labels ────────────────────────
pub const SLATE: Color = Color::Rgb(48, 54, 64);
pub const SLATE_LIGHT: Color = Color::Rgb(86, 94, 108);
pub const SLATE_TEXT: Color = Color::Rgb(104, 112, 126);

// ── Paper: foreground text ─────────────────────────────────────────
pub const PAPER_FAINT: Color = Color::Rgb(134, 142, 156);
pub const PAPER_SOFT: Color = Color::Rgb(192, 198, 208);
pub const PAPER: Color = Color::Rgb(226, 230, 236);

// ── Accents ────────────────────────────────────────────────────────
pub const AMBER: Color = Color::Rgb(226, 170, 84);
pub const TEAL: Color = Color::Rgb(96, 172, 164);
pub const BRICK: Color = Color::Rgb(214, 84, 76);

pub const PROMPT_CHAR: &str = ">";
pub const STATUS_SEP: &str = " · ";
pub const GUTTER_MARK: &str = "▌";
pub const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// syntect theme for fenced code.
pub const SYNTAX_THEME: &str = "base16-ocean.dark";

fn fg(color: Color) -> Style {
    Style::default().fg(color)
}

fn bold(color: Color) -> Style {
    fg(color).add_modifier(Modifier::BOLD)
}

// ── Transcript ─────────────────────────────────────────────────────

pub fn prompt() -> Style {
    bold(AMBER)
}

pub fn user_text() -> Style {
    fg(PAPER_SOFT)
}

pub fn assistant_text() -> Style {
    fg(PAPER)
}

/// Dimmed italics for model deliberation.
pub fn reasoning() -> Style {
    fg(PAPER_FAINT).add_modifier(Modifier::ITALIC)
}

pub fn system_message() -> Style {
    fg(SLATE_TEXT)
}

/// `⚙ name` / `↳ output` headers.
pub fn tool_label() -> Style {
    fg(TEAL)
}

pub fn error() -> Style {
    fg(BRICK)
}

pub fn selection() -> Style {
    fg(AMBER)
}

pub fn spinner() -> Style {
    fg(AMBER)
}

// ── Markdown ───────────────────────────────────────────────────────

pub fn code_content() -> Style {
    fg(PAPER_FAINT)
}

/// Frame glyphs around fenced code.
pub fn code_chrome() -> Style {
    fg(SLATE)
}

pub fn code_header() -> Style {
    fg(SLATE_LIGHT)
}

pub fn heading() -> Style {
    bold(TEAL)
}

pub fn inline_code() -> Style {
    fg(AMBER)
}

pub fn link() -> Style {
    fg(TEAL).add_modifier(Modifier::UNDERLINED)
}

pub fn quote() -> Style {
    reasoning()
}

// ── Chrome ─────────────────────────────────────────────────────────

pub fn app_title() -> Style {
    bold(AMBER)
}

pub fn chat_title() -> Style {
    fg(PAPER)
}

pub fn status_text() -> Style {
    fg(SLATE_LIGHT)
}

pub fn status_separator() -> Style {
    fg(SLATE)
}

pub fn bar_bg() -> Style {
    Style::default().bg(INK_BAR)
}

pub fn history_bg() -> Style {
    Style::default().bg(INK)
}

pub fn input_border(focused: bool) -> Style {
    fg(if focused { SLATE_LIGHT } else { SLATE })
}

pub fn confirm_border() -> Style {
    fg(AMBER)
}

pub fn help_key() -> Style {
    bold(PAPER_SOFT)
}

pub fn help_desc() -> Style {
    fg(SLATE_LIGHT)
}

pub fn toast() -> Style {
    fg(INK).bg(TEAL)
}

pub fn toast_error() -> Style {
    fg(PAPER).bg(BRICK)
}
