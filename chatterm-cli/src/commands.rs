//! Non-interactive subcommands over the chat store.

use std::io::Write;

use anyhow::Result;
use chatterm_core::chat::{Chat, Role};
use chatterm_core::store::{ChatFilter, ChatStore, Field, ListRequest, Page, SearchRequest};
use chrono::{Local, TimeZone};

fn format_time(micros: i64) -> String {
    Local
        .timestamp_micros(micros)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}

fn write_row(out: &mut impl Write, chat: &Chat) -> Result<()> {
    let star = if chat.favorite { "★" } else { " " };
    write!(
        out,
        "{}  {}  {} {}",
        chat.id,
        format_time(chat.updated_at),
        star,
        chat.display_title()
    )?;
    if !chat.tags.is_empty() {
        write!(out, "  [{}]", chat.tags.join(", "))?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_page(out: &mut impl Write, page: &Page) -> Result<()> {
    if page.chats.is_empty() {
        writeln!(out, "No chats.")?;
        return Ok(());
    }
    for chat in &page.chats {
        write_row(out, chat)?;
    }
    if let Some(token) = &page.next_page_token {
        writeln!(out, "\nMore: --page-token {token}")?;
    }
    Ok(())
}

/// `chatterm ls`
pub fn list(
    store: &dyn ChatStore,
    limit: usize,
    tag: Option<String>,
    favorites: bool,
    page_token: Option<String>,
    out: &mut impl Write,
) -> Result<()> {
    let page = store.list_chats(&ListRequest {
        filter: ChatFilter {
            favorite: favorites.then_some(true),
            tag,
        },
        page_size: limit,
        page_token,
        ..Default::default()
    })?;
    write_page(out, &page)
}

/// `chatterm search`
pub fn search(
    store: &dyn ChatStore,
    query: String,
    limit: usize,
    page_token: Option<String>,
    out: &mut impl Write,
) -> Result<()> {
    let page = store.search_chats(&SearchRequest {
        query,
        page_size: limit,
        page_token,
    })?;
    write_page(out, &page)
}

/// `chatterm show`: the transcript as plain text.
pub fn show(store: &dyn ChatStore, id: &str, out: &mut impl Write) -> Result<()> {
    let chat = store.get_chat(id)?;
    writeln!(out, "# {}", chat.display_title())?;
    writeln!(
        out,
        "{} · created {} · updated {}",
        chat.id,
        format_time(chat.created_at),
        format_time(chat.updated_at)
    )?;
    if !chat.tags.is_empty() {
        writeln!(out, "tags: {}", chat.tags.join(", "))?;
    }
    if !chat.files.is_empty() {
        writeln!(out, "files: {}", chat.files.join(", "))?;
    }
    for msg in &chat.messages {
        writeln!(out)?;
        match msg.role {
            Role::Tool => writeln!(
                out,
                "[tool {}]",
                msg.tool_call_id.as_deref().unwrap_or("?")
            )?,
            role => writeln!(out, "[{}]", role.as_str())?,
        }
        if let Some(reasoning) = msg.reasoning.as_deref().filter(|r| !r.is_empty()) {
            for line in reasoning.lines() {
                writeln!(out, "| {line}")?;
            }
        }
        if !msg.content.is_empty() {
            writeln!(out, "{}", msg.content.trim_end())?;
        }
        for call in &msg.tool_calls {
            writeln!(out, "-> {}({}) [{}]", call.name, call.arguments, call.id)?;
        }
        if let Some(err) = &msg.error {
            writeln!(out, "({err})")?;
        }
    }
    Ok(())
}

/// `chatterm rm`
pub fn remove(store: &dyn ChatStore, id: &str, out: &mut impl Write) -> Result<()> {
    store.delete_chat(id)?;
    tracing::info!(chat = %id, "chat deleted");
    writeln!(out, "Deleted {id}")?;
    Ok(())
}

/// `chatterm fav`
pub fn favorite(store: &dyn ChatStore, id: &str, on: bool, out: &mut impl Write) -> Result<()> {
    let mut chat = store.get_chat(id)?;
    chat.favorite = on;
    store.update_chat(&chat, &[Field::Favorite])?;
    let verb = if on { "Starred" } else { "Unstarred" };
    writeln!(out, "{verb} {id}")?;
    Ok(())
}

/// `chatterm tag`
pub fn tag(store: &dyn ChatStore, id: &str, tags: &[String], out: &mut impl Write) -> Result<()> {
    let mut chat = store.get_chat(id)?;
    chat.add_tags(tags);
    let saved = store.update_chat(&chat, &[Field::Tags])?;
    writeln!(out, "{id}: {}", saved.tags.join(", "))?;
    Ok(())
}
