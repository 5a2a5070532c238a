//! Best-effort chat title generation.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::chat::Message;
use crate::generator::{Generator, GeneratorError, RequestConfig};
use crate::store::{ChatStore, Field};

pub const TITLE_PROMPT: &str = "Generate a brief title for a conversation that starts with the \
following message. Use at most 6 words. Reply with the title only, no quotes or punctuation \
at the end.";

pub const TITLE_MAX_TOKENS: u32 = 50;

/// Trim whitespace, strip surrounding quotes, collapse newlines to spaces.
pub fn clean_title(raw: &str) -> String {
    let mut title = raw.trim();
    loop {
        let stripped = title
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .or_else(|| title.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')));
        match stripped {
            Some(inner) => title = inner.trim(),
            None => break,
        }
    }
    title
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone)]
pub struct SummaryGenerator {
    generator: Arc<dyn Generator>,
    model: String,
}

impl SummaryGenerator {
    pub fn new(generator: Arc<dyn Generator>, model: impl Into<String>) -> Self {
        Self {
            generator,
            model: model.into(),
        }
    }

    /// An empty summary model disables title generation.
    pub fn is_enabled(&self) -> bool {
        !self.model.trim().is_empty()
    }

    /// One unary call, no retry.
    pub async fn title(&self, seed: &str) -> Result<String, GeneratorError> {
        let messages = [Message::system(TITLE_PROMPT), Message::user(seed)];
        let config = RequestConfig {
            model: self.model.clone(),
            max_tokens: Some(TITLE_MAX_TOKENS),
            ..Default::default()
        };
        let reply = self.generator.generate(&messages, &config).await?;
        Ok(clean_title(&reply.content))
    }
}

/// Fire-and-forget: title the chat and write back the single `title` field.
/// Returns `None` when titles are disabled.
pub fn spawn_title_task(
    summary: SummaryGenerator,
    store: Arc<dyn ChatStore>,
    chat_id: String,
    seed: String,
) -> Option<JoinHandle<()>> {
    if !summary.is_enabled() {
        return None;
    }
    Some(tokio::spawn(async move {
        let title = match summary.title(&seed).await {
            Ok(t) if !t.is_empty() => t,
            Ok(_) => {
                tracing::debug!(chat = %chat_id, "title generator returned nothing");
                return;
            }
            Err(e) => {
                tracing::warn!(chat = %chat_id, error = %e, "title generation failed");
                return;
            }
        };
        let mut chat = match store.get_chat(&chat_id) {
            Ok(chat) => chat,
            Err(e) => {
                tracing::warn!(chat = %chat_id, error = %e, "title: chat lookup failed");
                return;
            }
        };
        chat.title = Some(title);
        match store.update_chat(&chat, &[Field::Title]) {
            Ok(_) => tracing::info!(chat = %chat_id, "chat titled"),
            Err(e) => tracing::warn!(chat = %chat_id, error = %e, "title: update failed"),
        }
    }))
}
