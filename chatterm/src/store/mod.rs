//! Chat persistence contract.
//!
//! The session only talks to [`ChatStore`]; the SQLite implementation lives
//! behind the `sqlite-store` feature.

#[cfg(feature = "sqlite-store")]
mod sqlite;

#[cfg(feature = "sqlite-store")]
pub use sqlite::Store;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::chat::Chat;

pub const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chat not found: {0}")]
    NotFound(String),
    #[cfg(feature = "sqlite-store")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt chat record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid page token")]
    InvalidPageToken,
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fields an update may touch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Title,
    Messages,
    Files,
    Tags,
    Favorite,
}

/// Mask used by the session for every turn after the first.
pub const TURN_MASK: &[Field] = &[Field::Messages, Field::Files, Field::Tags];

#[derive(Clone, Debug, Default)]
pub struct ChatFilter {
    pub favorite: Option<bool>,
    pub tag: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChatOrder {
    #[default]
    UpdatedDesc,
    UpdatedAsc,
    CreatedDesc,
}

#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    pub filter: ChatFilter,
    pub order: ChatOrder,
    /// Zero means [`DEFAULT_PAGE_SIZE`].
    pub page_size: usize,
    pub page_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct SearchRequest {
    pub query: String,
    pub page_size: usize,
    pub page_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Page {
    pub chats: Vec<Chat>,
    pub next_page_token: Option<String>,
}

pub trait ChatStore: Send + Sync {
    fn get_chat(&self, id: &str) -> Result<Chat, StoreError>;
    fn list_chats(&self, req: &ListRequest) -> Result<Page, StoreError>;
    fn search_chats(&self, req: &SearchRequest) -> Result<Page, StoreError>;
    /// Stamps missing timestamps, canonicalizes sets and inserts the record.
    fn create_chat(&self, chat: Chat) -> Result<Chat, StoreError>;
    /// Copies the masked fields of `chat` onto the stored record and refreshes `updated_at`.
    fn update_chat(&self, chat: &Chat, mask: &[Field]) -> Result<Chat, StoreError>;
    /// Soft delete.
    fn delete_chat(&self, id: &str) -> Result<(), StoreError>;

    /// Most recently updated chat, if any.
    fn latest_chat(&self) -> Result<Option<Chat>, StoreError> {
        let page = self.list_chats(&ListRequest {
            page_size: 1,
            ..Default::default()
        })?;
        Ok(page.chats.into_iter().next())
    }
}

pub(crate) fn effective_page_size(size: usize) -> usize {
    if size == 0 { DEFAULT_PAGE_SIZE } else { size }
}

pub(crate) fn encode_page_token(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("offset:{offset}"))
}

pub(crate) fn decode_page_token(token: Option<&str>) -> Result<usize, StoreError> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Ok(0);
    };
    let raw = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| StoreError::InvalidPageToken)?;
    let text = String::from_utf8(raw).map_err(|_| StoreError::InvalidPageToken)?;
    text.strip_prefix("offset:")
        .and_then(|n| n.parse().ok())
        .ok_or(StoreError::InvalidPageToken)
}
