use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use tracing::debug;

use super::{
    ChatOrder, ChatStore, Field, ListRequest, Page, SearchRequest, StoreError, decode_page_token,
    effective_page_size, encode_page_token,
};
use crate::chat::{Chat, now_micros};

/// SQLite-backed chat store.
/// Single `Mutex<Connection>` serializes all access; every write is one transaction.
pub struct Store {
    conn: Mutex<Connection>,
}

// ─── Schema ───

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id                 TEXT PRIMARY KEY,
    title              TEXT,
    created_at         INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL,
    messages           TEXT NOT NULL DEFAULT '[]',
    files              TEXT NOT NULL DEFAULT '[]',
    tags               TEXT NOT NULL DEFAULT '[]',
    favorite           INTEGER NOT NULL DEFAULT 0,
    deleted_at         INTEGER,
    searchable_content TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS chats_updated_at ON chats (updated_at);
CREATE INDEX IF NOT EXISTS chats_created_at ON chats (created_at);

CREATE VIRTUAL TABLE IF NOT EXISTS chats_fts USING fts5 (
    id UNINDEXED,
    searchable_content
);
";

const COLUMNS: &str =
    "c.id, c.title, c.created_at, c.updated_at, c.messages, c.files, c.tags, c.favorite, c.deleted_at";

fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA cache_size = -2000;",
    )
}

/// Columns as read from a row, before the JSON fields are decoded.
struct ChatRow {
    id: String,
    title: Option<String>,
    created_at: i64,
    updated_at: i64,
    messages: String,
    files: String,
    tags: String,
    favorite: bool,
    deleted_at: Option<i64>,
}

impl ChatRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            messages: row.get(4)?,
            files: row.get(5)?,
            tags: row.get(6)?,
            favorite: row.get(7)?,
            deleted_at: row.get(8)?,
        })
    }

    fn into_chat(self) -> Result<Chat, StoreError> {
        Ok(Chat {
            id: self.id,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
            messages: serde_json::from_str(&self.messages)?,
            files: serde_json::from_str(&self.files)?,
            tags: serde_json::from_str(&self.tags)?,
            favorite: self.favorite,
            deleted_at: self.deleted_at,
        })
    }
}

fn order_clause(order: ChatOrder) -> &'static str {
    match order {
        ChatOrder::UpdatedDesc => "c.updated_at DESC, c.id",
        ChatOrder::UpdatedAsc => "c.updated_at ASC, c.id",
        ChatOrder::CreatedDesc => "c.created_at DESC, c.id",
    }
}

/// Trim a `limit + 1` fetch down to a page and mint the next token.
fn paginate(mut chats: Vec<Chat>, offset: usize, size: usize) -> Page {
    let next_page_token = if chats.len() > size {
        chats.truncate(size);
        Some(encode_page_token(offset + size))
    } else {
        None
    };
    Page {
        chats,
        next_page_token,
    }
}

fn load_live(tx: &Transaction<'_>, id: &str) -> Result<Chat, StoreError> {
    let row = tx
        .query_row(
            &format!("SELECT {COLUMNS} FROM chats c WHERE c.id = ?1 AND c.deleted_at IS NULL"),
            params![id],
            ChatRow::from_row,
        )
        .optional()?;
    match row {
        Some(row) => row.into_chat(),
        None => Err(StoreError::NotFound(id.to_string())),
    }
}

fn reindex(tx: &Transaction<'_>, chat: &Chat, content: &str) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM chats_fts WHERE id = ?1", params![chat.id])?;
    tx.execute(
        "INSERT INTO chats_fts (id, searchable_content) VALUES (?1, ?2)",
        params![chat.id, content],
    )?;
    Ok(())
}

impl Store {
    /// Open (or create) a SQLite database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (for tests).
    pub fn memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_chats(&self, sql: &str, args: Vec<Value>) -> Result<Vec<Chat>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), ChatRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ChatRow::into_chat).collect()
    }
}

impl ChatStore for Store {
    fn get_chat(&self, id: &str) -> Result<Chat, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let chat = load_live(&tx, id)?;
        tx.commit()?;
        Ok(chat)
    }

    fn list_chats(&self, req: &ListRequest) -> Result<Page, StoreError> {
        let offset = decode_page_token(req.page_token.as_deref())?;
        let size = effective_page_size(req.page_size);

        let mut sql = format!("SELECT {COLUMNS} FROM chats c WHERE c.deleted_at IS NULL");
        let mut args: Vec<Value> = Vec::new();
        if let Some(fav) = req.filter.favorite {
            args.push(Value::Integer(fav as i64));
            sql.push_str(&format!(" AND c.favorite = ?{}", args.len()));
        }
        if let Some(tag) = &req.filter.tag {
            args.push(Value::Text(tag.clone()));
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM json_each(c.tags) WHERE json_each.value = ?{})",
                args.len()
            ));
        }
        args.push(Value::Integer(size as i64 + 1));
        let limit_idx = args.len();
        args.push(Value::Integer(offset as i64));
        let offset_idx = args.len();
        sql.push_str(&format!(
            " ORDER BY {} LIMIT ?{limit_idx} OFFSET ?{offset_idx}",
            order_clause(req.order)
        ));

        let chats = self.query_chats(&sql, args)?;
        Ok(paginate(chats, offset, size))
    }

    fn search_chats(&self, req: &SearchRequest) -> Result<Page, StoreError> {
        let offset = decode_page_token(req.page_token.as_deref())?;
        let size = effective_page_size(req.page_size);
        let sql = format!(
            "SELECT {COLUMNS} FROM chats c
             JOIN (SELECT id, rank FROM chats_fts WHERE chats_fts MATCH ?1) m ON m.id = c.id
             WHERE c.deleted_at IS NULL
             ORDER BY m.rank, c.updated_at DESC
             LIMIT ?2 OFFSET ?3"
        );
        let args = vec![
            Value::Text(req.query.clone()),
            Value::Integer(size as i64 + 1),
            Value::Integer(offset as i64),
        ];
        let chats = self.query_chats(&sql, args)?;
        Ok(paginate(chats, offset, size))
    }

    fn create_chat(&self, mut chat: Chat) -> Result<Chat, StoreError> {
        let now = now_micros();
        if chat.created_at == 0 {
            chat.created_at = now;
        }
        chat.updated_at = chat.updated_at.max(chat.created_at).max(now);
        chat.deleted_at = None;
        chat.canonicalize();

        let content = chat.searchable_content();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO chats (id, title, created_at, updated_at, messages, files, tags, favorite, searchable_content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chat.id,
                chat.title,
                chat.created_at,
                chat.updated_at,
                serde_json::to_string(&chat.messages)?,
                serde_json::to_string(&chat.files)?,
                serde_json::to_string(&chat.tags)?,
                chat.favorite,
                content,
            ],
        )?;
        reindex(&tx, &chat, &content)?;
        tx.commit()?;
        debug!(id = %chat.id, messages = chat.messages.len(), "created chat");
        Ok(chat)
    }

    fn update_chat(&self, chat: &Chat, mask: &[Field]) -> Result<Chat, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut stored = load_live(&tx, &chat.id)?;
        for field in mask {
            match field {
                Field::Title => stored.title = chat.title.clone(),
                Field::Messages => stored.messages = chat.messages.clone(),
                Field::Files => stored.files = chat.files.clone(),
                Field::Tags => stored.tags = chat.tags.clone(),
                Field::Favorite => stored.favorite = chat.favorite,
            }
        }
        stored.updated_at = now_micros().max(stored.updated_at);
        stored.canonicalize();

        let content = stored.searchable_content();
        tx.execute(
            "UPDATE chats SET title = ?2, updated_at = ?3, messages = ?4, files = ?5, tags = ?6,
                              favorite = ?7, searchable_content = ?8
             WHERE id = ?1",
            params![
                stored.id,
                stored.title,
                stored.updated_at,
                serde_json::to_string(&stored.messages)?,
                serde_json::to_string(&stored.files)?,
                serde_json::to_string(&stored.tags)?,
                stored.favorite,
                content,
            ],
        )?;
        reindex(&tx, &stored, &content)?;
        tx.commit()?;
        debug!(id = %stored.id, ?mask, "updated chat");
        Ok(stored)
    }

    fn delete_chat(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE chats SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id, now_micros()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        tx.execute("DELETE FROM chats_fts WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }
}
