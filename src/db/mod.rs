pub mod models;

use models::{Chat, Document, Message, NewDocument, Role};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;

/// Title given to chats until the first question renames them.
pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

pub struct Database {
    conn: Mutex<Connection>,
}

fn chat_from_row(row: &Row<'_>) -> Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn document_from_row(row: &Row<'_>) -> Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        filename: row.get(2)?,
        file_type: row.get(3)?,
        file_size: row.get(4)?,
        chunk_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const CHAT_COLUMNS: &str = "id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at";
const DOCUMENT_COLUMNS: &str = "id, chat_id, filename, file_type, file_size, chunk_count, created_at";

impl Database {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).ok();
        let db_path = data_dir.join("rag-agent.db");
        log::info!("opening database at {}", db_path.display());
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, id);

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                chat_id INTEGER,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE SET NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Chats ──

    pub fn create_chat(&self, title: &str) -> Result<Chat> {
        let conn = self.conn.lock();
        conn.execute("INSERT INTO chats (title) VALUES (?1)", params![title])?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            params![id],
            chat_from_row,
        )
    }

    pub fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            params![id],
            chat_from_row,
        )
        .optional()
    }

    /// Most recently active first.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats ORDER BY updated_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], chat_from_row)?;
        rows.collect()
    }

    /// Returns `None` when the chat does not exist.
    pub fn rename_chat(&self, id: i64, title: &str) -> Result<Option<Chat>> {
        let conn = self.conn.lock();
        // Renaming to the current title leaves the chat's place in the list alone.
        conn.execute(
            "UPDATE chats SET title = ?1, updated_at = datetime('now') WHERE id = ?2 AND title <> ?1",
            params![title, id],
        )?;
        conn.query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            params![id],
            chat_from_row,
        )
        .optional()
    }

    /// Returns whether a chat was actually removed.
    pub fn delete_chat(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ── Messages ──

    pub fn add_message(&self, chat_id: i64, role: Role, content: &str) -> Result<Message> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (chat_id, role, content) VALUES (?1, ?2, ?3)",
            params![chat_id, role, content],
        )?;
        let id = conn.last_insert_rowid();
        // Touch chat updated_at
        conn.execute(
            "UPDATE chats SET updated_at = datetime('now') WHERE id = ?1",
            params![chat_id],
        )?;
        conn.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id],
            message_from_row,
        )
    }

    pub fn get_messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![chat_id], message_from_row)?;
        rows.collect()
    }

    /// The last `limit` messages of a chat, oldest first.
    pub fn recent_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![chat_id, limit as i64], message_from_row)?;
        let mut messages = rows.collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    // ── Documents ──

    pub fn insert_document(&self, doc: &NewDocument<'_>) -> Result<Document> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, chat_id, filename, file_type, file_size, chunk_count) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![doc.id, doc.chat_id, doc.filename, doc.file_type, doc.file_size, doc.chunk_count],
        )?;
        conn.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![doc.id],
            document_from_row,
        )
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map([], document_from_row)?;
        rows.collect()
    }

    /// Forget every document record; used when the vector index is recreated.
    pub fn clear_documents(&self) -> Result<usize> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM documents", [])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chat_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat(DEFAULT_CHAT_TITLE).unwrap();
        assert_eq!(chat.title, DEFAULT_CHAT_TITLE);
        assert_eq!(db.list_chats().unwrap(), vec![chat.clone()]);

        let renamed = db.rename_chat(chat.id, "Rust notes").unwrap().unwrap();
        assert_eq!(renamed.title, "Rust notes");
        assert_eq!(db.get_chat(chat.id).unwrap().unwrap().title, "Rust notes");

        assert!(db.delete_chat(chat.id).unwrap());
        assert!(!db.delete_chat(chat.id).unwrap());
        assert!(db.list_chats().unwrap().is_empty());
    }

    #[test]
    fn test_rename_missing_chat() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.rename_chat(42, "nothing").unwrap(), None);
    }

    #[test]
    fn test_rename_to_same_title_keeps_order() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_chat("alpha").unwrap();
        let b = db.create_chat("beta").unwrap();
        {
            let conn = db.conn.lock();
            conn.execute(
                "UPDATE chats SET updated_at = '2000-01-01 00:00:00' WHERE id = ?1",
                params![a.id],
            )
            .unwrap();
            conn.execute(
                "UPDATE chats SET updated_at = '2000-01-02 00:00:00' WHERE id = ?1",
                params![b.id],
            )
            .unwrap();
        }

        let same = db.rename_chat(a.id, "alpha").unwrap().unwrap();
        assert_eq!(same.title, "alpha");
        assert_eq!(same.updated_at, "2000-01-01 00:00:00");
        let order: Vec<i64> = db.list_chats().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![b.id, a.id]);

        db.rename_chat(a.id, "gamma").unwrap().unwrap();
        let order: Vec<i64> = db.list_chats().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![a.id, b.id]);
    }

    #[test]
    fn test_messages_in_insertion_order_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat("c").unwrap();
        db.add_message(chat.id, Role::User, "first").unwrap();
        db.add_message(chat.id, Role::Assistant, "second").unwrap();
        db.add_message(chat.id, Role::User, "third").unwrap();

        let all: Vec<String> = db
            .get_messages(chat.id)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(all, vec!["first", "second", "third"]);

        let recent = db.recent_messages(chat.id, 2).unwrap();
        assert_eq!(recent[0].content, "second");
        assert_eq!(recent[1].role, Role::User);

        db.delete_chat(chat.id).unwrap();
        assert!(db.get_messages(chat.id).unwrap().is_empty());
    }

    #[test]
    fn test_message_requires_existing_chat() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.add_message(999, Role::User, "orphan").is_err());
    }

    #[test]
    fn test_documents_survive_chat_deletion() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat("c").unwrap();
        db.insert_document(&NewDocument {
            id: "doc-1",
            chat_id: Some(chat.id),
            filename: "a.txt",
            file_type: "txt",
            file_size: 12,
            chunk_count: 1,
        })
        .unwrap();

        db.delete_chat(chat.id).unwrap();
        let docs = db.list_documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].chat_id, None);

        assert_eq!(db.clear_documents().unwrap(), 1);
        assert!(db.list_documents().unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.create_chat("kept").unwrap();
        }
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.list_chats().unwrap()[0].title, "kept");
    }
}
