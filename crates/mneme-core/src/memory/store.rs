//! ============================================================================
//! Message Store - Durable SQLite-backed conversation history
//! ============================================================================
//! The store is the source of truth for all messages and their embeddings.
//! The vector index is derived state: dropping the snapshot and re-adding
//! embeddings in slot order reproduces it exactly.
//!
//! Writes go through a single connection guarded by a mutex, which matches
//! the append path's requirement that inserts are serialized system-wide.
//! ============================================================================

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::types::{MemoryError, MessageRecord, Role};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    slot      INTEGER NOT NULL UNIQUE,
    content   TEXT    NOT NULL,
    author    TEXT    NOT NULL,
    role      TEXT    NOT NULL,
    timestamp INTEGER NOT NULL,
    embedding BLOB    NOT NULL
);
";

/// Durable store of conversation messages
pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, MemoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened message store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database, used by tests and ephemeral sessions
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a message and return its assigned id
    pub fn insert(&self, record: &MessageRecord) -> Result<i64, MemoryError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (slot, content, author, role, timestamp, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.slot as i64,
                record.content,
                record.author,
                record.role.as_str(),
                record.timestamp,
                encode_embedding(&record.embedding),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Fetch the message whose vector lives at `slot`, embedding included
    pub fn get_by_slot(&self, slot: u64) -> Result<Option<MessageRecord>, MemoryError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT id, slot, content, author, role, timestamp, embedding
                 FROM messages WHERE slot = ?1",
                params![slot as i64],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// The most recent `limit` messages across all users, oldest first.
    /// Embeddings are not loaded.
    pub fn recent(&self, limit: usize) -> Result<Vec<MessageRecord>, MemoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, slot, content, author, role, timestamp
             FROM messages ORDER BY id DESC LIMIT ?1",
        )?;
        let mut records = stmt
            .query_map(params![limit as i64], row_to_record_without_embedding)?
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }

    /// All messages in storage order, embeddings omitted
    pub fn all(&self) -> Result<Vec<MessageRecord>, MemoryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, slot, content, author, role, timestamp
             FROM messages ORDER BY id ASC",
        )?;
        let records = stmt
            .query_map([], row_to_record_without_embedding)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<u64, MemoryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn count_by_role(&self, role: Role) -> Result<u64, MemoryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE role = ?1",
            params![role.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every stored embedding in slot order, for index rebuilds
    pub fn embeddings_in_slot_order(&self) -> Result<Vec<(u64, Vec<f32>)>, MemoryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT slot, embedding FROM messages ORDER BY slot ASC")?;
        let rows = stmt
            .query_map([], |row| {
                let slot: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((slot as u64, decode_embedding(&blob)))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let slot: i64 = row.get(1)?;
    let role_str: String = row.get(4)?;
    let blob: Vec<u8> = row.get(6)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        slot: slot as u64,
        content: row.get(2)?,
        author: row.get(3)?,
        role: parse_role(4, &role_str)?,
        timestamp: row.get(5)?,
        embedding: decode_embedding(&blob),
    })
}

fn row_to_record_without_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let slot: i64 = row.get(1)?;
    let role_str: String = row.get(4)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        slot: slot as u64,
        content: row.get(2)?,
        author: row.get(3)?,
        role: parse_role(4, &role_str)?,
        timestamp: row.get(5)?,
        embedding: Vec::new(),
    })
}

fn parse_role(column: usize, value: &str) -> rusqlite::Result<Role> {
    Role::from_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, e.into())
    })
}

/// Embeddings are stored as little-endian f32 blobs
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(slot: u64, content: &str, author: &str, role: Role) -> MessageRecord {
        let mut record = MessageRecord::new(content.to_string(), author.to_string(), role)
            .with_embedding(vec![slot as f32, 1.0])
            .with_timestamp(1_700_000_000 + slot as i64);
        record.slot = slot;
        record
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let store = MessageStore::open_in_memory().unwrap();
        let id = store.insert(&sample(0, "hello", "alice", Role::User)).unwrap();
        assert!(id > 0);

        let loaded = store.get_by_slot(0).unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.slot, 0);
        assert_eq!(loaded.content, "hello");
        assert_eq!(loaded.author, "alice");
        assert_eq!(loaded.role, Role::User);
        assert_eq!(loaded.embedding, vec![0.0, 1.0]);

        assert!(store.get_by_slot(99).unwrap().is_none());
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.db");

        {
            let store = MessageStore::open(&path).unwrap();
            store.insert(&sample(0, "persist me", "alice", Role::User)).unwrap();
        }

        let store = MessageStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get_by_slot(0).unwrap().unwrap().content, "persist me");
    }

    #[test]
    fn test_recent_returns_oldest_first() {
        let store = MessageStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .insert(&sample(i, &format!("msg {}", i), "alice", Role::User))
                .unwrap();
        }

        let recent = store.recent(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");
    }

    #[test]
    fn test_counts_by_role() {
        let store = MessageStore::open_in_memory().unwrap();
        store.insert(&sample(0, "hi", "alice", Role::User)).unwrap();
        store.insert(&sample(1, "hello!", "mneme", Role::Bot)).unwrap();
        store.insert(&sample(2, "how are you?", "alice", Role::User)).unwrap();

        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(store.count_by_role(Role::User).unwrap(), 2);
        assert_eq!(store.count_by_role(Role::Bot).unwrap(), 1);
    }

    #[test]
    fn test_embeddings_come_back_in_slot_order() {
        let store = MessageStore::open_in_memory().unwrap();
        // Insert out of slot order; the scan must still be ordered
        store.insert(&sample(1, "second", "alice", Role::User)).unwrap();
        store.insert(&sample(0, "first", "alice", Role::User)).unwrap();

        let rows = store.embeddings_in_slot_order().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 0);
        assert_eq!(rows[1].0, 1);
        assert_eq!(rows[0].1, vec![0.0, 1.0]);
        assert_eq!(rows[1].1, vec![1.0, 1.0]);
    }
}
