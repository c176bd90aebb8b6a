use anyhow::{Context as _, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use tabrag_core::now_iso_utc;

pub const HISTORY_LIMIT: usize = 8;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS conversations (
        session_id TEXT NOT NULL,
        bot_id TEXT NOT NULL,
        ctx_json TEXT NOT NULL,
        history_json TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (session_id, bot_id)
    );
"#;

/// Conversation slots carried between turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slots {
    #[serde(rename = "carrera_id", default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
    #[serde(rename = "carrera_nombre", default, skip_serializing_if = "Option::is_none")]
    pub program_name: Option<String>,
    #[serde(rename = "periodo", default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(rename = "facultad", default, skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
}

impl Slots {
    pub fn is_empty(&self) -> bool {
        self.program_id.is_none()
            && self.program_name.is_none()
            && self.period.is_none()
            && self.faculty.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    pub slots: Slots,
    pub history: Vec<Turn>,
}

/// Per `(session, bot)` slots and bounded history.
pub struct ContextStore {
    conn: Mutex<Connection>,
}

impl ContextStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open conversation store {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn load(&self, session_id: &str, bot_id: &str) -> Result<Conversation> {
        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT ctx_json, history_json FROM conversations WHERE session_id = ?1 AND bot_id = ?2",
                params![session_id, bot_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
        };
        let Some((ctx_json, history_json)) = row else {
            return Ok(Conversation::default());
        };
        let slots = serde_json::from_str::<Slots>(&ctx_json);
        let history = serde_json::from_str::<Vec<Turn>>(&history_json);
        match (slots, history) {
            (Ok(slots), Ok(history)) => Ok(Conversation { slots, history }),
            (Err(err), _) | (_, Err(err)) => {
                warn!(session_id, bot_id, error = %err, "corrupt conversation row, starting fresh");
                Ok(Conversation::default())
            }
        }
    }

    /// Overwrites the slots and keeps the last `HISTORY_LIMIT` turns.
    pub fn save(&self, session_id: &str, bot_id: &str, slots: &Slots, history: &[Turn]) -> Result<()> {
        let tail = &history[history.len().saturating_sub(HISTORY_LIMIT)..];
        let ctx_json = serde_json::to_string(slots)?;
        let history_json = serde_json::to_string(tail)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (session_id, bot_id, ctx_json, history_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id, bot_id) DO UPDATE SET
                ctx_json = excluded.ctx_json,
                history_json = excluded.history_json,
                updated_at = excluded.updated_at",
            params![session_id, bot_id, ctx_json, history_json, now_iso_utc()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_is_empty_state() {
        let store = ContextStore::in_memory().unwrap();
        let conversation = store.load("s", "b").unwrap();
        assert!(conversation.slots.is_empty());
        assert!(conversation.history.is_empty());
    }

    #[test]
    fn save_keeps_the_last_eight_turns() {
        let store = ContextStore::in_memory().unwrap();
        let history: Vec<Turn> = (0..11).map(|i| Turn::user(format!("m{i}"))).collect();
        let slots = Slots {
            program_name: Some("Medicina".into()),
            period: Some("2025".into()),
            ..Slots::default()
        };
        store.save("s", "b", &slots, &history).unwrap();
        let loaded = store.load("s", "b").unwrap();
        assert_eq!(loaded.slots, slots);
        assert_eq!(loaded.history.len(), HISTORY_LIMIT);
        assert_eq!(loaded.history[0].content, "m3");
        assert_eq!(loaded.history[7].content, "m10");
    }

    #[test]
    fn sessions_are_scoped_per_bot_and_overwritten() {
        let store = ContextStore::in_memory().unwrap();
        let first = Slots {
            faculty: Some("Ingeniería".into()),
            ..Slots::default()
        };
        store.save("s", "a", &first, &[Turn::user("hola")]).unwrap();
        store.save("s", "a", &Slots::default(), &[Turn::assistant("chau")]).unwrap();
        let loaded = store.load("s", "a").unwrap();
        assert!(loaded.slots.is_empty());
        assert_eq!(loaded.history, vec![Turn::assistant("chau")]);
        assert!(store.load("s", "b").unwrap().history.is_empty());
    }

    #[test]
    fn slots_serialize_with_wire_names() {
        let slots = Slots {
            program_id: Some("MED".into()),
            program_name: Some("Medicina".into()),
            ..Slots::default()
        };
        let json = serde_json::to_string(&slots).unwrap();
        assert_eq!(json, r#"{"carrera_id":"MED","carrera_nombre":"Medicina"}"#);
    }

    #[test]
    fn corrupt_rows_degrade_to_empty_state() {
        let store = ContextStore::in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO conversations VALUES ('s', 'b', 'not json', '[]', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        assert_eq!(store.load("s", "b").unwrap(), Conversation::default());
    }
}
