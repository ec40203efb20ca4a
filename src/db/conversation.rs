//! Conversation repository: conversations and their append-only transcript

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DbPool, connection, parse_datetime};
use crate::message::{ChatMessage, ContentPart, Role};
use crate::{Error, Result};

/// A conversation between one user and one character
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    /// Number of recent messages fed back to the model
    pub max_window_size: usize,
    pub character_id: String,
    pub user_id: String,
    /// Rolling summary written by the memory curator
    pub current_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored transcript entry
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub id: String,
    pub conversation_id: String,
    pub message: ChatMessage,
    pub created_at: DateTime<Utc>,
}

/// Transcript storage used by the agent and the memory curator
pub trait ConversationStore: Send + Sync {
    /// Create the conversation unless it already exists; returns the stored row
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn create_if_absent(
        &self,
        id: &str,
        window_size: usize,
        character_id: &str,
        user_id: &str,
    ) -> Result<Conversation>;

    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Append a message to the transcript
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn append(&self, conversation_id: &str, message: &ChatMessage) -> Result<TurnRecord>;

    /// Most recent `limit` messages in chronological order
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn list_recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<TurnRecord>>;

    /// Total number of messages in the transcript
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn count(&self, conversation_id: &str) -> Result<usize>;

    /// Replace the conversation summary
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn set_summary(&self, conversation_id: &str, summary: &str) -> Result<()>;
}

/// `SQLite` conversation repository
#[derive(Debug, Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

const CONVERSATION_COLUMNS: &str = "id, title, max_window_size, character_id, user_id, current_summary, created_at, updated_at";

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let window: i64 = row.get(2)?;
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        max_window_size: usize::try_from(window).unwrap_or(0),
        character_id: row.get(3)?,
        user_id: row.get(4)?,
        current_summary: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

impl ConversationRepo {
    /// Create a new conversation repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// List conversations for a user, most recently active first
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC"
        ))?;
        let rows = stmt.query_map([user_id], row_to_conversation)?;
        Ok(rows.flatten().collect())
    }
}

impl ConversationStore for ConversationRepo {
    fn create_if_absent(
        &self,
        id: &str,
        window_size: usize,
        character_id: &str,
        user_id: &str,
    ) -> Result<Conversation> {
        let conn = connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();

        #[allow(clippy::cast_possible_wrap)]
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO conversations (id, max_window_size, character_id, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, window_size as i64, character_id, user_id, now],
        )?;

        if inserted > 0 {
            tracing::info!(conversation_id = id, character_id, user_id, "created conversation");
        }

        conn.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            [id],
            row_to_conversation,
        )
        .map_err(Error::from)
    }

    fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = connection(&self.pool)?;
        let result = conn.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            [id],
            row_to_conversation,
        );

        match result {
            Ok(conversation) => Ok(Some(conversation)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn append(&self, conversation_id: &str, message: &ChatMessage) -> Result<TurnRecord> {
        let conn = connection(&self.pool)?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let content = serde_json::to_string(&message.content)?;

        conn.execute(
            "INSERT INTO conversation_messages (id, conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, conversation_id, message.role.as_str(), content, now_str],
        )?;

        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            [&now_str, conversation_id],
        )?;

        Ok(TurnRecord {
            id,
            conversation_id: conversation_id.to_string(),
            message: message.clone(),
            created_at: now,
        })
    }

    fn list_recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<TurnRecord>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM conversation_messages WHERE conversation_id = ?1
             ORDER BY seq DESC LIMIT ?2",
        )?;

        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt.query_map(rusqlite::params![conversation_id, limit as i64], |row| {
            let role: String = row.get(2)?;
            let content: String = row.get(3)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                role,
                content,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for (id, conversation_id, role, content, created_at) in rows.flatten() {
            let role = Role::from_str_value(&role).unwrap_or(Role::User);
            let content = serde_json::from_str::<Vec<ContentPart>>(&content).unwrap_or_else(|e| {
                tracing::warn!(message_id = %id, error = %e, "unparseable message content, keeping raw text");
                vec![ContentPart::text(content)]
            });
            records.push(TurnRecord {
                id,
                conversation_id,
                message: ChatMessage { role, content },
                created_at: parse_datetime(&created_at),
            });
        }

        // Reverse to get chronological order
        records.reverse();
        Ok(records)
    }

    fn count(&self, conversation_id: &str) -> Result<usize> {
        let conn = connection(&self.pool)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversation_messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn set_summary(&self, conversation_id: &str, summary: &str) -> Result<()> {
        let conn = connection(&self.pool)?;
        let updated = conn.execute(
            "UPDATE conversations SET current_summary = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![summary, Utc::now().to_rfc3339(), conversation_id],
        )?;

        if updated == 0 {
            return Err(Error::NotFound(format!("conversation {conversation_id}")));
        }
        Ok(())
    }
}
