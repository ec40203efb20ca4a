//! Memory repository for long-term episodic memory storage

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DbPool, connection, parse_datetime};
use crate::Result;

/// An episodic memory with its embedding
///
/// Stored once and never rewritten except for `accessed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub id: String,
    pub user_id: String,
    pub character_id: String,
    pub content: String,
    /// Emotional weight / long-term relevance in `[0, 1]`
    pub importance: f64,
    /// Certainty that the memory is grounded in the conversation, `[0, 1]`
    pub confidence: f64,
    pub tags: Vec<String>,
    pub embedding: Vec<f32>,
    /// Conversation the memory was extracted from
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

impl Memory {
    /// Create a new memory item
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        character_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("mem_{}", Uuid::new_v4()),
            user_id: user_id.into(),
            character_id: character_id.into(),
            content: content.into(),
            importance: 0.5,
            confidence: 0.5,
            tags: Vec::new(),
            embedding,
            source: None,
            created_at: now,
            accessed_at: now,
        }
    }

    /// Set importance and confidence, clamped to `[0, 1]`
    #[must_use]
    pub fn with_scores(mut self, importance: f64, confidence: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add a tag to this memory
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Record the conversation this memory came from
    #[must_use]
    pub fn with_source(mut self, conversation_id: impl Into<String>) -> Self {
        self.source = Some(conversation_id.into());
        self
    }
}

/// Storage operations the embedding index and curator rely on
pub trait MemoryStore: Send + Sync {
    /// Persist a new memory
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn create(&self, memory: &Memory) -> Result<()>;

    /// All stored `(id, embedding)` pairs
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn list_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>>;

    /// `(id, embedding)` pairs belonging to one user/character pair
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn list_embeddings_for(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> Result<Vec<(String, Vec<f32>)>>;

    /// Fetch memories by id; missing ids are skipped, order is unspecified
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Memory>>;

    /// Bump `accessed_at` for the given memories
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn touch(&self, ids: &[String]) -> Result<()>;
}

/// Serialize embedding to little-endian bytes for `SQLite` storage
#[must_use]
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize embedding from little-endian bytes
#[must_use]
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

/// Column list for all memory SELECT queries
const MEMORY_COLUMNS: &str = "id, user_id, character_id, content, importance, confidence, tags, embedding, source, created_at, accessed_at";

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let tags: String = row.get(6)?;
    let embedding: Vec<u8> = row.get(7)?;
    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        character_id: row.get(2)?,
        content: row.get(3)?,
        importance: row.get(4)?,
        confidence: row.get(5)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        embedding: decode_embedding(&embedding),
        source: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        accessed_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SQLite` memory repository
#[derive(Debug, Clone)]
pub struct MemoryRepo {
    pool: DbPool,
}

impl MemoryRepo {
    /// Create a new memory repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// List memories for a user/character pair, most important first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, user_id: &str, character_id: &str) -> Result<Vec<Memory>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE user_id = ?1 AND character_id = ?2
             ORDER BY importance DESC, accessed_at DESC"
        ))?;
        let rows = stmt.query_map([user_id, character_id], row_to_memory)?;
        Ok(rows.flatten().collect())
    }

    /// Number of stored memories
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<usize> {
        let conn = connection(&self.pool)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Format memories for prompt injection
    #[must_use]
    pub fn format_for_prompt(memories: &[Memory]) -> String {
        use std::fmt::Write;

        if memories.is_empty() {
            return String::new();
        }

        let mut output = String::from("Things you remember about your time together:\n");
        for mem in memories {
            let _ = writeln!(output, "- {}", mem.content);
        }
        output
    }
}

impl MemoryStore for MemoryRepo {
    fn create(&self, memory: &Memory) -> Result<()> {
        let conn = connection(&self.pool)?;
        let tags_json = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".to_string());

        conn.execute(
            &format!(
                "INSERT INTO memories ({MEMORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                memory.id,
                memory.user_id,
                memory.character_id,
                memory.content,
                memory.importance,
                memory.confidence,
                tags_json,
                encode_embedding(&memory.embedding),
                memory.source,
                memory.created_at.to_rfc3339(),
                memory.accessed_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    fn list_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare("SELECT id, embedding FROM memories")?;
        let rows = stmt.query_map([], |row| {
            let bytes: Vec<u8> = row.get(1)?;
            Ok((row.get::<_, String>(0)?, decode_embedding(&bytes)))
        })?;
        Ok(rows.flatten().collect())
    }

    fn list_embeddings_for(
        &self,
        user_id: &str,
        character_id: &str,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM memories WHERE user_id = ?1 AND character_id = ?2",
        )?;
        let rows = stmt.query_map([user_id, character_id], |row| {
            let bytes: Vec<u8> = row.get(1)?;
            Ok((row.get::<_, String>(0)?, decode_embedding(&bytes)))
        })?;
        Ok(rows.flatten().collect())
    }

    fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Memory>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = connection(&self.pool)?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_memory)?;
        Ok(rows.flatten().collect())
    }

    fn touch(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let conn = connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "UPDATE memories SET accessed_at = ?1 WHERE id IN ({})",
            (2..=ids.len() + 1)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() + 1);
        params.push(&now);
        params.extend(ids.iter().map(|id| id as &dyn rusqlite::ToSql));
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }
}
