//! Stable user/character facts
//!
//! Facts are append-only. Writing the same name twice keeps both rows and
//! reads resolve each name to its most recent value.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DbPool, connection, parse_datetime};
use crate::Result;

/// Who a fact is about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FactSubject {
    User(String),
    Character(String),
}

impl FactSubject {
    const fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Character(_) => "character",
        }
    }

    fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Character(id) => id,
        }
    }

    fn from_parts(kind: &str, id: String) -> Self {
        if kind == "character" {
            Self::Character(id)
        } else {
            Self::User(id)
        }
    }
}

/// A named attribute of a user or character
#[derive(Debug, Clone)]
pub struct Fact {
    pub id: String,
    pub subject: FactSubject,
    pub name: String,
    pub value: String,
    pub fact_type: String,
    pub created_at: DateTime<Utc>,
}

impl Fact {
    /// Create a new fact
    #[must_use]
    pub fn new(subject: FactSubject, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject,
            name: name.into(),
            value: value.into(),
            fact_type: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the free-form fact category
    #[must_use]
    pub fn with_type(mut self, fact_type: impl Into<String>) -> Self {
        self.fact_type = fact_type.into();
        self
    }
}

/// Fact storage
pub trait FactStore: Send + Sync {
    /// Append a fact row
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn append(&self, fact: &Fact) -> Result<()>;

    /// Latest value for every fact name of a subject, ordered by name
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    fn latest(&self, subject: &FactSubject) -> Result<Vec<Fact>>;
}

/// `SQLite` fact repository
#[derive(Debug, Clone)]
pub struct FactRepo {
    pool: DbPool,
}

impl FactRepo {
    /// Create a new fact repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Format facts as `name: value` lines
    #[must_use]
    pub fn format_for_prompt(facts: &[Fact]) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        for fact in facts {
            let _ = writeln!(output, "{}: {}", fact.name, fact.value);
        }
        output
    }
}

impl FactStore for FactRepo {
    fn append(&self, fact: &Fact) -> Result<()> {
        let conn = connection(&self.pool)?;
        conn.execute(
            "INSERT INTO facts (id, subject_kind, subject_id, name, value, fact_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                fact.id,
                fact.subject.kind(),
                fact.subject.id(),
                fact.name,
                fact.value,
                fact.fact_type,
                fact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn latest(&self, subject: &FactSubject) -> Result<Vec<Fact>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT id, subject_kind, subject_id, name, value, fact_type, created_at
             FROM facts
             WHERE seq IN (
                 SELECT MAX(seq) FROM facts
                 WHERE subject_kind = ?1 AND subject_id = ?2
                 GROUP BY name
             )
             ORDER BY name",
        )?;

        let rows = stmt.query_map([subject.kind(), subject.id()], |row| {
            let kind: String = row.get(1)?;
            Ok(Fact {
                id: row.get(0)?,
                subject: FactSubject::from_parts(&kind, row.get(2)?),
                name: row.get(3)?,
                value: row.get(4)?,
                fact_type: row.get(5)?,
                created_at: parse_datetime(&row.get::<_, String>(6)?),
            })
        })?;

        Ok(rows.flatten().collect())
    }
}
