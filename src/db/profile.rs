//! User and character profiles

use chrono::{DateTime, Utc};

use super::{DbPool, connection, parse_datetime};
use crate::Result;

/// A user profile
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub bio: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A character (persona) profile
#[derive(Debug, Clone)]
pub struct Character {
    pub id: String,
    pub name: String,
    /// Persona instructions placed at the top of the system prompt
    pub base_prompt: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile repository
#[derive(Debug, Clone)]
pub struct ProfileRepo {
    pool: DbPool,
}

impl ProfileRepo {
    /// Create a new profile repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or update a user profile
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert_user(&self, id: &str, name: &str, bio: &str) -> Result<()> {
        let conn = connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, name, bio, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, bio = excluded.bio, updated_at = excluded.updated_at",
            rusqlite::params![id, name, bio, now],
        )?;
        Ok(())
    }

    /// Get a user profile
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = connection(&self.pool)?;
        let result = conn.query_row(
            "SELECT id, name, bio, created_at, updated_at FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    bio: row.get(2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                    updated_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            },
        );

        match result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or update a character profile
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn upsert_character(
        &self,
        id: &str,
        name: &str,
        base_prompt: &str,
        description: &str,
    ) -> Result<()> {
        let conn = connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO characters (id, name, base_prompt, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, base_prompt = excluded.base_prompt,
                 description = excluded.description, updated_at = excluded.updated_at",
            rusqlite::params![id, name, base_prompt, description, now],
        )?;
        Ok(())
    }

    /// Get a character profile
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_character(&self, id: &str) -> Result<Option<Character>> {
        let conn = connection(&self.pool)?;
        let result = conn.query_row(
            "SELECT id, name, base_prompt, description, created_at, updated_at FROM characters WHERE id = ?1",
            [id],
            |row| {
                Ok(Character {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    base_prompt: row.get(2)?,
                    description: row.get(3)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                    updated_at: parse_datetime(&row.get::<_, String>(5)?),
                })
            },
        );

        match result {
            Ok(character) => Ok(Some(character)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[test]
    fn user_upsert_and_get() {
        let repo = ProfileRepo::new(init_memory().unwrap());
        assert!(repo.get_user("hoang").unwrap().is_none());

        repo.upsert_user("hoang", "Hoang", "Student").unwrap();
        repo.upsert_user("hoang", "Hoang", "Developer").unwrap();

        let user = repo.get_user("hoang").unwrap().unwrap();
        assert_eq!(user.name, "Hoang");
        assert_eq!(user.bio, "Developer");
    }

    #[test]
    fn character_upsert_and_get() {
        let repo = ProfileRepo::new(init_memory().unwrap());
        repo.upsert_character("ene", "Ene", "You are Ene, a cyber girl.", "Lives in the PC")
            .unwrap();

        let character = repo.get_character("ene").unwrap().unwrap();
        assert_eq!(character.name, "Ene");
        assert_eq!(character.base_prompt, "You are Ene, a cyber girl.");
        assert!(repo.get_character("missing").unwrap().is_none());
    }
}
