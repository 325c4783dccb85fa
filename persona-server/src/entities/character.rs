use crate::entities::{SqliteStore, dao::Character, dao::CharacterOrigin};

use chrono::Utc;
use std::future::Future;
use std::str::FromStr;

pub trait CharacterStore: Send + Sync + 'static {
    /// Insert `character` at the end of the listing order.
    fn insert_character(
        &self,
        character: &Character,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    /// Insert `character` unless a row with the same key already exists.
    /// Returns `true` when a row was written.
    fn insert_character_if_missing(
        &self,
        character: &Character,
    ) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
    fn get_character(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Character>, sqlx::Error>> + Send;
    fn list_characters(&self) -> impl Future<Output = Result<Vec<Character>, sqlx::Error>> + Send;
    /// Overwrite the row stored under `key`; `character.key` may differ (rename).
    fn update_character(
        &self,
        key: &str,
        character: &Character,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
    /// Returns `true` when a row was deleted.
    fn delete_character(&self, key: &str) -> impl Future<Output = Result<bool, sqlx::Error>> + Send;
}

type CharacterRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

const SELECT_COLUMNS: &str = "SELECT key, name, role, system_prompt, image_caption_prompt, \
     user_profile, origin, created_at, updated_at FROM characters";

fn from_row(row: CharacterRow) -> Character {
    let (key, name, role, system_prompt, image_caption_prompt, user_profile, origin, created_at, updated_at) =
        row;
    Character {
        origin: CharacterOrigin::from_str(&origin).unwrap_or_else(|_| {
            tracing::warn!(key = %key, raw = %origin, "unknown character origin; treating as custom");
            CharacterOrigin::Custom
        }),
        key,
        name,
        role,
        system_prompt,
        image_caption_prompt,
        user_profile,
        created_at: created_at.parse().unwrap_or_else(|e: chrono::ParseError| {
            tracing::warn!(raw = %created_at, error = %e, "failed to parse character created_at; using now");
            Utc::now()
        }),
        updated_at: updated_at.parse().unwrap_or_else(|e: chrono::ParseError| {
            tracing::warn!(raw = %updated_at, error = %e, "failed to parse character updated_at; using now");
            Utc::now()
        }),
    }
}

impl CharacterStore for SqliteStore {
    async fn insert_character(&self, character: &Character) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO characters (key, name, role, system_prompt, image_caption_prompt, \
             user_profile, origin, position, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, \
             (SELECT COALESCE(MAX(position), 0) + 1 FROM characters), ?8, ?9)",
        )
        .bind(&character.key)
        .bind(&character.name)
        .bind(&character.role)
        .bind(&character.system_prompt)
        .bind(&character.image_caption_prompt)
        .bind(&character.user_profile)
        .bind(character.origin.as_ref())
        .bind(character.created_at.to_rfc3339())
        .bind(character.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_character_if_missing(&self, character: &Character) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO characters (key, name, role, system_prompt, image_caption_prompt, \
             user_profile, origin, position, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, \
             (SELECT COALESCE(MAX(position), 0) + 1 FROM characters), ?8, ?9) \
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(&character.key)
        .bind(&character.name)
        .bind(&character.role)
        .bind(&character.system_prompt)
        .bind(&character.image_caption_prompt)
        .bind(&character.user_profile)
        .bind(character.origin.as_ref())
        .bind(character.created_at.to_rfc3339())
        .bind(character.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_character(&self, key: &str) -> Result<Option<Character>, sqlx::Error> {
        let row: Option<CharacterRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE key = ?1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(from_row))
    }

    async fn list_characters(&self) -> Result<Vec<Character>, sqlx::Error> {
        // Built-ins first, then everything else in insertion order.
        let rows: Vec<CharacterRow> = sqlx::query_as(&format!(
            "{SELECT_COLUMNS} ORDER BY CASE origin WHEN 'builtin' THEN 0 ELSE 1 END, position"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn update_character(&self, key: &str, character: &Character) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE characters SET key = ?1, name = ?2, role = ?3, system_prompt = ?4, \
             image_caption_prompt = ?5, user_profile = ?6, updated_at = ?7 WHERE key = ?8",
        )
        .bind(&character.key)
        .bind(&character.name)
        .bind(&character.role)
        .bind(&character.system_prompt)
        .bind(&character.image_caption_prompt)
        .bind(&character.user_profile)
        .bind(character.updated_at.to_rfc3339())
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_character(&self, key: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM characters WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
