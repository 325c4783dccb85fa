//! Character repository: CRUD over persona definitions.
//!
//! Built-in characters are seeded into the store at startup and carry
//! [`CharacterOrigin::Builtin`]; they can be edited but never deleted or
//! re-keyed.  Every mutation is written through to SQLite under a single
//! writer lock, so concurrent writers are serialized and the last one wins.

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::entities::{Character, CharacterOrigin, CharacterStore, SqliteStore};
use crate::error::ServerError;

/// Fields accepted when creating a character.
#[derive(Debug, Clone, Default)]
pub struct NewCharacter {
    /// Explicit key; derived from `name` when absent.
    pub key: Option<String>,
    pub name: String,
    pub role: Option<String>,
    pub system_prompt: Option<String>,
    pub image_caption_prompt: Option<String>,
    pub user_profile: Option<String>,
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct CharacterPatch {
    pub key: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub system_prompt: Option<String>,
    pub image_caption_prompt: Option<String>,
    pub user_profile: Option<String>,
}

struct Builtin {
    key: &'static str,
    name: &'static str,
    role: &'static str,
    system_prompt: &'static str,
    image_caption_prompt: &'static str,
}

const BUILTINS: &[Builtin] = &[
    Builtin {
        key: "assistant",
        name: "Assistant",
        role: "Helpful AI Assistant",
        system_prompt: "You are a helpful AI assistant. Be friendly, informative, and helpful in all interactions.",
        image_caption_prompt: "Describe this image accurately and concisely",
    },
    Builtin {
        key: "creative_writer",
        name: "Creative Writer",
        role: "Creative Writing Specialist",
        system_prompt: "You are a creative writer with vivid imagination. Use descriptive language and engage in storytelling.",
        image_caption_prompt: "Describe this image with creative and poetic language",
    },
    Builtin {
        key: "code_helper",
        name: "Code Helper",
        role: "Programming Assistant",
        system_prompt: "You are a programming assistant. Help with coding questions, debug issues, and explain technical concepts.",
        image_caption_prompt: "Analyze this image for any technical or coding-related content",
    },
    Builtin {
        key: "researcher",
        name: "Researcher",
        role: "Research Assistant",
        system_prompt: "You are a research-focused assistant for academic work. Provide detailed, analytical responses.",
        image_caption_prompt: "Provide a detailed, analytical description of this image",
    },
];

/// Derive a key from a display name: `"Sir Bob-Smith"` → `"sir_bob_smith"`.
pub fn derive_key(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' | '-' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

fn validate_key(key: &str) -> Result<(), ServerError> {
    if key.is_empty() {
        return Err(ServerError::Validation("character key must not be empty".into()));
    }
    if !key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(ServerError::Validation(format!(
            "character key '{key}' may only contain lowercase letters, digits and underscores"
        )));
    }
    Ok(())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

pub struct CharacterRepository {
    store: SqliteStore,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for CharacterRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CharacterRepository")
    }
}

impl CharacterRepository {
    /// Open the repository, seeding any built-in character missing from the store.
    pub async fn load(store: SqliteStore) -> Result<Self, ServerError> {
        let now = Utc::now();
        let mut seeded = 0usize;
        for b in BUILTINS {
            let character = Character {
                key: b.key.to_owned(),
                name: b.name.to_owned(),
                role: b.role.to_owned(),
                system_prompt: b.system_prompt.to_owned(),
                image_caption_prompt: b.image_caption_prompt.to_owned(),
                user_profile: String::new(),
                origin: CharacterOrigin::Builtin,
                created_at: now,
                updated_at: now,
            };
            if store.insert_character_if_missing(&character).await? {
                seeded += 1;
            }
        }
        let total = store.list_characters().await?.len();
        info!(seeded, total, "character repository ready");
        Ok(Self { store, write_lock: Mutex::new(()) })
    }

    pub async fn list(&self) -> Result<Vec<Character>, ServerError> {
        Ok(self.store.list_characters().await?)
    }

    pub async fn get(&self, key: &str) -> Result<Character, ServerError> {
        self.store
            .get_character(key)
            .await?
            .ok_or_else(|| ServerError::NotFound(format!("character '{key}' not found")))
    }

    /// Find a character by key, falling back to an exact display-name match.
    pub async fn find(&self, key_or_name: &str) -> Result<Character, ServerError> {
        if let Some(c) = self.store.get_character(key_or_name).await? {
            return Ok(c);
        }
        self.list()
            .await?
            .into_iter()
            .find(|c| c.name == key_or_name)
            .ok_or_else(|| ServerError::NotFound(format!("character '{key_or_name}' not found")))
    }

    pub async fn create(&self, fields: NewCharacter) -> Result<Character, ServerError> {
        let name = fields.name.trim().to_owned();
        if name.is_empty() {
            return Err(ServerError::Validation("character name is required".into()));
        }
        let key = match non_empty(fields.key) {
            Some(key) => key,
            None => derive_key(&name),
        };
        validate_key(&key)?;

        let now = Utc::now();
        let character = Character {
            role: non_empty(fields.role).unwrap_or_else(|| "Custom Character".to_owned()),
            system_prompt: non_empty(fields.system_prompt)
                .unwrap_or_else(|| format!("You are {name}. Engage naturally in conversation.")),
            image_caption_prompt: non_empty(fields.image_caption_prompt)
                .unwrap_or_else(|| "Describe this image".to_owned()),
            user_profile: fields.user_profile.map(|p| p.trim().to_owned()).unwrap_or_default(),
            key,
            name,
            origin: CharacterOrigin::Custom,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.write_lock.lock().await;
        if self.store.get_character(&character.key).await?.is_some() {
            return Err(ServerError::Validation(format!(
                "character '{}' already exists",
                character.key
            )));
        }
        self.store.insert_character(&character).await?;
        info!(key = %character.key, name = %character.name, "character created");
        Ok(character)
    }

    pub async fn update(&self, key: &str, patch: CharacterPatch) -> Result<Character, ServerError> {
        let _guard = self.write_lock.lock().await;
        let mut character = self.get(key).await?;

        if let Some(new_key) = non_empty(patch.key) {
            if new_key != character.key {
                if character.is_builtin() {
                    return Err(ServerError::Forbidden(format!(
                        "built-in character '{key}' cannot be renamed"
                    )));
                }
                validate_key(&new_key)?;
                if self.store.get_character(&new_key).await?.is_some() {
                    return Err(ServerError::Validation(format!(
                        "character '{new_key}' already exists"
                    )));
                }
                character.key = new_key;
            }
        }
        if let Some(name) = patch.name {
            let name = name.trim().to_owned();
            if name.is_empty() {
                return Err(ServerError::Validation("character name must not be empty".into()));
            }
            character.name = name;
        }
        if let Some(role) = patch.role {
            character.role = role;
        }
        if let Some(prompt) = patch.system_prompt {
            character.system_prompt = prompt;
        }
        if let Some(prompt) = patch.image_caption_prompt {
            character.image_caption_prompt = prompt;
        }
        if let Some(profile) = patch.user_profile {
            character.user_profile = profile.trim().to_owned();
        }
        character.updated_at = Utc::now();

        self.store.update_character(key, &character).await?;
        info!(key = %key, new_key = %character.key, "character updated");
        Ok(character)
    }

    pub async fn delete(&self, key: &str) -> Result<(), ServerError> {
        let _guard = self.write_lock.lock().await;
        let character = self.get(key).await?;
        if character.is_builtin() {
            return Err(ServerError::Forbidden(format!(
                "built-in character '{key}' cannot be deleted"
            )));
        }
        if !self.store.delete_character(key).await? {
            return Err(ServerError::NotFound(format!("character '{key}' not found")));
        }
        info!(key = %key, "character deleted");
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
