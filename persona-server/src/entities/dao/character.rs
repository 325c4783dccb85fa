use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Whether a character ships with the server or was created by a user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CharacterOrigin {
    Builtin,
    Custom,
}

/// A row in the `characters` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    pub key: String,
    pub name: String,
    pub role: String,
    pub system_prompt: String,
    pub image_caption_prompt: String,
    /// How the character should treat the user; empty when unset.
    pub user_profile: String,
    pub origin: CharacterOrigin,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    pub fn is_builtin(&self) -> bool {
        self.origin == CharacterOrigin::Builtin
    }
}
