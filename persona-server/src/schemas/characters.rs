//! Types for the character CRUD endpoints (`/api/characters`).

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::entities::{Character, CharacterOrigin};
use crate::services::characters::{CharacterPatch, NewCharacter};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CharacterResponse {
    pub key: String,
    pub name: String,
    pub role: String,
    pub system_prompt: String,
    pub image_caption_prompt: String,
    pub user_profile: String,
    /// `"builtin"` or `"custom"`.
    pub origin: String,
    pub is_builtin: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for `POST /api/characters`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct CreateCharacterRequest {
    /// Derived from `name` when omitted.
    #[validate(length(min = 1, max = 64))]
    pub key: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Short free-text description; used as role and system prompt when
    /// those are not given.
    #[validate(length(max = 8192))]
    pub description: Option<String>,
    #[validate(length(max = 200))]
    pub role: Option<String>,
    #[validate(length(max = 8192))]
    pub system_prompt: Option<String>,
    #[validate(length(max = 2048))]
    pub image_caption_prompt: Option<String>,
    #[validate(length(max = 2048))]
    pub user_profile: Option<String>,
}

/// Request body for `PUT /api/characters/{key}`; absent fields are unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, Validate)]
pub struct UpdateCharacterRequest {
    #[validate(length(min = 1, max = 64))]
    pub key: Option<String>,
    #[validate(length(max = 100))]
    pub name: Option<String>,
    #[validate(length(max = 200))]
    pub role: Option<String>,
    #[validate(length(max = 8192))]
    pub system_prompt: Option<String>,
    #[validate(length(max = 2048))]
    pub image_caption_prompt: Option<String>,
    #[validate(length(max = 2048))]
    pub user_profile: Option<String>,
}

impl Character {
    pub fn to_response(&self) -> CharacterResponse {
        CharacterResponse {
            key: self.key.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            system_prompt: self.system_prompt.clone(),
            image_caption_prompt: self.image_caption_prompt.clone(),
            user_profile: self.user_profile.clone(),
            origin: self.origin.as_ref().to_owned(),
            is_builtin: self.origin == CharacterOrigin::Builtin,
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

impl From<CreateCharacterRequest> for NewCharacter {
    fn from(req: CreateCharacterRequest) -> Self {
        let description = req.description.filter(|d| !d.trim().is_empty());
        Self {
            key: req.key,
            name: req.name,
            role: req.role.or_else(|| description.clone()),
            system_prompt: req.system_prompt.or(description),
            image_caption_prompt: req.image_caption_prompt,
            user_profile: req.user_profile,
        }
    }
}

impl From<UpdateCharacterRequest> for CharacterPatch {
    fn from(req: UpdateCharacterRequest) -> Self {
        Self {
            key: req.key,
            name: req.name,
            role: req.role,
            system_prompt: req.system_prompt,
            image_caption_prompt: req.image_caption_prompt,
            user_profile: req.user_profile,
        }
    }
}
