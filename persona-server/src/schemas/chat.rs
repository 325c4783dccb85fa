//! Types for the session and conversation endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::schemas::characters::CharacterResponse;
use crate::schemas::models::ModelCatalogResponse;
use crate::services::sessions::{Message, Sender, Session};

/// Request body for `POST /api/send_message`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 131072))]
    pub message: String,
}

/// Request body for `POST /api/select_chat_model` and `POST /api/select_image_model`.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct SelectModelRequest {
    #[validate(length(min = 1, max = 256))]
    pub model: String,
}

/// Request body for `POST /api/select_character`; a key or a display name.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct SelectCharacterRequest {
    #[validate(length(min = 1, max = 256))]
    pub character: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    pub id: String,
    /// `"user"` or `"bot"`.
    pub sender: Sender,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_caption: Option<String>,
    /// RFC 3339.
    pub timestamp: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: String,
    pub created_at: String,
    pub selected_chat_model: String,
    pub selected_image_model: String,
    pub active_character: Option<String>,
    pub history: Vec<MessageResponse>,
}

/// Everything the client needs to render its first screen.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitialDataResponse {
    pub session: SessionResponse,
    #[serde(flatten)]
    pub models: ModelCatalogResponse,
    pub characters: Vec<CharacterResponse>,
    pub current_character: Option<CharacterResponse>,
}

/// Response body for `POST /api/upload_image`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ImageReplyResponse {
    pub filename: String,
    pub caption: Option<String>,
    pub reply: MessageResponse,
}

impl Message {
    pub fn to_response(&self) -> MessageResponse {
        MessageResponse {
            id: self.id.clone(),
            sender: self.sender,
            content: self.content.clone(),
            image_caption: self.image_caption.clone(),
            timestamp: self.timestamp.to_rfc3339(),
            is_error: self.is_error,
        }
    }
}

impl Session {
    pub fn to_response(&self) -> SessionResponse {
        SessionResponse {
            id: self.id.clone(),
            created_at: self.created_at.to_rfc3339(),
            selected_chat_model: self.selected_chat_model.clone(),
            selected_image_model: self.selected_caption_model.clone(),
            active_character: self.active_character_key.clone(),
            history: self.history().iter().map(Message::to_response).collect(),
        }
    }
}
