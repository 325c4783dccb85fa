//! Conversation orchestration: turns a user message or image into a model
//! call against the session's active character and records the exchange.
//!
//! The session's lock is held from the moment the prompt is assembled until
//! the reply is appended, so requests on the same session are answered in
//! arrival order and never interleave their history entries.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::entities::Character;
use crate::error::ServerError;
use crate::runtime::{PromptMessage, PromptRole};
use crate::services::characters::{CharacterPatch, CharacterRepository};
use crate::services::registry::ModelRegistry;
use crate::services::sessions::{Message, Sender, Session, SessionStore};

/// Largest accepted chat message, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 128 * 1024;

/// Rewrite `*waves*` into a narrated action; anything else passes through.
pub fn format_user_input(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('*') && trimmed.ends_with('*') {
        let action = trimmed.trim_matches('*');
        format!("(The user performs an action: {action})")
    } else {
        text.to_owned()
    }
}

fn image_prompt(caption: &str) -> String {
    format!("user shows you this image: '{caption}'.")
}

fn system_prompt(character: &Character) -> String {
    let mut prompt = character.system_prompt.clone();
    if !character.user_profile.trim().is_empty() {
        prompt.push_str(&format!(
            "\nImportant: The user should be treated as follows: {}",
            character.user_profile
        ));
    }
    prompt
}

/// System prompt, then the non-error history, then `next` as the newest user turn.
pub fn build_prompt(character: &Character, history: &[Message], next: &str) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 2);
    prompt.push(PromptMessage::new(PromptRole::System, system_prompt(character)));
    for message in history.iter().filter(|m| !m.is_error) {
        let entry = match (message.sender, &message.image_caption) {
            (Sender::User, Some(caption)) => PromptMessage::new(PromptRole::User, image_prompt(caption)),
            (Sender::User, None) => PromptMessage::new(PromptRole::User, format_user_input(&message.content)),
            (Sender::Bot, _) => PromptMessage::new(PromptRole::Assistant, message.content.clone()),
        };
        prompt.push(entry);
    }
    prompt.push(PromptMessage::new(PromptRole::User, next));
    prompt
}

#[derive(Clone)]
pub struct Conversation {
    sessions: Arc<SessionStore>,
    characters: Arc<CharacterRepository>,
    registry: ModelRegistry,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Conversation")
    }
}

impl Conversation {
    pub fn new(
        sessions: Arc<SessionStore>,
        characters: Arc<CharacterRepository>,
        registry: ModelRegistry,
    ) -> Self {
        Self { sessions, characters, registry }
    }

    async fn active_character(&self, session: &Session) -> Result<Character, ServerError> {
        let key = session
            .active_character_key
            .as_deref()
            .ok_or_else(|| ServerError::Validation("No character selected".into()))?;
        match self.characters.get(key).await {
            Err(ServerError::NotFound(_)) => Err(ServerError::Validation(format!(
                "Selected character '{key}' no longer exists"
            ))),
            other => other,
        }
    }

    /// Send a text message and return the bot's reply.  Runtime failures are
    /// recorded as an error reply rather than returned.
    pub async fn send_text(&self, session_id: &str, text: &str) -> Result<Message, ServerError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ServerError::Validation("Message cannot be empty".into()));
        }
        if text.len() > MAX_MESSAGE_BYTES {
            return Err(ServerError::Validation(format!(
                "Message exceeds {MAX_MESSAGE_BYTES} bytes"
            )));
        }

        let mut session = self.sessions.lock(session_id).await?;
        let character = self.active_character(&session).await?;
        let prompt = build_prompt(&character, session.history(), &format_user_input(text));
        session.push(Message::user(text));

        let model = session.selected_chat_model.clone();
        debug!(session_id, model = %model, turns = prompt.len(), "sending chat prompt");
        let reply = match self.registry.chat(&model, &prompt).await {
            Ok(answer) => Message::bot(answer),
            Err(e) => {
                warn!(session_id, model = %model, error = %e, "chat generation failed");
                Message::bot_error(format!("Error: {e}"))
            }
        };
        Ok(session.push(reply).clone())
    }

    /// Caption an uploaded image with the vision model, then let the
    /// character respond to the caption.
    pub async fn send_image(
        &self,
        session_id: &str,
        image: &[u8],
        filename: &str,
    ) -> Result<Message, ServerError> {
        if image.is_empty() {
            return Err(ServerError::Validation("No file selected".into()));
        }
        let format = image::guess_format(image).map_err(|_| {
            ServerError::Validation("Uploaded file is not a recognizable image".into())
        })?;
        let filename = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("image");

        let mut session = self.sessions.lock(session_id).await?;
        let character = self.active_character(&session).await?;
        let label = format!("[Image: {filename}]");

        let caption_model = session.selected_caption_model.clone();
        debug!(session_id, model = %caption_model, ?format, bytes = image.len(), "captioning image");
        let caption = match self
            .registry
            .caption(&caption_model, image, &character.image_caption_prompt)
            .await
        {
            Ok(caption) => caption.trim().to_owned(),
            Err(e) => {
                warn!(session_id, model = %caption_model, error = %e, "caption generation failed");
                session.push(Message::user(label).failed());
                let reply = Message::bot_error(format!("Error: {e}"));
                return Ok(session.push(reply).clone());
            }
        };

        let prompt = build_prompt(&character, session.history(), &image_prompt(&caption));
        session.push(Message::user(label).with_caption(Some(caption.clone())));

        let model = session.selected_chat_model.clone();
        let reply = match self.registry.chat(&model, &prompt).await {
            Ok(answer) => Message::bot(answer).with_caption(Some(caption)),
            Err(e) => {
                warn!(session_id, model = %model, error = %e, "chat generation failed");
                Message::bot_error(format!("Error: {e}")).with_caption(Some(caption))
            }
        };
        Ok(session.push(reply).clone())
    }

    pub async fn select_chat_model(&self, session_id: &str, model: &str) -> Result<Session, ServerError> {
        let model = self.check_model(model).await?;
        let session = self
            .sessions
            .update(session_id, |s| {
                s.selected_chat_model = model.clone();
                s.clone()
            })
            .await?;
        info!(session_id, model = %model, "chat model selected");
        Ok(session)
    }

    pub async fn select_caption_model(&self, session_id: &str, model: &str) -> Result<Session, ServerError> {
        let model = self.check_model(model).await?;
        let session = self
            .sessions
            .update(session_id, |s| {
                s.selected_caption_model = model.clone();
                s.clone()
            })
            .await?;
        info!(session_id, model = %model, "caption model selected");
        Ok(session)
    }

    /// Make `key_or_name` the active character and start a fresh conversation.
    pub async fn select_character(
        &self,
        session_id: &str,
        key_or_name: &str,
    ) -> Result<Character, ServerError> {
        let character = self.characters.find(key_or_name.trim()).await?;
        self.sessions
            .update(session_id, |s| {
                s.active_character_key = Some(character.key.clone());
                s.clear_history();
            })
            .await?;
        info!(session_id, character = %character.key, "character selected");
        Ok(character)
    }

    pub async fn reset(&self, session_id: &str) -> Result<(), ServerError> {
        self.sessions.reset(session_id).await
    }

    /// Update a character; sessions that had it selected follow a key rename.
    pub async fn update_character(
        &self,
        key: &str,
        patch: CharacterPatch,
    ) -> Result<Character, ServerError> {
        let character = self.characters.update(key, patch).await?;
        if character.key != key {
            let moved = self.sessions.retarget_character(key, &character.key).await;
            info!(from = %key, to = %character.key, sessions = moved, "sessions follow renamed character");
        }
        Ok(character)
    }

    /// Reject empty names, and names the runtime says are not installed.  An
    /// unreachable runtime can't confirm either way, so the name is accepted.
    async fn check_model(&self, model: &str) -> Result<String, ServerError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(ServerError::Validation("model name is required".into()));
        }
        if self.registry.is_installed(model).await == Some(false) {
            return Err(ServerError::NotFound(format!("Model {model} not available")));
        }
        Ok(model.to_owned())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::entities::SqliteStore;
    use crate::services::sessions::SessionDefaults;
    use crate::test_support::{MockRuntime, TINY_PNG};

    struct Fixture {
        conversation: Conversation,
        sessions: Arc<SessionStore>,
        characters: Arc<CharacterRepository>,
        runtime: Arc<MockRuntime>,
        session_id: String,
    }

    async fn fixture(runtime: MockRuntime) -> Fixture {
        let runtime = Arc::new(runtime);
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let characters = Arc::new(CharacterRepository::load(store).await.unwrap());
        let sessions = Arc::new(SessionStore::new(
            SessionDefaults {
                chat_model: "llama3.2:3b".into(),
                caption_model: "llava:7b".into(),
            },
            Duration::from_secs(60),
        ));
        let (session_id, _) = sessions.resolve(None).unwrap();
        let conversation = Conversation::new(
            sessions.clone(),
            characters.clone(),
            ModelRegistry::new(runtime.clone()),
        );
        Fixture { conversation, sessions, characters, runtime, session_id }
    }

    fn installed() -> MockRuntime {
        MockRuntime::new()
            .with_model("llama3.2:3b", 1)
            .with_model("phi3:mini", 1)
            .with_model("llava:7b", 1)
    }

    #[test]
    fn action_messages_are_narrated() {
        assert_eq!(format_user_input("*waves*"), "(The user performs an action: waves)");
        assert_eq!(format_user_input("  *sits down*  "), "(The user performs an action: sits down)");
        assert_eq!(format_user_input("*"), "*");
        assert_eq!(format_user_input("hi *there*"), "hi *there*");
    }

    #[tokio::test]
    async fn hello_appends_user_and_bot_messages() {
        let f = fixture(installed().with_reply("Hi! Nice to meet you.")).await;
        f.conversation.select_character(&f.session_id, "assistant").await.unwrap();

        let reply = f.conversation.send_text(&f.session_id, "hello").await.unwrap();
        assert_eq!(reply.sender, Sender::Bot);
        assert_eq!(reply.content, "Hi! Nice to meet you.");
        assert!(!reply.is_error);

        let session = f.sessions.get(&f.session_id).await.unwrap();
        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[0].content, "hello");
        assert!(history[1].timestamp > history[0].timestamp);

        let chats = f.runtime.chats.lock().unwrap();
        let (model, prompt) = &chats[0];
        assert_eq!(model, "llama3.2:3b");
        assert_eq!(prompt[0].role, PromptRole::System);
        assert!(prompt[0].content.starts_with("You are a helpful AI assistant."));
        assert_eq!(prompt.last().unwrap(), &PromptMessage::new(PromptRole::User, "hello"));
    }

    #[tokio::test]
    async fn unreachable_runtime_records_error_reply() {
        let f = fixture(MockRuntime::unreachable()).await;
        f.conversation.select_character(&f.session_id, "assistant").await.unwrap();

        let reply = f.conversation.send_text(&f.session_id, "hi").await.unwrap();
        assert!(reply.is_error);

        let session = f.sessions.get(&f.session_id).await.unwrap();
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].content, "hi");
        assert!(session.history()[1].is_error);
    }

    #[tokio::test]
    async fn send_text_validation() {
        let f = fixture(installed()).await;
        let err = f.conversation.send_text(&f.session_id, "hello").await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        f.conversation.select_character(&f.session_id, "assistant").await.unwrap();
        let err = f.conversation.send_text(&f.session_id, "   ").await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let huge = "a".repeat(MAX_MESSAGE_BYTES + 1);
        let err = f.conversation.send_text(&f.session_id, &huge).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let err = f.conversation.send_text("no-such-session", "hi").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn prompt_carries_profile_actions_and_skips_errors() {
        let f = fixture(installed()).await;
        f.characters
            .update(
                "assistant",
                CharacterPatch { user_profile: Some("a tired student".into()), ..Default::default() },
            )
            .await
            .unwrap();
        f.conversation.select_character(&f.session_id, "assistant").await.unwrap();
        f.sessions
            .update(&f.session_id, |s| {
                s.push(Message::user("*waves*"));
                s.push(Message::bot_error("Error: runtime down"));
            })
            .await
            .unwrap();

        f.conversation.send_text(&f.session_id, "are you there?").await.unwrap();

        let chats = f.runtime.chats.lock().unwrap();
        let (_, prompt) = &chats[0];
        assert!(prompt[0]
            .content
            .ends_with("\nImportant: The user should be treated as follows: a tired student"));
        assert_eq!(prompt[1].content, "(The user performs an action: waves)");
        assert_eq!(prompt.len(), 3);
        assert!(prompt.iter().all(|m| !m.content.contains("runtime down")));
    }

    #[tokio::test]
    async fn select_character_clears_history_and_accepts_names() {
        let f = fixture(installed()).await;
        f.conversation.select_character(&f.session_id, "assistant").await.unwrap();
        f.conversation.send_text(&f.session_id, "hello").await.unwrap();

        let c = f.conversation.select_character(&f.session_id, "Code Helper").await.unwrap();
        assert_eq!(c.key, "code_helper");
        let session = f.sessions.get(&f.session_id).await.unwrap();
        assert_eq!(session.history().len(), 0);
        assert_eq!(session.active_character_key.as_deref(), Some("code_helper"));

        let err = f.conversation.select_character(&f.session_id, "nobody").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn send_image_captions_then_chats() {
        let f = fixture(installed().with_reply("What a lovely cat!")).await;
        f.conversation.select_character(&f.session_id, "researcher").await.unwrap();

        let reply = f
            .conversation
            .send_image(&f.session_id, TINY_PNG, "../../cat.png")
            .await
            .unwrap();
        assert_eq!(reply.content, "What a lovely cat!");
        assert_eq!(reply.image_caption.as_deref(), Some("a cat on a windowsill"));

        let captions = f.runtime.captions.lock().unwrap();
        assert_eq!(captions[0].0, "llava:7b");
        assert_eq!(captions[0].1, TINY_PNG.len());
        assert_eq!(captions[0].2, "Provide a detailed, analytical description of this image");

        let chats = f.runtime.chats.lock().unwrap();
        assert_eq!(
            chats[0].1.last().unwrap().content,
            "user shows you this image: 'a cat on a windowsill'."
        );

        let session = f.sessions.get(&f.session_id).await.unwrap();
        assert_eq!(session.history()[0].content, "[Image: cat.png]");
        assert_eq!(
            session.history()[0].image_caption.as_deref(),
            Some("a cat on a windowsill")
        );
    }

    #[tokio::test]
    async fn failed_caption_is_kept_out_of_later_prompts() {
        let f = fixture(installed().with_caption_failure("vision model crashed")).await;
        f.conversation.select_character(&f.session_id, "assistant").await.unwrap();

        let reply = f
            .conversation
            .send_image(&f.session_id, TINY_PNG, "cat.png")
            .await
            .unwrap();
        assert!(reply.is_error);
        assert!(reply.content.contains("vision model crashed"));

        let session = f.sessions.get(&f.session_id).await.unwrap();
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[0].content, "[Image: cat.png]");
        assert!(session.history()[0].is_error);

        f.conversation.send_text(&f.session_id, "hello").await.unwrap();
        let chats = f.runtime.chats.lock().unwrap();
        let (_, prompt) = &chats[0];
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, PromptRole::System);
        assert_eq!(prompt[1], PromptMessage::new(PromptRole::User, "hello"));
    }

    #[tokio::test]
    async fn renamed_character_stays_selected() {
        let f = fixture(installed()).await;
        f.characters
            .create(crate::services::characters::NewCharacter {
                name: "Captain Hook".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        f.conversation.select_character(&f.session_id, "captain_hook").await.unwrap();
        let (other, _) = f.sessions.resolve(None).unwrap();
        f.conversation.select_character(&other, "assistant").await.unwrap();

        let renamed = f
            .conversation
            .update_character(
                "captain_hook",
                CharacterPatch { key: Some("hook".into()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(renamed.key, "hook");

        let session = f.sessions.get(&f.session_id).await.unwrap();
        assert_eq!(session.active_character_key.as_deref(), Some("hook"));
        let untouched = f.sessions.get(&other).await.unwrap();
        assert_eq!(untouched.active_character_key.as_deref(), Some("assistant"));

        let reply = f.conversation.send_text(&f.session_id, "ahoy").await.unwrap();
        assert!(!reply.is_error);
    }

    #[tokio::test]
    async fn send_image_rejects_non_images() {
        let f = fixture(installed()).await;
        f.conversation.select_character(&f.session_id, "assistant").await.unwrap();
        let err = f
            .conversation
            .send_image(&f.session_id, b"definitely not an image", "notes.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn model_selection_checks_installed_models() {
        let f = fixture(installed()).await;
        let s = f.conversation.select_chat_model(&f.session_id, "phi3:mini").await.unwrap();
        assert_eq!(s.selected_chat_model, "phi3:mini");

        let err = f.conversation.select_caption_model(&f.session_id, "ghost:1b").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
        let err = f.conversation.select_chat_model(&f.session_id, " ").await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let offline = fixture(MockRuntime::unreachable()).await;
        let s = offline
            .conversation
            .select_caption_model(&offline.session_id, "moondream:1.8b")
            .await
            .unwrap();
        assert_eq!(s.selected_caption_model, "moondream:1.8b");
    }
}
