//! In-memory session store.
//!
//! Each session lives in its own slot guarded by an async mutex, so work on
//! one session (including a long chat call that holds the slot) never blocks
//! another.  The map lock is a plain `RwLock` held only for lookups and
//! inserts, never across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// One entry of a session's conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub image_caption: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub is_error: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content.into(), false)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content.into(), false)
    }

    pub fn bot_error(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content.into(), true)
    }

    /// Mark the message as part of a failed exchange; such entries are shown
    /// to the client but never replayed to the model.
    pub fn failed(mut self) -> Self {
        self.is_error = true;
        self
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.image_caption = caption;
        self
    }

    fn new(sender: Sender, content: String, is_error: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            content,
            image_caption: None,
            timestamp: Utc::now(),
            is_error,
        }
    }
}

/// Per-client conversational state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub selected_chat_model: String,
    pub selected_caption_model: String,
    pub active_character_key: Option<String>,
    history: Vec<Message>,
}

impl Session {
    fn new(id: String, defaults: &SessionDefaults) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            selected_chat_model: defaults.chat_model.clone(),
            selected_caption_model: defaults.caption_model.clone(),
            active_character_key: None,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Append `message`, keeping history timestamps strictly increasing.
    pub fn push(&mut self, mut message: Message) -> &Message {
        if let Some(last) = self.history.last() {
            if message.timestamp <= last.timestamp {
                message.timestamp = last.timestamp + chrono::Duration::microseconds(1);
            }
        }
        self.history.push(message);
        &self.history[self.history.len() - 1]
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Model selection given to freshly created sessions.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub chat_model: String,
    pub caption_model: String,
}

struct SessionSlot {
    session: Arc<AsyncMutex<Session>>,
    last_seen: Mutex<Instant>,
}

impl SessionSlot {
    fn touch(&self) {
        if let Ok(mut seen) = self.last_seen.lock() {
            *seen = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .map(|seen| seen.elapsed())
            .unwrap_or_default()
    }
}

pub struct SessionStore {
    slots: RwLock<HashMap<String, Arc<SessionSlot>>>,
    defaults: SessionDefaults,
    idle_timeout: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionStore({} sessions)", self.len())
    }
}

impl SessionStore {
    pub fn new(defaults: SessionDefaults, idle_timeout: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            defaults,
            idle_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether `id` names a live session.  Does not count as activity.
    pub fn contains(&self, id: &str) -> bool {
        self.slots.read().map(|s| s.contains_key(id)).unwrap_or(false)
    }

    fn slot(&self, id: &str) -> Option<Arc<SessionSlot>> {
        let slot = self.slots.read().ok()?.get(id).cloned()?;
        slot.touch();
        Some(slot)
    }

    /// Return the session for `token`, creating a new one when the token is
    /// absent or unknown.  A client-chosen id is never adopted.
    ///
    /// The second element is `true` when a session was created.
    pub async fn get_or_create(&self, token: Option<&str>) -> Result<(Session, bool), ServerError> {
        if let Some(slot) = token.and_then(|t| self.slot(t)) {
            return Ok((slot.session.lock().await.clone(), false));
        }
        let (id, created) = self.resolve(None)?;
        Ok((self.get(&id).await?, created))
    }

    /// Like [`get_or_create`](Self::get_or_create) but only returns the id,
    /// without waiting on a session that is busy with another request.
    pub fn resolve(&self, token: Option<&str>) -> Result<(String, bool), ServerError> {
        if let Some(token) = token {
            if self.slot(token).is_some() {
                return Ok((token.to_owned(), false));
            }
        }

        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), &self.defaults);
        let slot = Arc::new(SessionSlot {
            session: Arc::new(AsyncMutex::new(session)),
            last_seen: Mutex::new(Instant::now()),
        });
        self.slots
            .write()
            .map_err(|_| ServerError::Internal("session map poisoned".into()))?
            .insert(id.clone(), slot);
        info!(session_id = %id, "session created");
        Ok((id, true))
    }

    /// Snapshot of the session `id`.
    pub async fn get(&self, id: &str) -> Result<Session, ServerError> {
        let slot = self.slot(id).ok_or_else(|| not_found(id))?;
        let session = slot.session.lock().await;
        Ok(session.clone())
    }

    /// Apply `mutator` to the session while holding its lock.
    pub async fn update<R>(
        &self,
        id: &str,
        mutator: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, ServerError> {
        let slot = self.slot(id).ok_or_else(|| not_found(id))?;
        let mut session = slot.session.lock().await;
        Ok(mutator(&mut session))
    }

    /// Exclusive access to the session for the duration of a multi-step
    /// operation.  Holding the guard marks the session as in flight, which
    /// protects it from the idle reaper.
    pub async fn lock(&self, id: &str) -> Result<OwnedMutexGuard<Session>, ServerError> {
        let slot = self.slot(id).ok_or_else(|| not_found(id))?;
        Ok(slot.session.clone().lock_owned().await)
    }

    /// Clear history while keeping model and character selection.
    pub async fn reset(&self, id: &str) -> Result<(), ServerError> {
        self.update(id, |s| s.clear_history()).await?;
        debug!(session_id = %id, "session history reset");
        Ok(())
    }

    /// Point every session whose active character is `from` at `to`.
    /// Returns how many sessions were moved.  Does not count as activity.
    pub async fn retarget_character(&self, from: &str, to: &str) -> usize {
        let slots: Vec<Arc<SessionSlot>> = match self.slots.read() {
            Ok(slots) => slots.values().cloned().collect(),
            Err(_) => return 0,
        };
        let mut moved = 0;
        for slot in slots {
            let mut session = slot.session.lock().await;
            if session.active_character_key.as_deref() == Some(from) {
                session.active_character_key = Some(to.to_owned());
                moved += 1;
            }
        }
        moved
    }

    pub fn remove(&self, id: &str) -> Result<(), ServerError> {
        let removed = self
            .slots
            .write()
            .map_err(|_| ServerError::Internal("session map poisoned".into()))?
            .remove(id);
        match removed {
            Some(_) => {
                info!(session_id = %id, "session removed");
                Ok(())
            }
            None => Err(not_found(id)),
        }
    }

    /// Drop sessions idle for longer than the configured timeout.  A session
    /// whose lock is held (a request in flight) is kept.
    pub fn reap_idle(&self) -> usize {
        let Ok(mut slots) = self.slots.write() else {
            return 0;
        };
        let before = slots.len();
        slots.retain(|_, slot| {
            slot.idle_for() < self.idle_timeout || slot.session.try_lock().is_err()
        });
        before - slots.len()
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` for the lifetime of
    /// the process.
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reaped = store.reap_idle();
                if reaped > 0 {
                    info!(reaped, remaining = store.len(), "reaped idle sessions");
                }
            }
        })
    }
}

fn not_found(id: &str) -> ServerError {
    ServerError::NotFound(format!("session {id} not found"))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
