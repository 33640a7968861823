//! Chat session and history management
//!
//! `SessionManager` is an explicit store object: callers create it, load it
//! from a persistence backend and save it back. Nothing here is global, so
//! tests can run any number of independent stores side by side.
//!
//! Locking: the session map is behind a `RwLock`, each session behind its own
//! `Mutex`. Appends and pointer moves on one session are serialized by that
//! session's mutex; different sessions proceed independently.
//! Lock order is always map → session → current pointer.

pub mod persistence;

pub use persistence::{
    build_persistence, HistoryPersistence, InMemoryPersistence, JsonFilePersistence,
    PostgresPersistence,
};

use crate::error::AssistantError;
use crate::models::{ChatHistoryState, ChatMessage, ChatSession};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub const DEFAULT_SESSION_TITLE: &str = "New conversation";

type SessionHandle = Arc<Mutex<ChatSession>>;

pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    current: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
        }
    }

    /// Build a manager around an existing snapshot, repairing it first.
    pub fn from_state(mut state: ChatHistoryState) -> Self {
        for note in state.normalize() {
            warn!("Loaded chat history repaired: {}", note);
        }

        let sessions = state
            .sessions
            .into_iter()
            .map(|(id, session)| (id, Arc::new(Mutex::new(session))))
            .collect();

        Self {
            sessions: RwLock::new(sessions),
            current: RwLock::new(state.current_session_id),
        }
    }

    // =============================
    // Lifecycle
    // =============================

    pub async fn load_from(persistence: &dyn HistoryPersistence, scope: &str) -> Result<Self> {
        match persistence.load(scope).await? {
            Some(state) => {
                info!(scope, sessions = state.sessions.len(), "Chat history loaded");
                Ok(Self::from_state(state))
            }
            None => {
                info!(scope, "No stored chat history, starting empty");
                Ok(Self::new())
            }
        }
    }

    pub async fn save_to(&self, persistence: &dyn HistoryPersistence, scope: &str) -> Result<()> {
        let state = self.snapshot().await;
        persistence.save(scope, &state).await?;
        debug!(scope, sessions = state.sessions.len(), "Chat history saved");
        Ok(())
    }

    /// Point-in-time copy of every session and the current pointer.
    pub async fn snapshot(&self) -> ChatHistoryState {
        let sessions = self.sessions.read().await;
        let mut copied = HashMap::with_capacity(sessions.len());
        for (id, handle) in sessions.iter() {
            copied.insert(id.clone(), handle.lock().await.clone());
        }
        let current_session_id = self.current.read().await.clone();

        ChatHistoryState {
            current_session_id,
            sessions: copied,
        }
    }

    // =============================
    // Sessions
    // =============================

    pub async fn create_session(&self) -> ChatSession {
        self.create_session_titled(DEFAULT_SESSION_TITLE).await
    }

    pub async fn create_session_titled(&self, title: &str) -> ChatSession {
        let session = ChatSession::new(title, Utc::now());
        let copy = session.clone();

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), Arc::new(Mutex::new(session)));

        info!(session_id = %copy.id, "Chat session created");
        copy
    }

    pub async fn get_session(&self, session_id: &str) -> Result<ChatSession> {
        let sessions = self.sessions.read().await;
        let handle = lookup(&sessions, session_id)?;
        let session = handle.lock().await.clone();
        Ok(session)
    }

    /// Sessions ordered by most recent activity first.
    pub async fn list_sessions(&self) -> Vec<ChatSession> {
        let sessions = self.sessions.read().await;
        let mut listed = Vec::with_capacity(sessions.len());
        for handle in sessions.values() {
            listed.push(handle.lock().await.clone());
        }
        listed.sort_by(|a, b| b.last_updated().cmp(&a.last_updated()));
        listed
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(session_id).is_none() {
            return Err(AssistantError::SessionNotFound(session_id.to_string()));
        }

        let mut current = self.current.write().await;
        if current.as_deref() == Some(session_id) {
            *current = None;
        }

        info!(session_id, "Chat session deleted");
        Ok(())
    }

    // =============================
    // Messages
    // =============================

    /// Append a message and return it as stored, with its 1-based
    /// `conversation_count` stamped. Unknown ids fail without touching any state.
    pub async fn append_message(&self, session_id: &str, message: ChatMessage) -> Result<ChatMessage> {
        let sessions = self.sessions.read().await;
        let handle = lookup(&sessions, session_id)?;

        let mut session = handle.lock().await;
        let stored = session.push(message, Utc::now()).clone();

        debug!(
            session_id,
            ordinal = ?stored.conversation_count(),
            role = ?stored.role,
            "Message appended"
        );
        Ok(stored)
    }

    pub async fn set_wallet_address(&self, session_id: &str, address: &str) -> Result<()> {
        let sessions = self.sessions.read().await;
        let handle = lookup(&sessions, session_id)?;

        let mut session = handle.lock().await;
        session.wallet_address = Some(address.to_string());
        session.touch(Utc::now());
        Ok(())
    }

    // =============================
    // Current Session
    // =============================

    pub async fn set_current(&self, session_id: &str) -> Result<()> {
        let sessions = self.sessions.read().await;
        let handle = lookup(&sessions, session_id)?;

        let _session = handle.lock().await;
        *self.current.write().await = Some(session_id.to_string());

        debug!(session_id, "Current session set");
        Ok(())
    }

    /// The current session, or a new one titled `title` that becomes current.
    /// Holding the map write lock makes the check and the creation one step,
    /// so concurrent first turns share a single session.
    pub async fn current_or_create(&self, title: &str) -> ChatSession {
        let mut sessions = self.sessions.write().await;

        let existing = {
            let current = self.current.read().await;
            current.as_ref().and_then(|id| sessions.get(id).cloned())
        };
        if let Some(handle) = existing {
            let session = handle.lock().await.clone();
            return session;
        }

        let session = ChatSession::new(title, Utc::now());
        let copy = session.clone();
        sessions.insert(session.id.clone(), Arc::new(Mutex::new(session)));
        *self.current.write().await = Some(copy.id.clone());

        info!(session_id = %copy.id, "Chat session created and made current");
        copy
    }

    pub async fn current_session_id(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    pub async fn get_current(&self) -> Option<ChatSession> {
        let id = self.current_session_id().await?;
        self.get_session(&id).await.ok()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(sessions: &'a HashMap<String, SessionHandle>, session_id: &str) -> Result<&'a SessionHandle> {
    sessions
        .get(session_id)
        .ok_or_else(|| AssistantError::SessionNotFound(session_id.to_string()))
}
