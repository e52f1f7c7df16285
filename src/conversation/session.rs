/// Per-session conversation state storage
use super::{ConversationState, SessionKey};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Capability over per-session state, used only by the provisioner
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current state for `key`, creating an idle one on first use
    async fn get_or_create(&self, key: &str) -> ConversationState;

    async fn set(&self, key: &str, state: ConversationState);

    /// Reset `key` to idle
    async fn clear(&self, key: &str);
}

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, ConversationState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, key: &str) -> ConversationState {
        if let Some(state) = self.sessions.read().await.get(key) {
            return state.clone();
        }

        self.sessions
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    async fn set(&self, key: &str, state: ConversationState) {
        self.sessions.write().await.insert(key.to_string(), state);
    }

    async fn clear(&self, key: &str) {
        self.set(key, ConversationState::default()).await;
    }
}
