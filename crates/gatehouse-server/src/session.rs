//! Registry of live tunnel sessions and the identity bound to each.
//!
//! Written by the authentication strategies, read by whatever dispatches
//! tunnel traffic, and cleared by the handshake driver when the connection
//! ends.

use gatehouse_core::User;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Session ID → authenticated identity.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<User>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `session_id` to `user`. A second bind for the same ID replaces
    /// the first.
    pub async fn set(&self, session_id: &str, user: Arc<User>) {
        let mut sessions = self.sessions.write().await;
        if sessions.insert(session_id.to_string(), user).is_some() {
            debug!(session_id, "session rebound");
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<User>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<User>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Whether the session may reach `addr`. A session with no bound
    /// identity was admitted anonymously and is unrestricted.
    pub async fn authorize(&self, session_id: &str, addr: &str) -> bool {
        match self.sessions.read().await.get(session_id) {
            Some(user) => user.has_access(addr),
            None => true,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
