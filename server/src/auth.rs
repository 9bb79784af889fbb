//! Token authentication boundary consumed at websocket upgrade, and the
//! in-memory session store backing it.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session store failure: {0}")]
    Store(String),
}

/// Resolves a bearer token to a user id.
///
/// `Ok(None)` means no such session. The error leg is reserved for
/// backing-store failures; the in-memory store never produces one.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Option<String>, AuthError>;
}

/// In-memory token store mapping session tokens to user ids.
#[derive(Default)]
pub struct MemorySessions {
    tokens: RwLock<HashMap<String, String>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh random token for `user_id` and returns it.
    pub fn create(&self, user_id: &str) -> String {
        let mut buf = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut buf);
        let token: String = buf.iter().map(|byte| format!("{byte:02x}")).collect();

        self.insert(&token, user_id);
        token
    }

    /// Registers a caller-chosen token, for operator-seeded sessions.
    pub fn insert(&self, token: &str, user_id: &str) {
        let mut tokens = self
            .tokens
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tokens.insert(token.to_string(), user_id.to_string());
    }

    pub fn resolve(&self, token: &str) -> Option<String> {
        let tokens = self
            .tokens
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tokens.get(token).cloned()
    }

    pub fn revoke(&self, token: &str) {
        let mut tokens = self
            .tokens
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tokens.remove(token);
    }
}

impl Authenticator for MemorySessions {
    fn authenticate(&self, token: &str) -> Result<Option<String>, AuthError> {
        if token.is_empty() {
            return Ok(None);
        }
        Ok(self.resolve(token))
    }
}
