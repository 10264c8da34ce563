//! Identity store backing the authentication handshake

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::error::{ChatError, Result};
use crate::protocol::messages::UserId;

/// Maximum accepted username length
const MAX_USERNAME_LEN: usize = 50;

/// Known identities, user id -> username
///
/// Identities seeded through `register` are fixed; unknown ids presenting
/// a well-formed username self-register on first authentication.
pub struct UserDirectory {
    users: RwLock<HashMap<UserId, String>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a known identity
    pub async fn register(&self, user_id: UserId, username: impl Into<String>) {
        self.users.write().await.insert(user_id, username.into());
    }

    /// Validate an identity claim from an `auth` frame
    pub async fn validate(&self, user_id: UserId, username: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(ChatError::authentication("invalid username"));
        }

        let mut users = self.users.write().await;
        match users.get(&user_id) {
            Some(known) if known == username => Ok(()),
            Some(_) => Err(ChatError::authentication(format!(
                "identity mismatch for user {}",
                user_id
            ))),
            None => {
                users.insert(user_id, username.to_string());
                Ok(())
            }
        }
    }

    /// Look up a username
    pub async fn username(&self, user_id: UserId) -> Option<String> {
        self.users.read().await.get(&user_id).cloned()
    }

    /// Get registered user count
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_user_self_registers() {
        let directory = UserDirectory::new();

        assert!(directory.validate(1, "alice").await.is_ok());
        assert_eq!(directory.username(1).await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_identity_mismatch_rejected() {
        let directory = UserDirectory::new();
        directory.register(1, "alice").await;

        assert!(directory.validate(1, "alice").await.is_ok());

        let err = directory.validate(1, "mallory").await.unwrap_err();
        assert!(matches!(err, ChatError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_malformed_usernames_rejected() {
        let directory = UserDirectory::new();

        assert!(directory.validate(1, "   ").await.is_err());
        assert!(directory.validate(2, &"x".repeat(51)).await.is_err());
        assert_eq!(directory.user_count().await, 0);
    }
}
