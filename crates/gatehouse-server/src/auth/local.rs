//! Password check against the local credential store.

use super::{Admission, Authenticator};
use crate::session::SessionRegistry;
use async_trait::async_trait;
use gatehouse_core::{CredentialStore, GateError, GateResult, Lookup};
use std::sync::Arc;
use tracing::debug;

pub struct LocalAuth {
    users: Arc<CredentialStore>,
    sessions: Arc<SessionRegistry>,
}

impl LocalAuth {
    pub fn new(users: Arc<CredentialStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self { users, sessions }
    }
}

#[async_trait]
impl Authenticator for LocalAuth {
    async fn verify(
        &self,
        username: &str,
        password: &str,
        session_id: &str,
    ) -> GateResult<Admission> {
        match self.users.lookup(username).await {
            // No users configured: open auth.
            Lookup::Empty => Ok(Admission::Anonymous),
            // TODO: switch to a constant-time comparison once stored passwords are hashed.
            Lookup::Found(user) if user.pass == password => {
                self.sessions.set(session_id, user.clone()).await;
                Ok(Admission::User(user))
            }
            _ => {
                debug!(username, "login failed");
                Err(GateError::AuthenticationFailure)
            }
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::ALLOW_ALL;

    async fn setup(users: &[(&str, &str)]) -> (Arc<dyn Authenticator>, Arc<SessionRegistry>) {
        let store = Arc::new(CredentialStore::new());
        for (name, pass) in users {
            store.add_user(name, pass, &[ALLOW_ALL]).await.unwrap();
        }
        let sessions = Arc::new(SessionRegistry::new());
        let auth: Arc<dyn Authenticator> = Arc::new(LocalAuth::new(store, sessions.clone()));
        (auth, sessions)
    }

    #[tokio::test]
    async fn empty_store_admits_anyone() {
        let (auth, sessions) = setup(&[]).await;
        let admission = auth.verify("whoever", "whatever", "s1").await.unwrap();
        assert!(matches!(admission, Admission::Anonymous));
        assert_eq!(sessions.len().await, 0);
    }

    #[tokio::test]
    async fn correct_password_binds_session() {
        let (auth, sessions) = setup(&[("alice", "secret")]).await;
        let admission = auth.verify("alice", "secret", "s1").await.unwrap();
        match admission {
            Admission::User(u) => assert_eq!(u.name, "alice"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sessions.get("s1").await.unwrap().name, "alice");
    }

    #[tokio::test]
    async fn wrong_password_leaves_no_entry() {
        let (auth, sessions) = setup(&[("alice", "secret")]).await;
        let err = auth.verify("alice", "wrong", "s1").await.unwrap_err();
        assert!(matches!(err, GateError::AuthenticationFailure));
        assert!(sessions.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn comparison_is_case_sensitive_and_exact() {
        let (auth, _) = setup(&[("alice", "secret")]).await;
        assert!(auth.verify("alice", "Secret", "s1").await.is_err());
        assert!(auth.verify("alice", "secret ", "s2").await.is_err());
        assert!(auth.verify("Alice", "secret", "s3").await.is_err());
    }

    #[tokio::test]
    async fn unknown_user_fails() {
        let (auth, sessions) = setup(&[("alice", "secret")]).await;
        assert!(auth.verify("mallory", "secret", "s1").await.is_err());
        assert_eq!(sessions.len().await, 0);
    }

    #[tokio::test]
    async fn rejection_does_not_echo_credentials() {
        let (auth, _) = setup(&[("alice", "secret")]).await;
        let msg = auth.verify("alice", "hunter2", "s1").await.unwrap_err().to_string();
        assert!(!msg.contains("alice"));
        assert!(!msg.contains("hunter2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_verifies_bind_every_session() {
        let (auth, sessions) = setup(&[("alice", "secret"), ("bob", "pw")]).await;
        let mut handles = Vec::new();
        for i in 0..100 {
            let auth = auth.clone();
            handles.push(tokio::spawn(async move {
                let (user, pass) = if i % 2 == 0 { ("alice", "secret") } else { ("bob", "pw") };
                auth.verify(user, pass, &format!("session-{i}")).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(sessions.len().await, 100);
        assert_eq!(sessions.get("session-42").await.unwrap().name, "alice");
        assert_eq!(sessions.get("session-43").await.unwrap().name, "bob");
    }
}
