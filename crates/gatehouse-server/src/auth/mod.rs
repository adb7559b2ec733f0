//! Authentication strategies.
//!
//! The handshake driver holds one `Arc<dyn Authenticator>`, chosen when the
//! server is built: [`LocalAuth`] checks the credential store directly,
//! [`RemoteUrlAuth`] asks a remote endpoint and then takes the ACL from the
//! credential store. Either way a successful check binds the session in the
//! [`SessionRegistry`](crate::session::SessionRegistry).

pub mod local;
pub mod remote;

pub use local::LocalAuth;
pub use remote::RemoteUrlAuth;

use async_trait::async_trait;
use gatehouse_core::{GateResult, User};
use std::sync::Arc;

/// Outcome of a successful verification.
#[derive(Debug, Clone)]
pub enum Admission {
    /// No credentials are configured; nothing was bound to the session.
    Anonymous,
    /// The session was bound to this identity.
    User(Arc<User>),
}

/// Credential-verification capability handed to the handshake.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify `username`/`password` for the connection identified by
    /// `session_id`. Every failure is `GateError::AuthenticationFailure`.
    async fn verify(&self, username: &str, password: &str, session_id: &str)
        -> GateResult<Admission>;

    /// Short strategy name for logs.
    fn name(&self) -> &'static str;
}
