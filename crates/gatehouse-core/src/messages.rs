//! Tunnel handshake messages.
//!
//! Flow, one binary WebSocket frame per message:
//! 1. Server sends `ServerHello` with the session ID and a host-key signature
//! 2. Client sends `Auth`
//! 3. Server sends `AuthOk` or `AuthFail`

use serde::{Deserialize, Serialize};

/// Protocol version, also the required `Sec-WebSocket-Protocol` value.
pub const PROTOCOL_VERSION: &str = "gatehouse-v1";

/// Reason sent with every rejection, whatever the cause.
pub const AUTH_FAIL_REASON: &str = "invalid authentication";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    ServerHello(ServerHelloPayload),
    Auth(AuthPayload),
    AuthOk(AuthOkPayload),
    AuthFail(AuthFailPayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerHelloPayload {
    pub version: String,
    pub session_id: String,
    /// Raw Ed25519 public key.
    pub host_key: Vec<u8>,
    pub fingerprint: String,
    /// Signature over the session transcript.
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPayload")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthOkPayload {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailPayload {
    pub reason: String,
}

impl HandshakeMessage {
    pub fn auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        HandshakeMessage::Auth(AuthPayload {
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn auth_ok(session_id: &str) -> Self {
        HandshakeMessage::AuthOk(AuthOkPayload {
            session_id: session_id.to_string(),
        })
    }

    /// The only rejection the server ever sends.
    pub fn auth_fail() -> Self {
        HandshakeMessage::AuthFail(AuthFailPayload {
            reason: AUTH_FAIL_REASON.to_string(),
        })
    }
}
