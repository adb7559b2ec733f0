//! Tunnel admission handshake.
//!
//! Runs over binary WebSocket frames carrying CBOR messages:
//! 1. Server sends SERVER_HELLO (session ID, host key, fingerprint, signature)
//! 2. Client sends AUTH (username + password)
//! 3. Server sends AUTH_OK or AUTH_FAIL

use crate::auth::{Admission, Authenticator};
use axum::extract::ws::{Message, WebSocket};
use gatehouse_core::messages::ServerHelloPayload;
use gatehouse_core::{
    cbor_decode, cbor_encode, GateError, GateResult, HandshakeMessage, HostIdentity,
    PROTOCOL_VERSION,
};
use rand::Rng;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Largest handshake frame accepted from a client.
const MAX_HANDSHAKE_FRAME: usize = 64 * 1024;

/// Build the SERVER_HELLO for `session_id`, signed by the host key.
pub fn server_hello(identity: &HostIdentity, session_id: &str) -> HandshakeMessage {
    HandshakeMessage::ServerHello(ServerHelloPayload {
        version: PROTOCOL_VERSION.to_string(),
        session_id: session_id.to_string(),
        host_key: identity.public_key().to_vec(),
        fingerprint: identity.fingerprint().to_string(),
        signature: identity.sign(session_id),
    })
}

/// Run the handshake for one connection. On success AUTH_OK has been sent
/// and the session is bound (unless admitted anonymously).
pub async fn authenticate(
    socket: &mut WebSocket,
    identity: &HostIdentity,
    authenticator: &dyn Authenticator,
    session_id: &str,
) -> GateResult<Admission> {
    send(socket, &server_hello(identity, session_id)).await?;

    let auth = match recv(socket).await? {
        Some(HandshakeMessage::Auth(auth)) => auth,
        Some(_) => {
            let _ = send(socket, &HandshakeMessage::auth_fail()).await;
            return Err(GateError::InvalidMessage("expected AUTH message".into()));
        }
        None => {
            return Err(GateError::Transport(
                "connection closed before AUTH".into(),
            ))
        }
    };

    debug!(username = %auth.username, strategy = authenticator.name(), "received AUTH");

    match authenticator
        .verify(&auth.username, &auth.password, session_id)
        .await
    {
        Ok(admission) => {
            send(socket, &HandshakeMessage::auth_ok(session_id)).await?;
            Ok(admission)
        }
        Err(e) => {
            let _ = send(socket, &HandshakeMessage::auth_fail()).await;
            Err(e)
        }
    }
}

/// Hold an admitted connection open until the peer leaves, pinging every
/// `keepalive` when set. Payload frames belong to the tunnel layer and are
/// not interpreted here.
pub async fn hold_open(socket: &mut WebSocket, keepalive: Option<Duration>) -> GateResult<()> {
    let mut ticker = keepalive.map(|period| {
        let mut t = tokio::time::interval_at(Instant::now() + period, period);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        t
    });

    loop {
        tokio::select! {
            _ = next_tick(&mut ticker) => {
                socket
                    .send(Message::Ping(Default::default()))
                    .await
                    .map_err(|e| GateError::Transport(format!("keepalive failed: {e}")))?;
            }
            msg = socket.recv() => match msg {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(GateError::Transport(e.to_string())),
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Generate a random session ID.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

async fn send(socket: &mut WebSocket, msg: &HandshakeMessage) -> GateResult<()> {
    let frame = cbor_encode(msg)?;
    socket
        .send(Message::Binary(frame.into()))
        .await
        .map_err(|e| GateError::Transport(e.to_string()))
}

/// Next handshake message, skipping control and text frames. `None` once
/// the peer closes.
async fn recv(socket: &mut WebSocket) -> GateResult<Option<HandshakeMessage>> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(data))) => {
                if data.len() > MAX_HANDSHAKE_FRAME {
                    return Err(GateError::InvalidMessage(format!(
                        "handshake frame too large: {} bytes",
                        data.len()
                    )));
                }
                return cbor_decode(&data).map(Some);
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(GateError::Transport(e.to_string())),
        }
    }
}
