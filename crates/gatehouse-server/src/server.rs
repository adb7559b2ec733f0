//! Main server: bootstrap and connection dispatch.
//!
//! Every inbound HTTP request lands in [`dispatch`]. A WebSocket upgrade
//! carrying the protocol version as its subprotocol becomes a tunnel
//! session; anything else goes to the reverse proxy when one is configured,
//! and otherwise to the health/version endpoints.

use crate::auth::{Admission, Authenticator, LocalAuth, RemoteUrlAuth};
use crate::config::ServerConfig;
use crate::handshake;
use crate::proxy::ReverseProxy;
use crate::session::SessionRegistry;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use gatehouse_core::{
    parse_auth, CredentialStore, GateError, GateResult, HostIdentity, JsonFileLoader, User,
    ALLOW_ALL, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// The gatehouse server.
pub struct GatehouseServer {
    config: ServerConfig,
    identity: HostIdentity,
    users: Arc<CredentialStore>,
    sessions: Arc<SessionRegistry>,
    authenticator: Arc<dyn Authenticator>,
    proxy: Option<ReverseProxy>,
    /// Connections accepted so far, for `session#N` log prefixes.
    session_count: AtomicU64,
}

impl GatehouseServer {
    /// Build the server from resolved configuration. Any error here is
    /// fatal to startup.
    pub async fn new(config: ServerConfig) -> GateResult<Self> {
        let users = Arc::new(match &config.authfile {
            Some(path) => CredentialStore::with_loader(Arc::new(JsonFileLoader::new(path))),
            None => CredentialStore::new(),
        });
        if config.authfile.is_some() {
            users.load().await?;
        }
        if let Some(auth) = &config.auth {
            let (name, pass) = parse_auth(auth);
            if !name.is_empty() {
                users.add_user(&name, &pass, &[ALLOW_ALL]).await?;
            }
        }

        let identity = match &config.key_file {
            Some(path) => HostIdentity::from_file(path)?,
            None => HostIdentity::generate(&config.key_seed)?,
        };

        let sessions = Arc::new(SessionRegistry::new());
        let authenticator: Arc<dyn Authenticator> = match &config.remote_auth {
            Some(remote) => Arc::new(RemoteUrlAuth::new(
                remote,
                users.clone(),
                sessions.clone(),
            )?),
            None => Arc::new(LocalAuth::new(users.clone(), sessions.clone())),
        };

        let proxy = config.proxy.as_deref().map(ReverseProxy::new).transpose()?;

        Ok(Self {
            config,
            identity,
            users,
            sessions,
            authenticator,
            proxy,
            session_count: AtomicU64::new(0),
        })
    }

    /// Host key fingerprint clients should pin.
    pub fn fingerprint(&self) -> &str {
        self.identity.fingerprint()
    }

    /// Add or replace a user. Patterns are compiled first; on error the
    /// store is unchanged.
    pub async fn add_user(&self, name: &str, pass: &str, addrs: &[&str]) -> GateResult<()> {
        self.users.add_user(name, pass, addrs).await
    }

    pub async fn delete_user(&self, name: &str) -> bool {
        self.users.delete(name).await
    }

    /// Replace every user at once.
    pub async fn reset_users(&self, users: Vec<User>) {
        self.users.reset(users).await
    }

    pub fn users(&self) -> &Arc<CredentialStore> {
        &self.users
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Bind `host:port` from the configuration and serve until the listener
    /// fails.
    pub async fn run(self: Arc<Self>) -> GateResult<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GateError::Transport(format!("failed to listen on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> GateResult<()> {
        info!(fingerprint = %self.fingerprint(), "host key");
        if !self.users.is_empty().await {
            info!("user authentication enabled");
        }
        info!(strategy = self.authenticator.name(), "credential verification");
        if let Some(proxy) = &self.proxy {
            info!(backend = proxy.authority(), "reverse proxy enabled");
        }
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "listening");
        }

        let app = Router::new().fallback(dispatch).with_state(self);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| GateError::Transport(format!("server error: {e}")))
    }

    /// Drive one upgraded tunnel connection to completion. The registry
    /// entry for the connection is removed however it ends.
    async fn handle_tunnel(self: Arc<Self>, mut socket: WebSocket, remote: SocketAddr) {
        let ordinal = self.session_count.fetch_add(1, Ordering::Relaxed) + 1;
        let session_id = handshake::generate_session_id();
        debug!(session = ordinal, remote = %remote, "handshaking");

        let result = self
            .tunnel_session(&mut socket, &session_id, ordinal)
            .await;
        self.sessions.remove(&session_id).await;

        match result {
            Ok(()) => info!(session = ordinal, "closed"),
            Err(GateError::AuthenticationFailure) => {
                info!(session = ordinal, remote = %remote, "authentication rejected")
            }
            Err(e) => debug!(session = ordinal, error = %e, "session ended"),
        }
    }

    async fn tunnel_session(
        &self,
        socket: &mut WebSocket,
        session_id: &str,
        ordinal: u64,
    ) -> GateResult<()> {
        let admission = handshake::authenticate(
            socket,
            &self.identity,
            self.authenticator.as_ref(),
            session_id,
        )
        .await?;

        match &admission {
            Admission::Anonymous => info!(session = ordinal, "open (anonymous)"),
            Admission::User(user) => info!(session = ordinal, user = %user.name, "open"),
        }

        handshake::hold_open(socket, self.config.keepalive).await
    }
}

/// Route one inbound request.
async fn dispatch(
    State(server): State<Arc<GatehouseServer>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    if is_websocket_upgrade(req.headers()) {
        let protocol = req
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if offers_protocol(&protocol) {
            return upgrade_tunnel(server, req, remote).await;
        }
        info!(remote = %remote, protocol = %protocol, "ignored client connection using unexpected protocol");
    }

    if let Some(proxy) = &server.proxy {
        return proxy.forward(req, Some(remote)).await;
    }

    match req.uri().path() {
        "/health" => (StatusCode::OK, "OK\n").into_response(),
        "/version" => env!("CARGO_PKG_VERSION").into_response(),
        _ => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn upgrade_tunnel(server: Arc<GatehouseServer>, req: Request, remote: SocketAddr) -> Response {
    let (mut parts, _body) = req.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    ws.protocols([PROTOCOL_VERSION])
        .on_upgrade(move |socket| server.handle_tunnel(socket, remote))
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn offers_protocol(header_value: &str) -> bool {
    header_value
        .split(',')
        .any(|p| p.trim() == PROTOCOL_VERSION)
}
