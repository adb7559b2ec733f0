//! Credential check against a remote HTTP endpoint.
//!
//! The endpoint only answers "is this credential valid": any 2xx response
//! with a JSON object body is a yes. What the session may reach still comes
//! from the local credential store, keyed by the (optionally `@`-stripped)
//! username. A name missing from the store triggers one reload of the store
//! before giving up.

use super::{Admission, Authenticator};
use crate::config::RemoteAuthConfig;
use crate::session::SessionRegistry;
use async_trait::async_trait;
use gatehouse_core::{CredentialStore, GateError, GateResult, User};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Body POSTed to the endpoint.
#[derive(Serialize)]
struct RemoteAuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

pub struct RemoteUrlAuth {
    client: reqwest::Client,
    url: String,
    assume_unique_usernames: bool,
    users: Arc<CredentialStore>,
    sessions: Arc<SessionRegistry>,
}

impl RemoteUrlAuth {
    /// Build the strategy and its HTTP client. A CA file that cannot be read
    /// or holds no certificates is an error.
    pub fn new(
        config: &RemoteAuthConfig,
        users: Arc<CredentialStore>,
        sessions: Arc<SessionRegistry>,
    ) -> GateResult<Self> {
        Ok(Self {
            client: build_client(config)?,
            url: config.url.clone(),
            assume_unique_usernames: config.assume_unique_usernames,
            users,
            sessions,
        })
    }

    /// Name used for the ACL lookup.
    fn acl_name<'a>(&self, username: &'a str) -> &'a str {
        if self.assume_unique_usernames {
            username.split_once('@').map_or(username, |(name, _)| name)
        } else {
            username
        }
    }

    async fn check_remote(&self, username: &str, password: &str) -> GateResult<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&RemoteAuthRequest { username, password })
            .send()
            .await
            .map_err(|e| GateError::Transport(format!("auth request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GateError::InvalidMessage(format!(
                "auth endpoint returned {status}"
            )));
        }

        resp.json::<serde_json::Map<String, serde_json::Value>>()
            .await
            .map_err(|e| GateError::InvalidMessage(format!("malformed auth response: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for RemoteUrlAuth {
    async fn verify(
        &self,
        username: &str,
        password: &str,
        session_id: &str,
    ) -> GateResult<Admission> {
        if let Err(e) = self.check_remote(username, password).await {
            debug!(username, error = %e, "remote authentication failed");
            return Err(GateError::AuthenticationFailure);
        }

        let acl_name = self.acl_name(username);
        let acl = match self.users.get(acl_name).await {
            Some(acl) => acl,
            None => {
                info!(username = acl_name, "user not found, reloading credentials");
                if let Err(e) = self.users.reload().await {
                    debug!(error = %e, "credential reload failed");
                }
                match self.users.get(acl_name).await {
                    Some(acl) => acl,
                    None => {
                        debug!(username = acl_name, "user not found");
                        return Err(GateError::AuthenticationFailure);
                    }
                }
            }
        };

        let user = Arc::new(User {
            name: username.to_string(),
            pass: password.to_string(),
            addrs: acl.addrs.clone(),
        });
        self.sessions.set(session_id, user.clone()).await;
        Ok(Admission::User(user))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// HTTP client trusting the system roots plus the optional CA file.
fn build_client(config: &RemoteAuthConfig) -> GateResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(path) = &config.ca_cert {
        for cert in load_ca_certs(path)? {
            builder = builder.add_root_certificate(cert);
        }
        info!(path = %path.display(), "added CA certificate for auth URL");
    }
    builder
        .build()
        .map_err(|e| GateError::Trust(format!("failed to build auth client: {e}")))
}

fn load_ca_certs(path: &Path) -> GateResult<Vec<reqwest::Certificate>> {
    let pem = std::fs::read(path)
        .map_err(|e| GateError::Trust(format!("cannot read CA cert {}: {e}", path.display())))?;

    let ders = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GateError::Trust(format!("cannot parse CA cert {}: {e}", path.display())))?;
    if ders.is_empty() {
        return Err(GateError::Trust(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    ders.iter()
        .map(|der| {
            reqwest::Certificate::from_der(der.as_ref())
                .map_err(|e| GateError::Trust(format!("invalid CA cert: {e}")))
        })
        .collect()
}
