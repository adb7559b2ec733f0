//! Server configuration: TOML file + CLI overrides.

use gatehouse_core::{GateError, GateResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between keep-alive pings on tunnel sessions; 0 disables them.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
    /// Backend origin for non-tunnel requests.
    pub proxy: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive: default_keepalive(),
            proxy: None,
        }
    }
}

/// `[identity]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentitySection {
    pub key_seed: Option<String>,
    pub key_file: Option<String>,
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    pub authfile: Option<String>,
    /// Inline `name:pass` credential.
    pub auth: Option<String>,
    pub auth_url: Option<String>,
    pub auth_url_ca_cert: Option<String>,
    #[serde(default)]
    pub auth_url_assume_unique_usernames: bool,
    /// Seconds to wait for the auth endpoint; 0 waits indefinitely.
    #[serde(default = "default_auth_url_timeout")]
    pub auth_url_timeout: u64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            authfile: None,
            auth: None,
            auth_url: None,
            auth_url_ca_cert: None,
            auth_url_assume_unique_usernames: false,
            auth_url_timeout: default_auth_url_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_keepalive() -> u64 {
    25
}
fn default_auth_url_timeout() -> u64 {
    30
}

/// Settings for the remote verification endpoint.
#[derive(Debug, Clone)]
pub struct RemoteAuthConfig {
    pub url: String,
    pub ca_cert: Option<PathBuf>,
    /// Strip `@domain` from asserted usernames before the ACL lookup.
    pub assume_unique_usernames: bool,
    /// `None` means no request timeout.
    pub timeout: Option<Duration>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Empty means a fresh random host key per run.
    pub key_seed: String,
    pub key_file: Option<PathBuf>,
    pub authfile: Option<PathBuf>,
    pub auth: Option<String>,
    pub remote_auth: Option<RemoteAuthConfig>,
    pub proxy: Option<String>,
    pub keepalive: Option<Duration>,
}

/// CLI values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub key_seed: Option<String>,
    pub key_file: Option<String>,
    pub authfile: Option<String>,
    pub auth: Option<String>,
    pub auth_url: Option<String>,
    pub auth_url_ca_cert: Option<String>,
    pub auth_url_assume_unique_usernames: bool,
    pub proxy: Option<String>,
    pub keepalive: Option<u64>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> GateResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| GateError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::merge(file_config, cli))
    }

    fn merge(file: ConfigFile, cli: CliOverrides) -> Self {
        let keepalive = cli.keepalive.unwrap_or(file.server.keepalive);
        let auth_url = cli.auth_url.or(file.auth.auth_url);
        let auth_url_timeout = file.auth.auth_url_timeout;
        let remote_auth = auth_url.map(|url| RemoteAuthConfig {
            url,
            ca_cert: cli
                .auth_url_ca_cert
                .or(file.auth.auth_url_ca_cert)
                .map(|p| expand_tilde_str(&p)),
            assume_unique_usernames: cli.auth_url_assume_unique_usernames
                || file.auth.auth_url_assume_unique_usernames,
            timeout: (auth_url_timeout > 0).then(|| Duration::from_secs(auth_url_timeout)),
        });

        Self {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            key_seed: cli.key_seed.or(file.identity.key_seed).unwrap_or_default(),
            key_file: cli
                .key_file
                .or(file.identity.key_file)
                .map(|p| expand_tilde_str(&p)),
            authfile: cli
                .authfile
                .or(file.auth.authfile)
                .map(|p| expand_tilde_str(&p)),
            auth: cli.auth.or(file.auth.auth),
            remote_auth,
            proxy: cli.proxy.or(file.server.proxy),
            keepalive: (keepalive > 0).then(|| Duration::from_secs(keepalive)),
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
