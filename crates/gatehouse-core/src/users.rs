//! Credential store: named users, their passwords and the address patterns
//! that scope what a tunnel session may reach.
//!
//! The store is shared by every connection task. All mutation goes through
//! the store's own write lock, and lookups for authentication take a single
//! read lock so they never observe a half-applied update.
//!
//! The backing file is JSON, one record per `"name:pass"` key:
//!
//! ```json
//! {
//!   "alice:secret": [""],
//!   "bob:hunter2": ["^10\\.0\\.0\\.\\d+:22$", "^db\\.internal:5432$"]
//! }
//! ```
//!
//! An empty pattern or `"*"` allows every address.

use crate::error::{GateError, GateResult};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Pattern that matches every address.
pub const ALLOW_ALL: &str = "";

/// A user with compiled address patterns.
#[derive(Clone)]
pub struct User {
    pub name: String,
    pub pass: String,
    pub addrs: Vec<Regex>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let addrs: Vec<&str> = self.addrs.iter().map(Regex::as_str).collect();
        f.debug_struct("User")
            .field("name", &self.name)
            .field("addrs", &addrs)
            .finish_non_exhaustive()
    }
}

impl User {
    /// Build a user, compiling every address pattern. Fails on the first
    /// pattern that does not compile.
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        pass: impl Into<String>,
        patterns: &[S],
    ) -> GateResult<Self> {
        let addrs = patterns
            .iter()
            .map(|p| compile_pattern(p.as_ref()))
            .collect::<GateResult<Vec<_>>>()?;
        Ok(Self {
            name: name.into(),
            pass: pass.into(),
            addrs,
        })
    }

    /// Whether any of this user's patterns matches `addr`.
    pub fn has_access(&self, addr: &str) -> bool {
        self.addrs.iter().any(|re| re.is_match(addr))
    }
}

fn compile_pattern(pattern: &str) -> GateResult<Regex> {
    if pattern == "*" {
        return Ok(Regex::new(ALLOW_ALL)?);
    }
    Ok(Regex::new(pattern)?)
}

/// Split an inline `name:pass` credential on the first `:`.
///
/// Returns empty strings when there is no `:`.
pub fn parse_auth(auth: &str) -> (String, String) {
    match auth.split_once(':') {
        Some((name, pass)) => (name.to_string(), pass.to_string()),
        None => (String::new(), String::new()),
    }
}

/// Source of user records for a [`CredentialStore`]. `load` may block; the
/// store runs it on the blocking thread pool.
pub trait CredentialLoader: Send + Sync {
    /// Read every record from the backing source.
    fn load(&self) -> GateResult<Vec<User>>;
}

/// Loads users from a JSON credential file.
#[derive(Debug, Clone)]
pub struct JsonFileLoader {
    path: PathBuf,
}

impl JsonFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialLoader for JsonFileLoader {
    fn load(&self) -> GateResult<Vec<User>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            GateError::Credentials(format!("cannot read {}: {e}", self.path.display()))
        })?;
        parse_users(&content)
    }
}

/// Parse the JSON credential format.
pub fn parse_users(content: &str) -> GateResult<Vec<User>> {
    let raw: HashMap<String, Vec<String>> = serde_json::from_str(content)
        .map_err(|e| GateError::Credentials(format!("invalid JSON: {e}")))?;

    let mut users = Vec::with_capacity(raw.len());
    let mut seen = HashSet::with_capacity(raw.len());
    for (auth, patterns) in raw {
        let (name, pass) = parse_auth(&auth);
        if name.is_empty() {
            return Err(GateError::Credentials("invalid user:pass string".into()));
        }
        if !seen.insert(name.clone()) {
            return Err(GateError::Credentials(format!("duplicate user {name}")));
        }
        users.push(User::new(name, pass, &patterns)?);
    }
    Ok(users)
}

/// Result of a single consistent lookup against the store.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// The store holds no users at all.
    Empty,
    Found(Arc<User>),
    Missing,
}

/// In-memory user index keyed by name.
pub struct CredentialStore {
    users: RwLock<HashMap<String, Arc<User>>>,
    loader: Option<Arc<dyn CredentialLoader>>,
}

impl CredentialStore {
    /// Create an empty store with no backing source.
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            loader: None,
        }
    }

    /// Create an empty store backed by `loader` for [`load`](Self::load)
    /// and [`reload`](Self::reload).
    pub fn with_loader(loader: Arc<dyn CredentialLoader>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            loader: Some(loader),
        }
    }

    /// Compile `patterns` and add the user. If any pattern is invalid the
    /// store is left untouched. An existing user with the same name is
    /// replaced.
    pub async fn add_user<S: AsRef<str>>(
        &self,
        name: &str,
        pass: &str,
        patterns: &[S],
    ) -> GateResult<()> {
        let user = User::new(name, pass, patterns)?;
        self.insert(user).await;
        Ok(())
    }

    /// Insert an already compiled user, replacing any user with the same name.
    pub async fn insert(&self, user: User) {
        let mut users = self.users.write().await;
        if users.insert(user.name.clone(), Arc::new(user)).is_some() {
            debug!("replaced existing user");
        }
    }

    pub async fn delete(&self, name: &str) -> bool {
        self.users.write().await.remove(name).is_some()
    }

    /// Replace the whole user set. An empty vector clears the store.
    pub async fn reset(&self, new_users: Vec<User>) {
        let mut users = self.users.write().await;
        users.clear();
        for user in new_users {
            users.insert(user.name.clone(), Arc::new(user));
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<User>> {
        self.users.read().await.get(name).cloned()
    }

    /// Look `name` up and report whether the store is empty, under one read
    /// lock.
    pub async fn lookup(&self, name: &str) -> Lookup {
        let users = self.users.read().await;
        if users.is_empty() {
            return Lookup::Empty;
        }
        match users.get(name) {
            Some(user) => Lookup::Found(user.clone()),
            None => Lookup::Missing,
        }
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// Populate the store from its loader.
    pub async fn load(&self) -> GateResult<usize> {
        self.reload().await
    }

    /// Re-read the backing source and merge by name. Users absent from the
    /// source are kept. The source is parsed completely before the store is
    /// touched, so a bad file changes nothing.
    pub async fn reload(&self) -> GateResult<usize> {
        let loader = self
            .loader
            .clone()
            .ok_or_else(|| GateError::Credentials("no credential source configured".into()))?;
        // Loaders do blocking I/O; keep it off the async workers.
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| GateError::Credentials(format!("credential loader panicked: {e}")))??;
        let count = loaded.len();

        let mut users = self.users.write().await;
        for user in loaded {
            users.insert(user.name.clone(), Arc::new(user));
        }
        info!(count, total = users.len(), "loaded users");
        Ok(count)
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}
