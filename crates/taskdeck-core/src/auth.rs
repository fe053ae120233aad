pub mod client;

use std::fmt;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::datastore::DataStore;
use crate::error::Unauthenticated;

/// Bearer credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(<{} bytes>)", self.0.len())
    }
}

/// Decides whether a mutating call may proceed. Shared by the store, the
/// HTTP client and the CLI; constructed once per process and passed around.
#[derive(Debug)]
pub struct AuthGate {
    token: RwLock<Option<SessionToken>>,
    persist: Option<DataStore>,
}

impl AuthGate {
    pub fn in_memory() -> Self {
        Self {
            token: RwLock::new(None),
            persist: None,
        }
    }

    /// Restores the token saved by a previous login, if any.
    #[tracing::instrument(skip(store))]
    pub fn persistent(store: DataStore) -> anyhow::Result<Self> {
        let token = store.load_token()?;
        info!(restored = token.is_some(), "session gate initialized");
        Ok(Self {
            token: RwLock::new(token),
            persist: Some(store),
        })
    }

    pub fn require_session(&self) -> Result<SessionToken, Unauthenticated> {
        match self.token.read().as_ref() {
            Some(token) => Ok(token.clone()),
            None => {
                debug!("mutation refused without a session");
                Err(Unauthenticated)
            }
        }
    }

    pub fn current_token(&self) -> Option<SessionToken> {
        self.token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Installs the token from a successful login and persists it.
    #[tracing::instrument(skip(self, token))]
    pub fn establish(&self, token: SessionToken) -> anyhow::Result<()> {
        if let Some(store) = &self.persist {
            store.save_token(&token)?;
        }
        *self.token.write() = Some(token);
        info!("session established");
        Ok(())
    }

    /// Called whenever the server answers 401. Cannot fail: a token that
    /// cannot be removed from disk is still dropped from memory.
    pub fn on_unauthorized(&self) {
        let had_token = self.token.write().take().is_some();
        warn!(had_token, "session invalidated by server");
        self.forget_persisted();
    }

    #[tracing::instrument(skip(self))]
    pub fn logout(&self) -> anyhow::Result<()> {
        self.token.write().take();
        if let Some(store) = &self.persist {
            store.clear_token()?;
        }
        info!("logged out");
        Ok(())
    }

    fn forget_persisted(&self) {
        if let Some(store) = &self.persist
            && let Err(err) = store.clear_token()
        {
            error!(error = %err, "failed to remove persisted session token");
        }
    }
}
