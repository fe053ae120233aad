use std::collections::BTreeMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{AuthGate, SessionToken};
use crate::error::{StoreError, SyncError, SyncResult};
use crate::sync::http::{
    REQUEST_ID_HEADER, build_http_client, check_status, join_segments, parse_base_url,
    transport_error,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(default)]
    pub username: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: SessionToken,
    pub user: Option<AuthUser>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    user: Option<AuthUser>,
}

#[derive(Deserialize)]
struct MeResponse {
    user: AuthUser,
}

/// Client for the `/api/auth` endpoints. Credentials are exchanged for a
/// token here; installing that token is left to the caller.
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    base_url: Url,
}

impl AuthClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            base_url: parse_base_url(base_url)?,
        })
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> SyncResult<LoginOutcome> {
        self.exchange("login", username, password).await
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> SyncResult<LoginOutcome> {
        self.exchange("register", username, password).await
    }

    /// Startup check for a restored session. Only a 401 ends it; an
    /// unreachable server leaves the token in place.
    #[instrument(skip(self, gate))]
    pub async fn validate_restored(&self, gate: &AuthGate) -> bool {
        if !gate.is_authenticated() {
            return false;
        }
        match self.me(gate).await {
            Ok(user) => {
                info!(username = %user.username, "restored session validated");
                true
            }
            Err(StoreError::Unauthenticated) => {
                warn!("restored session rejected by server, signed out");
                false
            }
            Err(err) => {
                warn!(error = %err, "could not validate restored session");
                true
            }
        }
    }

    /// Validates the held session. A 401 revokes it through the gate.
    #[instrument(skip(self, gate))]
    pub async fn me(&self, gate: &AuthGate) -> Result<AuthUser, StoreError> {
        let token = gate.require_session()?;
        let url = join_segments(&self.base_url, &["api", "auth", "me"]).map_err(store_error)?;

        let sent = self
            .http
            .get(url)
            .bearer_auth(token.expose())
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
            .send()
            .await
            .map_err(transport_error);
        let response = match sent {
            Ok(response) => check_status(response).await,
            Err(err) => Err(err),
        };

        let response = match response {
            Ok(response) => response,
            Err(SyncError::Unauthorized) => {
                gate.on_unauthorized();
                return Err(StoreError::Unauthenticated);
            }
            Err(err) => return Err(store_error(err)),
        };

        let body: MeResponse = response
            .json()
            .await
            .map_err(|err| StoreError::Network(format!("undecodable response body: {err}")))?;
        Ok(body.user)
    }

    async fn exchange(
        &self,
        action: &str,
        username: &str,
        password: &str,
    ) -> SyncResult<LoginOutcome> {
        let url = join_segments(&self.base_url, &["api", "auth", action])?;
        let response = self
            .http
            .post(url)
            .header(REQUEST_ID_HEADER, Uuid::new_v4().to_string())
            .json(&Credentials { username, password })
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| SyncError::Network(format!("undecodable response body: {err}")))?;
        let Some(token) = SessionToken::new(body.token) else {
            warn!(action, "auth endpoint returned an empty token");
            return Err(SyncError::Validation("server returned an empty token".to_string()));
        };

        info!(action, username, "credentials accepted");
        Ok(LoginOutcome {
            token,
            user: body.user,
        })
    }
}

fn store_error(err: SyncError) -> StoreError {
    match err {
        SyncError::Unauthorized => StoreError::Unauthenticated,
        SyncError::NotFound => StoreError::Rejected("auth endpoint not found".to_string()),
        SyncError::Network(message) => StoreError::Network(message),
        SyncError::Validation(message) => StoreError::Rejected(message),
    }
}
