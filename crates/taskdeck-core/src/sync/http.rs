use std::sync::Arc;

use anyhow::{Context, anyhow};
use reqwest::{Method, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::SyncClient;
use crate::auth::AuthGate;
use crate::error::{SyncError, SyncResult};
use crate::task::{NewTask, Task, TaskChanges, TaskId};

pub(crate) const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, serde::Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// Talks to the `/tasks` REST resource, attaching the bearer token held by
/// the gate on every call.
#[derive(Debug, Clone)]
pub struct HttpSyncClient {
    http: reqwest::Client,
    base_url: Url,
    auth: Arc<AuthGate>,
}

impl HttpSyncClient {
    pub fn new(base_url: &str, auth: Arc<AuthGate>) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            base_url: parse_base_url(base_url)?,
            auth,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn task_url(&self, id: Option<&TaskId>) -> SyncResult<Url> {
        let mut segments = vec!["tasks"];
        if let Some(id) = id {
            segments.push(id.as_str());
        }
        join_segments(&self.base_url, &segments)
    }

    async fn send<B>(&self, method: Method, url: Url, body: Option<&B>) -> SyncResult<Response>
    where
        B: Serialize + Sync + ?Sized,
    {
        let token = self.auth.current_token().ok_or(SyncError::Unauthorized)?;
        let request_id = Uuid::new_v4();
        debug!(%method, %url, %request_id, "sending task request");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(token.expose())
            .header(REQUEST_ID_HEADER, request_id.to_string());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        check_status(response).await
    }
}

impl SyncClient for HttpSyncClient {
    #[instrument(skip(self))]
    async fn fetch_all(&self) -> SyncResult<Vec<Task>> {
        let url = self.task_url(None)?;
        let response = self.send(Method::GET, url, None::<&()>).await?;
        let tasks = decode_data::<Vec<Task>>(response).await?.unwrap_or_default();
        debug!(count = tasks.len(), "fetched task list");
        Ok(tasks)
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn fetch_one(&self, id: &TaskId) -> SyncResult<Task> {
        let url = self.task_url(Some(id))?;
        let response = self.send(Method::GET, url, None::<&()>).await?;
        decode_data(response).await?.ok_or(SyncError::NotFound)
    }

    #[instrument(skip(self, task), fields(title_len = task.title.len()))]
    async fn create(&self, task: &NewTask) -> SyncResult<Task> {
        let url = self.task_url(None)?;
        let response = self.send(Method::POST, url, Some(task)).await?;
        decode_data::<Task>(response).await?.ok_or_else(|| {
            SyncError::Validation("server accepted the task but returned no record".to_string())
        })
    }

    #[instrument(skip(self, changes), fields(id = %id))]
    async fn update(&self, id: &TaskId, changes: &TaskChanges) -> SyncResult<Task> {
        let url = self.task_url(Some(id))?;
        let response = self.send(Method::PUT, url, Some(changes)).await?;
        decode_data(response).await?.ok_or(SyncError::NotFound)
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn remove(&self, id: &TaskId) -> SyncResult<()> {
        let url = self.task_url(Some(id))?;
        self.send(Method::DELETE, url, None::<&()>).await?;
        Ok(())
    }
}

pub(crate) fn build_http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("taskdeck/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed building HTTP client")
}

pub(crate) fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid base URL: {raw}"))?;
    if url.cannot_be_a_base() {
        return Err(anyhow!("base URL cannot carry a path: {raw}"));
    }
    Ok(url)
}

pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> SyncResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| SyncError::Network(format!("base URL cannot carry a path: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub(crate) fn transport_error(err: reqwest::Error) -> SyncError {
    warn!(error = %err, "transport failure");
    SyncError::Network(err.to_string())
}

/// 401 wins over everything, whatever the body says.
pub(crate) async fn check_status(response: Response) -> SyncResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(SyncError::Unauthorized);
    }
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = server_message(&body).unwrap_or_else(|| status.to_string());
    debug!(%status, message = %message, "request failed");

    match status {
        StatusCode::NOT_FOUND => Err(SyncError::NotFound),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            Err(SyncError::Validation(message))
        }
        _ => Err(SyncError::Network(format!("HTTP {status}: {message}"))),
    }
}

pub(crate) async fn decode_data<T>(response: Response) -> SyncResult<Option<T>>
where
    T: DeserializeOwned,
{
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|err| SyncError::Network(format!("undecodable response body: {err}")))?;
    Ok(envelope.data)
}

fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use reqwest::Url;

    use super::{join_segments, parse_base_url, server_message};

    #[test]
    fn joins_segments_under_base_path() {
        let base = parse_base_url("https://api.example.com/v1/").expect("base");
        let url = join_segments(&base, &["tasks", "a b/c"]).expect("join");
        assert_eq!(url.as_str(), "https://api.example.com/v1/tasks/a%20b%2Fc");

        let bare = Url::parse("http://localhost:8080").expect("url");
        let url = join_segments(&bare, &["tasks"]).expect("join");
        assert_eq!(url.as_str(), "http://localhost:8080/tasks");
    }

    #[test]
    fn rejects_non_hierarchical_base() {
        assert!(parse_base_url("mailto:someone@example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn extracts_server_message() {
        assert_eq!(
            server_message(r#"{"message":"title is required"}"#),
            Some("title is required".to_string())
        );
        assert_eq!(
            server_message(r#"{"error":"bad"}"#),
            Some("bad".to_string())
        );
        assert_eq!(server_message("<html>"), None);
    }
}
