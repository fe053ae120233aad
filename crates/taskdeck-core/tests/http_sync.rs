use std::sync::Arc;

use taskdeck_core::auth::client::AuthClient;
use taskdeck_core::auth::{AuthGate, SessionToken};
use taskdeck_core::error::{StoreError, SyncError};
use taskdeck_core::store::TaskStore;
use taskdeck_core::sync::{HttpSyncClient, SyncClient};
use taskdeck_core::task::{TaskChanges, TaskDraft, TaskId, TaskStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Captured {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Captured {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Answers each incoming connection with the next canned response, then
/// hands back what it received.
async fn respond_with(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Captured>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));

    let server = tokio::spawn(async move {
        let mut captured = Vec::new();
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.expect("accept");
            captured.push(read_request(&mut socket).await);

            let response = format!(
                "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("write response");
            socket.shutdown().await.expect("shutdown");
        }
        captured
    });

    (base, server)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.expect("read request");
        assert!(n > 0, "client closed before sending a request");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.expect("read body");
        assert!(n > 0, "client closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }

    Captured {
        request_line,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    }
}

fn signed_in() -> Arc<AuthGate> {
    let auth = Arc::new(AuthGate::in_memory());
    auth.establish(SessionToken::new("secret-token").expect("token"))
        .expect("establish");
    auth
}

const ONE_TASK: &str = r#"{"data":[{"_id":"66b1","title":"Buy milk","description":"two litres","due_date":"2026-03-12T00:00:00.000Z","status":"Pending","createdAt":"2026-03-01T09:00:00Z"}]}"#;

#[tokio::test]
async fn fetch_all_sends_bearer_and_decodes_envelope() {
    let (base, server) = respond_with(vec![(200, ONE_TASK)]).await;
    let client = HttpSyncClient::new(&base, signed_in()).expect("client");

    let tasks = client.fetch_all().await.expect("fetch all");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, TaskId::new("66b1"));
    assert_eq!(tasks[0].status, TaskStatus::Pending);

    let captured = server.await.expect("server");
    assert_eq!(captured[0].request_line, "GET /tasks HTTP/1.1");
    assert_eq!(
        captured[0].header("authorization"),
        Some("Bearer secret-token")
    );
    assert!(captured[0].header("x-request-id").is_some());
}

#[tokio::test]
async fn error_statuses_map_to_sync_errors() {
    let (base, server) = respond_with(vec![
        (401, r#"{"message":"ignored"}"#),
        (404, "{}"),
        (422, r#"{"message":"title is required"}"#),
        (500, r#"{"error":"boom"}"#),
        (200, r#"{"data":null}"#),
    ])
    .await;
    let client = HttpSyncClient::new(&base, signed_in()).expect("client");
    let id = TaskId::new("42");

    assert_eq!(client.fetch_one(&id).await, Err(SyncError::Unauthorized));
    assert_eq!(client.remove(&id).await, Err(SyncError::NotFound));
    assert_eq!(
        client
            .update(&id, &TaskChanges::status(TaskStatus::Completed))
            .await,
        Err(SyncError::Validation("title is required".to_string()))
    );
    match client.fetch_all().await {
        Err(SyncError::Network(message)) => {
            assert!(message.contains("500"), "{message}");
            assert!(message.contains("boom"), "{message}");
        }
        other => panic!("expected network error, got {other:?}"),
    }
    assert_eq!(client.fetch_one(&id).await, Err(SyncError::NotFound));

    let captured = server.await.expect("server");
    assert_eq!(captured[1].request_line, "DELETE /tasks/42 HTTP/1.1");
    assert_eq!(captured[2].request_line, "PUT /tasks/42 HTTP/1.1");
    assert_eq!(captured[2].body, r#"{"status":"Completed"}"#);
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let client = HttpSyncClient::new(&base, signed_in()).expect("client");
    assert!(matches!(
        client.fetch_all().await,
        Err(SyncError::Network(_))
    ));
}

#[tokio::test]
async fn missing_token_fails_without_a_request() {
    let client =
        HttpSyncClient::new("http://127.0.0.1:9", Arc::new(AuthGate::in_memory())).expect("client");
    assert_eq!(client.fetch_all().await, Err(SyncError::Unauthorized));
}

#[tokio::test]
async fn store_create_posts_body_and_adopts_server_id() {
    let (base, server) = respond_with(vec![(
        201,
        r#"{"data":{"_id":"srv-9","title":"Buy milk","description":"two litres","status":"Pending","createdAt":"2026-03-01T09:00:00Z"}}"#,
    )])
    .await;
    let auth = signed_in();
    let client = HttpSyncClient::new(&base, Arc::clone(&auth)).expect("client");
    let store = TaskStore::new(client, auth);

    let created = store
        .add(TaskDraft::new("Buy milk", "two litres"))
        .await
        .expect("add");
    assert_eq!(created.id, TaskId::new("srv-9"));
    assert_eq!(store.list().len(), 1);

    let captured = server.await.expect("server");
    assert_eq!(captured[0].request_line, "POST /tasks HTTP/1.1");
    let body: serde_json::Value = serde_json::from_str(&captured[0].body).expect("json body");
    assert_eq!(body["title"], "Buy milk");
    assert_eq!(body["status"], "Pending");
    assert!(body["createdAt"].is_string());
}

#[tokio::test]
async fn store_turns_401_into_logout() {
    let (base, _server) = respond_with(vec![(401, "{}")]).await;
    let auth = signed_in();
    let client = HttpSyncClient::new(&base, Arc::clone(&auth)).expect("client");
    let store = TaskStore::new(client, Arc::clone(&auth));

    assert_eq!(store.load().await, Err(StoreError::Unauthenticated));
    assert!(!auth.is_authenticated());
    assert!(auth.require_session().is_err());
}

#[tokio::test]
async fn login_returns_token_and_me_revokes_on_401() {
    let (base, server) = respond_with(vec![
        (200, r#"{"token":"abc123","user":{"username":"ann","id":7}}"#),
        (401, "{}"),
    ])
    .await;
    let client = AuthClient::new(&base).expect("auth client");

    let outcome = client.login("ann", "hunter2").await.expect("login");
    assert_eq!(outcome.token.expose(), "abc123");
    assert_eq!(outcome.user.map(|user| user.username).as_deref(), Some("ann"));

    let gate = AuthGate::in_memory();
    gate.establish(outcome.token).expect("establish");
    assert_eq!(client.me(&gate).await, Err(StoreError::Unauthenticated));
    assert!(!gate.is_authenticated());

    let captured = server.await.expect("server");
    assert_eq!(captured[0].request_line, "POST /api/auth/login HTTP/1.1");
    assert!(captured[0].body.contains(r#""username":"ann""#));
    assert_eq!(captured[1].request_line, "GET /api/auth/me HTTP/1.1");
    assert_eq!(captured[1].header("authorization"), Some("Bearer abc123"));
}

#[tokio::test]
async fn restored_session_is_checked_against_me() {
    let (base, server) = respond_with(vec![
        (200, r#"{"user":{"username":"ann"}}"#),
        (500, "{}"),
        (401, "{}"),
    ])
    .await;
    let client = AuthClient::new(&base).expect("auth client");
    let gate = signed_in();

    assert!(client.validate_restored(&gate).await);
    assert!(client.validate_restored(&gate).await);
    assert!(gate.is_authenticated());

    assert!(!client.validate_restored(&gate).await);
    assert!(!gate.is_authenticated());

    assert!(!client.validate_restored(&gate).await);
    let captured = server.await.expect("server");
    assert_eq!(captured.len(), 3);
    assert!(
        captured
            .iter()
            .all(|request| request.request_line == "GET /api/auth/me HTTP/1.1")
    );
}
