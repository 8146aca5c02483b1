//! HTTP-level tests: bind the router on a random port and speak raw HTTP
//! over a TcpStream. Covers auth, ownership, validation shapes, and the
//! create/read/update/delete surface.

use std::sync::Arc;
use std::time::Duration;

use taskd::auth;
use taskd::config::ServerConfig;
use taskd::notify::{CaptureMailer, Mailer, Notifier, RetryPolicy};
use taskd::rest;
use taskd::storage::Storage;
use taskd::tasks::{TaskService, TaskStore};
use taskd::AppContext;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct Server {
    _dir: TempDir,
    port: u16,
    ada_token: String,
    bob_token: String,
}

async fn start_server() -> Server {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(ServerConfig::new(
        None,
        Some(dir.path().to_path_buf()),
        Some("error".to_string()),
    ));
    let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
    let store = TaskStore::new(storage.pool());
    let tasks = Arc::new(TaskService::new(store.clone(), config.cache_ttl()));
    let mailer: Arc<dyn Mailer> = Arc::new(CaptureMailer::new());
    let (notifier, _worker) = Notifier::spawn(store, mailer, RetryPolicy::instant());

    let ada = storage.create_user("Ada", "ada@example.com").await.unwrap();
    let ada_token = auth::generate_token();
    storage.insert_token(&auth::hash_token(&ada_token), ada.id).await.unwrap();

    let bob = storage.create_user("Bob", "bob@example.com").await.unwrap();
    let bob_token = auth::generate_token();
    storage.insert_token(&auth::hash_token(&bob_token), bob.id).await.unwrap();

    let ctx = Arc::new(AppContext {
        config,
        storage,
        tasks,
        notifier,
        started_at: std::time::Instant::now(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let router = rest::build_router(ctx);
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    // Give the server a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Server { _dir: dir, port, ada_token, bob_token }
}

/// Send one HTTP/1.1 request and return (status code, parsed JSON body).
async fn request(
    port: u16,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: Option<&str>,
) -> (u16, serde_json::Value) {
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    if let Some(token) = token {
        req.push_str(&format!("Authorization: Bearer {token}\r\n"));
    }
    match body {
        Some(body) => {
            req.push_str(&format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ));
        }
        None => req.push_str("\r\n"),
    }

    let mut stream = TcpStream::connect(format!("127.0.0.1:{port}")).await.unwrap();
    stream.write_all(req.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    let response = String::from_utf8_lossy(&buf).to_string();

    let status: u16 = response
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
        .unwrap_or_else(|| panic!("malformed response: {response}"));

    let json = response
        .find("\r\n\r\n")
        .map(|i| &response[i + 4..])
        .filter(|body| !body.is_empty())
        .and_then(|body| serde_json::from_str(body).ok())
        .unwrap_or(serde_json::Value::Null);

    (status, json)
}

fn create_body(title: &str, due_in_hours: i64) -> String {
    serde_json::json!({
        "title": title,
        "due_date": (chrono::Utc::now() + chrono::Duration::hours(due_in_hours)).to_rfc3339(),
        "priority": "medium",
        "status": "pending",
    })
    .to_string()
}

#[tokio::test]
async fn health_is_public() {
    let server = start_server().await;
    let (status, json) = request(server.port, "GET", "/api/v1/health", None, None).await;
    assert_eq!(status, 200);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["db_ok"], true);
}

#[tokio::test]
async fn task_routes_require_a_valid_token() {
    let server = start_server().await;

    let (status, json) = request(server.port, "GET", "/api/v1/tasks", None, None).await;
    assert_eq!(status, 401);
    assert_eq!(json["message"], "Unauthenticated.");

    let (status, _) =
        request(server.port, "GET", "/api/v1/tasks", Some("not-a-real-token"), None).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn create_then_fetch_round_trip() {
    let server = start_server().await;

    let (status, json) = request(
        server.port,
        "POST",
        "/api/v1/tasks",
        Some(&server.ada_token),
        Some(&create_body("New Task", 24)),
    )
    .await;
    assert_eq!(status, 201);
    assert_eq!(json["data"]["title"], "New Task");
    assert_eq!(json["data"]["status"], "pending");
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, json) = request(
        server.port,
        "GET",
        &format!("/api/v1/tasks/{id}"),
        Some(&server.ada_token),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["data"]["id"], id);

    let (status, json) =
        request(server.port, "GET", "/api/v1/tasks", Some(&server.ada_token), None).await;
    assert_eq!(status, 200);
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn foreign_task_answers_403_without_detail() {
    let server = start_server().await;

    let (_, json) = request(
        server.port,
        "POST",
        "/api/v1/tasks",
        Some(&server.ada_token),
        Some(&create_body("secret", 24)),
    )
    .await;
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, json) = request(
        server.port,
        "GET",
        &format!("/api/v1/tasks/{id}"),
        Some(&server.bob_token),
        None,
    )
    .await;
    assert_eq!(status, 403);
    assert!(json["data"].is_null(), "no task data may leak");
}

#[tokio::test]
async fn unknown_task_is_404() {
    let server = start_server().await;
    let (status, _) = request(
        server.port,
        "GET",
        "/api/v1/tasks/9999",
        Some(&server.ada_token),
        None,
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn past_due_date_is_a_field_level_422() {
    let server = start_server().await;
    let (status, json) = request(
        server.port,
        "POST",
        "/api/v1/tasks",
        Some(&server.ada_token),
        Some(&create_body("late", -1)),
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(json["message"], "The given data was invalid.");
    assert_eq!(json["errors"]["due_date"][0], "The due date must be a future date.");
}

#[tokio::test]
async fn status_endpoint_enforces_the_transition_rule() {
    let server = start_server().await;
    let (_, json) = request(
        server.port,
        "POST",
        "/api/v1/tasks",
        Some(&server.ada_token),
        Some(&create_body("work", 24)),
    )
    .await;
    let id = json["data"]["id"].as_i64().unwrap();
    let status_path = format!("/api/v1/tasks/{id}/status");

    let (status, json) = request(
        server.port,
        "PATCH",
        &status_path,
        Some(&server.ada_token),
        Some(r#"{"status":"completed"}"#),
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(
        json["errors"]["status"][0],
        "Task must be in progress before it can be completed."
    );

    let (status, _) = request(
        server.port,
        "PATCH",
        &status_path,
        Some(&server.ada_token),
        Some(r#"{"status":"in_progress"}"#),
    )
    .await;
    assert_eq!(status, 200);

    let (status, json) = request(
        server.port,
        "PATCH",
        &status_path,
        Some(&server.ada_token),
        Some(r#"{"status":"completed"}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["data"]["status"], "completed");
}

#[tokio::test]
async fn delete_is_204_then_404() {
    let server = start_server().await;
    let (_, json) = request(
        server.port,
        "POST",
        "/api/v1/tasks",
        Some(&server.ada_token),
        Some(&create_body("temp", 24)),
    )
    .await;
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, _) = request(
        server.port,
        "DELETE",
        &format!("/api/v1/tasks/{id}"),
        Some(&server.ada_token),
        None,
    )
    .await;
    assert_eq!(status, 204);

    let (status, _) = request(
        server.port,
        "GET",
        &format!("/api/v1/tasks/{id}"),
        Some(&server.ada_token),
        None,
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn search_endpoint_requires_a_query() {
    let server = start_server().await;
    request(
        server.port,
        "POST",
        "/api/v1/tasks",
        Some(&server.ada_token),
        Some(&create_body("Unique Search Title", 24)),
    )
    .await;
    request(
        server.port,
        "POST",
        "/api/v1/tasks",
        Some(&server.ada_token),
        Some(&create_body("Another Title", 24)),
    )
    .await;

    let (status, json) = request(
        server.port,
        "GET",
        "/api/v1/tasks/search?query=Unique",
        Some(&server.ada_token),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let (status, json) = request(
        server.port,
        "GET",
        "/api/v1/tasks/search",
        Some(&server.ada_token),
        None,
    )
    .await;
    assert_eq!(status, 422);
    assert_eq!(json["errors"]["query"][0], "The search query is required.");
}
