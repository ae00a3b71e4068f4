use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use url::Url;

use campus_offline::session::SessionToken;
use campus_offline::upload::{
  DirectTransport, RelayTransport, Transport, UploadFailure, UploadFile, UploadOutcome,
  UploadProgress, UploadSelector,
};

/// Request-body ceiling of the fake application server.
const RELAY_LIMIT: usize = 100_000;
const TOKEN: &str = "student-token";
const CREDENTIAL: &str = "one-time";

#[derive(Clone, Default)]
struct Backend {
  base: String,
  relay_hits: Arc<AtomicUsize>,
  minted: Arc<Mutex<Vec<Value>>>,
  stored: Arc<Mutex<Vec<(String, usize)>>>,
}

async fn relay(State(backend): State<Backend>, body: Bytes) -> Response {
  backend.relay_hits.fetch_add(1, Ordering::SeqCst);
  if body.len() > RELAY_LIMIT {
    return (StatusCode::PAYLOAD_TOO_LARGE, "request entity too large").into_response();
  }

  let text = String::from_utf8_lossy(&body);
  if !text.contains("name=\"file\"") {
    return Json(json!({ "success": false, "error": "missing file part" })).into_response();
  }
  Json(json!({
    "success": true,
    "url": "https://cdn.campus.test/relayed/notes.txt",
    "fileName": "notes.txt",
    "resourceType": "raw",
    "size": body.len(),
  }))
  .into_response()
}

async fn mint(
  State(backend): State<Backend>,
  headers: HeaderMap,
  Json(request): Json<Value>,
) -> Response {
  let authorized = headers
    .get("authorization")
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v == format!("Bearer {}", TOKEN));
  if !authorized {
    return (StatusCode::UNAUTHORIZED, "sign in first").into_response();
  }

  let file_name = request["fileName"].as_str().unwrap_or("unnamed").to_string();
  backend.minted.lock().unwrap().push(request);
  Json(json!({
    "uploadUrl": format!("{}/storage/zone/{}", backend.base, file_name),
    "cdnUrl": format!("https://cdn.campus.test/direct/{}", file_name),
    "shortLivedCredential": CREDENTIAL,
    "storagePath": format!("zone/{}", file_name),
  }))
  .into_response()
}

async fn store(
  State(backend): State<Backend>,
  Path(path): Path<String>,
  headers: HeaderMap,
  body: Bytes,
) -> StatusCode {
  let credential = headers.get("accesskey").and_then(|v| v.to_str().ok());
  if credential != Some(CREDENTIAL) {
    return StatusCode::UNAUTHORIZED;
  }
  backend.stored.lock().unwrap().push((path, body.len()));
  StatusCode::CREATED
}

async fn start_server() -> (Backend, Url) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr: SocketAddr = listener.local_addr().unwrap();
  let backend = Backend {
    base: format!("http://{}", addr),
    ..Backend::default()
  };

  let app = Router::new()
    .route("/api/upload", post(relay))
    .route("/api/upload/sign", post(mint))
    .route("/storage/*path", put(store))
    .with_state(backend.clone());
  tokio::spawn(async move {
    axum::serve(listener, app).await.unwrap();
  });

  let base = Url::parse(&backend.base).unwrap();
  (backend, base)
}

fn selector(base: &Url, token: Option<&str>, threshold: u64) -> UploadSelector {
  let client = reqwest::Client::new();
  let relay = RelayTransport::new(client.clone(), base.join("/api/upload").unwrap());
  let direct = DirectTransport::new(
    client,
    base.join("/api/upload/sign").unwrap(),
    token.map(SessionToken::new),
  );
  UploadSelector::new(Arc::new(relay), Arc::new(direct)).with_threshold(threshold)
}

fn file(name: &str, size: usize) -> UploadFile {
  UploadFile {
    file_name: name.to_string(),
    mime_type: "application/octet-stream".to_string(),
    payload: (0..size).map(|i| (i % 251) as u8).collect(),
  }
}

async fn upload_with_progress(
  selector: &UploadSelector,
  file: &UploadFile,
) -> (UploadOutcome, Vec<UploadProgress>) {
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let outcome = selector.upload(file, Some(tx)).await;
  let mut events = Vec::new();
  while let Some(event) = rx.recv().await {
    events.push(event);
  }
  (outcome, events)
}

#[tokio::test]
async fn test_small_file_is_relayed() {
  let (backend, base) = start_server().await;
  let selector = selector(&base, Some(TOKEN), 64 * 1024);

  let (outcome, events) = upload_with_progress(&selector, &file("notes.txt", 2_000)).await;

  assert_eq!(
    outcome,
    UploadOutcome::Success {
      url: "https://cdn.campus.test/relayed/notes.txt".into()
    }
  );
  assert_eq!(backend.relay_hits.load(Ordering::SeqCst), 1);
  assert!(backend.stored.lock().unwrap().is_empty());
  assert_eq!(
    events.last(),
    Some(&UploadProgress {
      transport: Transport::Relay,
      sent: 2_000,
      total: 2_000
    })
  );
}

#[tokio::test]
async fn test_relay_refusal_falls_back_to_direct_once() {
  let (backend, base) = start_server().await;
  // Below threshold, above the server's body ceiling.
  let selector = selector(&base, Some(TOKEN), 1024 * 1024);

  let (outcome, events) = upload_with_progress(&selector, &file("lecture.bin", 150_000)).await;

  assert_eq!(
    outcome,
    UploadOutcome::Success {
      url: "https://cdn.campus.test/direct/lecture.bin".into()
    }
  );
  assert_eq!(backend.relay_hits.load(Ordering::SeqCst), 1);
  assert_eq!(
    *backend.stored.lock().unwrap(),
    vec![("zone/lecture.bin".to_string(), 150_000)]
  );

  let minted = backend.minted.lock().unwrap();
  assert_eq!(minted.len(), 1);
  assert_eq!(minted[0]["fileName"], "lecture.bin");
  assert_eq!(minted[0]["fileType"], "application/octet-stream");
  assert_eq!(minted[0]["fileSize"], 150_000);

  let last = events.last().unwrap();
  assert_eq!(last.transport, Transport::Direct);
  assert_eq!((last.sent, last.total), (150_000, 150_000));
}

#[tokio::test]
async fn test_large_file_skips_relay() {
  let (backend, base) = start_server().await;
  let selector = selector(&base, Some(TOKEN), 1_000);

  let (outcome, _) = upload_with_progress(&selector, &file("slides.pdf", 5_000)).await;

  assert!(outcome.is_success());
  assert_eq!(backend.relay_hits.load(Ordering::SeqCst), 0);
  assert_eq!(backend.stored.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_direct_without_session_is_rejected() {
  let (backend, base) = start_server().await;
  let selector = selector(&base, None, 1_000);

  let (outcome, _) = upload_with_progress(&selector, &file("slides.pdf", 5_000)).await;

  assert!(matches!(
    outcome,
    UploadOutcome::Failure {
      reason: UploadFailure::ServerRejected,
      ..
    }
  ));
  assert!(backend.minted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_mint_with_wrong_token_is_server_rejected() {
  let (_backend, base) = start_server().await;
  let selector = selector(&base, Some("stale-token"), 1_000);

  let (outcome, _) = upload_with_progress(&selector, &file("slides.pdf", 5_000)).await;

  assert!(matches!(
    outcome,
    UploadOutcome::Failure {
      reason: UploadFailure::ServerRejected,
      ..
    }
  ));
}

#[tokio::test]
async fn test_destination_refusal_is_destination_write() {
  let (backend, base) = start_server().await;
  let client = reqwest::Client::new();
  let relay = RelayTransport::new(client.clone(), base.join("/api/upload").unwrap());
  let direct = DirectTransport::new(
    client,
    base.join("/api/upload/sign").unwrap(),
    Some(SessionToken::new(TOKEN)),
  )
  .with_credential_header("X-Wrong-Header");
  let selector = UploadSelector::new(Arc::new(relay), Arc::new(direct)).with_threshold(1_000);

  let (outcome, _) = upload_with_progress(&selector, &file("slides.pdf", 5_000)).await;

  assert!(matches!(
    outcome,
    UploadOutcome::Failure {
      reason: UploadFailure::DestinationWrite,
      ..
    }
  ));
  assert!(backend.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_server_is_network_failure() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let base = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
  drop(listener);

  let selector = selector(&base, Some(TOKEN), 64 * 1024);
  let (outcome, _) = upload_with_progress(&selector, &file("notes.txt", 100)).await;

  assert!(matches!(
    outcome,
    UploadOutcome::Failure {
      reason: UploadFailure::Network,
      ..
    }
  ));
}
