//! Local HTTP proxy that puts the interceptor in front of the campus server
//! and serves downloaded media.

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::App;
use crate::connectivity::{is_reachable, ConnectivityController, ConnectivitySignals, Navigator};
use crate::error::Error;
use crate::interceptor::{Interceptor, Intercepted, ResponseSource};
use crate::media::{MediaHandle, MediaStore};
use crate::net::{NetRequest, RequestMode};

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Marks where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-campus-offline-source";

/// Headers that describe one hop, or a body encoding reqwest already undid.
const HOP_HEADERS: [&str; 6] = [
  "host",
  "connection",
  "content-length",
  "transfer-encoding",
  "content-encoding",
  "keep-alive",
];

/// Tracks the page the browser is on and hands out pending redirects.
pub struct ProxyNavigator {
  state: Mutex<NavigatorState>,
}

struct NavigatorState {
  current: String,
  redirect: Option<String>,
}

impl ProxyNavigator {
  pub fn new(start: &str) -> Self {
    Self {
      state: Mutex::new(NavigatorState {
        current: start.to_string(),
        redirect: None,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, NavigatorState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn visit(&self, location: &str) {
    self.lock().current = location.to_string();
  }

  fn take_redirect(&self) -> Option<String> {
    self.lock().redirect.take()
  }
}

impl Navigator for ProxyNavigator {
  fn current_location(&self) -> String {
    self.lock().current.clone()
  }

  fn navigate(&self, location: &str) {
    let mut state = self.lock();
    state.current = location.to_string();
    state.redirect = Some(location.to_string());
  }
}

#[derive(Clone)]
struct ProxyState {
  interceptor: Arc<Interceptor>,
  media: Arc<MediaStore>,
  navigator: Arc<ProxyNavigator>,
  origin: Url,
}

pub fn router(app: &App, navigator: Arc<ProxyNavigator>) -> color_eyre::Result<Router> {
  let state = ProxyState {
    interceptor: app.interceptor.clone(),
    media: app.media.clone(),
    navigator,
    origin: app.config.base_url()?,
  };

  Ok(
    Router::new()
      .route(&format!("{}:id", MediaHandle::ROUTE_PREFIX), get(serve_media))
      .fallback(proxy)
      .with_state(state),
  )
}

/// Run the proxy until Ctrl-C.
pub async fn serve(app: &App, listen: SocketAddr) -> color_eyre::Result<()> {
  match app.interceptor.install().await {
    Ok(()) => app.interceptor.activate().await?,
    Err(e) => warn!(error = %e, "install failed, passing requests through"),
  }
  // Failure is logged once inside the store; the proxy still runs.
  let _ = app.media.initialize().await;

  let origin = app.config.base_url()?;
  let navigator = Arc::new(ProxyNavigator::new("/"));
  let connectivity = &app.config.connectivity;

  let online_now = is_reachable(app.network.as_ref(), &origin).await;
  let controller = ConnectivityController::new(
    navigator.clone(),
    app.media.clone(),
    app.session.clone(),
    connectivity.views.clone(),
    connectivity.settle_delay(),
    online_now,
  );
  let (signals, probe) =
    ConnectivitySignals::probe(app.network.clone(), origin.clone(), connectivity.probe_interval());
  let controller_task = tokio::spawn(controller.run(signals));

  let listener = TcpListener::bind(listen).await?;
  info!(addr = %listener.local_addr()?, origin = %origin, online = online_now, "proxy listening");

  axum::serve(listener, router(app, navigator)?)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

  probe.abort();
  controller_task.abort();
  app.interceptor.flush().await;
  info!("proxy stopped");
  Ok(())
}

async fn serve_media(State(state): State<ProxyState>, Path(id): Path<String>) -> Response {
  match state.media.get(&id).await {
    Ok(object) => {
      if let Err(e) = state.media.mark_played(&id).await {
        warn!(id = %id, error = %e, "failed to record playback");
      }
      (
        [(header::CONTENT_TYPE, content_type_for(&object.source_url))],
        object.payload,
      )
        .into_response()
    }
    Err(Error::NotFound(_)) => (StatusCode::NOT_FOUND, "not downloaded").into_response(),
    Err(e) => {
      warn!(id = %id, error = %e, "media read failed");
      (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
    }
  }
}

async fn proxy(State(state): State<ProxyState>, request: Request) -> Response {
  let (parts, body) = request.into_parts();
  let path = parts.uri.path().to_string();
  let path_and_query = parts
    .uri
    .path_and_query()
    .map(|p| p.as_str())
    .unwrap_or("/");

  let url = match state.origin.join(path_and_query) {
    Ok(url) => url,
    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
  };

  let navigation = is_navigation(&parts.headers);
  if navigation && parts.method == Method::GET {
    if let Some(target) = state.navigator.take_redirect() {
      if target != path {
        debug!(from = %path, to = %target, "redirecting navigation");
        return Redirect::to(&target).into_response();
      }
    }
    state.navigator.visit(&path);
  }

  let body = match to_bytes(body, MAX_BODY_BYTES).await {
    Ok(body) => body,
    Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
  };

  let mut net_request = NetRequest::get(url);
  net_request.method = parts.method.clone();
  net_request.mode = if navigation {
    RequestMode::Navigate
  } else {
    RequestMode::SubResource
  };
  net_request.headers = forwarded(&parts.headers);
  net_request.body = body.to_vec();

  match state.interceptor.handle(net_request).await {
    Ok(intercepted) => into_response(intercepted),
    Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
  }
}

fn is_navigation(headers: &HeaderMap) -> bool {
  let fetch_mode = headers
    .get("sec-fetch-mode")
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.eq_ignore_ascii_case("navigate"));
  let wants_html = headers
    .get(header::ACCEPT)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| v.contains("text/html"));
  fetch_mode || wants_html
}

fn forwarded(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.to_string(), v.to_string()))
    })
    .collect()
}

fn into_response(intercepted: Intercepted) -> Response {
  let Intercepted { response, source } = intercepted;
  let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
  let source = match source {
    ResponseSource::Network => "network",
    ResponseSource::Cache => "cache",
    ResponseSource::OfflineFallback => "offline",
  };

  let mut builder = Response::builder()
    .status(status)
    .header(SOURCE_HEADER, source);
  for (name, value) in &response.headers {
    let Ok(name) = HeaderName::try_from(name.as_str()) else {
      continue;
    };
    if HOP_HEADERS.contains(&name.as_str()) {
      continue;
    }
    builder = builder.header(name, value.as_str());
  }

  builder
    .body(Body::from(response.body))
    .unwrap_or_else(|e| (StatusCode::BAD_GATEWAY, e.to_string()).into_response())
}

fn content_type_for(source_url: &str) -> &'static str {
  let path = source_url.split(['?', '#']).next().unwrap_or(source_url);
  let extension = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
  match extension.as_deref() {
    Some("mp4") | Some("m4v") => "video/mp4",
    Some("webm") => "video/webm",
    Some("mov") => "video/quicktime",
    Some("m3u8") => "application/vnd.apple.mpegurl",
    Some("mp3") => "audio/mpeg",
    Some("m4a") => "audio/mp4",
    Some("ogg") => "audio/ogg",
    Some("wav") => "audio/wav",
    _ => "application/octet-stream",
  }
}
