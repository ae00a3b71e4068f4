//! The interceptor state machine: lifecycle, per-class strategies and the
//! offline fallback.

use futures::future::try_join_all;
use reqwest::Method;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{CachedResponse, ResponseCache};
use super::strategy::{ClassifierRules, Strategy};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::net::{NetRequest, NetResponse, Network, RequestMode};

/// Served when navigation fails and the fallback route was never cached.
const OFFLINE_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8"><title>Offline</title></head>
<body>
<h1>You are offline</h1>
<p>This page is not available without a connection. Downloaded lessons remain playable from your offline library.</p>
<button onclick="location.reload()">Retry</button>
</body>
</html>
"#;

/// Where the interceptor is in its install/activate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  /// Created; requests pass straight through
  Parsed,
  /// Manifest cached, waiting to take over
  Installed,
  /// Controlling every client
  Active,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  OfflineFallback,
}

#[derive(Debug, Clone)]
pub struct Intercepted {
  pub response: NetResponse,
  pub source: ResponseSource,
}

/// Messages clients can post to the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
  /// Activate now instead of waiting.
  SkipWaiting,
  GetVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  Ack,
  Version(String),
}

#[derive(Debug, Clone)]
pub struct InterceptorSettings {
  /// Cache version; the live generation is named after it
  pub version: String,
  /// Origin every manifest route is resolved against
  pub origin: Url,
  /// Routes cached at install time
  pub manifest: Vec<String>,
  /// Route whose cached copy is the offline fallback document
  pub fallback_route: String,
  pub rules: ClassifierRules,
}

pub struct Interceptor {
  rules: ClassifierRules,
  generation: String,
  manifest: Vec<Url>,
  fallback_url: Url,
  cache: ResponseCache,
  network: Arc<dyn Network>,
  clock: Arc<dyn Clock>,
  lifecycle: watch::Sender<Lifecycle>,
  /// Fire-and-forget cache writes, kept so they can be awaited on shutdown
  background: Mutex<JoinSet<()>>,
}

impl Interceptor {
  pub fn new(
    settings: InterceptorSettings,
    cache: ResponseCache,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let resolve = |route: &str| {
      settings.origin.join(route).map_err(|e| Error::InvalidUrl {
        url: route.to_string(),
        reason: e.to_string(),
      })
    };

    let manifest = settings
      .manifest
      .iter()
      .map(|route| resolve(route.as_str()))
      .collect::<Result<Vec<_>>>()?;
    let fallback_url = resolve(settings.fallback_route.as_str())?;
    let (lifecycle, _) = watch::channel(Lifecycle::Parsed);

    Ok(Self {
      generation: generation_name(&settings.version),
      rules: settings.rules,
      manifest,
      fallback_url,
      cache,
      network,
      clock,
      lifecycle,
      background: Mutex::new(JoinSet::new()),
    })
  }

  /// Name of the live cache generation.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn lifecycle(&self) -> Lifecycle {
    *self.lifecycle.borrow()
  }

  /// Observe lifecycle changes; `Active` means every client is controlled.
  pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
    self.lifecycle.subscribe()
  }

  /// Cache every manifest route. If any fetch fails nothing is written.
  pub async fn install(&self) -> Result<()> {
    let stored_at = self.clock.now_millis();
    let fetches = self.manifest.iter().map(|url| async move {
      let request = NetRequest::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| Error::FetchFailed {
          url: url.to_string(),
          reason: e.to_string(),
        })?;

      if !response.is_success() {
        return Err(Error::FetchFailed {
          url: url.to_string(),
          reason: format!("HTTP {}", response.status),
        });
      }

      Ok(CachedResponse {
        request_key: request.cache_key(),
        response,
        stored_at,
      })
    });

    let entries = try_join_all(fetches).await?;
    let count = entries.len();
    self.cache.put_all(&self.generation, entries).await?;

    self.lifecycle.send_replace(Lifecycle::Installed);
    info!(generation = %self.generation, routes = count, "interceptor installed");
    Ok(())
  }

  /// Drop stale generations and take control of every client.
  pub async fn activate(&self) -> Result<()> {
    for generation in self.cache.generations().await? {
      if generation != self.generation {
        let removed = self.cache.delete_generation(&generation).await?;
        info!(generation = %generation, entries = removed, "deleted stale cache generation");
      }
    }

    self.lifecycle.send_replace(Lifecycle::Active);
    info!(generation = %self.generation, "interceptor active, clients claimed");
    Ok(())
  }

  pub async fn handle_message(&self, message: Message) -> Result<Reply> {
    match message {
      Message::SkipWaiting => {
        if self.lifecycle() == Lifecycle::Installed {
          self.activate().await?;
        }
        Ok(Reply::Ack)
      }
      Message::GetVersion => Ok(Reply::Version(self.generation.clone())),
    }
  }

  /// Answer a request from the network, the cache or the offline fallback.
  pub async fn handle(&self, request: NetRequest) -> Result<Intercepted> {
    if self.lifecycle() != Lifecycle::Active || request.method != Method::GET {
      return self.passthrough(&request).await;
    }

    match self.rules.classify(&request.url).strategy() {
      Strategy::Bypass => self.passthrough(&request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => self.network_first(request).await,
    }
  }

  /// Wait for outstanding background cache writes.
  pub async fn flush(&self) {
    let mut tasks = self.background.lock().await;
    while tasks.join_next().await.is_some() {}
  }

  async fn passthrough(&self, request: &NetRequest) -> Result<Intercepted> {
    let response = self.network.fetch(request).await?;
    Ok(Intercepted {
      response,
      source: ResponseSource::Network,
    })
  }

  async fn network_first(&self, request: NetRequest) -> Result<Intercepted> {
    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_success() {
          let task = self.store_task(request.cache_key(), response.clone());
          self.spawn_background(task).await;
        }
        Ok(Intercepted {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "network failed, trying cache");
        if let Some(hit) = self.lookup(&request.cache_key()).await {
          return Ok(Intercepted {
            response: hit.response,
            source: ResponseSource::Cache,
          });
        }
        if request.mode == RequestMode::Navigate {
          return Ok(self.offline_fallback().await);
        }
        Err(err)
      }
    }
  }

  async fn cache_first(&self, request: NetRequest) -> Result<Intercepted> {
    if let Some(hit) = self.lookup(&request.cache_key()).await {
      debug!(url = %request.url, "media served from cache");
      let task = self.refresh_task(request);
      self.spawn_background(task).await;
      return Ok(Intercepted {
        response: hit.response,
        source: ResponseSource::Cache,
      });
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_success() {
          let task = self.store_task(request.cache_key(), response.clone());
          self.spawn_background(task).await;
        }
        Ok(Intercepted {
          response,
          source: ResponseSource::Network,
        })
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "media unavailable offline");
        Ok(self.offline_fallback().await)
      }
    }
  }

  /// Cache lookup in the live generation. Read failures count as a miss.
  async fn lookup(&self, request_key: &str) -> Option<CachedResponse> {
    match self.cache.lookup(&self.generation, request_key).await {
      Ok(hit) => hit,
      Err(e) => {
        warn!(key = %request_key, error = %e, "response cache read failed");
        None
      }
    }
  }

  async fn offline_fallback(&self) -> Intercepted {
    let key = NetRequest::get(self.fallback_url.clone()).cache_key();
    let response = match self.lookup(&key).await {
      Some(hit) => hit.response,
      None => NetResponse::ok(OFFLINE_PAGE).with_header("content-type", "text/html; charset=utf-8"),
    };

    Intercepted {
      response,
      source: ResponseSource::OfflineFallback,
    }
  }

  fn store_task(&self, request_key: String, response: NetResponse) -> impl Future<Output = ()> {
    let cache = self.cache.clone();
    let generation = self.generation.clone();
    let stored_at = self.clock.now_millis();

    async move {
      store(&cache, &generation, request_key, response, stored_at).await;
    }
  }

  fn refresh_task(&self, request: NetRequest) -> impl Future<Output = ()> {
    let cache = self.cache.clone();
    let generation = self.generation.clone();
    let network = Arc::clone(&self.network);
    let clock = Arc::clone(&self.clock);

    async move {
      match network.fetch(&request).await {
        Ok(response) if response.is_success() => {
          let key = request.cache_key();
          store(&cache, &generation, key, response, clock.now_millis()).await;
        }
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "media refresh skipped")
        }
        Err(e) => debug!(url = %request.url, error = %e, "media refresh failed"),
      }
    }
  }

  async fn spawn_background<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    let mut tasks = self.background.lock().await;
    // Reap finished writes so the set stays small
    while tasks.try_join_next().is_some() {}
    tasks.spawn(task);
  }
}

async fn store(
  cache: &ResponseCache,
  generation: &str,
  request_key: String,
  response: NetResponse,
  stored_at: i64,
) {
  let entry = CachedResponse {
    request_key,
    response,
    stored_at,
  };
  if let Err(e) = cache.put(generation, entry).await {
    warn!(error = %e, "response cache write failed");
  }
}

fn generation_name(version: &str) -> String {
  format!("campus-offline-{}", version)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::db::{Database, DatabaseOptions};
  use crate::net::testing::ScriptedNetwork;

  const ORIGIN: &str = "https://school.test";

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn settings(manifest: &[&str]) -> InterceptorSettings {
    InterceptorSettings {
      version: "v2".into(),
      origin: Url::parse(ORIGIN).unwrap(),
      manifest: manifest.iter().map(|s| s.to_string()).collect(),
      fallback_route: "/offline".into(),
      rules: ClassifierRules::default(),
    }
  }

  fn build(manifest: &[&str]) -> (Interceptor, Arc<ScriptedNetwork>, ResponseCache) {
    let network = Arc::new(ScriptedNetwork::new());
    network.route(url("/").as_str(), NetResponse::ok("home"));
    network.route(url("/offline").as_str(), NetResponse::ok("offline page"));

    let cache = ResponseCache::new(Database::in_memory(DatabaseOptions::default()).unwrap());
    let interceptor = Interceptor::new(
      settings(manifest),
      cache.clone(),
      network.clone(),
      Arc::new(ManualClock::at_epoch()),
    )
    .unwrap();
    (interceptor, network, cache)
  }

  async fn active(manifest: &[&str]) -> (Interceptor, Arc<ScriptedNetwork>, ResponseCache) {
    let (interceptor, network, cache) = build(manifest);
    interceptor.install().await.unwrap();
    interceptor.activate().await.unwrap();
    (interceptor, network, cache)
  }

  #[tokio::test]
  async fn test_previous_response_served_when_network_fails() {
    let (interceptor, network, _cache) = active(&["/", "/offline"]).await;
    network.route(url("/timetable").as_str(), NetResponse::ok("timetable v1"));

    let live = interceptor.handle(NetRequest::navigate(url("/timetable"))).await.unwrap();
    assert_eq!(live.source, ResponseSource::Network);
    interceptor.flush().await;

    network.set_online(false);
    let cached = interceptor.handle(NetRequest::navigate(url("/timetable"))).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.response.body, b"timetable v1".to_vec());
  }

  #[tokio::test]
  async fn test_unseen_navigation_gets_offline_fallback() {
    let (interceptor, network, _cache) = active(&["/", "/offline"]).await;
    network.set_online(false);

    let result = interceptor.handle(NetRequest::navigate(url("/grades"))).await.unwrap();
    assert_eq!(result.source, ResponseSource::OfflineFallback);
    assert_eq!(result.response.body, b"offline page".to_vec());
  }

  #[tokio::test]
  async fn test_unseen_subresource_failure_propagates() {
    let (interceptor, network, _cache) = active(&["/", "/offline"]).await;
    network.set_online(false);

    let result = interceptor.handle(NetRequest::get(url("/app.js"))).await;
    assert!(matches!(result, Err(Error::NetworkUnreachable(_))));
  }

  #[tokio::test]
  async fn test_builtin_fallback_when_fallback_route_not_cached() {
    let (interceptor, network, _cache) = active(&["/"]).await;
    network.set_online(false);

    let result = interceptor.handle(NetRequest::navigate(url("/grades"))).await.unwrap();
    assert_eq!(result.source, ResponseSource::OfflineFallback);
    assert_eq!(result.response.header("content-type"), Some("text/html; charset=utf-8"));
  }

  #[tokio::test]
  async fn test_api_requests_never_served_from_cache() {
    let (interceptor, network, cache) = active(&[]).await;
    network.route(url("/api/courses").as_str(), NetResponse::ok("[]"));

    interceptor.handle(NetRequest::get(url("/api/courses"))).await.unwrap();
    interceptor.flush().await;
    assert_eq!(cache.len(interceptor.generation()).await.unwrap(), 0);

    network.set_online(false);
    let result = interceptor.handle(NetRequest::navigate(url("/api/courses"))).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_media_is_cache_first_with_background_refresh() {
    let (interceptor, network, _cache) = active(&[]).await;
    let video = url("/videos/lesson-1.mp4");
    network.route(video.as_str(), NetResponse::ok("frames v1"));

    let first = interceptor.handle(NetRequest::get(video.clone())).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);
    interceptor.flush().await;

    network.route(video.as_str(), NetResponse::ok("frames v2"));
    let second = interceptor.handle(NetRequest::get(video.clone())).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body, b"frames v1".to_vec());
    interceptor.flush().await;

    let third = interceptor.handle(NetRequest::get(video.clone())).await.unwrap();
    assert_eq!(third.response.body, b"frames v2".to_vec());
    interceptor.flush().await;

    let video_calls = network
      .calls()
      .iter()
      .filter(|u| u.as_str() == video.as_str())
      .count();
    assert_eq!(video_calls, 3);
  }

  #[tokio::test]
  async fn test_media_miss_offline_falls_back_even_for_subresources() {
    let (interceptor, network, _cache) = active(&["/offline"]).await;
    network.set_online(false);

    let result = interceptor
      .handle(NetRequest::get(url("/videos/never.mp4")))
      .await
      .unwrap();
    assert_eq!(result.source, ResponseSource::OfflineFallback);
  }

  #[tokio::test]
  async fn test_error_statuses_are_not_cached() {
    let (interceptor, _network, cache) = active(&[]).await;

    let result = interceptor.handle(NetRequest::navigate(url("/missing"))).await.unwrap();
    assert_eq!(result.response.status, 404);
    interceptor.flush().await;

    assert_eq!(cache.len(interceptor.generation()).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let (interceptor, _network, cache) = build(&["/", "/offline", "/not-routed"]);

    let result = interceptor.install().await;
    assert!(matches!(result, Err(Error::FetchFailed { .. })));
    assert_eq!(cache.len(interceptor.generation()).await.unwrap(), 0);
    assert_eq!(interceptor.lifecycle(), Lifecycle::Parsed);
  }

  #[tokio::test]
  async fn test_activate_removes_other_generations_and_claims() {
    let (interceptor, _network, cache) = build(&["/"]);
    cache
      .put(
        "campus-offline-v1",
        CachedResponse {
          request_key: "GET https://school.test/".into(),
          response: NetResponse::ok("stale"),
          stored_at: 0,
        },
      )
      .await
      .unwrap();

    let mut lifecycle = interceptor.subscribe();
    interceptor.install().await.unwrap();
    interceptor.activate().await.unwrap();

    assert_eq!(cache.generations().await.unwrap(), vec!["campus-offline-v2".to_string()]);
    assert!(lifecycle.has_changed().unwrap());
    assert_eq!(*lifecycle.borrow_and_update(), Lifecycle::Active);
  }

  #[tokio::test]
  async fn test_requests_pass_through_before_activation() {
    let (interceptor, network, cache) = build(&[]);
    network.route(url("/page").as_str(), NetResponse::ok("page"));

    interceptor.handle(NetRequest::navigate(url("/page"))).await.unwrap();
    interceptor.flush().await;
    assert_eq!(cache.len(interceptor.generation()).await.unwrap(), 0);

    network.set_online(false);
    let result = interceptor.handle(NetRequest::navigate(url("/page"))).await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_installed_interceptor() {
    let (interceptor, _network, _cache) = build(&["/"]);

    interceptor.handle_message(Message::SkipWaiting).await.unwrap();
    assert_eq!(interceptor.lifecycle(), Lifecycle::Parsed);

    interceptor.install().await.unwrap();
    interceptor.handle_message(Message::SkipWaiting).await.unwrap();
    assert_eq!(interceptor.lifecycle(), Lifecycle::Active);

    let reply = interceptor.handle_message(Message::GetVersion).await.unwrap();
    assert_eq!(reply, Reply::Version("campus-offline-v2".into()));
  }
}
