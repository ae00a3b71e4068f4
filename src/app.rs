//! Wiring: builds every component from a [`Config`].

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{Database, DatabaseOptions};
use crate::interceptor::{Interceptor, InterceptorSettings, ResponseCache};
use crate::media::MediaStore;
use crate::net::{HttpNetwork, Network};
use crate::session::{SessionCache, SessionToken};
use crate::upload::{DirectTransport, RelayTransport, UploadSelector};

pub struct App {
  pub config: Config,
  pub db: Database,
  pub clock: Arc<dyn Clock>,
  pub network: Arc<dyn Network>,
  pub media: Arc<MediaStore>,
  pub session: Arc<SessionCache>,
  pub interceptor: Arc<Interceptor>,
  http: reqwest::Client,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db_path = config.database_path()?;
    let db = Database::open(
      &db_path,
      DatabaseOptions {
        quota_bytes: config.storage.quota_bytes,
      },
    )?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("campus-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::with_client(http.clone()));

    Self::with_parts(config, db, network, Arc::new(SystemClock), http)
  }

  /// Assemble from already-built parts.
  pub fn with_parts(
    config: Config,
    db: Database,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
  ) -> Result<Self> {
    let media = MediaStore::new(db.clone(), clock.clone())
      .with_budget(config.storage.media_budget_bytes);
    let session = SessionCache::new(db.clone(), clock.clone())
      .with_ttl(chrono::Duration::days(config.session.ttl_days));

    let interceptor = Interceptor::new(
      InterceptorSettings {
        version: config.interceptor.cache_version.clone(),
        origin: config.base_url()?,
        manifest: config.interceptor.manifest.clone(),
        fallback_route: config.interceptor.fallback_route.clone(),
        rules: config.interceptor.rules.clone(),
      },
      ResponseCache::new(db.clone()),
      network.clone(),
      clock.clone(),
    )?;

    Ok(Self {
      config,
      db,
      clock,
      network,
      media: Arc::new(media),
      session: Arc::new(session),
      interceptor: Arc::new(interceptor),
      http,
    })
  }

  /// Upload selector bound to the configured server and the given session.
  pub fn uploader(&self, token: Option<SessionToken>) -> Result<UploadSelector> {
    let server = &self.config.server;
    let relay = RelayTransport::new(self.http.clone(), self.config.endpoint(&server.relay_path)?);
    let direct = DirectTransport::new(
      self.http.clone(),
      self.config.endpoint(&server.mint_path)?,
      token,
    )
    .with_credential_header(self.config.upload.credential_header.clone());

    Ok(
      UploadSelector::new(Arc::new(relay), Arc::new(direct))
        .with_threshold(self.config.upload.threshold_bytes),
    )
  }
}
