//! Online/offline state machine that redirects to offline-safe views and
//! restores the previous location on reconnect.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::signals::{Connectivity, ConnectivitySignals};
use crate::media::MediaStore;
use crate::session::SessionCache;

/// The application's view of "where the user is".
pub trait Navigator: Send + Sync + 'static {
  fn current_location(&self) -> String;
  fn navigate(&self, location: &str);
}

/// Views that render without a network.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineViews {
  /// Generic "you are offline" view
  pub offline_view: String,
  /// Library of downloaded lessons
  pub media_library_view: String,
  /// Location prefixes that need no network
  pub offline_safe_prefixes: Vec<String>,
}

impl Default for OfflineViews {
  fn default() -> Self {
    Self {
      offline_view: "/offline".to_string(),
      media_library_view: "/offline/library".to_string(),
      offline_safe_prefixes: vec!["/offline".to_string()],
    }
  }
}

impl OfflineViews {
  pub fn is_offline_safe(&self, location: &str) -> bool {
    location == self.offline_view
      || location == self.media_library_view
      || self
        .offline_safe_prefixes
        .iter()
        .any(|p| location.starts_with(p.as_str()))
  }
}

/// What a signal caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
  /// Same state as before; edge-triggered, so nothing happens
  Unchanged,
  /// Went offline from a view that needs the network
  Redirected {
    from: String,
    to: String,
    /// Display name of the cached identity, for greeting offline
    viewer: Option<String>,
  },
  /// Went offline while already on an offline-safe view
  AlreadyOfflineSafe,
  /// Back online; the saved location is restored after the settle delay
  RestoreScheduled { to: String },
  /// Back online with nothing to restore
  Stay,
}

pub struct ConnectivityController<N: Navigator> {
  navigator: Arc<N>,
  media: Arc<MediaStore>,
  session: Arc<SessionCache>,
  views: OfflineViews,
  settle_delay: Duration,
  state: Connectivity,
  /// Location to return to once the network is back
  saved_location: Arc<Mutex<Option<String>>>,
  pending_restore: Option<JoinHandle<()>>,
}

impl<N: Navigator> ConnectivityController<N> {
  pub fn new(
    navigator: Arc<N>,
    media: Arc<MediaStore>,
    session: Arc<SessionCache>,
    views: OfflineViews,
    settle_delay: Duration,
    online_now: bool,
  ) -> Self {
    Self {
      navigator,
      media,
      session,
      views,
      settle_delay,
      state: Connectivity::from_online(online_now),
      saved_location: Arc::new(Mutex::new(None)),
      pending_restore: None,
    }
  }

  pub fn state(&self) -> Connectivity {
    self.state
  }

  /// Feed one connectivity event through the state machine.
  pub async fn on_signal(&mut self, signal: Connectivity) -> Transition {
    if signal == self.state {
      return Transition::Unchanged;
    }
    self.state = signal;

    match signal {
      Connectivity::Offline => self.went_offline().await,
      Connectivity::Online => self.came_online().await,
    }
  }

  /// Process signals until the sender side closes.
  pub async fn run(mut self, mut signals: ConnectivitySignals) {
    while let Some(signal) = signals.next().await {
      let transition = self.on_signal(signal).await;
      debug!(?signal, ?transition, "connectivity signal handled");
    }

    if let Some(restore) = self.pending_restore.take() {
      let _ = restore.await;
    }
  }

  async fn went_offline(&mut self) -> Transition {
    // A reconnect that has not settled yet no longer applies.
    if let Some(restore) = self.pending_restore.take() {
      restore.abort();
    }

    let current = self.navigator.current_location();
    if self.views.is_offline_safe(&current) {
      return Transition::AlreadyOfflineSafe;
    }

    *self.saved_location.lock().await = Some(current.clone());

    let has_media = match self.media.is_empty().await {
      Ok(empty) => !empty,
      Err(e) => {
        warn!(error = %e, "could not inspect media store, assuming no downloads");
        false
      }
    };
    let target = if has_media {
      self.views.media_library_view.clone()
    } else {
      self.views.offline_view.clone()
    };

    let viewer = match self.session.read().await {
      Ok(identity) => identity.map(|i| i.display_name().to_string()),
      Err(e) => {
        debug!(error = %e, "no offline identity available");
        None
      }
    };

    info!(from = %current, to = %target, "offline, redirecting");
    self.navigator.navigate(&target);

    Transition::Redirected {
      from: current,
      to: target,
      viewer,
    }
  }

  async fn came_online(&mut self) -> Transition {
    let current = self.navigator.current_location();
    if !self.views.is_offline_safe(&current) {
      // The user moved on while offline; this episode's location is stale.
      self.saved_location.lock().await.take();
      return Transition::Stay;
    }

    let Some(to) = self.saved_location.lock().await.clone() else {
      return Transition::Stay;
    };

    let navigator = Arc::clone(&self.navigator);
    let saved = Arc::clone(&self.saved_location);
    let delay = self.settle_delay;

    self.pending_restore = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      // Taking the slot makes the restore happen once.
      if let Some(location) = saved.lock().await.take() {
        info!(to = %location, "back online, restoring location");
        navigator.navigate(&location);
      }
    }));

    Transition::RestoreScheduled { to }
  }
}
