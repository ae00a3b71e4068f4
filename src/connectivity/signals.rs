use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::net::{NetRequest, Network};

/// Network reachability as reported by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

impl Connectivity {
  pub fn from_online(online: bool) -> Self {
    if online {
      Connectivity::Online
    } else {
      Connectivity::Offline
    }
  }
}

/// Sending half handed to whatever observes the environment.
pub type SignalSender = mpsc::UnboundedSender<Connectivity>;

/// Stream of connectivity events consumed by the controller
pub struct ConnectivitySignals {
  rx: mpsc::UnboundedReceiver<Connectivity>,
}

impl ConnectivitySignals {
  /// Create a signal stream and the sender that feeds it.
  pub fn channel() -> (SignalSender, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  /// Stand-in for an environment connectivity event source: polls `url`
  /// every `interval` and emits only when reachability changes, starting
  /// with the first observation. Any HTTP response counts as online. The
  /// probe stops once the signal stream is dropped.
  pub fn probe(network: Arc<dyn Network>, url: Url, interval: Duration) -> (Self, JoinHandle<()>) {
    let (tx, signals) = Self::channel();

    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      let mut last = None;
      loop {
        ticker.tick().await;
        if tx.is_closed() {
          break;
        }
        let signal = Connectivity::from_online(is_reachable(network.as_ref(), &url).await);
        if last == Some(signal) {
          continue;
        }
        last = Some(signal);
        if tx.send(signal).is_err() {
          break;
        }
      }
    });

    (signals, handle)
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Connectivity> {
    self.rx.recv().await
  }
}

/// One-shot "is the network there" query.
pub async fn is_reachable(network: &dyn Network, url: &Url) -> bool {
  match network.fetch(&NetRequest::get(url.clone())).await {
    Ok(_) => true,
    Err(e) => {
      debug!(error = %e, "reachability probe failed");
      false
    }
  }
}
