use std::sync::Arc;
use tracing::{info, warn};

use super::transport::UploadTransport;
use super::types::{ProgressSender, Transport, UploadFile, UploadIntent, UploadOutcome};
use crate::error::Error;

/// Files at or above this size skip the relay.
pub const DEFAULT_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;

pub struct UploadSelector {
  relay: Arc<dyn UploadTransport>,
  direct: Arc<dyn UploadTransport>,
  threshold: u64,
}

impl UploadSelector {
  pub fn new(relay: Arc<dyn UploadTransport>, direct: Arc<dyn UploadTransport>) -> Self {
    Self {
      relay,
      direct,
      threshold: DEFAULT_THRESHOLD_BYTES,
    }
  }

  pub fn with_threshold(mut self, threshold: u64) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn intent(&self, file: &UploadFile) -> UploadIntent {
    let transport = if file.byte_size() < self.threshold {
      Transport::Relay
    } else {
      Transport::Direct
    };
    UploadIntent {
      file_name: file.file_name.clone(),
      mime_type: file.mime_type.clone(),
      byte_size: file.byte_size(),
      transport,
    }
  }

  /// Upload through the transport chosen by size. A relay refusal for size
  /// gets exactly one direct attempt, whose result is final.
  pub async fn upload(&self, file: &UploadFile, progress: Option<ProgressSender>) -> UploadOutcome {
    let intent = self.intent(file);
    info!(
      file = %intent.file_name,
      size = intent.byte_size,
      transport = ?intent.transport,
      "starting upload"
    );

    let primary = match intent.transport {
      Transport::Relay => &self.relay,
      Transport::Direct => &self.direct,
    };
    let mut used = primary;
    let mut result = primary.send(file, progress.as_ref()).await;
    if primary.kind() == Transport::Relay && matches!(result, Err(Error::PayloadTooLarge)) {
      warn!(file = %intent.file_name, "relay refused payload size, retrying direct");
      used = &self.direct;
      result = self.direct.send(file, progress.as_ref()).await;
    }

    match &result {
      Ok(url) => info!(file = %intent.file_name, transport = ?used.kind(), url = %url, "upload finished"),
      Err(e) => warn!(file = %intent.file_name, transport = ?used.kind(), error = %e, "upload failed"),
    }
    UploadOutcome::from(result)
  }
}
