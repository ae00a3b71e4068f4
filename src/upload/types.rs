use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Error;

/// A file the user picked for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
  pub file_name: String,
  pub mime_type: String,
  pub payload: Vec<u8>,
}

impl UploadFile {
  pub fn byte_size(&self) -> u64 {
    self.payload.len() as u64
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
  /// Multipart POST through the application server
  Relay,
  /// Signed-URL PUT straight to storage
  Direct,
}

/// Which transport one upload call starts with. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadIntent {
  pub file_name: String,
  pub mime_type: String,
  pub byte_size: u64,
  pub transport: Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
  pub transport: Transport,
  pub sent: u64,
  pub total: u64,
}

pub type ProgressSender = mpsc::UnboundedSender<UploadProgress>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailure {
  Network,
  ServerRejected,
  DestinationWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
  Success { url: String },
  Failure { reason: UploadFailure, detail: String },
}

impl UploadOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, UploadOutcome::Success { .. })
  }
}

impl From<crate::error::Result<String>> for UploadOutcome {
  fn from(result: crate::error::Result<String>) -> Self {
    let err = match result {
      Ok(url) => return UploadOutcome::Success { url },
      Err(err) => err,
    };
    let reason = match &err {
      Error::NetworkUnreachable(_) | Error::FetchFailed { .. } => UploadFailure::Network,
      Error::DestinationWriteFailed { .. } => UploadFailure::DestinationWrite,
      _ => UploadFailure::ServerRejected,
    };
    UploadOutcome::Failure {
      reason,
      detail: err.to_string(),
    }
  }
}
