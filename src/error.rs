//! Error taxonomy shared by the stores, the interceptor and the upload path.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The host refused persistent storage (unwritable directory, read-only
  /// database, poisoned connection).
  #[error("persistent storage unavailable: {0}")]
  StorageUnavailable(String),

  #[error("storage quota exceeded")]
  QuotaExceeded,

  #[error("not found: {0}")]
  NotFound(String),

  #[error("invalid url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("fetch failed for {url}: {reason}")]
  FetchFailed { url: String, reason: String },

  #[error("payload too large for relay upload")]
  PayloadTooLarge,

  #[error("destination write failed with status {status}")]
  DestinationWriteFailed { status: u16 },

  #[error("network unreachable: {0}")]
  NetworkUnreachable(String),

  /// A credential-bearing call was attempted without a live session.
  #[error("no live session")]
  Unauthenticated,

  #[error("server rejected request ({status}): {message}")]
  ServerRejected { status: u16, message: String },

  /// Any other SQLite failure.
  #[error("storage error: {0}")]
  Storage(String),

  #[error("malformed record: {0}")]
  Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
  fn from(err: rusqlite::Error) -> Self {
    match &err {
      rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
        ErrorCode::DiskFull => Error::QuotaExceeded,
        ErrorCode::CannotOpen
        | ErrorCode::ReadOnly
        | ErrorCode::PermissionDenied
        | ErrorCode::NotADatabase => Error::StorageUnavailable(err.to_string()),
        _ => Error::Storage(err.to_string()),
      },
      _ => Error::Storage(err.to_string()),
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    let url = err.url().map(|u| u.to_string()).unwrap_or_default();
    if err.is_connect() || err.is_timeout() {
      Error::NetworkUnreachable(err.to_string())
    } else {
      Error::FetchFailed {
        url,
        reason: err.to_string(),
      }
    }
  }
}
