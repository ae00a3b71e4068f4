use serde::{Deserialize, Serialize};

/// A downloaded lesson asset with its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaObject {
  pub id: String,
  pub course_id: String,
  pub lesson_id: String,
  pub title: String,
  pub payload: Vec<u8>,
  pub source_url: String,
  /// Declared size. Totals are computed from this, not from the payload.
  pub byte_size: u64,
  /// Epoch milliseconds
  pub downloaded_at: i64,
}

/// Everything about a stored object except its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
  pub id: String,
  pub course_id: String,
  pub lesson_id: String,
  pub title: String,
  pub source_url: String,
  pub byte_size: u64,
  pub downloaded_at: i64,
  pub last_played_at: Option<i64>,
}

/// Caller-supplied description of a media download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
  pub id: String,
  pub course_id: String,
  pub lesson_id: String,
  pub title: String,
}

/// Handle to a stored object that the local proxy can serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
  pub id: String,
}

impl MediaHandle {
  pub const ROUTE_PREFIX: &'static str = "/__media/";

  /// Path under the local proxy that streams this object.
  pub fn local_path(&self) -> String {
    format!("{}{}", Self::ROUTE_PREFIX, self.id)
  }
}
