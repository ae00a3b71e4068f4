use async_trait::async_trait;

use super::types::{ProgressSender, Transport, UploadFile, UploadProgress};
use crate::error::Result;

const CHUNK_SIZE: usize = 64 * 1024;

/// One way of getting a file to storage. Returns the public URL.
#[async_trait]
pub trait UploadTransport: Send + Sync {
  fn kind(&self) -> Transport;

  async fn send(&self, file: &UploadFile, progress: Option<&ProgressSender>) -> Result<String>;
}

/// Request body that reports progress as reqwest pulls each chunk.
pub(crate) fn progress_body(
  transport: Transport,
  payload: &[u8],
  progress: Option<ProgressSender>,
) -> reqwest::Body {
  let total = payload.len() as u64;
  let chunks: Vec<Vec<u8>> = payload.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
  let mut sent = 0u64;

  let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
    sent += chunk.len() as u64;
    if let Some(tx) = &progress {
      // Receiver may have gone away; the upload carries on.
      let _ = tx.send(UploadProgress {
        transport,
        sent,
        total,
      });
    }
    Ok::<_, std::io::Error>(chunk)
  }));

  reqwest::Body::wrap_stream(stream)
}
