use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::transport::{progress_body, UploadTransport};
use super::types::{ProgressSender, Transport, UploadFile};
use crate::error::{Error, Result};

/// Small-file upload through the application server.
pub struct RelayTransport {
  client: reqwest::Client,
  endpoint: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayReply {
  success: bool,
  url: Option<String>,
  error: Option<String>,
}

impl RelayTransport {
  pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
    Self { client, endpoint }
  }
}

#[async_trait]
impl UploadTransport for RelayTransport {
  fn kind(&self) -> Transport {
    Transport::Relay
  }

  async fn send(&self, file: &UploadFile, progress: Option<&ProgressSender>) -> Result<String> {
    let body = progress_body(Transport::Relay, &file.payload, progress.cloned());
    let part = Part::stream_with_length(body, file.byte_size())
      .file_name(file.file_name.clone())
      .mime_str(&file.mime_type)?;
    let form = Form::new().part("file", part);

    debug!(file = %file.file_name, size = file.byte_size(), "relay upload");
    let response = self
      .client
      .post(self.endpoint.clone())
      .multipart(form)
      .send()
      .await?;

    let status = response.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
      return Err(Error::PayloadTooLarge);
    }

    let text = response.text().await?;
    if !status.is_success() {
      return Err(Error::ServerRejected {
        status: status.as_u16(),
        message: text,
      });
    }

    let reply: RelayReply = serde_json::from_str(&text)?;
    match reply {
      RelayReply {
        success: true,
        url: Some(url),
        ..
      } => Ok(url),
      RelayReply { error, .. } => Err(Error::ServerRejected {
        status: status.as_u16(),
        message: error.unwrap_or_else(|| "relay reported failure".to_string()),
      }),
    }
  }
}
