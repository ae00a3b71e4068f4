use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::transport::{progress_body, UploadTransport};
use super::types::{ProgressSender, Transport, UploadFile};
use crate::error::{Error, Result};
use crate::session::SessionToken;

pub const DEFAULT_CREDENTIAL_HEADER: &str = "AccessKey";

/// Large-file upload: mint a signed destination, then PUT to it directly.
pub struct DirectTransport {
  client: reqwest::Client,
  mint_endpoint: Url,
  token: Option<SessionToken>,
  credential_header: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MintRequest<'a> {
  file_name: &'a str,
  file_type: &'a str,
  file_size: u64,
}

/// Single-use destination scoped to one storage path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedDestination {
  upload_url: String,
  cdn_url: String,
  short_lived_credential: String,
  storage_path: String,
}

impl DirectTransport {
  pub fn new(client: reqwest::Client, mint_endpoint: Url, token: Option<SessionToken>) -> Self {
    Self {
      client,
      mint_endpoint,
      token,
      credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
    }
  }

  pub fn with_credential_header(mut self, header: impl Into<String>) -> Self {
    self.credential_header = header.into();
    self
  }

  async fn mint(&self, file: &UploadFile) -> Result<SignedDestination> {
    let token = self.token.as_ref().ok_or(Error::Unauthenticated)?;

    let response = self
      .client
      .post(self.mint_endpoint.clone())
      .bearer_auth(token.expose())
      .json(&MintRequest {
        file_name: &file.file_name,
        file_type: &file.mime_type,
        file_size: file.byte_size(),
      })
      .send()
      .await?;

    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
      return Err(Error::ServerRejected {
        status: status.as_u16(),
        message: text,
      });
    }

    Ok(serde_json::from_str(&text)?)
  }
}

#[async_trait]
impl UploadTransport for DirectTransport {
  fn kind(&self) -> Transport {
    Transport::Direct
  }

  async fn send(&self, file: &UploadFile, progress: Option<&ProgressSender>) -> Result<String> {
    let destination = self.mint(file).await?;
    let upload_url = Url::parse(&destination.upload_url).map_err(|e| Error::InvalidUrl {
      url: destination.upload_url.clone(),
      reason: e.to_string(),
    })?;
    debug!(path = %destination.storage_path, size = file.byte_size(), "direct upload");

    let body = progress_body(Transport::Direct, &file.payload, progress.cloned());
    let response = self
      .client
      .put(upload_url)
      .header(
        self.credential_header.as_str(),
        destination.short_lived_credential.as_str(),
      )
      .header(CONTENT_TYPE, file.mime_type.as_str())
      .header(CONTENT_LENGTH, file.byte_size())
      .body(body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(Error::DestinationWriteFailed {
        status: status.as_u16(),
      });
    }

    Ok(destination.cdn_url)
  }
}
