//! Upload transport selection.
//!
//! Small files are relayed through the application server. Large files go
//! straight to storage through a short-lived signed URL, which keeps them
//! under the server's request-body ceiling.

mod direct;
mod relay;
mod selector;
mod transport;
mod types;

pub use direct::{DirectTransport, DEFAULT_CREDENTIAL_HEADER};
pub use relay::RelayTransport;
pub use selector::{UploadSelector, DEFAULT_THRESHOLD_BYTES};
pub use transport::UploadTransport;
pub use types::{
  ProgressSender, Transport, UploadFailure, UploadFile, UploadIntent, UploadOutcome,
  UploadProgress,
};
