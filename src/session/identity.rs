use serde::{Deserialize, Serialize};
use std::fmt;

/// Who the live session belongs to, as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProfile {
  pub subject_id: String,
  pub role: String,
  pub display_name: String,
  pub contact_address: String,
}

/// Last known identity, kept so offline pages can greet the user.
///
/// This is a display hint. It is not a credential and nothing converts it
/// into one; calls that need authorization take a [`SessionToken`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineIdentity {
  subject_id: String,
  role: String,
  display_name: String,
  contact_address: String,
  /// Epoch milliseconds
  cached_at: i64,
  /// Epoch milliseconds
  expires_at: i64,
}

impl OfflineIdentity {
  pub(crate) fn stamp(profile: IdentityProfile, cached_at: i64, expires_at: i64) -> Self {
    Self {
      subject_id: profile.subject_id,
      role: profile.role,
      display_name: profile.display_name,
      contact_address: profile.contact_address,
      cached_at,
      expires_at,
    }
  }

  pub fn subject_id(&self) -> &str {
    &self.subject_id
  }

  pub fn role(&self) -> &str {
    &self.role
  }

  pub fn display_name(&self) -> &str {
    &self.display_name
  }

  pub fn contact_address(&self) -> &str {
    &self.contact_address
  }

  pub fn cached_at(&self) -> i64 {
    self.cached_at
  }

  pub fn expires_at(&self) -> i64 {
    self.expires_at
  }

  pub fn is_live_at(&self, now_millis: i64) -> bool {
    self.expires_at > now_millis
  }
}

/// Live server-issued session credential.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
  pub fn new(value: impl Into<String>) -> Self {
    Self(value.into())
  }

  pub(crate) fn expose(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for SessionToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("SessionToken(***)")
  }
}
