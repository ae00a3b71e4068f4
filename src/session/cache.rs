//! Single-slot identity cache with lazy expiry.

use chrono::Duration;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::identity::{IdentityProfile, OfflineIdentity, SessionToken};
use crate::clock::Clock;
use crate::db::Database;
use crate::error::Result;

pub const DEFAULT_TTL_DAYS: i64 = 7;

const IDENTITY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_identity (
    slot TEXT PRIMARY KEY CHECK (slot = 'current'),
    record TEXT NOT NULL
);
"#;

const SLOT: &str = "current";

pub struct SessionCache {
  db: Database,
  clock: Arc<dyn Clock>,
  ttl: Duration,
  ready: OnceCell<()>,
}

impl SessionCache {
  pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
    Self {
      db,
      clock,
      ttl: Duration::days(DEFAULT_TTL_DAYS),
      ready: OnceCell::new(),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  async fn ensure_schema(&self) -> Result<()> {
    self
      .ready
      .get_or_try_init(|| async {
        self
          .db
          .call(|conn| {
            conn.execute_batch(IDENTITY_SCHEMA)?;
            Ok(())
          })
          .await
      })
      .await?;
    Ok(())
  }

  /// Replace whatever identity is cached with `profile`.
  pub async fn cache(&self, profile: IdentityProfile) -> Result<OfflineIdentity> {
    self.ensure_schema().await?;
    let now = self.clock.now_millis();
    let identity = OfflineIdentity::stamp(profile, now, now + self.ttl.num_milliseconds());
    let record = serde_json::to_string(&identity)?;

    self
      .db
      .call(move |conn| {
        conn.execute(
          "INSERT OR REPLACE INTO session_identity (slot, record) VALUES (?1, ?2)",
          params![SLOT, record],
        )?;
        Ok(())
      })
      .await?;

    debug!(subject = %identity.subject_id(), "cached offline identity");
    Ok(identity)
  }

  /// The cached identity, or `None` once it has expired. An expired record
  /// is purged on the read that notices it.
  pub async fn read(&self) -> Result<Option<OfflineIdentity>> {
    self.ensure_schema().await?;
    let now = self.clock.now_millis();

    let record = self
      .db
      .call(move |conn| {
        let record: Option<String> = conn
          .query_row(
            "SELECT record FROM session_identity WHERE slot = ?1",
            params![SLOT],
            |row| row.get(0),
          )
          .optional()?;

        let Some(record) = record else {
          return Ok(None);
        };
        let identity: OfflineIdentity = serde_json::from_str(&record)?;
        if identity.is_live_at(now) {
          return Ok(Some(identity));
        }

        conn.execute("DELETE FROM session_identity WHERE slot = ?1", params![SLOT])?;
        debug!(subject = %identity.subject_id(), "purged expired offline identity");
        Ok(None)
      })
      .await?;

    Ok(record)
  }

  pub async fn clear(&self) -> Result<()> {
    self.ensure_schema().await?;
    self
      .db
      .call(|conn| {
        conn.execute("DELETE FROM session_identity WHERE slot = ?1", params![SLOT])?;
        Ok(())
      })
      .await
  }

  /// Whether the UI should treat the user as signed in.
  ///
  /// Only for gating what is shown. Never use it to decide whether a
  /// privileged call may be made.
  pub async fn is_authenticated(&self, live: Option<&SessionToken>) -> bool {
    if live.is_some() {
      return true;
    }

    match self.read().await {
      Ok(identity) => identity.is_some(),
      Err(e) => {
        warn!(error = %e, "could not read offline identity");
        false
      }
    }
  }
}
