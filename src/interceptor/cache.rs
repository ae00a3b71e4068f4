//! Generation-tagged response cache in SQLite.

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::net::NetResponse;

/// Schema for cache tables.
const RESPONSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (generation, key_hash)
);
"#;

/// A response stored under its request key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  /// Method plus absolute URL
  pub request_key: String,
  pub response: NetResponse,
  /// Epoch milliseconds
  pub stored_at: i64,
}

/// Request-keyed response store partitioned by generation name.
#[derive(Clone)]
pub struct ResponseCache {
  db: Database,
  ready: Arc<OnceCell<()>>,
}

impl ResponseCache {
  pub fn new(db: Database) -> Self {
    Self {
      db,
      ready: Arc::new(OnceCell::new()),
    }
  }

  /// Run database migrations for cache tables.
  async fn run_migrations(&self) -> Result<()> {
    self
      .ready
      .get_or_try_init(|| async {
        self
          .db
          .call(|conn| {
            conn.execute_batch(RESPONSE_SCHEMA)?;
            Ok(())
          })
          .await
      })
      .await?;
    Ok(())
  }

  /// Insert or overwrite one entry.
  pub async fn put(&self, generation: &str, entry: CachedResponse) -> Result<()> {
    self.put_all(generation, vec![entry]).await
  }

  /// Write every entry in one transaction, or none of them.
  pub async fn put_all(&self, generation: &str, entries: Vec<CachedResponse>) -> Result<()> {
    self.run_migrations().await?;
    let generation = generation.to_string();

    // Serialize before touching the database
    let rows = entries
      .into_iter()
      .map(|entry| {
        let headers = serde_json::to_string(&entry.response.headers)?;
        Ok::<_, Error>((entry, headers))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        for (entry, headers) in &rows {
          insert(&tx, &generation, entry, headers)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
  }

  pub async fn lookup(&self, generation: &str, request_key: &str) -> Result<Option<CachedResponse>> {
    self.run_migrations().await?;
    let generation = generation.to_string();
    let key_hash = hash_key(request_key);

    let row = self
      .db
      .call(move |conn| {
        let row: Option<(String, u16, String, Vec<u8>, i64)> = conn
          .query_row(
            "SELECT request_key, status, headers, body, stored_at FROM response_cache
             WHERE generation = ?1 AND key_hash = ?2",
            params![generation, key_hash],
            |row| {
              Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
              ))
            },
          )
          .optional()?;
        Ok(row)
      })
      .await?;

    match row {
      Some((request_key, status, headers, body, stored_at)) => Ok(Some(CachedResponse {
        request_key,
        response: NetResponse {
          status,
          headers: serde_json::from_str(&headers)?,
          body,
        },
        stored_at,
      })),
      None => Ok(None),
    }
  }

  /// Names of every generation holding at least one entry.
  pub async fn generations(&self) -> Result<Vec<String>> {
    self.run_migrations().await?;
    self
      .db
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT DISTINCT generation FROM response_cache ORDER BY generation")?;
        let names = stmt
          .query_map([], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
      })
      .await
  }

  /// Drop a whole generation. Returns the number of entries removed.
  pub async fn delete_generation(&self, generation: &str) -> Result<usize> {
    self.run_migrations().await?;
    let generation = generation.to_string();
    self
      .db
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM response_cache WHERE generation = ?1",
          params![generation],
        )?)
      })
      .await
  }

  pub async fn len(&self, generation: &str) -> Result<usize> {
    self.run_migrations().await?;
    let generation = generation.to_string();
    self
      .db
      .call(move |conn| {
        let count: i64 = conn.query_row(
          "SELECT COUNT(*) FROM response_cache WHERE generation = ?1",
          params![generation],
          |row| row.get(0),
        )?;
        Ok(count as usize)
      })
      .await
  }
}

fn insert(conn: &Connection, generation: &str, entry: &CachedResponse, headers: &str) -> Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO response_cache
       (generation, key_hash, request_key, status, headers, body, stored_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    params![
      generation,
      hash_key(&entry.request_key),
      entry.request_key,
      entry.response.status,
      headers,
      entry.response.body,
      entry.stored_at,
    ],
  )?;
  Ok(())
}

/// SHA256 hash for stable, fixed-length keys
fn hash_key(request_key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request_key.as_bytes());
  hex::encode(hasher.finalize())
}
