//! SQLite-backed store for downloaded lesson media.

use futures::stream::{self, Stream, TryStreamExt};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use super::types::{DownloadRequest, MediaHandle, MediaMetadata, MediaObject};
use crate::clock::Clock;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::net::{NetRequest, Network};

/// Rows fetched per round trip by `list_all`.
const PAGE_SIZE: usize = 64;

const MEDIA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS media_objects (
    id TEXT PRIMARY KEY,
    course_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    title TEXT NOT NULL,
    payload BLOB NOT NULL,
    source_url TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    downloaded_at INTEGER NOT NULL,
    last_played_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_media_objects_course
    ON media_objects(course_id);
"#;

const METADATA_COLUMNS: &str =
  "id, course_id, lesson_id, title, source_url, byte_size, downloaded_at, last_played_at";

/// Position of a `list_all` scan.
enum Cursor {
  Start,
  After(String),
  Done,
}

/// Durable keyed blob store for offline lesson media.
pub struct MediaStore {
  db: Database,
  clock: Arc<dyn Clock>,
  /// Optional byte budget enforced on every `put`
  budget_bytes: Option<u64>,
  ready: OnceCell<()>,
  unavailable: AtomicBool,
}

impl MediaStore {
  pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
    Self {
      db,
      clock,
      budget_bytes: None,
      ready: OnceCell::new(),
      unavailable: AtomicBool::new(false),
    }
  }

  /// Cap the sum of declared sizes; older entries are evicted to make room.
  pub fn with_budget(mut self, budget_bytes: Option<u64>) -> Self {
    self.budget_bytes = budget_bytes;
    self
  }

  /// Create the media table if needed. Safe to call any number of times.
  pub async fn initialize(&self) -> Result<()> {
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(Error::StorageUnavailable(
        "media store failed to initialize".into(),
      ));
    }

    let result = self
      .ready
      .get_or_try_init(|| async {
        self
          .db
          .call(|conn| {
            conn.execute_batch(MEDIA_SCHEMA)?;
            Ok(())
          })
          .await
      })
      .await;

    match result {
      Ok(_) => Ok(()),
      Err(e) => {
        // Report the first failure only; later calls fail quietly.
        if !self.unavailable.swap(true, Ordering::SeqCst) {
          warn!(error = %e, "media store unavailable, offline downloads disabled");
        }
        Err(match e {
          Error::StorageUnavailable(msg) => Error::StorageUnavailable(msg),
          other => Error::StorageUnavailable(other.to_string()),
        })
      }
    }
  }

  /// Insert or overwrite an object by id.
  pub async fn put(&self, object: MediaObject) -> Result<()> {
    self.initialize().await?;
    let budget = self.budget_bytes;
    let id = object.id.clone();
    let byte_size = sql_size(object.byte_size)?;

    let evicted = self
      .db
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR REPLACE INTO media_objects
             (id, course_id, lesson_id, title, payload, source_url, byte_size, downloaded_at, last_played_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)",
          params![
            object.id,
            object.course_id,
            object.lesson_id,
            object.title,
            object.payload,
            object.source_url,
            byte_size,
            object.downloaded_at,
          ],
        )?;

        let evicted = match budget {
          Some(budget) => evict_over_budget(&tx, budget, &object.id)?,
          None => Vec::new(),
        };

        tx.commit()?;
        Ok(evicted)
      })
      .await?;

    for victim in &evicted {
      info!(id = %victim, kept = %id, "evicted media object to stay within budget");
    }
    debug!(id = %id, "stored media object");
    Ok(())
  }

  pub async fn get(&self, id: &str) -> Result<MediaObject> {
    self.initialize().await?;
    let key = id.to_string();

    let object = self
      .db
      .call(move |conn| {
        let object = conn
          .query_row(
            "SELECT id, course_id, lesson_id, title, payload, source_url, byte_size, downloaded_at
             FROM media_objects WHERE id = ?1",
            params![key],
            |row| {
              Ok(MediaObject {
                id: row.get(0)?,
                course_id: row.get(1)?,
                lesson_id: row.get(2)?,
                title: row.get(3)?,
                payload: row.get(4)?,
                source_url: row.get(5)?,
                byte_size: row.get(6)?,
                downloaded_at: row.get(7)?,
              })
            },
          )
          .optional()?;
        Ok(object)
      })
      .await?;

    object.ok_or_else(|| Error::NotFound(format!("media object {}", id)))
  }

  /// Metadata for every stored object, fetched page by page as the stream
  /// is polled. Each call starts a fresh scan.
  pub fn list_all(&self) -> impl Stream<Item = Result<MediaMetadata>> + '_ {
    stream::try_unfold(Cursor::Start, move |cursor| self.next_page(cursor))
      .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, Error>)))
      .try_flatten()
  }

  async fn next_page(&self, cursor: Cursor) -> Result<Option<(Vec<MediaMetadata>, Cursor)>> {
    let after = match cursor {
      Cursor::Done => return Ok(None),
      Cursor::Start => None,
      Cursor::After(id) => Some(id),
    };

    self.initialize().await?;
    let page = self
      .db
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM media_objects WHERE ?1 IS NULL OR id > ?1 ORDER BY id LIMIT ?2",
          METADATA_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![after, PAGE_SIZE as i64], metadata_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    if page.is_empty() {
      return Ok(None);
    }
    let next = match page.last() {
      Some(last) if page.len() == PAGE_SIZE => Cursor::After(last.id.clone()),
      _ => Cursor::Done,
    };
    Ok(Some((page, next)))
  }

  /// Metadata for one course, served from the course index.
  pub async fn list_course(&self, course_id: &str) -> Result<Vec<MediaMetadata>> {
    self.initialize().await?;
    let course_id = course_id.to_string();

    self
      .db
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM media_objects WHERE course_id = ?1 ORDER BY lesson_id, id",
          METADATA_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![course_id], metadata_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
  }

  /// Remove an object. Removing an absent id succeeds.
  pub async fn delete(&self, id: &str) -> Result<()> {
    self.initialize().await?;
    let key = id.to_string();

    let removed = self
      .db
      .call(move |conn| Ok(conn.execute("DELETE FROM media_objects WHERE id = ?1", params![key])?))
      .await?;

    debug!(id = %id, removed, "deleted media object");
    Ok(())
  }

  /// Sum of declared sizes across all entries.
  pub async fn total_bytes(&self) -> Result<u64> {
    self.initialize().await?;
    self.db.call(|conn| total_bytes_in(conn)).await
  }

  pub async fn is_empty(&self) -> Result<bool> {
    self.initialize().await?;
    self
      .db
      .call(|conn| {
        let any: bool =
          conn.query_row("SELECT EXISTS(SELECT 1 FROM media_objects)", [], |row| row.get(0))?;
        Ok(!any)
      })
      .await
  }

  /// Record a playback so budget eviction prefers untouched entries.
  pub async fn mark_played(&self, id: &str) -> Result<()> {
    self.initialize().await?;
    let key = id.to_string();
    let now = self.clock.now_millis();

    let updated = self
      .db
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE media_objects SET last_played_at = ?1 WHERE id = ?2",
          params![now, key],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::NotFound(format!("media object {}", id)));
    }
    Ok(())
  }

  /// Fetch `url` and store it for offline playback.
  ///
  /// Nothing is stored unless the whole body arrived with a success status.
  pub async fn download(
    &self,
    network: &dyn Network,
    url: &Url,
    request: DownloadRequest,
  ) -> Result<MediaHandle> {
    // Surface storage problems before spending bandwidth.
    self.initialize().await?;

    let response = network
      .fetch(&NetRequest::get(url.clone()))
      .await
      .map_err(|e| Error::FetchFailed {
        url: url.to_string(),
        reason: e.to_string(),
      })?;

    if !response.is_success() {
      return Err(Error::FetchFailed {
        url: url.to_string(),
        reason: format!("HTTP {}", response.status),
      });
    }

    let object = MediaObject {
      id: request.id,
      course_id: request.course_id,
      lesson_id: request.lesson_id,
      title: request.title,
      byte_size: response.body.len() as u64,
      payload: response.body,
      source_url: url.to_string(),
      downloaded_at: self.clock.now_millis(),
    };
    let handle = MediaHandle {
      id: object.id.clone(),
    };
    let size = object.byte_size;

    self.put(object).await?;
    info!(id = %handle.id, bytes = size, url = %url, "downloaded media for offline use");
    Ok(handle)
  }
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<MediaMetadata> {
  Ok(MediaMetadata {
    id: row.get(0)?,
    course_id: row.get(1)?,
    lesson_id: row.get(2)?,
    title: row.get(3)?,
    source_url: row.get(4)?,
    byte_size: row.get(5)?,
    downloaded_at: row.get(6)?,
    last_played_at: row.get(7)?,
  })
}

fn total_bytes_in(conn: &Connection) -> Result<u64> {
  let total: u64 = conn.query_row(
    "SELECT COALESCE(SUM(byte_size), 0) FROM media_objects",
    [],
    |row| row.get(0),
  )?;
  Ok(total)
}

/// Sizes are stored as SQLite INTEGER, which is signed.
fn sql_size(byte_size: u64) -> Result<i64> {
  i64::try_from(byte_size)
    .map_err(|_| Error::Storage(format!("byte size {} does not fit in the database", byte_size)))
}

/// Delete least recently played (or stored) entries until the total fits.
/// The entry identified by `keep` is never a candidate.
fn evict_over_budget(conn: &Connection, budget: u64, keep: &str) -> Result<Vec<String>> {
  let own: u64 = conn.query_row(
    "SELECT byte_size FROM media_objects WHERE id = ?1",
    params![keep],
    |row| row.get(0),
  )?;
  if own > budget {
    return Err(Error::QuotaExceeded);
  }

  let mut total = total_bytes_in(conn)?;
  if total <= budget {
    return Ok(Vec::new());
  }

  let candidates: Vec<(String, u64)> = {
    let mut stmt = conn.prepare(
      "SELECT id, byte_size FROM media_objects
       WHERE id != ?1
       ORDER BY COALESCE(last_played_at, downloaded_at) ASC, id ASC",
    )?;
    let rows = stmt
      .query_map(params![keep], |row| Ok((row.get(0)?, row.get(1)?)))?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    rows
  };

  let mut evicted = Vec::new();
  for (id, size) in candidates {
    if total <= budget {
      break;
    }
    conn.execute("DELETE FROM media_objects WHERE id = ?1", params![id])?;
    total = total.saturating_sub(size);
    evicted.push(id);
  }

  Ok(evicted)
}
