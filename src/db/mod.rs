use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};

/// Options applied when a database connection is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseOptions {
  /// Hard ceiling on database size. Writes past it fail with `QuotaExceeded`.
  pub quota_bytes: Option<u64>,
}

/// Shared SQLite handle backing the media store, the response cache and the
/// identity slot.
///
/// Cloning is cheap; all clones share one connection. Work runs on the
/// blocking pool so async callers suspend instead of stalling the runtime.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path, options: DatabaseOptions) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StorageUnavailable(format!(
          "failed to create database directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StorageUnavailable(format!(
        "failed to open database at {}: {}",
        path.display(),
        e
      ))
    })?;

    // Other processes may hold the same file open.
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

    Self::configure(conn, options)
  }

  /// Open a private in-memory database.
  pub fn in_memory(options: DatabaseOptions) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::StorageUnavailable(format!("failed to open in-memory database: {}", e)))?;
    Self::configure(conn, options)
  }

  /// Directory holding the database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::StorageUnavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("campus-offline"))
  }

  fn configure(conn: Connection, options: DatabaseOptions) -> Result<Self> {
    if let Some(quota) = options.quota_bytes {
      let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
      let max_pages = (quota as i64 / page_size.max(1)).max(1);
      conn.pragma_update_and_check(None, "max_page_count", max_pages, |row| row.get::<_, i64>(0))?;
    }

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Run `f` against the connection on the blocking pool.
  pub async fn call<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut guard = conn
        .lock()
        .map_err(|e| Error::StorageUnavailable(format!("lock poisoned: {}", e)))?;
      f(&mut guard)
    })
    .await
    .map_err(|e| Error::Storage(format!("storage task failed: {}", e)))?
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_open_file_database_creates_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("offline.db");

    let db = Database::open(&path, DatabaseOptions::default()).unwrap();
    let one: i64 = db
      .call(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
      .await
      .unwrap();

    assert_eq!(one, 1);
    assert!(path.exists());
  }

  #[test]
  fn test_open_under_a_file_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();

    let result = Database::open(&blocker.join("offline.db"), DatabaseOptions::default());
    assert!(matches!(result, Err(Error::StorageUnavailable(_))));
  }
}
