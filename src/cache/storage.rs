//! Cache storage trait and its SQLite and in-memory implementations.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::http::{RequestKey, Response};

/// Provider of named physical caches.
///
/// Every physical cache is an ordered key-value store: `keys` yields entries oldest-first,
/// and `put` on an existing key moves that key to the newest position. Writing to a cache
/// that does not exist yet creates it.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Create the named cache if it does not exist.
  async fn open(&self, cache: &str) -> Result<()>;

  async fn has_cache(&self, cache: &str) -> Result<bool>;

  /// Names of every physical cache currently present.
  async fn cache_names(&self) -> Result<Vec<String>>;

  /// Drop a physical cache with all of its entries. Returns whether it existed.
  async fn delete_cache(&self, cache: &str) -> Result<bool>;

  async fn match_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>>;

  async fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Remove one entry. Returns whether it existed.
  async fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool>;

  /// Entry keys in insertion order, oldest first.
  async fn keys(&self, cache: &str) -> Result<Vec<RequestKey>>;
}

type Entries = Vec<(RequestKey, Response)>;

/// In-process storage. Used for `storage: memory` and as the fake backend in tests.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<BTreeMap<String, Entries>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_caches<T>(&self, f: impl FnOnce(&mut BTreeMap<String, Entries>) -> T) -> Result<T> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| Error::storage(format!("Lock poisoned: {}", e)))?;
    Ok(f(&mut caches))
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn open(&self, cache: &str) -> Result<()> {
    self.with_caches(|caches| {
      caches.entry(cache.to_string()).or_default();
    })
  }

  async fn has_cache(&self, cache: &str) -> Result<bool> {
    self.with_caches(|caches| caches.contains_key(cache))
  }

  async fn cache_names(&self) -> Result<Vec<String>> {
    self.with_caches(|caches| caches.keys().cloned().collect())
  }

  async fn delete_cache(&self, cache: &str) -> Result<bool> {
    self.with_caches(|caches| caches.remove(cache).is_some())
  }

  async fn match_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    self.with_caches(|caches| {
      caches
        .get(cache)
        .and_then(|entries| entries.iter().find(|(k, _)| k == key))
        .map(|(_, response)| response.clone())
    })
  }

  async fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.with_caches(|caches| {
      let entries = caches.entry(cache.to_string()).or_default();
      entries.retain(|(k, _)| k != key);
      entries.push((key.clone(), response.clone()));
    })
  }

  async fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    self.with_caches(|caches| match caches.get_mut(cache) {
      Some(entries) => {
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        entries.len() != before
      }
      None => false,
    })
  }

  async fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    self.with_caches(|caches| {
      caches
        .get(cache)
        .map(|entries| entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default()
    })
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> color_eyre::Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| color_eyre::eyre::eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("precache").join("cache.db"))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::storage(format!("Lock poisoned: {}", e)))
  }
}

/// Schema for cache tables.
///
/// `entries.id` is AUTOINCREMENT so ids are never reused: ordering by id is insertion order,
/// and `INSERT OR REPLACE` on an existing key yields a fresh, newest id.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cache_name TEXT NOT NULL,
    key_digest TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (cache_name, key_digest)
);

CREATE INDEX IF NOT EXISTS idx_entries_cache ON entries(cache_name, id);
"#;

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open(&self, cache: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name) VALUES (?)",
        params![cache],
      )
      .map_err(|e| Error::storage(format!("Failed to open cache {}: {}", cache, e)))?;
    Ok(())
  }

  async fn has_cache(&self, cache: &str) -> Result<bool> {
    let conn = self.conn()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM caches WHERE name = ?",
        params![cache],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| Error::storage(format!("Failed to look up cache {}: {}", cache, e)))?;
    Ok(found.is_some())
  }

  async fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY name")
      .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| Error::storage(format!("Failed to list caches: {}", e)))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| Error::storage(format!("Failed to read cache name: {}", e)))?;

    Ok(names)
  }

  async fn delete_cache(&self, cache: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::storage(format!("Failed to begin transaction: {}", e)))?;

    tx.execute("DELETE FROM entries WHERE cache_name = ?", params![cache])
      .map_err(|e| Error::storage(format!("Failed to delete entries of {}: {}", cache, e)))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![cache])
      .map_err(|e| Error::storage(format!("Failed to delete cache {}: {}", cache, e)))?;

    tx.commit()
      .map_err(|e| Error::storage(format!("Failed to commit transaction: {}", e)))?;

    Ok(removed > 0)
  }

  async fn match_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    let conn = self.conn()?;
    let row: Option<(String, u16, String, Vec<u8>)> = conn
      .query_row(
        "SELECT response_url, status, headers, body FROM entries
         WHERE cache_name = ? AND key_digest = ?",
        params![cache, key.digest()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| Error::storage(format!("Failed to read {}: {}", key, e)))?;

    match row {
      Some((url, status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| Error::storage(format!("Failed to decode headers of {}: {}", key, e)))?;
        Ok(Some(Response {
          url,
          status,
          headers,
          body: body.into(),
        }))
      }
      None => Ok(None),
    }
  }

  async fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| Error::storage(format!("Failed to encode headers: {}", e)))?;

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| Error::storage(format!("Failed to begin transaction: {}", e)))?;

    tx.execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache],
    )
    .map_err(|e| Error::storage(format!("Failed to open cache {}: {}", cache, e)))?;

    tx.execute(
      "INSERT OR REPLACE INTO entries
         (cache_name, key_digest, method, url, response_url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache,
        key.digest(),
        key.method,
        key.url,
        response.url,
        response.status,
        headers,
        &response.body[..],
      ],
    )
    .map_err(|e| Error::storage(format!("Failed to store {}: {}", key, e)))?;

    tx.commit()
      .map_err(|e| Error::storage(format!("Failed to commit transaction: {}", e)))?;

    Ok(())
  }

  async fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM entries WHERE cache_name = ? AND key_digest = ?",
        params![cache, key.digest()],
      )
      .map_err(|e| Error::storage(format!("Failed to delete {}: {}", key, e)))?;
    Ok(removed > 0)
  }

  async fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT method, url FROM entries WHERE cache_name = ? ORDER BY id")
      .map_err(|e| Error::storage(format!("Failed to prepare query: {}", e)))?;

    let keys = stmt
      .query_map(params![cache], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| Error::storage(format!("Failed to list keys of {}: {}", cache, e)))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| Error::storage(format!("Failed to read key: {}", e)))?;

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Request;

  fn key(url: &str) -> RequestKey {
    Request::get(url).unwrap().key()
  }

  async fn exercise_ordering(storage: &dyn CacheStorage) {
    let a = key("https://example.com/a");
    let b = key("https://example.com/b");
    let c = key("https://example.com/c");

    for k in [&a, &b, &c] {
      storage
        .put("ns-v1", k, &Response::new(&k.url, 200, "x"))
        .await
        .unwrap();
    }
    assert_eq!(storage.keys("ns-v1").await.unwrap(), vec![a.clone(), b.clone(), c.clone()]);

    // Overwrite moves the key to the newest position
    storage
      .put("ns-v1", &a, &Response::new(&a.url, 200, "y"))
      .await
      .unwrap();
    assert_eq!(storage.keys("ns-v1").await.unwrap(), vec![b.clone(), c.clone(), a.clone()]);
    assert_eq!(
      storage.match_entry("ns-v1", &a).await.unwrap().unwrap().body,
      "y"
    );

    assert!(storage.delete("ns-v1", &b).await.unwrap());
    assert!(!storage.delete("ns-v1", &b).await.unwrap());
    assert_eq!(storage.keys("ns-v1").await.unwrap(), vec![c, a]);
  }

  async fn exercise_cache_lifecycle(storage: &dyn CacheStorage) {
    assert!(!storage.has_cache("one-v1").await.unwrap());
    storage.open("one-v1").await.unwrap();
    storage.open("one-v1").await.unwrap();
    assert!(storage.has_cache("one-v1").await.unwrap());
    assert!(storage.keys("one-v1").await.unwrap().is_empty());

    let k = key("https://example.com/");
    storage
      .put("two-v1", &k, &Response::new(&k.url, 200, "z"))
      .await
      .unwrap();
    assert_eq!(
      storage.cache_names().await.unwrap(),
      vec!["one-v1".to_string(), "two-v1".to_string()]
    );

    assert!(storage.delete_cache("two-v1").await.unwrap());
    assert!(!storage.delete_cache("two-v1").await.unwrap());
    assert!(storage.match_entry("two-v1", &k).await.unwrap().is_none());
    assert_eq!(storage.cache_names().await.unwrap(), vec!["one-v1".to_string()]);
  }

  #[tokio::test]
  async fn test_memory_storage_ordering() {
    exercise_ordering(&MemoryStorage::new()).await;
  }

  #[tokio::test]
  async fn test_memory_storage_cache_lifecycle() {
    exercise_cache_lifecycle(&MemoryStorage::new()).await;
  }

  #[tokio::test]
  async fn test_sqlite_storage_ordering() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open(&dir.path().join("cache.db")).unwrap();
    exercise_ordering(&storage).await;
  }

  #[tokio::test]
  async fn test_sqlite_storage_cache_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open(&dir.path().join("cache.db")).unwrap();
    exercise_cache_lifecycle(&storage).await;
  }

  #[tokio::test]
  async fn test_sqlite_storage_round_trips_headers_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let k = key("https://example.com/data.json");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      let mut response = Response::new("https://example.com/data.json", 203, vec![0u8, 1, 2]);
      response
        .headers
        .push(("content-type".into(), "application/json".into()));
      storage.put("data-v1", &k, &response).await.unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let cached = storage.match_entry("data-v1", &k).await.unwrap().unwrap();
    assert_eq!(cached.status, 203);
    assert_eq!(cached.header("Content-Type"), Some("application/json"));
    assert_eq!(cached.body.as_ref(), &[0u8, 1, 2]);
  }
}
