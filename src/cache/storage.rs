//! Cache storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::traits::{CacheEntry, QueryKey};
use crate::http::{headers_to_pairs, pairs_to_headers, Request, Response, ResponseType};

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
  /// Name of the cache that answered
  pub cache: String,
  pub entry: CacheEntry,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named caches, each a keyed set of entries. Cache names are
/// reported in creation order.
pub trait CacheStorage: Send + Sync {
  /// Open the named cache, creating it if absent.
  fn open(&self, name: &str) -> Result<()>;

  /// Whether the named cache exists.
  fn has(&self, name: &str) -> Result<bool>;

  /// All cache names, oldest first.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a cache and everything in it. Returns false if there was no such cache.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Get an entry by key from one cache.
  fn get_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>>;

  /// Store an entry, replacing any entry with the same key. The cache must exist.
  fn put(&self, name: &str, entry: &CacheEntry) -> Result<()> {
    self.put_all(name, std::slice::from_ref(entry))
  }

  /// Store several entries at once. Either all are written or none are.
  fn put_all(&self, name: &str, entries: &[CacheEntry]) -> Result<()>;

  /// All entries of one cache, ordered by URL.
  fn entries(&self, name: &str) -> Result<Vec<CacheEntry>>;

  /// Find the first cache, oldest first, holding an entry that answers the request.
  fn match_request(&self, request: &Request) -> Result<Option<CacheHit>> {
    let key = request.cache_hash();
    for cache in self.cache_names()? {
      if let Some(entry) = self.get_entry(&cache, &key)? {
        if entry.matches(request) {
          return Ok(Some(CacheHit { cache, entry }));
        }
      }
    }
    Ok(None)
  }
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Process-local storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<Vec<(String, HashMap<String, CacheEntry>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<(String, HashMap<String, CacheEntry>)>>> {
    self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open(&self, name: &str) -> Result<()> {
    let mut caches = self.lock()?;
    if !caches.iter().any(|(n, _)| n == name) {
      caches.push((name.to_string(), HashMap::new()));
    }
    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    Ok(self.lock()?.iter().any(|(n, _)| n == name))
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut caches = self.lock()?;
    let before = caches.len();
    caches.retain(|(n, _)| n != name);
    Ok(caches.len() != before)
  }

  fn get_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>> {
    Ok(
      self
        .lock()?
        .iter()
        .find(|(n, _)| n == name)
        .and_then(|(_, entries)| entries.get(key).cloned()),
    )
  }

  fn put_all(&self, name: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut caches = self.lock()?;
    let (_, stored) = caches
      .iter_mut()
      .find(|(n, _)| n == name)
      .ok_or_else(|| eyre!("Cache not found: {}", name))?;

    for entry in entries {
      stored.insert(entry.key.clone(), entry.clone());
    }
    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<CacheEntry>> {
    let caches = self.lock()?;
    let (_, stored) = caches
      .iter()
      .find(|(n, _)| n == name)
      .ok_or_else(|| eyre!("Cache not found: {}", name))?;

    let mut entries: Vec<CacheEntry> = stored.values().cloned().collect();
    entries.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
    Ok(entries)
  }
}

// ============================================================================
// SQLite storage
// ============================================================================

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open or create the database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A database that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named caches, ordered by creation
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Request/response pairs (response metadata as JSON, body as raw bytes)
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    vary TEXT NOT NULL,
    response TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_cache ON cache_entries(cache_name);
"#;

/// Response metadata as persisted next to the body.
#[derive(Debug, Serialize, Deserialize)]
struct StoredResponse {
  status: u16,
  status_text: String,
  headers: Vec<(String, String)>,
  response_type: ResponseType,
  url: Option<String>,
  redirected: bool,
}

/// Raw column values of one `cache_entries` row.
type EntryRow = (String, String, String, String, Vec<u8>, String);

const ENTRY_COLUMNS: &str = "request_key, url, vary, response, body, cached_at";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn decode_entry((key, url, vary, response, body, cached_at): EntryRow) -> Result<CacheEntry> {
  let url = Url::parse(&url).map_err(|e| eyre!("Failed to parse stored URL '{}': {}", url, e))?;
  let vary: Vec<(String, Option<String>)> =
    serde_json::from_str(&vary).map_err(|e| eyre!("Failed to deserialize vary: {}", e))?;
  let stored: StoredResponse = serde_json::from_str(&response)
    .map_err(|e| eyre!("Failed to deserialize response: {}", e))?;

  let response_url = stored
    .url
    .as_deref()
    .map(Url::parse)
    .transpose()
    .map_err(|e| eyre!("Failed to parse stored response URL: {}", e))?;

  Ok(CacheEntry {
    key,
    url,
    vary,
    response: Response {
      status: stored.status,
      status_text: stored.status_text,
      headers: pairs_to_headers(&stored.headers)?,
      body: body.into(),
      response_type: stored.response_type,
      url: response_url,
      redirected: stored.redirected,
    },
    cached_at: parse_datetime(&cached_at)?,
  })
}

fn encode_response(response: &Response) -> Result<String> {
  let stored = StoredResponse {
    status: response.status,
    status_text: response.status_text.clone(),
    headers: headers_to_pairs(&response.headers),
    response_type: response.response_type,
    url: response.url.as_ref().map(|u| u.to_string()),
    redirected: response.redirected,
  };
  serde_json::to_string(&stored).map_err(|e| eyre!("Failed to serialize response: {}", e))
}

impl CacheStorage for SqliteStorage {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO caches (name, position)
         VALUES (?, (SELECT COALESCE(MAX(position), 0) + 1 FROM caches))",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache {}: {}", name, e))?;

    Ok(())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn get_entry(&self, name: &str, key: &str) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;

    let row: Option<EntryRow> = conn
      .query_row(
        &format!(
          "SELECT {} FROM cache_entries WHERE cache_name = ? AND request_key = ?",
          ENTRY_COLUMNS
        ),
        params![name, key],
        read_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(decode_entry).transpose()
  }

  fn put_all(&self, name: &str, entries: &[CacheEntry]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists: Option<i64> = tx
      .query_row("SELECT 1 FROM caches WHERE name = ?", params![name], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;
    if exists.is_none() {
      return Err(eyre!("Cache not found: {}", name));
    }

    for entry in entries {
      let vary =
        serde_json::to_string(&entry.vary).map_err(|e| eyre!("Failed to serialize vary: {}", e))?;
      let response = encode_response(&entry.response)?;

      tx.execute(
        "INSERT OR REPLACE INTO cache_entries (cache_name, request_key, url, vary, response, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          name,
          entry.key,
          entry.url.as_str(),
          vary,
          response,
          &entry.response.body[..],
          entry.cached_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", entry.url, e))?;
    }

    // Dropping the transaction without commit rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entries(&self, name: &str) -> Result<Vec<CacheEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM cache_entries WHERE cache_name = ? ORDER BY url",
        ENTRY_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![name], read_row)
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<EntryRow>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows.into_iter().map(decode_entry).collect()
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
