use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, instrument, warn};

use crate::db::{apply_pragmas, init_db};
use crate::error::Result;

/// Keyed storage partitioned into named collections.
///
/// Every call is committed before it returns, so a value written here
/// survives the host process being torn down right after the call.
pub trait Repository: Send + Sync {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Insert or overwrite.
    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Insert only if `key` is absent. Returns `true` when the row was written.
    fn insert_if_absent(&self, collection: &str, key: &str, value: &[u8]) -> Result<bool>;

    /// Overwrite only if `key` is present. Returns `true` when the row was
    /// written; a concurrent delete is never undone.
    fn replace_existing(&self, collection: &str, key: &str, value: &[u8]) -> Result<bool>;

    /// Returns `true` when a row was removed.
    fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// All entries of a collection ordered by key.
    fn list(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Byte length of a stored value without loading it.
    fn value_len(&self, collection: &str, key: &str) -> Result<Option<u64>>;

    /// Read `len` bytes starting at `offset`. Returns `None` when the key is
    /// missing and an empty vector past the end of the value.
    fn read_range(
        &self,
        collection: &str,
        key: &str,
        offset: u64,
        len: usize,
    ) -> Result<Option<Vec<u8>>>;
}

/// JSON helpers available on every repository.
pub trait RepositoryExt: Repository {
    fn get_json<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        match self.get(collection, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(collection, key, &bytes)
    }

    fn replace_json<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<bool> {
        let bytes = serde_json::to_vec(value)?;
        self.replace_existing(collection, key, &bytes)
    }

    /// Decode every entry, skipping (and logging) rows that fail to parse.
    fn list_json<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        Ok(self
            .list(collection)?
            .into_iter()
            .filter_map(|(key, bytes)| match serde_json::from_slice(&bytes) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(collection, key = %key, "skipping undecodable record: {e}");
                    None
                }
            })
            .collect())
    }
}

impl<R: Repository + ?Sized> RepositoryExt for R {}

/// SQLite-backed repository. One connection guarded by a `Mutex`.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an already-open connection; `init_db` is applied here.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl Repository for SqliteRepository {
    #[instrument(skip(self), level = "trace")]
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE collection = ?1 AND key = ?2",
                rusqlite::params![collection, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    #[instrument(skip(self, value), fields(bytes = value.len()), level = "trace")]
    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (collection, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value,
                                                       updated_at = excluded.updated_at",
            rusqlite::params![collection, key, value, now],
        )?;
        Ok(())
    }

    fn insert_if_absent(&self, collection: &str, key: &str, value: &[u8]) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "INSERT OR IGNORE INTO kv (collection, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![collection, key, value, now],
        )?;
        Ok(n > 0)
    }

    fn replace_existing(&self, collection: &str, key: &str, value: &[u8]) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE kv SET value = ?3, updated_at = ?4 WHERE collection = ?1 AND key = ?2",
            rusqlite::params![collection, key, value, now],
        )?;
        Ok(n > 0)
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM kv WHERE collection = ?1 AND key = ?2",
            rusqlite::params![collection, key],
        )?;
        if n > 0 {
            debug!(collection, key, "record deleted");
        }
        Ok(n > 0)
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare_cached("SELECT key, value FROM kv WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map([collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn value_len(&self, collection: &str, key: &str) -> Result<Option<u64>> {
        let conn = self.conn.lock().unwrap();
        let len = conn
            .query_row(
                "SELECT length(value) FROM kv WHERE collection = ?1 AND key = ?2",
                rusqlite::params![collection, key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(len.map(|n| n as u64))
    }

    fn read_range(
        &self,
        collection: &str,
        key: &str,
        offset: u64,
        len: usize,
    ) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        // substr() on a BLOB is byte-indexed and 1-based.
        let slice = conn
            .query_row(
                "SELECT substr(value, ?3, ?4) FROM kv WHERE collection = ?1 AND key = ?2",
                rusqlite::params![collection, key, offset as i64 + 1, len as i64],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()?;
        Ok(slice.map(|s| s.unwrap_or_default()))
    }
}

/// Process-memory repository used when durable storage is unavailable, and
/// in tests.
#[derive(Default)]
pub struct MemoryRepository {
    data: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Repository for MemoryRepository {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .get(&(collection.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        data.insert((collection.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn insert_if_absent(&self, collection: &str, key: &str, value: &[u8]) -> Result<bool> {
        let mut data = self.data.lock().unwrap();
        let k = (collection.to_string(), key.to_string());
        if data.contains_key(&k) {
            return Ok(false);
        }
        data.insert(k, value.to_vec());
        Ok(true)
    }

    fn replace_existing(&self, collection: &str, key: &str, value: &[u8]) -> Result<bool> {
        let mut data = self.data.lock().unwrap();
        match data.get_mut(&(collection.to_string(), key.to_string())) {
            Some(slot) => {
                *slot = value.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let mut data = self.data.lock().unwrap();
        Ok(data
            .remove(&(collection.to_string(), key.to_string()))
            .is_some())
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn value_len(&self, collection: &str, key: &str) -> Result<Option<u64>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .get(&(collection.to_string(), key.to_string()))
            .map(|v| v.len() as u64))
    }

    fn read_range(
        &self,
        collection: &str,
        key: &str,
        offset: u64,
        len: usize,
    ) -> Result<Option<Vec<u8>>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .get(&(collection.to_string(), key.to_string()))
            .map(|v| {
                let start = (offset as usize).min(v.len());
                let end = start.saturating_add(len).min(v.len());
                v[start..end].to_vec()
            }))
    }
}

/// Open the durable repository, falling back to memory-only on failure.
///
/// Returns the repository and whether it is durable. Never fails: callers
/// keep working with degraded durability instead of crashing.
pub fn open_repository(path: impl AsRef<Path>) -> (Arc<dyn Repository>, bool) {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(path = %parent.display(), "cannot create database directory: {e}");
        }
    }
    match SqliteRepository::open(path) {
        Ok(repo) => (Arc::new(repo), true),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "durable storage unavailable, running memory-only (state will not survive a restart)"
            );
            (Arc::new(MemoryRepository::new()), false)
        }
    }
}
