//! SQLite-backed content store for units and registrations.
//!
//! Two logical tables: `units` (one row per fetched unit version, body
//! stored as a blob next to its hash and install state) and
//! `registrations` (one row per scope, four nullable slot columns
//! referencing unit ids).
//!
//! # Serialized access
//!
//! The store owns a single connection behind an async mutex. Every
//! operation runs inside [`ContentStore::with_conn`], which acquires that
//! mutex; only one logical connection is active across the whole store at
//! any time, so multi-step read-modify-write sequences never interleave.
//! The guard is released on every exit path, including errors.
//!
//! # Streamed blob writes
//!
//! Body length is not reliably known up front, so
//! [`ContentStore::ingest_body`] first spools the incoming stream to a
//! temporary file while feeding a running SHA-256, then inserts the row
//! with a `zeroblob` placeholder sized from the completed spool and copies
//! the spool into the blob incrementally. The whole body is never held in
//! memory and the hash is computed in a single pass.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::registration::SlotKind;
use crate::stream::ByteStream;
use crate::unit::{ContentHash, Headers, InstallState, UnitId, UnitRecord};

/// Buffer size for spool-to-blob copies.
const BLOB_COPY_BUF: usize = 64 * 1024;

/// Errors from persisted-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation expected a `units` row that is not there.
    #[error("unit {0} not found")]
    MissingUnit(String),

    /// An operation expected a `registrations` row that is not there.
    #[error("no registration row for scope {0}")]
    MissingRegistration(String),

    /// A stored column failed to decode.
    #[error("invalid {what} in stored row: {detail}")]
    InvalidRow {
        what: &'static str,
        detail: String,
    },

    #[error("header codec error: {0}")]
    HeaderCodec(#[from] serde_json::Error),
}

/// Raw `registrations` row.
#[derive(Debug, Clone)]
pub struct RegistrationRow {
    pub id: String,
    pub scope: String,
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub installing: Option<String>,
    pub redundant: Option<String>,
}

impl RegistrationRow {
    /// Unit id stored in the given slot column.
    pub fn slot_id(&self, kind: SlotKind) -> Option<&str> {
        match kind {
            SlotKind::Active => self.active.as_deref(),
            SlotKind::Waiting => self.waiting.as_deref(),
            SlotKind::Installing => self.installing.as_deref(),
            SlotKind::Redundant => self.redundant.as_deref(),
        }
    }
}

/// Persisted relational store with serialized transactional access.
pub struct ContentStore {
    conn: tokio::sync::Mutex<Connection>,
    spool_dir: PathBuf,
}

impl ContentStore {
    /// Open (or create) a store file and initialize the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory store, used by tests and ephemeral tooling.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS units (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                scope TEXT NOT NULL,
                headers TEXT NOT NULL,
                content BLOB,
                content_hash BLOB,
                install_state TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS units_scope ON units(scope);
            CREATE TABLE IF NOT EXISTS registrations (
                id TEXT PRIMARY KEY,
                scope TEXT NOT NULL UNIQUE,
                active TEXT,
                waiting TEXT,
                installing TEXT,
                redundant TEXT
            );
            "#,
        )?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
            spool_dir: std::env::temp_dir(),
        })
    }

    /// Run `body` inside the serialized execution context.
    ///
    /// Only one caller holds the context at a time; concurrent callers
    /// queue on the mutex and run one after another. Failures propagate
    /// and the context is released on every exit path.
    pub async fn with_conn<T, F>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut guard = self.conn.lock().await;
        body(&mut guard)
    }

    /// Stream a body into a new `units` row, returning its content hash.
    ///
    /// The row is created in the `downloading` state with the unit's
    /// identity, URL, scope and headers; the hash column is filled once
    /// the copy completes. The caller advances the state afterwards.
    pub async fn ingest_body(
        &self,
        unit: &UnitRecord,
        body: ByteStream,
    ) -> Result<ContentHash, StoreError> {
        let spool_path = self
            .spool_dir
            .join(format!("unitflow-{}.spool", unit.id.as_str()));

        let spooled = self.spool_body(&spool_path, body).await;
        let result = match spooled {
            Ok((hash, len)) => self.copy_spool_into_row(unit, &spool_path, hash, len).await,
            Err(err) => Err(err),
        };
        let _ = tokio::fs::remove_file(&spool_path).await;
        result
    }

    /// Phase 1: drain the stream to a spool file, hashing as chunks arrive.
    async fn spool_body(
        &self,
        spool_path: &Path,
        body: ByteStream,
    ) -> Result<(ContentHash, u64), StoreError> {
        let mut spool = tokio::fs::File::create(spool_path).await?;
        let mut hasher = Sha256::new();
        let mut len: u64 = 0;
        loop {
            let chunk = body.read().await;
            if chunk.done {
                break;
            }
            hasher.update(&chunk.data);
            len += chunk.data.len() as u64;
            spool.write_all(&chunk.data).await?;
        }
        spool.flush().await?;
        Ok((ContentHash::from(hasher.finalize()), len))
    }

    /// Phase 2: insert the row with a pre-sized placeholder blob and fill
    /// it incrementally from the spool.
    async fn copy_spool_into_row(
        &self,
        unit: &UnitRecord,
        spool_path: &Path,
        hash: ContentHash,
        len: u64,
    ) -> Result<ContentHash, StoreError> {
        let headers_json = unit.headers.to_json()?;
        let id = unit.id.clone();
        let url = unit.url.clone();
        let scope = unit.scope.clone();
        let spool_path = spool_path.to_path_buf();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO units (id, url, scope, headers, content, content_hash, install_state)
                 VALUES (?1, ?2, ?3, ?4, zeroblob(?5), NULL, ?6)",
                params![
                    id.as_str(),
                    url,
                    scope,
                    headers_json,
                    len as i64,
                    InstallState::Downloading.as_str(),
                ],
            )?;
            let rowid = tx.last_insert_rowid();
            {
                let mut blob = tx.blob_open(DatabaseName::Main, "units", "content", rowid, false)?;
                let mut spool = std::fs::File::open(&spool_path)?;
                let mut buf = vec![0u8; BLOB_COPY_BUF];
                loop {
                    let n = spool.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    blob.write_all(&buf[..n])?;
                }
            }
            Self::update_unit_hash(&tx, &id, &hash)?;
            tx.commit()?;
            debug!(unit = %id, bytes = len, hash = %hash, "unit body ingested");
            Ok(hash)
        })
        .await
    }

    /// Record a unit's content hash.
    pub fn update_unit_hash(
        conn: &Connection,
        id: &UnitId,
        hash: &ContentHash,
    ) -> Result<(), StoreError> {
        let rows = conn.execute(
            "UPDATE units SET content_hash = ?2 WHERE id = ?1",
            params![id.as_str(), &hash.as_bytes()[..]],
        )?;
        if rows == 0 {
            return Err(StoreError::MissingUnit(id.to_string()));
        }
        Ok(())
    }

    /// Persist a unit's install state.
    pub fn update_unit_state(
        conn: &Connection,
        id: &UnitId,
        state: InstallState,
    ) -> Result<(), StoreError> {
        let rows = conn.execute(
            "UPDATE units SET install_state = ?2 WHERE id = ?1",
            params![id.as_str(), state.as_str()],
        )?;
        if rows == 0 {
            return Err(StoreError::MissingUnit(id.to_string()));
        }
        Ok(())
    }

    /// Delete a unit row.
    pub fn delete_unit(conn: &Connection, id: &UnitId) -> Result<(), StoreError> {
        let rows = conn.execute("DELETE FROM units WHERE id = ?1", params![id.as_str()])?;
        if rows == 0 {
            return Err(StoreError::MissingUnit(id.to_string()));
        }
        Ok(())
    }

    /// Load a unit row by id.
    pub fn select_unit(conn: &Connection, id: &UnitId) -> Result<Option<UnitRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, url, scope, headers, content_hash, install_state
             FROM units WHERE id = ?1",
        )?;
        let raw = stmt
            .query_row(params![id.as_str()], Self::raw_unit_row)
            .optional()?;
        raw.map(Self::unit_from_raw).transpose()
    }

    /// Most recent non-redundant unit row for a scope.
    pub fn select_unit_for_scope(
        conn: &Connection,
        scope: &str,
    ) -> Result<Option<UnitRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, url, scope, headers, content_hash, install_state
             FROM units WHERE scope = ?1 AND install_state != 'redundant'
             ORDER BY rowid DESC LIMIT 1",
        )?;
        let raw = stmt.query_row(params![scope], Self::raw_unit_row).optional()?;
        raw.map(Self::unit_from_raw).transpose()
    }

    /// Number of unit rows stored for a scope.
    pub fn count_units_for_scope(conn: &Connection, scope: &str) -> Result<u64, StoreError> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM units WHERE scope = ?1",
            params![scope],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Full body bytes of a unit, or `None` when the row is absent.
    pub fn select_unit_content(
        conn: &Connection,
        id: &UnitId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let content = conn
            .query_row(
                "SELECT content FROM units WHERE id = ?1",
                params![id.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(content)
    }

    /// Insert a fresh registration row with empty slots.
    pub fn insert_registration(conn: &Connection, id: &str, scope: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO registrations (id, scope) VALUES (?1, ?2)",
            params![id, scope],
        )?;
        Ok(())
    }

    /// Load the registration row for a scope, optionally pinned to a
    /// specific id (for fetching one particular generation).
    pub fn select_registration(
        conn: &Connection,
        scope: &str,
        pinned_id: Option<&str>,
    ) -> Result<Option<RegistrationRow>, StoreError> {
        let map = |row: &rusqlite::Row<'_>| {
            Ok(RegistrationRow {
                id: row.get(0)?,
                scope: row.get(1)?,
                active: row.get(2)?,
                waiting: row.get(3)?,
                installing: row.get(4)?,
                redundant: row.get(5)?,
            })
        };
        let row = match pinned_id {
            Some(id) => conn
                .query_row(
                    "SELECT id, scope, active, waiting, installing, redundant
                     FROM registrations WHERE scope = ?1 AND id = ?2",
                    params![scope, id],
                    map,
                )
                .optional()?,
            None => conn
                .query_row(
                    "SELECT id, scope, active, waiting, installing, redundant
                     FROM registrations WHERE scope = ?1",
                    params![scope],
                    map,
                )
                .optional()?,
        };
        Ok(row)
    }

    /// Point one slot column at a unit (or clear it).
    pub fn update_registration_slot(
        conn: &Connection,
        registration_id: &str,
        slot: SlotKind,
        unit: Option<&UnitId>,
    ) -> Result<(), StoreError> {
        // Column names come from a fixed enum table, never from input.
        let sql = format!(
            "UPDATE registrations SET {} = ?2 WHERE id = ?1",
            slot.column()
        );
        let rows = conn.execute(&sql, params![registration_id, unit.map(UnitId::as_str)])?;
        if rows == 0 {
            return Err(StoreError::MissingRegistration(registration_id.to_string()));
        }
        Ok(())
    }

    /// Null out every slot column currently pointing at a unit.
    pub fn clear_unit_from_slots(
        conn: &Connection,
        registration_id: &str,
        unit: &UnitId,
    ) -> Result<(), StoreError> {
        for slot in SlotKind::ALL {
            let sql = format!(
                "UPDATE registrations SET {col} = NULL WHERE id = ?1 AND {col} = ?2",
                col = slot.column()
            );
            conn.execute(&sql, params![registration_id, unit.as_str()])?;
        }
        Ok(())
    }

    /// Delete a registration row.
    pub fn delete_registration(conn: &Connection, registration_id: &str) -> Result<(), StoreError> {
        let rows = conn.execute(
            "DELETE FROM registrations WHERE id = ?1",
            params![registration_id],
        )?;
        if rows == 0 {
            return Err(StoreError::MissingRegistration(registration_id.to_string()));
        }
        Ok(())
    }
}

/// Raw column tuple for a `units` row, decoded outside the rusqlite
/// callback so decode failures surface as [`StoreError`] rather than
/// sqlite errors.
type RawUnitRow = (String, String, String, String, Option<Vec<u8>>, String);

impl ContentStore {
    fn raw_unit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUnitRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn unit_from_raw(raw: RawUnitRow) -> Result<UnitRecord, StoreError> {
        let (id, url, scope, headers_json, hash_bytes, state_str) = raw;
        let headers = Headers::from_json(&headers_json)?;
        let state = InstallState::parse(&state_str).ok_or_else(|| StoreError::InvalidRow {
            what: "install_state",
            detail: state_str.clone(),
        })?;
        let content_hash = match hash_bytes {
            None => None,
            Some(bytes) => Some(ContentHash::from_bytes(&bytes).ok_or_else(|| {
                StoreError::InvalidRow {
                    what: "content_hash",
                    detail: format!("{} bytes", bytes.len()),
                }
            })?),
        };
        Ok(UnitRecord::from_parts(
            UnitId::from_string(id),
            url,
            scope,
            headers,
            content_hash,
            state,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample_unit(scope: &str) -> UnitRecord {
        let mut headers = Headers::new();
        headers.push("ETag", "\"abc\"");
        headers.push("Content-Type", "application/javascript");
        UnitRecord::new(format!("{scope}worker.js"), scope, headers)
    }

    async fn ingest(store: &ContentStore, unit: &UnitRecord, body: &[u8]) -> ContentHash {
        let stream = ByteStream::new();
        for part in body.chunks(3) {
            stream.enqueue(part.to_vec()).await.unwrap();
        }
        stream.close();
        store.ingest_body(unit, stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_ingest_body_stores_blob_and_hash() {
        let store = ContentStore::open_in_memory().unwrap();
        let unit = sample_unit("https://app.example/");
        let body = b"self.onmessage = () => {};";

        let hash = ingest(&store, &unit, body).await;
        assert_eq!(hash, ContentHash::from(Sha256::digest(body)));

        let id = unit.id.clone();
        let (loaded, content) = store
            .with_conn(move |conn| {
                let loaded = ContentStore::select_unit(conn, &id)?;
                let content = ContentStore::select_unit_content(conn, &id)?;
                Ok((loaded, content))
            })
            .await
            .unwrap();

        let loaded = loaded.expect("row present");
        assert_eq!(loaded.state, InstallState::Downloading);
        assert_eq!(loaded.content_hash, Some(hash));
        assert_eq!(loaded.headers.get("etag"), Some("\"abc\""));
        assert_eq!(loaded.url, unit.url);
        assert_eq!(content.as_deref(), Some(&body[..]));
    }

    #[tokio::test]
    async fn test_ingest_empty_body() {
        let store = ContentStore::open_in_memory().unwrap();
        let unit = sample_unit("https://empty.example/");
        let hash = ingest(&store, &unit, b"").await;
        assert_eq!(hash, ContentHash::from(Sha256::digest(b"")));

        let id = unit.id.clone();
        let content = store
            .with_conn(move |conn| ContentStore::select_unit_content(conn, &id))
            .await
            .unwrap();
        assert_eq!(content.as_deref(), Some(&b""[..]));
    }

    #[tokio::test]
    async fn test_update_and_delete_unit() {
        let store = ContentStore::open_in_memory().unwrap();
        let unit = sample_unit("https://app.example/");
        ingest(&store, &unit, b"body").await;

        let id = unit.id.clone();
        store
            .with_conn(move |conn| {
                ContentStore::update_unit_state(conn, &id, InstallState::Installing)?;
                let loaded = ContentStore::select_unit(conn, &id)?.expect("row present");
                assert_eq!(loaded.state, InstallState::Installing);
                ContentStore::delete_unit(conn, &id)?;
                assert!(ContentStore::select_unit(conn, &id)?.is_none());
                // Mutating a deleted row reports the missing unit.
                let err = ContentStore::update_unit_state(conn, &id, InstallState::Redundant)
                    .unwrap_err();
                assert!(matches!(err, StoreError::MissingUnit(_)));
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_select_unit_for_scope_excludes_redundant() {
        let store = ContentStore::open_in_memory().unwrap();
        let scope = "https://app.example/";
        let old = sample_unit(scope);
        let new = sample_unit(scope);
        ingest(&store, &old, b"v1").await;
        ingest(&store, &new, b"v2").await;

        let (old_id, new_id) = (old.id.clone(), new.id.clone());
        store
            .with_conn(move |conn| {
                let latest = ContentStore::select_unit_for_scope(conn, scope)?.expect("row");
                assert_eq!(latest.id, new_id);

                ContentStore::update_unit_state(conn, &new_id, InstallState::Redundant)?;
                let fallback = ContentStore::select_unit_for_scope(conn, scope)?.expect("row");
                assert_eq!(fallback.id, old_id);

                assert_eq!(ContentStore::count_units_for_scope(conn, scope)?, 2);
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_registration_row_round_trip() {
        let store = ContentStore::open_in_memory().unwrap();
        let scope = "https://app.example/";
        let unit = sample_unit(scope);
        let unit_id = unit.id.clone();

        store
            .with_conn(move |conn| {
                ContentStore::insert_registration(conn, "reg-1", scope)?;
                assert!(ContentStore::select_registration(conn, scope, None)?.is_some());
                assert!(ContentStore::select_registration(conn, scope, Some("other"))?.is_none());

                ContentStore::update_registration_slot(
                    conn,
                    "reg-1",
                    SlotKind::Waiting,
                    Some(&unit_id),
                )?;
                let row = ContentStore::select_registration(conn, scope, Some("reg-1"))?
                    .expect("row present");
                assert_eq!(row.slot_id(SlotKind::Waiting), Some(unit_id.as_str()));
                assert_eq!(row.slot_id(SlotKind::Active), None);

                ContentStore::clear_unit_from_slots(conn, "reg-1", &unit_id)?;
                let row = ContentStore::select_registration(conn, scope, None)?.expect("row");
                assert_eq!(row.slot_id(SlotKind::Waiting), None);

                ContentStore::delete_registration(conn, "reg-1")?;
                assert!(ContentStore::select_registration(conn, scope, None)?.is_none());
                let err = ContentStore::delete_registration(conn, "reg-1").unwrap_err();
                assert!(matches!(err, StoreError::MissingRegistration(_)));
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_with_conn_serializes_multi_step_writers() {
        // Two tasks each repeatedly write a matching pair of rows inside
        // one context; a reader must never observe a mismatched pair.
        let store = Arc::new(ContentStore::open_in_memory().unwrap());
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TABLE pair (k TEXT PRIMARY KEY, v INTEGER NOT NULL);
                     INSERT INTO pair VALUES ('a', 0), ('b', 0);",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let mut writers = Vec::new();
        for task in 0..2i64 {
            let store = Arc::clone(&store);
            writers.push(tokio::spawn(async move {
                for round in 0..25i64 {
                    let value = task * 1000 + round;
                    store
                        .with_conn(move |conn| {
                            conn.execute("UPDATE pair SET v = ?1 WHERE k = 'a'", [value])?;
                            conn.execute("UPDATE pair SET v = ?1 WHERE k = 'b'", [value])?;
                            Ok(())
                        })
                        .await
                        .unwrap();
                    let (a, b) = store
                        .with_conn(|conn| {
                            let a: i64 = conn.query_row(
                                "SELECT v FROM pair WHERE k = 'a'",
                                [],
                                |row| row.get(0),
                            )?;
                            let b: i64 = conn.query_row(
                                "SELECT v FROM pair WHERE k = 'b'",
                                [],
                                |row| row.get(0),
                            )?;
                            Ok((a, b))
                        })
                        .await
                        .unwrap();
                    assert_eq!(a, b, "observed interleaved partial write");
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("units.db");
        let unit = sample_unit("https://persist.example/");
        let hash;
        {
            let store = ContentStore::open(&path).unwrap();
            hash = ingest(&store, &unit, b"persisted body").await;
        }
        let store = ContentStore::open(&path).unwrap();
        let id = unit.id.clone();
        let loaded = store
            .with_conn(move |conn| ContentStore::select_unit(conn, &id))
            .await
            .unwrap()
            .expect("row survives reopen");
        assert_eq!(loaded.content_hash, Some(hash));
    }
}

