use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use alyx_base::AlyxError;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

use crate::{
    changelog::{self, ChangeLogRecord},
    constraint, ops,
    query::{Filter, Page, QueryOptions},
    tx::GatewayTx,
};

/// The `database {path, wal_mode, foreign_keys, busy_timeout,
/// max_open_conns, max_idle_conns, cache_size}` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub path: String,
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout: u64,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: usize,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,
    #[serde(default)]
    pub cache_size: Option<i64>,
}

fn default_true() -> bool {
    true
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_max_open_conns() -> usize {
    8
}
fn default_max_idle_conns() -> usize {
    4
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "alyx.sqlite".to_string(),
            wal_mode: true,
            foreign_keys: true,
            busy_timeout: default_busy_timeout_ms(),
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
            cache_size: None,
        }
    }
}

fn open_connection(config: &StorageConfig) -> anyhow::Result<Connection> {
    let conn = Connection::open(&config.path)?;
    conn.busy_timeout(std::time::Duration::from_millis(config.busy_timeout))?;
    if config.wal_mode {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
    if let Some(cache_size) = config.cache_size {
        conn.pragma_update(None, "cache_size", cache_size)?;
    }
    Ok(conn)
}

/// The read pool is a small fixed set of extra connections, round-robined;
/// the spec calls for "a small read pool" distinct from the single writer,
/// not a general-purpose elastic pool (§4.A).
struct ReadPool {
    conns: Vec<Arc<AsyncMutex<Connection>>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        let mut conns = Vec::with_capacity(config.max_idle_conns.max(1));
        for _ in 0..config.max_idle_conns.max(1) {
            conns.push(Arc::new(AsyncMutex::new(open_connection(config)?)));
        }
        Ok(Self { conns, next: AtomicUsize::new(0) })
    }

    fn pick(&self) -> Arc<AsyncMutex<Connection>> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        self.conns[idx].clone()
    }
}

/// Single-writer Storage Gateway (§4.A): all mutations serialize through one
/// connection guarded by an async mutex; reads fan out over a small pool.
#[derive(Clone)]
pub struct Gateway {
    writer: Arc<AsyncMutex<Connection>>,
    reads: Arc<ReadPool>,
}

impl Gateway {
    pub fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        let writer = open_connection(config)?;
        changelog::ensure_schema(&writer)?;
        let reads = ReadPool::open(config)?;
        Ok(Self {
            writer: Arc::new(AsyncMutex::new(writer)),
            reads: Arc::new(reads),
        })
    }

    /// Opens a writer and a single read-pool connection against the same
    /// named, shared-cache in-memory database (a fresh name per call, so
    /// concurrently-running tests never see each other's rows) — the reads
    /// pool must observe the writer's commits the same way it does against
    /// a real file in `open`.
    #[cfg(any(test, feature = "testing"))]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let uri = format!("file:{}?mode=memory&cache=shared", alyx_base::opaque_token());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_SHARED_CACHE;

        let writer = Connection::open_with_flags(&uri, flags)?;
        changelog::ensure_schema(&writer)?;
        let reads = ReadPool {
            conns: vec![Arc::new(AsyncMutex::new(Connection::open_with_flags(&uri, flags)?))],
            next: AtomicUsize::new(0),
        };
        Ok(Self {
            writer: Arc::new(AsyncMutex::new(writer)),
            reads: Arc::new(reads),
        })
    }

    /// Runs `f` inside a short-lived write transaction: BEGIN before, COMMIT
    /// on `Ok`, ROLLBACK on `Err`. Nested transactions are forbidden by
    /// construction — a second call from within `f` would deadlock on the
    /// same writer mutex.
    #[instrument(skip(self, f))]
    pub async fn tx<T>(&self, f: impl FnOnce(&Connection) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let conn = self.writer.lock().await;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                conn.execute_batch("COMMIT")?;
                Ok(value)
            },
            Err(err) => {
                let _ = conn.execute_batch("ROLLBACK");
                Err(err)
            },
        }
    }

    /// Starts a session-scoped write transaction that outlives this call,
    /// for use by the Transaction Manager (§4.B). Holds the single writer
    /// connection until the returned handle is committed or rolled back.
    pub async fn begin_tx(&self) -> anyhow::Result<GatewayTx> {
        let guard = self.writer.clone().lock_owned().await;
        guard.execute_batch("BEGIN IMMEDIATE")?;
        Ok(GatewayTx::new(guard))
    }

    pub async fn query(&self, collection: &str, opts: &QueryOptions) -> anyhow::Result<Page> {
        let conn = self.reads.pick();
        let conn = conn.lock().await;
        ops::query(&conn, collection, opts)
    }

    pub async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64> {
        let conn = self.reads.pick();
        let conn = conn.lock().await;
        ops::count(&conn, collection, filter)
    }

    pub async fn find_one(&self, collection: &str, id: &str) -> anyhow::Result<Option<Json>> {
        let conn = self.reads.pick();
        let conn = conn.lock().await;
        ops::find_one(&conn, collection, id)
    }

    pub async fn create(&self, collection: &str, row: Json) -> anyhow::Result<Json> {
        let collection = collection.to_string();
        self.tx(move |conn| ops::create(conn, &collection, row).map_err(constraint_to_anyhow)).await
    }

    pub async fn update(&self, collection: &str, id: &str, patch: Json) -> anyhow::Result<Option<Json>> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.tx(move |conn| ops::update(conn, &collection, &id, patch).map_err(constraint_to_anyhow)).await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.tx(move |conn| ops::delete(conn, &collection, &id).map_err(constraint_to_anyhow)).await
    }

    /// Reads change-log rows strictly past `watermark`, for the Event Bus
    /// and Change Feed pollers (§4.C, §4.G).
    pub async fn changes_since(&self, watermark: i64, limit: u32) -> anyhow::Result<Vec<ChangeLogRecord>> {
        let conn = self.reads.pick();
        let conn = conn.lock().await;
        Ok(changelog::since(&conn, watermark, limit)?)
    }

    pub async fn change_log_high_watermark(&self) -> anyhow::Result<i64> {
        let conn = self.reads.pick();
        let conn = conn.lock().await;
        Ok(changelog::max_id(&conn)?)
    }

    /// Runs `f` against the writer connection outside of a transaction, for
    /// one-time schema setup of internal tables owned by other crates (the
    /// event store, schedules, admin tokens) that share this same database
    /// per the single-writer design (§4.A).
    pub async fn ensure_schema(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<()>) -> anyhow::Result<()> {
        let conn = self.writer.lock().await;
        f(&conn)?;
        Ok(())
    }

    /// Runs a transactional body against the writer connection, for internal
    /// tables owned by other crates that need the same BEGIN/COMMIT/ROLLBACK
    /// semantics as `tx` without going through the document-collection ops.
    pub async fn with_writer<T>(&self, f: impl FnOnce(&Connection) -> anyhow::Result<T>) -> anyhow::Result<T> {
        self.tx(f).await
    }

    /// Runs `f` against a pooled read connection, for internal tables' read
    /// queries (owned by other crates) that do not go through `query`/`count`.
    pub async fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> anyhow::Result<T>) -> anyhow::Result<T> {
        let conn = self.reads.pick();
        let conn = conn.lock().await;
        f(&conn)
    }
}

fn constraint_to_anyhow(err: rusqlite::Error) -> anyhow::Error {
    match &err {
        rusqlite::Error::SqliteFailure(_, _) if constraint::classify(&err).is_some() => {
            anyhow::Error::new(constraint::classify_as_error(&err))
        },
        _ => anyhow::Error::new(err).context(AlyxError::internal("storage gateway error")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn create_find_update_delete_round_trip() {
        let gateway = Gateway::open_in_memory().unwrap();
        let created = gateway.create("widgets", json!({"name": "gizmo"})).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let updated = gateway.update("widgets", &id, json!({"name": "gadget"})).await.unwrap().unwrap();
        assert_eq!(updated["name"], "gadget");

        assert!(gateway.delete("widgets", &id).await.unwrap());
        assert!(!gateway.delete("widgets", &id).await.unwrap());
    }

    #[tokio::test]
    async fn create_appends_change_log_row_visible_on_writer_connection() {
        let gateway = Gateway::open_in_memory().unwrap();
        let before = {
            let conn = gateway.writer.lock().await;
            changelog::max_id(&conn).unwrap()
        };
        gateway.create("widgets", json!({"name": "gizmo"})).await.unwrap();
        let after = {
            let conn = gateway.writer.lock().await;
            changelog::max_id(&conn).unwrap()
        };
        assert!(after > before);
    }

    #[tokio::test]
    async fn unique_id_conflict_is_classified_as_constraint_violation() {
        let gateway = Gateway::open_in_memory().unwrap();
        let created = gateway.create("widgets", json!({"id": "dup", "name": "a"})).await.unwrap();
        assert_eq!(created["id"], "dup");
        let err = gateway.create("widgets", json!({"id": "dup", "name": "b"})).await.unwrap_err();
        let alyx = AlyxError::downcast_chain(&err).expect("classified AlyxError");
        assert_eq!(alyx.code, alyx_base::ErrorCode::ConstraintViolation);
    }
}
