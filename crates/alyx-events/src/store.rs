use alyx_base::{now, parse_rfc3339, to_rfc3339};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;

pub const EVENTS_TABLE: &str = "_alyx_events";

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {EVENTS_TABLE} (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            source TEXT NOT NULL,
            action TEXT NOT NULL,
            payload TEXT NOT NULL,
            metadata TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            process_at TEXT,
            processed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_events_pending ON {EVENTS_TABLE}(status, process_at);"
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Status {
        match s {
            "pending" => Status::Pending,
            "processing" => Status::Processing,
            "completed" => Status::Completed,
            _ => Status::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub action: String,
    pub payload: Json,
    pub metadata: Json,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub process_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    let payload: String = row.get(4)?;
    let metadata: String = row.get(5)?;
    let created_at: String = row.get(7)?;
    let process_at: Option<String> = row.get(8)?;
    let processed_at: Option<String> = row.get(9)?;
    Ok(Event {
        id: row.get(0)?,
        event_type: row.get(1)?,
        source: row.get(2)?,
        action: row.get(3)?,
        payload: serde_json::from_str(&payload).unwrap_or(Json::Null),
        metadata: serde_json::from_str(&metadata).unwrap_or(Json::Null),
        status: Status::parse(&row.get::<_, String>(6)?),
        created_at: parse_rfc3339(&created_at).unwrap_or_else(|_| now()),
        process_at: process_at.and_then(|s| parse_rfc3339(&s).ok()),
        processed_at: processed_at.and_then(|s| parse_rfc3339(&s).ok()),
    })
}

const SELECT_COLUMNS: &str =
    "id, event_type, source, action, payload, metadata, status, created_at, process_at, processed_at";

/// Inserts a new pending event row, created_at=now (§4.C `Publish`).
pub fn insert(
    conn: &Connection,
    id: &str,
    event_type: &str,
    source: &str,
    action: &str,
    payload: &Json,
    metadata: &Json,
    process_at: Option<DateTime<Utc>>,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {EVENTS_TABLE}
             (id, event_type, source, action, payload, metadata, status, created_at, process_at, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8, NULL)"
        ),
        params![
            id,
            event_type,
            source,
            action,
            payload.to_string(),
            metadata.to_string(),
            to_rfc3339(now()),
            process_at.map(to_rfc3339),
        ],
    )?;
    Ok(())
}

/// Selects up to `limit` oldest pending rows with `process_at IS NULL`
/// (the immediate/pending loop).
pub fn select_pending_immediate(conn: &Connection, limit: u32) -> rusqlite::Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM {EVENTS_TABLE}
         WHERE status = 'pending' AND process_at IS NULL
         ORDER BY created_at ASC, id ASC LIMIT ?1"
    ))?;
    let rows = stmt.query_map(params![limit], row_to_event)?;
    rows.collect()
}

/// Selects up to `limit` oldest pending rows with `process_at <= now`
/// (the scheduled/deferred loop).
pub fn select_pending_scheduled(conn: &Connection, limit: u32) -> rusqlite::Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM {EVENTS_TABLE}
         WHERE status = 'pending' AND process_at IS NOT NULL AND process_at <= ?1
         ORDER BY process_at ASC, id ASC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![to_rfc3339(now()), limit], row_to_event)?;
    rows.collect()
}

/// Attempts to claim a pending row for processing with a conditional update,
/// the single-flight guarantee from §4.C. Returns whether this caller won.
pub fn try_mark_processing(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        &format!("UPDATE {EVENTS_TABLE} SET status = 'processing' WHERE id = ?1 AND status = 'pending'"),
        params![id],
    )?;
    Ok(changed == 1)
}

/// Sets the terminal status and `processed_at = now`.
pub fn mark_terminal(conn: &Connection, id: &str, status: Status) -> rusqlite::Result<()> {
    conn.execute(
        &format!("UPDATE {EVENTS_TABLE} SET status = ?1, processed_at = ?2 WHERE id = ?3"),
        params![status.as_str(), to_rfc3339(now()), id],
    )?;
    Ok(())
}

pub fn find(conn: &Connection, id: &str) -> rusqlite::Result<Option<Event>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM {EVENTS_TABLE} WHERE id = ?1"),
        params![id],
        row_to_event,
    )
    .optional()
}

/// Counts events for `source` that have not yet reached a terminal status,
/// for the Schedule Engine's `skip_if_running`/`max_overlap` checks (§4.D).
pub fn count_non_terminal(conn: &Connection, source: &str) -> rusqlite::Result<u64> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {EVENTS_TABLE}
             WHERE source = ?1 AND status IN ('pending', 'processing')"
        ),
        params![source],
        |row| row.get(0),
    )
}

/// Selects failed events of a given type, for the Schedule Engine's retry
/// loop to inspect. Callers filter further by source membership in Rust.
pub fn select_failed(conn: &Connection, event_type: &str, limit: u32) -> rusqlite::Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM {EVENTS_TABLE}
         WHERE event_type = ?1 AND status = 'failed'
         ORDER BY processed_at ASC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![event_type, limit], row_to_event)?;
    rows.collect()
}

/// Selects all events for `source`, newest first, for admin inspection and
/// tests.
pub fn select_by_source(conn: &Connection, source: &str, limit: u32) -> rusqlite::Result<Vec<Event>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM {EVENTS_TABLE} WHERE source = ?1 ORDER BY created_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![source, limit], row_to_event)?;
    rows.collect()
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {EVENTS_TABLE} WHERE id = ?1"), params![id])?;
    Ok(())
}

/// Deletes terminal events older than `horizon`, for the retention cleanup
/// loop. Returns the number of rows removed.
pub fn delete_terminal_before(conn: &Connection, horizon: DateTime<Utc>) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "DELETE FROM {EVENTS_TABLE}
             WHERE status IN ('completed', 'failed') AND processed_at IS NOT NULL AND processed_at < ?1"
        ),
        params![to_rfc3339(horizon)],
    )
}
