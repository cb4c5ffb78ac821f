use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub const CHANGE_LOG_TABLE: &str = "_alyx_change_log";

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {CHANGE_LOG_TABLE} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            operation TEXT NOT NULL,
            document_id TEXT NOT NULL,
            changed_fields TEXT,
            document_image TEXT,
            ts TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_change_log_id ON {CHANGE_LOG_TABLE}(id);"
    ))
}

/// A change-log row, including the document image (§4.A/§4.G): the
/// post-image for `insert`/`update`, the pre-image for `delete`. Carrying
/// the image inline lets the Realtime Hub evaluate subscription filters
/// against the document without an extra query per change (§4.G).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLogRecord {
    pub id: i64,
    pub collection: String,
    pub operation: Operation,
    pub document_id: String,
    pub changed_fields: Option<Vec<String>>,
    pub document_image: Option<serde_json::Value>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    fn parse(s: &str) -> Operation {
        match s {
            "insert" => Operation::Insert,
            "update" => Operation::Update,
            _ => Operation::Delete,
        }
    }
}

/// Appends one change-log row inside the mutation's own transaction, so the
/// row either commits with the mutation or rolls back with it (§4.A: "Every
/// mutation, inside its transaction, appends one row to the internal change
/// log"). `document_image` is the post-image for insert/update, the
/// pre-image for delete.
pub fn append(
    conn: &Connection,
    collection: &str,
    operation: Operation,
    document_id: &str,
    changed_fields: Option<&[String]>,
    document_image: Option<&serde_json::Value>,
) -> rusqlite::Result<i64> {
    let changed_fields_json = changed_fields.map(|fields| serde_json::to_string(fields).unwrap());
    let document_image_json = document_image.map(|doc| doc.to_string());
    let ts = alyx_base::to_rfc3339(alyx_base::now());
    conn.execute(
        &format!(
            "INSERT INTO {CHANGE_LOG_TABLE}
             (collection, operation, document_id, changed_fields, document_image, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        params![collection, operation.as_str(), document_id, changed_fields_json, document_image_json, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ChangeLogRecord> {
    let changed_fields_json: Option<String> = row.get(4)?;
    let document_image_json: Option<String> = row.get(5)?;
    let ts_str: String = row.get(6)?;
    Ok(ChangeLogRecord {
        id: row.get(0)?,
        collection: row.get(1)?,
        operation: Operation::parse(&row.get::<_, String>(2)?),
        document_id: row.get(3)?,
        changed_fields: changed_fields_json.and_then(|s| serde_json::from_str(&s).ok()),
        document_image: document_image_json.and_then(|s| serde_json::from_str(&s).ok()),
        ts: alyx_base::parse_rfc3339(&ts_str).unwrap_or_else(|_| alyx_base::now()),
    })
}

const SELECT_COLUMNS: &str = "id, collection, operation, document_id, changed_fields, document_image, ts";

/// Reads rows strictly past `watermark`, oldest first, for a change-feed
/// consumer (§4.G: "reads new change-log rows strictly past its watermark").
pub fn since(conn: &Connection, watermark: i64, limit: u32) -> rusqlite::Result<Vec<ChangeLogRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM {CHANGE_LOG_TABLE} WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![watermark, limit], row_to_record)?;
    rows.collect()
}

pub fn max_id(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(&format!("SELECT COALESCE(MAX(id), 0) FROM {CHANGE_LOG_TABLE}"), [], |r| r.get(0))
        .optional()
        .map(|v| v.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use serde_json::json;

    use super::*;

    #[test]
    fn append_and_read_since_watermark() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let id1 = append(&conn, "messages", Operation::Insert, "m1", None, Some(&json!({"id": "m1"}))).unwrap();
        let id2 = append(
            &conn,
            "messages",
            Operation::Update,
            "m1",
            Some(&["content".to_string()]),
            Some(&json!({"id": "m1", "content": "hi"})),
        )
        .unwrap();
        assert!(id2 > id1);

        let rows = since(&conn, id1, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id2);
        assert_eq!(rows[0].operation, Operation::Update);
        assert_eq!(rows[0].changed_fields, Some(vec!["content".to_string()]));
        assert_eq!(rows[0].document_image, Some(json!({"id": "m1", "content": "hi"})));
    }

    #[test]
    fn max_id_is_zero_when_empty() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(max_id(&conn).unwrap(), 0);
    }

    #[test]
    fn delete_can_carry_a_pre_image_for_late_filter_evaluation() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        append(&conn, "messages", Operation::Delete, "m1", None, Some(&json!({"id": "m1", "channel": "general"})))
            .unwrap();
        let rows = since(&conn, 0, 10).unwrap();
        assert_eq!(rows[0].document_image, Some(json!({"id": "m1", "channel": "general"})));
    }
}
