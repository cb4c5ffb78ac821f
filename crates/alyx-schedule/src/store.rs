use alyx_base::{parse_rfc3339, to_rfc3339};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;

use crate::types::{Schedule, ScheduleExecConfig, ScheduleKind};

pub const SCHEDULES_TABLE: &str = "_alyx_schedules";

pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {SCHEDULES_TABLE} (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            expression TEXT NOT NULL,
            next_run TEXT NOT NULL,
            last_run TEXT,
            timezone TEXT NOT NULL,
            execution_count INTEGER NOT NULL DEFAULT 0,
            skip_if_running INTEGER NOT NULL DEFAULT 0,
            max_overlap INTEGER NOT NULL DEFAULT 0,
            retry_on_failure INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 0,
            input TEXT NOT NULL DEFAULT 'null'
        );
        CREATE INDEX IF NOT EXISTS idx_schedules_next_run ON {SCHEDULES_TABLE}(next_run);"
    ))
}

const SELECT_COLUMNS: &str = "id, kind, expression, next_run, last_run, timezone, execution_count,
    skip_if_running, max_overlap, retry_on_failure, max_retries, input";

fn to_sql_err(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(err.to_string())))
}

fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<Schedule> {
    let kind_tag: String = row.get(1)?;
    let expression: String = row.get(2)?;
    let next_run: String = row.get(3)?;
    let last_run: Option<String> = row.get(4)?;
    let input: String = row.get(11)?;
    let kind = ScheduleKind::from_parts(&kind_tag, &expression).map_err(to_sql_err)?;
    Ok(Schedule {
        id: row.get(0)?,
        kind,
        next_run: parse_rfc3339(&next_run).map_err(|e| to_sql_err(e.into()))?,
        last_run: last_run.and_then(|s| parse_rfc3339(&s).ok()),
        timezone: row.get(5)?,
        execution_count: row.get::<_, i64>(6)? as u64,
        config: ScheduleExecConfig {
            skip_if_running: row.get::<_, i64>(7)? != 0,
            max_overlap: row.get::<_, i64>(8)? as u32,
            retry_on_failure: row.get::<_, i64>(9)? != 0,
            max_retries: row.get::<_, i64>(10)? as u32,
            input: serde_json::from_str(&input).unwrap_or(Json::Null),
        },
    })
}

pub fn upsert(conn: &Connection, schedule: &Schedule) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {SCHEDULES_TABLE}
             (id, kind, expression, next_run, last_run, timezone, execution_count,
              skip_if_running, max_overlap, retry_on_failure, max_retries, input)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind, expression = excluded.expression, next_run = excluded.next_run,
                last_run = excluded.last_run, timezone = excluded.timezone,
                execution_count = excluded.execution_count, skip_if_running = excluded.skip_if_running,
                max_overlap = excluded.max_overlap, retry_on_failure = excluded.retry_on_failure,
                max_retries = excluded.max_retries, input = excluded.input"
        ),
        params![
            schedule.id,
            schedule.kind.tag(),
            schedule.kind.expression(),
            to_rfc3339(schedule.next_run),
            schedule.last_run.map(to_rfc3339),
            schedule.timezone,
            schedule.execution_count as i64,
            schedule.config.skip_if_running as i64,
            schedule.config.max_overlap as i64,
            schedule.config.retry_on_failure as i64,
            schedule.config.max_retries as i64,
            schedule.config.input.to_string(),
        ],
    )?;
    Ok(())
}

pub fn due(conn: &Connection, now: DateTime<Utc>) -> rusqlite::Result<Vec<Schedule>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM {SCHEDULES_TABLE} WHERE next_run <= ?1"))?;
    let rows = stmt.query_map(params![to_rfc3339(now)], row_to_schedule)?;
    rows.collect()
}

pub fn advance(
    conn: &Connection,
    id: &str,
    last_run: DateTime<Utc>,
    next_run: Option<DateTime<Utc>>,
) -> rusqlite::Result<()> {
    match next_run {
        Some(next_run) => conn.execute(
            &format!(
                "UPDATE {SCHEDULES_TABLE}
                 SET last_run = ?1, next_run = ?2, execution_count = execution_count + 1
                 WHERE id = ?3"
            ),
            params![to_rfc3339(last_run), to_rfc3339(next_run), id],
        ),
        // Exhausted one_time schedules are pinned far in the future rather
        // than removed, so execution_count/last_run remain queryable.
        None => conn.execute(
            &format!(
                "UPDATE {SCHEDULES_TABLE}
                 SET last_run = ?1, next_run = '9999-12-31T00:00:00Z', execution_count = execution_count + 1
                 WHERE id = ?2"
            ),
            params![to_rfc3339(last_run), id],
        ),
    }?;
    Ok(())
}

pub fn find(conn: &Connection, id: &str) -> rusqlite::Result<Option<Schedule>> {
    conn.query_row(&format!("SELECT {SELECT_COLUMNS} FROM {SCHEDULES_TABLE} WHERE id = ?1"), params![id], row_to_schedule)
        .optional()
}

pub fn remove(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(&format!("DELETE FROM {SCHEDULES_TABLE} WHERE id = ?1"), params![id])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    fn sample(id: &str, next_run: DateTime<Utc>) -> Schedule {
        Schedule {
            id: id.to_string(),
            kind: ScheduleKind::Interval { seconds: 60 },
            next_run,
            last_run: None,
            timezone: "UTC".to_string(),
            execution_count: 0,
            config: ScheduleExecConfig::default(),
        }
    }

    #[test]
    fn upsert_and_find_round_trip() {
        let conn = conn();
        let now = alyx_base::now();
        upsert(&conn, &sample("s1", now)).unwrap();
        let found = find(&conn, "s1").unwrap().unwrap();
        assert_eq!(found.kind, ScheduleKind::Interval { seconds: 60 });
    }

    #[test]
    fn due_only_returns_schedules_at_or_before_now() {
        let conn = conn();
        let now = alyx_base::now();
        upsert(&conn, &sample("past", now - chrono::Duration::seconds(5))).unwrap();
        upsert(&conn, &sample("future", now + chrono::Duration::seconds(5))).unwrap();

        let due_list = due(&conn, now).unwrap();
        assert_eq!(due_list.len(), 1);
        assert_eq!(due_list[0].id, "past");
    }

    #[test]
    fn advance_bumps_execution_count_and_next_run() {
        let conn = conn();
        let now = alyx_base::now();
        upsert(&conn, &sample("s1", now)).unwrap();
        advance(&conn, "s1", now, Some(now + chrono::Duration::seconds(60))).unwrap();
        let found = find(&conn, "s1").unwrap().unwrap();
        assert_eq!(found.execution_count, 1);
        assert_eq!(found.next_run, now + chrono::Duration::seconds(60));
    }
}
