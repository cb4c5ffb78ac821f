use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::{
    changelog::{self, Operation},
    collection,
    query::{self, Page, QueryOptions},
};

fn row_to_doc(id: String, data: String) -> Json {
    let mut doc: Json = serde_json::from_str(&data).unwrap_or(Json::Null);
    if let Json::Object(map) = &mut doc {
        map.entry("id").or_insert(Json::String(id));
    }
    doc
}

fn fetch_all(conn: &Connection, table: &str) -> anyhow::Result<Vec<Json>> {
    collection::ensure_table(conn, table)?;
    let mut stmt = conn.prepare(&format!("SELECT id, data FROM \"{table}\""))?;
    let docs = stmt
        .query_map([], |row| Ok(row_to_doc(row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(docs)
}

pub fn query(conn: &Connection, table: &str, opts: &QueryOptions) -> anyhow::Result<Page> {
    let mut docs = fetch_all(conn, table)?;
    docs.retain(|doc| query::matches_filter(doc, &opts.filter));
    if !opts.sort.is_empty() {
        query::sort_docs(&mut docs, &opts.sort);
    }
    let offset = opts.offset.unwrap_or(0) as usize;
    let limit = opts.effective_limit() as usize;
    let page = docs.into_iter().skip(offset).take(limit).collect();
    Ok(Page { docs: page, total: None })
}

pub fn count(conn: &Connection, table: &str, filter: &query::Filter) -> anyhow::Result<u64> {
    let docs = fetch_all(conn, table)?;
    Ok(docs.iter().filter(|doc| query::matches_filter(doc, filter)).count() as u64)
}

pub fn find_one(conn: &Connection, table: &str, id: &str) -> anyhow::Result<Option<Json>> {
    collection::ensure_table(conn, table)?;
    let found = conn
        .query_row(&format!("SELECT id, data FROM \"{table}\" WHERE id = ?1"), params![id], |row| {
            Ok(row_to_doc(row.get(0)?, row.get(1)?))
        })
        .optional()?;
    Ok(found)
}

pub fn create(conn: &Connection, table: &str, mut row: Json) -> Result<Json, rusqlite::Error> {
    collection::ensure_table(conn, table).map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))?;
    let obj = row.as_object_mut().expect("document row must be a JSON object");
    let id = obj.get("id").and_then(Json::as_str).map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = alyx_base::to_rfc3339(alyx_base::now());
    obj.insert("id".into(), Json::String(id.clone()));
    obj.insert("created_at".into(), Json::String(now.clone()));
    obj.insert("updated_at".into(), Json::String(now.clone()));

    conn.execute(
        &format!("INSERT INTO \"{table}\" (id, data, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)"),
        params![id, row.to_string(), now, now],
    )?;
    changelog::append(conn, table, Operation::Insert, &id, None, Some(&row))
        .map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))?;
    Ok(row)
}

pub fn update(conn: &Connection, table: &str, id: &str, patch: Json) -> Result<Option<Json>, rusqlite::Error> {
    collection::ensure_table(conn, table).map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))?;
    let existing: Option<String> = conn
        .query_row(&format!("SELECT data FROM \"{table}\" WHERE id = ?1"), params![id], |r| r.get(0))
        .optional()?;
    let Some(existing) = existing else { return Ok(None) };
    let mut merged: Json = serde_json::from_str(&existing).unwrap_or(Json::Object(Default::default()));
    let mut changed_fields = Vec::new();
    if let (Json::Object(merged_obj), Json::Object(patch_obj)) = (&mut merged, &patch) {
        for (key, value) in patch_obj {
            if key == "id" {
                continue;
            }
            changed_fields.push(key.clone());
            merged_obj.insert(key.clone(), value.clone());
        }
    }
    let now = alyx_base::to_rfc3339(alyx_base::now());
    if let Json::Object(merged_obj) = &mut merged {
        merged_obj.insert("id".into(), Json::String(id.to_string()));
        merged_obj.insert("updated_at".into(), Json::String(now.clone()));
    }
    conn.execute(
        &format!("UPDATE \"{table}\" SET data = ?1, updated_at = ?2 WHERE id = ?3"),
        params![merged.to_string(), now, id],
    )?;
    let changed_ref = (!changed_fields.is_empty()).then_some(changed_fields.as_slice());
    changelog::append(conn, table, Operation::Update, id, changed_ref, Some(&merged))
        .map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))?;
    Ok(Some(merged))
}

pub fn delete(conn: &Connection, table: &str, id: &str) -> Result<bool, rusqlite::Error> {
    collection::ensure_table(conn, table).map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))?;
    let pre_image = find_one(conn, table, id).ok().flatten();
    let affected = conn.execute(&format!("DELETE FROM \"{table}\" WHERE id = ?1"), params![id])?;
    if affected > 0 {
        changelog::append(conn, table, Operation::Delete, id, None, pre_image.as_ref())
            .map_err(|e| rusqlite::Error::InvalidParameterName(e.to_string()))?;
    }
    Ok(affected > 0)
}
