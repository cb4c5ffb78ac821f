use rusqlite::Connection;
use serde_json::Value as Json;
use tokio::sync::OwnedMutexGuard;

use crate::{
    constraint,
    ops,
    query::{Filter, Page, QueryOptions},
};

/// A session-scoped write transaction (§3 "Session transaction"), holding
/// the gateway's single writer connection until committed or rolled back —
/// by the owning `TransactionManager`, explicitly or on timeout.
pub struct GatewayTx {
    guard: Option<OwnedMutexGuard<Connection>>,
}

impl GatewayTx {
    pub(crate) fn new(guard: OwnedMutexGuard<Connection>) -> Self {
        Self { guard: Some(guard) }
    }

    fn conn(&self) -> &Connection {
        self.guard.as_ref().expect("GatewayTx used after commit/rollback")
    }

    pub async fn query(&self, collection: &str, opts: &QueryOptions) -> anyhow::Result<Page> {
        ops::query(self.conn(), collection, opts)
    }

    pub async fn find_one(&self, collection: &str, id: &str) -> anyhow::Result<Option<Json>> {
        ops::find_one(self.conn(), collection, id)
    }

    pub async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64> {
        ops::count(self.conn(), collection, filter)
    }

    pub async fn create(&self, collection: &str, row: Json) -> anyhow::Result<Json> {
        ops::create(self.conn(), collection, row).map_err(into_anyhow)
    }

    pub async fn update(&self, collection: &str, id: &str, patch: Json) -> anyhow::Result<Option<Json>> {
        ops::update(self.conn(), collection, id, patch).map_err(into_anyhow)
    }

    pub async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool> {
        ops::delete(self.conn(), collection, id).map_err(into_anyhow)
    }

    /// Commits the underlying SQL transaction and releases the writer.
    pub fn commit(mut self) -> anyhow::Result<()> {
        let guard = self.guard.take().expect("GatewayTx used after commit/rollback");
        guard.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Rolls back the underlying SQL transaction and releases the writer.
    pub fn rollback(mut self) -> anyhow::Result<()> {
        let guard = self.guard.take().expect("GatewayTx used after commit/rollback");
        guard.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for GatewayTx {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            let _ = guard.execute_batch("ROLLBACK");
        }
    }
}

fn into_anyhow(err: rusqlite::Error) -> anyhow::Error {
    match constraint::classify(&err) {
        Some(_) => anyhow::Error::new(constraint::classify_as_error(&err)),
        None => anyhow::Error::new(err),
    }
}
