use alyx_base::AlyxError;
use alyx_storage::{Filter, GatewayTx, Page, QueryOptions};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use tokio::sync::{oneshot, Mutex as AsyncMutex};

/// A session transaction (§3): the `GatewayTx` is present until the session
/// reaches a terminal outcome, at which point it is taken out and consumed
/// by commit/rollback. `cancel` stops the auto-rollback timer when a caller
/// terminates explicitly first.
pub struct SessionHandle {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    tx: AsyncMutex<Option<GatewayTx>>,
    cancel: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        token: String,
        tx: GatewayTx,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        cancel: oneshot::Sender<()>,
    ) -> Self {
        Self {
            token,
            created_at,
            expires_at,
            tx: AsyncMutex::new(Some(tx)),
            cancel: parking_lot::Mutex::new(Some(cancel)),
        }
    }

    /// Takes ownership of the underlying transaction for a terminal action.
    /// Returns `None` if another caller already terminated this session.
    pub(crate) async fn take(&self) -> Option<GatewayTx> {
        if let Some(cancel) = self.cancel.lock().take() {
            let _ = cancel.send(());
        }
        self.tx.lock().await.take()
    }

    async fn with_tx<T>(
        &self,
        f: impl FnOnce(&GatewayTx) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<T>> + '_>>,
    ) -> anyhow::Result<T> {
        let guard = self.tx.lock().await;
        let tx = guard.as_ref().ok_or_else(|| {
            anyhow::Error::new(AlyxError::invalid_transaction("transaction already terminated"))
        })?;
        f(tx).await
    }

    pub async fn query(&self, collection: &str, opts: &QueryOptions) -> anyhow::Result<Page> {
        self.with_tx(|tx| Box::pin(tx.query(collection, opts))).await
    }

    pub async fn find_one(&self, collection: &str, id: &str) -> anyhow::Result<Option<Json>> {
        self.with_tx(|tx| Box::pin(tx.find_one(collection, id))).await
    }

    pub async fn count(&self, collection: &str, filter: &Filter) -> anyhow::Result<u64> {
        self.with_tx(|tx| Box::pin(tx.count(collection, filter))).await
    }

    pub async fn create(&self, collection: &str, row: Json) -> anyhow::Result<Json> {
        self.with_tx(|tx| Box::pin(tx.create(collection, row))).await
    }

    pub async fn update(&self, collection: &str, id: &str, patch: Json) -> anyhow::Result<Option<Json>> {
        self.with_tx(|tx| Box::pin(tx.update(collection, id, patch))).await
    }

    pub async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool> {
        self.with_tx(|tx| Box::pin(tx.delete(collection, id))).await
    }
}
