use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use alyx_base::{opaque_token, AlyxError};
use alyx_storage::Gateway;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::session::SessionHandle;

/// Default session transaction timeout (§4.B), overridable by
/// `ALYX_TRANSACTION_TIMEOUT` (seconds).
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub fn transaction_timeout_from_env() -> Duration {
    std::env::var("ALYX_TRANSACTION_TIMEOUT")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TRANSACTION_TIMEOUT)
}

struct Inner {
    gateway: Gateway,
    timeout: Duration,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

/// Process-wide mapping from opaque token to active write transaction
/// (§4.B). Cheap to clone; all clones share the same session map.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<Inner>,
}

impl TransactionManager {
    pub fn new(gateway: Gateway, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                timeout,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// `Begin()`: starts a write transaction, mints a token, arms the
    /// auto-rollback timer, and returns `(token, expires_at)`.
    pub async fn begin(&self) -> anyhow::Result<(String, DateTime<Utc>)> {
        let tx = self.inner.gateway.begin_tx().await?;
        let token = opaque_token();
        let created_at = alyx_base::now();
        let expires_at = created_at + self.inner.timeout;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = Arc::new(SessionHandle::new(token.clone(), tx, created_at, expires_at, cancel_tx));

        self.inner.sessions.write().insert(token.clone(), handle);
        self.arm_auto_rollback(token.clone(), cancel_rx);
        Ok((token, expires_at))
    }

    fn arm_auto_rollback(&self, token: String, cancel_rx: oneshot::Receiver<()>) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = weak.upgrade() {
                        Self::expire(&inner, &token).await;
                    }
                }
                _ = cancel_rx => {}
            }
        });
    }

    async fn expire(inner: &Inner, token: &str) {
        let handle = inner.sessions.write().remove(token);
        if let Some(handle) = handle {
            if let Some(tx) = handle.take().await {
                if let Err(err) = tx.rollback() {
                    warn!(token, %err, "auto-rollback failed");
                } else {
                    info!(token, "transaction auto-rolled-back on timeout");
                }
            }
        }
    }

    /// Resolves a `tx_id` to its session handle, for HTTP middleware to
    /// inject into the request context. Returns `None` (caller should
    /// reject with `INVALID_TRANSACTION`) if the token is unknown or has
    /// already terminated.
    pub fn resolve(&self, token: &str) -> Option<Arc<SessionHandle>> {
        self.inner.sessions.read().get(token).cloned()
    }

    /// `Commit(token)`.
    pub async fn commit(&self, token: &str) -> anyhow::Result<()> {
        self.terminate(token).await.and_then(|tx| tx.commit())
    }

    /// `Rollback(token)`.
    pub async fn rollback(&self, token: &str) -> anyhow::Result<()> {
        self.terminate(token).await.and_then(|tx| tx.rollback())
    }

    async fn terminate(&self, token: &str) -> anyhow::Result<alyx_storage::GatewayTx> {
        let handle = self.inner.sessions.write().remove(token);
        let Some(handle) = handle else {
            return Err(anyhow::Error::new(AlyxError::not_found(format!(
                "no active transaction for token {token}"
            ))));
        };
        handle
            .take()
            .await
            .ok_or_else(|| anyhow::Error::new(AlyxError::not_found("transaction already terminated")))
    }

    /// On server shutdown, all outstanding transactions are rolled back.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.inner.sessions.write().drain().map(|(_, v)| v).collect();
        for handle in handles {
            if let Some(tx) = handle.take().await {
                let _ = tx.rollback();
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.sessions.read().len()
    }
}
