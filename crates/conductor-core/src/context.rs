use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Identity of one session, carried to every collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMeta {
    pub customer_id: String,
    pub session_id: String,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl SessionMeta {
    /// New identity with a random session id.
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
            extra: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Cancellable execution context threaded through a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    meta: Arc<SessionMeta>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(meta: SessionMeta, cancel: CancellationToken) -> Self {
        Self {
            meta: Arc::new(meta),
            cancel,
        }
    }

    /// Context with a fresh identity and its own token. Handy in tests.
    pub fn detached(customer_id: &str) -> Self {
        Self::new(SessionMeta::new(customer_id), CancellationToken::new())
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn session_id(&self) -> &str {
        &self.meta.session_id
    }

    pub fn customer_id(&self) -> &str {
        &self.meta.customer_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `fut` unless the context is cancelled first.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }
}
