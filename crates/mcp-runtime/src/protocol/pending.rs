//! In-flight request table: correlates responses to the requests that caused them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::types::{JsonRpcMessage, McpError, McpResult, RequestId};

/// The outcome delivered to whoever is waiting on a request.
pub type PendingOutcome = McpResult<Value>;

struct PendingEntry {
    method: String,
    tx: oneshot::Sender<PendingOutcome>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<RequestId, PendingEntry>,
    closed: bool,
}

/// Thread-safe map of waiting requests keyed by id.
///
/// Each entry is removed exactly once: by its response, by abandonment
/// (timeout or caller cancellation), or by disconnection. Whichever happens
/// first wins; anything arriving later finds no entry and is dropped.
/// After [`PendingRequests::fail_all`] the table stays closed and refuses
/// new registrations.
pub struct PendingRequests {
    next_id: AtomicI64,
    table: Mutex<Table>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            table: Mutex::new(Table::default()),
        }
    }

    /// Allocate a fresh numeric id.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Track a request that is about to be sent.
    ///
    /// Reusing an id that is still outstanding is a protocol violation.
    /// Once the table has been failed the connection is gone, so this returns
    /// [`McpError::Disconnected`].
    pub async fn register(
        &self,
        id: RequestId,
        method: &str,
    ) -> McpResult<oneshot::Receiver<PendingOutcome>> {
        let mut table = self.table.lock().await;
        if table.closed {
            return Err(McpError::Disconnected);
        }
        if table.entries.contains_key(&id) {
            return Err(McpError::InvalidRequest(format!(
                "Request id {id} is already in flight"
            )));
        }
        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingEntry {
                method: method.to_string(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Deliver a response or error message to its waiter.
    ///
    /// Returns `false` when nothing was waiting for that id; the message is
    /// dropped.
    pub async fn resolve(&self, message: JsonRpcMessage) -> bool {
        let (id, outcome) = match message {
            JsonRpcMessage::Response(r) => (r.id, Ok(r.result)),
            JsonRpcMessage::Error(e) => (e.id, Err(McpError::Remote(e.error))),
            other => {
                tracing::warn!("Ignoring non-response message in pending table: {other:?}");
                return false;
            }
        };
        self.complete(&id, outcome).await
    }

    /// Finish one entry with an arbitrary outcome.
    pub async fn complete(&self, id: &RequestId, outcome: PendingOutcome) -> bool {
        let entry = self.table.lock().await.entries.remove(id);
        match entry {
            Some(entry) => {
                tracing::debug!("Resolved request {id} ({})", entry.method);
                if entry.tx.send(outcome).is_err() {
                    tracing::debug!("Waiter for request {id} went away before delivery");
                }
                true
            }
            None => {
                tracing::warn!("Dropping response for unknown or expired request id {id}");
                false
            }
        }
    }

    /// Forget a request without resolving it (timeout, cancellation).
    pub async fn abandon(&self, id: &RequestId) -> bool {
        self.table.lock().await.entries.remove(id).is_some()
    }

    /// Reject every outstanding request and close the table, e.g. on
    /// disconnection.
    pub async fn fail_all(&self, make_error: impl Fn() -> McpError) -> usize {
        let drained: Vec<(RequestId, PendingEntry)> = {
            let mut table = self.table.lock().await;
            table.closed = true;
            table.entries.drain().collect()
        };
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!("Failing request {id} ({})", entry.method);
            let _ = entry.tx.send(Err(make_error()));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
