//! Reply correlator.
//!
//! Code running in a context can ask the front-end a question with
//! `$$.request(payload)`. The correlator allocates a fresh id, parks a
//! oneshot sender under it, emits `["request", payload, contextId, id]` and
//! suspends the caller until a matching `reply` message arrives.

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::debug;

use super::error::{RequestError, RequestResult};
use super::protocol::{Frame, Outbox};

type PendingTable = Mutex<HashMap<u64, oneshot::Sender<JsonValue>>>;

/// Pending-request table for one context.
#[derive(Debug)]
pub struct Requester {
    context_id: String,
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
    outbox: Outbox,
}

/// A request that has been emitted but not yet answered. Dropping it
/// unregisters the id, so a later reply to it is unknown.
#[derive(Debug)]
pub struct PendingReply {
    /// Correlation id
    pub id: u64,
    receiver: oneshot::Receiver<JsonValue>,
    table: Weak<PendingTable>,
}

impl PendingReply {
    /// Wait for the reply.
    pub async fn wait(mut self) -> RequestResult<JsonValue> {
        (&mut self.receiver)
            .await
            .map_err(|_| RequestError::Abandoned(self.id))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().remove(&self.id);
        }
    }
}

impl Requester {
    /// Create a correlator emitting requests for `context_id`.
    pub fn new(context_id: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            context_id: context_id.into(),
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            outbox,
        }
    }

    /// Register a waiter and emit the request frame without waiting.
    pub fn issue(&self, payload: JsonValue) -> PendingReply {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        debug!(context = %self.context_id, id, "issuing request");
        self.outbox.send(Frame::Request {
            context_id: self.context_id.clone(),
            request_id: id,
            payload,
        });
        PendingReply {
            id,
            receiver: rx,
            table: Arc::downgrade(&self.pending),
        }
    }

    /// Emit a request and wait for its reply.
    pub async fn send(&self, payload: JsonValue) -> RequestResult<JsonValue> {
        self.issue(payload).wait().await
    }

    /// Resolve the waiter registered under `id`. Each id resolves at most once.
    pub fn receive(&self, id: u64, payload: JsonValue) -> RequestResult<()> {
        let waiter = self
            .pending
            .lock()
            .remove(&id)
            .ok_or(RequestError::UnknownRequestId(id))?;
        waiter
            .send(payload)
            .map_err(|_| RequestError::Abandoned(id))
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
