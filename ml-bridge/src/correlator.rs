//! Request/reply correlation.
//!
//! Every outbound request gets a bridge-unique id that travels in the event
//! frame. The peer acknowledges with an `ack` frame carrying the same id, and
//! the continuation registered for that id fires with the first reply entry.
//!
//! A continuation is invoked at most once: resolving, failing and cancelling
//! all remove the pending entry before anything else happens.

use ml_proto::{json_envelope, Frame, RawInput};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{BridgeError, DecodeError};
use crate::metrics;

/// Bridge-unique request identifier
pub type RequestId = u64;

/// One-shot callback fired with the first reply entry or the failure
pub type Continuation = Box<dyn FnOnce(Result<Value, BridgeError>) + Send + 'static>;

/// Input payload in one of the three supported shapes
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw text
    Text(String),
    /// Opaque structured JSON, threaded through unmodified
    Json(Value),
    /// Sequence of 32-bit floats
    Raw(Vec<f32>),
}

impl Payload {
    /// Wrap the payload with its target function
    pub fn into_envelope(self, target_function: &str) -> Value {
        match self {
            Self::Text(text) => json_envelope(target_function, Value::String(text)),
            Self::Json(value) => json_envelope(target_function, value),
            Self::Raw(data) => match serde_json::to_value(RawInput::new(data, target_function)) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(target_function = target_function, error = %e, "Failed to encode raw input");
                    Value::Null
                }
            },
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Raw(_) => "raw",
        }
    }
}

struct Pending {
    target_function: String,
    continuation: Continuation,
    sent_at: Instant,
}

/// Pending-request table.
///
/// Continuations are `Send` but not `Sync`, so the table sits behind a mutex
/// and entries are always removed before their continuation runs.
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Pending>>,
    strict: bool,
}

impl Correlator {
    /// `strict` surfaces empty reply arrays as [`DecodeError::EmptyReply`]
    /// instead of dropping them.
    pub fn new(strict: bool) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            strict,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<RequestId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, id: RequestId) -> Option<Pending> {
        self.table().remove(&id)
    }

    /// Register `continuation` under a fresh id and build the request frame.
    ///
    /// The frame still has to be transmitted; if that fails the caller must
    /// [`fail`](Self::fail) the returned id.
    pub fn register(
        &self,
        event: &str,
        target_function: &str,
        payload: Payload,
        continuation: Continuation,
    ) -> (RequestId, Frame) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mode = payload.mode();
        let envelope = payload.into_envelope(target_function);

        self.table().insert(
            id,
            Pending {
                target_function: target_function.to_string(),
                continuation,
                sent_at: Instant::now(),
            },
        );
        metrics::record_request();

        debug!(
            request_id = id,
            event = event,
            target_function = target_function,
            mode = mode,
            "Registered request"
        );

        (id, Frame::request(event, envelope, id))
    }

    /// Deliver the reply array for `id`.
    ///
    /// Returns true if the continuation was invoked. Unknown ids and empty
    /// reply arrays (unless strict) invoke nothing.
    pub fn resolve(&self, id: RequestId, replies: Vec<Value>) -> bool {
        let Some(pending) = self.take(id) else {
            debug!(request_id = id, "Reply for unknown request, ignoring");
            return false;
        };

        if replies.len() > 1 {
            debug!(
                request_id = id,
                entries = replies.len(),
                "Reply has several entries, using the first"
            );
        }

        let Some(first) = replies.into_iter().next() else {
            metrics::record_dropped("empty_reply");
            if self.strict {
                warn!(
                    request_id = id,
                    target_function = %pending.target_function,
                    "Empty reply array"
                );
                (pending.continuation)(Err(DecodeError::EmptyReply.into()));
                return true;
            }
            debug!(
                request_id = id,
                target_function = %pending.target_function,
                "Empty reply array, dropping"
            );
            return false;
        };

        metrics::record_reply(pending.sent_at.elapsed());
        (pending.continuation)(Ok(first));
        true
    }

    /// Fire the continuation for `id` with an error
    pub fn fail(&self, id: RequestId, error: BridgeError) -> bool {
        match self.take(id) {
            Some(pending) => {
                debug!(request_id = id, error = %error, "Failing request");
                (pending.continuation)(Err(error));
                true
            }
            None => false,
        }
    }

    /// Forget `id` without invoking its continuation
    pub fn cancel(&self, id: RequestId) -> bool {
        self.take(id).is_some()
    }

    /// Fail every pending request, returning how many were failed
    pub fn fail_all(&self, error: impl Fn() -> BridgeError) -> usize {
        let drained: Vec<(RequestId, Pending)> = self.table().drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            let err = error();
            debug!(request_id = id, error = %err, "Failing request");
            (pending.continuation)(Err(err));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.table().contains_key(&id)
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}
