//! Outgoing requests that are waiting for the peer's response.
//!
//! Every entry is removed exactly once: by the matching response or error, by the timeout sweep,
//! or when the connection closes.  Whoever removes an entry completes it, so a response racing a
//! timeout can't complete the same request twice.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::ready;
use pin_project::pin_project;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::RequestError;
use crate::registry::OutgoingMethod;

/// Called with the outcome of a request; decodes the result into whatever type the caller of
/// `send_request` is waiting for.
pub(crate) type Completion = Box<dyn FnOnce(Result<JsonValue, RequestError>) + Send>;

pub(crate) struct PendingRequest {
    method: Arc<OutgoingMethod>,
    complete: Completion,
    deadline: Instant,
}

impl PendingRequest {
    pub(crate) fn new(method: Arc<OutgoingMethod>, deadline: Instant, complete: Completion) -> Self {
        Self {
            method,
            complete,
            deadline,
        }
    }

    pub(crate) fn method(&self) -> &Arc<OutgoingMethod> {
        &self.method
    }

    pub(crate) fn complete(self, result: Result<JsonValue, RequestError>) {
        (self.complete)(result)
    }
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<u64, PendingRequest>>,
}

impl PendingRequests {
    pub(crate) fn insert(&self, transaction_id: u64, request: PendingRequest) {
        let previous = self.lock().insert(transaction_id, request);
        debug_assert!(previous.is_none(), "BUG: transaction id {transaction_id} reused");
    }

    pub(crate) fn remove(&self, transaction_id: u64) -> Option<PendingRequest> {
        self.lock().remove(&transaction_id)
    }

    /// Remove every entry whose deadline is at or before `now`.
    ///
    /// The entries are returned rather than completed here, so that completion runs after the
    /// lock is released.
    pub(crate) fn take_expired(&self, now: Instant) -> Vec<(u64, PendingRequest)> {
        let mut entries = self.lock();
        let expired: Vec<u64> = entries
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|request| (id, request)))
            .collect()
    }

    pub(crate) fn drain(&self) -> Vec<(u64, PendingRequest)> {
        self.lock().drain().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        // Nothing can panic while the lock is held, but if something did the map is still
        // consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests").field("len", &self.len()).finish()
    }
}

/// Resolves to the peer's response to an outgoing request, decoded as an `R`.
#[pin_project]
#[must_use = "the response is lost if this is dropped"]
pub struct PendingResponse<R> {
    transaction_id: u64,
    #[pin]
    receiver: oneshot::Receiver<Result<R, RequestError>>,
}

impl<R> PendingResponse<R> {
    pub(crate) fn new(transaction_id: u64, receiver: oneshot::Receiver<Result<R, RequestError>>) -> Self {
        Self {
            transaction_id,
            receiver,
        }
    }

    /// The id the request was sent with.
    pub fn transaction_id(&self) -> u64 {
        self.transaction_id
    }
}

impl<R> std::fmt::Debug for PendingResponse<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingResponse")
            .field("transaction_id", &self.transaction_id)
            .finish_non_exhaustive()
    }
}

impl<R> Future for PendingResponse<R> {
    type Output = Result<R, RequestError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match ready!(this.receiver.poll(cx)) {
            Ok(result) => Poll::Ready(result),
            // The completion was dropped without being called, which only happens if the pending
            // entry itself was dropped along with the connection
            Err(_) => Poll::Ready(Err(RequestError::ConnectionClosed)),
        }
    }
}
