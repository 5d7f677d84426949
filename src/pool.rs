//! Per-cache-key request pools.
//!
//! A [`RequestPool`] gathers every in-flight request for one cache key so
//! the pipeline does the work once and fans the outcome out to all of them.
//! The pool owns the handle of the operation currently scheduled for its
//! key, so cancelling the last request can stop that work.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::task::AbortHandle;

use crate::observer::ThumbnailObserver;
use crate::request::{RequestId, Thumbnail, ThumbnailRequest};

struct PooledRequest {
    request: ThumbnailRequest,
    observer: Option<Weak<dyn ThumbnailObserver>>,
}

/// In-flight requests sharing one cache key.
///
/// Removal operations return whether the pool is now empty; removing a
/// request that is not tracked is a no-op.
pub struct RequestPool {
    /// Generation id, unique per pool over the pipeline's lifetime
    id: u64,
    key: Arc<str>,
    requests: HashMap<RequestId, PooledRequest>,
    pending: Option<AbortHandle>,
}

impl RequestPool {
    pub fn new(id: u64, key: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            key: key.into(),
            requests: HashMap::new(),
            pending: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Register a request. The observer is held weakly.
    ///
    /// A request whose id is already pooled replaces the earlier one, and
    /// the earlier observer is never notified. Returns `false` in that case.
    pub fn append(
        &mut self,
        request: ThumbnailRequest,
        observer: Option<&Arc<dyn ThumbnailObserver>>,
    ) -> bool {
        let observer = observer.map(Arc::downgrade);
        self.requests
            .insert(
                request.request_id.clone(),
                PooledRequest { request, observer },
            )
            .is_none()
    }

    /// Detach one request. The last one out cancels the pending operation.
    pub fn cancel(&mut self, request_id: &RequestId) -> bool {
        let empty = self.finish(request_id);
        if empty {
            self.cancel_pending();
        }
        empty
    }

    /// Drop every prefetch request.
    pub fn release_prefetches(&mut self) -> bool {
        self.requests.retain(|_, pooled| !pooled.request.is_prefetch);
        self.requests.is_empty()
    }

    /// Remove one request without delivering anything to it.
    pub fn finish(&mut self, request_id: &RequestId) -> bool {
        self.requests.remove(request_id);
        self.requests.is_empty()
    }

    /// Track the operation currently scheduled for this pool.
    pub fn set_pending(&mut self, handle: AbortHandle) {
        self.pending = Some(handle);
    }

    /// Abort the scheduled operation, if any.
    pub fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.requests.contains_key(request_id)
    }

    /// Terminal delivery.
    ///
    /// Every registered request whose observer is still alive receives
    /// success with `thumbnail`, or failure when it is `None`. Consumes the
    /// pool, so delivery happens at most once. Returns the number of
    /// observers notified.
    pub fn did_load(mut self, thumbnail: Option<Thumbnail>) -> usize {
        self.pending = None;

        let mut delivered = 0;
        for (_, pooled) in self.requests.drain() {
            let Some(observer) = pooled.observer.as_ref().and_then(Weak::upgrade) else {
                continue;
            };
            match &thumbnail {
                Some(thumbnail) => {
                    observer.did_success_to_load(&pooled.request, Arc::clone(thumbnail))
                }
                None => observer.did_failed_to_load(&pooled.request),
            }
            delivered += 1;
        }
        delivered
    }
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("requests", &self.requests.len())
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
