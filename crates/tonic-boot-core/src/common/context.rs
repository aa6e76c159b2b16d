//! Per-call request context.
//!
//! A [`RequestContext`] is created by the interceptor chain for every inbound
//! call and dropped when the call completes. It carries the two request-scoped
//! values later stages need:
//!
//! - the **logger handle**: a [`tracing::Span`] named `rpc` that records the
//!   method and, once known, the request identifier;
//! - the **request identifier**: the most recently added value is canonical,
//!   while every value ever added is kept for the response metadata.
//!
//! The context is a cheap handle: clones refer to the same call. The chain
//! passes it by reference to every interceptor and also inserts a clone into
//! the request extensions so tonic handlers can reach it through
//! [`RequestContext::from_request`].

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::Span;

/// Request-scoped storage attached 1:1 to a single in-flight call.
#[derive(Clone, Debug)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    method: String,
    logger: Span,
    request_ids: Mutex<Vec<String>>,
}

impl RequestContext {
    /// Creates the context for a call to `method` (the gRPC path, e.g.
    /// `/greeter.Greeter/SayHello`).
    pub fn new(method: impl Into<String>) -> Self {
        let method = method.into();
        let logger = tracing::info_span!(
            "rpc",
            method = %method,
            request_id = tracing::field::Empty
        );
        Self {
            inner: Arc::new(Inner {
                method,
                logger,
                request_ids: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the context installed by the interceptor chain, if any.
    pub fn from_request<T>(req: &tonic::Request<T>) -> Option<Self> {
        req.extensions().get::<Self>().cloned()
    }

    /// The full gRPC method path of the call.
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// The call-scoped logger. Enter it (or use `in_scope`) so events carry
    /// the method and request identifier.
    pub fn logger(&self) -> &Span {
        &self.inner.logger
    }

    /// Adds a request identifier. The new value becomes canonical and is
    /// appended to the set of identifiers echoed on the response; previous
    /// values are kept.
    pub fn add_request_id(&self, id: impl Into<String>) {
        let id = id.into();
        self.inner.logger.record("request_id", id.as_str());
        self.inner.request_ids.lock().push(id);
    }

    /// The canonical (most recently added) request identifier.
    pub fn request_id(&self) -> Option<String> {
        self.inner.request_ids.lock().last().cloned()
    }

    /// Every identifier added during the call, oldest first.
    pub fn request_ids(&self) -> Vec<String> {
        self.inner.request_ids.lock().clone()
    }
}
