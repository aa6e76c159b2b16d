//! Composable request interceptors for tonic servers.
//!
//! An [`Interceptor`] wraps the remainder of the call pipeline: it receives the
//! call's [`RequestContext`], the raw HTTP/2 request and a [`Next`] handle for
//! the rest of the chain. It may run code before and after delegating, or skip
//! delegation entirely to short-circuit the call (e.g. on an auth rejection).
//!
//! Interceptors are composed into a [`Chain`], which installs as a tower
//! [`Layer`](tower::Layer) on a tonic `Server`. Units run in declaration order
//! on the way in and in reverse order on the way out.
//!
//! ## Structure
//!
//! - [`chain`] - [`Chain`], [`Next`] and the [`InterceptedService`] produced by
//!   composition.
//! - [`logging`] - one structured record per call.
//! - [`meta`] - request identifier propagation.

pub mod chain;
pub mod logging;
pub mod meta;

pub use chain::{Chain, ChainBuilder, InterceptedService, Next};
pub use logging::{CallRecord, LogSink, LoggingInterceptor, TracingSink};
pub use meta::{MetaInterceptor, add_response_identifier};

use crate::RequestContext;
use tonic::Status;
use tonic::body::Body;
use tonic::codegen::http;

/// An inbound gRPC call as seen by interceptors.
pub type GrpcRequest = http::Request<Body>;

/// The HTTP/2 response of a gRPC call. Handler failures travel inside it as
/// `grpc-status` headers.
pub type GrpcResponse = http::Response<Body>;

/// Transport-level failure type of the intercepted service.
pub type BoxError = tower::BoxError;

/// A unit of cross-cutting call-handling logic.
///
/// Implementations must be safe to invoke concurrently: one instance serves
/// every call on the server, so per-call state belongs in the
/// [`RequestContext`], never in `self`.
#[tonic::async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Handles one call. Delegate with `next.run(ctx, req).await`; return
    /// without calling it to short-circuit.
    async fn intercept(
        &self,
        ctx: &RequestContext,
        req: GrpcRequest,
        next: Next,
    ) -> Result<GrpcResponse, BoxError>;
}

/// Builds the response for a call rejected by an interceptor.
pub fn reject(status: Status) -> GrpcResponse {
    status.into_http()
}
