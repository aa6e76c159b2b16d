//! Per-call structured logging.
//!
//! [`LoggingInterceptor`] times the call, delegates to the rest of the chain
//! and, once the call returns, emits exactly one [`CallRecord`] to its
//! [`LogSink`]. The record carries the request identifier that is current
//! *when the call completes*, so an identifier added by a later interceptor
//! or by the handler replaces the inbound one in the log.
//!
//! Failures are observed, never altered: handler errors are read from the
//! `grpc-status` response headers and the response is returned untouched;
//! transport errors are logged and re-raised.

use super::{BoxError, GrpcRequest, GrpcResponse, Interceptor, Next};
use crate::RequestContext;
use core::time::Duration;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tonic::transport::server::TcpConnectInfo;
use tonic::{Code, Status};

/// One structured log record per call.
#[derive(Clone, Debug)]
pub struct CallRecord {
    /// Name of the entry serving the call.
    pub entry_name: String,
    /// Kind of the entry serving the call.
    pub entry_kind: String,
    /// Full gRPC method path.
    pub method: String,
    /// Wall time spent in the remainder of the chain.
    pub elapsed: Duration,
    /// Canonical request identifier at call completion.
    pub request_id: Option<String>,
    /// Resulting gRPC status code.
    pub code: Code,
    /// Error message when the call failed.
    pub error: Option<String>,
    /// Peer address, when the transport exposes it.
    pub remote_addr: Option<SocketAddr>,
}

impl CallRecord {
    pub fn is_error(&self) -> bool {
        self.code != Code::Ok
    }
}

/// Destination of [`CallRecord`]s.
pub trait LogSink: Send + Sync + 'static {
    fn emit(&self, record: &CallRecord);
}

/// Writes each record as a `tracing` event: `INFO` on success, `WARN` on
/// failure.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, record: &CallRecord) {
        let elapsed_ms = record.elapsed.as_secs_f64() * 1_000.0;
        let request_id = record.request_id.as_deref().unwrap_or_default();
        let remote_addr = record.remote_addr.map(|a| a.to_string()).unwrap_or_default();

        match &record.error {
            None => tracing::info!(
                entry_name = %record.entry_name,
                entry_kind = %record.entry_kind,
                method = %record.method,
                elapsed_ms,
                request_id,
                remote_addr = %remote_addr,
                code = ?record.code,
                "Call completed"
            ),
            Some(error) => tracing::warn!(
                entry_name = %record.entry_name,
                entry_kind = %record.entry_kind,
                method = %record.method,
                elapsed_ms,
                request_id,
                remote_addr = %remote_addr,
                code = ?record.code,
                error = %error,
                "Call failed"
            ),
        }
    }
}

/// Emits one [`CallRecord`] per call.
#[derive(Clone)]
pub struct LoggingInterceptor {
    entry_name: String,
    entry_kind: String,
    sink: Arc<dyn LogSink>,
}

impl LoggingInterceptor {
    /// Logs to [`TracingSink`] on behalf of the given entry.
    pub fn new(entry_name: impl Into<String>, entry_kind: impl Into<String>) -> Self {
        Self {
            entry_name: entry_name.into(),
            entry_kind: entry_kind.into(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Replaces the sink records are written to.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }
}

#[tonic::async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        ctx: &RequestContext,
        req: GrpcRequest,
        next: Next,
    ) -> Result<GrpcResponse, BoxError> {
        let start = Instant::now();
        let remote_addr = req
            .extensions()
            .get::<TcpConnectInfo>()
            .and_then(TcpConnectInfo::remote_addr);

        let res = next.run(ctx, req).await;

        let (code, error) = match &res {
            Ok(response) => match Status::from_header_map(response.headers()) {
                Some(status) if status.code() != Code::Ok => {
                    (status.code(), Some(status.message().to_string()))
                }
                _ => (Code::Ok, None),
            },
            Err(e) => (Code::Unknown, Some(e.to_string())),
        };

        let record = CallRecord {
            entry_name: self.entry_name.clone(),
            entry_kind: self.entry_kind.clone(),
            method: ctx.method().to_string(),
            elapsed: start.elapsed(),
            request_id: ctx.request_id(),
            code,
            error,
            remote_addr,
        };
        ctx.logger().in_scope(|| self.sink.emit(&record));

        res
    }
}
