//! A tonic gRPC server managed as an [`Entry`].
//!
//! The entry serves every registered service plus the standard
//! `grpc.health.v1.Health` service. All of them sit behind the entry's
//! interceptor [`Chain`], installed as a tower layer on the tonic `Server`.
//! Unless a custom chain is supplied, the chain is built from
//! [`InterceptorConfig`](super::InterceptorConfig): the meta interceptor
//! first, then the logging interceptor.
//!
//! Bootstrap binds the listener before spawning the server task and only then
//! publishes `SERVING`, so a concurrent interrupt never observes an unbound
//! listener. Interrupt publishes `NOT_SERVING`, signals the server to stop
//! accepting connections and waits for in-flight calls up to the configured
//! drain deadline. Calls still running after that are cancelled and answered
//! with `UNAVAILABLE`.

use super::lifecycle::{ForceCloseLayer, ServeHandle};
use super::{Entry, GRPC_ENTRY_KIND, GrpcEntryConfig};
use crate::interceptor::{
    Chain, GrpcResponse, Interceptor, LogSink, LoggingInterceptor, MetaInterceptor, reject,
};
use crate::{Error, Result};
use core::convert::Infallible;
use core::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::codegen::http;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tonic::Status;
use tonic::transport::Server;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;
use tower::Service;

/// Assembles a [`GrpcEntry`].
pub struct GrpcEntryBuilder {
    config: GrpcEntryConfig,
    routes: RoutesBuilder,
    services: Vec<&'static str>,
    health: HealthReporter,
    chain: Option<Chain>,
    extra: Vec<Arc<dyn Interceptor>>,
    sink: Option<Arc<dyn LogSink>>,
    app_info: Option<(String, String)>,
}

impl GrpcEntryBuilder {
    fn new(config: GrpcEntryConfig) -> Self {
        let (health, health_service) = tonic_health::server::health_reporter();
        let mut routes = RoutesBuilder::default();
        routes.add_service(health_service);

        Self {
            config,
            routes,
            services: Vec::new(),
            health,
            chain: None,
            extra: Vec::new(),
            sink: None,
            app_info: None,
        }
    }

    /// Serves a tonic service on this entry. Its health status follows the
    /// entry's lifecycle.
    #[must_use]
    pub fn add_service<S>(mut self, service: S) -> Self
    where
        S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.routes.add_service(service);
        self.services.push(S::NAME);
        self
    }

    /// Replaces the configured interceptors with `chain`.
    #[must_use]
    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Appends an interceptor after the configured ones, closest to the
    /// handler. Ignored when a custom chain is supplied.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.extra.push(Arc::new(interceptor));
        self
    }

    /// Sink for the logging interceptor's records.
    #[must_use]
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Application name and version stamped on responses by the meta
    /// interceptor.
    #[must_use]
    pub fn with_app_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.app_info = Some((name.into(), version.into()));
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an empty name or a zero drain
    /// deadline, and [`Error::InvalidHeader`] when the header prefix does not
    /// produce a valid header name.
    pub fn build(self) -> Result<GrpcEntry> {
        if self.config.name.trim().is_empty() {
            return Err(Error::Configuration {
                reason: "gRPC entry name must not be empty".to_string(),
            });
        }
        if self.config.shutdown_timeout_secs == 0 {
            return Err(Error::Configuration {
                reason: format!(
                    "entry `{}` needs a non-zero shutdown timeout",
                    self.config.name
                ),
            });
        }

        let chain = match self.chain {
            Some(chain) => chain,
            None => configured_chain(
                &self.config,
                self.sink,
                self.app_info.as_ref(),
                self.extra,
            )?,
        };

        Ok(GrpcEntry {
            config: self.config,
            routes: self.routes.routes(),
            services: self.services,
            health: self.health,
            chain,
            handle: Mutex::new(None),
        })
    }
}

impl fmt::Debug for GrpcEntryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcEntryBuilder")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

fn configured_chain(
    config: &GrpcEntryConfig,
    sink: Option<Arc<dyn LogSink>>,
    app_info: Option<&(String, String)>,
    extra: Vec<Arc<dyn Interceptor>>,
) -> Result<Chain> {
    let interceptors = &config.interceptors;
    let mut builder = Chain::builder();

    if interceptors.meta.enabled {
        let mut meta = MetaInterceptor::new();
        if let Some(prefix) = &interceptors.meta.prefix {
            meta = meta.with_prefix(prefix)?;
        }
        if let Some((name, version)) = app_info {
            meta = meta.with_app_info(name, version)?;
        }
        builder = builder.with(meta);
    }

    if interceptors.logging.enabled {
        let mut logging = LoggingInterceptor::new(&config.name, GRPC_ENTRY_KIND);
        if let Some(sink) = sink {
            logging = logging.with_sink(sink);
        }
        builder = builder.with(logging);
    }

    for interceptor in extra {
        builder = builder.with_shared(interceptor);
    }

    Ok(builder.build())
}

fn force_closed() -> GrpcResponse {
    reject(Status::unavailable("entry interrupted before the call completed"))
}

/// A gRPC server entry.
pub struct GrpcEntry {
    config: GrpcEntryConfig,
    routes: Routes,
    services: Vec<&'static str>,
    health: HealthReporter,
    chain: Chain,
    // Serializes bootstrap and interrupt.
    handle: Mutex<Option<ServeHandle>>,
}

impl GrpcEntry {
    pub fn builder(config: GrpcEntryConfig) -> GrpcEntryBuilder {
        GrpcEntryBuilder::new(config)
    }

    pub fn config(&self) -> &GrpcEntryConfig {
        &self.config
    }

    /// Address the listener is bound to, once bootstrapped.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.lock().await.as_ref().map(|h| h.local_addr)
    }

    async fn set_status(&self, status: ServingStatus) {
        for service in &self.services {
            self.health.set_service_status(service, status).await;
        }
        // The empty service name reports the overall server health.
        self.health.set_service_status("", status).await;
    }
}

impl fmt::Debug for GrpcEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcEntry")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

#[tonic::async_trait]
impl Entry for GrpcEntry {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &'static str {
        GRPC_ENTRY_KIND
    }

    async fn bootstrap(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(Error::AlreadyBootstrapped {
                name: self.config.name.clone(),
            });
        }

        let listener = TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| Error::Bootstrap {
                name: self.config.name.clone(),
                reason: format!("failed to bind {}: {e}", self.config.addr),
            })?;
        let local_addr = listener.local_addr().map_err(|e| Error::Bootstrap {
            name: self.config.name.clone(),
            reason: e.to_string(),
        })?;

        let shutdown = CancellationToken::new();
        let force = CancellationToken::new();
        let router = Server::builder()
            .http2_adaptive_window(Some(true))
            .layer(ForceCloseLayer::new(force.clone(), force_closed))
            .layer(self.chain.clone())
            .add_routes(self.routes.clone());
        let incoming = TcpListenerStream::new(listener);
        let signal = shutdown.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            router
                .serve_with_incoming_shutdown(incoming, signal)
                .await
                .map_err(|e| e.to_string())
        });

        self.set_status(ServingStatus::Serving).await;
        tracing::info!(
            entry = %self.config.name,
            kind = GRPC_ENTRY_KIND,
            %local_addr,
            services = ?self.services,
            "Entry bootstrapped"
        );

        *handle = Some(ServeHandle {
            local_addr,
            shutdown,
            force,
            task,
        });
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;
        let Some(serving) = handle.take() else {
            return Ok(());
        };

        self.set_status(ServingStatus::NotServing).await;
        tracing::info!(entry = %self.config.name, "Draining in-flight calls");
        serving
            .drain(&self.config.name, self.config.shutdown_timeout())
            .await?;
        tracing::info!(entry = %self.config.name, "Entry interrupted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::CallRecord;
    use crate::proto::greeter::greeter_client::GreeterClient;
    use crate::proto::greeter::greeter_server::{Greeter, GreeterServer};
    use crate::proto::greeter::{HelloRequest, HelloResponse};
    use crate::{RequestContext, interceptor::add_response_identifier};
    use core::sync::atomic::{AtomicBool, Ordering};
    use core::time::Duration;
    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::Notify;
    use tonic::transport::Channel;
    use tonic::{Code, Request, Response, Status};
    use tonic_health::pb::HealthCheckRequest;
    use tonic_health::pb::health_client::HealthClient;
    use tonic_health::pb::health_check_response::ServingStatus as PbServingStatus;

    #[derive(Default)]
    struct CaptureSink {
        records: SyncMutex<Vec<CallRecord>>,
    }

    impl LogSink for CaptureSink {
        fn emit(&self, record: &CallRecord) {
            self.records.lock().push(record.clone());
        }
    }

    #[derive(Clone, Copy, Default)]
    struct EchoGreeter;

    #[tonic::async_trait]
    impl Greeter for EchoGreeter {
        async fn say_hello(
            &self,
            request: Request<HelloRequest>,
        ) -> core::result::Result<Response<HelloResponse>, Status> {
            let ctx = RequestContext::from_request(&request)
                .ok_or_else(|| Status::internal("missing request context"))?;
            add_response_identifier(&ctx, "xyz");

            let name = request.into_inner().name;
            if name.is_empty() {
                return Err(Status::invalid_argument("name must not be empty"));
            }
            Ok(Response::new(HelloResponse {
                message: format!("Hello {name}!"),
            }))
        }
    }

    /// Signals when a call starts and records whether it ran to completion.
    #[derive(Clone)]
    struct SlowGreeter {
        delay: Duration,
        started: Arc<Notify>,
        finished: Arc<AtomicBool>,
    }

    impl SlowGreeter {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                started: Arc::new(Notify::new()),
                finished: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[tonic::async_trait]
    impl Greeter for SlowGreeter {
        async fn say_hello(
            &self,
            _request: Request<HelloRequest>,
        ) -> core::result::Result<Response<HelloResponse>, Status> {
            self.started.notify_one();
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Response::new(HelloResponse {
                message: "late".to_string(),
            }))
        }
    }

    async fn slow_entry(
        greeter: SlowGreeter,
        shutdown_timeout_secs: u64,
    ) -> core::result::Result<(GrpcEntry, GreeterClient<Channel>), Box<dyn std::error::Error>> {
        let mut config = GrpcEntryConfig::new("slow", loopback());
        config.shutdown_timeout_secs = shutdown_timeout_secs;
        let entry = GrpcEntry::builder(config)
            .add_service(GreeterServer::new(greeter))
            .build()?;
        entry.bootstrap().await?;
        let addr = entry.local_addr().await.expect("bound address");
        let client = GreeterClient::new(channel(addr).await?);
        Ok((entry, client))
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    async fn channel(addr: SocketAddr) -> core::result::Result<Channel, tonic::transport::Error> {
        Channel::from_shared(format!("http://{addr}"))
            .expect("valid uri")
            .connect()
            .await
    }

    #[tokio::test]
    async fn serves_through_interceptors() -> core::result::Result<(), Box<dyn std::error::Error>> {
        let sink = Arc::new(CaptureSink::default());
        let entry = GrpcEntry::builder(GrpcEntryConfig::new("greeter", loopback()))
            .add_service(GreeterServer::new(EchoGreeter))
            .with_log_sink(sink.clone())
            .with_app_info("demo", "0.1.0")
            .build()?;

        entry.bootstrap().await?;
        let addr = entry.local_addr().await.expect("bound address");
        assert_ne!(addr.port(), 0);

        let mut client = GreeterClient::new(channel(addr).await?);
        let mut request = Request::new(HelloRequest {
            name: "tonic".to_string(),
        });
        request
            .metadata_mut()
            .insert("x-request-id", "abc".parse()?);
        let response = client.say_hello(request).await?;

        let ids: Vec<_> = response
            .metadata()
            .get_all("x-request-id")
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["abc", "xyz"]);
        assert_eq!(
            response.metadata().get("x-app-name").and_then(|v| v.to_str().ok()),
            Some("demo")
        );
        assert_eq!(response.get_ref().message, "Hello tonic!");

        let status = client
            .say_hello(Request::new(HelloRequest {
                name: String::new(),
            }))
            .await
            .expect_err("empty name is rejected");
        assert_eq!(status.code(), Code::InvalidArgument);

        entry.interrupt().await?;
        assert!(entry.local_addr().await.is_none());

        let records = sink.records.lock();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].method, "/greeter.Greeter/SayHello");
        assert_eq!(records[0].request_id.as_deref(), Some("xyz"));
        assert_eq!(records[0].entry_name, "greeter");
        assert!(records[0].remote_addr.is_some());
        assert_eq!(records[1].code, Code::InvalidArgument);
        Ok(())
    }

    #[tokio::test]
    async fn reports_health_through_lifecycle()
    -> core::result::Result<(), Box<dyn std::error::Error>> {
        let entry = GrpcEntry::builder(GrpcEntryConfig::new("greeter", loopback()))
            .add_service(GreeterServer::new(EchoGreeter))
            .build()?;
        entry.bootstrap().await?;
        let addr = entry.local_addr().await.expect("bound address");

        let mut health = HealthClient::new(channel(addr).await?);
        let response = health
            .check(Request::new(HealthCheckRequest {
                service: "greeter.Greeter".to_string(),
            }))
            .await?;
        assert_eq!(response.get_ref().status(), PbServingStatus::Serving);

        entry.interrupt().await?;
        Ok(())
    }

    #[tokio::test]
    async fn cancels_calls_outliving_the_drain_deadline()
    -> core::result::Result<(), Box<dyn std::error::Error>> {
        let greeter = SlowGreeter::new(Duration::from_secs(4));
        let (entry, mut client) = slow_entry(greeter.clone(), 1).await?;

        let call = tokio::spawn(async move {
            client
                .say_hello(Request::new(HelloRequest {
                    name: "slow".to_string(),
                }))
                .await
        });
        greeter.started.notified().await;

        let err = entry.interrupt().await.expect_err("deadline exceeded");
        assert!(matches!(err, Error::Interrupt { name, .. } if name == "slow"));

        let status = tokio::time::timeout(Duration::from_secs(2), call)
            .await
            .expect("call ends once force-closed")?
            .expect_err("call is cancelled");
        assert_eq!(status.code(), Code::Unavailable);

        // Long enough for the handler to have finished had it kept running.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!greeter.finished.load(Ordering::SeqCst));
        Ok(())
    }

    #[tokio::test]
    async fn completes_calls_within_the_drain_deadline()
    -> core::result::Result<(), Box<dyn std::error::Error>> {
        let greeter = SlowGreeter::new(Duration::from_millis(300));
        let (entry, mut client) = slow_entry(greeter.clone(), 5).await?;

        let call = tokio::spawn(async move {
            client
                .say_hello(Request::new(HelloRequest {
                    name: "slow".to_string(),
                }))
                .await
        });
        greeter.started.notified().await;

        entry.interrupt().await?;

        let response = call.await??;
        assert_eq!(response.get_ref().message, "late");
        assert!(greeter.finished.load(Ordering::SeqCst));
        Ok(())
    }

    #[tokio::test]
    async fn interrupt_before_bootstrap_is_noop() -> Result<()> {
        let entry = GrpcEntry::builder(GrpcEntryConfig::new("idle", loopback())).build()?;
        entry.interrupt().await?;
        assert!(entry.local_addr().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn second_bootstrap_is_rejected() -> Result<()> {
        let entry = GrpcEntry::builder(GrpcEntryConfig::new("twice", loopback())).build()?;
        entry.bootstrap().await?;

        let err = entry.bootstrap().await.expect_err("already serving");
        assert!(matches!(err, Error::AlreadyBootstrapped { name } if name == "twice"));

        entry.interrupt().await
    }

    #[tokio::test]
    async fn bind_failure_is_bootstrap_error() -> Result<()> {
        let first = GrpcEntry::builder(GrpcEntryConfig::new("first", loopback())).build()?;
        first.bootstrap().await?;
        let taken = first.local_addr().await.expect("bound address");

        let second = GrpcEntry::builder(GrpcEntryConfig::new("second", taken)).build()?;
        let err = second.bootstrap().await.expect_err("address in use");
        assert!(matches!(err, Error::Bootstrap { name, .. } if name == "second"));

        first.interrupt().await
    }

    #[test]
    fn rejects_invalid_configuration() {
        let err = GrpcEntry::builder(GrpcEntryConfig::new(" ", loopback()))
            .build()
            .expect_err("empty name");
        assert!(matches!(err, Error::Configuration { .. }));

        let mut config = GrpcEntryConfig::new("greeter", loopback());
        config.interceptors.meta.prefix = Some("bad prefix".to_string());
        let err = GrpcEntry::builder(config)
            .build()
            .expect_err("invalid header prefix");
        assert!(matches!(err, Error::InvalidHeader { .. }));
    }

    #[test]
    fn builds_chain_from_config() -> Result<()> {
        let mut config = GrpcEntryConfig::new("greeter", loopback());
        assert_eq!(configured_chain(&config, None, None, Vec::new())?.len(), 2);

        config.interceptors.logging.enabled = false;
        assert_eq!(configured_chain(&config, None, None, Vec::new())?.len(), 1);

        config.interceptors.meta.enabled = false;
        assert!(configured_chain(&config, None, None, Vec::new())?.is_empty());
        Ok(())
    }
}
