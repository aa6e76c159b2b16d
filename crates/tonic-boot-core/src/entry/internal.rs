//! Operational HTTP endpoints managed as an [`Entry`].
//!
//! - `GET /healthz` answers `OK` while the entry is serving.
//! - `GET /info` answers the entry name and the application name and version
//!   as JSON.
//!
//! Requests still running when the drain deadline passes are answered with
//! `503 Service Unavailable`.

use super::lifecycle::{ForceCloseLayer, ServeHandle};
use super::{Entry, INTERNAL_ENTRY_KIND, InternalEntryConfig};
use crate::{Error, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Body of `GET /info`.
#[derive(Clone, Debug, Serialize)]
struct Info {
    name: String,
    app_name: String,
    app_version: String,
}

async fn healthz() -> &'static str {
    "OK"
}

async fn info(State(info): State<Arc<Info>>) -> Json<Info> {
    Json(info.as_ref().clone())
}

fn force_closed() -> Response {
    StatusCode::SERVICE_UNAVAILABLE.into_response()
}

/// An HTTP entry exposing liveness and build information.
#[derive(Debug)]
pub struct InternalEntry {
    config: InternalEntryConfig,
    info: Arc<Info>,
    handle: Mutex<Option<ServeHandle>>,
}

impl InternalEntry {
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an empty name or a zero drain
    /// deadline.
    pub fn new(config: InternalEntryConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(Error::Configuration {
                reason: "internal entry name must not be empty".to_string(),
            });
        }
        if config.shutdown_timeout_secs == 0 {
            return Err(Error::Configuration {
                reason: format!("entry `{}` needs a non-zero shutdown timeout", config.name),
            });
        }

        let info = Arc::new(Info {
            name: config.name.clone(),
            app_name: String::new(),
            app_version: String::new(),
        });
        Ok(Self {
            config,
            info,
            handle: Mutex::new(None),
        })
    }

    /// Application name and version reported by `GET /info`.
    #[must_use]
    pub fn with_app_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = Arc::new(Info {
            name: self.config.name.clone(),
            app_name: name.into(),
            app_version: version.into(),
        });
        self
    }

    pub fn config(&self) -> &InternalEntryConfig {
        &self.config
    }

    /// Address the listener is bound to, once bootstrapped.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.handle.lock().await.as_ref().map(|h| h.local_addr)
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/info", get(info))
            .with_state(Arc::clone(&self.info))
    }
}

#[tonic::async_trait]
impl Entry for InternalEntry {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &'static str {
        INTERNAL_ENTRY_KIND
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
        let signal = shutdown.clone().cancelled_owned();
        let router = self
            .router()
            .layer(ForceCloseLayer::new(force.clone(), force_closed));
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
                .map_err(|e| e.to_string())
        });

        tracing::info!(
            entry = %self.config.name,
            kind = INTERNAL_ENTRY_KIND,
            %local_addr,
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
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use core::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    fn entry(name: &str) -> Result<InternalEntry> {
        InternalEntry::new(InternalEntryConfig::new(
            name,
            SocketAddr::from(([127, 0, 0, 1], 0)),
        ))
    }

    #[tokio::test]
    async fn info_reports_app() -> core::result::Result<(), Box<dyn std::error::Error>> {
        let entry = entry("ops")?.with_app_info("demo", "1.0.0");
        let res = entry
            .router()
            .oneshot(Request::get("/info").body(Body::empty())?)
            .await?;
        assert_eq!(res.status(), StatusCode::OK);

        let body = to_bytes(res.into_body(), usize::MAX).await?;
        let json: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(
            json,
            serde_json::json!({ "name": "ops", "app_name": "demo", "app_version": "1.0.0" })
        );
        Ok(())
    }

    #[tokio::test]
    async fn serves_healthz_until_interrupted()
    -> core::result::Result<(), Box<dyn std::error::Error>> {
        let entry = entry("ops")?;
        entry.bootstrap().await?;
        let addr = entry.local_addr().await.expect("bound address");

        let mut stream = TcpStream::connect(addr).await?;
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await?;
        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("OK"));

        entry.interrupt().await?;
        assert!(entry.local_addr().await.is_none());
        assert!(TcpStream::connect(addr).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn force_close_answers_unavailable()
    -> core::result::Result<(), Box<dyn std::error::Error>> {
        async fn stall() -> &'static str {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "late"
        }

        let force = CancellationToken::new();
        let router = Router::new()
            .route("/stall", get(stall))
            .layer(ForceCloseLayer::new(force.clone(), force_closed));

        let call = tokio::spawn(router.oneshot(Request::get("/stall").body(Body::empty())?));
        tokio::time::sleep(Duration::from_millis(20)).await;
        force.cancel();

        let res = tokio::time::timeout(Duration::from_secs(1), call).await???;
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        Ok(())
    }

    #[tokio::test]
    async fn interrupt_before_bootstrap_is_noop() -> Result<()> {
        entry("ops")?.interrupt().await
    }

    #[test]
    fn rejects_zero_deadline() {
        let mut config = InternalEntryConfig::new("ops", SocketAddr::from(([127, 0, 0, 1], 0)));
        config.shutdown_timeout_secs = 0;
        assert!(matches!(
            InternalEntry::new(config),
            Err(Error::Configuration { .. })
        ));
    }
}
