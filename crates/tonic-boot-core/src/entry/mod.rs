//! Lifecycle-managed network entries.
//!
//! An [`Entry`] is a named, independently lifecycle-managed server component.
//! It moves through three states:
//!
//! ```text
//! Created --bootstrap--> Bootstrapped --interrupt--> Interrupted
//! ```
//!
//! Bootstrap must leave the entry accepting traffic. Interrupt must stop it
//! accepting new traffic, drain in-flight calls within the entry's deadline
//! and release its resources. Interrupting an entry that never bootstrapped
//! is a no-op.
//!
//! ## Structure
//!
//! - [`grpc`] - [`GrpcEntry`]: a tonic server behind an interceptor
//!   [`Chain`](crate::interceptor::Chain).
//! - [`internal`] - [`InternalEntry`]: an axum HTTP server exposing liveness
//!   and build info.
//! - [`registry`] - [`EntryRegistry`]: ordered bootstrap, reverse-order
//!   interrupt and shutdown signalling.

pub mod grpc;
pub mod internal;
mod lifecycle;
pub mod registry;

pub use grpc::{GrpcEntry, GrpcEntryBuilder};
pub use internal::InternalEntry;
pub use registry::{EntryRegistry, ShutdownHandle};

use crate::Result;
use core::time::Duration;
use serde::Deserialize;
use std::net::SocketAddr;

/// Kind tag of [`GrpcEntry`].
pub const GRPC_ENTRY_KIND: &str = "GrpcEntry";
/// Kind tag of [`InternalEntry`].
pub const INTERNAL_ENTRY_KIND: &str = "InternalEntry";

/// Default drain deadline applied on interrupt.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// A named server component with an explicit start/stop lifecycle.
#[tonic::async_trait]
pub trait Entry: Send + Sync + 'static {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    /// Kind tag, e.g. `GrpcEntry`.
    fn kind(&self) -> &'static str;

    /// Starts serving. On success the entry accepts traffic.
    async fn bootstrap(&self) -> Result<()>;

    /// Stops accepting traffic and drains in-flight work. A no-op when the
    /// entry never bootstrapped.
    async fn interrupt(&self) -> Result<()>;
}

/// Lifecycle state as tracked by the [`EntryRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Created,
    Bootstrapped,
    Interrupted,
}

fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

const fn enabled() -> bool {
    true
}

/// Configuration of a [`GrpcEntry`].
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrpcEntryConfig {
    pub name: String,
    pub addr: SocketAddr,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub interceptors: InterceptorConfig,
}

impl GrpcEntryConfig {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            interceptors: InterceptorConfig::default(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Built-in interceptors of a [`GrpcEntry`]. Meta runs before logging.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterceptorConfig {
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Header prefix: `Dog` yields `x-dog-request-id`.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Configuration of an [`InternalEntry`].
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InternalEntryConfig {
    pub name: String,
    pub addr: SocketAddr,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl InternalEntryConfig {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
