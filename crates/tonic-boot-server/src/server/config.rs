//! Process configuration.
//!
//! Entries come from one of two sources:
//!
//! - a JSON boot file (`--config` / `BOOT_CONFIG`) listing `grpc` and
//!   `internal` entries, or
//! - the single-entry flags: one gRPC entry named `--entry-name` on
//!   `--grpc-addr`, plus an internal entry when `--internal-addr` is set.
//!
//! Every flag can also be supplied through its environment variable, and a
//! `.env` file is loaded before parsing.
//!
//! ```json
//! {
//!   "app": { "name": "greeter", "version": "1.0.0" },
//!   "grpc": [
//!     {
//!       "name": "greeter",
//!       "addr": "0.0.0.0:8080",
//!       "interceptors": { "meta": { "prefix": "Dog" } }
//!     }
//!   ],
//!   "internal": [{ "name": "ops", "addr": "0.0.0.0:8081" }]
//! }
//! ```

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use tonic_boot_core::entry::{
    GrpcEntryConfig, InterceptorConfig, InternalEntryConfig, LoggingConfig, MetaConfig,
};
use tonic_boot_core::interceptor::MetaInterceptor;

/// Output format of the console log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Command-line arguments for the server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct CliArgs {
    /// JSON boot file declaring the entries. Takes precedence over the
    /// single-entry flags below.
    #[arg(long, env = "BOOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name of the gRPC entry
    #[arg(long, env = "ENTRY_NAME", default_value = "greeter")]
    pub entry_name: String,

    /// Listen address of the gRPC entry
    #[arg(long, env = "GRPC_ADDR", default_value = "0.0.0.0:8080")]
    pub grpc_addr: SocketAddr,

    /// Listen address of the internal HTTP entry. Disabled when unset.
    #[arg(long, env = "INTERNAL_ADDR")]
    pub internal_addr: Option<SocketAddr>,

    /// Request-id header prefix: `Dog` yields `x-dog-request-id`
    #[arg(long, env = "REQUEST_ID_PREFIX")]
    pub request_id_prefix: Option<String>,

    /// Disable the per-call logging interceptor
    #[arg(long, env = "DISABLE_LOGGING", default_value_t = false)]
    pub disable_logging: bool,

    /// Disable the request-id interceptor
    #[arg(long, env = "DISABLE_META", default_value_t = false)]
    pub disable_meta: bool,

    /// Seconds each entry may spend draining in-flight calls on shutdown
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Console log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Application name and version stamped on responses and `/info`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Every entry to boot, in declaration order: gRPC entries first, then
/// internal entries.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub grpc: Vec<GrpcEntryConfig>,
    #[serde(default)]
    pub internal: Vec<InternalEntryConfig>,
}

impl BootConfig {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw).context("malformed boot configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot boot. Duplicate names are reported
    /// here, before any entry is constructed.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grpc.is_empty() && self.internal.is_empty() {
            bail!("at least one entry must be configured");
        }

        let mut names = HashSet::new();
        let entries = self
            .grpc
            .iter()
            .map(|c| (&c.name, c.shutdown_timeout_secs))
            .chain(
                self.internal
                    .iter()
                    .map(|c| (&c.name, c.shutdown_timeout_secs)),
            );
        for (name, shutdown_timeout_secs) in entries {
            if name.trim().is_empty() {
                bail!("entry names must not be empty");
            }
            if shutdown_timeout_secs == 0 {
                bail!("entry `{name}` needs a non-zero shutdown timeout");
            }
            if !names.insert(name.as_str()) {
                bail!("entry `{name}` is declared more than once");
            }
        }

        for grpc in &self.grpc {
            if let Some(prefix) = &grpc.interceptors.meta.prefix {
                MetaInterceptor::new()
                    .with_prefix(prefix)
                    .with_context(|| format!("entry `{}`", grpc.name))?;
            }
        }
        Ok(())
    }
}

impl TryFrom<CliArgs> for BootConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if let Some(path) = &args.config {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            return Self::from_json(&raw);
        }

        let grpc = GrpcEntryConfig {
            name: args.entry_name,
            addr: args.grpc_addr,
            shutdown_timeout_secs: args.shutdown_timeout_secs,
            interceptors: InterceptorConfig {
                meta: MetaConfig {
                    enabled: !args.disable_meta,
                    prefix: args.request_id_prefix,
                },
                logging: LoggingConfig {
                    enabled: !args.disable_logging,
                },
            },
        };
        let internal = args.internal_addr.map(|addr| InternalEntryConfig {
            name: "internal".to_string(),
            addr,
            shutdown_timeout_secs: args.shutdown_timeout_secs,
        });

        let config = Self {
            app: AppConfig::default(),
            grpc: vec![grpc],
            internal: internal.into_iter().collect(),
        };
        config.validate()?;
        Ok(config)
    }
}
