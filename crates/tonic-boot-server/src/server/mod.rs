//! Process wiring: configuration, telemetry, services and the entry registry.
//!
//! ## Structure
//!
//! - [`config`] - CLI, environment and boot file configuration.
//! - [`registry`] - builds the [`EntryRegistry`](tonic_boot_core::entry::EntryRegistry).
//! - [`service`] - gRPC service implementations.
//! - [`telemetry`] - logging and optional metrics.

pub mod config;
pub mod registry;
pub mod service;
pub mod telemetry;
