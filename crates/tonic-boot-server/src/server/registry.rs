//! Populates the [`EntryRegistry`] from a [`BootConfig`].

use crate::server::config::BootConfig;
use crate::server::service::build_greeter_service;
use crate::server::telemetry::TelemetrySink;
use std::sync::Arc;
use tonic_boot_core::entry::{EntryRegistry, GrpcEntry, InternalEntry};

/// Builds one entry per configured item, gRPC entries first, each in
/// declaration order. Every gRPC entry serves the greeter service.
pub fn build_registry(config: &BootConfig) -> anyhow::Result<EntryRegistry> {
    let mut registry = EntryRegistry::new();
    let app = &config.app;

    for grpc in &config.grpc {
        let entry = GrpcEntry::builder(grpc.clone())
            .add_service(build_greeter_service())
            .with_log_sink(Arc::new(TelemetrySink))
            .with_app_info(&app.name, &app.version)
            .build()?;
        registry.register(Arc::new(entry))?;
    }

    for internal in &config.internal {
        let entry = InternalEntry::new(internal.clone())?.with_app_info(&app.name, &app.version);
        registry.register(Arc::new(entry))?;
    }

    Ok(registry)
}
