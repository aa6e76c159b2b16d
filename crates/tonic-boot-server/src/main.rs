#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{BootConfig, CliArgs};
use server::registry::build_registry;
use server::telemetry::init_telemetry;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let providers = init_telemetry(args.log_format)?;
    let config = BootConfig::try_from(args)?;

    log_startup_info(&config);
    let registry = build_registry(&config)?;

    if let Err(e) = registry.bootstrap_all().await {
        tracing::error!("Startup failed, interrupting started entries: {e}");
        if let Err(shutdown) = registry.interrupt_all().await {
            tracing::error!("Error during shutdown: {shutdown}");
        }
        providers.shutdown();
        return Err(e.into());
    }

    registry.wait_for_shutdown_signal().await;
    tracing::info!("Shutdown signal received, terminating gracefully...");

    let res = registry.interrupt_all().await;
    if let Err(tonic_boot_core::Error::Shutdown { failures }) = &res {
        for failure in failures {
            tracing::error!("{failure}");
        }
    }
    providers.shutdown();
    res?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &BootConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Booting entries with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Booting {} gRPC and {} internal entries",
            config.grpc.len(),
            config.internal.len()
        );
    }
}
