//! # Telemetry
//!
//! Console logging is always on: a `tracing_subscriber::fmt` layer filtered
//! by `RUST_LOG` (default `info`), rendered either `pretty` or as `json`.
//!
//! ## Feature matrix
//!
//! - `metrics`: Enables OpenTelemetry metrics for every gRPC call
//!   (`rpc_calls`, `rpc_errors`, `rpc_duration`).
//! - `stdout`: Enables the stdout exporter for those metrics.
//!
//! ## Feature constraints
//!
//! - The `stdout` exporter requires `metrics`.
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features metrics,stdout -- --log-format json
//! ```

// Disallow using `stdout` without `metrics`
#[cfg(all(feature = "stdout", not(feature = "metrics")))]
compile_error!("The 'stdout' feature requires 'metrics' to be enabled.");

use crate::server::config::LogFormat;
use tonic_boot_core::interceptor::{CallRecord, LogSink, TracingSink};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::KeyValue;
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry::InstrumentationScope;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::Resource;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

pub struct TelemetryProviders {
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and stops the exporters.
    pub fn shutdown(self) {
        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let (pretty, json) = match format {
        LogFormat::Pretty => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .json()
                    .with_current_span(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()?;

    #[cfg(feature = "metrics")]
    {
        let scope = InstrumentationScope::builder("tonic-boot")
            .with_version(env!("CARGO_PKG_VERSION"))
            .with_schema_url(semvcns::SCHEMA_URL)
            .build();
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
    }

    Ok(TelemetryProviders {
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "metrics")]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("tonic-boot")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

/// Log sink of every gRPC entry: writes the record through [`TracingSink`]
/// and records call metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TelemetrySink;

impl LogSink for TelemetrySink {
    fn emit(&self, record: &CallRecord) {
        TracingSink.emit(record);
        record_call(record);
    }
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static RPC_CALLS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RPC_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = RPC_CALLS.set(
        meter
            .u64_counter("rpc_calls")
            .with_description("Completed gRPC calls")
            .build(),
    );

    let _ = RPC_ERRORS.set(
        meter
            .u64_counter("rpc_errors")
            .with_description("gRPC calls completed with a non-OK status")
            .build(),
    );

    let _ = RPC_DURATION_MS.set(
        meter
            .f64_histogram("rpc_duration")
            .with_unit("ms")
            .with_description("End-to-end call duration")
            .build(),
    );
}

// Compiles to a no-op when metrics are disabled
#[cfg(feature = "metrics")]
pub fn record_call(record: &CallRecord) {
    let attributes = [
        KeyValue::new("entry", record.entry_name.clone()),
        KeyValue::new("method", record.method.clone()),
        KeyValue::new("code", format!("{:?}", record.code)),
    ];
    if let Some(counter) = RPC_CALLS.get() {
        counter.add(1, &attributes);
    }
    if record.is_error() {
        if let Some(counter) = RPC_ERRORS.get() {
            counter.add(1, &attributes);
        }
    }
    if let Some(histogram) = RPC_DURATION_MS.get() {
        histogram.record(record.elapsed.as_secs_f64() * 1_000.0, &attributes);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_call(_record: &CallRecord) {}
