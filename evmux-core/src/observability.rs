//! OpenTelemetry and log output setup
//!
//! The client emits `tracing` events and spans for its connection lifecycle
//! and routing decisions, and OpenTelemetry instruments through
//! `ClientMetrics` in `evmux-client`. Nothing is exported until an
//! application installs a subscriber and providers; this module does that in
//! one call.
//!
//! # Pipeline
//!
//! - **Traces**: `tracing` spans bridged by `tracing-opentelemetry`, batched
//!   and exported over OTLP/gRPC
//! - **Metrics**: periodic reader exporting over OTLP/gRPC every 30 seconds
//! - **Logs**: JSON lines on stdout, filtered by `RUST_LOG` or the configured
//!   level
//!
//! # Usage Pattern
//!
//! Initialize before building the client so the connection is traced from
//! the first attempt:
//!
//! ```rust,no_run
//! use evmux_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("block-indexer")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("evmux_client=debug,info");
//!
//!     evmux_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... subscribe and run ...
//!
//!     evmux_core::shutdown_observability();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: collector endpoint
//! - `RUST_LOG`: log filter directives; wins over the configured level

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Boxed error returned by the setup functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Interval at which metrics are pushed to the collector
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// Observability configuration
///
/// # Defaults
///
/// - Service name: "evmux"
/// - Service version: current crate version
/// - OTLP endpoint: `$OTEL_EXPORTER_OTLP_ENDPOINT` or "http://localhost:4317"
/// - Traces, metrics and logs enabled
/// - Log level: `$RUST_LOG` or "info"
///
/// # Examples
///
/// ```rust
/// use evmux_core::ObservabilityConfig;
///
/// let logs_only = ObservabilityConfig::new("mempool-watcher")
///     .with_traces(false)
///     .with_metrics(false)
///     .with_log_level("debug");
/// assert!(logs_only.enable_logs);
/// ```
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every exported span and metric
    pub service_name: String,

    /// Service version attached to every exported span and metric
    pub service_version: String,

    /// gRPC endpoint of the OTLP collector
    pub otlp_endpoint: String,

    /// Export spans
    pub enable_traces: bool,

    /// Export metrics
    pub enable_metrics: bool,

    /// Write JSON log lines to stdout
    pub enable_logs: bool,

    /// Filter directives used when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "evmux".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ObservabilityConfig {
    /// Create a configuration with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint (e.g. "http://collector:4317")
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the fallback log filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metric export
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Enable or disable stdout log lines
    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the global tracer/meter providers and the tracing subscriber
///
/// Call once at startup. The global `tracing` subscriber can only be set
/// once per process; a second call returns an error instead of panicking.
///
/// # Errors
///
/// - the OTLP exporters could not be built (bad endpoint)
/// - the log filter directives do not parse
/// - a global subscriber is already installed
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    // The tracer has to exist before the subscriber, which wraps it in a layer.
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "OpenTelemetry initialized"
    );

    Ok(())
}

fn init_tracer(config: &ObservabilityConfig) -> Result<opentelemetry_sdk::trace::Tracer, BoxError> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider);

    Ok(tracer)
}

fn init_metrics(config: &ObservabilityConfig) -> Result<(), BoxError> {
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRICS_EXPORT_INTERVAL)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider);
    Ok(())
}

/// Registry with an env filter, an optional OpenTelemetry layer and an
/// optional JSON fmt layer.
fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let fmt_layer = config.enable_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
    });

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Flush point for the end of `main`
///
/// The SDK providers flush and shut down when the last handle is dropped;
/// this only marks the shutdown in the log stream.
pub fn shutdown_observability() {
    tracing::info!("Shutting down OpenTelemetry");
}
