use std::io;
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use once_cell::sync::OnceCell;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry_prometheus::PrometheusExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogFormat;

static LOGGING: OnceLock<()> = OnceLock::new();
static TELEMETRY: OnceCell<TelemetryState> = OnceCell::new();
static METRICS: OnceCell<MetricsHandles> = OnceCell::new();

struct TelemetryState {
    _provider: SdkMeterProvider,
    registry: Registry,
}

struct MetricsHandles {
    searches: Counter<u64>,
    search_failures: Counter<u64>,
    documents_indexed: Counter<u64>,
    documents_skipped: Counter<u64>,
    builds: Counter<u64>,
    search_latency_histogram: Histogram<f64>,
    build_latency_histogram: Histogram<f64>,
}

/// Initialize logging and metrics exporters. Safe to call multiple times.
pub fn init(format: LogFormat) -> Result<()> {
    init_logging(format);
    configure_metrics()?;
    Ok(())
}

/// Install the global tracing subscriber, writing to stderr so stdout stays
/// free for command output.
pub fn init_logging(format: LogFormat) {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_writer(io::stderr);
        let _ = match format {
            LogFormat::Json => tracing::subscriber::set_global_default(
                builder
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .finish(),
            ),
            LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
        };
    });
}

fn configure_metrics() -> Result<&'static TelemetryState> {
    TELEMETRY.get_or_try_init(|| {
        let registry = Registry::new();
        let exporter = build_exporter(&registry)?;

        let provider = SdkMeterProvider::builder()
            .with_resource(Resource::new(vec![KeyValue::new("service.name", "notedex")]))
            .with_reader(exporter)
            .build();

        global::set_meter_provider(provider.clone());

        let meter = global::meter("notedex");
        let searches = meter
            .u64_counter("notedex_searches_total")
            .with_description("Search requests answered")
            .init();
        let search_failures = meter
            .u64_counter("notedex_search_failures_total")
            .with_description("Search requests that ended in an error")
            .init();
        let documents_indexed = meter
            .u64_counter("notedex_documents_indexed_total")
            .with_description("Documents added to an index across all builds")
            .init();
        let documents_skipped = meter
            .u64_counter("notedex_documents_skipped_total")
            .with_description("Tree leaves left out of an index by filters or read failures")
            .init();
        let builds = meter
            .u64_counter("notedex_index_builds_total")
            .with_description("Completed index builds")
            .init();
        let search_latency_histogram = meter
            .f64_histogram("notedex_search_latency_ms")
            .with_description("Latency of a search in milliseconds")
            .init();
        let build_latency_histogram = meter
            .f64_histogram("notedex_index_build_latency_ms")
            .with_description("Latency of a full index build in milliseconds")
            .init();

        METRICS
            .set(MetricsHandles {
                searches,
                search_failures,
                documents_indexed,
                documents_skipped,
                builds,
                search_latency_histogram,
                build_latency_histogram,
            })
            .map_err(|_| anyhow!("metrics handles already initialized"))?;

        Ok(TelemetryState {
            _provider: provider,
            registry,
        })
    })
}

fn build_exporter(registry: &Registry) -> Result<PrometheusExporter> {
    opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .context("failed to build Prometheus exporter")
}

fn metrics() -> Option<&'static MetricsHandles> {
    METRICS.get()
}

fn state() -> Option<&'static TelemetryState> {
    TELEMETRY.get()
}

/// Record one search and its latency.
pub fn record_search(latency_ms: u64, succeeded: bool) {
    if let Some(metrics) = metrics() {
        metrics.searches.add(1, &[]);
        if !succeeded {
            metrics.search_failures.add(1, &[]);
        }
        metrics
            .search_latency_histogram
            .record(latency_ms as f64, &[]);
    }
}

/// Record a finished index build.
pub fn record_build(latency_ms: u64, indexed: usize, skipped: usize) {
    if let Some(metrics) = metrics() {
        metrics.builds.add(1, &[]);
        metrics.documents_indexed.add(indexed as u64, &[]);
        metrics.documents_skipped.add(skipped as u64, &[]);
        metrics
            .build_latency_histogram
            .record(latency_ms as f64, &[]);
    }
}

/// Render all currently collected metrics in Prometheus text format.
pub fn export_prometheus() -> Result<String> {
    let state = state().ok_or_else(|| anyhow!("telemetry not initialized"))?;
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("failed to encode metrics")?;
    String::from_utf8(buffer).context("metrics buffer is not valid UTF-8")
}
