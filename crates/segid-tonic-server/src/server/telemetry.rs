//! # Telemetry
//!
//! Console logging is always on: a `tracing-subscriber` registry filtered by
//! `RUST_LOG` (default `info`) with a pretty `fmt` layer. OpenTelemetry export
//! is opt-in:
//!
//! - `tracing`: request spans, plus the core generator's own log events.
//! - `metrics`: per-namespace service metrics and generator gauges.
//! - `otlp`: OTLP/gRPC exporter, endpoint from `OTEL_EXPORTER_OTLP_ENDPOINT`.
//! - `stdout`: stdout exporter.
//!
//! Exporters need `tracing` or `metrics`. Every recording helper here is a
//! no-op until [`Telemetry::init`] has run with `metrics` enabled.
//!
//! ## Metrics
//!
//! | name | kind | attributes |
//! |------|------|------------|
//! | `segid.requests` | counter | `namespace`, `rpc.method` |
//! | `segid.errors` | counter | `namespace`, `rpc.method`, `rpc.grpc.status_code` |
//! | `segid.ids_issued` | counter | `namespace` |
//! | `segid.streams_inflight` | up-down counter | |
//! | `segid.stream_duration` | histogram (ms) | `namespace` |
//! | `segid.sync_extensions` | observable counter | `namespace` |
//! | `segid.prefetch_distance` | observable gauge | `namespace` |
//! | `segid.head_version` | observable gauge | `namespace` |
//!
//! `segid.sync_extensions` climbing means callers are reaching the store
//! themselves because prefetching fell behind.

#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled.");

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use core::time::Duration;
use segid_tonic_core::types::Factory;
use std::sync::Weak;
use tonic::Code;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "stdout", feature = "otlp"))]
const EXPORT_INTERVAL: Duration = Duration::from_secs(5);

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// The gRPC method a metric was recorded for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rpc {
    NextId,
    StreamIds,
    AddSegment,
}

impl Rpc {
    pub const fn as_str(self) -> &'static str {
        match self {
            Rpc::NextId => "NextId",
            Rpc::StreamIds => "StreamIds",
            Rpc::AddSegment => "AddSegment",
        }
    }
}

/// A point-in-time view of one namespace's generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratorStats {
    pub namespace: String,
    pub head_version: i64,
    pub prefetch_distance: i64,
    pub sync_extensions: u64,
}

/// Snapshots every generator `factory` has created so far.
pub fn generator_stats(factory: &Factory) -> Vec<GeneratorStats> {
    match factory.generators() {
        Ok(generators) => generators
            .iter()
            .map(|generator| GeneratorStats {
                namespace: generator.namespace().to_string(),
                head_version: generator.head_version(),
                prefetch_distance: generator.prefetch_distance(),
                sync_extensions: generator.sync_extensions(),
            })
            .collect(),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("cannot snapshot generators: {_e}");
            Vec::new()
        }
    }
}

/// Installed telemetry. Call [`Telemetry::shutdown`] before exit so buffered
/// spans and metrics are flushed.
pub struct Telemetry {
    #[cfg(feature = "tracing")]
    tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: sdkmetrics::SdkMeterProvider,
}

impl Telemetry {
    /// Installs the global subscriber and, per features, the OpenTelemetry
    /// providers.
    pub fn init() -> anyhow::Result<Self> {
        #[cfg(feature = "tracing")]
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

        #[cfg(feature = "tracing")]
        let tracer_provider = build_tracer_provider()?;
        #[cfg(feature = "metrics")]
        let meter_provider = build_meter_provider()?;

        let registry = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            );

        #[cfg(feature = "tracing")]
        let registry = {
            opentelemetry::global::set_tracer_provider(tracer_provider.clone());
            registry.with(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer_provider.tracer_with_scope(scope()))
                    .with_error_records_to_exceptions(true),
            )
        };

        #[cfg(feature = "metrics")]
        let registry = {
            opentelemetry::global::set_meter_provider(meter_provider.clone());
            let _ = METRICS.set(ServiceMetrics::new(&meter()));
            registry.with(tracing_opentelemetry::MetricsLayer::new(
                meter_provider.clone(),
            ))
        };

        registry.init();

        Ok(Self {
            #[cfg(feature = "tracing")]
            tracer_provider,
            #[cfg(feature = "metrics")]
            meter_provider,
        })
    }

    /// Flushes and stops the providers. Failures go to stderr.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

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

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn scope() -> InstrumentationScope {
    InstrumentationScope::builder("segid")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build()
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("segid")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
fn otlp_endpoint() -> anyhow::Result<String> {
    use anyhow::Context;

    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").context("missing `OTEL_EXPORTER_OTLP_ENDPOINT`")
}

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
fn otlp_compression() -> anyhow::Result<Compression> {
    use std::str::FromStr;

    match std::env::var("OTEL_EXPORTER_OTLP_COMPRESSION") {
        Ok(raw) => Ok(Compression::from_str(&raw.to_ascii_lowercase())?),
        Err(_) => Ok(Compression::Gzip),
    }
}

/// Builds an OTLP/gRPC exporter of the given type from the environment.
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
macro_rules! otlp_exporter {
    ($exporter:ty, $signal:literal) => {{
        use anyhow::Context;

        <$exporter>::builder()
            .with_tonic()
            .with_timeout(EXPORT_TIMEOUT)
            .with_compression(otlp_compression()?)
            .with_endpoint(otlp_endpoint()?)
            .with_protocol(Protocol::Grpc)
            .build()
            .context(concat!("failed to build OTLP ", $signal, " exporter"))?
    }};
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "otlp")))]
fn batch_spans<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(EXPORT_INTERVAL)
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "tracing")]
fn build_tracer_provider() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch_spans(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "otlp")]
    let builder = builder.with_span_processor(batch_spans(otlp_exporter!(
        opentelemetry_otlp::SpanExporter,
        "span"
    )));

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
fn build_meter_provider() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(EXPORT_INTERVAL)
            .build(),
    );

    #[cfg(feature = "otlp")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(otlp_exporter!(
            opentelemetry_otlp::MetricExporter,
            "metric"
        ))
        .with_interval(EXPORT_INTERVAL)
        .build(),
    );

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
fn meter() -> Meter {
    opentelemetry::global::meter_with_scope(scope())
}

#[cfg(feature = "metrics")]
fn namespace_kv(namespace: &str) -> KeyValue {
    KeyValue::new("namespace", namespace.to_string())
}

#[cfg(feature = "metrics")]
struct ServiceMetrics {
    requests: Counter<u64>,
    errors: Counter<u64>,
    ids_issued: Counter<u64>,
    streams_inflight: UpDownCounter<i64>,
    stream_duration: Histogram<f64>,
}

#[cfg(feature = "metrics")]
impl ServiceMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            requests: meter
                .u64_counter("segid.requests")
                .with_description("Accepted requests per namespace and method")
                .build(),
            errors: meter
                .u64_counter("segid.errors")
                .with_description("Failed requests per namespace, method and status")
                .build(),
            ids_issued: meter
                .u64_counter("segid.ids_issued")
                .with_description("IDs handed to clients per namespace")
                .build(),
            streams_inflight: meter
                .i64_up_down_counter("segid.streams_inflight")
                .with_description("Open StreamIds responses")
                .build(),
            stream_duration: meter
                .f64_histogram("segid.stream_duration")
                .with_unit("ms")
                .with_description("Time to stream a full StreamIds response")
                .build(),
        }
    }
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<ServiceMetrics> = OnceLock::new();

pub fn record_request(_rpc: Rpc, _namespace: &str) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = METRICS.get() {
        metrics.requests.add(
            1,
            &[namespace_kv(_namespace), KeyValue::new("rpc.method", _rpc.as_str())],
        );
    }
}

/// Requests rejected before a generator was resolved are recorded under
/// `namespace="unknown"`, so client input cannot grow the label set.
pub fn record_error(_rpc: Rpc, _namespace: &str, _code: Code) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = METRICS.get() {
        let namespace = match _code {
            Code::NotFound | Code::InvalidArgument => "unknown",
            _ => _namespace,
        };
        metrics.errors.add(
            1,
            &[
                namespace_kv(namespace),
                KeyValue::new("rpc.method", _rpc.as_str()),
                KeyValue::new("rpc.grpc.status_code", _code as i64),
            ],
        );
    }
}

pub fn record_ids_issued(_namespace: &str, _count: u64) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = METRICS.get() {
        metrics.ids_issued.add(_count, &[namespace_kv(_namespace)]);
    }
}

pub fn record_stream_opened() {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = METRICS.get() {
        metrics.streams_inflight.add(1, &[]);
    }
}

pub fn record_stream_closed() {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = METRICS.get() {
        metrics.streams_inflight.add(-1, &[]);
    }
}

pub fn record_stream_duration(_namespace: &str, _elapsed: Duration) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = METRICS.get() {
        metrics
            .stream_duration
            .record(_elapsed.as_secs_f64() * 1_000.0, &[namespace_kv(_namespace)]);
    }
}

/// Exports [`generator_stats`] for `factory` on every metric collection for
/// as long as the factory is alive.
pub fn observe_generators(_factory: Weak<Factory>) {
    #[cfg(feature = "metrics")]
    {
        let meter = meter();

        let factory = _factory.clone();
        meter
            .u64_observable_counter("segid.sync_extensions")
            .with_description("Times a caller found the chain dry and fetched a segment itself")
            .with_callback(move |observer| {
                for stats in factory.upgrade().iter().flat_map(|f| generator_stats(f)) {
                    observer.observe(stats.sync_extensions, &[namespace_kv(&stats.namespace)]);
                }
            })
            .build();

        let factory = _factory.clone();
        meter
            .i64_observable_gauge("segid.prefetch_distance")
            .with_description("Blocks the next hungry prefetch pass would reserve")
            .with_callback(move |observer| {
                for stats in factory.upgrade().iter().flat_map(|f| generator_stats(f)) {
                    observer.observe(stats.prefetch_distance, &[namespace_kv(&stats.namespace)]);
                }
            })
            .build();

        let factory = _factory;
        meter
            .i64_observable_gauge("segid.head_version")
            .with_description("Version of the chain node IDs are served from")
            .with_callback(move |observer| {
                for stats in factory.upgrade().iter().flat_map(|f| generator_stats(f)) {
                    observer.observe(stats.head_version, &[namespace_kv(&stats.namespace)]);
                }
            })
            .build();
    }
}
