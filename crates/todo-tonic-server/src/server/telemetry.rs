//! # Logging, tracing and metrics
//!
//! Console logging through `tracing-subscriber` is always installed, filtered
//! by `RUST_LOG` (default `info`) and printed either human-readable or as JSON
//! lines (`--log-json`). Everything else is opt-in through cargo features and
//! exported with OpenTelemetry.
//!
//! ## Feature matrix
//!
//! - `tracing` (default): per-RPC spans, exported as OpenTelemetry traces.
//! - `metrics`: request/error counters, list stream gauges and histograms.
//! - `stdout`: export traces and/or metrics to stdout every 5 seconds.
//! - `honeycomb`: export traces and/or metrics over OTLP/gRPC. Reads
//!   `HONEYCOMB_API_KEY`, `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and
//!   `HONEYCOMB_COMPRESSION`.
//!
//! Exporters need `tracing` or `metrics`; both exporters may be enabled
//! together.
//!
//! ## Metrics
//!
//! | name | kind | attributes |
//! |---|---|---|
//! | `requests` | counter | `rpc.method` |
//! | `errors` | counter | `rpc.method` |
//! | `streams_inflight` | up/down counter | |
//! | `stream_duration` | histogram (ms) | |
//! | `todos_streamed` | counter | |
//!
//! The recording helpers at the bottom of this module compile to no-ops when
//! `metrics` is off, so call sites never need their own `cfg`.
//!
//! ```bash
//! cargo run --bin todo-tonic-server --features metrics,honeycomb
//! cargo run --bin todo-tonic-server --features tracing,metrics,stdout
//! ```

#[cfg(all(
    feature = "honeycomb",
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semconv;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

#[cfg(any(feature = "metrics", feature = "tracing"))]
const SERVICE_NAME: &str = "todo-tonic-server";

/// Owns the OpenTelemetry providers so they can be flushed on shutdown.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every provider. Errors are printed to stderr
    /// because the subscriber may already be gone.
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

/// Installs the global subscriber and, per enabled features, the OpenTelemetry
/// tracer and meter providers.
///
/// # Errors
///
/// Fails if an exporter cannot be configured (for example a missing
/// `HONEYCOMB_*` variable).
pub fn init_telemetry(json_logs: bool) -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semconv::SCHEMA_URL)
        .build();

    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_file(true)
            .with_target(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
            .boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt_layer);

    #[cfg(feature = "tracing")]
    let tracer_provider = tracer_provider()?;
    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let meter_provider = meter_provider()?;
    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        register_instruments(&opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semconv::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semconv::SCHEMA_URL,
        )
        .build()
}

/// Connection settings shared by the Honeycomb trace and metric exporters.
#[cfg(feature = "honeycomb")]
struct Honeycomb {
    metadata: tonic::metadata::MetadataMap,
    endpoint: String,
    compression: opentelemetry_otlp::Compression,
}

#[cfg(feature = "honeycomb")]
impl Honeycomb {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use core::str::FromStr;

        let var = |name: &str| std::env::var(name).with_context(|| format!("missing `{name}`"));

        let mut metadata = tonic::metadata::MetadataMap::new();
        metadata.insert(
            "x-honeycomb-team",
            var("HONEYCOMB_API_KEY")?
                .parse()
                .context("invalid API key")?,
        );
        metadata.insert(
            "x-honeycomb-dataset",
            var("HONEYCOMB_DATASET")?
                .parse()
                .context("invalid dataset")?,
        );

        let compression = opentelemetry_otlp::Compression::from_str(
            &var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase(),
        )?;

        Ok(Self {
            metadata,
            endpoint: var("HONEYCOMB_ENDPOINT")?,
            compression,
        })
    }
}

/// Applies the Honeycomb settings to an OTLP/gRPC exporter builder.
#[cfg(feature = "honeycomb")]
macro_rules! honeycomb_exporter {
    ($builder:expr, $settings:expr) => {{
        use opentelemetry_otlp::{Protocol, WithExportConfig, WithTonicConfig};
        $builder
            .with_tonic()
            .with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
            .with_metadata($settings.metadata.clone())
            .with_timeout(core::time::Duration::from_secs(10))
            .with_compression($settings.compression)
            .with_endpoint($settings.endpoint.clone())
            .with_protocol(Protocol::Grpc)
    }};
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "honeycomb")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(core::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "tracing")]
fn tracer_provider() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder =
        builder.with_span_processor(batch_processor(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;
        let settings = Honeycomb::from_env()?;
        let exporter = honeycomb_exporter!(opentelemetry_otlp::SpanExporter::builder(), settings)
            .build()
            .context("failed to build span exporter")?;
        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
fn meter_provider() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(core::time::Duration::from_secs(5))
            .build(),
    );

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;
        let settings = Honeycomb::from_env()?;
        let exporter = honeycomb_exporter!(opentelemetry_otlp::MetricExporter::builder(), settings)
            .with_temporality(sdkmetrics::Temporality::Delta)
            .build()
            .context("failed to build metric exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
struct Instruments {
    requests: Counter<u64>,
    errors: Counter<u64>,
    streams_inflight: UpDownCounter<i64>,
    stream_duration_ms: Histogram<f64>,
    todos_streamed: Counter<u64>,
}

#[cfg(feature = "metrics")]
static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

#[cfg(feature = "metrics")]
fn register_instruments(meter: &Meter) {
    let _ = INSTRUMENTS.set(Instruments {
        requests: meter
            .u64_counter("requests")
            .with_description("Total gRPC requests by method")
            .build(),
        errors: meter
            .u64_counter("errors")
            .with_description("Failed requests and aborted streams by method")
            .build(),
        streams_inflight: meter
            .i64_up_down_counter("streams_inflight")
            .with_description("Concurrent list streams")
            .build(),
        stream_duration_ms: meter
            .f64_histogram("stream_duration")
            .with_unit("ms")
            .with_description("End-to-end list stream duration")
            .build(),
        todos_streamed: meter
            .u64_counter("todos_streamed")
            .with_description("Todos sent over list streams")
            .build(),
    });
}

#[cfg(feature = "metrics")]
fn with_instruments(f: impl FnOnce(&Instruments)) {
    if let Some(instruments) = INSTRUMENTS.get() {
        f(instruments);
    }
}

#[cfg(feature = "metrics")]
pub fn increment_requests(method: &'static str) {
    with_instruments(|i| i.requests.add(1, &[KeyValue::new("rpc.method", method)]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests(_method: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_errors(method: &'static str) {
    with_instruments(|i| i.errors.add(1, &[KeyValue::new("rpc.method", method)]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_errors(_method: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_streams_inflight() {
    with_instruments(|i| i.streams_inflight.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_streams_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_streams_inflight() {
    with_instruments(|i| i.streams_inflight.add(-1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_streams_inflight() {}

#[cfg(feature = "metrics")]
pub fn record_stream_duration(duration_ms: f64) {
    with_instruments(|i| i.stream_duration_ms.record(duration_ms, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn record_stream_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_todos_streamed(count: u64) {
    with_instruments(|i| i.todos_streamed.add(count, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_todos_streamed(_count: u64) {}
