//! Tracing setup: formatted logs plus optional OpenTelemetry export
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter (default `scanq=info`)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g. http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: service name (default `scanqd`)

use crate::config::LogFormat;
use anyhow::Result;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "scanq=info,scanqd=info,tower_http=info";
const OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Keep the guard alive until exit so buffered lines flush.
pub fn init_tracing(format: LogFormat) -> Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let endpoint = std::env::var(OTLP_ENDPOINT_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty());
    let (otel, otel_error) = match endpoint.as_deref().map(otlp_layer) {
        Some(Ok(layer)) => (Some(layer), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(otel)
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    if let Some(e) = otel_error {
        warn!(error = %e, "OpenTelemetry export disabled");
    }
    Ok(guard)
}

#[cfg(feature = "telemetry")]
fn otlp_layer(endpoint: &str) -> Result<BoxedLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::TracerProvider;
    use opentelemetry_sdk::Resource;

    let service_name = std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "scanqd".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

#[cfg(not(feature = "telemetry"))]
fn otlp_layer(_endpoint: &str) -> Result<BoxedLayer> {
    anyhow::bail!(
        "{} is set but scanqd was built without the 'telemetry' feature",
        OTLP_ENDPOINT_ENV
    )
}
