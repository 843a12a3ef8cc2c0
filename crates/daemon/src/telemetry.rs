//! Telemetry setup for OpenTelemetry integration
//!
//! Enabled when `OTEL_EXPORTER_OTLP_ENDPOINT` is set and the binary was
//! built with the `telemetry` feature.
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! OTEL_SERVICE_NAME=keystone-dev \
//!     ./keystone
//! ```

use anyhow::Result;
use tracing_subscriber::{Layer, Registry};

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

const ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Whether an OTLP endpoint is configured
pub fn requested() -> bool {
    std::env::var_os(ENDPOINT_VAR).is_some()
}

/// Export layer, or `None` when telemetry is not requested or not compiled in.
///
/// Runs before the subscriber is installed, so it does not log.
pub fn layer() -> Result<Option<BoxedLayer>> {
    if !requested() {
        return Ok(None);
    }

    #[cfg(feature = "telemetry")]
    {
        otlp_layer().map(Some)
    }

    #[cfg(not(feature = "telemetry"))]
    {
        Ok(None)
    }
}

#[cfg(feature = "telemetry")]
fn otlp_layer() -> Result<BoxedLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let endpoint = std::env::var(ENDPOINT_VAR)?;
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "keystone".to_string());

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name,
        )]))
        .build();

    let tracer = provider.tracer("keystone");
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Box::new(tracing_opentelemetry::layer().with_tracer(tracer)))
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
