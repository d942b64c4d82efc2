//! Log output and optional OTLP span export for the deobfuscation phases.

use std::time::Duration;

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry::trace::{Status, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_NAME: &str = "jdeob";
const DEFAULT_LOG_FILTER: &str = "jdeob=info,warn";
const TRACES_PATH: &str = "/v1/traces";

/// Exports one span per load, pass and export phase.
pub(crate) struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Export to an OTLP/HTTP collector; bare or signal-specific URLs are
    /// redirected to the traces path.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(traces_endpoint(&endpoint)?)
            .build()
            .context("build OTLP span exporter")?;
        Self::with_exporter(exporter)
    }

    fn with_exporter<E>(exporter: E) -> Result<Self>
    where
        E: SpanExporter + 'static,
    {
        // One span per class at most, so a small queue is enough.
        let batching = BatchConfigBuilder::default()
            .with_max_queue_size(8192)
            .with_max_export_batch_size(512)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(SERVICE_NAME)
                    .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
                    .build(),
            )
            .with_span_processor(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batching)
                    .build(),
            )
            .build();
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }

    /// Run a fallible phase inside a span; an error marks the span as failed.
    pub(crate) fn in_span<T, F>(&self, name: &str, attributes: &[KeyValue], phase: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.tracer.in_span(name.to_string(), |cx| {
            let span = cx.span();
            span.set_attributes(attributes.iter().cloned());
            let result = phase();
            if let Err(error) = &result {
                span.set_status(Status::error(format!("{error:#}")));
            }
            result
        })
    }

    /// Flush pending spans.
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|error| anyhow::anyhow!("failed to shut down tracer provider: {error}"))
    }
}

fn traces_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    let path = url.path().trim_end_matches('/').to_string();
    let base = ["/v1/logs", "/v1/metrics", TRACES_PATH]
        .iter()
        .find_map(|signal| path.strip_suffix(signal))
        .unwrap_or(path.as_str());
    url.set_path(&format!("{base}{TRACES_PATH}"));
    Ok(url.to_string())
}

/// Install the stderr log subscriber; `RUST_LOG` overrides the default filter.
pub(crate) fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // A second initialisation (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// [`Telemetry::in_span`] when export is enabled, a plain call otherwise.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    phase: F,
) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, phase),
        None => phase(),
    }
}
