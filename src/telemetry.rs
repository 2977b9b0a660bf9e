use anyhow::{Context, Result, anyhow};
use opentelemetry::KeyValue;
use opentelemetry::trace::{TraceContextExt, Tracer, TracerProvider as OtelTracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider, SpanExporter,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Telemetry handle for OpenTelemetry tracing.
pub(crate) struct Telemetry {
    tracer: opentelemetry_sdk::trace::SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Initialize telemetry with an OTLP HTTP exporter.
    pub(crate) fn new(endpoint: String) -> Result<Self> {
        let endpoint = normalize_otlp_http_trace_endpoint(&endpoint)?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("build OTLP span exporter")?;
        Self::from_exporter(exporter)
    }

    /// Run a closure inside a span.
    pub(crate) fn in_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        self.tracer.in_span(name.to_string(), |cx| {
            let span = cx.span();
            for attribute in attributes {
                span.set_attribute(attribute.clone());
            }
            f()
        })
    }

    /// Flush spans and shut down the tracer provider.
    pub(crate) fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.provider.shutdown() {
            return Err(anyhow!("failed to shutdown tracer provider: {err}"));
        }
        Ok(())
    }

    fn from_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        let resource = Resource::builder().with_service_name("mixinspect").build();
        // Spans end on rayon worker threads; the batch processor only does a
        // channel send there and exports from its own thread.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(65_536)
            .with_max_export_batch_size(4096)
            .with_scheduled_delay(Duration::from_millis(200))
            .build();
        let processor = BatchSpanProcessor::builder(exporter)
            .with_batch_config(batch_config)
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_span_processor(processor)
            .build();
        let tracer = provider.tracer("mixinspect");
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }
}

fn normalize_otlp_http_trace_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    let path = url.path().to_string();
    if path == "/" {
        url.set_path("/v1/traces");
    } else if let Some(prefix) = path.strip_suffix("/v1/logs") {
        url.set_path(&format!("{prefix}/v1/traces"));
    }
    Ok(url.to_string())
}

/// Initialize logging facade with stderr output.
pub(crate) fn init_logging() {
    let init_result = tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mixinspect=info,warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    let _ = init_result;
}

/// Span attribute under the `mixinspect.` namespace.
pub(crate) fn attribute(key: &str, value: impl Into<opentelemetry::Value>) -> KeyValue {
    KeyValue::new(format!("mixinspect.{key}"), value)
}

/// Run `f` in a span when telemetry is enabled.
pub(crate) fn with_span<T, F>(
    telemetry: Option<&Telemetry>,
    name: &str,
    attributes: &[KeyValue],
    f: F,
) -> T
where
    F: FnOnce() -> T,
{
    match telemetry {
        Some(telemetry) => telemetry.in_span(name, attributes, f),
        None => f(),
    }
}

/// Top-level pipeline step; the span and its `phase` attribute share a name.
pub(crate) fn in_phase<T, F>(telemetry: Option<&Telemetry>, phase: &'static str, f: F) -> T
where
    F: FnOnce() -> T,
{
    with_span(telemetry, phase, &[attribute("phase", phase)], f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkResult;
    use opentelemetry_sdk::trace::{SpanData, SpanExporter};

    #[derive(Debug)]
    struct NoopExporter;

    impl SpanExporter for NoopExporter {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Ok(())
        }
    }

    #[test]
    fn telemetry_uses_exporter_without_errors() {
        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        telemetry.in_span("test", &[KeyValue::new("test.key", "value")], || {});
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn attributes_are_namespaced() {
        let attribute = attribute("jar_entry", "com/example/Foo.class");
        assert_eq!(attribute.key.as_str(), "mixinspect.jar_entry");
        assert_eq!(attribute.value.as_str(), "com/example/Foo.class");
    }

    #[test]
    fn phases_run_with_and_without_telemetry() {
        assert_eq!(in_phase(None, "scan", || 1), 1);
        let telemetry = Telemetry::from_exporter(NoopExporter).expect("telemetry");
        assert_eq!(in_phase(Some(&telemetry), "scan", || 2), 2);
        telemetry.shutdown().expect("shutdown");
    }

    #[test]
    fn normalize_root_endpoint_to_trace_path() {
        let endpoint =
            normalize_otlp_http_trace_endpoint("http://localhost:4318/").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }

    #[test]
    fn normalize_log_endpoint_to_trace_path() {
        let endpoint =
            normalize_otlp_http_trace_endpoint("http://localhost:4318/v1/logs").expect("endpoint");
        assert_eq!(endpoint, "http://localhost:4318/v1/traces");
    }
}
