// Telemetry: structured logging, metrics, and optional trace export

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "scheduled-post-publisher";

/// Initialize JSON logging, with OTLP trace export when an endpoint is given
///
/// `RUST_LOG` takes precedence over `log_level`.
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );
    Ok(())
}

fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    Ok(tracer_provider.tracer(SERVICE_NAME))
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the publisher's metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "scheduled_posts_published_total",
        "Scheduled posts published by this process"
    );
    describe_counter!(
        "scheduled_posts_failed_total",
        "Scheduled posts whose publish attempt failed"
    );
    describe_counter!(
        "scheduled_posts_deferred_total",
        "Publish attempts skipped or retried on a later tick"
    );
    describe_counter!(
        "scheduled_posts_reconciled_total",
        "Status revisions repaired after a lost update"
    );
    describe_histogram!(
        "scheduler_tick_duration_seconds",
        "Duration of one scheduler tick in seconds"
    );
    describe_gauge!(
        "scheduler_due_posts",
        "Posts eligible for publishing at the last tick"
    );

    tracing::info!(metrics_port, "Prometheus metrics exporter initialized");
    Ok(())
}

#[inline]
pub fn record_post_published(post_kind: u32) {
    counter!("scheduled_posts_published_total", "post_kind" => post_kind.to_string()).increment(1);
}

#[inline]
pub fn record_post_failed(reason: &'static str) {
    counter!("scheduled_posts_failed_total", "reason" => reason).increment(1);
}

#[inline]
pub fn record_post_deferred(reason: &'static str) {
    counter!("scheduled_posts_deferred_total", "reason" => reason).increment(1);
}

#[inline]
pub fn record_post_reconciled() {
    counter!("scheduled_posts_reconciled_total").increment(1);
}

#[inline]
pub fn record_tick_duration(duration_seconds: f64) {
    histogram!("scheduler_tick_duration_seconds").record(duration_seconds);
}

#[inline]
pub fn update_due_posts(count: usize) {
    gauge!("scheduler_due_posts").set(count as f64);
}
