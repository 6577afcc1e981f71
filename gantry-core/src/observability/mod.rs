//! Observability infrastructure: tracing and metrics.
//!
//! Call [`init`] once at process startup, before any other operation.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Default port for the Prometheus scrape endpoint.
const METRICS_PORT: u16 = 9184;

/// Initialize the global observability infrastructure.
///
/// # Panics
/// Panics if called more than once.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .init();

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], METRICS_PORT))
        .install()?;

    metrics::register_core_metrics();

    tracing::info!("Observability initialized (metrics on :{})", METRICS_PORT);
    Ok(())
}
