//! Prometheus metrics HTTP endpoint.
//!
//! Uses the built-in HTTP listener of `metrics-exporter-prometheus`.
//! Until a recorder is installed every `metrics::counter!()` call in the
//! engines is a no-op, so the engines never depend on this module.

use std::net::SocketAddr;

use anyhow::{Result, anyhow};
use irongate_core::config::MetricsConfig;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Resolve the listen address from `[metrics]`.
///
/// # Errors
///
/// - endpoint other than `/metrics`
/// - unparsable `listen_addr:port`
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is supported",
            config.endpoint
        ));
    }
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow!("invalid metrics listen address: {e}"))
}

/// Install the global recorder, start the HTTP listener and register
/// metric descriptions.
///
/// Call once per process.
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow!("failed to install metrics recorder: {e}"))?;

    irongate_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "prometheus metrics endpoint active");
    Ok(())
}
