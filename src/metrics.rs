use crate::config::MetricsConfig;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Install the Prometheus exporter when enabled; counters recorded before or
/// without it are no-ops.
pub fn init_metrics(config: &MetricsConfig) {
    if !config.enabled {
        return;
    }
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!("Prometheus exporter install failed (possibly already installed): {}", e),
    }
}
