use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::protocol::Request;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: protocol requests handled. Labels: command, status.
pub const REQUESTS_TOTAL: &str = "appointd_requests_total";

/// Histogram: request latency in seconds. Labels: command.
pub const REQUEST_DURATION_SECONDS: &str = "appointd_request_duration_seconds";

/// Counter: creates rejected for overlapping an active appointment.
pub const CONFLICTS_TOTAL: &str = "appointd_conflicts_total";

/// Counter: creates answered from the idempotency cache.
pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "appointd_idempotent_replays_total";

// ── Store and resource metrics ──────────────────────────────────

/// Gauge: appointments currently held.
pub const APPOINTMENTS: &str = "appointd_appointments";

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "appointd_connections_active";

/// Counter: connections turned away at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "appointd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "appointd_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "appointd_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `None`.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a request, used on request metrics.
pub fn command_label(request: &Request) -> &'static str {
    match request {
        Request::List { .. } => "list",
        Request::Get { .. } => "get",
        Request::Create { .. } => "create",
        Request::UpdateStatus { .. } => "update_status",
        Request::Delete { .. } => "delete",
        Request::Subscribe { .. } => "subscribe",
    }
}
