// metrics/mod.rs
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

pub const CONVERSATIONS: &str = "triones_conversations_total";
pub const CONNECT_FAILURES: &str = "triones_connect_failures_total";
pub const WRITE_FAILURES: &str = "triones_write_failures_total";
pub const STATUS_PUBLISHED: &str = "triones_status_published_total";
pub const REQUESTS_DROPPED: &str = "triones_requests_dropped_total";
pub const MALFORMED_REQUESTS: &str = "triones_malformed_requests_total";
pub const QUEUE_DEPTH: &str = "triones_queue_depth";

/// Serves Prometheus metrics on `0.0.0.0:port`. Needs a running tokio runtime.
pub fn setup_metrics(port: u16) -> Result<(), BuildError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    Ok(())
}

fn describe() {
    ::metrics::describe_counter!(CONVERSATIONS, "Finished conversation turns by outcome");
    ::metrics::describe_counter!(CONNECT_FAILURES, "Failed device connection attempts");
    ::metrics::describe_counter!(WRITE_FAILURES, "Failed frame writes");
    ::metrics::describe_counter!(STATUS_PUBLISHED, "Status reports decoded and published");
    ::metrics::describe_counter!(REQUESTS_DROPPED, "Requests abandoned after exhausting their attempts");
    ::metrics::describe_counter!(MALFORMED_REQUESTS, "Inbound payloads that could not be parsed");
    ::metrics::describe_gauge!(QUEUE_DEPTH, "Devices with pending work");
}
