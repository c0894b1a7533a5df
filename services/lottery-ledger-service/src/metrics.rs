// =============================================================================
// METRICS MODULE
// =============================================================================
// Prometheus metrics for the ledger service.
//
// NOTES:
// - Prometheus scrapes GET /metrics
// - Counters only go up (scans, resets, conflicts)
// - Gauges go up and down (tickets left in a pack)
// - Histograms bucket latencies (HTTP, Postgres, Redis)
// =============================================================================

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::models::TicketPack;

// =============================================================================
// METRIC NAMES
// =============================================================================

/// Labels: method, endpoint, status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Labels: entity (box/pack), command (scan/manual_entry), outcome (accepted/<error code>)
pub const LEDGER_SCANS_TOTAL: &str = "ledger_scans_total";

/// Labels: entity (box/pack), trigger (explicit/rollover/batch)
pub const LEDGER_DAILY_RESETS_TOTAL: &str = "ledger_daily_resets_total";

/// Labels: entity
pub const LEDGER_CONCURRENCY_CONFLICTS_TOTAL: &str = "ledger_concurrency_conflicts_total";

/// Labels: pack, store, game
pub const TICKET_PACK_REMAINING: &str = "ticket_pack_remaining_tickets";

/// Labels: operation (select/insert/update)
pub const DB_QUERY_DURATION_SECONDS: &str = "db_query_duration_seconds";

/// Labels: operation (publish/ping)
pub const REDIS_OPERATION_DURATION_SECONDS: &str = "redis_operation_duration_seconds";

// =============================================================================
// SETUP
// =============================================================================

/// Histogram buckets shared by every latency metric (1ms .. 10s)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

fn builder() -> Result<PrometheusBuilder> {
    Ok(PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(DB_QUERY_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(REDIS_OPERATION_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?)
}

/// Install the global Prometheus recorder and return its render handle.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    let handle = builder()?.install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_counter!(LEDGER_SCANS_TOTAL, "Scan and manual-entry commands by outcome");
    describe_counter!(LEDGER_DAILY_RESETS_TOTAL, "Daily resets applied to boxes and packs");
    describe_counter!(
        LEDGER_CONCURRENCY_CONFLICTS_TOTAL,
        "Optimistic update conflicts (each retry counts once)"
    );
    describe_gauge!(TICKET_PACK_REMAINING, "Tickets left in each active pack");
    describe_histogram!(DB_QUERY_DURATION_SECONDS, "Database query latency in seconds");
    describe_histogram!(REDIS_OPERATION_DURATION_SECONDS, "Redis operation latency in seconds");

    Ok(handle)
}

/// A handle that is not installed globally, for router tests.
#[cfg(test)]
pub fn detached_handle() -> Result<PrometheusHandle> {
    Ok(builder()?.build_recorder().handle())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

/// Record a scan / manual entry attempt and how it ended
pub fn record_scan(entity: &'static str, command: &'static str, outcome: &'static str) {
    counter!(
        LEDGER_SCANS_TOTAL,
        "entity" => entity,
        "command" => command,
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_daily_reset(entity: &'static str, trigger: &'static str, count: u64) {
    if count == 0 {
        return;
    }
    counter!(
        LEDGER_DAILY_RESETS_TOTAL,
        "entity" => entity,
        "trigger" => trigger
    )
    .increment(count);
}

pub fn record_concurrency_conflict(entity: &'static str) {
    counter!(LEDGER_CONCURRENCY_CONFLICTS_TOTAL, "entity" => entity).increment(1);
}

/// One series per pack
pub fn set_pack_remaining(pack: &TicketPack) {
    gauge!(
        TICKET_PACK_REMAINING,
        "pack" => pack.id.to_string(),
        "store" => pack.store_id.clone(),
        "game" => pack.game_number.clone()
    )
    .set(f64::from(pack.remaining_tickets));
}

pub fn record_db_query(operation: &str, duration_secs: f64) {
    histogram!(
        DB_QUERY_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

pub fn record_redis_operation(operation: &str, duration_secs: f64) {
    histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}
