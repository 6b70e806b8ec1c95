//! Internal Prometheus instrumentation of the nozzle's own operation.
//!
//! This is ambient observability, not an externally specified REST surface
//! (the REST routes are the fixed origin-mapped table in `server.rs`) — the
//! counters here exist so the process can be monitored the way the teacher
//! instruments its own request pipeline (`ccr_requests_total` and friends),
//! just scoped to firehose/cache/token events instead of proxy requests.

use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge};

lazy_static! {
    static ref ENVELOPES_INGESTED_TOTAL: CounterVec = register_counter_vec!(
        "nozzle_envelopes_ingested_total",
        "Total envelopes folded into the cache, by origin and metric kind",
        &["origin", "kind"]
    )
    .unwrap();

    static ref UNKNOWN_ENVELOPES_TOTAL: CounterVec = register_counter_vec!(
        "nozzle_unknown_envelopes_total",
        "Total envelopes dropped for having an unrecognized event type, by origin",
        &["origin"]
    )
    .unwrap();

    static ref CACHE_FLUSHES_TOTAL: Counter = register_counter!(
        "nozzle_cache_flushes_total",
        "Total number of MetricCache.Clear() flush-window rotations"
    )
    .unwrap();

    static ref TOKENS_ISSUED_TOTAL: Counter = register_counter!(
        "nozzle_tokens_issued_total",
        "Total session tokens issued via GET /token"
    )
    .unwrap();

    static ref TOKENS_EVICTED_TOTAL: Counter = register_counter!(
        "nozzle_tokens_evicted_total",
        "Total session tokens evicted for idling past the timeout"
    )
    .unwrap();

    static ref UPSTREAM_DISCONNECTS_TOTAL: CounterVec = register_counter_vec!(
        "nozzle_upstream_disconnects_total",
        "Total firehose disconnects, by classified reason",
        &["reason"]
    )
    .unwrap();

    static ref ACTIVE_TOKENS: Gauge = register_gauge!(
        "nozzle_active_tokens",
        "Current number of live session tokens"
    )
    .unwrap();
}

pub fn record_envelope_ingested(origin: &str, kind: &str) {
    ENVELOPES_INGESTED_TOTAL
        .with_label_values(&[origin, kind])
        .inc();
}

pub fn record_unknown_envelope(origin: &str) {
    UNKNOWN_ENVELOPES_TOTAL.with_label_values(&[origin]).inc();
}

pub fn record_cache_flush() {
    CACHE_FLUSHES_TOTAL.inc();
}

pub fn record_token_issued() {
    TOKENS_ISSUED_TOTAL.inc();
    ACTIVE_TOKENS.inc();
}

pub fn record_token_evicted() {
    TOKENS_EVICTED_TOTAL.inc();
    ACTIVE_TOKENS.dec();
}

/// Classify and record an upstream disconnect. `reason` is one of
/// `"normal_closure"`, `"policy_violation"`, `"other_close_code"`, or
/// `"non_websocket"`, matching the branches in the disconnect handler.
pub fn record_upstream_disconnect(reason: &str) {
    UPSTREAM_DISCONNECTS_TOTAL.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_without_panicking() {
        record_envelope_ingested("gorouter", "value");
        record_unknown_envelope("gorouter");
        record_cache_flush();
        record_token_issued();
        record_token_evicted();
        record_upstream_disconnect("policy_violation");
    }
}
