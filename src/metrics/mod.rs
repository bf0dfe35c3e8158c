//! Metrics emitted by the administration client
//!
//! Everything goes through the `metrics` facade; nothing is recorded unless the
//! host application installs a recorder (Prometheus exporter, statsd, ...).
//!
//! * Counters: operations, authentication attempts, connect and trust failures
//! * Histograms: operation and session-open latency in milliseconds

pub mod counters;
pub mod histograms;
pub mod labels;

/// Register descriptions for every metric with the installed recorder.
///
/// Optional; call once after installing a recorder to get help text in exporters.
pub fn describe() {
    metrics::describe_counter!(
        counters::OPERATIONS_TOTAL,
        "User administration operations by operation and outcome"
    );
    metrics::describe_counter!(
        counters::AUTH_ATTEMPTS_TOTAL,
        "Administrative SASL authentication attempts"
    );
    metrics::describe_counter!(
        counters::AUTH_SUCCESSES_TOTAL,
        "Administrative SASL authentications that succeeded"
    );
    metrics::describe_counter!(
        counters::AUTH_FAILURES_TOTAL,
        "Administrative SASL authentications that failed"
    );
    metrics::describe_counter!(
        counters::CONNECT_FAILURES_TOTAL,
        "Session opens that found no usable server"
    );
    metrics::describe_counter!(
        counters::TRUST_BUNDLE_FAILURES_TOTAL,
        "Trust bundle loads that produced a reduced trust set"
    );
    metrics::describe_histogram!(
        histograms::OPERATION_DURATION_MS,
        metrics::Unit::Milliseconds,
        "End-to-end duration of user administration operations"
    );
    metrics::describe_histogram!(
        histograms::SESSION_OPEN_DURATION_MS,
        metrics::Unit::Milliseconds,
        "Time to dial, handshake and authenticate an administrative session"
    );
    metrics::describe_histogram!(
        histograms::AUTH_DURATION_MS,
        metrics::Unit::Milliseconds,
        "Duration of the SASL conversation"
    );
}
