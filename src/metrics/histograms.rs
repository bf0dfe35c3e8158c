//! Histogram metrics (all durations in milliseconds)

use super::labels;

/// End-to-end lifecycle operation duration
pub const OPERATION_DURATION_MS: &str = "mongo_user_admin_operation_duration_ms";

/// Time to open an authenticated session
pub const SESSION_OPEN_DURATION_MS: &str = "mongo_user_admin_session_open_duration_ms";

/// SASL conversation duration
pub const AUTH_DURATION_MS: &str = "mongo_user_admin_auth_duration_ms";

/// Record how long a lifecycle operation took
pub fn operation_duration(operation: &'static str, duration_ms: u64) {
    metrics::histogram!(OPERATION_DURATION_MS, labels::OPERATION => operation)
        .record(duration_ms as f64);
}

/// Record how long opening a session took
pub fn session_open_duration(duration_ms: u64) {
    metrics::histogram!(SESSION_OPEN_DURATION_MS).record(duration_ms as f64);
}

/// Record how long authentication took
pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
    metrics::histogram!(AUTH_DURATION_MS, labels::MECHANISM => mechanism)
        .record(duration_ms as f64);
}
