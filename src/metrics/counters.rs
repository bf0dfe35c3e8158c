//! Counter metrics

use super::labels;

/// Operations by operation and outcome
pub const OPERATIONS_TOTAL: &str = "mongo_user_admin_operations_total";

/// Authentication attempts by mechanism
pub const AUTH_ATTEMPTS_TOTAL: &str = "mongo_user_admin_auth_attempts_total";

/// Successful authentications by mechanism
pub const AUTH_SUCCESSES_TOTAL: &str = "mongo_user_admin_auth_successes_total";

/// Failed authentications by mechanism and reason
pub const AUTH_FAILURES_TOTAL: &str = "mongo_user_admin_auth_failures_total";

/// Session opens that failed by reason
pub const CONNECT_FAILURES_TOTAL: &str = "mongo_user_admin_connect_failures_total";

/// Trust bundle loads that fell back to a reduced trust set
pub const TRUST_BUNDLE_FAILURES_TOTAL: &str = "mongo_user_admin_trust_bundle_failures_total";

/// Record a finished lifecycle operation
pub fn operation_completed(operation: &'static str, outcome: &'static str) {
    metrics::counter!(
        OPERATIONS_TOTAL,
        labels::OPERATION => operation,
        labels::OUTCOME => outcome
    )
    .increment(1);
}

/// Record an authentication attempt
pub fn auth_attempted(mechanism: &'static str) {
    metrics::counter!(AUTH_ATTEMPTS_TOTAL, labels::MECHANISM => mechanism).increment(1);
}

/// Record a successful authentication
pub fn auth_successful(mechanism: &'static str) {
    metrics::counter!(AUTH_SUCCESSES_TOTAL, labels::MECHANISM => mechanism).increment(1);
}

/// Record a failed authentication
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    metrics::counter!(
        AUTH_FAILURES_TOTAL,
        labels::MECHANISM => mechanism,
        labels::REASON => reason
    )
    .increment(1);
}

/// Record a session open that failed
pub fn connect_failed(reason: &'static str) {
    metrics::counter!(CONNECT_FAILURES_TOTAL, labels::REASON => reason).increment(1);
}

/// Record a trust bundle that could not be fully loaded
pub fn trust_bundle_failed() {
    metrics::counter!(TRUST_BUNDLE_FAILURES_TOTAL).increment(1);
}
