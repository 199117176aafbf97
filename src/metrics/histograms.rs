//! Histogram metrics

use super::labels;
use metrics::histogram;

/// Time from startup message to `AuthenticationOk`
pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
    histogram!(
        "pg_secrets_connector_auth_duration_ms",
        labels::MECHANISM => mechanism
    )
    .record(duration_ms as f64);
}

/// Wall time of a whole `connect` call, retries included
pub fn connect_duration(outcome: &'static str, duration_ms: u64) {
    histogram!(
        "pg_secrets_connector_connect_duration_ms",
        labels::OUTCOME => outcome
    )
    .record(duration_ms as f64);
}
