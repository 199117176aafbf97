//! Counter metrics

use super::labels;
use metrics::counter;

/// Server requested a password exchange
pub fn auth_attempted(mechanism: &'static str) {
    counter!(
        "pg_secrets_connector_auth_attempted_total",
        labels::MECHANISM => mechanism
    )
    .increment(1);
}

/// Server sent `AuthenticationOk`
pub fn auth_successful(mechanism: &'static str) {
    counter!(
        "pg_secrets_connector_auth_successful_total",
        labels::MECHANISM => mechanism
    )
    .increment(1);
}

/// Exchange ended in an error
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    counter!(
        "pg_secrets_connector_auth_failed_total",
        labels::MECHANISM => mechanism,
        labels::REASON => reason
    )
    .increment(1);
}

/// One physical connection attempt made by the connector
pub fn connect_attempt() {
    counter!("pg_secrets_connector_connect_attempts_total").increment(1);
}

/// A rejected password caused the connector to move to the next credential
pub fn credential_rotated() {
    counter!("pg_secrets_connector_credential_rotations_total").increment(1);
}

/// A `connect` call finished
pub fn connect_completed(outcome: &'static str) {
    counter!(
        "pg_secrets_connector_connects_total",
        labels::OUTCOME => outcome
    )
    .increment(1);
}
