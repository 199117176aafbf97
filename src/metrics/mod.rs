//! Metrics emitted through the `metrics` facade
//!
//! Nothing is recorded unless the application installs a recorder
//! (Prometheus exporter, statsd, ...). Names are prefixed with
//! `pg_secrets_connector_`.

pub(crate) mod counters;
pub(crate) mod histograms;
pub(crate) mod labels;
