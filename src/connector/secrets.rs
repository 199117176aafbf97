//! The rotating connector

use super::error::ConnectError;
use super::opener::{OpenFailure, RawConnectionOpener};
use super::source::CredentialSource;
use crate::driver::PgOpener;
use crate::metrics::labels;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Connects with credentials from a [`CredentialSource`], moving on to the
/// next credential whenever the server rejects a password.
///
/// Each call reads the source's retry budget once and makes at most that many
/// attempts. Only [`OpenFailure::Authentication`] leads to another attempt;
/// credential-source errors and fatal open errors end the call immediately.
///
/// Calls on one connector are serialized: an internal lock is held for the
/// whole acquisition, so credential fetches and open attempts of concurrent
/// callers never interleave. Share the connector through an `Arc` and every
/// task sees the same rotation order. The lock does not cover a source
/// shared with a second connector.
pub struct SecretsConnector<S: ?Sized, O = PgOpener> {
    lock: Mutex<()>,
    opener: Arc<O>,
    source: Arc<S>,
}

impl<S: ?Sized, O> std::fmt::Debug for SecretsConnector<S, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConnector")
            .field("opener", &std::any::type_name::<O>())
            .field("source", &std::any::type_name::<S>())
            .finish_non_exhaustive()
    }
}

impl<S: CredentialSource> SecretsConnector<S, PgOpener> {
    /// Connector using the built-in PostgreSQL opener
    pub fn new(source: S) -> Self {
        Self::with_opener(source, PgOpener::new())
    }
}

impl<S, O> SecretsConnector<S, O>
where
    S: CredentialSource + ?Sized,
    O: RawConnectionOpener,
{
    /// Connector with a custom opener
    pub fn with_opener(source: S, opener: O) -> Self
    where
        S: Sized,
    {
        Self::from_shared(Arc::new(source), Arc::new(opener))
    }

    /// Connector over collaborators that are already shared elsewhere
    pub fn from_shared(source: Arc<S>, opener: Arc<O>) -> Self {
        Self {
            lock: Mutex::new(()),
            opener,
            source,
        }
    }

    /// The opener used for every attempt
    pub fn opener(&self) -> &Arc<O> {
        &self.opener
    }

    /// The credential source
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Acquire a connection, rotating credentials on password rejection
    ///
    /// # Errors
    ///
    /// * [`ConnectError::Credentials`] if the source fails
    /// * [`ConnectError::Fatal`] on the first non-authentication failure
    /// * [`ConnectError::Authentication`] with the last rejection once the
    ///   budget is spent
    /// * [`ConnectError::NoRetryBudget`] if the budget is zero
    pub async fn connect(&self) -> Result<O::Connection, ConnectError<O::Error>> {
        self.acquire(None).await
    }

    /// Like [`connect`](Self::connect), but gives up when `token` is cancelled
    ///
    /// The token is checked while waiting for the lock and before each
    /// attempt. An attempt already under way runs to completion.
    pub async fn connect_with_cancellation(
        &self,
        token: &CancellationToken,
    ) -> Result<O::Connection, ConnectError<O::Error>> {
        self.acquire(Some(token)).await
    }

    async fn acquire(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<O::Connection, ConnectError<O::Error>> {
        let start = Instant::now();

        let _guard = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("connect cancelled while waiting for lock");
                    record_outcome(labels::OUTCOME_CANCELLED, start);
                    return Err(ConnectError::Cancelled { attempts: 0 });
                }
                guard = self.lock.lock() => guard,
            },
            None => self.lock.lock().await,
        };

        let budget = self.source.retry_budget();
        self.source.rewind();
        let result = self
            .attempt_all(budget, cancel)
            .instrument(tracing::debug_span!("connect", budget))
            .await;

        let outcome = match &result {
            Ok(_) => labels::OUTCOME_SUCCESS,
            Err(ConnectError::Authentication { .. } | ConnectError::NoRetryBudget) => {
                labels::OUTCOME_EXHAUSTED
            }
            Err(ConnectError::Fatal(_)) => labels::OUTCOME_FATAL,
            Err(ConnectError::Credentials(_)) => labels::OUTCOME_CREDENTIALS,
            Err(ConnectError::Cancelled { .. }) => labels::OUTCOME_CANCELLED,
        };
        record_outcome(outcome, start);

        result
    }

    async fn attempt_all(
        &self,
        budget: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<O::Connection, ConnectError<O::Error>> {
        if budget == 0 {
            tracing::error!("credential source has a retry budget of zero");
            return Err(ConnectError::NoRetryBudget);
        }

        let mut last_rejection = None;

        for attempt in 1..=budget {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::debug!(attempt, "connect cancelled");
                return Err(ConnectError::Cancelled {
                    attempts: attempt - 1,
                });
            }

            let dsn = match self.source.next().await {
                Ok(dsn) => dsn,
                Err(e) => {
                    tracing::error!(attempt, error = %e, "credential source failed");
                    return Err(ConnectError::Credentials(e));
                }
            };

            tracing::debug!(attempt, "opening connection");
            crate::metrics::counters::connect_attempt();

            match self.opener.open(&dsn).await {
                Ok(conn) => {
                    tracing::debug!(attempt, "connected");
                    return Ok(conn);
                }
                Err(OpenFailure::Fatal(e)) => {
                    tracing::error!(attempt, error = %e, "connection failed");
                    return Err(ConnectError::Fatal(e));
                }
                Err(OpenFailure::Authentication(e)) => {
                    if attempt < budget {
                        tracing::warn!(attempt, error = %e, "password rejected, rotating credential");
                        crate::metrics::counters::credential_rotated();
                    }
                    last_rejection = Some(e);
                }
            }
        }

        tracing::error!(attempts = budget, "every credential was rejected");
        Err(match last_rejection {
            Some(source) => ConnectError::Authentication {
                attempts: budget,
                source,
            },
            None => ConnectError::NoRetryBudget,
        })
    }
}

fn record_outcome(outcome: &'static str, start: Instant) {
    crate::metrics::counters::connect_completed(outcome);
    crate::metrics::histograms::connect_duration(outcome, start.elapsed().as_millis() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::CredentialError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct MockError(&'static str);

    struct Counting {
        budget: usize,
        calls: AtomicUsize,
        rewinds: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for Counting {
        async fn next(&self) -> Result<String, CredentialError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("dsn-{}", n + 1))
        }

        fn retry_budget(&self) -> usize {
            self.budget
        }

        fn rewind(&self) {
            self.rewinds.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Accepts only `dsn-<accept_at>`
    struct AcceptOne {
        accept: &'static str,
    }

    #[async_trait]
    impl RawConnectionOpener for AcceptOne {
        type Connection = String;
        type Error = MockError;

        async fn open(&self, dsn: &str) -> Result<String, OpenFailure<MockError>> {
            if dsn == self.accept {
                Ok(dsn.to_string())
            } else {
                Err(OpenFailure::Authentication(MockError("28P01")))
            }
        }
    }

    fn connector(budget: usize, accept: &'static str) -> SecretsConnector<Counting, AcceptOne> {
        SecretsConnector::with_opener(
            Counting {
                budget,
                calls: AtomicUsize::new(0),
                rewinds: AtomicUsize::new(0),
            },
            AcceptOne { accept },
        )
    }

    #[tokio::test]
    async fn test_rotates_until_accepted() {
        let c = connector(3, "dsn-2");
        assert_eq!(c.connect().await.unwrap(), "dsn-2");
        assert_eq!(c.source().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_source_rewound_once_per_call() {
        let c = connector(3, "dsn-2");
        c.connect().await.unwrap();
        assert!(c.connect().await.is_err());
        assert_eq!(c.source().rewinds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_budget_never_asks_source() {
        let c = connector(0, "dsn-1");
        assert!(matches!(c.connect().await, Err(ConnectError::NoRetryBudget)));
        assert_eq!(c.source().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_budget() {
        let c = connector(2, "never");
        match c.connect().await {
            Err(ConnectError::Authentication { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert_eq!(source.0, "28P01");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_attempt() {
        let c = connector(3, "dsn-1");
        let token = CancellationToken::new();
        token.cancel();

        let result = c.connect_with_cancellation(&token).await;
        assert!(matches!(result, Err(ConnectError::Cancelled { attempts: 0 })));
        assert_eq!(c.source().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_debug_names_collaborators() {
        let c = connector(1, "dsn-1");
        let debug_str = format!("{:?}", c);
        assert!(debug_str.contains("SecretsConnector"));
        assert!(debug_str.contains("AcceptOne"));
    }
}
