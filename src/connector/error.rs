//! Connector error type

use super::source::CredentialError;
use thiserror::Error;

/// Why a connect call produced no connection
///
/// Generic over the opener's error type so the driver error reaches the
/// caller unchanged.
#[derive(Debug, Error)]
pub enum ConnectError<E>
where
    E: std::error::Error + 'static,
{
    /// Credential source failed; no further attempts were made
    #[error("credential source failed: {0}")]
    Credentials(#[source] CredentialError),

    /// Every attempt within the budget was rejected; carries the last rejection
    #[error("authentication failed after {attempts} attempt(s): {source}")]
    Authentication {
        /// Attempts made (equals the budget)
        attempts: usize,
        /// Error from the final attempt
        #[source]
        source: E,
    },

    /// Non-authentication failure from the opener, returned on the spot
    #[error(transparent)]
    Fatal(E),

    /// Source reported a retry budget of zero
    #[error("credential source has no retry budget")]
    NoRetryBudget,

    /// Caller cancelled before the next attempt started
    #[error("connect cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Attempts completed before cancellation
        attempts: usize,
    },
}

impl<E> ConnectError<E>
where
    E: std::error::Error + 'static,
{
    /// The opener's error, if this failure came from the opener
    pub fn into_opener_error(self) -> Option<E> {
        match self {
            ConnectError::Authentication { source, .. } | ConnectError::Fatal(source) => {
                Some(source)
            }
            _ => None,
        }
    }

    /// Number of open attempts made, where known
    pub fn attempts(&self) -> Option<usize> {
        match self {
            ConnectError::Authentication { attempts, .. }
            | ConnectError::Cancelled { attempts } => Some(*attempts),
            ConnectError::NoRetryBudget => Some(0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_authentication_display_includes_attempts() {
        let err: ConnectError<io::Error> = ConnectError::Authentication {
            attempts: 3,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "password rejected"),
        };
        assert_eq!(
            err.to_string(),
            "authentication failed after 3 attempt(s): password rejected"
        );
        assert_eq!(err.attempts(), Some(3));
    }

    #[test]
    fn test_fatal_is_transparent() {
        let err: ConnectError<io::Error> =
            ConnectError::Fatal(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(err.to_string(), "refused");
        assert_eq!(
            err.into_opener_error().map(|e| e.kind()),
            Some(io::ErrorKind::ConnectionRefused)
        );
    }

    #[test]
    fn test_non_opener_errors_have_no_opener_error() {
        let err: ConnectError<io::Error> = ConnectError::Credentials(CredentialError::Empty);
        assert!(err.into_opener_error().is_none());
        let err: ConnectError<io::Error> = ConnectError::NoRetryBudget;
        assert!(err.into_opener_error().is_none());
    }
}
