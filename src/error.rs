//! Driver error types

use crate::protocol::constants::sqlstate;
use crate::protocol::ErrorFields;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias for driver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while opening a physical Postgres connection
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level failure (refused, unreachable, DNS, reset)
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    /// Invalid connection string or client configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Client-side authentication failure (missing password, unsupported
    /// mechanism, SCRAM verification)
    #[error("authentication error: {0}")]
    Authentication(String),

    /// `ErrorResponse` reported by the server
    #[error("server error: {0}")]
    Server(ErrorFields),

    /// Unexpected or malformed protocol traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Illegal connection state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state description
        expected: String,
        /// Actual state description
        actual: String,
    },

    /// Server closed the socket mid-exchange
    #[error("connection closed by server")]
    ConnectionClosed,

    /// `connect_timeout` elapsed before startup completed
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// SQLSTATE code carried by a server error, if any
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.sqlstate(),
            _ => None,
        }
    }

    /// Whether the server rejected the supplied password (`28P01`)
    pub fn is_invalid_password(&self) -> bool {
        self.sqlstate() == Some(sqlstate::INVALID_PASSWORD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(code: &str) -> Error {
        Error::Server(ErrorFields {
            severity: Some("FATAL".into()),
            code: Some(code.into()),
            message: Some("password authentication failed for user \"postgres\"".into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_invalid_password_detected() {
        let err = server_error("28P01");
        assert_eq!(err.sqlstate(), Some("28P01"));
        assert!(err.is_invalid_password());
    }

    #[test]
    fn test_other_sqlstate_not_invalid_password() {
        for code in [
            sqlstate::INVALID_AUTHORIZATION_SPECIFICATION,
            sqlstate::INVALID_CATALOG_NAME,
            sqlstate::TOO_MANY_CONNECTIONS,
        ] {
            assert!(!server_error(code).is_invalid_password());
        }
    }

    #[test]
    fn test_non_server_errors_have_no_sqlstate() {
        let err = Error::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(err.sqlstate(), None);
        assert!(!err.is_invalid_password());
        assert!(!Error::Authentication("password required".into()).is_invalid_password());
    }

    #[test]
    fn test_server_error_display() {
        let err = server_error("28P01");
        assert_eq!(
            err.to_string(),
            "server error: FATAL: password authentication failed for user \"postgres\" (28P01)"
        );
    }
}
