//! Credential source trait and its error type

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while producing a connection string
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Environment variable not set or not valid Unicode
    #[error("environment variable {name} is not set")]
    MissingVar {
        /// Variable name
        name: String,
    },

    /// Secret store returned no versions for the secret
    #[error("secret {name} has no versions")]
    NoVersions {
        /// Secret identifier
        name: String,
    },

    /// Secret store call failed
    #[error("secret store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Secret payload was not the expected JSON
    #[error("failed to decode secret: {0}")]
    Decode(#[from] serde_json::Error),

    /// Credential material could not be turned into a connection string
    #[error("invalid connection string: {0}")]
    InvalidDsn(String),

    /// Source has nothing to hand out
    #[error("credential source is empty")]
    Empty,
}

impl CredentialError {
    /// Wrap an arbitrary secret store error
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CredentialError::Store(Box::new(err))
    }
}

/// Supplies connection strings and the per-call attempt budget
///
/// Each call to [`next`](CredentialSource::next) returns the string for one
/// attempt. A source may rotate (a different credential each time) or
/// repeat (the same string, useful when an external agent refreshes the
/// underlying secret). Implementations keep their own cursor behind
/// interior mutability and must be safe to share between tasks.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Connection string for the next attempt
    async fn next(&self) -> Result<String, CredentialError>;

    /// Maximum number of attempts per connect call
    ///
    /// Read once at the start of each call.
    fn retry_budget(&self) -> usize;

    /// Called once at the start of each connect call, before the first
    /// [`next`](CredentialSource::next)
    ///
    /// Sources whose order carries meaning (newest secret first) reset their
    /// cursor here. The default keeps the cursor where the last call left it.
    fn rewind(&self) {}
}

#[async_trait]
impl<S: CredentialSource + ?Sized> CredentialSource for std::sync::Arc<S> {
    async fn next(&self) -> Result<String, CredentialError> {
        (**self).next().await
    }

    fn retry_budget(&self) -> usize {
        (**self).retry_budget()
    }

    fn rewind(&self) {
        (**self).rewind()
    }
}

#[async_trait]
impl<S: CredentialSource + ?Sized> CredentialSource for Box<S> {
    async fn next(&self) -> Result<String, CredentialError> {
        (**self).next().await
    }

    fn retry_budget(&self) -> usize {
        (**self).retry_budget()
    }

    fn rewind(&self) {
        (**self).rewind()
    }
}
