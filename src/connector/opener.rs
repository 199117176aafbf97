//! Physical connection opener trait

use async_trait::async_trait;

/// Classified failure of a single open attempt
#[derive(Debug)]
pub enum OpenFailure<E> {
    /// Server rejected the password; the next credential may work
    Authentication(E),
    /// Anything else; retrying with another credential will not help
    Fatal(E),
}

impl<E> OpenFailure<E> {
    /// The underlying error, untouched
    pub fn into_inner(self) -> E {
        match self {
            OpenFailure::Authentication(e) | OpenFailure::Fatal(e) => e,
        }
    }

    /// Whether another credential is worth trying
    pub fn is_authentication(&self) -> bool {
        matches!(self, OpenFailure::Authentication(_))
    }
}

/// Opens one physical connection from a connection string
///
/// The opener, not the connector, decides which failures are
/// authentication rejections.
#[async_trait]
pub trait RawConnectionOpener: Send + Sync {
    /// Connection handed back to the caller on success
    type Connection: Send;
    /// Driver error
    type Error: std::error::Error + Send + Sync + 'static;

    /// Attempt to connect with `dsn`
    async fn open(&self, dsn: &str) -> Result<Self::Connection, OpenFailure<Self::Error>>;
}

#[async_trait]
impl<O: RawConnectionOpener + ?Sized> RawConnectionOpener for std::sync::Arc<O> {
    type Connection = O::Connection;
    type Error = O::Error;

    async fn open(&self, dsn: &str) -> Result<Self::Connection, OpenFailure<Self::Error>> {
        (**self).open(dsn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_inner_returns_original() {
        let failure: OpenFailure<&str> = OpenFailure::Authentication("28P01");
        assert!(failure.is_authentication());
        assert_eq!(failure.into_inner(), "28P01");

        let failure: OpenFailure<&str> = OpenFailure::Fatal("refused");
        assert!(!failure.is_authentication());
        assert_eq!(failure.into_inner(), "refused");
    }
}
