//! Physical connection establishment for PostgreSQL

use super::dsn::{ConnectionInfo, TransportType};
use crate::connection::{Connection, ConnectionConfig, SslMode, TlsConfig, Transport};
use crate::connector::{OpenFailure, RawConnectionOpener};
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::Instrument;

/// Opens and authenticates PostgreSQL connections from connection strings
///
/// Settings given here are defaults: a value present in the connection
/// string always wins.
///
/// # Examples
///
/// ```ignore
/// let opener = PgOpener::builder()
///     .connect_timeout(Duration::from_secs(5))
///     .application_name("billing")
///     .build();
/// let conn = opener.open_dsn("postgres://app:pw@db.internal/billing").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PgOpener {
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    application_name: Option<String>,
    tls: Option<TlsConfig>,
}

impl PgOpener {
    /// Opener with no defaults beyond the connection string's own
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for default settings
    pub fn builder() -> PgOpenerBuilder {
        PgOpenerBuilder::default()
    }

    /// Parse `dsn`, connect, and run startup and authentication
    ///
    /// # Errors
    ///
    /// `Error::Config` for a malformed string, `Error::Io` for network
    /// failures, `Error::Server` when the server refuses the session and
    /// `Error::Timeout` when `connect_timeout` elapses.
    pub async fn open_dsn(&self, dsn: &str) -> Result<Connection> {
        let info = ConnectionInfo::parse(dsn)?;
        let config = self.resolve_config(&info);
        let tls = self.resolve_tls(&info)?;

        let span = tracing::debug_span!(
            "open",
            host = info.host.as_deref().unwrap_or("unix"),
            port = info.port,
            user = %info.user,
            database = %info.database,
            sslmode = %info.sslmode,
        );

        let establish = establish(&info, &config, tls.as_ref());
        match config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, establish)
                .instrument(span)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => establish.instrument(span).await,
        }
    }

    fn resolve_config(&self, info: &ConnectionInfo) -> ConnectionConfig {
        let mut config = info.to_config();
        if config.connect_timeout.is_none() {
            config.connect_timeout = self.connect_timeout;
        }
        if config.statement_timeout.is_none() {
            config.statement_timeout = self.statement_timeout;
        }
        if config.application_name.is_none() {
            config.application_name = self.application_name.clone();
        }
        config
    }

    fn resolve_tls(&self, info: &ConnectionInfo) -> Result<Option<TlsConfig>> {
        if info.sslmode == SslMode::Disable {
            return Ok(None);
        }
        match &self.tls {
            Some(tls) if !info.has_tls_files() => Ok(Some(tls.clone())),
            _ => info.to_tls_config(),
        }
    }
}

async fn establish(
    info: &ConnectionInfo,
    config: &ConnectionConfig,
    tls: Option<&TlsConfig>,
) -> Result<Connection> {
    let transport = match (info.transport, &info.host, &info.unix_socket) {
        (TransportType::Tcp, Some(host), _) => Transport::connect_tcp(host, info.port).await?,
        (TransportType::Unix, _, Some(path)) => Transport::connect_unix(path).await?,
        _ => return Err(Error::Config("connection string has no usable host".into())),
    };

    let mut conn = Connection::new(transport);
    conn.startup(config, tls, info.host.as_deref()).await?;
    Ok(conn)
}

#[async_trait]
impl RawConnectionOpener for PgOpener {
    type Connection = Connection;
    type Error = Error;

    async fn open(&self, dsn: &str) -> std::result::Result<Connection, OpenFailure<Error>> {
        self.open_dsn(dsn).await.map_err(OpenFailure::from)
    }
}

/// Only an explicit `invalid_password` from the server is worth another
/// credential; refused sockets, TLS problems, unknown roles, missing
/// databases and client-side auth errors are all fatal.
impl From<Error> for OpenFailure<Error> {
    fn from(err: Error) -> Self {
        if err.is_invalid_password() {
            OpenFailure::Authentication(err)
        } else {
            OpenFailure::Fatal(err)
        }
    }
}

/// Builder for [`PgOpener`]
#[derive(Debug, Clone, Default)]
pub struct PgOpenerBuilder {
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    application_name: Option<String>,
    tls: Option<TlsConfig>,
}

impl PgOpenerBuilder {
    /// Limit on connect plus startup when the string sets none
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Session `statement_timeout`
    pub fn statement_timeout(mut self, duration: Duration) -> Self {
        self.statement_timeout = Some(duration);
        self
    }

    /// `application_name` when the string sets none
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// TLS settings used when `sslmode` asks for TLS and the string names
    /// no certificate files
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Build the opener
    pub fn build(self) -> PgOpener {
        PgOpener {
            connect_timeout: self.connect_timeout,
            statement_timeout: self.statement_timeout,
            application_name: self.application_name,
            tls: self.tls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::sqlstate;
    use crate::protocol::ErrorFields;

    fn server_error(code: &str) -> Error {
        Error::Server(ErrorFields {
            severity: Some("FATAL".into()),
            code: Some(code.into()),
            message: Some("rejected".into()),
            ..Default::default()
        })
    }

    #[test]
    fn test_classify_invalid_password_as_authentication() {
        assert!(matches!(
            OpenFailure::from(server_error(sqlstate::INVALID_PASSWORD)),
            OpenFailure::Authentication(_)
        ));
    }

    #[test]
    fn test_classify_everything_else_as_fatal() {
        for err in [
            server_error(sqlstate::INVALID_AUTHORIZATION_SPECIFICATION),
            server_error(sqlstate::INVALID_CATALOG_NAME),
            server_error(sqlstate::TOO_MANY_CONNECTIONS),
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )),
            Error::Authentication("password required".into()),
            Error::Timeout(Duration::from_secs(1)),
            Error::Config("bad".into()),
        ] {
            assert!(matches!(OpenFailure::from(err), OpenFailure::Fatal(_)));
        }
    }

    #[test]
    fn test_builder_defaults_yield_to_connection_string() {
        let opener = PgOpener::builder()
            .connect_timeout(Duration::from_secs(30))
            .statement_timeout(Duration::from_secs(5))
            .application_name("default-app")
            .build();

        let info = ConnectionInfo::parse(
            "postgres://localhost/db?connect_timeout=2&application_name=from-dsn",
        )
        .unwrap();
        let config = opener.resolve_config(&info);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.application_name.as_deref(), Some("from-dsn"));
        assert_eq!(config.statement_timeout, Some(Duration::from_secs(5)));

        let info = ConnectionInfo::parse("postgres://localhost/db").unwrap();
        let config = opener.resolve_config(&info);
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.application_name.as_deref(), Some("default-app"));
    }

    #[test]
    fn test_tls_resolution() {
        let explicit = TlsConfig::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let opener = PgOpener::builder().tls(explicit).build();

        let info = ConnectionInfo::parse("postgres://localhost/db").unwrap();
        assert!(opener.resolve_tls(&info).unwrap().is_none());

        let info = ConnectionInfo::parse("postgres://localhost/db?sslmode=verify-full").unwrap();
        let tls = opener.resolve_tls(&info).unwrap().unwrap();
        assert!(tls.danger_accept_invalid_certs());
    }

    #[tokio::test]
    async fn test_open_malformed_dsn_is_fatal() {
        let result = PgOpener::new().open("invalid://connection/string").await;
        assert!(matches!(result, Err(OpenFailure::Fatal(Error::Config(_)))));
    }
}
