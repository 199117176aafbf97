//! Core connection type

use super::state::ConnectionState;
use super::tls::{SslMode, TlsConfig};
use super::transport::Transport;
use crate::auth::{ChannelBinding, ScramClient};
use crate::protocol::constants::PROTOCOL_VERSION;
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, FrontendMessage,
};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Connection configuration
///
/// Startup parameters and credentials for a single physical connection.
/// Use `ConnectionConfig::builder()` to set timeouts and TLS mode.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password (optional)
    pub password: Option<String>,
    /// Additional startup parameters sent verbatim to the server
    pub params: HashMap<String, String>,
    /// Limit on transport connect plus startup (default: none)
    pub connect_timeout: Option<Duration>,
    /// Server-side `statement_timeout` applied to the session
    pub statement_timeout: Option<Duration>,
    /// Application name for Postgres logs
    pub application_name: Option<String>,
    /// SSL/TLS mode
    pub sslmode: SslMode,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("params", &self.params)
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .field("application_name", &self.application_name)
            .field("sslmode", &self.sslmode)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create new configuration with defaults
    ///
    /// No password, no timeouts, no application name, `sslmode=disable`.
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self::builder(database, user).build()
    }

    /// Create a builder for advanced configuration
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = ConnectionConfig::builder("mydb", "user")
    ///     .connect_timeout(Duration::from_secs(10))
    ///     .statement_timeout(Duration::from_secs(30))
    ///     .build();
    /// ```
    pub fn builder(
        database: impl Into<String>,
        user: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            database: database.into(),
            user: user.into(),
            password: None,
            params: HashMap::new(),
            connect_timeout: None,
            statement_timeout: None,
            application_name: None,
            sslmode: SslMode::default(),
        }
    }

    /// Set password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add connection parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("user".to_string(), self.user.clone()),
            ("database".to_string(), self.database.clone()),
        ];

        if let Some(app_name) = &self.application_name {
            params.push(("application_name".to_string(), app_name.clone()));
        }

        // Postgres reads a bare number as milliseconds
        if let Some(timeout) = self.statement_timeout {
            params.push((
                "statement_timeout".to_string(),
                timeout.as_millis().to_string(),
            ));
        }

        let mut extra: Vec<_> = self.params.iter().collect();
        extra.sort();
        for (k, v) in extra {
            params.push((k.clone(), v.clone()));
        }

        params
    }
}

/// Builder for creating `ConnectionConfig` with advanced options
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    database: String,
    user: String,
    password: Option<String>,
    params: HashMap<String, String>,
    connect_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    application_name: Option<String>,
    sslmode: SslMode,
}

impl ConnectionConfigBuilder {
    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a connection parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the limit on connecting and completing startup
    ///
    /// Default: None (no timeout)
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Set statement (query) timeout for the session
    ///
    /// Default: None (server default)
    pub fn statement_timeout(mut self, duration: Duration) -> Self {
        self.statement_timeout = Some(duration);
        self
    }

    /// Set application name for Postgres logs
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Set SSL/TLS mode
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.sslmode = mode;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ConnectionConfig {
        ConnectionConfig {
            database: self.database,
            user: self.user,
            password: self.password,
            params: self.params,
            connect_timeout: self.connect_timeout,
            statement_timeout: self.statement_timeout,
            application_name: self.application_name,
            sslmode: self.sslmode,
        }
    }
}

/// An authenticated Postgres session
///
/// Produced by a successful startup. Dropping it closes the socket without
/// the polite `Terminate`; call [`Connection::close`] for a clean shutdown.
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    process_id: Option<i32>,
    secret_key: Option<i32>,
    parameters: HashMap<String, String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("process_id", &self.process_id)
            .field("tls", &self.is_tls())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            process_id: None,
            secret_key: None,
            parameters: HashMap::new(),
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Backend process ID reported in `BackendKeyData`
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// Secret key for cancel requests reported in `BackendKeyData`
    pub fn secret_key(&self) -> Option<i32> {
        self.secret_key
    }

    /// Server parameter reported during startup (`server_version`,
    /// `TimeZone`, ...)
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Whether the session runs over TLS
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Negotiate TLS upgrade with the server via the SSLRequest protocol.
    ///
    /// Sends the 8-byte SSLRequest message and reads the server's single-byte response.
    /// If the server responds with `S`, the transport is upgraded to TLS.
    async fn negotiate_tls(
        &mut self,
        tls_config: &TlsConfig,
        hostname: &str,
        sslmode: SslMode,
    ) -> Result<()> {
        self.state.transition(ConnectionState::NegotiatingTls)?;

        self.send_message(&FrontendMessage::SslRequest).await?;

        // Single-byte response: S = proceed with TLS, N = reject
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        let n = transport.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        let response = self.read_buf[0];
        self.read_buf.advance(1);

        // Bytes ahead of the handshake could be injected by a MITM
        if !self.read_buf.is_empty() {
            return Err(Error::Protocol(
                "unexpected data after SSLRequest response".into(),
            ));
        }

        match response {
            b'S' => {
                tracing::debug!("server accepted TLS, upgrading connection");
                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                self.transport = Some(transport.upgrade_to_tls(tls_config, hostname).await?);
                tracing::debug!("TLS connection established");
                Ok(())
            }
            b'N' => {
                tracing::debug!("server rejected TLS");
                Err(Error::Config(format!(
                    "server does not support TLS (sslmode={})",
                    sslmode
                )))
            }
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Perform startup and authentication
    ///
    /// `tls_config` and `hostname` are required unless `sslmode=disable`.
    /// A server `ErrorResponse` surfaces as [`Error::Server`] with its SQLSTATE.
    pub async fn startup(
        &mut self,
        config: &ConnectionConfig,
        tls_config: Option<&TlsConfig>,
        hostname: Option<&str>,
    ) -> Result<()> {
        async {
            if config.sslmode != SslMode::Disable {
                let tls = tls_config.ok_or_else(|| {
                    Error::Config(format!(
                        "sslmode={} requires TlsConfig but none was provided",
                        config.sslmode
                    ))
                })?;
                let host = hostname
                    .ok_or_else(|| Error::Config("TLS negotiation requires a hostname".into()))?;
                self.negotiate_tls(tls, host, config.sslmode).await?;
            }

            self.state.transition(ConnectionState::AwaitingAuth)?;

            let startup = FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: config.startup_params(),
            };
            self.send_message(&startup).await?;

            self.state.transition(ConnectionState::Authenticating)?;
            self.authenticate(config).await?;

            self.state.transition(ConnectionState::Idle)?;
            tracing::debug!(process_id = ?self.process_id, "startup complete");
            Ok(())
        }
        .instrument(tracing::debug_span!(
            "startup",
            user = %config.user,
            database = %config.database
        ))
        .await
    }

    async fn authenticate(&mut self, config: &ConnectionConfig) -> Result<()> {
        let auth_start = Instant::now();
        let mut auth_mechanism = crate::metrics::labels::MECHANISM_TRUST;

        loop {
            let msg = self.receive_message().await?;

            match msg {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        tracing::debug!(mechanism = auth_mechanism, "authentication successful");
                        crate::metrics::counters::auth_successful(auth_mechanism);
                        crate::metrics::histograms::auth_duration(
                            auth_mechanism,
                            auth_start.elapsed().as_millis() as u64,
                        );
                        // Parameters and key data follow; keep reading until ReadyForQuery
                    }
                    AuthenticationMessage::CleartextPassword => {
                        auth_mechanism = crate::metrics::labels::MECHANISM_CLEARTEXT;
                        crate::metrics::counters::auth_attempted(auth_mechanism);

                        let password = config
                            .password
                            .as_ref()
                            .ok_or_else(|| Error::Authentication("password required".into()))?;
                        self.send_message(&FrontendMessage::Password(password.clone()))
                            .await?;
                    }
                    AuthenticationMessage::Md5Password { .. } => {
                        crate::metrics::counters::auth_failed(
                            crate::metrics::labels::MECHANISM_MD5,
                            crate::metrics::labels::REASON_UNSUPPORTED,
                        );
                        return Err(Error::Authentication(
                            "MD5 authentication not supported. Use SCRAM-SHA-256 or cleartext password".into(),
                        ));
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        auth_mechanism = crate::metrics::labels::MECHANISM_SCRAM;
                        crate::metrics::counters::auth_attempted(auth_mechanism);
                        if let Err(e) = self.handle_sasl(&mechanisms, config).await {
                            crate::metrics::counters::auth_failed(
                                auth_mechanism,
                                failure_reason(&e),
                            );
                            return Err(e);
                        }
                    }
                    AuthenticationMessage::SaslContinue { .. }
                    | AuthenticationMessage::SaslFinal { .. } => {
                        return Err(Error::Protocol(
                            "unexpected SASL message outside of SASL flow".into(),
                        ));
                    }
                },
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = Some(process_id);
                    self.secret_key = Some(secret_key);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!(%name, %value, "parameter status");
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(%notice, "notice during startup");
                }
                BackendMessage::ReadyForQuery { .. } => {
                    break;
                }
                BackendMessage::ErrorResponse(err) => {
                    let err = Error::Server(err);
                    crate::metrics::counters::auth_failed(auth_mechanism, failure_reason(&err));
                    return Err(err);
                }
            }
        }

        Ok(())
    }

    /// SCRAM-SHA-256 exchange, with channel binding when running over TLS
    /// and the server offers `SCRAM-SHA-256-PLUS`.
    async fn handle_sasl(
        &mut self,
        mechanisms: &[String],
        config: &ConnectionConfig,
    ) -> Result<()> {
        let binding =
            ChannelBinding::negotiate(mechanisms, self.transport_mut()?.channel_binding_data());

        let supported = match binding {
            ChannelBinding::TlsServerEndPoint(_) => true,
            _ => mechanisms
                .iter()
                .any(|m| m == crate::protocol::constants::sasl::SCRAM_SHA_256),
        };
        if !supported {
            return Err(Error::Authentication(format!(
                "server does not support SCRAM-SHA-256. Available: {}",
                mechanisms.join(", ")
            )));
        }

        let password = config.password.as_ref().ok_or_else(|| {
            Error::Authentication("password required for SCRAM authentication".into())
        })?;

        let mut scram =
            ScramClient::with_channel_binding(config.user.clone(), password.clone(), binding);
        tracing::debug!(mechanism = scram.mechanism(), "initiating SCRAM authentication");

        let msg = FrontendMessage::SaslInitialResponse {
            mechanism: scram.mechanism().to_string(),
            data: scram.client_first().into_bytes(),
        };
        self.send_message(&msg).await?;

        let server_first = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue { data }) => data,
            BackendMessage::ErrorResponse(err) => return Err(Error::Server(err)),
            other => {
                return Err(Error::Protocol(format!(
                    "expected SaslContinue during SASL authentication, got {}",
                    other.name()
                )));
            }
        };
        let server_first = String::from_utf8(server_first).map_err(|e| {
            Error::Protocol(format!("invalid UTF-8 in server first message: {}", e))
        })?;

        let (client_final, scram_state) = scram
            .client_final(&server_first)
            .map_err(|e| Error::Authentication(format!("SCRAM error: {}", e)))?;

        self.send_message(&FrontendMessage::SaslResponse {
            data: client_final.into_bytes(),
        })
        .await?;

        // A wrong password is reported here as ErrorResponse 28P01
        let server_final = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal { data }) => data,
            BackendMessage::ErrorResponse(err) => return Err(Error::Server(err)),
            other => {
                return Err(Error::Protocol(format!(
                    "expected SaslFinal during SASL authentication, got {}",
                    other.name()
                )));
            }
        };
        let server_final = String::from_utf8(server_final).map_err(|e| {
            Error::Protocol(format!("invalid UTF-8 in server final message: {}", e))
        })?;

        scram
            .verify_server_final(&server_final, &scram_state)
            .map_err(|e| Error::Authentication(format!("SCRAM verification failed: {}", e)))?;

        tracing::debug!("SCRAM server signature verified");
        Ok(())
    }

    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg);
        let transport = self.transport_mut()?;
        transport.write_all(&buf).await?;
        transport.flush().await?;
        Ok(())
    }

    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            if let Some((msg, consumed)) =
                decode_message(&self.read_buf).map_err(|e| Error::Protocol(e.to_string()))?
            {
                self.read_buf.advance(consumed);
                return Ok(msg);
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Send `Terminate` and shut the socket down
    pub async fn close(mut self) -> Result<()> {
        self.state.transition(ConnectionState::Closed)?;
        let _ = self.send_message(&FrontendMessage::Terminate).await;
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await?;
        }
        Ok(())
    }
}

fn failure_reason(err: &Error) -> &'static str {
    use crate::metrics::labels;
    match err {
        e if e.is_invalid_password() => labels::REASON_INVALID_PASSWORD,
        Error::Server(_) => labels::REASON_SERVER_ERROR,
        Error::Authentication(_) => labels::REASON_CLIENT,
        _ => labels::REASON_PROTOCOL,
    }
}
