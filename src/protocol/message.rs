//! Startup-phase message types
//!
//! Only the messages exchanged between the first byte on the socket and
//! `ReadyForQuery` are modelled. Anything later belongs to a query layer this
//! crate does not have.

/// Sent by the client
#[derive(Debug, Clone)]
pub enum FrontendMessage {
    /// StartupMessage with its `name=value` parameters
    Startup {
        /// Protocol version, `3.0` in practice
        version: i32,
        /// Parameters in the order they are written
        params: Vec<(String, String)>,
    },

    /// PasswordMessage answering a cleartext request
    Password(String),

    /// SASLInitialResponse
    SaslInitialResponse {
        /// Selected mechanism
        mechanism: String,
        /// client-first-message
        data: Vec<u8>,
    },

    /// SASLResponse carrying the client-final-message
    SaslResponse {
        /// client-final-message
        data: Vec<u8>,
    },

    /// SSLRequest, sent before any startup message
    SslRequest,

    /// Terminate
    Terminate,
}

/// Sent by the server during startup
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// One of the `R` authentication requests
    Authentication(AuthenticationMessage),

    /// Cancellation key for this backend
    BackendKeyData {
        /// Backend process id
        process_id: i32,
        /// Cancel key
        secret_key: i32,
    },

    /// Startup was refused
    ErrorResponse(ErrorFields),

    /// Informational notice, startup continues
    NoticeResponse(ErrorFields),

    /// Server setting reported at startup or on change
    ParameterStatus {
        /// Setting name
        name: String,
        /// Current value
        value: String,
    },

    /// Startup complete
    ReadyForQuery {
        /// Transaction status byte (`I` once authenticated)
        status: u8,
    },
}

impl BackendMessage {
    /// Short name used in protocol error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Authentication",
            Self::BackendKeyData { .. } => "BackendKeyData",
            Self::ErrorResponse(_) => "ErrorResponse",
            Self::NoticeResponse(_) => "NoticeResponse",
            Self::ParameterStatus { .. } => "ParameterStatus",
            Self::ReadyForQuery { .. } => "ReadyForQuery",
        }
    }
}

/// Authentication requests
#[derive(Debug, Clone)]
pub enum AuthenticationMessage {
    /// AuthenticationOk
    Ok,

    /// AuthenticationCleartextPassword
    CleartextPassword,

    /// AuthenticationMD5Password; decoded so it can be refused by name
    Md5Password {
        /// Per-connection salt
        salt: [u8; 4],
    },

    /// AuthenticationSASL with the mechanisms the server accepts
    Sasl {
        /// Mechanism names, for example `SCRAM-SHA-256` and `SCRAM-SHA-256-PLUS`
        mechanisms: Vec<String>,
    },

    /// AuthenticationSASLContinue (server-first-message)
    SaslContinue {
        /// server-first-message
        data: Vec<u8>,
    },

    /// AuthenticationSASLFinal (server-final-message)
    SaslFinal {
        /// server-final-message
        data: Vec<u8>,
    },
}

/// Fields of an ErrorResponse or NoticeResponse
///
/// Only the fields a connect-time failure can usefully report are kept;
/// the decoder skips the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// `S`: FATAL, ERROR, WARNING, ...
    pub severity: Option<String>,
    /// `C`: SQLSTATE
    pub code: Option<String>,
    /// `M`: primary message
    pub message: Option<String>,
    /// `D`: detail
    pub detail: Option<String>,
    /// `H`: hint
    pub hint: Option<String>,
}

impl ErrorFields {
    /// The SQLSTATE, if the server sent one
    pub fn sqlstate(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        f.write_str(self.message.as_deref().unwrap_or("(no message)"))?;
        if let Some(code) = &self.code {
            write!(f, " ({})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "; {}", detail)?;
        }
        Ok(())
    }
}
