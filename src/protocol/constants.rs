//! Postgres protocol constants

/// Protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

/// SSLRequest code (80877103 = 1234 << 16 | 5679)
pub const SSL_REQUEST_CODE: i32 = 0x04D2_162F;

/// Message type tags
pub mod tags {
    /// Authentication request
    pub const AUTHENTICATION: u8 = b'R';

    /// Backend key data
    pub const BACKEND_KEY_DATA: u8 = b'K';

    /// Error response
    pub const ERROR_RESPONSE: u8 = b'E';

    /// Notice response
    pub const NOTICE_RESPONSE: u8 = b'N';

    /// Parameter status
    pub const PARAMETER_STATUS: u8 = b'S';

    /// Ready for query
    pub const READY_FOR_QUERY: u8 = b'Z';

    /// Password, SASLInitialResponse and SASLResponse (frontend)
    pub const PASSWORD: u8 = b'p';

    /// Terminate (frontend)
    pub const TERMINATE: u8 = b'X';
}

/// Authentication types
pub mod auth {
    /// Authentication successful
    pub const OK: i32 = 0;

    /// Cleartext password required
    pub const CLEARTEXT_PASSWORD: i32 = 3;

    /// MD5 password required
    pub const MD5_PASSWORD: i32 = 5;

    /// SASL mechanisms available (Postgres 10+)
    pub const SASL: i32 = 10;

    /// SASL server challenge
    pub const SASL_CONTINUE: i32 = 11;

    /// SASL server final message
    pub const SASL_FINAL: i32 = 12;
}

/// SASL mechanism names
pub mod sasl {
    /// SCRAM-SHA-256 without channel binding
    pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

    /// SCRAM-SHA-256 with `tls-server-end-point` channel binding
    pub const SCRAM_SHA_256_PLUS: &str = "SCRAM-SHA-256-PLUS";
}

/// SQLSTATE codes the connector cares about
pub mod sqlstate {
    /// `invalid_password`: the only failure that triggers credential rotation
    pub const INVALID_PASSWORD: &str = "28P01";

    /// `invalid_authorization_specification` (unknown role, pg_hba rejection)
    pub const INVALID_AUTHORIZATION_SPECIFICATION: &str = "28000";

    /// `invalid_catalog_name`: database does not exist
    pub const INVALID_CATALOG_NAME: &str = "3D000";

    /// `too_many_connections`
    pub const TOO_MANY_CONNECTIONS: &str = "53300";
}
