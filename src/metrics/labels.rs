//! Label keys and values

/// Authentication mechanism label key
pub const MECHANISM: &str = "mechanism";
/// Failure reason label key
pub const REASON: &str = "reason";
/// Connect outcome label key
pub const OUTCOME: &str = "outcome";

/// Server accepted the session without a password exchange
pub const MECHANISM_TRUST: &str = "trust";
/// Cleartext password
pub const MECHANISM_CLEARTEXT: &str = "cleartext";
/// MD5 password (always rejected client-side)
pub const MECHANISM_MD5: &str = "md5";
/// SCRAM-SHA-256 with or without channel binding
pub const MECHANISM_SCRAM: &str = "scram-sha-256";

/// SQLSTATE 28P01
pub const REASON_INVALID_PASSWORD: &str = "invalid_password";
/// Any other server `ErrorResponse`
pub const REASON_SERVER_ERROR: &str = "server_error";
/// Client refused to continue (missing password, bad SCRAM proof)
pub const REASON_CLIENT: &str = "client";
/// Malformed or unexpected traffic
pub const REASON_PROTOCOL: &str = "protocol";
/// Mechanism not implemented
pub const REASON_UNSUPPORTED: &str = "unsupported";

/// Connected
pub const OUTCOME_SUCCESS: &str = "success";
/// Every credential within the budget was rejected
pub const OUTCOME_EXHAUSTED: &str = "exhausted";
/// Non-authentication failure
pub const OUTCOME_FATAL: &str = "fatal";
/// Credential source failed
pub const OUTCOME_CREDENTIALS: &str = "credentials";
/// Caller cancelled
pub const OUTCOME_CANCELLED: &str = "cancelled";
