//! pg-secrets-connector: credential-rotating connection establishment for Postgres
//!
//! A [`SecretsConnector`] asks a [`CredentialSource`] for a connection string,
//! opens a physical connection through a [`RawConnectionOpener`] and, when the
//! server rejects the password (SQLSTATE `28P01`), tries again with the next
//! credential until the source's retry budget runs out. Every other failure is
//! returned on the spot.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use pg_secrets_connector::credentials::{DsnTemplate, PasswordRotation};
//! use pg_secrets_connector::SecretsConnector;
//!
//! let template = DsnTemplate::new("localhost", "postgres").user("postgres");
//! let source = PasswordRotation::new(template, ["previous", "current"]);
//!
//! let connector = SecretsConnector::new(source);
//! let conn = connector.connect().await?;
//! println!("backend pid: {:?}", conn.process_id());
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod connection;
pub mod connector;
pub mod credentials;
pub mod driver;
pub mod error;
mod metrics;
pub mod protocol;

pub use connection::Connection;
pub use connector::{
    ConnectError, CredentialError, CredentialSource, OpenFailure, RawConnectionOpener,
    SecretsConnector,
};
pub use driver::PgOpener;
pub use error::{Error, Result};
