//! Credential-rotating connection acquisition
//!
//! [`SecretsConnector`] drives two collaborators: a [`CredentialSource`]
//! that hands out connection strings and a [`RawConnectionOpener`] that turns
//! one into a connection, reporting whether a failure was a rejected password.

mod error;
mod opener;
mod secrets;
mod source;

pub use error::ConnectError;
pub use opener::{OpenFailure, RawConnectionOpener};
pub use secrets::SecretsConnector;
pub use source::{CredentialError, CredentialSource};
