//! Ready-made credential sources
//!
//! * [`StaticSource`]: a fixed list of connection strings, or one string
//!   repeated
//! * [`PasswordRotation`]: one [`DsnTemplate`] filled with each password in
//!   turn
//! * [`EnvSource`]: a connection string read from the environment on every
//!   attempt
//! * [`VersionedSecretSource`]: every version of a secret in a versioned
//!   [`SecretStore`], newest first
//!
//! Rotating sources keep their cursor across calls, wrapping around at the
//! end of their list.

mod dsn;
mod env;
mod fixed;
mod password;
mod versioned;

pub use dsn::DsnTemplate;
pub use env::EnvSource;
pub use fixed::StaticSource;
pub use password::PasswordRotation;
pub use versioned::{RdsSecret, SecretStore, VersionedSecretSource};
