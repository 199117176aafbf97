//! PostgreSQL driver: connection strings and the default opener

pub mod dsn;
mod opener;

pub use dsn::{ConnectionInfo, TransportType};
pub use opener::{PgOpener, PgOpenerBuilder};
