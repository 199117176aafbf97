//! One authenticated backend session
//!
//! [`Connection::startup`] walks a socket from the optional SSLRequest
//! through authentication to the first `ReadyForQuery`, checking every
//! step against [`ConnectionState`].

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, ConnectionConfig, ConnectionConfigBuilder};
pub use state::ConnectionState;
pub use tls::{parse_server_name, SslMode, TlsConfig, TlsConfigBuilder};
pub use transport::Transport;
