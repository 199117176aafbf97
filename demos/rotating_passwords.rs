//! Try a list of candidate passwords against a local server
//!
//! Run with: cargo run --example rotating_passwords
//!
//! Set `RUST_LOG=pg_secrets_connector=debug` to watch each attempt.

use pg_secrets_connector::connection::SslMode;
use pg_secrets_connector::credentials::{DsnTemplate, PasswordRotation};
use pg_secrets_connector::SecretsConnector;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pg_secrets_connector=debug")),
        )
        .init();

    let template = DsnTemplate::new("localhost", "postgres")
        .user("postgres")
        .sslmode(SslMode::Disable);
    let source = PasswordRotation::new(
        template,
        ["foo", "bar", "baz", "password", "pa$$w0rd", "wrong-password"],
    );

    let connector = SecretsConnector::new(source);
    match connector.connect().await {
        Ok(conn) => {
            println!(
                "connected: backend pid {:?}, server version {}",
                conn.process_id(),
                conn.parameter("server_version").unwrap_or("unknown")
            );
            conn.close().await?;
        }
        Err(e) => eprintln!("failed to connect: {}", e),
    }

    Ok(())
}
