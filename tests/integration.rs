//! Integration tests for pg-secrets-connector
//!
//! These tests require a running Postgres instance.
//!
//! Run with: cargo test --test integration -- --ignored

use pg_secrets_connector::connection::ConnectionState;
use pg_secrets_connector::credentials::{DsnTemplate, PasswordRotation, StaticSource};
use pg_secrets_connector::{ConnectError, SecretsConnector};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn template() -> DsnTemplate {
    DsnTemplate::new(
        env_or("POSTGRES_HOST", "localhost"),
        env_or("POSTGRES_DB", "postgres"),
    )
    .port(env_or("POSTGRES_PORT", "5432").parse().expect("POSTGRES_PORT"))
    .user(env_or("POSTGRES_USER", "postgres"))
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_rotates_to_current_password() {
    let password = env_or("POSTGRES_PASSWORD", "postgres");
    let source =
        PasswordRotation::new(template(), ["foo".to_string(), "bar".to_string(), password]);
    let connector = SecretsConnector::new(source);

    let conn = connector.connect().await.expect("connect");
    assert_eq!(conn.state(), ConnectionState::Idle);
    assert!(conn.parameter("server_version").is_some());
    conn.close().await.expect("close");
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_all_passwords_wrong() {
    let source = PasswordRotation::new(template(), ["foo", "bar"]);
    let connector = SecretsConnector::new(source);

    match connector.connect().await {
        Err(ConnectError::Authentication { attempts, source }) => {
            assert_eq!(attempts, 2);
            assert!(source.is_invalid_password());
        }
        other => panic!("expected authentication failure, got {:?}", other),
    }
}

#[tokio::test]
#[ignore] // Requires Postgres running
async fn test_unknown_database_is_not_retried() {
    let password = env_or("POSTGRES_PASSWORD", "postgres");
    let dsn = DsnTemplate::new(env_or("POSTGRES_HOST", "localhost"), "no_such_database_xyz")
        .port(env_or("POSTGRES_PORT", "5432").parse().expect("POSTGRES_PORT"))
        .user(env_or("POSTGRES_USER", "postgres"))
        .render(Some(&password))
        .expect("render");
    let connector = SecretsConnector::new(StaticSource::repeating(dsn, 3));

    match connector.connect().await {
        Err(ConnectError::Fatal(err)) => assert_eq!(err.sqlstate(), Some("3D000")),
        other => panic!("expected fatal error, got {:?}", other),
    }
}
