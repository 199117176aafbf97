//! Connect with whichever version of a stored secret the server accepts
//!
//! The store here is in memory; a real deployment implements `SecretStore`
//! over its secrets manager client (list versions, fetch one version).
//!
//! Run with: PGPASSWORD=postgres cargo run --example secret_versions

use async_trait::async_trait;
use pg_secrets_connector::connector::CredentialError;
use pg_secrets_connector::credentials::{SecretStore, VersionedSecretSource};
use pg_secrets_connector::SecretsConnector;
use serde_json::json;
use std::collections::BTreeMap;

/// Versions keyed by id; higher ids are newer
struct InMemoryStore {
    versions: BTreeMap<u32, String>,
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn list_versions(&self, _secret_id: &str) -> Result<Vec<String>, CredentialError> {
        Ok(self.versions.keys().rev().map(|v| v.to_string()).collect())
    }

    async fn get_version(
        &self,
        secret_id: &str,
        version_id: &str,
    ) -> Result<String, CredentialError> {
        version_id
            .parse::<u32>()
            .ok()
            .and_then(|v| self.versions.get(&v).cloned())
            .ok_or_else(|| CredentialError::NoVersions {
                name: format!("{}@{}", secret_id, version_id),
            })
    }
}

fn rds_secret(password: &str) -> String {
    json!({
        "engine": "postgres",
        "username": "postgres",
        "password": password,
        "host": "localhost",
        "port": 5432,
        "dbname": "postgres",
    })
    .to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("pg_secrets_connector=debug")
        .init();

    let current = std::env::var("PGPASSWORD").unwrap_or_else(|_| "postgres".into());

    // Version 2 is a pending rotation the server does not know yet
    let store = InMemoryStore {
        versions: BTreeMap::from([(1, rds_secret(&current)), (2, rds_secret("not-yet-applied"))]),
    };

    let source = VersionedSecretSource::discover(store, "app/postgres").await?;
    println!("trying versions {:?}", source.versions());

    let connector = SecretsConnector::new(source);
    let conn = connector.connect().await?;
    println!("connected: backend pid {:?}", conn.process_id());
    conn.close().await?;

    Ok(())
}
