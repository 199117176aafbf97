//! Versioned secret stores (AWS Secrets Manager, Vault KV v2, ...)

use super::dsn::DsnTemplate;
use crate::connection::SslMode;
use crate::connector::{CredentialError, CredentialSource};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A secret store that keeps several versions of each secret
///
/// Implement this over the store's client; errors from the client go into
/// [`CredentialError::Store`].
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Version identifiers of `secret_id`, newest first
    async fn list_versions(&self, secret_id: &str) -> Result<Vec<String>, CredentialError>;

    /// Secret string stored under `version_id`
    async fn get_version(
        &self,
        secret_id: &str,
        version_id: &str,
    ) -> Result<String, CredentialError>;
}

/// JSON layout of an RDS database secret
#[derive(Clone, Deserialize)]
pub struct RdsSecret {
    /// Role name
    pub username: String,
    /// Role password
    pub password: String,
    /// Endpoint host
    pub host: String,
    /// Endpoint port; RDS writes it as a number, hand-made secrets often as a string
    #[serde(default = "default_port", deserialize_with = "port_from_number_or_string")]
    pub port: u16,
    /// Database name
    #[serde(default)]
    pub dbname: Option<String>,
    /// Engine name (`postgres`, `aurora-postgresql`, ...)
    #[serde(default)]
    pub engine: Option<String>,
}

fn default_port() -> u16 {
    5432
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port '{}'", text))),
    }
}

impl std::fmt::Debug for RdsSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdsSecret")
            .field("username", &self.username)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("engine", &self.engine)
            .finish()
    }
}

impl RdsSecret {
    /// Decode a secret string
    pub fn from_json(raw: &str) -> Result<Self, CredentialError> {
        let secret: RdsSecret = serde_json::from_str(raw)?;
        if let Some(engine) = &secret.engine {
            if !engine.contains("postgres") {
                return Err(CredentialError::InvalidDsn(format!(
                    "secret is for engine '{}', not PostgreSQL",
                    engine
                )));
            }
        }
        Ok(secret)
    }

    /// Template for this secret's endpoint and role; the database defaults
    /// to `postgres`
    pub fn template(&self) -> DsnTemplate {
        DsnTemplate::new(&self.host, self.dbname.as_deref().unwrap_or("postgres"))
            .port(self.port)
            .user(&self.username)
    }

    /// Render the full connection string
    pub fn to_dsn(&self, sslmode: Option<SslMode>) -> Result<String, CredentialError> {
        let template = match sslmode {
            Some(mode) => self.template().sslmode(mode),
            None => self.template(),
        };
        template.render(Some(&self.password))
    }
}

/// Tries each version of a secret, newest first
///
/// Versions are listed once, at [`discover`](Self::discover) time; the
/// budget is the number of versions. During a rotation the store holds both
/// the pending and the current password, so whichever the server accepts is
/// found within one call. Every connect call starts again from the newest
/// version, so a call never prefers an older password over a newer one.
pub struct VersionedSecretSource<St> {
    store: St,
    secret_id: String,
    versions: Vec<String>,
    sslmode: Option<SslMode>,
    cursor: AtomicUsize,
}

impl<St: SecretStore> VersionedSecretSource<St> {
    /// List the versions of `secret_id` and build the source
    ///
    /// # Errors
    ///
    /// [`CredentialError::NoVersions`] if the secret has none, or whatever
    /// the store reports.
    pub async fn discover(
        store: St,
        secret_id: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let secret_id = secret_id.into();
        let versions = store.list_versions(&secret_id).await?;
        if versions.is_empty() {
            return Err(CredentialError::NoVersions { name: secret_id });
        }
        tracing::debug!(secret = %secret_id, versions = versions.len(), "discovered secret versions");

        Ok(Self {
            store,
            secret_id,
            versions,
            sslmode: None,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Add `sslmode` to every rendered connection string
    pub fn with_sslmode(mut self, mode: SslMode) -> Self {
        self.sslmode = Some(mode);
        self
    }

    /// Version identifiers in attempt order
    pub fn versions(&self) -> &[String] {
        &self.versions
    }
}

impl<St> std::fmt::Debug for VersionedSecretSource<St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedSecretSource")
            .field("secret_id", &self.secret_id)
            .field("versions", &self.versions)
            .field("sslmode", &self.sslmode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<St: SecretStore> CredentialSource for VersionedSecretSource<St> {
    async fn next(&self) -> Result<String, CredentialError> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.versions.len();
        let version = &self.versions[i];
        tracing::debug!(secret = %self.secret_id, %version, "fetching secret version");

        let raw = self.store.get_version(&self.secret_id, version).await?;
        RdsSecret::from_json(&raw)?.to_dsn(self.sslmode)
    }

    fn retry_budget(&self) -> usize {
        self.versions.len()
    }

    fn rewind(&self) {
        self.cursor.store(0, Ordering::Relaxed);
    }
}
