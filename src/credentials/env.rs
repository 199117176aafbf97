//! Connection strings from the environment

use crate::connector::{CredentialError, CredentialSource};
use async_trait::async_trait;

const LIBPQ_VARS: [(&str, &str); 6] = [
    ("PGHOST", "host"),
    ("PGPORT", "port"),
    ("PGUSER", "user"),
    ("PGPASSWORD", "password"),
    ("PGDATABASE", "dbname"),
    ("PGSSLMODE", "sslmode"),
];

#[derive(Debug, Clone)]
enum Lookup {
    Var(String),
    Libpq,
}

/// Reads the connection string from the environment on every attempt
///
/// Useful when a sidecar or agent rewrites the environment (or the process is
/// re-exec'd) with fresh credentials. The default budget is one attempt.
#[derive(Debug, Clone)]
pub struct EnvSource {
    lookup: Lookup,
    budget: usize,
}

impl EnvSource {
    /// Read a whole connection string from `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            lookup: Lookup::Var(var.into()),
            budget: 1,
        }
    }

    /// Assemble a key/value connection string from `PGHOST`, `PGPORT`,
    /// `PGUSER`, `PGPASSWORD`, `PGDATABASE` and `PGSSLMODE`
    ///
    /// Unset variables are left out so the parser's defaults apply. At least
    /// one of them must be set.
    pub fn libpq() -> Self {
        Self {
            lookup: Lookup::Libpq,
            budget: 1,
        }
    }

    /// Allow `budget` attempts per connect call
    pub fn with_retry_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn read_libpq() -> Result<String, CredentialError> {
    let parts: Vec<String> = LIBPQ_VARS
        .iter()
        .filter_map(|(var, key)| {
            std::env::var(var)
                .ok()
                .map(|value| format!("{}={}", key, quote(&value)))
        })
        .collect();

    if parts.is_empty() {
        return Err(CredentialError::MissingVar {
            name: "PGHOST".into(),
        });
    }
    Ok(parts.join(" "))
}

#[async_trait]
impl CredentialSource for EnvSource {
    async fn next(&self) -> Result<String, CredentialError> {
        match &self.lookup {
            Lookup::Var(name) => match std::env::var(name) {
                Ok(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(CredentialError::MissingVar { name: name.clone() }),
            },
            Lookup::Libpq => read_libpq(),
        }
    }

    fn retry_budget(&self) -> usize {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ConnectionInfo;
    use serial_test::serial;

    fn clear_libpq() {
        for (var, _) in LIBPQ_VARS {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_reads_variable_each_time() {
        let source = EnvSource::new("PG_SECRETS_TEST_DSN");
        assert_eq!(source.retry_budget(), 1);

        std::env::set_var("PG_SECRETS_TEST_DSN", "postgres://db/first");
        assert_eq!(source.next().await.unwrap(), "postgres://db/first");

        std::env::set_var("PG_SECRETS_TEST_DSN", "postgres://db/second");
        assert_eq!(source.next().await.unwrap(), "postgres://db/second");

        std::env::remove_var("PG_SECRETS_TEST_DSN");
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_variable() {
        std::env::remove_var("PG_SECRETS_TEST_MISSING");
        let source = EnvSource::new("PG_SECRETS_TEST_MISSING").with_retry_budget(4);
        assert_eq!(source.retry_budget(), 4);

        match source.next().await {
            Err(CredentialError::MissingVar { name }) => {
                assert_eq!(name, "PG_SECRETS_TEST_MISSING")
            }
            other => panic!("expected MissingVar, got {:?}", other),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_libpq_variables() {
        clear_libpq();
        std::env::set_var("PGHOST", "db.internal");
        std::env::set_var("PGPORT", "6432");
        std::env::set_var("PGUSER", "app");
        std::env::set_var("PGPASSWORD", r"it's a \secret");
        std::env::set_var("PGDATABASE", "orders");

        let dsn = EnvSource::libpq().next().await.unwrap();
        clear_libpq();

        let info = ConnectionInfo::parse(&dsn).unwrap();
        assert_eq!(info.host.as_deref(), Some("db.internal"));
        assert_eq!(info.port, 6432);
        assert_eq!(info.user, "app");
        assert_eq!(info.password.as_deref(), Some(r"it's a \secret"));
        assert_eq!(info.database, "orders");
    }

    #[tokio::test]
    #[serial]
    async fn test_libpq_without_variables() {
        clear_libpq();
        assert!(matches!(
            EnvSource::libpq().next().await,
            Err(CredentialError::MissingVar { .. })
        ));
    }
}
