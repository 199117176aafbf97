//! Connection string rendering

use crate::connection::SslMode;
use crate::connector::CredentialError;
use url::Url;

/// Everything in a connection string except the password
///
/// ```
/// use pg_secrets_connector::credentials::DsnTemplate;
///
/// let dsn = DsnTemplate::new("db.internal", "orders")
///     .user("app")
///     .render(Some("p@ss word"))
///     .unwrap();
/// assert_eq!(
///     dsn,
///     "postgresql://db.internal:5432/orders?user=app&password=p%40ss%20word"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsnTemplate {
    host: String,
    port: u16,
    database: String,
    user: Option<String>,
    sslmode: Option<SslMode>,
    params: Vec<(String, String)>,
}

impl DsnTemplate {
    /// Template for `database` on `host`, port 5432
    ///
    /// A host starting with `/` is a Unix socket directory.
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 5432,
            database: database.into(),
            user: None,
            sslmode: None,
            params: Vec::new(),
        }
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the role to log in as
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set `sslmode`
    pub fn sslmode(mut self, mode: SslMode) -> Self {
        self.sslmode = Some(mode);
        self
    }

    /// Add any other connection parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Render a `postgresql://` URI with `password` filled in
    pub fn render(&self, password: Option<&str>) -> Result<String, CredentialError> {
        let unix = self.host.starts_with('/');
        let base = if unix {
            "postgresql://".to_string()
        } else if self.host.contains(':') {
            format!("postgresql://[{}]:{}", self.host, self.port)
        } else {
            format!("postgresql://{}:{}", self.host, self.port)
        };

        let mut url = Url::parse(&base)
            .map_err(|e| CredentialError::InvalidDsn(format!("host '{}': {}", self.host, e)))?;
        url.path_segments_mut()
            .map_err(|_| CredentialError::InvalidDsn("URI cannot carry a database".into()))?
            .push(&self.database);

        let mut query: Vec<(&str, String)> = Vec::new();
        if unix {
            query.push(("host", self.host.clone()));
            if self.port != 5432 {
                query.push(("port", self.port.to_string()));
            }
        }
        if let Some(user) = &self.user {
            query.push(("user", user.clone()));
        }
        if let Some(password) = password {
            query.push(("password", password.to_string()));
        }
        if let Some(mode) = self.sslmode {
            query.push(("sslmode", mode.to_string()));
        }
        query.extend(self.params.iter().map(|(k, v)| (k.as_str(), v.clone())));

        // Percent-encode rather than form-encode so libpq reads it too
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&encoded));
        }

        Ok(url.into())
    }
}
