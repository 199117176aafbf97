//! Connection string parsing
//!
//! Supports both libpq formats:
//! * `postgres[ql]://[user[:password]@][host][:port][/dbname][?key=value&...]`
//! * `host=localhost port=5432 user=app password='with spaces' dbname=app`
//!
//! An empty host selects the default Unix socket directory; a host that starts
//! with `/` names a socket directory (`postgres:///db?host=/var/run/postgresql`).

use crate::connection::{ConnectionConfig, SslMode, TlsConfig};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: u16 = 5432;

/// Parsed connection info
#[derive(Clone)]
pub struct ConnectionInfo {
    /// Transport type
    pub transport: TransportType,
    /// Host (for TCP)
    pub host: Option<String>,
    /// Port; also selects the Unix socket file
    pub port: u16,
    /// Unix socket path
    pub unix_socket: Option<PathBuf>,
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// Path to custom CA certificate (from sslrootcert param)
    pub sslrootcert: Option<String>,
    /// Path to client certificate (from sslcert param, for mTLS)
    pub sslcert: Option<String>,
    /// Path to client private key (from sslkey param, for mTLS)
    pub sslkey: Option<String>,
    /// Limit on connect plus startup (`connect_timeout`, seconds)
    pub connect_timeout: Option<Duration>,
    /// `application_name` reported to the server
    pub application_name: Option<String>,
    /// Unrecognized keys, forwarded as startup parameters
    pub options: BTreeMap<String, String>,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("unix_socket", &self.unix_socket)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("sslmode", &self.sslmode)
            .field("connect_timeout", &self.connect_timeout)
            .field("application_name", &self.application_name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// TCP socket
    Tcp,
    /// Unix domain socket
    Unix,
}

/// Resolve the default Unix socket directory
fn resolve_default_socket_dir() -> Option<String> {
    // Try standard locations in order (Linux convention)
    for dir in &["/run/postgresql", "/var/run/postgresql", "/tmp"] {
        if Path::new(dir).is_dir() {
            return Some(dir.to_string());
        }
    }
    None
}

/// Construct the full Unix socket path
fn construct_socket_path(socket_dir: &str, port: u16) -> PathBuf {
    PathBuf::from(format!(
        "{}/.s.PGSQL.{}",
        socket_dir.trim_end_matches('/'),
        port
    ))
}

fn decode(component: &str, what: &str) -> Result<String> {
    urlencoding::decode(component)
        .map(|c| c.into_owned())
        .map_err(|_| Error::Config(format!("invalid percent-encoding in {}", what)))
}

impl ConnectionInfo {
    /// Parse a connection string in URI or key/value form
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s
            .strip_prefix("postgresql://")
            .or_else(|| s.strip_prefix("postgres://"))
        {
            return Self::from_pairs(parse_uri(rest)?);
        }

        if let Some((scheme, _)) = s.split_once("://") {
            return Err(Error::Config(format!(
                "unsupported connection string scheme '{}': expected postgres:// or postgresql://",
                scheme
            )));
        }

        if !s.contains('=') {
            return Err(Error::Config(
                "invalid connection string: expected a postgres:// URI or key=value pairs".into(),
            ));
        }

        Self::from_pairs(parse_key_value(s)?)
    }

    /// Build from ordered key/value pairs; later keys override earlier ones.
    fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self> {
        let mut host = None;
        let mut port = None;
        let mut user = None;
        let mut password = None;
        let mut dbname = None;
        let mut sslmode = None;
        let mut sslrootcert = None;
        let mut sslcert = None;
        let mut sslkey = None;
        let mut connect_timeout = None;
        let mut application_name = None;
        let mut options = BTreeMap::new();

        for (key, value) in pairs {
            match key.as_str() {
                "host" => host = Some(value),
                "port" => port = Some(value),
                "user" => user = Some(value),
                "password" => password = Some(value),
                "dbname" => dbname = Some(value),
                "sslmode" => sslmode = Some(value),
                "sslrootcert" => sslrootcert = Some(value),
                "sslcert" => sslcert = Some(value),
                "sslkey" => sslkey = Some(value),
                "connect_timeout" => connect_timeout = Some(value),
                "application_name" => application_name = Some(value),
                _ => {
                    options.insert(key, value);
                }
            }
        }

        let port = match port.filter(|p| !p.is_empty()) {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port '{}'", p)))?,
            None => DEFAULT_PORT,
        };

        let connect_timeout = match connect_timeout.filter(|t| !t.is_empty()) {
            Some(t) => {
                let secs = t
                    .parse::<u64>()
                    .map_err(|_| Error::Config(format!("invalid connect_timeout '{}'", t)))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => None,
        };

        let user = user
            .filter(|u| !u.is_empty())
            .unwrap_or_else(whoami::username);
        let database = dbname.filter(|d| !d.is_empty()).unwrap_or_else(|| user.clone());

        let sslmode = match sslmode {
            Some(mode) => mode.parse()?,
            None => SslMode::default(),
        };

        let (transport, host, unix_socket, sslmode) = match host.filter(|h| !h.is_empty()) {
            Some(dir) if dir.starts_with('/') => (
                TransportType::Unix,
                None,
                Some(construct_socket_path(&dir, port)),
                SslMode::Disable,
            ),
            Some(host) => {
                if host.contains(',') {
                    return Err(Error::Config(format!(
                        "multiple hosts are not supported: '{}'",
                        host
                    )));
                }
                (TransportType::Tcp, Some(host), None, sslmode)
            }
            None => {
                let dir = resolve_default_socket_dir().ok_or_else(|| {
                    Error::Config(
                        "could not locate Unix socket directory. Set host explicitly.".into(),
                    )
                })?;
                (
                    TransportType::Unix,
                    None,
                    Some(construct_socket_path(&dir, port)),
                    SslMode::Disable,
                )
            }
        };

        Ok(Self {
            transport,
            host,
            port,
            unix_socket,
            database,
            user,
            password,
            sslmode,
            sslrootcert,
            sslcert,
            sslkey,
            connect_timeout,
            application_name,
            options,
        })
    }

    /// Whether the string named any certificate file
    pub fn has_tls_files(&self) -> bool {
        self.sslrootcert.is_some() || self.sslcert.is_some() || self.sslkey.is_some()
    }

    /// Build a `TlsConfig` from parsed connection parameters.
    ///
    /// Returns `None` if `sslmode` is `Disable`.
    pub fn to_tls_config(&self) -> Result<Option<TlsConfig>> {
        if self.sslmode == SslMode::Disable {
            return Ok(None);
        }

        let mut builder = TlsConfig::builder();

        if let Some(ref ca_path) = self.sslrootcert {
            builder = builder.ca_cert_path(ca_path);
        }

        // Hostname verification: only for verify-full
        builder = builder.verify_hostname(self.sslmode == SslMode::VerifyFull);

        // For sslmode=require, accept invalid certs (no verification)
        if self.sslmode == SslMode::Require {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref cert_path) = self.sslcert {
            builder = builder.client_cert_path(cert_path);
        }
        if let Some(ref key_path) = self.sslkey {
            builder = builder.client_key_path(key_path);
        }

        Ok(Some(builder.build()?))
    }

    /// Convert to ConnectionConfig
    pub fn to_config(&self) -> ConnectionConfig {
        let mut builder = ConnectionConfig::builder(&self.database, &self.user).sslmode(self.sslmode);
        if let Some(ref password) = self.password {
            builder = builder.password(password);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(ref name) = self.application_name {
            builder = builder.application_name(name);
        }
        for (k, v) in &self.options {
            builder = builder.param(k, v);
        }
        builder.build()
    }
}

/// Split a URI (scheme already stripped) into ordered pairs. Query
/// parameters come last so they override the authority.
fn parse_uri(rest: &str) -> Result<Vec<(String, String)>> {
    let (before_query, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (authority, path) = before_query.split_once('/').unwrap_or((before_query, ""));

    let mut pairs = Vec::new();

    // Passwords may contain '@' when not encoded; the last one ends userinfo
    let (userinfo, hostport) = match authority.rsplit_once('@') {
        Some((userinfo, hostport)) => (Some(userinfo), hostport),
        None => (None, authority),
    };

    if let Some(userinfo) = userinfo {
        let (user, password) = match userinfo.split_once(':') {
            Some((user, password)) => (user, Some(password)),
            None => (userinfo, None),
        };
        if !user.is_empty() {
            pairs.push(("user".to_string(), decode(user, "user")?));
        }
        if let Some(password) = password {
            pairs.push(("password".to_string(), decode(password, "password")?));
        }
    }

    let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| Error::Config("unterminated IPv6 address in host".into()))?;
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| Error::Config(format!("invalid host '{}'", hostport)))?,
            ),
        };
        (host, port)
    } else {
        match hostport.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        }
    };

    if !host.is_empty() {
        pairs.push(("host".to_string(), decode(host, "host")?));
    }
    if let Some(port) = port {
        pairs.push(("port".to_string(), port.to_string()));
    }
    if !path.is_empty() {
        pairs.push(("dbname".to_string(), decode(path, "database")?));
    }

    // Percent-decoding only: libpq keeps a literal '+' in query values
    for param in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        pairs.push((
            decode(key, "query parameter name")?,
            decode(value, "query parameter value")?,
        ));
    }

    Ok(pairs)
}

/// Parse libpq's `key=value` format with optional single quoting and
/// backslash escapes.
fn parse_key_value(s: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') || key.is_empty() {
            return Err(Error::Config(format!(
                "missing '=' after '{}' in connection string",
                key
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => break,
                    },
                    Some('\'') => {
                        pairs.push((key, value));
                        break;
                    }
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::Config(
                            "unterminated quoted string in connection string".into(),
                        ))
                    }
                }
            }
            continue;
        }

        while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    value.push(escaped);
                }
            } else {
                value.push(c);
            }
        }
        pairs.push((key, value));
    }

    Ok(pairs)
}
