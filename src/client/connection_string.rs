//! Connection string parsing
//!
//! Supports the standard seed-list format:
//! * mongodb://[user[:password]@]host[:port][,host[:port]...][/database][?options]
//!
//! Hosts may be DNS names, IPv4 literals or bracketed IPv6 literals. TLS is always
//! on; a trailing `?ssl=true` (common in hosted-deployment URLs) is accepted and
//! dropped before parsing.

use crate::auth::Mechanism;
use crate::connection::Dialer;
use crate::protocol::constants::DEFAULT_PORT;
use crate::{Error, Result};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::time::Duration;

/// Scheme every administrative URL must carry
const SCHEME: &str = "mongodb://";

/// Literal suffix removed before parsing
pub const SSL_SUFFIX: &str = "?ssl=true";

/// Auth source used when neither `authSource` nor a path database is given
const DEFAULT_AUTH_SOURCE: &str = "admin";

/// One `host:port` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host name or IP literal (IPv6 without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ServerAddress {
    /// Create an address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`
    pub fn parse(s: &str) -> Result<Self> {
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| parse_error(format!("unterminated IPv6 literal in '{}'", s)))?;
            let port = match after {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(|| {
                    parse_error(format!("unexpected characters after IPv6 literal in '{}'", s))
                })?),
            };
            (host, port)
        } else {
            match s.split_once(':') {
                Some((host, port)) => {
                    if port.contains(':') {
                        return Err(parse_error(format!(
                            "IPv6 hosts must be enclosed in brackets: '{}'",
                            s
                        )));
                    }
                    (host, Some(port))
                }
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(parse_error(format!("empty host in '{}'", s)));
        }

        let port = match port {
            None => DEFAULT_PORT,
            Some(p) => match p.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(parse_error(format!("invalid port '{}'", p))),
            },
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parsed connection info
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Seed list, in URL order
    pub hosts: Vec<ServerAddress>,
    /// Username (percent-decoded)
    pub username: Option<String>,
    /// Password (percent-decoded)
    pub password: Option<String>,
    /// Default database from the URL path
    pub database: Option<String>,
    /// `authSource` option
    pub auth_source: Option<String>,
    /// `replicaSet` option
    pub replica_set: Option<String>,
    /// `connect=direct`
    pub direct: bool,
    /// `appName` option
    pub app_name: Option<String>,
    /// `connectTimeoutMS` option
    pub connect_timeout: Option<Duration>,
    /// `authMechanism` option
    pub auth_mechanism: Option<Mechanism>,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database", &self.database)
            .field("auth_source", &self.auth_source)
            .field("replica_set", &self.replica_set)
            .field("direct", &self.direct)
            .field("app_name", &self.app_name)
            .field("connect_timeout", &self.connect_timeout)
            .field("auth_mechanism", &self.auth_mechanism)
            .finish()
    }
}

impl ConnectionInfo {
    /// Parse connection string
    pub fn parse(s: &str) -> Result<Self> {
        let s = strip_ssl_suffix(s);

        if s.starts_with("mongodb+srv://") {
            return Err(parse_error("mongodb+srv:// (DNS seed list) is not supported"));
        }
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| parse_error("connection string must start with mongodb://"))?;

        // Format: [user[:password]@]hosts[/database][?options]
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };

        let (userinfo, rest) = match rest.rfind('@') {
            Some(pos) => (Some(&rest[..pos]), &rest[pos + 1..]),
            None => (None, rest),
        };

        let (hosts_part, database) = match rest.split_once('/') {
            Some((h, db)) => (h, decode(db)?),
            None => (rest, String::new()),
        };

        let (username, password) = match userinfo {
            Some(info) => {
                let (user, pass) = match info.split_once(':') {
                    Some((u, p)) => (u, Some(decode(p)?)),
                    None => (info, None),
                };
                let user = decode(user)?;
                if user.is_empty() {
                    return Err(parse_error("empty username before '@'"));
                }
                (Some(user), pass)
            }
            None => (None, None),
        };

        if hosts_part.is_empty() {
            return Err(parse_error("no hosts in connection string"));
        }
        let hosts = hosts_part
            .split(',')
            .map(ServerAddress::parse)
            .collect::<Result<Vec<_>>>()?;

        let mut info = Self {
            hosts,
            username,
            password,
            database: (!database.is_empty()).then_some(database),
            auth_source: None,
            replica_set: None,
            direct: false,
            app_name: None,
            connect_timeout: None,
            auth_mechanism: None,
        };
        info.apply_options(query)?;

        Ok(info)
    }

    fn apply_options(&mut self, query: &str) -> Result<()> {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.to_ascii_lowercase().as_str() {
                "authsource" => self.auth_source = Some(value),
                "authmechanism" => {
                    let mechanism = Mechanism::from_name(&value).ok_or_else(|| {
                        parse_error(format!("unsupported authMechanism '{}'", value))
                    })?;
                    self.auth_mechanism = Some(mechanism);
                }
                "replicaset" => self.replica_set = Some(value),
                "connect" => match value.as_str() {
                    "direct" => self.direct = true,
                    "replicaSet" | "automatic" => self.direct = false,
                    other => {
                        return Err(parse_error(format!("invalid connect option '{}'", other)))
                    }
                },
                "appname" => self.app_name = Some(value),
                "connecttimeoutms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        parse_error(format!("invalid connectTimeoutMS '{}'", value))
                    })?;
                    self.connect_timeout = (ms > 0).then(|| Duration::from_millis(ms));
                }
                "ssl" | "tls" => {
                    if value != "true" {
                        return Err(parse_error(format!(
                            "{}={} is not allowed: connections are always TLS",
                            key, value
                        )));
                    }
                }
                _ => return Err(parse_error(format!("unsupported connection option '{}'", key))),
            }
        }
        Ok(())
    }

    /// Database administrative credentials are checked against
    pub fn auth_source(&self) -> &str {
        self.auth_source
            .as_deref()
            .or(self.database.as_deref())
            .unwrap_or(DEFAULT_AUTH_SOURCE)
    }

    /// Credentials for authenticating each connection, if the URL carries a user
    pub fn credentials(&self) -> Option<crate::connection::AuthCredentials> {
        self.username
            .as_ref()
            .map(|username| crate::connection::AuthCredentials {
                username: username.clone(),
                password: self.password.clone().unwrap_or_default(),
                source: self.auth_source().to_string(),
                mechanism: self.auth_mechanism,
            })
    }
}

/// A resolved target: where to connect plus how to open each connection
pub struct DialTarget<D> {
    /// Parsed endpoints, credentials and options
    pub info: ConnectionInfo,
    /// Per-connection dial hook
    pub dialer: D,
}

impl<D> fmt::Debug for DialTarget<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialTarget")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Parse `admin_url` and pair it with the dial hook every connection will use
pub fn resolve<D: Dialer>(admin_url: &str, dialer: D) -> Result<DialTarget<D>> {
    let info = ConnectionInfo::parse(admin_url)?;
    tracing::debug!(
        hosts = info.hosts.len(),
        auth_source = info.auth_source(),
        direct = info.direct,
        "resolved connection string"
    );
    Ok(DialTarget { info, dialer })
}

/// Remove a trailing literal `?ssl=true`
pub fn strip_ssl_suffix(s: &str) -> &str {
    s.strip_suffix(SSL_SUFFIX).unwrap_or(s)
}

/// Replace the password in a connection string with `***`
pub(crate) fn redact(s: &str) -> String {
    let Some(rest) = s.find("://").map(|i| i + 3) else {
        return s.to_string();
    };
    let authority_end = s[rest..]
        .find(['/', '?'])
        .map_or(s.len(), |i| rest + i);
    let Some(at) = s[rest..authority_end].rfind('@').map(|i| rest + i) else {
        return s.to_string();
    };
    match s[rest..at].find(':').map(|i| rest + i) {
        Some(colon) => format!("{}***{}", &s[..colon + 1], &s[at..]),
        None => s.to_string(),
    }
}

fn decode(s: &str) -> Result<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|e| parse_error(format!("invalid percent-encoding: {}", e)))
}

fn parse_error(msg: impl Into<String>) -> Error {
    Error::ConnectionString(msg.into())
}
