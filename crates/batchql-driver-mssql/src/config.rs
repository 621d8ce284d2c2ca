//! Connection settings and `:connect` target parsing

use std::fmt;
use std::time::Duration;

use batchql_core::DriverError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 1433;

/// Settings used for every session a `MssqlBackend` opens.
///
/// `host` and `port` are the defaults for sessions opened without a
/// `:connect` target; the credentials apply to all sessions.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MssqlConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    /// SQL Server login. `None` selects Windows authentication, which is
    /// only available on Windows.
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Require an encrypted connection
    pub encrypt: bool,
    /// Accept any server certificate (for development servers)
    pub trust_cert: bool,
    pub connect_timeout_secs: u64,
    pub application_name: String,
}

impl MssqlConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_trust_cert(mut self, trust_cert: bool) -> Self {
        self.trust_cert = trust_cert;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// The address a session connects to: `target` when given, otherwise the
    /// configured host and port
    pub fn address(&self, target: Option<&str>) -> Result<ServerAddress, DriverError> {
        match target {
            Some(target) => ServerAddress::parse(target, self.port),
            None => Ok(ServerAddress {
                host: self.host.clone(),
                port: self.port,
            }),
        }
    }
}

impl Default for MssqlConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: None,
            username: None,
            password: None,
            encrypt: true,
            trust_cert: false,
            connect_timeout_secs: 15,
            application_name: "batchql".to_string(),
        }
    }
}

impl fmt::Debug for MssqlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("encrypt", &self.encrypt)
            .field("trust_cert", &self.trust_cert)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// Host and port of a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// Parse a server name in `[tcp:]host[,port]` form. `.` and `(local)`
    /// name the local machine.
    pub fn parse(target: &str, default_port: u16) -> Result<Self, DriverError> {
        let invalid = |reason: &str| {
            DriverError::Connection(format!("invalid server name '{}': {}", target, reason))
        };

        let trimmed = target.trim();
        let without_protocol = match trimmed.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("tcp:") => &trimmed[4..],
            _ => trimmed,
        };

        let (host, port) = match without_protocol.split_once(',') {
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| invalid("port must be a number between 0 and 65535"))?;
                (host.trim(), port)
            }
            None => (without_protocol, default_port),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if host.contains('\\') {
            return Err(invalid("named instances are not supported, give a port instead"));
        }

        let host = match host {
            "." | "(local)" => "localhost",
            other => other,
        };
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
