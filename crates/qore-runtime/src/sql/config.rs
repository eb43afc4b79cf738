//! Datasource and pool configuration
//!
//! Configuration can be built in code, read from JSON, or parsed from the
//! classic datasource string:
//!
//! ```text
//! driver:user/pass@database(encoding)%host:port{option=value,...}
//! ```
//!
//! Every part except the database name is optional.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{QoreError, Result};

/// Default wait for a transaction lock held by another thread
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 120_000;

/// Connection parameters of one datasource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasourceConfig {
    /// Driver name used to look up the driver
    pub driver: String,
    /// Login user
    pub user: Option<String>,
    /// Login password
    pub password: Option<String>,
    /// Database name
    pub database: String,
    /// Server host
    pub host: Option<String>,
    /// Server port
    pub port: Option<u16>,
    /// Client character encoding
    pub encoding: Option<String>,
    /// Commit after every statement instead of opening transactions
    pub autocommit: bool,
    /// Transaction lock timeout in milliseconds; 0 waits forever
    pub lock_timeout_ms: u64,
    /// Driver-specific options
    pub options: IndexMap<String, String>,
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            driver: String::new(),
            user: None,
            password: None,
            database: String::new(),
            host: None,
            port: None,
            encoding: None,
            autocommit: false,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            options: IndexMap::new(),
        }
    }
}

impl DatasourceConfig {
    /// Create a configuration for `driver` and `database`
    pub fn new(driver: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Set login credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set the server host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the server port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the client encoding
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Enable or disable autocommit
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    /// Set the transaction lock timeout
    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    /// Add a driver option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse a datasource string.
    ///
    /// ```
    /// use qore_runtime::sql::DatasourceConfig;
    ///
    /// let cfg = DatasourceConfig::parse("pgsql:app/secret@orders(utf8)%db1:5432{min=2}").unwrap();
    /// assert_eq!(cfg.driver, "pgsql");
    /// assert_eq!(cfg.user.as_deref(), Some("app"));
    /// assert_eq!(cfg.database, "orders");
    /// assert_eq!(cfg.port, Some(5432));
    /// assert_eq!(cfg.options.get("min").map(String::as_str), Some("2"));
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        let mut cfg = DatasourceConfig::default();
        let mut rest = input.trim();

        if rest.ends_with('}') {
            let open = rest
                .rfind('{')
                .ok_or_else(|| parse_error(input, "unbalanced '}'"))?;
            for pair in rest[open + 1..rest.len() - 1].split(',') {
                let pair = pair.trim();
                if pair.is_empty() {
                    continue;
                }
                let (key, value) = match pair.split_once('=') {
                    Some((k, v)) => (k.trim(), v.trim()),
                    None => (pair, "true"),
                };
                if key.is_empty() {
                    return Err(parse_error(input, "option without a name"));
                }
                cfg.options.insert(key.to_string(), value.to_string());
            }
            rest = &rest[..open];
        }

        if let Some(pos) = rest.find(':') {
            if !rest[..pos].contains(&['/', '@', '%', '('][..]) {
                cfg.driver = rest[..pos].to_string();
                rest = &rest[pos + 1..];
            }
        }

        if let Some(pos) = rest.rfind('@') {
            let creds = &rest[..pos];
            match creds.split_once('/') {
                Some((user, pass)) => {
                    cfg.user = non_empty(user);
                    cfg.password = non_empty(pass);
                }
                None => cfg.user = non_empty(creds),
            }
            rest = &rest[pos + 1..];
        }

        if let Some(pos) = rest.find('%') {
            let host_port = &rest[pos + 1..];
            match host_port.rsplit_once(':') {
                Some((host, port)) => {
                    cfg.host = non_empty(host);
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| parse_error(input, &format!("invalid port '{}'", port)))?;
                    cfg.port = Some(port);
                }
                None => cfg.host = non_empty(host_port),
            }
            rest = &rest[..pos];
        }

        if rest.ends_with(')') {
            let open = rest
                .rfind('(')
                .ok_or_else(|| parse_error(input, "unbalanced ')'"))?;
            cfg.encoding = non_empty(&rest[open + 1..rest.len() - 1]);
            rest = &rest[..open];
        }

        if rest.is_empty() {
            return Err(parse_error(input, "missing database name"));
        }
        cfg.database = rest.to_string();
        Ok(cfg)
    }

    /// Read a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| QoreError::Configuration(e.to_string()))
    }

    /// Serialize the configuration to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| QoreError::Configuration(e.to_string()))
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_error(input: &str, what: &str) -> QoreError {
    QoreError::Configuration(format!("cannot parse datasource '{}': {}", input, what))
}

// Never prints the password.
impl fmt::Display for DatasourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.driver.is_empty() {
            write!(f, "{}:", self.driver)?;
        }
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.database)?;
        if let Some(enc) = &self.encoding {
            write!(f, "({})", enc)?;
        }
        if let Some(host) = &self.host {
            write!(f, "%{}", host)?;
            if let Some(port) = self.port {
                write!(f, ":{}", port)?;
            }
        }
        Ok(())
    }
}

/// Pool sizing plus the configuration shared by every pooled connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened eagerly at construction
    pub min: usize,
    /// Upper bound on open connections
    pub max: usize,
    /// Connection parameters
    pub datasource: DatasourceConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            datasource: DatasourceConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration with default sizing
    pub fn new(datasource: DatasourceConfig) -> Self {
        Self {
            datasource,
            ..Default::default()
        }
    }

    /// Set the eager connection count
    pub fn with_min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    /// Set the connection limit
    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    /// Parse a datasource string; `min` and `max` options size the pool.
    pub fn from_datasource_string(input: &str) -> Result<Self> {
        let mut datasource = DatasourceConfig::parse(input)?;
        let mut cfg = PoolConfig::default();
        if let Some(min) = datasource.options.shift_remove("min") {
            cfg.min = parse_size(input, "min", &min)?;
        }
        if let Some(max) = datasource.options.shift_remove("max") {
            cfg.max = parse_size(input, "max", &max)?;
        }
        cfg.datasource = datasource;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject impossible sizing
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(QoreError::Configuration(
                "pool maximum must be at least 1".to_string(),
            ));
        }
        if self.min > self.max {
            return Err(QoreError::Configuration(format!(
                "pool minimum {} exceeds maximum {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

fn parse_size(input: &str, key: &str, value: &str) -> Result<usize> {
    value
        .parse::<usize>()
        .map_err(|_| parse_error(input, &format!("option '{}' must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_full_string() {
        let cfg = DatasourceConfig::parse("oracle:scott/tiger@orcl(al32utf8)%db.example.com:1521{timeout=5,debug}")
            .unwrap();
        assert_eq!(cfg.driver, "oracle");
        assert_eq!(cfg.user.as_deref(), Some("scott"));
        assert_eq!(cfg.password.as_deref(), Some("tiger"));
        assert_eq!(cfg.database, "orcl");
        assert_eq!(cfg.encoding.as_deref(), Some("al32utf8"));
        assert_eq!(cfg.host.as_deref(), Some("db.example.com"));
        assert_eq!(cfg.port, Some(1521));
        assert_eq!(cfg.options.get("timeout").map(String::as_str), Some("5"));
        assert_eq!(cfg.options.get("debug").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_parse_database_only() {
        let cfg = DatasourceConfig::parse("inventory").unwrap();
        assert_eq!(cfg.database, "inventory");
        assert!(cfg.driver.is_empty());
        assert_eq!(cfg.user, None);
    }

    #[test]
    fn test_parse_host_without_driver() {
        let cfg = DatasourceConfig::parse("user@db%localhost:5432").unwrap();
        assert!(cfg.driver.is_empty());
        assert_eq!(cfg.user.as_deref(), Some("user"));
        assert_eq!(cfg.host.as_deref(), Some("localhost"));
        assert_eq!(cfg.port, Some(5432));
    }

    #[test]
    fn test_parse_errors() {
        assert!(DatasourceConfig::parse("pgsql:user/pass@").is_err());
        assert!(DatasourceConfig::parse("pgsql:db%host:notaport").is_err());
    }

    #[test]
    fn test_display_hides_password() {
        let cfg = DatasourceConfig::new("mock", "db")
            .with_credentials("u", "secret")
            .with_host("h")
            .with_port(1);
        let shown = cfg.to_string();
        assert_eq!(shown, "mock:u@db%h:1");
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_json_defaults() {
        let cfg = DatasourceConfig::from_json(r#"{"driver":"mock","database":"db"}"#).unwrap();
        assert_eq!(cfg.lock_timeout_ms, DEFAULT_LOCK_TIMEOUT_MS);
        assert!(!cfg.autocommit);
        let back = DatasourceConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_pool_sizing_from_string() {
        let cfg = PoolConfig::from_datasource_string("mock:db{min=2,max=4,x=y}").unwrap();
        assert_eq!((cfg.min, cfg.max), (2, 4));
        assert_eq!(cfg.datasource.options.len(), 1);
        assert!(PoolConfig::from_datasource_string("mock:db{min=5,max=4}").is_err());
        assert!(PoolConfig::new(DatasourceConfig::default()).with_max(0).validate().is_err());
    }
}
