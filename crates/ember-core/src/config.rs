//! Server configuration

use crate::arena::{DEFAULT_ARENA_SIZE, MAX_ARENA_SIZE};
use crate::{Error, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

/// Default maximum request size (headers plus body)
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    /// Runtime worker threads
    pub workers: usize,
    /// Time allowed for a complete request to arrive
    pub read_timeout: Duration,
    /// Shared limit for headers and body
    pub max_request_size: usize,
    /// Per-request arena capacity
    pub arena_size: usize,
    /// Listen backlog
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 3000,
            workers: num_cpus::get(),
            read_timeout: Duration::from_secs(30),
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            arena_size: DEFAULT_ARENA_SIZE,
            backlog: 1024,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `EMBER_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `EMBER_*` key
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup("EMBER_HOST") {
            config.hostname = host;
        }
        if let Some(port) = parse_var(&lookup, "EMBER_PORT")? {
            config.port = port;
        }
        if let Some(workers) = parse_var(&lookup, "EMBER_WORKERS")? {
            config.workers = workers;
        }
        if let Some(secs) = parse_var(&lookup, "EMBER_READ_TIMEOUT_SECS")? {
            config.read_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var(&lookup, "EMBER_MAX_REQUEST_SIZE")? {
            config.max_request_size = size;
        }
        if let Some(size) = parse_var(&lookup, "EMBER_ARENA_SIZE")? {
            config.arena_size = size;
        }
        if let Some(backlog) = parse_var(&lookup, "EMBER_BACKLOG")? {
            config.backlog = backlog;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    pub fn arena_size(mut self, size: usize) -> Self {
        self.arena_size = size;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Resolve `hostname:port`
    pub fn addr(&self) -> Result<SocketAddr> {
        (self.hostname.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("cannot resolve {}: {}", self.hostname, e)))?
            .next()
            .ok_or_else(|| Error::Config(format!("no address for {}", self.hostname)))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be non-zero".into()));
        }
        if self.max_request_size == 0 {
            return Err(Error::Config("max request size must be non-zero".into()));
        }
        if self.arena_size == 0 {
            return Err(Error::Config("arena size must be non-zero".into()));
        }
        if self.arena_size > MAX_ARENA_SIZE {
            return Err(Error::Config(format!(
                "arena size {} exceeds the {} byte maximum",
                self.arena_size, MAX_ARENA_SIZE
            )));
        }
        if self.arena_size < self.max_request_size {
            tracing::warn!(
                arena_size = self.arena_size,
                max_request_size = self.max_request_size,
                "arena smaller than max request size; large requests will be aborted"
            );
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.hostname, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.max_request_size, 1024 * 1024);
        assert_eq!(config.arena_size, 4 * 1024 * 1024);
        assert_eq!(config.backlog, 1024);
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("EMBER_HOST", "127.0.0.1"),
            ("EMBER_PORT", "8080"),
            ("EMBER_WORKERS", "2"),
            ("EMBER_READ_TIMEOUT_SECS", "5"),
            ("EMBER_MAX_REQUEST_SIZE", "2048"),
            ("EMBER_ARENA_SIZE", "65536"),
            ("EMBER_BACKLOG", "16"),
        ]))
        .unwrap();

        assert_eq!(config.hostname, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.workers, 2);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.max_request_size, 2048);
        assert_eq!(config.arena_size, 65536);
        assert_eq!(config.backlog, 16);
        assert_eq!(config.addr().unwrap(), "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_bad_values() {
        let err = ServerConfig::from_lookup(lookup(&[("EMBER_PORT", "http")])).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("EMBER_PORT")));

        let err = ServerConfig::from_lookup(lookup(&[("EMBER_WORKERS", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_arena_size_upper_bound() {
        let huge = (1u64 << 46).to_string();
        let err = ServerConfig::from_lookup(lookup(&[("EMBER_ARENA_SIZE", huge.as_str())])).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("arena size")));

        assert!(ServerConfig::new().arena_size(MAX_ARENA_SIZE).validate().is_ok());
        assert!(ServerConfig::new().arena_size(MAX_ARENA_SIZE + 1).validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .hostname("127.0.0.1")
            .port(0)
            .workers(1)
            .read_timeout(Duration::from_millis(200))
            .max_request_size(512)
            .arena_size(4096)
            .backlog(8);
        assert!(config.validate().is_ok());
        assert_eq!(config.addr().unwrap().port(), 0);
    }
}
