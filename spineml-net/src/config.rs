use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 50099;
/// Smallest accepted listen queue length.
pub const MIN_BACKLOG: u32 = 1024;

/// Maximum number of empty reads for deployments with a dedicated thread per
/// connection.
pub const THREADED_MAX_IDLE_READS: u32 = 100;
/// Maximum number of empty reads for deployments driving all I/O from a
/// single cooperative loop, where each connection is polled less often.
pub const COOPERATIVE_MAX_IDLE_READS: u32 = 10000;
/// Largest number of doubles per timestep accepted during the handshake.
pub const DEFAULT_MAX_DATA_SIZE: u32 = 1 << 26;

/// Configuration settings for server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// IP address to bind the listener to
    pub address: IpAddr,
    /// Listening port, 0 picks any free port
    pub port: u16,
    /// Length of the pending connections queue
    pub backlog: u32,

    /// Number of consecutive empty reads after which a connection fails
    pub max_idle_reads: u32,
    /// Largest data size a client may negotiate, in doubles per timestep
    pub max_data_size: u32,
    /// Wait between accept attempts when no connection is pending
    pub poll_wait_ms: u64,
    /// Wait after an empty read before trying again
    pub idle_wait_ms: u64,
    /// Wait after a frame was written to a target client
    pub frame_wait_ms: u64,
    /// Time limit for writing out a single frame
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_PORT,
            backlog: MIN_BACKLOG,
            max_idle_reads: THREADED_MAX_IDLE_READS,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            poll_wait_ms: 1,
            idle_wait_ms: 1,
            frame_wait_ms: 1,
            write_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Creates default config listening on the given port.
    pub fn with_port(port: u16) -> Self {
        ServerConfig {
            port,
            ..Default::default()
        }
    }

    /// Reads config from a toml file. Missing keys take default values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    /// Checks whether the settings make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.backlog < MIN_BACKLOG {
            return Err(Error::Config(format!(
                "backlog must be at least {}, got {}",
                MIN_BACKLOG, self.backlog
            )));
        }
        if self.max_idle_reads == 0 {
            return Err(Error::Config(
                "max_idle_reads must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn frame_wait(&self) -> Duration {
        Duration::from_millis(self.frame_wait_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

impl std::str::FromStr for ServerConfig {
    type Err = Error;
    fn from_str(s: &str) -> core::result::Result<Self, Error> {
        let config: ServerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 50099);
        assert_eq!(config.backlog, 1024);
        assert_eq!(config.max_idle_reads, 100);
        assert_eq!(config.max_data_size, DEFAULT_MAX_DATA_SIZE);
        assert_eq!(config.write_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ServerConfig = "port = 6000\nmax_idle_reads = 10000\n".parse().unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.max_idle_reads, COOPERATIVE_MAX_IDLE_READS);
        assert_eq!(config.backlog, MIN_BACKLOG);
        assert_eq!(config.address, IpAddr::from([0, 0, 0, 0]));
    }

    #[test]
    fn small_backlog_rejected() {
        let res = "backlog = 16".parse::<ServerConfig>();
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn unknown_keys_rejected() {
        let res = "prot = 16".parse::<ServerConfig>();
        assert!(matches!(res, Err(Error::TomlError(_))));
    }

    #[test]
    fn toml_round_trip() {
        let config = ServerConfig::with_port(7000);
        let parsed: ServerConfig = config.to_toml().unwrap().parse().unwrap();
        assert_eq!(parsed, config);
    }
}
