//! Server configuration and its validating builder.
//!
//! Every setting is a named field with a documented default; `build()`
//! validates the whole configuration at once (address parsing, IPv4
//! enforcement, TLS key-pair loading) and returns the first failure.
//! Later builder calls touching the same field overwrite earlier ones.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;
use crate::server::{ServerStatus, StatusListener};

/// Default bind address.
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";

/// Default graceful-shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Validated server configuration.
///
/// Construct via [`ServerConfig::builder()`]:
///
/// ```rust
/// use plinth::ServerConfig;
///
/// let config = ServerConfig::builder()
///     .address("0.0.0.0:14002")
///     .build()
///     .unwrap();
/// assert_eq!(config.addr().port(), 14002);
/// ```
pub struct ServerConfig {
    pub(crate) addr: SocketAddr,
    pub(crate) tls: Option<Arc<rustls::ServerConfig>>,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) status_listener: Option<StatusListener>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("tls", &self.tls.is_some())
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("status_listener", &self.status_listener.is_some())
            .finish()
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// The resolved bind address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether TLS material was configured and loaded.
    pub fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// The graceful-shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

/// Builder for [`ServerConfig`].
pub struct ServerConfigBuilder {
    address: String,
    ip: Option<IpAddr>,
    port: Option<u16>,
    tls_files: Option<(PathBuf, PathBuf)>,
    shutdown_timeout: Duration,
    status_listener: Option<StatusListener>,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            ip: None,
            port: None,
            tls_files: None,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            status_listener: None,
        }
    }

    /// Sets the full `host:port` bind address. Default `0.0.0.0:8080`.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Overrides the IP part of the bind address. Only IPv4 is accepted;
    /// anything else fails at `build()`.
    pub fn ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Overrides the port part of the bind address.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Configures a PEM certificate chain and private key for HTTPS.
    /// Loaded and validated at `build()`; minimum protocol version TLS 1.2.
    pub fn tls(mut self, cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        self.tls_files = Some((cert_file.into(), key_file.into()));
        self
    }

    /// Sets the graceful-shutdown timeout. Default 10 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Installs the initial status listener; it receives `(old, new)` for
    /// every lifecycle transition. Replaceable later via
    /// [`Server::status_listener`](crate::Server::status_listener).
    pub fn status_listener(
        mut self,
        listener: impl Fn(ServerStatus, ServerStatus) + Send + Sync + 'static,
    ) -> Self {
        self.status_listener = Some(Box::new(listener));
        self
    }

    /// Validates the configuration and loads TLS material if configured.
    pub fn build(self) -> Result<ServerConfig, Error> {
        let mut addr: SocketAddr = self.address.parse().map_err(|source| Error::Address {
            address: self.address.clone(),
            source,
        })?;

        if let Some(ip) = self.ip {
            if !ip.is_ipv4() {
                return Err(Error::InvalidIp(ip));
            }
            addr.set_ip(ip);
        }

        if let Some(port) = self.port {
            addr.set_port(port);
        }

        let tls = match &self.tls_files {
            Some((cert_file, key_file)) => Some(crate::tls::load_key_pair(cert_file, key_file)?),
            None => None,
        };

        Ok(ServerConfig {
            addr,
            tls,
            shutdown_timeout: self.shutdown_timeout,
            status_listener: self.status_listener,
        })
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
