//! Unified error type.

use std::net::IpAddr;
use std::path::PathBuf;

/// The error type returned by plinth's fallible operations.
///
/// Application-level failures (404, 500, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type covers
/// construction problems (bad address, bad TLS material, malformed route)
/// and lifecycle state conflicts (starting a running server, stopping a
/// stopped one). Per-route middleware resolution problems are logged and
/// skipped — they never surface here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configured bind address is not a valid `host:port` string.
    #[error("invalid bind address `{address}`: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    /// An IP override was given that is not an IPv4 address.
    #[error("invalid server IP `{0}`: only IPv4 is supported")]
    InvalidIp(IpAddr),

    /// The TLS certificate or private key could not be loaded.
    #[error("failed to load TLS material from `{path}`: {reason}")]
    Tls { path: PathBuf, reason: String },

    /// A route path or prefix could not be installed into the router.
    #[error("invalid route `{path}` under prefix `{prefix}`: {source}")]
    Route {
        prefix: String,
        path: String,
        source: matchit::InsertError,
    },

    /// A start was requested while the server is already starting or running.
    #[error("server is already running (or starting) on {0}")]
    AlreadyActive(String),

    /// A stop was requested while the server is already stopped.
    #[error("server is already stopped and not listening on {0}")]
    AlreadyStopped(String),

    /// An HTTPS start was requested without configured TLS material.
    #[error("https server can not start without a certificate and private key")]
    TlsNotConfigured,
}
