use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::dns::ParseError;
use crate::server::Transport;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid zone domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid nameserver hostname: {0}")]
    InvalidHostname(String),

    #[error("Invalid admin email: {0}")]
    InvalidEmail(String),

    #[error("Invalid Redis URL: {0}")]
    InvalidRedisUrl(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Invalid NS check resolver: {0}")]
    InvalidResolver(String),

    #[error("Invalid boolean for {key}: {value}")]
    InvalidBool { key: &'static str, value: String },
}

/// Errors that end a listener, plus the per-message failures it logs and drops.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {transport} socket on {addr}: {source}")]
    Bind {
        transport: Transport,
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("{transport} listener failed: {source}")]
    Listener {
        transport: Transport,
        source: std::io::Error,
    },

    #[error("{0} listener task failed: {1}")]
    TaskFailed(Transport, String),

    #[error("Invalid DNS packet: {0}")]
    Malformed(#[from] ParseError),

    #[error("Expected DNS query, got response")]
    NotAQuery,
}

#[derive(Error, Debug)]
pub enum NsLookupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lookup timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    Parse(#[from] ParseError),

    #[error("Response ID {got} does not match query ID {expected}")]
    IdMismatch { expected: u16, got: u16 },

    #[error("Resolver answered with rcode {0}")]
    Rcode(u8),
}
