//! Errors raised while turning options into queries and transports.

use qlook_proto::error::EncodeError;
use thiserror::Error;

/// An invalid configuration. Always detected before any network traffic happens.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid client subnet: {0}.")]
    InvalidSubnet(String),
    #[error("Client subnet prefix /{prefix} is too long for an {family} address.")]
    InvalidSubnetPrefix { prefix: u8, family: &'static str },
    #[error("Invalid client cookie (expected hex digits): {0}.")]
    InvalidCookie(String),
    #[error("Unsupported protocol: {0}.")]
    UnsupportedProtocol(String),
    #[error("Invalid server {server}: {reason}.")]
    InvalidServer { server: String, reason: String },
    #[error("Invalid DNS stamp: {0}.")]
    InvalidDnsStamp(String),
    #[error("Invalid DNSCrypt provider key: {0}.")]
    InvalidDnsCryptKey(String),
    #[error("Invalid TLS server name: {0}.")]
    InvalidTlsServerName(String),
    #[error("TLS configuration error: {0}.")]
    Tls(String),
    #[error("Could not encode query: {0}")]
    Encoding(#[from] EncodeError),
}

impl ConfigError {
    pub(crate) fn invalid_server(server: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidServer {
            server: server.to_string(),
            reason: reason.into(),
        }
    }
}
