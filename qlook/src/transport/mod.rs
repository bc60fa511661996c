//! DNS transports and the selection of the right one for a server.
//!
//! Every transport implements [`Exchange`]. [`new_transport()`] picks the implementation for a
//! protocol and configuration and returns it wrapped in the closed [`Transport`] enum.
//! Constructing a transport never touches the network; connections are opened by the first
//! exchange.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use qlook_proto::Message;
use tracing::{debug, trace, warn};

use crate::error::ConfigError;

pub mod dnscrypt;
pub mod https;
pub mod odoh;
pub mod plain;
pub mod quic;
pub mod tls;
pub mod tls_config;

pub use dnscrypt::{DnsCryptSource, DnsCryptTransport};
pub use https::{HttpMethod, HttpTransport, HttpVersion};
pub use odoh::OdohTransport;
pub use plain::PlainTransport;
pub use quic::QuicTransport;
pub use tls::TlsTransport;
pub use tls_config::{build_tls_config, TlsOptions, TlsVersion};

/// Sends a query and waits for the matching reply.
pub trait Exchange {
    /// Sends `query` and returns the parsed reply.
    ///
    /// A reply is only returned if its message ID matches the query's.
    fn exchange(&mut self, query: &Message) -> Result<Message>;

    /// Releases open connections. The transport stays usable; the next exchange reconnects.
    fn close(&mut self) {}
}

/// Settings every transport carries.
#[derive(Clone, Debug)]
pub struct Common {
    /// The server as given by the user.
    pub server: String,
    /// Keeps connections open between exchanges.
    pub reuse_conn: bool,
    pub timeout: Duration,
}

/// The wire protocols a server can be queried with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// UDP, falling back to TCP for truncated replies.
    Plain,
    Tcp,
    Tls,
    Quic,
    /// DNS over HTTPS, or Oblivious DoH when a proxy is configured.
    Http,
    DnsCrypt,
}

impl FromStr for Protocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "udp" => Ok(Protocol::Plain),
            "tcp" => Ok(Protocol::Tcp),
            "tls" | "dot" => Ok(Protocol::Tls),
            "quic" | "doq" => Ok(Protocol::Quic),
            "http" | "https" | "doh" => Ok(Protocol::Http),
            "dnscrypt" => Ok(Protocol::DnsCrypt),
            _ => Err(ConfigError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Plain => "plain",
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
            Protocol::Quic => "quic",
            Protocol::Http => "http",
            Protocol::DnsCrypt => "dnscrypt",
        };
        write!(f, "{}", s)
    }
}

impl Protocol {
    /// Infers the protocol from the scheme of a server string. Servers without a scheme are
    /// queried over plain DNS.
    ///
    /// # Examples
    /// ```rust
    /// use qlook::transport::Protocol;
    ///
    /// assert_eq!(Protocol::from_server("https://dns.example/dns-query").unwrap(), Protocol::Http);
    /// assert_eq!(Protocol::from_server("sdns://AQcAAAAAAAAA").unwrap(), Protocol::DnsCrypt);
    /// assert_eq!(Protocol::from_server("192.0.2.53:53").unwrap(), Protocol::Plain);
    /// assert!(Protocol::from_server("gopher://dns.example").is_err());
    /// ```
    pub fn from_server(server: &str) -> Result<Self, ConfigError> {
        if is_dns_stamp(server) {
            return Ok(Protocol::DnsCrypt);
        }
        match server.split_once("://") {
            Some((scheme, _)) => scheme.parse(),
            None => Ok(Protocol::Plain),
        }
    }

    /// The port used when a server string does not name one.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Plain | Protocol::Tcp => 53,
            Protocol::Tls | Protocol::Quic => 853,
            Protocol::Http | Protocol::DnsCrypt => 443,
        }
    }
}

/// Transport settings, already defaulted.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub reuse_conn: bool,
    pub timeout: Duration,
    /// The UDP receive buffer of the plain transport.
    pub udp_buffer: u16,
    /// Overrides the TLS server name (SNI and certificate check) of DoT and DoQ.
    pub tls_server_name: Option<String>,

    pub http_user_agent: String,
    pub http_method: HttpMethod,
    /// Extra request headers as `Name: value` strings.
    pub http_headers: Vec<String>,
    pub http2: bool,
    pub http3: bool,

    /// Path MTU discovery for QUIC-based transports.
    pub pmtud: bool,
    pub quic_alpn_tokens: Vec<String>,
    /// Prefixes DoQ messages with their length (RFC 9250). Early drafts did without.
    pub quic_length_prefix: bool,

    pub dnscrypt_tcp: bool,
    pub dnscrypt_udp_size: u16,
    /// The provider's public key as hex, used when the server is not a stamp.
    pub dnscrypt_public_key: Option<String>,
    pub dnscrypt_provider: Option<String>,

    /// Sends DoH queries through this Oblivious DoH proxy.
    pub odoh_proxy: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reuse_conn: false,
            timeout: Duration::from_secs(5),
            udp_buffer: crate::options::DEFAULT_UDP_BUFFER,
            tls_server_name: None,
            http_user_agent: format!("qlook/{}", env!("CARGO_PKG_VERSION")),
            http_method: HttpMethod::Get,
            http_headers: Vec::new(),
            http2: false,
            http3: false,
            pmtud: true,
            quic_alpn_tokens: vec!["doq".to_string()],
            quic_length_prefix: true,
            dnscrypt_tcp: false,
            dnscrypt_udp_size: 1252,
            dnscrypt_public_key: None,
            dnscrypt_provider: None,
            odoh_proxy: None,
        }
    }
}

/// A transport of any protocol.
pub enum Transport {
    Plain(PlainTransport),
    Tls(TlsTransport),
    Quic(QuicTransport),
    Http(HttpTransport),
    Odoh(OdohTransport),
    DnsCrypt(DnsCryptTransport),
}

impl Transport {
    pub fn common(&self) -> &Common {
        match self {
            Transport::Plain(t) => t.common(),
            Transport::Tls(t) => t.common(),
            Transport::Quic(t) => t.common(),
            Transport::Http(t) => t.common(),
            Transport::Odoh(t) => t.common(),
            Transport::DnsCrypt(t) => t.common(),
        }
    }
}

impl Exchange for Transport {
    fn exchange(&mut self, query: &Message) -> Result<Message> {
        match self {
            Transport::Plain(t) => t.exchange(query),
            Transport::Tls(t) => t.exchange(query),
            Transport::Quic(t) => t.exchange(query),
            Transport::Http(t) => t.exchange(query),
            Transport::Odoh(t) => t.exchange(query),
            Transport::DnsCrypt(t) => t.exchange(query),
        }
    }

    fn close(&mut self) {
        match self {
            Transport::Plain(t) => t.close(),
            Transport::Tls(t) => t.close(),
            Transport::Quic(t) => t.close(),
            Transport::Http(t) => t.close(),
            Transport::Odoh(t) => t.close(),
            Transport::DnsCrypt(t) => t.close(),
        }
    }
}

/// Creates the transport for querying `server` with `protocol`.
///
/// - HTTP becomes Oblivious DoH if `config.odoh_proxy` is set, and DoH otherwise.
/// - DNSCrypt uses the server stamp if `server` is one and ignores any manually configured key
///   and provider; otherwise both must be configured.
/// - QUIC gets a copy of `tls` with the configured ALPN tokens.
/// - TCP is the plain transport without the UDP attempt.
///
/// Fails if the server string or a protocol-specific setting is invalid. No I/O happens.
pub fn new_transport(
    server: &str,
    protocol: Protocol,
    config: &TransportConfig,
    tls: &Arc<rustls::ClientConfig>,
) -> Result<Transport, ConfigError> {
    let common = Common {
        server: server.to_string(),
        reuse_conn: config.reuse_conn,
        timeout: config.timeout,
    };

    let transport = match protocol {
        Protocol::Http => match config.odoh_proxy.as_deref().filter(|p| !p.is_empty()) {
            Some(proxy) => {
                debug!(server, proxy, "using Oblivious DoH transport");
                Transport::Odoh(OdohTransport::new(server, proxy, common, tls.clone())?)
            }
            None => {
                let version = if config.http3 {
                    HttpVersion::Http3
                } else if config.http2 {
                    HttpVersion::Http2
                } else {
                    HttpVersion::Http1
                };
                debug!(server, ?version, method = ?config.http_method, "using DoH transport");
                Transport::Http(HttpTransport::new(
                    server,
                    https::Settings {
                        method: config.http_method,
                        version,
                        headers: parse_http_headers(&config.http_headers),
                        user_agent: config.http_user_agent.clone(),
                        pmtud: config.pmtud,
                    },
                    common,
                    tls.clone(),
                )?)
            }
        },
        Protocol::DnsCrypt => {
            let source = if is_dns_stamp(server) {
                trace!(server, "building DNSCrypt transport from stamp");
                DnsCryptSource::Stamp(server.to_string())
            } else {
                trace!(server, "building DNSCrypt transport from provider key and name");
                DnsCryptSource::Manual {
                    public_key: config.dnscrypt_public_key.clone().unwrap_or_default(),
                    provider: config.dnscrypt_provider.clone().unwrap_or_default(),
                }
            };
            Transport::DnsCrypt(DnsCryptTransport::new(
                source,
                config.dnscrypt_tcp,
                config.dnscrypt_udp_size,
                common,
            )?)
        }
        Protocol::Quic => {
            let mut quic_tls = (**tls).clone();
            quic_tls.alpn_protocols = config
                .quic_alpn_tokens
                .iter()
                .map(|token| token.as_bytes().to_vec())
                .collect();
            debug!(server, alpn = ?config.quic_alpn_tokens, "using DoQ transport");
            Transport::Quic(QuicTransport::new(
                Arc::new(quic_tls),
                config.tls_server_name.as_deref(),
                config.pmtud,
                config.quic_length_prefix,
                common,
            )?)
        }
        Protocol::Tls => {
            debug!(server, "using DoT transport");
            Transport::Tls(TlsTransport::new(
                tls.clone(),
                config.tls_server_name.as_deref(),
                common,
            )?)
        }
        Protocol::Tcp => {
            debug!(server, "using plain transport over TCP");
            Transport::Plain(PlainTransport::new(true, config.udp_buffer, common)?)
        }
        Protocol::Plain => {
            debug!(server, "using plain transport");
            Transport::Plain(PlainTransport::new(false, config.udp_buffer, common)?)
        }
    };

    Ok(transport)
}

/// Returns true iff `server` is a DNS server stamp (`sdns://...`).
pub fn is_dns_stamp(server: &str) -> bool {
    server.starts_with("sdns://")
}

/// Splits `Name: value` strings into a header map.
///
/// Names and values are trimmed and a name may appear several times. Entries without a colon are
/// dropped with a warning.
///
/// # Examples
/// ```rust
/// use qlook::transport::parse_http_headers;
///
/// let headers = parse_http_headers(&[
///     "X-Test: a".to_string(),
///     "X-Test:b".to_string(),
///     "X-Test:  value ".to_string(),
///     "Authorization: Bearer a:b".to_string(),
///     "garbage".to_string(),
/// ]);
/// assert_eq!(headers["X-Test"], vec!["a", "b", "value"]);
/// assert_eq!(headers["Authorization"], vec!["Bearer a:b"]);
/// assert_eq!(headers.len(), 2);
/// ```
pub fn parse_http_headers(headers: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for header in headers {
        match header.split_once(':') {
            Some((name, value)) => map
                .entry(name.trim().to_string())
                .or_default()
                .push(value.trim().to_string()),
            None => warn!(header = header.as_str(), "ignoring malformed HTTP header"),
        }
    }
    map
}

/// Parses a reply and checks that it answers the query with ID `expected_id`.
pub(crate) fn parse_reply(bytes: &[u8], expected_id: u16) -> Result<Message> {
    let reply = Message::parse(&mut Cursor::new(bytes)).context("Could not parse the reply.")?;
    if reply.header.msg_id != expected_id {
        bail!(
            "Reply ID {} does not match query ID {}.",
            reply.header.msg_id,
            expected_id
        );
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls() -> Arc<rustls::ClientConfig> {
        build_tls_config(&TlsOptions::default()).unwrap()
    }

    fn select(server: &str, protocol: &str, config: &TransportConfig) -> Transport {
        let protocol: Protocol = protocol.parse().unwrap();
        new_transport(server, protocol, config, &tls()).unwrap()
    }

    #[test]
    fn unknown_protocol_tag() {
        assert!(matches!(
            "carrier-pigeon".parse::<Protocol>(),
            Err(ConfigError::UnsupportedProtocol(tag)) if tag == "carrier-pigeon"
        ));
        assert_eq!("DoT".parse::<Protocol>().unwrap(), Protocol::Tls);
    }

    #[test]
    fn http_without_proxy_is_doh() {
        let config = TransportConfig {
            odoh_proxy: Some(String::new()),
            ..Default::default()
        };
        let transport = select("https://dns.example/dns-query", "https", &config);
        assert!(matches!(transport, Transport::Http(_)));
    }

    #[test]
    fn http_with_proxy_is_odoh() {
        let config = TransportConfig {
            odoh_proxy: Some("https://proxy.example/proxy".into()),
            ..Default::default()
        };
        let transport = select("https://target.example/dns-query", "http", &config);
        assert!(matches!(transport, Transport::Odoh(_)));
    }

    #[test]
    fn tcp_is_plain_preferring_tcp() {
        let config = TransportConfig::default();
        match select("192.0.2.53", "tcp", &config) {
            Transport::Plain(plain) => assert!(plain.prefers_tcp()),
            _ => panic!("expected plain transport"),
        }
        match select("192.0.2.53", "udp", &config) {
            Transport::Plain(plain) => assert!(!plain.prefers_tcp()),
            _ => panic!("expected plain transport"),
        }
    }

    #[test]
    fn quic_gets_alpn_tokens_on_a_copy() {
        let tls = tls();
        let config = TransportConfig {
            quic_alpn_tokens: vec!["doq".into(), "doq-i02".into()],
            ..Default::default()
        };
        let transport = new_transport("quic://dns.example", Protocol::Quic, &config, &tls).unwrap();
        match transport {
            Transport::Quic(quic) => assert_eq!(
                quic.alpn_protocols(),
                &[b"doq".to_vec(), b"doq-i02".to_vec()]
            ),
            _ => panic!("expected QUIC transport"),
        }
        assert!(tls.alpn_protocols.is_empty());
    }

    #[test]
    fn reuse_conn_is_carried_by_every_variant() {
        let config = TransportConfig {
            reuse_conn: true,
            dnscrypt_public_key: Some("00".repeat(32)),
            dnscrypt_provider: Some("2.dnscrypt-cert.example".into()),
            ..Default::default()
        };
        let cases = [
            ("192.0.2.53", "plain"),
            ("192.0.2.53", "tcp"),
            ("tls://dns.example", "tls"),
            ("quic://dns.example", "quic"),
            ("https://dns.example/dns-query", "https"),
            ("192.0.2.53:443", "dnscrypt"),
        ];
        for (server, protocol) in cases {
            let transport = select(server, protocol, &config);
            assert!(transport.common().reuse_conn, "{}", protocol);
            assert_eq!(transport.common().server, server);
        }

        let config = TransportConfig {
            odoh_proxy: Some("https://proxy.example/proxy".into()),
            ..config
        };
        let transport = select("https://target.example/dns-query", "https", &config);
        assert!(matches!(transport, Transport::Odoh(_)));
        assert!(transport.common().reuse_conn);
        assert_eq!(transport.common().server, "https://target.example/dns-query");
    }

    #[test]
    fn manual_dnscrypt_requires_key() {
        let config = TransportConfig {
            dnscrypt_provider: Some("2.dnscrypt-cert.example".into()),
            ..Default::default()
        };
        let res = new_transport("192.0.2.53", Protocol::DnsCrypt, &config, &tls());
        assert!(matches!(res, Err(ConfigError::InvalidDnsCryptKey(_))));
    }

    #[test]
    fn invalid_server_is_a_config_error() {
        let config = TransportConfig::default();
        let res = new_transport("192.0.2.53:port", Protocol::Plain, &config, &tls());
        assert!(matches!(res, Err(ConfigError::InvalidServer { .. })));
    }

    #[test]
    fn stamp_wins_over_manual_dnscrypt_settings() {
        let config = TransportConfig {
            dnscrypt_public_key: Some("zz".into()),
            dnscrypt_provider: Some(String::new()),
            ..Default::default()
        };
        let server = dnscrypt::tests::stamp("192.0.2.53", &[7; 32], "2.dnscrypt-cert.example");
        match new_transport(&server, Protocol::DnsCrypt, &config, &tls()) {
            Ok(Transport::DnsCrypt(t)) => {
                assert!(matches!(t.source(), DnsCryptSource::Stamp(s) if *s == server))
            }
            _ => panic!("expected DNSCrypt transport from stamp"),
        }
    }

    #[test]
    fn stamps_are_detected_by_prefix() {
        assert!(is_dns_stamp("sdns://AQcAAAAAAAAA"));
        assert!(!is_dns_stamp("https://sdns.example"));
    }
}
