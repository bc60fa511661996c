//! Socket-level helpers shared by the transports: server addresses, UDP sockets, TCP streams and
//! the two-byte length framing of DNS over stream transports.

use std::fmt::Display;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ConfigError;

/// Contains all info needed to connect to a nameserver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nameserver {
    /// Nameserver's hostname. If this is [`None`], `ip` must be [`Some`].
    pub hostname: Option<String>,
    /// Nameserver's IP address. If this is [`None`], `hostname` must be [`Some`].
    pub ip: Option<IpAddr>,
    pub port: u16,
}

impl Nameserver {
    /// Parses a server given as `host`, `host:port`, `ip`, `ip:port` or `[ipv6]:port`, optionally
    /// prefixed with a `scheme://` and followed by a path (both are ignored).
    ///
    /// # Examples
    /// ```rust
    /// use qlook::net::Nameserver;
    ///
    /// let ns = Nameserver::parse("tls://dns.example:8853", 853).unwrap();
    /// assert_eq!(ns.hostname.as_deref(), Some("dns.example"));
    /// assert_eq!(ns.port, 8853);
    ///
    /// let ns = Nameserver::parse("2001:db8::53", 53).unwrap();
    /// assert_eq!(ns.to_string(), "[2001:db8::53]:53");
    ///
    /// let ns = Nameserver::parse("[2001:db8::53]:5353", 53).unwrap();
    /// assert_eq!(ns.port, 5353);
    /// ```
    pub fn parse(server: &str, default_port: u16) -> Result<Self, ConfigError> {
        let rest = server.split_once("://").map_or(server, |(_, rest)| rest);
        let rest = rest.split_once('/').map_or(rest, |(authority, _)| authority);
        if rest.is_empty() {
            return Err(ConfigError::invalid_server(server, "empty host"));
        }

        let parse_port = |port: &str| {
            port.parse::<u16>()
                .map_err(|_| ConfigError::invalid_server(server, format!("invalid port {}", port)))
        };

        if let Some(bracketed) = rest.strip_prefix('[') {
            let (ip, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| ConfigError::invalid_server(server, "unclosed bracket"))?;
            let ip = ip
                .parse()
                .map_err(|_| ConfigError::invalid_server(server, "invalid IPv6 address"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => default_port,
                None => return Err(ConfigError::invalid_server(server, "garbage after address")),
            };
            return Ok(Self {
                hostname: None,
                ip: Some(ip),
                port,
            });
        }

        // a bare IPv6 address contains colons, but no port
        if let Ok(ip) = rest.parse::<IpAddr>() {
            return Ok(Self {
                hostname: None,
                ip: Some(ip),
                port: default_port,
            });
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, parse_port(port)?),
            None => (rest, default_port),
        };
        if host.is_empty() {
            return Err(ConfigError::invalid_server(server, "empty host"));
        }
        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(Self {
                hostname: None,
                ip: Some(ip),
                port,
            }),
            Err(_) => Ok(Self {
                hostname: Some(host.to_string()),
                ip: None,
                port,
            }),
        }
    }

    /// Returns the hostname if there is one, the IP address otherwise. Used as the TLS server
    /// name by default.
    pub fn host(&self) -> String {
        match (&self.hostname, self.ip) {
            (Some(hostname), _) => hostname.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Resolves the nameserver to its first socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.to_socket_addrs()
            .with_context(|| format!("Could not resolve {}.", self))?
            .next()
            .ok_or_else(|| anyhow!("Could not get socket address for {}.", self))
    }
}

impl Display for Nameserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ip = self.ip.map(|ip| {
            // display mapped IPv4 addresses as IPv4
            match ip {
                IpAddr::V6(ipv6) => match ipv6.to_ipv4_mapped() {
                    Some(ipv4) => ipv4.to_string(),
                    None => format!("[{}]", ipv6),
                },
                _ => ip.to_string(),
            }
        });
        match (ip, &self.hostname) {
            (Some(ip), Some(hostname)) => {
                write!(f, "{}:{} ({})", ip, self.port, hostname)
            }
            (Some(ip), None) => {
                write!(f, "{}:{}", ip, self.port)
            }
            (None, Some(hostname)) => {
                write!(f, "{}:{}", hostname, self.port)
            }
            (None, None) => {
                write!(f, "unknown nameserver")
            }
        }
    }
}

impl ToSocketAddrs for Nameserver {
    type Iter = std::vec::IntoIter<SocketAddr>;
    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        if let Some(ip) = self.ip {
            Ok(vec![(ip, self.port).into()].into_iter())
        } else if let Some(hostname) = &self.hostname {
            (hostname.as_str(), self.port).to_socket_addrs()
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                "Nameserver has neither IP nor hostname",
            ))
        }
    }
}

/// Creates a UDP socket connected to `nameserver`, with read and write timeouts set.
pub fn udp_socket(nameserver: &Nameserver, timeout: Duration) -> Result<UdpSocket> {
    // on windows, binding to :: and connecting to an IPv4 address fails on machines without IPv6
    // connectivity. so the bind address matches the nameserver's address family, and for
    // hostnames IPv6 is tried first, then IPv4.
    let socket = if let Some(ip_addr) = nameserver.ip {
        let bind_addr = if ip_addr.is_ipv6() { "::" } else { "0.0.0.0" };
        let socket = UdpSocket::bind((bind_addr, 0)).context("Could not create UDP socket.")?;
        socket
            .connect(nameserver)
            .with_context(|| format!("Could not connect to {} via UDP.", nameserver))?;
        socket
    } else {
        let mut connected = None;
        let mut last_err = None;
        for bind_addr in ["::", "0.0.0.0"] {
            let socket = UdpSocket::bind((bind_addr, 0)).context("Could not create UDP socket.")?;
            match socket.connect(nameserver) {
                Ok(()) => {
                    connected = Some(socket);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        match (connected, last_err) {
            (Some(socket), _) => socket,
            (None, Some(e)) => {
                return Err(e).with_context(|| format!("Could not connect to {} via UDP.", nameserver))
            }
            (None, None) => bail!("Could not connect to {} via UDP.", nameserver),
        }
    };

    socket
        .set_write_timeout(Some(timeout))
        .context("Could not set UDP socket write timeout.")?;
    socket
        .set_read_timeout(Some(timeout))
        .context("Could not set UDP socket read timeout.")?;
    Ok(socket)
}

/// Opens a TCP connection to `nameserver`, trying each of its addresses in turn.
pub fn tcp_connect(nameserver: &Nameserver, timeout: Duration) -> Result<TcpStream> {
    let addrs = nameserver
        .to_socket_addrs()
        .with_context(|| format!("Could not resolve {}.", nameserver))?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream
                    .set_write_timeout(Some(timeout))
                    .context("Could not set TCP stream write timeout.")?;
                stream
                    .set_read_timeout(Some(timeout))
                    .context("Could not set TCP stream read timeout.")?;
                stream.set_nodelay(true).context("Could not set TCP_NODELAY.")?;
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    match last_err {
        Some(e) => Err(e).with_context(|| {
            format!("Could not connect to {} via TCP, is the server running?", nameserver)
        }),
        None => bail!("{} has no addresses.", nameserver),
    }
}

/// Writes `data` prefixed with its length as two bytes in network order (RFC 1035, Section 4.2.2).
pub fn write_framed(stream: &mut impl Write, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| anyhow!("Message of {} bytes is too long for TCP.", data.len()))?;
    let mut msg = Vec::with_capacity(data.len() + 2);
    msg.write_u16::<NetworkEndian>(len)?;
    msg.extend_from_slice(data);
    stream
        .write_all(&msg)
        .context("Could not write to stream.")?;
    stream.flush().context("Could not flush stream.")?;
    Ok(())
}

/// Reads one length-prefixed message.
///
/// Reads exactly as many bytes as the length prefix announces instead of reading to EOF, which
/// would only arrive once the server closes the connection or the read timeout elapses.
pub fn read_framed(stream: &mut impl Read) -> Result<Vec<u8>> {
    let len = stream
        .read_u16::<NetworkEndian>()
        .context("Could not read message length from stream.")?;
    let mut msg = vec![0; len as usize];
    stream
        .read_exact(&mut msg)
        .with_context(|| format!("Stream ended before all {} announced bytes arrived.", len))?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn parse_servers() {
        let ns = Nameserver::parse("192.0.2.53", 53).unwrap();
        assert_eq!(ns.ip, Some("192.0.2.53".parse().unwrap()));
        assert_eq!(ns.port, 53);

        let ns = Nameserver::parse("192.0.2.53:5300", 53).unwrap();
        assert_eq!(ns.port, 5300);
        assert!(ns.hostname.is_none());

        let ns = Nameserver::parse("quic://dns.example/ignored", 853).unwrap();
        assert_eq!(ns.hostname.as_deref(), Some("dns.example"));
        assert_eq!(ns.port, 853);
        assert_eq!(ns.host(), "dns.example");
    }

    #[test]
    fn reject_invalid_servers() {
        for server in ["", "udp://", ":53", "dns.example:port", "[2001:db8::1", "[::1]x"] {
            assert!(
                matches!(
                    Nameserver::parse(server, 53),
                    Err(ConfigError::InvalidServer { .. })
                ),
                "{}",
                server
            );
        }
    }

    #[test]
    fn mapped_address_displays_as_ipv4() {
        let ns = Nameserver::parse("[::ffff:192.0.2.1]:53", 53).unwrap();
        assert_eq!(ns.to_string(), "192.0.2.1:53");
    }

    #[test]
    fn framing() {
        let mut buf = Vec::new();
        write_framed(&mut buf, b"hello").unwrap();
        assert_eq!(buf, b"\x00\x05hello");

        // a second message behind the first one is not consumed
        buf.extend_from_slice(b"\x00\x01!");
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_framed(&mut cursor).unwrap(), b"hello");
        assert_eq!(read_framed(&mut cursor).unwrap(), b"!");

        let mut short = Cursor::new(b"\x00\x09abc".to_vec());
        assert!(read_framed(&mut short).is_err());
    }
}
