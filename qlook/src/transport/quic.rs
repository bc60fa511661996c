//! DNS over QUIC (RFC 9250).
//!
//! `quinn` is asynchronous, so each transport drives its connection on its own single-threaded
//! `tokio` runtime, created on the first exchange.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use qlook_proto::Message;
use tokio::runtime::Runtime;
use tracing::debug;

use super::{parse_reply, Common, Exchange};
use crate::error::ConfigError;
use crate::net::Nameserver;

/// The largest DNS message plus its length prefix.
const MAX_STREAM_LEN: usize = u16::MAX as usize + 2;

pub struct QuicTransport {
    nameserver: Nameserver,
    server_name: String,
    alpn_protocols: Vec<Vec<u8>>,
    client_config: quinn::ClientConfig,
    length_prefix: bool,
    common: Common,
    runtime: Option<Runtime>,
    endpoint: Option<quinn::Endpoint>,
    connection: Option<quinn::Connection>,
}

impl QuicTransport {
    /// Creates a transport for `common.server`. `tls` must carry the ALPN tokens to offer.
    pub fn new(
        tls: Arc<rustls::ClientConfig>,
        server_name_override: Option<&str>,
        pmtud: bool,
        length_prefix: bool,
        common: Common,
    ) -> Result<Self, ConfigError> {
        let nameserver = Nameserver::parse(&common.server, 853)?;
        let server_name = match server_name_override.filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => nameserver.host(),
        };
        // validate early, quinn only complains when connecting
        super::tls_config::server_name(&server_name)?;

        let alpn_protocols = tls.alpn_protocols.clone();
        let client_config = quic_client_config(tls, pmtud, common.timeout)?;
        Ok(Self {
            nameserver,
            server_name,
            alpn_protocols,
            client_config,
            length_prefix,
            common,
            runtime: None,
            endpoint: None,
            connection: None,
        })
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    /// The ALPN tokens offered during the handshake.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }
}

/// Wraps `tls` into a `quinn` client configuration.
pub(crate) fn quic_client_config(
    tls: Arc<rustls::ClientConfig>,
    pmtud: bool,
    idle_timeout: Duration,
) -> Result<quinn::ClientConfig, ConfigError> {
    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
        .map_err(|e| ConfigError::Tls(format!("not usable for QUIC: {}", e)))?;
    let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));

    let mut transport = quinn::TransportConfig::default();
    if !pmtud {
        transport.mtu_discovery_config(None);
    }
    let idle_timeout = quinn::IdleTimeout::try_from(idle_timeout)
        .map_err(|_| ConfigError::Tls("timeout too large for QUIC".into()))?;
    transport.max_idle_timeout(Some(idle_timeout));
    client_config.transport_config(Arc::new(transport));
    Ok(client_config)
}

/// Builds the single-threaded runtime the QUIC-based transports run on.
pub(crate) fn new_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Could not create async runtime.")
}

/// Creates a client endpoint bound to the unspecified address of `remote`'s family.
pub(crate) fn client_endpoint(remote: SocketAddr) -> Result<quinn::Endpoint> {
    let bind_addr: SocketAddr = if remote.is_ipv6() {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    };
    quinn::Endpoint::client(bind_addr).context("Could not create QUIC endpoint.")
}

/// Opens a QUIC connection, giving up after `timeout`.
pub(crate) async fn connect(
    endpoint: &quinn::Endpoint,
    config: quinn::ClientConfig,
    remote: SocketAddr,
    server_name: &str,
    timeout: Duration,
) -> Result<quinn::Connection> {
    let connecting = endpoint
        .connect_with(config, remote, server_name)
        .with_context(|| format!("Could not start QUIC connection to {}.", remote))?;
    tokio::time::timeout(timeout, connecting)
        .await
        .map_err(|_| anyhow!("QUIC handshake with {} timed out.", remote))?
        .with_context(|| format!("QUIC handshake with {} failed.", remote))
}

/// Sends one DNS message on a new bidirectional stream and reads the reply.
async fn exchange_on_stream(
    conn: &quinn::Connection,
    data: &[u8],
    length_prefix: bool,
) -> Result<Vec<u8>> {
    let (mut send, mut recv) = conn
        .open_bi()
        .await
        .context("Could not open QUIC stream.")?;

    if length_prefix {
        send.write_all(&(data.len() as u16).to_be_bytes())
            .await
            .context("Could not write to QUIC stream.")?;
    }
    send.write_all(data)
        .await
        .context("Could not write to QUIC stream.")?;
    // the server only answers once the stream is finished
    send.finish().context("Could not finish QUIC stream.")?;

    let mut reply = recv
        .read_to_end(MAX_STREAM_LEN)
        .await
        .context("Could not read from QUIC stream.")?;

    if length_prefix {
        if reply.len() < 2 {
            bail!("QUIC reply of {} bytes has no length prefix.", reply.len());
        }
        let len = u16::from_be_bytes([reply[0], reply[1]]) as usize;
        if len != reply.len() - 2 {
            bail!(
                "QUIC reply has {} bytes, but its length prefix says {}.",
                reply.len() - 2,
                len
            );
        }
        reply.drain(..2);
    }
    Ok(reply)
}

impl Exchange for QuicTransport {
    fn exchange(&mut self, query: &Message) -> Result<Message> {
        // RFC 9250, Section 4.2.1: the message ID must be 0
        let mut wire_query = query.clone();
        wire_query.header.msg_id = 0;
        let data = wire_query.encode().context("Could not encode query.")?;

        let remote = self.nameserver.socket_addr()?;
        if self.runtime.is_none() {
            self.runtime = Some(new_runtime()?);
        }
        let Self {
            runtime,
            endpoint,
            connection,
            client_config,
            server_name,
            length_prefix,
            common,
            ..
        } = self;
        let runtime = runtime
            .as_ref()
            .ok_or_else(|| anyhow!("QUIC runtime missing."))?;

        let reply = runtime.block_on(async {
            if endpoint.is_none() {
                *endpoint = Some(client_endpoint(remote)?);
            }
            let endpoint = endpoint
                .as_ref()
                .ok_or_else(|| anyhow!("QUIC endpoint missing."))?;

            if let Some(conn) = connection.take() {
                if conn.close_reason().is_none() {
                    let attempt = tokio::time::timeout(
                        common.timeout,
                        exchange_on_stream(&conn, &data, *length_prefix),
                    )
                    .await;
                    match attempt {
                        Ok(Ok(reply)) => {
                            *connection = Some(conn);
                            return Ok(reply);
                        }
                        Ok(Err(e)) => debug!("reused QUIC connection failed, reconnecting: {:#}", e),
                        Err(_) => debug!("reused QUIC connection timed out, reconnecting"),
                    }
                }
            }

            let conn = connect(
                endpoint,
                client_config.clone(),
                remote,
                server_name,
                common.timeout,
            )
            .await?;
            let reply = tokio::time::timeout(
                common.timeout,
                exchange_on_stream(&conn, &data, *length_prefix),
            )
            .await
            .map_err(|_| anyhow!("{} did not reply in time.", remote))??;

            if common.reuse_conn {
                *connection = Some(conn);
            } else {
                conn.close(0u32.into(), b"");
            }
            Ok::<_, anyhow::Error>(reply)
        })?;

        let mut reply = parse_reply(&reply, 0)?;
        reply.header.msg_id = query.header.msg_id;
        Ok(reply)
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close(0u32.into(), b"");
        }
        if let (Some(runtime), Some(endpoint)) = (&self.runtime, self.endpoint.take()) {
            runtime.block_on(async {
                let _ = tokio::time::timeout(Duration::from_millis(200), endpoint.wait_idle()).await;
            });
        }
    }
}
