//! DNS over TLS (RFC 7858).

use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use anyhow::{Context, Result};
use qlook_proto::Message;
use rustls::pki_types::ServerName;
use rustls::{ClientConnection, StreamOwned};
use tracing::debug;

use super::tls_config::server_name;
use super::{parse_reply, Common, Exchange};
use crate::error::ConfigError;
use crate::net::{read_framed, tcp_connect, write_framed, Nameserver};

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

pub struct TlsTransport {
    nameserver: Nameserver,
    server_name: ServerName<'static>,
    config: Arc<rustls::ClientConfig>,
    common: Common,
    stream: Option<TlsStream>,
}

impl TlsTransport {
    /// Creates a transport for `common.server`. The certificate is checked against `server_name`
    /// if given, and against the server's host otherwise.
    pub fn new(
        config: Arc<rustls::ClientConfig>,
        server_name_override: Option<&str>,
        common: Common,
    ) -> Result<Self, ConfigError> {
        let nameserver = Nameserver::parse(&common.server, 853)?;
        let name = match server_name_override.filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => nameserver.host(),
        };
        Ok(Self {
            server_name: server_name(&name)?,
            nameserver,
            config,
            common,
            stream: None,
        })
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    fn connect(&self) -> Result<TlsStream> {
        let conn = ClientConnection::new(self.config.clone(), self.server_name.clone())
            .context("Could not create TLS connection.")?;
        let socket = tcp_connect(&self.nameserver, self.common.timeout)?;
        Ok(StreamOwned::new(conn, socket))
    }
}

fn send_and_receive(stream: &mut TlsStream, data: &[u8]) -> Result<Vec<u8>> {
    // the handshake happens implicitly on the first write
    write_framed(stream, data).context("Could not write to TLS stream.")?;
    read_framed(stream).context("Could not read from TLS stream.")
}

impl Exchange for TlsTransport {
    fn exchange(&mut self, query: &Message) -> Result<Message> {
        let data = query.encode().context("Could not encode query.")?;

        if let Some(mut stream) = self.stream.take() {
            match send_and_receive(&mut stream, &data) {
                Ok(reply) => {
                    self.stream = Some(stream);
                    return parse_reply(&reply, query.header.msg_id);
                }
                Err(e) => {
                    debug!(server = %self.nameserver, "reused TLS connection failed, reconnecting: {:#}", e)
                }
            }
        }

        let mut stream = self
            .connect()
            .with_context(|| format!("Could not connect to {} via TLS.", self.nameserver))?;
        let reply = send_and_receive(&mut stream, &data)?;
        if self.common.reuse_conn {
            self.stream = Some(stream);
        } else {
            close_stream(stream);
        }
        parse_reply(&reply, query.header.msg_id)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            close_stream(stream);
        }
    }
}

fn close_stream(mut stream: TlsStream) {
    stream.conn.send_close_notify();
    let _ = stream.conn.write_tls(&mut stream.sock);
    let _ = stream.sock.shutdown(Shutdown::Both);
}
