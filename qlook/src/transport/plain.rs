//! Plain DNS over UDP and TCP (RFC 1035).

use std::net::{Shutdown, TcpStream, UdpSocket};

use anyhow::{Context, Result};
use qlook_proto::Message;
use tracing::debug;

use super::{parse_reply, Common, Exchange};
use crate::error::ConfigError;
use crate::net::{read_framed, tcp_connect, udp_socket, write_framed, Nameserver};

/// UDP replies with a mismatching ID are skipped this many times before giving up.
const MAX_STRAY_REPLIES: usize = 8;

pub struct PlainTransport {
    nameserver: Nameserver,
    prefer_tcp: bool,
    udp_buffer: u16,
    common: Common,
    udp: Option<UdpSocket>,
    tcp: Option<TcpStream>,
}

impl PlainTransport {
    /// Creates a transport for `common.server`. With `prefer_tcp`, every query is sent over TCP;
    /// otherwise UDP is used and TCP only for truncated replies.
    pub fn new(prefer_tcp: bool, udp_buffer: u16, common: Common) -> Result<Self, ConfigError> {
        let nameserver = Nameserver::parse(&common.server, 53)?;
        Ok(Self::with_nameserver(nameserver, prefer_tcp, udp_buffer, common))
    }

    /// Creates a transport for an already parsed nameserver.
    pub(crate) fn with_nameserver(
        nameserver: Nameserver,
        prefer_tcp: bool,
        udp_buffer: u16,
        common: Common,
    ) -> Self {
        Self {
            nameserver,
            prefer_tcp,
            udp_buffer,
            common,
            udp: None,
            tcp: None,
        }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn prefers_tcp(&self) -> bool {
        self.prefer_tcp
    }

    fn exchange_udp(&mut self, data: &[u8], msg_id: u16) -> Result<Message> {
        let socket = match self.udp.take() {
            Some(socket) => socket,
            None => udp_socket(&self.nameserver, self.common.timeout)?,
        };

        socket
            .send(data)
            .with_context(|| format!("Could not send query to {}.", self.nameserver))?;

        let mut buf = vec![0; self.udp_buffer.max(512) as usize];
        let mut stray = 0;
        let reply = loop {
            let len = socket
                .recv(&mut buf)
                .with_context(|| format!("{} did not reply in time.", self.nameserver))?;
            match parse_reply(&buf[..len], msg_id) {
                Ok(reply) => break reply,
                Err(e) if stray < MAX_STRAY_REPLIES => {
                    stray += 1;
                    debug!(server = %self.nameserver, "discarding UDP reply: {:#}", e);
                }
                Err(e) => return Err(e),
            }
        };

        if self.common.reuse_conn {
            self.udp = Some(socket);
        }
        Ok(reply)
    }

    fn exchange_tcp(&mut self, data: &[u8], msg_id: u16) -> Result<Message> {
        if let Some(mut stream) = self.tcp.take() {
            match send_and_receive(&mut stream, data) {
                Ok(reply) => {
                    self.tcp = Some(stream);
                    return parse_reply(&reply, msg_id);
                }
                Err(e) => {
                    debug!(server = %self.nameserver, "reused TCP connection failed, reconnecting: {:#}", e)
                }
            }
        }

        let mut stream = tcp_connect(&self.nameserver, self.common.timeout)?;
        let reply = send_and_receive(&mut stream, data)?;
        if self.common.reuse_conn {
            self.tcp = Some(stream);
        } else {
            let _ = stream.shutdown(Shutdown::Both);
        }
        parse_reply(&reply, msg_id)
    }
}

fn send_and_receive(stream: &mut TcpStream, data: &[u8]) -> Result<Vec<u8>> {
    write_framed(stream, data)?;
    read_framed(stream)
}

impl Exchange for PlainTransport {
    fn exchange(&mut self, query: &Message) -> Result<Message> {
        let data = query.encode().context("Could not encode query.")?;
        let msg_id = query.header.msg_id;

        if !self.prefer_tcp {
            let reply = self.exchange_udp(&data, msg_id)?;
            if !reply.header.flags.tc {
                return Ok(reply);
            }
            debug!(server = %self.nameserver, "reply truncated, retrying over TCP");
        }

        self.exchange_tcp(&data, msg_id)
    }

    fn close(&mut self) {
        self.udp = None;
        if let Some(stream) = self.tcp.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
