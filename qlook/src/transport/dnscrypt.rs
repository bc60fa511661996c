//! DNSCrypt, version 2.
//!
//! The resolver publishes short-lived certificates, signed with the provider's long-term Ed25519
//! key, as TXT records of the provider name. Each certificate names the encryption system, the
//! resolver's X25519 key and the magic that prefixes queries encrypted for it. Queries are boxed
//! with a fresh client key per exchange.

use std::io::Cursor;
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{LittleEndian, NetworkEndian, ReadBytesExt};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::aead::AeadInPlace;
use crypto_box::{ChaChaBox, PublicKey, SalsaBox, SecretKey};
use data_encoding::{BASE64URL_NOPAD, HEXLOWER_PERMISSIVE};
use ed25519_dalek::{Signature, VerifyingKey};
use qlook_proto::{Class, HeaderFlags, Message, Name, Question, RecordType};
use tracing::{debug, trace};

use super::{parse_reply, Common, Exchange, PlainTransport};
use crate::error::ConfigError;
use crate::net::{read_framed, tcp_connect, udp_socket, write_framed, Nameserver};

const STAMP_PREFIX: &str = "sdns://";
const STAMP_PROTOCOL: u8 = 0x01;
const DEFAULT_PORT: u16 = 443;

const CERT_MAGIC: &[u8; 4] = b"DNSC";
const CERT_LEN: usize = 124;
/// The signed part of a certificate starts behind magic, versions and signature.
const SIGNED_OFFSET: usize = 72;

const RESOLVER_MAGIC: &[u8; 8] = b"r6fnvWj8";
const HALF_NONCE_LEN: usize = 12;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const QUERY_HEADER_LEN: usize = 8 + 32 + HALF_NONCE_LEN;
const REPLY_HEADER_LEN: usize = 8 + NONCE_LEN;

const PAD_BLOCK: usize = 64;
const MIN_UDP_QUERY_LEN: usize = 256;

/// Where the resolver's identity comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DnsCryptSource {
    /// An `sdns://` server stamp.
    Stamp(String),
    /// The provider's Ed25519 key as hex and its name. The address is the transport's server.
    Manual { public_key: String, provider: String },
}

/// A decoded DNSCrypt server stamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerStamp {
    /// Informal properties (DNSSEC, no logs, no filter).
    pub props: u64,
    pub address: String,
    pub provider_key: [u8; 32],
    pub provider_name: String,
}

impl ServerStamp {
    /// Decodes an `sdns://` stamp for the DNSCrypt protocol.
    ///
    /// # Examples
    /// ```rust
    /// use qlook::transport::dnscrypt::ServerStamp;
    ///
    /// assert!(ServerStamp::parse("sdns://AgcAAAAAAAAA").is_err());
    /// assert!(ServerStamp::parse("https://dns.example").is_err());
    /// ```
    pub fn parse(stamp: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidDnsStamp(format!("{}: {}", stamp, reason));

        let encoded = stamp
            .strip_prefix(STAMP_PREFIX)
            .ok_or_else(|| invalid("missing sdns:// prefix"))?;
        let bytes = BASE64URL_NOPAD
            .decode(encoded.trim_end_matches('=').as_bytes())
            .map_err(|_| invalid("not base64url"))?;

        let mut cursor = Cursor::new(bytes.as_slice());
        let protocol = cursor.read_u8().map_err(|_| invalid("empty"))?;
        if protocol != STAMP_PROTOCOL {
            return Err(invalid(&format!("protocol {:#04x} is not DNSCrypt", protocol)));
        }
        let props = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| invalid("truncated properties"))?;

        let address = read_lp(&mut cursor).ok_or_else(|| invalid("truncated address"))?;
        let address = String::from_utf8(address).map_err(|_| invalid("address is not UTF-8"))?;
        if address.is_empty() {
            return Err(invalid("no address"));
        }

        let key = read_lp(&mut cursor).ok_or_else(|| invalid("truncated provider key"))?;
        let provider_key: [u8; 32] = key
            .as_slice()
            .try_into()
            .map_err(|_| invalid("provider key is not 32 bytes"))?;

        let name = read_lp(&mut cursor).ok_or_else(|| invalid("truncated provider name"))?;
        let provider_name =
            String::from_utf8(name).map_err(|_| invalid("provider name is not UTF-8"))?;
        if provider_name.is_empty() {
            return Err(invalid("no provider name"));
        }

        Ok(Self {
            props,
            address,
            provider_key,
            provider_name,
        })
    }
}

/// Reads a string prefixed with a single length byte.
fn read_lp(cursor: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let len = cursor.read_u8().ok()? as usize;
    let start = cursor.position() as usize;
    let bytes = cursor.get_ref().get(start..start + len)?.to_vec();
    cursor.set_position((start + len) as u64);
    Some(bytes)
}

/// The encryption system of a certificate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EsVersion {
    XSalsa20Poly1305 = 1,
    XChaCha20Poly1305 = 2,
}

/// A verified resolver certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    pub es_version: EsVersion,
    pub resolver_pk: [u8; 32],
    pub client_magic: [u8; 8],
    pub serial: u32,
    pub ts_start: u32,
    pub ts_end: u32,
}

impl Certificate {
    /// Parses a certificate and checks its signature against the provider key.
    pub fn parse(bytes: &[u8], provider_key: &[u8; 32]) -> Result<Self> {
        if bytes.len() != CERT_LEN {
            bail!("Certificate has {} bytes, expected {}.", bytes.len(), CERT_LEN);
        }
        if &bytes[..4] != CERT_MAGIC {
            bail!("Certificate does not start with the DNSC magic.");
        }

        let mut cursor = Cursor::new(&bytes[4..]);
        let es_version = match cursor.read_u16::<NetworkEndian>()? {
            1 => EsVersion::XSalsa20Poly1305,
            2 => EsVersion::XChaCha20Poly1305,
            other => bail!("Unsupported encryption system version {}.", other),
        };

        let verifying_key =
            VerifyingKey::from_bytes(provider_key).context("Invalid provider key.")?;
        let signature: [u8; 64] = bytes[8..SIGNED_OFFSET].try_into()?;
        verifying_key
            .verify_strict(&bytes[SIGNED_OFFSET..], &Signature::from_bytes(&signature))
            .context("Certificate signature does not match the provider key.")?;

        let signed = &bytes[SIGNED_OFFSET..];
        let mut cursor = Cursor::new(&signed[40..]);
        Ok(Self {
            es_version,
            resolver_pk: signed[..32].try_into()?,
            client_magic: signed[32..40].try_into()?,
            serial: cursor.read_u32::<NetworkEndian>()?,
            ts_start: cursor.read_u32::<NetworkEndian>()?,
            ts_end: cursor.read_u32::<NetworkEndian>()?,
        })
    }

    pub fn is_valid_at(&self, now: u32) -> bool {
        self.ts_start <= now && now <= self.ts_end
    }
}

/// Picks the certificate valid at `now` with the highest serial; ties go to the newer
/// encryption system.
fn select_certificate(certs: Vec<Certificate>, now: u32) -> Option<Certificate> {
    certs
        .into_iter()
        .filter(|cert| cert.is_valid_at(now))
        .max_by_key(|cert| (cert.serial, cert.es_version))
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

/// ISO/IEC 7816-4 padding: a 0x80 byte, then zeros up to a multiple of 64 of at least `min_len`.
fn pad(data: &mut Vec<u8>, min_len: usize) {
    let len = (data.len() + 1).max(min_len);
    let len = (len + PAD_BLOCK - 1) / PAD_BLOCK * PAD_BLOCK;
    data.push(0x80);
    data.resize(len, 0);
}

fn unpad(data: &mut Vec<u8>) -> Result<()> {
    let end = data
        .iter()
        .rposition(|&b| b != 0)
        .ok_or_else(|| anyhow!("Reply has no padding marker."))?;
    if data[end] != 0x80 {
        bail!("Reply padding is malformed.");
    }
    data.truncate(end);
    Ok(())
}

enum Cipher {
    Salsa(SalsaBox),
    ChaCha(ChaChaBox),
}

impl Cipher {
    fn new(version: EsVersion, resolver_pk: &[u8; 32], secret: &SecretKey) -> Self {
        let public = PublicKey::from(*resolver_pk);
        match version {
            EsVersion::XSalsa20Poly1305 => Cipher::Salsa(SalsaBox::new(&public, secret)),
            EsVersion::XChaCha20Poly1305 => Cipher::ChaCha(ChaChaBox::new(&public, secret)),
        }
    }

    /// Encrypts `data` and returns the tag followed by the ciphertext.
    fn seal(&self, nonce: &[u8; NONCE_LEN], mut data: Vec<u8>) -> Result<Vec<u8>> {
        let nonce = GenericArray::from_slice(nonce);
        let tag = match self {
            Cipher::Salsa(cipher) => cipher.encrypt_in_place_detached(nonce, b"", &mut data),
            Cipher::ChaCha(cipher) => cipher.encrypt_in_place_detached(nonce, b"", &mut data),
        }
        .map_err(|e| anyhow!("Could not encrypt query: {}", e))?;

        let mut sealed = Vec::with_capacity(TAG_LEN + data.len());
        sealed.extend_from_slice(&tag);
        sealed.append(&mut data);
        Ok(sealed)
    }

    /// Reverses [`Cipher::seal()`].
    fn open(&self, nonce: &[u8; NONCE_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < TAG_LEN {
            bail!("Encrypted reply is too short.");
        }
        let nonce = GenericArray::from_slice(nonce);
        let tag = GenericArray::from_slice(&sealed[..TAG_LEN]);
        let mut data = sealed[TAG_LEN..].to_vec();
        match self {
            Cipher::Salsa(cipher) => cipher.decrypt_in_place_detached(nonce, b"", &mut data, tag),
            Cipher::ChaCha(cipher) => cipher.decrypt_in_place_detached(nonce, b"", &mut data, tag),
        }
        .map_err(|e| anyhow!("Could not decrypt reply: {}", e))?;
        Ok(data)
    }
}

/// The client side of one encrypted exchange.
struct Session {
    cipher: Cipher,
    half_nonce: [u8; HALF_NONCE_LEN],
}

impl Session {
    fn new(cert: &Certificate, secret: &SecretKey) -> Self {
        Self {
            cipher: Cipher::new(cert.es_version, &cert.resolver_pk, secret),
            half_nonce: rand::random(),
        }
    }

    fn nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0; NONCE_LEN];
        nonce[..HALF_NONCE_LEN].copy_from_slice(&self.half_nonce);
        nonce
    }

    /// Builds `client magic | client public key | half nonce | box`.
    fn encrypt_query(
        &self,
        cert: &Certificate,
        client_pk: &PublicKey,
        mut query: Vec<u8>,
        min_len: usize,
    ) -> Result<Vec<u8>> {
        pad(&mut query, min_len);
        let sealed = self.cipher.seal(&self.nonce(), query)?;

        let mut packet = Vec::with_capacity(QUERY_HEADER_LEN + sealed.len());
        packet.extend_from_slice(&cert.client_magic);
        packet.extend_from_slice(client_pk.as_bytes());
        packet.extend_from_slice(&self.half_nonce);
        packet.extend_from_slice(&sealed);
        Ok(packet)
    }

    /// Checks `resolver magic | nonce | box` and returns the unpadded DNS message.
    fn decrypt_reply(&self, reply: &[u8]) -> Result<Vec<u8>> {
        if reply.len() < REPLY_HEADER_LEN + TAG_LEN {
            bail!("DNSCrypt reply of {} bytes is too short.", reply.len());
        }
        if &reply[..8] != RESOLVER_MAGIC {
            bail!("DNSCrypt reply does not start with the resolver magic.");
        }
        let nonce: [u8; NONCE_LEN] = reply[8..REPLY_HEADER_LEN].try_into()?;
        if nonce[..HALF_NONCE_LEN] != self.half_nonce {
            bail!("DNSCrypt reply nonce does not match the query.");
        }

        let mut data = self.cipher.open(&nonce, &reply[REPLY_HEADER_LEN..])?;
        unpad(&mut data)?;
        Ok(data)
    }
}

pub struct DnsCryptTransport {
    source: DnsCryptSource,
    nameserver: Nameserver,
    provider_key: [u8; 32],
    provider_name: Name,
    tcp: bool,
    udp_size: u16,
    common: Common,
    cert: Option<Certificate>,
    udp: Option<UdpSocket>,
    tcp_stream: Option<TcpStream>,
}

impl DnsCryptTransport {
    /// Creates a transport from a stamp or a manually configured provider. With `tcp`, queries
    /// (and the certificate lookup) go over TCP; otherwise UDP replies of up to `udp_size` bytes
    /// are accepted.
    pub fn new(
        source: DnsCryptSource,
        tcp: bool,
        udp_size: u16,
        common: Common,
    ) -> Result<Self, ConfigError> {
        let (nameserver, provider_key, provider_name) = match &source {
            DnsCryptSource::Stamp(stamp) => {
                let stamp = ServerStamp::parse(stamp)?;
                trace!(
                    address = stamp.address.as_str(),
                    provider = stamp.provider_name.as_str(),
                    "decoded DNS stamp"
                );
                let nameserver = Nameserver::parse(&stamp.address, DEFAULT_PORT)?;
                (nameserver, stamp.provider_key, stamp.provider_name)
            }
            DnsCryptSource::Manual {
                public_key,
                provider,
            } => {
                let key = HEXLOWER_PERMISSIVE
                    .decode(public_key.trim().as_bytes())
                    .map_err(|_| ConfigError::InvalidDnsCryptKey(public_key.clone()))?;
                let key: [u8; 32] = key
                    .as_slice()
                    .try_into()
                    .map_err(|_| ConfigError::InvalidDnsCryptKey(public_key.clone()))?;
                if provider.is_empty() {
                    return Err(ConfigError::invalid_server(
                        &common.server,
                        "DNSCrypt needs a provider name",
                    ));
                }
                let nameserver = Nameserver::parse(&common.server, DEFAULT_PORT)?;
                (nameserver, key, provider.clone())
            }
        };

        let provider_name = Name::from_ascii(&provider_name).map_err(|e| {
            ConfigError::invalid_server(&common.server, format!("provider name: {}", e))
        })?;

        Ok(Self {
            source,
            nameserver,
            provider_key,
            provider_name,
            tcp,
            udp_size,
            common,
            cert: None,
            udp: None,
            tcp_stream: None,
        })
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn source(&self) -> &DnsCryptSource {
        &self.source
    }

    /// Returns a currently valid certificate, fetching one if needed.
    fn certificate(&mut self) -> Result<Certificate> {
        let now = unix_now();
        if let Some(cert) = self.cert.as_ref().filter(|cert| cert.is_valid_at(now)) {
            return Ok(cert.clone());
        }

        let query = Message::new_query(
            rand::random(),
            Question::new(self.provider_name.clone(), RecordType::TXT, Class::IN),
            HeaderFlags {
                rd: true,
                ..Default::default()
            },
        );
        let mut resolver = PlainTransport::with_nameserver(
            self.nameserver.clone(),
            self.tcp,
            self.udp_size,
            self.common.clone(),
        );
        debug!(provider = %self.provider_name, server = %self.nameserver, "fetching DNSCrypt certificates");
        let reply = resolver
            .exchange(&query)
            .context("Could not fetch DNSCrypt certificates.")?;
        resolver.close();

        let certs = reply
            .answer_records()
            .filter_map(|record| record.rdata.as_txt())
            .filter_map(|txt| match Certificate::parse(&txt.data(), &self.provider_key) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    debug!("ignoring DNSCrypt certificate: {:#}", e);
                    None
                }
            })
            .collect();
        let cert = select_certificate(certs, now)
            .ok_or_else(|| anyhow!("{} offers no valid DNSCrypt certificate.", self.provider_name))?;
        debug!(serial = cert.serial, version = ?cert.es_version, "using DNSCrypt certificate");

        self.cert = Some(cert.clone());
        Ok(cert)
    }

    fn send_udp(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let socket = match self.udp.take() {
            Some(socket) => socket,
            None => udp_socket(&self.nameserver, self.common.timeout)?,
        };
        socket
            .send(packet)
            .with_context(|| format!("Could not send query to {}.", self.nameserver))?;

        let mut buf = vec![0; self.udp_size.max(512) as usize];
        let len = socket
            .recv(&mut buf)
            .with_context(|| format!("{} did not reply in time.", self.nameserver))?;
        buf.truncate(len);

        if self.common.reuse_conn {
            self.udp = Some(socket);
        }
        Ok(buf)
    }

    fn send_tcp(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        if let Some(mut stream) = self.tcp_stream.take() {
            match write_framed(&mut stream, packet).and_then(|_| read_framed(&mut stream)) {
                Ok(reply) => {
                    self.tcp_stream = Some(stream);
                    return Ok(reply);
                }
                Err(e) => debug!(server = %self.nameserver, "reused TCP connection failed, reconnecting: {:#}", e),
            }
        }

        let mut stream = tcp_connect(&self.nameserver, self.common.timeout)?;
        write_framed(&mut stream, packet)?;
        let reply = read_framed(&mut stream)?;
        if self.common.reuse_conn {
            self.tcp_stream = Some(stream);
        } else {
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(reply)
    }
}

impl Exchange for DnsCryptTransport {
    fn exchange(&mut self, query: &Message) -> Result<Message> {
        let cert = self.certificate()?;
        let data = query.encode().context("Could not encode query.")?;

        let secret = SecretKey::from(rand::random::<[u8; 32]>());
        let session = Session::new(&cert, &secret);
        let min_len = if self.tcp { 0 } else { MIN_UDP_QUERY_LEN };
        let packet = session.encrypt_query(&cert, &secret.public_key(), data, min_len)?;
        if !self.tcp && packet.len() > self.udp_size as usize {
            bail!(
                "Encrypted query of {} bytes exceeds the UDP size of {}.",
                packet.len(),
                self.udp_size
            );
        }

        let reply = if self.tcp {
            self.send_tcp(&packet)?
        } else {
            self.send_udp(&packet)?
        };
        let reply = session.decrypt_reply(&reply)?;
        parse_reply(&reply, query.header.msg_id)
    }

    fn close(&mut self) {
        self.udp = None;
        if let Some(stream) = self.tcp_stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
pub(super) mod tests {
    use std::time::Duration;

    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    pub(in crate::transport) fn stamp(address: &str, key: &[u8], name: &str) -> String {
        let mut bytes = vec![STAMP_PROTOCOL];
        bytes.extend_from_slice(&7u64.to_le_bytes());
        for field in [address.as_bytes(), key, name.as_bytes()] {
            bytes.push(field.len() as u8);
            bytes.extend_from_slice(field);
        }
        format!("{}{}", STAMP_PREFIX, BASE64URL_NOPAD.encode(&bytes))
    }

    fn common(server: &str) -> Common {
        Common {
            server: server.into(),
            reuse_conn: false,
            timeout: Duration::from_secs(1),
        }
    }

    fn signed_cert(
        signer: &SigningKey,
        version: u16,
        resolver_pk: &[u8; 32],
        serial: u32,
        validity: (u32, u32),
    ) -> Vec<u8> {
        let mut signed = Vec::new();
        signed.extend_from_slice(resolver_pk);
        signed.extend_from_slice(b"qlookmgc");
        signed.extend_from_slice(&serial.to_be_bytes());
        signed.extend_from_slice(&validity.0.to_be_bytes());
        signed.extend_from_slice(&validity.1.to_be_bytes());

        let mut cert = CERT_MAGIC.to_vec();
        cert.extend_from_slice(&version.to_be_bytes());
        cert.extend_from_slice(&0u16.to_be_bytes());
        cert.extend_from_slice(&signer.sign(&signed).to_bytes());
        cert.extend_from_slice(&signed);
        cert
    }

    #[test]
    fn stamp_fields() {
        let stamp = ServerStamp::parse(&stamp(
            "192.0.2.53:8443",
            &[0xab; 32],
            "2.dnscrypt-cert.example",
        ))
        .unwrap();
        assert_eq!(stamp.props, 7);
        assert_eq!(stamp.address, "192.0.2.53:8443");
        assert_eq!(stamp.provider_key, [0xab; 32]);
        assert_eq!(stamp.provider_name, "2.dnscrypt-cert.example");
    }

    #[test]
    fn stamp_with_short_key_is_rejected() {
        let res = ServerStamp::parse(&stamp("192.0.2.53", &[1; 16], "2.dnscrypt-cert.example"));
        assert!(matches!(res, Err(ConfigError::InvalidDnsStamp(_))));
    }

    #[test]
    fn stamp_address_gets_default_port() {
        let source = DnsCryptSource::Stamp(stamp("192.0.2.53", &[1; 32], "2.dnscrypt-cert.example"));
        let transport = DnsCryptTransport::new(source, false, 1252, common("sdns://")).unwrap();
        assert_eq!(transport.nameserver.port, 443);
        assert_eq!(transport.provider_key, [1; 32]);
    }

    #[test]
    fn manual_key_must_be_32_bytes_of_hex() {
        for key in ["zz".repeat(32), "00".repeat(31)] {
            let source = DnsCryptSource::Manual {
                public_key: key,
                provider: "2.dnscrypt-cert.example".into(),
            };
            assert!(matches!(
                DnsCryptTransport::new(source, false, 1252, common("192.0.2.53")),
                Err(ConfigError::InvalidDnsCryptKey(_))
            ));
        }
    }

    #[test]
    fn padding() {
        let mut data = vec![1; 30];
        pad(&mut data, MIN_UDP_QUERY_LEN);
        assert_eq!(data.len(), 256);
        assert_eq!(data[30], 0x80);

        let mut data = vec![1; 64];
        pad(&mut data, 0);
        assert_eq!(data.len(), 128);

        unpad(&mut data).unwrap();
        assert_eq!(data, vec![1; 64]);
        assert!(unpad(&mut vec![1, 0, 0]).is_err());
    }

    #[test]
    fn certificate_signature_is_checked() {
        let signer = SigningKey::from_bytes(&[7; 32]);
        let provider_key = signer.verifying_key().to_bytes();
        let bytes = signed_cert(&signer, 2, &[9; 32], 3, (100, 200));

        let cert = Certificate::parse(&bytes, &provider_key).unwrap();
        assert_eq!(cert.es_version, EsVersion::XChaCha20Poly1305);
        assert_eq!(cert.resolver_pk, [9; 32]);
        assert_eq!(&cert.client_magic, b"qlookmgc");
        assert_eq!((cert.serial, cert.ts_start, cert.ts_end), (3, 100, 200));

        let mut tampered = bytes.clone();
        tampered[CERT_LEN - 1] ^= 1;
        assert!(Certificate::parse(&tampered, &provider_key).is_err());

        let other = SigningKey::from_bytes(&[8; 32]).verifying_key().to_bytes();
        assert!(Certificate::parse(&bytes, &other).is_err());
    }

    #[test]
    fn highest_valid_serial_wins() {
        let signer = SigningKey::from_bytes(&[7; 32]);
        let key = signer.verifying_key().to_bytes();
        let certs = vec![
            signed_cert(&signer, 1, &[1; 32], 5, (100, 200)),
            signed_cert(&signer, 2, &[2; 32], 9, (300, 400)),
            signed_cert(&signer, 2, &[3; 32], 6, (100, 200)),
        ]
        .iter()
        .map(|bytes| Certificate::parse(bytes, &key).unwrap())
        .collect();

        let cert = select_certificate(certs, 150).unwrap();
        assert_eq!(cert.serial, 6);
        assert!(select_certificate(Vec::new(), 150).is_none());
    }

    #[test]
    fn resolver_can_open_query_and_client_can_open_reply() {
        let resolver_secret = SecretKey::from([5; 32]);
        let cert = Certificate {
            es_version: EsVersion::XSalsa20Poly1305,
            resolver_pk: *resolver_secret.public_key().as_bytes(),
            client_magic: *b"qlookmgc",
            serial: 1,
            ts_start: 0,
            ts_end: u32::MAX,
        };
        let client_secret = SecretKey::from([6; 32]);
        let session = Session::new(&cert, &client_secret);
        let packet = session
            .encrypt_query(&cert, &client_secret.public_key(), b"query".to_vec(), MIN_UDP_QUERY_LEN)
            .unwrap();
        assert_eq!(&packet[..8], b"qlookmgc");
        assert_eq!(packet.len(), QUERY_HEADER_LEN + TAG_LEN + MIN_UDP_QUERY_LEN);

        // resolver side
        let client_pk: [u8; 32] = packet[8..40].try_into().unwrap();
        let resolver = Cipher::new(cert.es_version, &client_pk, &resolver_secret);
        let mut nonce = [0; NONCE_LEN];
        nonce[..HALF_NONCE_LEN].copy_from_slice(&packet[40..QUERY_HEADER_LEN]);
        let mut query = resolver.open(&nonce, &packet[QUERY_HEADER_LEN..]).unwrap();
        unpad(&mut query).unwrap();
        assert_eq!(query, b"query");

        nonce[HALF_NONCE_LEN..].copy_from_slice(&[4; 12]);
        let mut answer = b"answer".to_vec();
        pad(&mut answer, 0);
        let mut reply = RESOLVER_MAGIC.to_vec();
        reply.extend_from_slice(&nonce);
        reply.extend_from_slice(&resolver.seal(&nonce, answer).unwrap());

        assert_eq!(session.decrypt_reply(&reply).unwrap(), b"answer");

        reply[8] ^= 1;
        assert!(session.decrypt_reply(&reply).is_err());
    }
}
