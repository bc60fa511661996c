//! The EDNS(0) `OPT` pseudo-record and its options.
//!
//! See [RFC 6891](https://www.rfc-editor.org/rfc/rfc6891) for the record itself and the IANA
//! [option code registry](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-11)
//! for the options.

use std::fmt::{self, Display};
use std::io::{Cursor, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use data_encoding::HEXLOWER;
use repr_with_fallback::repr_with_fallback;

use crate::error::{EncodeError, ParseError};
use crate::RecordType;

#[cfg(feature = "serde")]
use serde::Serialize;

repr_with_fallback! {
    /// The code of an EDNS option.
    #[cfg_attr(feature = "serde", derive(Serialize))]
    #[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
    #[non_exhaustive]
    pub enum OptionCode {
        /// [\[RFC 5001\]](https://www.rfc-editor.org/rfc/rfc5001)
        Nsid = 3,
        /// [\[RFC 7871\]](https://www.rfc-editor.org/rfc/rfc7871)
        ClientSubnet = 8,
        /// [\[RFC 7873\]](https://www.rfc-editor.org/rfc/rfc7873)
        Cookie = 10,
        /// [\[RFC 7830\]](https://www.rfc-editor.org/rfc/rfc7830)
        Padding = 12,
        Unknown(u16),
    }
}

/// Address family numbers used by the client subnet option.
pub const FAMILY_IPV4: u16 = 1;
pub const FAMILY_IPV6: u16 = 2;

/// The client subnet option's payload.
///
/// Only the first `ceil(source_prefix / 8)` bytes of the address are put on the wire, with all
/// bits beyond `source_prefix` cleared.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ClientSubnet {
    pub source_prefix: u8,
    /// Always zero in queries.
    pub scope_prefix: u8,
    pub address: IpAddr,
}

/// A single EDNS option.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum EdnsOption {
    /// Empty in queries; the server's identifier in responses.
    Nsid(Vec<u8>),
    ClientSubnet(ClientSubnet),
    /// The client cookie, optionally followed by the server cookie.
    Cookie(Vec<u8>),
    /// The given number of zero bytes.
    Padding(u16),
    Unknown(u16, Vec<u8>),
}

/// The `OPT` pseudo-record.
///
/// On the wire, the CLASS field holds `payload_size` and the TTL field holds the upper eight bits
/// of the extended RCODE, the EDNS version and the flags (of which only `DO` is defined).
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct OptRecord {
    /// The largest UDP payload the sender can reassemble.
    pub payload_size: u16,
    /// The upper eight bits of the 12 bit RCODE.
    pub ext_rcode: u8,
    pub version: u8,
    /// The `DO` bit. [\[RFC 3225\]](https://www.rfc-editor.org/rfc/rfc3225)
    pub dnssec_ok: bool,
    /// Options, in wire order.
    pub options: Vec<EdnsOption>,
}

impl ClientSubnet {
    /// Creates a client subnet option with a scope prefix of zero.
    pub fn new(address: IpAddr, source_prefix: u8) -> Self {
        Self {
            source_prefix,
            scope_prefix: 0,
            address,
        }
    }

    /// Returns the address family number ([`FAMILY_IPV4`] or [`FAMILY_IPV6`]).
    pub fn family(&self) -> u16 {
        match self.address {
            IpAddr::V4(_) => FAMILY_IPV4,
            IpAddr::V6(_) => FAMILY_IPV6,
        }
    }

    fn max_prefix(&self) -> u8 {
        match self.address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    /// Returns the truncated and masked address bytes as they are put on the wire.
    fn wire_address(&self) -> Result<Vec<u8>, EncodeError> {
        if self.source_prefix > self.max_prefix() {
            return Err(EncodeError::SubnetPrefix(self.source_prefix, self.family()));
        }
        let mut bytes = match self.address {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let prefix = self.source_prefix as usize;
        bytes.truncate((prefix + 7) / 8);
        if prefix % 8 != 0 {
            if let Some(last) = bytes.last_mut() {
                *last &= 0xff << (8 - prefix % 8);
            }
        }
        Ok(bytes)
    }

    fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut cursor = Cursor::new(data);
        let family = cursor.read_u16::<NetworkEndian>()?;
        let source_prefix = cursor.read_u8()?;
        let scope_prefix = cursor.read_u8()?;
        let addr_bytes = &data[4..];
        let address = match family {
            FAMILY_IPV4 if addr_bytes.len() <= 4 => {
                let mut octets = [0; 4];
                octets[..addr_bytes.len()].copy_from_slice(addr_bytes);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            FAMILY_IPV6 if addr_bytes.len() <= 16 => {
                let mut octets = [0; 16];
                octets[..addr_bytes.len()].copy_from_slice(addr_bytes);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            FAMILY_IPV4 | FAMILY_IPV6 => {
                return Err(ParseError::OptionLength(
                    OptionCode::ClientSubnet.into(),
                    data.len() as u16,
                ))
            }
            x => return Err(ParseError::SubnetFamily(x)),
        };
        Ok(Self {
            source_prefix,
            scope_prefix,
            address,
        })
    }
}

impl Display for ClientSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.address, self.source_prefix, self.scope_prefix
        )
    }
}

impl EdnsOption {
    /// Returns the option code of this option.
    pub fn code(&self) -> OptionCode {
        match self {
            EdnsOption::Nsid(_) => OptionCode::Nsid,
            EdnsOption::ClientSubnet(_) => OptionCode::ClientSubnet,
            EdnsOption::Cookie(_) => OptionCode::Cookie,
            EdnsOption::Padding(_) => OptionCode::Padding,
            EdnsOption::Unknown(code, _) => OptionCode::Unknown(*code),
        }
    }

    /// Encodes the option (code, length and data) into `buf` and returns the number of bytes
    /// written.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let data = match self {
            EdnsOption::Nsid(data) | EdnsOption::Cookie(data) | EdnsOption::Unknown(_, data) => {
                data.clone()
            }
            EdnsOption::ClientSubnet(subnet) => {
                let mut data = Vec::with_capacity(20);
                data.write_u16::<NetworkEndian>(subnet.family())?;
                data.write_u8(subnet.source_prefix)?;
                data.write_u8(subnet.scope_prefix)?;
                data.extend_from_slice(&subnet.wire_address()?);
                data
            }
            EdnsOption::Padding(len) => vec![0; *len as usize],
        };
        if data.len() > u16::MAX as usize - 4 {
            return Err(EncodeError::OptionTooLong(data.len()));
        }

        buf.write_u16::<NetworkEndian>(self.code().into())?;
        buf.write_u16::<NetworkEndian>(data.len() as u16)?;
        buf.write_all(&data)?;
        Ok(4 + data.len() as u16)
    }

    fn parse(code: u16, data: Vec<u8>) -> Result<Self, ParseError> {
        Ok(match OptionCode::from(code) {
            OptionCode::Nsid => EdnsOption::Nsid(data),
            OptionCode::ClientSubnet => EdnsOption::ClientSubnet(ClientSubnet::parse(&data)?),
            OptionCode::Cookie => EdnsOption::Cookie(data),
            OptionCode::Padding => EdnsOption::Padding(data.len() as u16),
            OptionCode::Unknown(code) => EdnsOption::Unknown(code, data),
        })
    }
}

impl Display for EdnsOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdnsOption::Nsid(data) if data.is_empty() => write!(f, "NSID: <requested>"),
            EdnsOption::Nsid(data) => {
                write!(f, "NSID: {}", HEXLOWER.encode(data))?;
                if data.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
                    write!(f, " (\"{}\")", String::from_utf8_lossy(data))?;
                }
                Ok(())
            }
            EdnsOption::ClientSubnet(subnet) => write!(f, "CLIENT-SUBNET: {}", subnet),
            EdnsOption::Cookie(data) => write!(f, "COOKIE: {}", HEXLOWER.encode(data)),
            EdnsOption::Padding(len) => write!(f, "PADDING: <{} bytes>", len),
            EdnsOption::Unknown(code, data) => {
                write!(f, "CODE{}: {}", code, HEXLOWER.encode(data))
            }
        }
    }
}

impl OptRecord {
    /// Creates an `OPT` record without any options.
    pub fn new(payload_size: u16, dnssec_ok: bool) -> Self {
        Self {
            payload_size,
            ext_rcode: 0,
            version: 0,
            dnssec_ok,
            options: Vec::new(),
        }
    }

    /// Returns the first option with the given code, if any.
    pub fn option(&self, code: OptionCode) -> Option<&EdnsOption> {
        self.options.iter().find(|o| o.code() == code)
    }

    /// Encodes a `OptRecord` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        let mut rdata = Vec::new();
        for option in &self.options {
            option.encode_into(&mut rdata)?;
        }
        if rdata.len() > u16::MAX as usize {
            return Err(EncodeError::OptionTooLong(rdata.len()));
        }

        // owner is always the root
        buf.write_u8(0)?;
        buf.write_u16::<NetworkEndian>(RecordType::OPT.into())?;
        buf.write_u16::<NetworkEndian>(self.payload_size)?;
        buf.write_u8(self.ext_rcode)?;
        buf.write_u8(self.version)?;
        buf.write_u16::<NetworkEndian>(if self.dnssec_ok { 1 << 15 } else { 0 })?;
        buf.write_u16::<NetworkEndian>(rdata.len() as u16)?;
        buf.write_all(&rdata)?;
        Ok(())
    }

    /// Parses the part of an `OPT` record following its owner name and type.
    pub(crate) fn parse_body(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let payload_size = msg.read_u16::<NetworkEndian>()?;
        let ext_rcode = msg.read_u8()?;
        let version = msg.read_u8()?;
        let dnssec_ok = msg.read_u16::<NetworkEndian>()? & (1 << 15) != 0;
        let rdlength = msg.read_u16::<NetworkEndian>()?;

        let mut rdata = vec![0; rdlength as usize];
        msg.read_exact(&mut rdata)?;

        let mut options = Vec::new();
        let mut rdata = Cursor::new(&rdata[..]);
        while (rdata.position() as usize) < rdlength as usize {
            let code = rdata.read_u16::<NetworkEndian>()?;
            let len = rdata.read_u16::<NetworkEndian>()?;
            let mut data = vec![0; len as usize];
            rdata
                .read_exact(&mut data)
                .map_err(|_| ParseError::OptionLength(code, len))?;
            options.push(EdnsOption::parse(code, data)?);
        }

        Ok(Self {
            payload_size,
            ext_rcode,
            version,
            dnssec_ok,
            options,
        })
    }

    /// Returns a string describing the `OPT` record, with the given `prefix` prepended to each
    /// line.
    pub fn as_padded_string(&self, prefix: &str) -> String {
        let mut s = format!("{}{}", prefix, self);
        for option in &self.options {
            s.push('\n');
            s.push_str(prefix);
            s.push_str(&option.to_string());
        }
        s
    }
}

impl Display for OptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EDNS: version {}, flags: {}, payload size: {}",
            self.version,
            if self.dnssec_ok { "do" } else { "<none>" },
            self.payload_size
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::IpAddr;

    use super::{ClientSubnet, EdnsOption, OptRecord, OptionCode};

    #[test]
    fn client_subnet_is_truncated_and_masked() {
        let addr: IpAddr = "198.51.100.77".parse().unwrap();
        let option = EdnsOption::ClientSubnet(ClientSubnet::new(addr, 20));
        let mut buf = Vec::new();
        assert_eq!(option.encode_into(&mut buf).unwrap(), 11);
        assert_eq!(buf, [0, 8, 0, 7, 0, 1, 20, 0, 198, 51, 96]);
    }

    #[test]
    fn client_subnet_prefix_too_long() {
        let addr: IpAddr = "192.0.2.0".parse().unwrap();
        let option = EdnsOption::ClientSubnet(ClientSubnet::new(addr, 33));
        assert!(option.encode_into(&mut Vec::new()).is_err());
    }

    #[test]
    fn opt_record_layout() {
        let mut opt = OptRecord::new(1232, true);
        opt.options.push(EdnsOption::Nsid(Vec::new()));
        opt.options.push(EdnsOption::Padding(3));
        let encoded = opt.encode().unwrap();
        assert_eq!(
            encoded,
            [0, 0, 41, 0x04, 0xd0, 0, 0, 0x80, 0, 0, 11, 0, 3, 0, 0, 0, 12, 0, 3, 0, 0, 0]
        );

        // skip owner and type, which are read by the record parser
        let mut cursor = Cursor::new(&encoded[3..]);
        let parsed = OptRecord::parse_body(&mut cursor).unwrap();
        assert_eq!(parsed, opt);
        assert!(parsed.option(OptionCode::Padding).is_some());
        assert!(parsed.option(OptionCode::Cookie).is_none());
    }
}
