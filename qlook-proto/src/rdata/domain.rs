//! RDATA definitions for record types that point to another domain name.

use std::fmt::Display;
use std::io::{Cursor, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EncodeError, ParseError};
use crate::name::{Compression, Name};

use super::{Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

/// The name of an authoritative name server. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NS {
    pub name: Name,
}

/// The canonical name for an alias. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct CNAME {
    pub name: Name,
}

/// A domain name pointer, used for reverse lookups below `in-addr.arpa` and `ip6.arpa`.
/// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct PTR {
    pub location: Name,
}

/// A mail exchange. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MX {
    /// Lower values are preferred.
    pub preference: u16,
    /// `"."` means the domain does not accept mail.
    /// [\[RFC 7505\]](https://www.rfc-editor.org/rfc/rfc7505)
    pub exchange: Name,
}

/// The location of the server(s) for a specific protocol and domain.
/// [\[RFC 2782\]](https://www.rfc-editor.org/rfc/rfc2782)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SRV {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Must not be compressed.
    pub target: Name,
}

macro_rules! impl_single_name {
    ($rtype:ident, $field:ident) => {
        impl RdataTrait for $rtype {
            fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
                Ok(Rdata::$rtype(Self {
                    $field: Name::parse(rdata, Compression::Allowed)?,
                }))
            }

            fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
                self.$field.encode_into(buf)
            }
        }

        impl Display for $rtype {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.$field)
            }
        }
    };
}

impl_single_name!(NS, name);
impl_single_name!(CNAME, name);
impl_single_name!(PTR, location);

impl RdataTrait for MX {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        let preference = rdata.read_u16::<NetworkEndian>()?;
        let exchange = Name::parse(rdata, Compression::Allowed)?;
        Ok(Rdata::MX(Self {
            preference,
            exchange,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_u16::<NetworkEndian>(self.preference)?;
        Ok(2 + self.exchange.encode_into(buf)?)
    }
}

impl Display for MX {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.preference, self.exchange)
    }
}

impl RdataTrait for SRV {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        Ok(Rdata::SRV(Self {
            priority: rdata.read_u16::<NetworkEndian>()?,
            weight: rdata.read_u16::<NetworkEndian>()?,
            port: rdata.read_u16::<NetworkEndian>()?,
            target: Name::parse(rdata, Compression::Prohibited)?,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_u16::<NetworkEndian>(self.priority)?;
        buf.write_u16::<NetworkEndian>(self.weight)?;
        buf.write_u16::<NetworkEndian>(self.port)?;
        Ok(6 + self.target.encode_into(buf)?)
    }
}

impl Display for SRV {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.priority, self.weight, self.port, self.target
        )
    }
}
