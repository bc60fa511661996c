//! RDATA type definitions.
//!
//! Only the record types a lookup tool commonly renders are decoded; everything else is kept as
//! [`Rdata::Unknown`] and shown in the generic `\# <len> <hex>` format of
//! [RFC 3597](https://www.rfc-editor.org/rfc/rfc3597).

use std::fmt::Display;
use std::io::{Cursor, Read, Write};

use byteorder::ReadBytesExt;
use data_encoding::HEXUPPER;

use crate::error::{EncodeError, ParseError};
use crate::RecordType;

#[cfg(feature = "serde")]
use serde::Serialize;

mod domain;
mod host;
mod soa;
mod txt;

pub use domain::{CNAME, MX, NS, PTR, SRV};
pub use host::{A, AAAA};
pub use soa::SOA;
pub use txt::TXT;

/// The record data (RDATA) of a [`NonOptRecord`](crate::NonOptRecord).
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
#[non_exhaustive]
pub enum Rdata {
    A(A),
    NS(NS),
    CNAME(CNAME),
    SOA(SOA),
    PTR(PTR),
    MX(MX),
    TXT(TXT),
    AAAA(AAAA),
    SRV(SRV),

    /// RDATA of a type that is not decoded, containing the raw bytes.
    Unknown(Vec<u8>),
}

/// A trait for working with the different RDATA variants.
pub trait RdataTrait: Sized + Display {
    /// Parses the RDATA from the encoded bytes, starting at `rdata`'s current position.
    ///
    /// `rdata` wraps the complete DNS message, which is needed to follow compression pointers.
    /// `rdlength` is the byte count of the encoded RDATA.
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError>;

    /// Encodes the RDATA into the given `buf` and returns the number of written bytes on success.
    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError>;
}

macro_rules! impl_as_rtype {
    ($method:ident, $variant:ident) => {
        #[doc = concat!(
            "Returns a reference to the inner [`", stringify!($variant), "`] when called on the `",
            stringify!($variant), "` variant. For all other variants, returns [`None`]."
        )]
        pub fn $method(&self) -> Option<&$variant> {
            if let Self::$variant(inner) = self {
                Some(inner)
            } else {
                None
            }
        }
    };
}

impl Rdata {
    /// Parses the RDATA of a record with type `rtype`.
    ///
    /// The cursor is always left directly behind the RDATA, so a record type whose decoder reads
    /// less than `rdlength` bytes does not desynchronize the rest of the message. Returns an error
    /// if an address record has the wrong length or the decoder runs past `rdlength`.
    pub fn parse(
        rtype: RecordType,
        msg: &mut Cursor<&[u8]>,
        rdlength: u16,
    ) -> Result<Rdata, ParseError> {
        let start = msg.position();
        let expected = match rtype {
            RecordType::A => Some(4),
            RecordType::AAAA => Some(16),
            _ => None,
        };
        if let Some(expected) = expected {
            if rdlength != expected {
                return Err(ParseError::RdataLength(rtype, expected, rdlength));
            }
        }

        let rdata = match rtype {
            RecordType::A => A::parse_rdata(msg, rdlength)?,
            RecordType::NS => NS::parse_rdata(msg, rdlength)?,
            RecordType::CNAME => CNAME::parse_rdata(msg, rdlength)?,
            RecordType::SOA => SOA::parse_rdata(msg, rdlength)?,
            RecordType::PTR => PTR::parse_rdata(msg, rdlength)?,
            RecordType::MX => MX::parse_rdata(msg, rdlength)?,
            RecordType::TXT => TXT::parse_rdata(msg, rdlength)?,
            RecordType::AAAA => AAAA::parse_rdata(msg, rdlength)?,
            RecordType::SRV => SRV::parse_rdata(msg, rdlength)?,
            _ => {
                let mut raw = vec![0; rdlength as usize];
                msg.read_exact(&mut raw)?;
                Rdata::Unknown(raw)
            }
        };

        let consumed = msg.position() - start;
        if consumed > rdlength as u64 {
            return Err(ParseError::RdataLength(rtype, rdlength, consumed as u16));
        }
        msg.set_position(start + rdlength as u64);
        Ok(rdata)
    }

    /// Encodes the RDATA and returns the encoded bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// See [`RdataTrait::encode_rdata_into()`].
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        match self {
            Rdata::A(rdata) => rdata.encode_rdata_into(buf),
            Rdata::NS(rdata) => rdata.encode_rdata_into(buf),
            Rdata::CNAME(rdata) => rdata.encode_rdata_into(buf),
            Rdata::SOA(rdata) => rdata.encode_rdata_into(buf),
            Rdata::PTR(rdata) => rdata.encode_rdata_into(buf),
            Rdata::MX(rdata) => rdata.encode_rdata_into(buf),
            Rdata::TXT(rdata) => rdata.encode_rdata_into(buf),
            Rdata::AAAA(rdata) => rdata.encode_rdata_into(buf),
            Rdata::SRV(rdata) => rdata.encode_rdata_into(buf),
            Rdata::Unknown(raw) => {
                buf.write_all(raw)?;
                Ok(raw.len() as u16)
            }
        }
    }

    impl_as_rtype!(as_a, A);
    impl_as_rtype!(as_aaaa, AAAA);
    impl_as_rtype!(as_ns, NS);
    impl_as_rtype!(as_cname, CNAME);
    impl_as_rtype!(as_ptr, PTR);
    impl_as_rtype!(as_mx, MX);
    impl_as_rtype!(as_txt, TXT);
    impl_as_rtype!(as_soa, SOA);
    impl_as_rtype!(as_srv, SRV);
}

impl Display for Rdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rdata::A(rdata) => write!(f, "{}", rdata),
            Rdata::NS(rdata) => write!(f, "{}", rdata),
            Rdata::CNAME(rdata) => write!(f, "{}", rdata),
            Rdata::SOA(rdata) => write!(f, "{}", rdata),
            Rdata::PTR(rdata) => write!(f, "{}", rdata),
            Rdata::MX(rdata) => write!(f, "{}", rdata),
            Rdata::TXT(rdata) => write!(f, "{}", rdata),
            Rdata::AAAA(rdata) => write!(f, "{}", rdata),
            Rdata::SRV(rdata) => write!(f, "{}", rdata),
            Rdata::Unknown(raw) => write!(f, "\\# {} {}", raw.len(), HEXUPPER.encode(raw)),
        }
    }
}

/// Reads an RFC 1035 character string (a length byte followed by that many bytes).
///
/// Returns the string and the number of bytes read, including the length byte.
pub(crate) fn parse_string(msg: &mut Cursor<&[u8]>) -> Result<(Vec<u8>, usize), ParseError> {
    let len = msg.read_u8()? as usize;
    let mut bytes = vec![0; len];
    msg.read_exact(&mut bytes)?;
    Ok((bytes, len + 1))
}

/// Writes an RFC 1035 character string. Returns the number of bytes written.
pub(crate) fn encode_string_into(string: &[u8], buf: &mut impl Write) -> Result<u16, EncodeError> {
    if string.len() > 255 {
        return Err(EncodeError::StringTooLong(string.len()));
    }
    buf.write_all(&[string.len() as u8])?;
    buf.write_all(string)?;
    Ok(1 + string.len() as u16)
}
