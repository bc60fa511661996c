//! `SOA` RDATA definition.

use std::fmt::Display;
use std::io::{Cursor, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EncodeError, ParseError};
use crate::name::{Compression, Name};

use super::{Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

/// The start of a zone of authority. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
///
/// Negative responses carry the zone's `SOA` in the authority section; its `minimum` field is the
/// negative caching TTL. [\[RFC 2308\]](https://www.rfc-editor.org/rfc/rfc2308)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SOA {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl RdataTrait for SOA {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        let mname = Name::parse(rdata, Compression::Allowed)?;
        let rname = Name::parse(rdata, Compression::Allowed)?;
        let mut timers = [0u32; 5];
        rdata.read_u32_into::<NetworkEndian>(&mut timers)?;
        let [serial, refresh, retry, expire, minimum] = timers;

        Ok(Rdata::SOA(Self {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let names_len = self.mname.encode_into(buf)? + self.rname.encode_into(buf)?;
        for timer in [
            self.serial,
            self.refresh,
            self.retry,
            self.expire,
            self.minimum,
        ] {
            buf.write_u32::<NetworkEndian>(timer)?;
        }
        Ok(names_len + 20)
    }
}

impl Display for SOA {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.mname, self.rname, self.serial, self.refresh, self.retry, self.expire, self.minimum
        )
    }
}
