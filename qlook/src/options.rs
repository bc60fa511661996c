//! Resolved query options.
//!
//! These structs hold already-defaulted values; filling them from user input is the job of the
//! command line layer.

use qlook_proto::{Class, HeaderFlags, Name, RecordType};

/// The default EDNS UDP payload size, as recommended by DNS Flag Day 2020.
pub const DEFAULT_UDP_BUFFER: u16 = 1232;

/// Everything needed to build the queries of one lookup.
#[derive(Clone, Debug)]
pub struct Options {
    pub name: Name,
    pub class: Class,
    /// One query is built per type, in this order.
    pub types: Vec<RecordType>,
    /// A fixed message ID for every query. `None` draws a fresh random ID per query.
    pub id: Option<u16>,
    pub header: HeaderOptions,
    pub edns: EdnsOptions,
    /// The advertised EDNS payload size and the padding limit.
    pub udp_buffer: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: Name::root(),
            class: Class::IN,
            types: vec![RecordType::A],
            id: None,
            header: HeaderOptions::default(),
            edns: EdnsOptions::default(),
            udp_buffer: DEFAULT_UDP_BUFFER,
        }
    }
}

/// The header flags to set on outgoing queries.
///
/// All flags are copied verbatim, including ones that make no sense in a query (`aa`, `ra`, `tc`,
/// `z`). This allows probing how servers react to them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeaderOptions {
    pub aa: bool,
    pub ad: bool,
    pub cd: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: bool,
    pub tc: bool,
}

impl Default for HeaderOptions {
    fn default() -> Self {
        Self {
            aa: false,
            ad: false,
            cd: false,
            rd: true,
            ra: false,
            z: false,
            tc: false,
        }
    }
}

impl From<HeaderOptions> for HeaderFlags {
    fn from(opts: HeaderOptions) -> Self {
        HeaderFlags {
            aa: opts.aa,
            tc: opts.tc,
            rd: opts.rd,
            ra: opts.ra,
            z: opts.z,
            ad: opts.ad,
            cd: opts.cd,
        }
    }
}

/// The EDNS0 features to request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdnsOptions {
    /// Sets the `DO` bit.
    pub dnssec: bool,
    pub nsid: bool,
    /// Pads queries to a multiple of 128 bytes (RFC 8467).
    pub pad: bool,
    /// A client subnet in CIDR notation, e.g. `192.0.2.0/24`.
    pub client_subnet: Option<String>,
    /// A client cookie as hex digits.
    pub cookie: Option<String>,
}

impl EdnsOptions {
    /// Returns true iff any of the options requires an `OPT` record.
    ///
    /// An empty subnet or cookie string counts as unset.
    pub fn is_active(&self) -> bool {
        self.dnssec
            || self.nsid
            || self.pad
            || self.client_subnet.as_deref().map_or(false, |s| !s.is_empty())
            || self.cookie.as_deref().map_or(false, |s| !s.is_empty())
    }
}
