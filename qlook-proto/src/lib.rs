//! `qlook-proto` provides the DNS protocol's data types as well as the means to de-/serialize
//! them from/to the wire format. In simpler terms, you can construct, encode, and decode DNS
//! queries and responses with it.
//!
//! It is the backend of the `qlook` lookup tool, which adds query assembly and the transports
//! (UDP/TCP, DoT, DoQ, DoH, ODoH, DNSCrypt) on top of it.
//!
//! # Basic usage example
//! ```rust
//! use qlook_proto::{Class, EdnsOption, HeaderFlags, Message, Name, OptRecord, Question, RecordType};
//!
//! let flags = HeaderFlags { rd: true, ad: true, ..Default::default() };
//! let question = Question::new(Name::from_ascii("example.com").unwrap(), RecordType::A, Class::IN);
//! let mut msg = Message::new_query(0x1234, question, flags);
//!
//! let mut opt = OptRecord::new(1232, false);
//! opt.options.push(EdnsOption::Nsid(Vec::new()));
//! msg.push_opt(opt);
//!
//! let encoded = msg.encode().unwrap();
//! assert_eq!(&encoded[..2], &[0x12, 0x34]);
//! ```
//!
//! # Usage note
//! All structs can be constructed directly. Section counts are not stored anywhere; they are
//! always derived from the section lengths when a [`Message`] is encoded.

use std::cmp::max;
use std::fmt::{self, Display};
use std::io::{Cursor, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use owo_colors::OwoColorize;
use repr_with_fallback::repr_with_fallback;
#[cfg(feature = "serde")]
use serde::Serialize;
use strum_macros::EnumString;

pub mod edns;
pub mod error;
pub mod name;
pub mod rdata;

use error::{EncodeError, ParseError};

pub use edns::{ClientSubnet, EdnsOption, OptRecord, OptionCode};
pub use name::Name;
pub use rdata::Rdata;

/// Represents a DNS OpCode.
///
/// See [here](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5) for
/// further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub enum Opcode {
    #[default]
    QUERY,
    IQUERY,
    STATUS,
    NOTIFY,
    UPDATE,
    DSO,
}

repr_with_fallback! {
    /// Represents a DNS RCODE, including those introduced by EDNS.
    ///
    /// See
    /// [here](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6)
    /// for further information.
    #[cfg_attr(feature = "serde", derive(Serialize))]
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    #[non_exhaustive]
    pub enum RCode {
        NOERROR = 0,
        FORMERR = 1,
        SERVFAIL = 2,
        NXDOMAIN = 3,
        NOTIMP = 4,
        REFUSED = 5,
        YXDOMAIN = 6,
        YXRRSET = 7,
        NXRRSET = 8,
        NOTAUTH = 9,
        NOTZONE = 10,
        DSOTYPENI = 11,
        BADVERS = 16,
        BADKEY = 17,
        BADTIME = 18,
        BADMODE = 19,
        BADNAME = 20,
        BADALG = 21,
        BADTRUNC = 22,
        BADCOOKIE = 23,
        Unknown(u16),
    }
}

repr_with_fallback! {
    /// Represents a DNS TYPE.
    ///
    /// Only some of these types have decoded RDATA, see the [`rdata`] module. Parsing a type from
    /// a string accepts the variant names, e.g. `"AAAA"`.
    #[cfg_attr(feature = "serde", derive(Serialize))]
    #[derive(PartialEq, Eq, Copy, Clone, EnumString, Debug, Hash)]
    #[non_exhaustive]
    pub enum RecordType {
        A = 1,
        NS = 2,
        CNAME = 5,
        SOA = 6,
        PTR = 12,
        HINFO = 13,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        LOC = 29,
        SRV = 33,
        NAPTR = 35,
        DNAME = 39,
        OPT = 41,
        DS = 43,
        SSHFP = 44,
        RRSIG = 46,
        NSEC = 47,
        DNSKEY = 48,
        NSEC3 = 50,
        NSEC3PARAM = 51,
        TLSA = 52,
        OPENPGPKEY = 61,
        SVCB = 64,
        HTTPS = 65,
        ANY = 255,
        CAA = 257,
        Unknown(u16),
    }
}

repr_with_fallback! {
    /// Represents a DNS CLASS.
    ///
    /// See [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035) for further information.
    #[cfg_attr(feature = "serde", derive(Serialize))]
    #[derive(PartialEq, Eq, Copy, Clone, EnumString, Debug)]
    pub enum Class {
        IN = 1,
        CH = 3,
        HS = 4,
        NONE = 254,
        /// See also [RFC 8482](https://www.rfc-editor.org/rfc/rfc8482).
        ANY = 255,
        Unknown(u16),
    }
}

/// Represents the flags of a [`Header`].
///
/// Queries may carry any combination of flags; nothing is normalized when encoding.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub struct HeaderFlags {
    /// authoritative answer [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub aa: bool,
    /// truncated [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub tc: bool,
    /// recursion desired [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub rd: bool,
    /// recursion available [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub ra: bool,
    /// The reserved bit between `ra` and `ad`, which must be zero in conforming messages.
    pub z: bool,
    /// authentic data [\[RFC 4035\]](https://www.rfc-editor.org/rfc/rfc4035)
    pub ad: bool,
    /// checking disabled [\[RFC 4035\]](https://www.rfc-editor.org/rfc/rfc4035)
    pub cd: bool,
}

/// Represents a DNS header, without the section counts.
///
/// The general format of a header is defined in [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035).
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Header {
    /// Supplied by questioner and reflected back unchanged by responder.
    pub msg_id: u16,
    /// False for queries, true for responses.
    pub qr: bool,
    pub opcode: Opcode,
    pub flags: HeaderFlags,
    /// The lower four bits of the RCODE. See [`Message::rcode()`] for the complete value.
    pub rcode: RCode,
}

/// Represents a DNS question, i.e. an entry in the question section of a DNS message.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Question {
    pub qname: Name,
    pub qtype: RecordType,
    pub qclass: Class,
}

/// Represents a DNS record, i.e. an entry in the answer, authority or additional section of a DNS
/// message.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Record {
    OPT(OptRecord),
    NONOPT(NonOptRecord),
}

/// The `NONOPT` variant of [`Record`].
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NonOptRecord {
    pub owner: Name,
    pub rtype: RecordType,
    pub class: Class,
    /// The amount of seconds this record may be cached for.
    pub ttl: u32,
    pub rdata: Rdata,
}

/// Represents a DNS message.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authoritative_answers: Vec<Record>,
    pub additional_answers: Vec<Record>,
}

impl Opcode {
    /// Encodes a `Opcode` as a byte.
    pub fn encode(&self) -> u8 {
        match self {
            Opcode::QUERY => 0,
            Opcode::IQUERY => 1,
            Opcode::STATUS => 2,
            Opcode::NOTIFY => 4,
            Opcode::UPDATE => 5,
            Opcode::DSO => 6,
        }
    }

    /// Parses an encoded `Opcode` from a byte.
    ///
    /// Returns an error if the given byte does not represent a valid DNS OpCode.
    pub fn parse(val: u8) -> Result<Opcode, ParseError> {
        Ok(match val {
            0 => Opcode::QUERY,
            1 => Opcode::IQUERY,
            2 => Opcode::STATUS,
            4 => Opcode::NOTIFY,
            5 => Opcode::UPDATE,
            6 => Opcode::DSO,
            x => return Err(ParseError::InvalidOpcode(x)),
        })
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for RCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RCode::Unknown(x) => write!(f, "RCODE{}", x),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl RecordType {
    /// Parses a record type from its mnemonic (case-insensitively) or from the generic `TYPEnnn`
    /// form of [RFC 3597](https://www.rfc-editor.org/rfc/rfc3597).
    ///
    /// # Examples
    /// ```rust
    /// use qlook_proto::RecordType;
    ///
    /// assert_eq!(RecordType::from_mnemonic("aaaa"), Some(RecordType::AAAA));
    /// assert_eq!(RecordType::from_mnemonic("TYPE65"), Some(RecordType::HTTPS));
    /// assert_eq!(RecordType::from_mnemonic("TYPE4242"), Some(RecordType::Unknown(4242)));
    /// assert_eq!(RecordType::from_mnemonic("example"), None);
    /// ```
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        if let Some(num) = upper.strip_prefix("TYPE") {
            return num.parse::<u16>().ok().map(RecordType::from);
        }
        match upper.parse() {
            Ok(RecordType::Unknown(_)) | Err(_) => None,
            Ok(rtype) => Some(rtype),
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Unknown(x) => write!(f, "TYPE{}", x),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl Class {
    /// Parses a class from its mnemonic (case-insensitively) or from the generic `CLASSnnn` form.
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let upper = s.to_ascii_uppercase();
        if let Some(num) = upper.strip_prefix("CLASS") {
            return num.parse::<u16>().ok().map(Class::from);
        }
        match upper.parse() {
            Ok(Class::Unknown(_)) | Err(_) => None,
            Ok(class) => Some(class),
        }
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Class::Unknown(x) => write!(f, "CLASS{}", x),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl HeaderFlags {
    /// Creates a `HeaderFlags` struct from bitflags as they would appear in the second 16-bit
    /// word of a [`Header`].
    pub fn from_flags(flags: u16) -> Self {
        Self {
            aa: (flags & (1 << 10)) != 0,
            tc: (flags & (1 << 9)) != 0,
            rd: (flags & (1 << 8)) != 0,
            ra: (flags & (1 << 7)) != 0,
            z: (flags & (1 << 6)) != 0,
            ad: (flags & (1 << 5)) != 0,
            cd: (flags & (1 << 4)) != 0,
        }
    }

    /// Returns a u16 representing bitflags as they would appear in the second 16-bit word of a
    /// [`Header`].
    pub fn as_flags(&self) -> u16 {
        [
            (self.aa, 10),
            (self.tc, 9),
            (self.rd, 8),
            (self.ra, 7),
            (self.z, 6),
            (self.ad, 5),
            (self.cd, 4),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0u16, |acc, (_, bit)| acc | (1 << *bit))
    }
}

impl Display for HeaderFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.aa, "aa"),
            (self.tc, "tc"),
            (self.rd, "rd"),
            (self.ra, "ra"),
            (self.z, "z"),
            (self.ad, "ad"),
            (self.cd, "cd"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "<none>")
        } else {
            write!(f, "{}", set.join(" "))
        }
    }
}

impl Header {
    /// Encodes the header, with the given section counts (`qdcount`, `ancount`, `nscount`,
    /// `arcount`, in that order), into `buf`.
    pub fn encode_into(&self, buf: &mut impl Write, counts: [u16; 4]) -> Result<(), EncodeError> {
        let qr = if self.qr { 1u16 } else { 0u16 };
        let opcode = self.opcode.encode() as u16;
        let rcode = u16::from(self.rcode) & 0b1111;

        let line_two = (qr << 15) | (opcode << 11) | self.flags.as_flags() | rcode;
        buf.write_u16::<NetworkEndian>(self.msg_id)?;
        buf.write_u16::<NetworkEndian>(line_two)?;
        for count in counts {
            buf.write_u16::<NetworkEndian>(count)?;
        }

        Ok(())
    }

    /// Parses an encoded `Header` and returns it together with the section counts.
    pub fn parse(header: &mut Cursor<&[u8]>) -> Result<(Self, [u16; 4]), ParseError> {
        let msg_id = header.read_u16::<NetworkEndian>()?;
        let line_two = header.read_u16::<NetworkEndian>()?;
        let qr = (line_two & (1 << 15)) != 0;
        let opcode = Opcode::parse(((line_two >> 11) & 0b1111) as u8)?;
        let flags = HeaderFlags::from_flags(line_two);
        let rcode = RCode::from(line_two & 0b1111);

        let mut counts = [0; 4];
        header.read_u16_into::<NetworkEndian>(&mut counts)?;

        Ok((
            Header {
                msg_id,
                qr,
                opcode,
                flags,
                rcode,
            },
            counts,
        ))
    }
}

impl Question {
    /// Creates a DNS question.
    pub fn new(name: Name, qtype: RecordType, qclass: Class) -> Self {
        Question {
            qname: name,
            qtype,
            qclass,
        }
    }

    /// The same as [`Message::encode_into()`], for a single question.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.qname.encode_into(buf)?;
        buf.write_u16::<NetworkEndian>(self.qtype.into())?;
        buf.write_u16::<NetworkEndian>(self.qclass.into())?;
        Ok(())
    }

    /// Parses an encoded `Question` from a series of bytes.
    pub fn parse(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let qname = Name::parse(msg, name::Compression::Allowed)?;
        let qtype = msg.read_u16::<NetworkEndian>()?.into();
        let qclass = msg.read_u16::<NetworkEndian>()?.into();

        Ok(Question {
            qname,
            qtype,
            qclass,
        })
    }

    /// Returns a string with the owner padded to the given length.
    ///
    /// If `output` is [`Some`] and the specified output stream supports colours, the output will be
    /// colourized.
    pub fn as_padded_string(&self, owner_len: usize, output: Option<owo_colors::Stream>) -> String {
        let mut owner = format!("{:<width$}", self.qname.to_string(), width = owner_len);
        let mut qtype = self.qtype.to_string();
        if let Some(stream) = output {
            owner = owner.if_supports_color(stream, |s| s.green()).to_string();
            qtype = qtype.if_supports_color(stream, |s| s.purple()).to_string();
        }
        format!("{}          {}", owner, qtype)
    }
}

impl Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.qname, self.qclass, self.qtype)
    }
}

impl Record {
    /// The same as [`Message::encode_into()`], for a single record.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        match self {
            Record::NONOPT(nonopt) => nonopt.encode_into(buf),
            Record::OPT(opt) => opt.encode_into(buf),
        }
    }

    /// Parses an encoded `Record` from a series of bytes.
    ///
    /// Returns an error if an `OPT` record has a name other than `"."`, or if its RDATA cannot be
    /// parsed.
    pub fn parse(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let owner = Name::parse(msg, name::Compression::Allowed)?;
        let rtype: RecordType = msg.read_u16::<NetworkEndian>()?.into();
        if rtype == RecordType::OPT {
            if !owner.is_root() {
                return Err(ParseError::InvalidOptName(owner));
            }
            return Ok(Record::OPT(OptRecord::parse_body(msg)?));
        }
        let class = msg.read_u16::<NetworkEndian>()?.into();
        let ttl = msg.read_u32::<NetworkEndian>()?;
        let rdlength = msg.read_u16::<NetworkEndian>()?;
        let rdata = Rdata::parse(rtype, msg, rdlength)?;

        Ok(Record::NONOPT(NonOptRecord {
            owner,
            rtype,
            class,
            ttl,
            rdata,
        }))
    }

    /// Returns a reference to the inner [`OptRecord`]. [`None`] for the `NONOPT` variant.
    pub fn as_opt(&self) -> Option<&OptRecord> {
        match self {
            Self::OPT(opt) => Some(opt),
            Self::NONOPT(_) => None,
        }
    }

    /// Returns a reference to the inner [`NonOptRecord`]. [`None`] for the `OPT` variant.
    pub fn as_nonopt(&self) -> Option<&NonOptRecord> {
        match self {
            Self::NONOPT(nonopt) => Some(nonopt),
            Self::OPT(_) => None,
        }
    }
}

impl NonOptRecord {
    /// Creates a record whose type is taken from the RDATA. Use the struct fields directly for
    /// [`Rdata::Unknown`].
    pub fn new(owner: Name, ttl: u32, rdata: Rdata) -> Self {
        let rtype = match &rdata {
            Rdata::A(_) => RecordType::A,
            Rdata::NS(_) => RecordType::NS,
            Rdata::CNAME(_) => RecordType::CNAME,
            Rdata::SOA(_) => RecordType::SOA,
            Rdata::PTR(_) => RecordType::PTR,
            Rdata::MX(_) => RecordType::MX,
            Rdata::TXT(_) => RecordType::TXT,
            Rdata::AAAA(_) => RecordType::AAAA,
            Rdata::SRV(_) => RecordType::SRV,
            Rdata::Unknown(_) => RecordType::Unknown(0),
        };
        Self {
            owner,
            rtype,
            class: Class::IN,
            ttl,
            rdata,
        }
    }

    /// The same as [`Message::encode_into()`], for a single record.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        let rdata = self.rdata.encode()?;
        self.owner.encode_into(buf)?;
        buf.write_u16::<NetworkEndian>(self.rtype.into())?;
        buf.write_u16::<NetworkEndian>(self.class.into())?;
        buf.write_u32::<NetworkEndian>(self.ttl)?;
        buf.write_u16::<NetworkEndian>(rdata.len() as u16)?;
        buf.write_all(&rdata)?;
        Ok(())
    }

    /// Returns a string representing the record in the format used in zone files, but without the
    /// class and without trailing dots for domain names.
    ///
    /// If `owner_len`/`rtype_len` is [`Some`], the `owner`/`rtype` field is padded to the specified
    /// length and fields are separated by two spaces.
    ///
    /// If `output` is [`Some`] and the specified output stream supports colours, the output will
    /// be colourized.
    pub fn as_string(
        &self,
        owner_len: Option<usize>,
        rtype_len: Option<usize>,
        output: Option<owo_colors::Stream>,
    ) -> String {
        let padded = owner_len.is_some() || rtype_len.is_some();
        let mut owner = format!("{:<w$}", self.owner.to_string(), w = owner_len.unwrap_or(0));
        let mut rtype = format!("{:<w$}", self.rtype.to_string(), w = rtype_len.unwrap_or(0));

        if let Some(stream) = output {
            owner = owner.if_supports_color(stream, |s| s.green()).to_string();
            rtype = rtype.if_supports_color(stream, |s| s.purple()).to_string();
        }

        if padded {
            format!("{}  {:>6}  {}  {}", owner, self.ttl, rtype, self.rdata)
        } else {
            format!("{} {} {} {}", owner, self.ttl, rtype, self.rdata)
        }
    }
}

impl Display for NonOptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string(None, None, None))
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::NONOPT(nonopt) => write!(f, "{}", nonopt),
            Record::OPT(opt) => write!(f, "{}", opt),
        }
    }
}

impl Message {
    /// Creates a DNS query with a single question and empty record sections.
    pub fn new_query(msg_id: u16, question: Question, flags: HeaderFlags) -> Self {
        Message {
            header: Header {
                msg_id,
                qr: false,
                opcode: Opcode::QUERY,
                flags,
                rcode: RCode::NOERROR,
            },
            questions: vec![question],
            answers: Vec::new(),
            authoritative_answers: Vec::new(),
            additional_answers: Vec::new(),
        }
    }

    /// Appends an `OPT` record to the additional section.
    pub fn push_opt(&mut self, opt: OptRecord) {
        self.additional_answers.push(Record::OPT(opt));
    }

    /// Returns the `OPT` record of the additional section, if there is one.
    pub fn opt(&self) -> Option<&OptRecord> {
        self.additional_answers.iter().find_map(Record::as_opt)
    }

    /// Returns a mutable reference to the `OPT` record of the additional section, if there is one.
    pub fn opt_mut(&mut self) -> Option<&mut OptRecord> {
        self.additional_answers.iter_mut().find_map(|r| match r {
            Record::OPT(opt) => Some(opt),
            Record::NONOPT(_) => None,
        })
    }

    /// Returns the complete 12 bit RCODE, merging the extended bits from the `OPT` record.
    pub fn rcode(&self) -> RCode {
        let low = u16::from(self.header.rcode) & 0b1111;
        match self.opt() {
            Some(opt) => RCode::from(((opt.ext_rcode as u16) << 4) | low),
            None => RCode::from(low),
        }
    }

    /// Returns an iterator over the non-`OPT` records of the answer section.
    pub fn answer_records(&self) -> impl Iterator<Item = &NonOptRecord> {
        self.answers.iter().filter_map(Record::as_nonopt)
    }

    /// Encodes a `Message` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(512);
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        let counts = [
            self.questions.len() as u16,
            self.answers.len() as u16,
            self.authoritative_answers.len() as u16,
            self.additional_answers.len() as u16,
        ];
        self.header.encode_into(buf, counts)?;
        for question in &self.questions {
            question.encode_into(buf)?;
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authoritative_answers)
            .chain(&self.additional_answers)
        {
            record.encode_into(buf)?;
        }

        Ok(())
    }

    /// Parses an encoded `Message` from a series of bytes.
    ///
    /// A truncated message (`tc` set) is parsed as far as it goes; deciding whether to retry over
    /// TCP is up to the caller.
    pub fn parse(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let (header, [qdcount, ancount, nscount, arcount]) = Header::parse(msg)?;

        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            questions.push(Question::parse(msg)?);
        }
        let answers = Message::parse_records(msg, ancount)?;
        let authoritative_answers = Message::parse_records(msg, nscount)?;
        let additional_answers = Message::parse_records(msg, arcount)?;

        Ok(Message {
            header,
            questions,
            answers,
            authoritative_answers,
            additional_answers,
        })
    }

    /// Returns a string verbosely describing the message (i.e. header and all the other sections).
    ///
    /// If `output` is [`Some`] and the specified output stream supports colours, the output will
    /// be colourized.
    pub fn as_string(&self, output: Option<owo_colors::Stream>) -> String {
        let section_name = |s: &str| match output {
            Some(stream) => s.if_supports_color(stream, |s| s.yellow()).to_string(),
            None => s.to_string(),
        };

        let mut max_owner_len = 0;
        let mut max_type_len = 0;
        for q in &self.questions {
            max_owner_len = max(max_owner_len, q.qname.string_len());
            max_type_len = max(max_type_len, q.qtype.to_string().len());
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authoritative_answers)
            .chain(&self.additional_answers)
            .filter_map(Record::as_nonopt)
        {
            max_owner_len = max(max_owner_len, record.owner.string_len());
            max_type_len = max(max_type_len, record.rtype.to_string().len());
        }

        let mut lines = vec![
            section_name("Header:"),
            format!(
                "\tid: {}, opcode: {}, rcode: {}, flags: {}",
                self.header.msg_id,
                self.header.opcode,
                self.rcode(),
                self.header.flags
            ),
            String::new(),
        ];

        if let Some(opt) = self.opt() {
            lines.push(section_name("OPT Pseudosection:"));
            lines.push(opt.as_padded_string("\t"));
            lines.push(String::new());
        }

        lines.push(section_name("Question Section:"));
        for question in &self.questions {
            lines.push(format!("\t{}", question.as_padded_string(max_owner_len, output)));
        }
        lines.push(String::new());

        let sections = [
            ("Answer Section:", &self.answers),
            ("Authoritative Section:", &self.authoritative_answers),
            ("Additional Section:", &self.additional_answers),
        ];
        for (name, records) in sections {
            let records: Vec<_> = records.iter().filter_map(Record::as_nonopt).collect();
            if records.is_empty() {
                continue;
            }
            lines.push(section_name(name));
            for record in records {
                lines.push(format!(
                    "\t{}",
                    record.as_string(Some(max_owner_len), Some(max_type_len), output)
                ));
            }
            lines.push(String::new());
        }

        while lines.last().map_or(false, String::is_empty) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// Parses a record section (i. e. answer, authoritative or additional) of a DNS message.
    fn parse_records(msg: &mut Cursor<&[u8]>, count: u16) -> Result<Vec<Record>, ParseError> {
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(Record::parse(msg)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    use crate::rdata::{A, PTR};
    use crate::{
        Class, HeaderFlags, Message, Name, NonOptRecord, OptRecord, Question, RCode, Rdata, Record,
        RecordType,
    };

    #[test]
    fn all_header_flags_survive_encoding() {
        let flags = HeaderFlags {
            aa: true,
            tc: true,
            rd: true,
            ra: true,
            z: true,
            ad: true,
            cd: true,
        };
        assert_eq!(flags.as_flags(), 0b0000_0111_1111_0000);
        assert_eq!(HeaderFlags::from_flags(flags.as_flags()), flags);

        let only_ra = HeaderFlags {
            ra: true,
            ..Default::default()
        };
        assert_eq!(HeaderFlags::from_flags(only_ra.as_flags()), only_ra);
    }

    #[test]
    fn parse_compressed_response() {
        #[rustfmt::skip]
        let bytes: &[u8] = &[
            0xab, 0xcd, 0x81, 0x80, 0, 1, 0, 2, 0, 0, 0, 0,
            // question: example.com A IN
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0, 0, 1, 0, 1,
            // answer 1: pointer to offset 12, A, IN, ttl 300, 192.0.2.1
            0xc0, 12, 0, 1, 0, 1, 0, 0, 1, 44, 0, 4, 192, 0, 2, 1,
            // answer 2: "www" + pointer, PTR, IN, ttl 60, pointer to offset 12
            3, b'w', b'w', b'w', 0xc0, 12, 0, 12, 0, 1, 0, 0, 0, 60, 0, 2, 0xc0, 12,
        ];
        let msg = Message::parse(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(msg.header.msg_id, 0xabcd);
        assert!(msg.header.qr);
        assert!(msg.header.flags.rd && msg.header.flags.ra);
        assert_eq!(msg.rcode(), RCode::NOERROR);
        let answers: Vec<_> = msg.answer_records().collect();
        assert_eq!(answers.len(), 2);
        assert_eq!(
            answers[0].rdata.as_a().map(|a| a.address),
            Some(Ipv4Addr::new(192, 0, 2, 1))
        );
        assert_eq!(answers[1].owner, Name::from_ascii("www.example.com").unwrap());
        assert_eq!(
            answers[1].rdata.as_ptr().map(|p| p.location.to_string()),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn truncated_response_is_parsed() {
        let question = Question::new(Name::from_ascii("a.test").unwrap(), RecordType::A, Class::IN);
        let mut msg = Message::new_query(1, question, HeaderFlags::default());
        msg.header.qr = true;
        msg.header.flags.tc = true;
        let encoded = msg.encode().unwrap();
        let parsed = Message::parse(&mut Cursor::new(&encoded[..])).unwrap();
        assert!(parsed.header.flags.tc);
        assert_eq!(parsed, msg);
    }

    #[test]
    fn extended_rcode_and_records_roundtrip() {
        let question = Question::new(Name::root(), RecordType::NS, Class::IN);
        let mut msg = Message::new_query(7, question, HeaderFlags::default());
        msg.header.qr = true;
        msg.answers.push(Record::NONOPT(NonOptRecord::new(
            Name::from_ascii("1.2.0.192.in-addr.arpa").unwrap(),
            3600,
            Rdata::PTR(PTR {
                location: Name::from_ascii("host.example").unwrap(),
            }),
        )));
        msg.additional_answers.push(Record::NONOPT(NonOptRecord::new(
            Name::from_ascii("host.example").unwrap(),
            5,
            Rdata::A(A {
                address: Ipv4Addr::LOCALHOST,
            }),
        )));
        let mut opt = OptRecord::new(4096, false);
        opt.ext_rcode = 1;
        msg.push_opt(opt);

        let encoded = msg.encode().unwrap();
        // additional count includes the OPT record
        assert_eq!(&encoded[10..12], &[0, 2]);
        let parsed = Message::parse(&mut Cursor::new(&encoded[..])).unwrap();
        assert_eq!(parsed.rcode(), RCode::BADVERS);
        assert_eq!(parsed, msg);
    }

    #[test]
    fn address_record_with_wrong_length_is_rejected() {
        #[rustfmt::skip]
        let bytes: &[u8] = &[
            0, 1, 0x80, 0, 0, 0, 0, 1, 0, 0, 0, 0,
            0, 0, 1, 0, 1, 0, 0, 0, 0, 0, 3, 1, 2, 3,
        ];
        assert!(Message::parse(&mut Cursor::new(bytes)).is_err());
    }
}
