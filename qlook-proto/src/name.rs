//! Definition and implementation of the [`Name`] type.

use std::fmt::{self, Display};
use std::io::{Cursor, Read, Write};
use std::net::IpAddr;

use byteorder::{ReadBytesExt, WriteBytesExt};
use smartstring::{LazyCompact, SmartString};

use crate::error::{EncodeError, ParseError};

#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

/// The maximum number of compression pointers followed while parsing a single name.
const MAX_POINTERS: usize = 128;

type Label = SmartString<LazyCompact>;

/// A DNS domain name.
///
/// Names compare case-insensitively. The string representation omits the trailing dot, except for
/// the DNS root's name, which is represented as `"."`.
#[derive(Eq, Clone, Debug, Default)]
pub struct Name {
    // does not contain the root label
    labels: Vec<Label>,
}

/// Whether DNS message compression is allowed when parsing a [`Name`].
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Compression {
    Allowed,
    /// Used for fields such as [`SRV::target`](crate::rdata::SRV::target), which must not be
    /// compressed.
    Prohibited,
}

impl Name {
    /// Returns a `Name` representing the DNS root (`"."`).
    ///
    /// # Examples
    /// ```rust
    /// use qlook_proto::Name;
    ///
    /// assert_eq!(Name::from_ascii(".").ok(), Some(Name::root()));
    /// assert!(Name::root().is_root());
    /// ```
    pub fn root() -> Self {
        Self { labels: Vec::new() }
    }

    /// Parses a `Name` encoded as a DNS QNAME from the given cursor, which must wrap the complete
    /// message so that compression pointers can be followed.
    ///
    /// After parsing, the cursor is positioned directly behind the name as it appears at the
    /// starting position (i.e. behind the first compression pointer, if there is one).
    ///
    /// Returns an error if the name is compressed although `compression` is
    /// [`Compression::Prohibited`], if the compression pointers form a loop, or if the message
    /// ends prematurely.
    ///
    /// # Examples
    /// ```rust
    /// use std::io::Cursor;
    /// use qlook_proto::name::{Compression, Name};
    ///
    /// // "example.com" followed by "sub" and a pointer to offset 0
    /// let bytes = b"\x07example\x03com\0\x03sub\xc0\x00";
    /// let mut cursor = Cursor::new(&bytes[..]);
    /// let first = Name::parse(&mut cursor, Compression::Allowed).unwrap();
    /// let second = Name::parse(&mut cursor, Compression::Allowed).unwrap();
    /// assert_eq!(first, Name::from_ascii("example.com").unwrap());
    /// assert_eq!(second, Name::from_ascii("sub.example.com").unwrap());
    /// assert_eq!(cursor.position() as usize, bytes.len());
    ///
    /// cursor.set_position(13);
    /// assert!(Name::parse(&mut cursor, Compression::Prohibited).is_err());
    /// ```
    pub fn parse(msg: &mut Cursor<&[u8]>, compression: Compression) -> Result<Self, ParseError> {
        let mut labels = Vec::new();
        let mut wire_len = 1;
        let mut resume_at = None;
        let mut pointers = 0;

        loop {
            let len = msg.read_u8()?;
            match len & 0b1100_0000 {
                0b1100_0000 => {
                    if compression == Compression::Prohibited {
                        return Err(ParseError::CompressionProhibited);
                    }
                    pointers += 1;
                    if pointers > MAX_POINTERS {
                        return Err(ParseError::CompressionLoop(MAX_POINTERS));
                    }
                    let offset = (((len & 0b0011_1111) as u64) << 8) + msg.read_u8()? as u64;
                    if resume_at.is_none() {
                        resume_at = Some(msg.position());
                    }
                    msg.set_position(offset);
                }
                0 if len == 0 => break,
                0 => {
                    let mut label = vec![0; len as usize];
                    msg.read_exact(&mut label)?;
                    wire_len += 1 + label.len();
                    if wire_len > 255 {
                        return Err(ParseError::NameTooLong(wire_len));
                    }
                    labels.push(label.iter().map(|&b| b as char).collect());
                }
                _ => return Err(ParseError::InvalidLabelType(len)),
            }
        }

        if let Some(pos) = resume_at {
            msg.set_position(pos);
        }

        Ok(Name { labels })
    }

    /// Constructs a `Name` from an ASCII domain string.
    ///
    /// Every label must consist of `a-z`, `A-Z`, `0-9`, `_` and `-`, and must neither start nor
    /// end with `-`. The first label may be the wildcard `"*"`. A trailing dot is optional.
    ///
    /// # Examples
    /// ```rust
    /// use qlook_proto::Name;
    ///
    /// assert_eq!(Name::from_ascii("").ok(), Some(Name::root()));
    /// assert!(Name::from_ascii("example.com.").is_ok());
    /// assert!(Name::from_ascii("*.example.com").is_ok());
    /// assert!(Name::from_ascii("_dns.resolver.arpa").is_ok());
    ///
    /// assert!(Name::from_ascii("a*.example.com").is_err());
    /// assert!(Name::from_ascii("example-.com").is_err());
    /// assert!(Name::from_ascii("example..com").is_err());
    /// assert!(Name::from_ascii("exämple.com").is_err());
    /// ```
    pub fn from_ascii(name: impl AsRef<str>) -> Result<Self, ParseError> {
        let name = name.as_ref();
        let name = name.strip_suffix('.').unwrap_or(name);
        if name.is_empty() {
            return Ok(Self::root());
        }

        if name.len() > 253 {
            return Err(ParseError::NameTooLong(name.len()));
        }

        let mut labels = Vec::new();
        for (idx, label) in name.split('.').enumerate() {
            if label.is_empty() {
                return Err(ParseError::EmptyLabel);
            }
            if label.len() > 63 {
                return Err(ParseError::LabelTooLong(label.len()));
            }
            if !(idx == 0 && label == "*") {
                check_label(label)?;
            }
            labels.push(label.into());
        }

        Ok(Name { labels })
    }

    /// Returns the name used for reverse lookups (`PTR` queries) of the given address, i.e. a
    /// name below `in-addr.arpa` for IPv4 and below `ip6.arpa` for IPv6 addresses.
    ///
    /// # Examples
    /// ```rust
    /// use qlook_proto::Name;
    ///
    /// let v4 = Name::reverse("192.0.2.10".parse().unwrap());
    /// assert_eq!(v4.to_string(), "10.2.0.192.in-addr.arpa");
    ///
    /// let v6 = Name::reverse("2001:db8::1".parse().unwrap());
    /// assert_eq!(
    ///     v6.to_string(),
    ///     "1.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa"
    /// );
    /// ```
    pub fn reverse(addr: IpAddr) -> Self {
        let mut labels: Vec<Label> = match addr {
            IpAddr::V4(v4) => {
                let mut labels: Vec<Label> = v4
                    .octets()
                    .iter()
                    .rev()
                    .map(|octet| octet.to_string().into())
                    .collect();
                labels.push("in-addr".into());
                labels
            }
            IpAddr::V6(v6) => {
                let mut labels: Vec<Label> = v6
                    .octets()
                    .iter()
                    .rev()
                    .flat_map(|byte| [byte & 0x0f, byte >> 4])
                    .map(|nibble| format!("{:x}", nibble).into())
                    .collect();
                labels.push("ip6".into());
                labels
            }
        };
        labels.push("arpa".into());
        Name { labels }
    }

    /// Encodes this name as a DNS QNAME into the given buffer. Does not use message compression.
    ///
    /// Returns the number of bytes written on success.
    ///
    /// # Examples
    /// ```rust
    /// use qlook_proto::Name;
    ///
    /// let mut buf = Vec::new();
    /// let name = Name::from_ascii("example.com").unwrap();
    /// assert_eq!(name.encode_into(&mut buf).unwrap(), 13);
    /// assert_eq!(buf, b"\x07example\x03com\0");
    /// ```
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let len = self.wire_len();
        if len > 255 {
            return Err(EncodeError::DomainTooLong(len));
        }
        for label in &self.labels {
            if label.len() > 63 {
                return Err(EncodeError::LabelTooLong(label.len()));
            }
            buf.write_u8(label.len() as u8)?;
            buf.write_all(label.as_bytes())?;
        }
        buf.write_u8(0)?;
        Ok(len as u16)
    }

    /// Returns the number of bytes this name occupies on the wire (without compression).
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Returns the number of labels, not counting the root label.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Returns the length of the string returned if this `Name` is made into a [`String`].
    ///
    /// # Examples
    /// ```rust
    /// use qlook_proto::Name;
    ///
    /// assert_eq!(Name::root().string_len(), 1);
    /// assert_eq!(Name::from_ascii("example.com").unwrap().string_len(), 11);
    /// ```
    pub fn string_len(&self) -> usize {
        if self.is_root() {
            return 1;
        }
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() - 1
    }

    /// Returns true iff this `Name` represents the DNS root (`"."`).
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Checks if the given string is a valid, non-empty DNS name label.
fn check_label(label: &str) -> Result<(), ParseError> {
    let valid_char = |c: u8| c.is_ascii_alphanumeric() || c == b'_' || c == b'-';
    let bytes = label.as_bytes();
    if !bytes.iter().all(|&c| valid_char(c))
        || bytes.first() == Some(&b'-')
        || bytes.last() == Some(&b'-')
    {
        return Err(ParseError::NameInvalidChars);
    }
    Ok(())
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(other.labels.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", label)?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{Compression, Name};
    use crate::error::ParseError;

    #[test]
    fn pointer_loop_is_rejected() {
        // a name consisting only of a pointer to itself
        let bytes = b"\xc0\x00";
        let mut cursor = Cursor::new(&bytes[..]);
        let res = Name::parse(&mut cursor, Compression::Allowed);
        assert!(matches!(res, Err(ParseError::CompressionLoop(_))));
    }

    #[test]
    fn names_compare_case_insensitively() {
        assert_eq!(
            Name::from_ascii("ExAmPlE.CoM").unwrap(),
            Name::from_ascii("example.com.").unwrap()
        );
    }

    #[test]
    fn reverse_name_of_mapped_address() {
        let name = Name::reverse("::ffff:192.0.2.1".parse().unwrap());
        assert!(name.to_string().starts_with("1.0.2.0.0.0.0.c.f.f.f.f.0.0."));
        assert_eq!(name.label_count(), 34);
    }

    #[test]
    fn overlong_name_is_rejected() {
        let label = "a".repeat(63);
        let name = [label.as_str(); 5].join(".");
        assert!(matches!(
            Name::from_ascii(name),
            Err(ParseError::NameTooLong(_))
        ));
    }
}
