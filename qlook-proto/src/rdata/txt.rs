//! `TXT` RDATA definition.

use std::fmt::Display;
use std::io::{Cursor, Write};

use crate::error::{EncodeError, ParseError};

use super::{encode_string_into, parse_string, Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};

/// One or more character strings. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
///
/// The strings are arbitrary bytes; some protocols (e.g. DNSCrypt certificates) store binary
/// data in them.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct TXT {
    pub text: Vec<Vec<u8>>,
}

impl TXT {
    /// Returns all strings concatenated.
    pub fn data(&self) -> Vec<u8> {
        self.text.concat()
    }
}

impl RdataTrait for TXT {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        let mut text = Vec::new();
        let mut bytes_read = 0;
        while bytes_read < rdlength as usize {
            let (s, len) = parse_string(rdata)?;
            bytes_read += len;
            text.push(s);
        }
        Ok(Rdata::TXT(Self { text }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let mut bytes_written = 0;
        for string in &self.text {
            bytes_written += encode_string_into(string, buf)?;
        }
        Ok(bytes_written)
    }
}

/// Escapes a character string the way zone files do: `"` and `\` get a backslash, bytes outside
/// printable ASCII become `\DDD`.
fn escape(string: &[u8]) -> String {
    let mut escaped = String::with_capacity(string.len());
    for &b in string {
        match b {
            b'"' | b'\\' => {
                escaped.push('\\');
                escaped.push(b as char);
            }
            0x20..=0x7e => escaped.push(b as char),
            _ => escaped.push_str(&format!("\\{:03}", b)),
        }
    }
    escaped
}

impl Display for TXT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, text) in self.text.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "\"{}\"", escape(text))?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl Serialize for TXT {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.text.iter().map(|s| escape(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::TXT;

    #[test]
    fn binary_strings_are_escaped() {
        let txt = TXT {
            text: vec![b"v=spf1 -all".to_vec(), b"say \"hi\"\x00\xff".to_vec()],
        };
        assert_eq!(txt.to_string(), r#""v=spf1 -all" "say \"hi\"\000\255""#);
        assert_eq!(txt.data().len(), 11 + 10);
    }
}
