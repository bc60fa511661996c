//! Building the `OPT` record of a query from [`EdnsOptions`].

use std::net::IpAddr;

use data_encoding::HEXLOWER_PERMISSIVE;
use qlook_proto::{ClientSubnet, EdnsOption, Message, OptRecord};
use tracing::debug;

use crate::error::ConfigError;
use crate::options::EdnsOptions;

/// Queries are padded to a multiple of this many bytes (RFC 8467, "Block-Length Padding").
pub const PADDING_BLOCK: usize = 128;

/// Attaches an `OPT` record built from `edns` to `msg`.
///
/// Does nothing if no EDNS feature is requested. Otherwise the options are added in the order
/// NSID, padding, client subnet, cookie, and `udp_buffer` is advertised as the payload size.
///
/// With padding enabled, the padding length is computed from the encoded size of the finished
/// message (including a zero-length padding option), so `msg` must not be changed afterwards.
pub fn attach_opt(
    msg: &mut Message,
    edns: &EdnsOptions,
    udp_buffer: u16,
) -> Result<(), ConfigError> {
    if !edns.is_active() {
        return Ok(());
    }

    let mut opt = OptRecord::new(udp_buffer, edns.dnssec);
    if edns.nsid {
        opt.options.push(EdnsOption::Nsid(Vec::new()));
    }
    if edns.pad {
        opt.options.push(EdnsOption::Padding(0));
    }
    if let Some(subnet) = edns.client_subnet.as_deref().filter(|s| !s.is_empty()) {
        opt.options
            .push(EdnsOption::ClientSubnet(parse_client_subnet(subnet)?));
    }
    if let Some(cookie) = edns.cookie.as_deref().filter(|s| !s.is_empty()) {
        opt.options.push(EdnsOption::Cookie(parse_cookie(cookie)?));
    }
    msg.push_opt(opt);

    if edns.pad {
        let unpadded = msg.encode()?.len();
        let len = padding_len(unpadded, udp_buffer);
        if let Some(opt) = msg.opt_mut() {
            for option in opt.options.iter_mut() {
                if let EdnsOption::Padding(pad) = option {
                    *pad = len;
                }
            }
        }
    }

    Ok(())
}

/// Returns the number of padding bytes for a message of `unpadded_len` bytes.
///
/// The result pads the message to the next multiple of [`PADDING_BLOCK`], but never past
/// `bufsize`. If the block boundary lies beyond `bufsize`, only the bytes left up to `bufsize`
/// are used (possibly none).
///
/// # Examples
/// ```rust
/// use qlook::edns::padding_len;
///
/// assert_eq!(padding_len(50, 1232), 78);
/// assert_eq!(padding_len(128, 1232), 0);
/// assert_eq!(padding_len(1200, 1232), 32);
/// assert_eq!(padding_len(1240, 1232), 0);
/// ```
pub fn padding_len(unpadded_len: usize, bufsize: u16) -> u16 {
    let pad = (PADDING_BLOCK - unpadded_len % PADDING_BLOCK) % PADDING_BLOCK;
    let bufsize = bufsize as usize;
    if unpadded_len + pad > bufsize {
        let clamped = bufsize.saturating_sub(unpadded_len);
        debug!(
            unpadded_len,
            bufsize, "padding block exceeds buffer size, padding with {} bytes", clamped
        );
        return clamped as u16;
    }
    pad as u16
}

/// Parses a client subnet in CIDR notation.
///
/// An IPv4-mapped IPv6 address (`::ffff:a.b.c.d`) is treated as IPv4, so its prefix must not
/// exceed 32. The scope prefix is always zero.
///
/// # Examples
/// ```rust
/// use qlook::edns::parse_client_subnet;
///
/// let subnet = parse_client_subnet("::ffff:192.0.2.0/24").unwrap();
/// assert_eq!(subnet.family(), 1);
/// assert_eq!(subnet.source_prefix, 24);
///
/// assert!(parse_client_subnet("192.0.2.0").is_err());
/// assert!(parse_client_subnet("192.0.2.0/33").is_err());
/// ```
pub fn parse_client_subnet(cidr: &str) -> Result<ClientSubnet, ConfigError> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| ConfigError::InvalidSubnet(cidr.to_string()))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| ConfigError::InvalidSubnet(cidr.to_string()))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| ConfigError::InvalidSubnet(cidr.to_string()))?;

    let addr = match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };
    let (max, family) = match addr {
        IpAddr::V4(_) => (32, "IPv4"),
        IpAddr::V6(_) => (128, "IPv6"),
    };
    if prefix > max {
        return Err(ConfigError::InvalidSubnetPrefix { prefix, family });
    }

    Ok(ClientSubnet::new(addr, prefix))
}

fn parse_cookie(cookie: &str) -> Result<Vec<u8>, ConfigError> {
    HEXLOWER_PERMISSIVE
        .decode(cookie.as_bytes())
        .map_err(|_| ConfigError::InvalidCookie(cookie.to_string()))
}

#[cfg(test)]
mod tests {
    use qlook_proto::{Class, HeaderFlags, Name, OptionCode, Question, RecordType};

    use super::*;

    fn query(name: &str) -> Message {
        let question = Question::new(Name::from_ascii(name).unwrap(), RecordType::A, Class::IN);
        Message::new_query(0x4242, question, HeaderFlags::default())
    }

    #[test]
    fn inactive_options_add_no_opt_record() {
        let mut msg = query("example.com");
        attach_opt(&mut msg, &EdnsOptions::default(), 1232).unwrap();
        assert!(msg.opt().is_none());
        assert!(msg.additional_answers.is_empty());
    }

    #[test]
    fn options_are_added_in_order() {
        let mut msg = query("example.com");
        let edns = EdnsOptions {
            dnssec: true,
            nsid: true,
            pad: true,
            client_subnet: Some("2001:db8::/48".into()),
            cookie: Some("0011223344556677".into()),
        };
        attach_opt(&mut msg, &edns, 1232).unwrap();

        let opt = msg.opt().unwrap();
        assert!(opt.dnssec_ok);
        assert_eq!(opt.payload_size, 1232);
        let codes: Vec<_> = opt.options.iter().map(EdnsOption::code).collect();
        assert_eq!(
            codes,
            vec![
                OptionCode::Nsid,
                OptionCode::Padding,
                OptionCode::ClientSubnet,
                OptionCode::Cookie
            ]
        );
        assert_eq!(
            opt.option(OptionCode::Cookie),
            Some(&EdnsOption::Cookie(vec![
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77
            ]))
        );
    }

    #[test]
    fn padded_query_is_a_multiple_of_the_block_size() {
        for name in ["a.example", "www.example.com", "a-much-longer-label.example.org"] {
            let mut msg = query(name);
            let edns = EdnsOptions {
                pad: true,
                ..Default::default()
            };
            attach_opt(&mut msg, &edns, 1232).unwrap();
            assert_eq!(msg.encode().unwrap().len() % PADDING_BLOCK, 0, "{}", name);
        }
    }

    #[test]
    fn padding_is_clamped_to_the_buffer_size() {
        let mut msg = query("example.com");
        let edns = EdnsOptions {
            pad: true,
            ..Default::default()
        };
        // header 12 + question 17 + OPT 11 + empty padding option 4
        attach_opt(&mut msg, &edns, 50).unwrap();
        assert_eq!(
            msg.opt().unwrap().option(OptionCode::Padding),
            Some(&EdnsOption::Padding(6))
        );
        assert_eq!(msg.encode().unwrap().len(), 50);

        let mut msg = query("example.com");
        attach_opt(&mut msg, &edns, 20).unwrap();
        assert_eq!(
            msg.opt().unwrap().option(OptionCode::Padding),
            Some(&EdnsOption::Padding(0))
        );
    }

    #[test]
    fn subnet_parsing() {
        let v4 = parse_client_subnet("203.0.113.0/24").unwrap();
        assert_eq!(v4.family(), 1);
        assert_eq!(v4.source_prefix, 24);
        assert_eq!(v4.scope_prefix, 0);

        let v6 = parse_client_subnet("2001:db8::/32").unwrap();
        assert_eq!(v6.family(), 2);
        assert_eq!(v6.scope_prefix, 0);

        assert!(matches!(
            parse_client_subnet("::ffff:192.0.2.0/120"),
            Err(ConfigError::InvalidSubnetPrefix { prefix: 120, .. })
        ));
        assert!(matches!(
            parse_client_subnet("2001:db8::/129"),
            Err(ConfigError::InvalidSubnetPrefix { .. })
        ));
        assert!(matches!(
            parse_client_subnet("example.com/24"),
            Err(ConfigError::InvalidSubnet(_))
        ));
    }

    #[test]
    fn invalid_subnet_fails_the_query() {
        let mut msg = query("example.com");
        let edns = EdnsOptions {
            client_subnet: Some("not-a-subnet".into()),
            ..Default::default()
        };
        assert!(matches!(
            attach_opt(&mut msg, &edns, 1232),
            Err(ConfigError::InvalidSubnet(_))
        ));
    }

    #[test]
    fn invalid_cookie_is_rejected() {
        let mut msg = query("example.com");
        let edns = EdnsOptions {
            cookie: Some("xyz".into()),
            ..Default::default()
        };
        assert!(matches!(
            attach_opt(&mut msg, &edns, 1232),
            Err(ConfigError::InvalidCookie(_))
        ));
    }
}
