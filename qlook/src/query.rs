//! Turning [`Options`] into DNS query messages.

use std::net::IpAddr;

use qlook_proto::{Class, HeaderFlags, Message, Name, Question, RecordType};

use crate::edns::attach_opt;
use crate::error::ConfigError;
use crate::options::Options;

/// Builds one query per entry of `opts.types`, in the same order.
///
/// Fails on the first query whose EDNS options are invalid.
pub fn create_queries(opts: &Options) -> Result<Vec<Message>, ConfigError> {
    opts.types
        .iter()
        .map(|&qtype| create_query(opts, qtype))
        .collect()
}

/// Builds a single query for `opts.name` with the given type.
///
/// The message ID is `opts.id` if set, and a fresh random number otherwise. The header flags are
/// copied from `opts.header` unchanged; an `OPT` record is attached if any EDNS feature is
/// requested.
///
/// # Examples
/// ```rust
/// use qlook::options::Options;
/// use qlook::query::create_query;
/// use qlook_proto::{Name, RecordType};
///
/// let opts = Options {
///     name: Name::from_ascii("example.com").unwrap(),
///     id: Some(7),
///     ..Default::default()
/// };
/// let query = create_query(&opts, RecordType::MX).unwrap();
/// assert_eq!(query.header.msg_id, 7);
/// assert!(query.header.flags.rd);
/// assert_eq!(query.questions[0].qtype, RecordType::MX);
/// ```
pub fn create_query(opts: &Options, qtype: RecordType) -> Result<Message, ConfigError> {
    let msg_id = opts.id.unwrap_or_else(rand::random);
    let question = Question::new(opts.name.clone(), qtype, opts.class);
    let mut msg = Message::new_query(msg_id, question, opts.header.into());
    attach_opt(&mut msg, &opts.edns, opts.udp_buffer)?;
    Ok(msg)
}

/// Builds the `PTR` query used to look up the name of `ip`: recursion desired, a random message
/// ID and no EDNS.
pub fn create_ptr_query(ip: IpAddr) -> Message {
    let flags = HeaderFlags {
        rd: true,
        ..Default::default()
    };
    let question = Question::new(Name::reverse(ip), RecordType::PTR, Class::IN);
    Message::new_query(rand::random(), question, flags)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use qlook_proto::OptionCode;

    use super::*;
    use crate::options::{EdnsOptions, HeaderOptions};

    fn opts() -> Options {
        Options {
            name: Name::from_ascii("example.org").unwrap(),
            types: vec![RecordType::A, RecordType::AAAA, RecordType::TXT],
            ..Default::default()
        }
    }

    #[test]
    fn one_query_per_type_in_order() {
        let queries = create_queries(&opts()).unwrap();
        let types: Vec<_> = queries.iter().map(|q| q.questions[0].qtype).collect();
        assert_eq!(types, vec![RecordType::A, RecordType::AAAA, RecordType::TXT]);
        for query in &queries {
            assert_eq!(query.questions.len(), 1);
            assert_eq!(query.questions[0].qname, Name::from_ascii("example.org").unwrap());
            assert_eq!(query.questions[0].qclass, Class::IN);
        }
    }

    #[test]
    fn fixed_id_is_used_for_every_query() {
        let opts = Options {
            id: Some(0xbeef),
            ..opts()
        };
        for query in create_queries(&opts).unwrap() {
            assert_eq!(query.header.msg_id, 0xbeef);
        }
    }

    #[test]
    fn unset_id_is_drawn_per_query() {
        let opts = Options {
            id: None,
            types: vec![RecordType::A; 50],
            ..opts()
        };
        let ids: HashSet<u16> = create_queries(&opts)
            .unwrap()
            .iter()
            .map(|q| q.header.msg_id)
            .collect();
        assert!(ids.len() > 1);
    }

    #[test]
    fn unusual_header_flags_are_kept() {
        let opts = Options {
            header: HeaderOptions {
                aa: true,
                tc: true,
                z: true,
                ra: true,
                ad: true,
                cd: true,
                rd: false,
            },
            ..opts()
        };
        let query = create_query(&opts, RecordType::A).unwrap();
        let flags = query.header.flags;
        assert!(flags.aa && flags.tc && flags.z && flags.ra && flags.ad && flags.cd);
        assert!(!flags.rd);
        assert!(!query.header.qr);
    }

    #[test]
    fn edns_is_attached_to_every_query() {
        let opts = Options {
            edns: EdnsOptions {
                nsid: true,
                ..Default::default()
            },
            udp_buffer: 4096,
            ..opts()
        };
        for query in create_queries(&opts).unwrap() {
            let opt = query.opt().unwrap();
            assert_eq!(opt.payload_size, 4096);
            assert!(opt.option(OptionCode::Nsid).is_some());
        }
    }

    #[test]
    fn invalid_edns_aborts_all_queries() {
        let opts = Options {
            edns: EdnsOptions {
                client_subnet: Some("10.0.0.0/40".into()),
                ..Default::default()
            },
            ..opts()
        };
        assert!(create_queries(&opts).is_err());
    }

    #[test]
    fn ptr_query_shape() {
        let query = create_ptr_query("192.0.2.1".parse().unwrap());
        assert!(query.header.flags.rd);
        assert!(query.opt().is_none());
        assert_eq!(query.questions[0].qtype, RecordType::PTR);
        assert_eq!(query.questions[0].qname.to_string(), "1.2.0.192.in-addr.arpa");
    }
}
