//! The result of querying one server.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

use qlook_proto::{Message, NonOptRecord, Rdata};
use tracing::{debug, warn};

use crate::query::create_ptr_query;
use crate::transport::Exchange;

#[cfg(feature = "json")]
use serde::Serialize;

/// Queries sent to a server and the replies it gave.
///
/// `replies` is parallel to `queries`: slot `i` holds the reply to query `i`, or [`None`] if that
/// exchange failed.
#[cfg_attr(feature = "json", derive(Serialize))]
#[derive(Clone, Debug, Default)]
pub struct Entry {
    pub queries: Vec<Message>,
    pub replies: Vec<Option<Message>>,
    pub server: String,
    #[cfg_attr(feature = "json", serde(with = "duration_millis", rename = "time_ms"))]
    pub time: Duration,
    /// Addresses found in A and AAAA answers, mapped to the name their PTR record points to.
    pub ptrs: HashMap<String, String>,
    /// Answer records that already went through PTR enrichment, in presentation format.
    #[cfg_attr(feature = "json", serde(skip))]
    existing_rrs: HashSet<String>,
}

impl Entry {
    pub fn new(server: impl Into<String>, queries: Vec<Message>) -> Self {
        Self {
            server: server.into(),
            queries,
            ..Default::default()
        }
    }

    /// Returns the addresses of all A and AAAA records in the answer sections, in reply order.
    pub fn answer_addresses(&self) -> Vec<IpAddr> {
        self.address_records().map(|(_, ip)| ip).collect()
    }

    fn address_records(&self) -> impl Iterator<Item = (&NonOptRecord, IpAddr)> {
        self.replies
            .iter()
            .flatten()
            .flat_map(Message::answer_records)
            .filter_map(|record| match &record.rdata {
                Rdata::A(a) => Some((record, IpAddr::V4(a.address))),
                Rdata::AAAA(aaaa) => Some((record, IpAddr::V6(aaaa.address))),
                _ => None,
            })
    }

    /// Looks up the PTR record of every address in the answers over `transport` and caches the
    /// first answer's target.
    ///
    /// Failed lookups are logged and skipped; this never fails. Records that were enriched by an
    /// earlier call are not looked up again.
    pub fn load_ptrs<T: Exchange + ?Sized>(&mut self, transport: &mut T) {
        let records: Vec<(String, IpAddr)> = self
            .address_records()
            .map(|(record, ip)| (record.to_string(), ip))
            .collect();

        for (rr, ip) in records {
            if !self.existing_rrs.insert(rr) {
                continue;
            }

            let query = create_ptr_query(ip);
            let reply = match transport.exchange(&query) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(server = self.server.as_str(), %ip, "PTR lookup failed: {:#}", e);
                    continue;
                }
            };

            let target = reply
                .answer_records()
                .find_map(|record| record.rdata.as_ptr())
                .map(|ptr| ptr.location.to_string());
            match target {
                Some(target) => {
                    debug!(%ip, target = target.as_str(), "cached PTR name");
                    self.ptrs.insert(ip.to_string(), target);
                }
                None => debug!(%ip, "no PTR record"),
            }
        }
    }
}

#[cfg(feature = "json")]
mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(time: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(time.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use anyhow::{bail, Result};
    use qlook_proto::rdata::{A, AAAA, PTR, TXT};
    use qlook_proto::{Class, HeaderFlags, Name, Question, Record, RecordType};

    use super::*;

    fn reply_with(records: Vec<Rdata>) -> Message {
        let name = Name::from_ascii("example.org").unwrap();
        let question = Question::new(name, RecordType::A, Class::IN);
        let mut reply = Message::new_query(1, question, HeaderFlags::default());
        reply.header.qr = true;
        for rdata in records {
            let owner = Name::from_ascii("example.org").unwrap();
            reply.answers.push(Record::NONOPT(NonOptRecord::new(owner, 300, rdata)));
        }
        reply
    }

    /// Answers every PTR query with `host.example` and counts the queries.
    struct PtrResponder {
        queries: usize,
    }

    impl Exchange for PtrResponder {
        fn exchange(&mut self, query: &Message) -> Result<Message> {
            self.queries += 1;
            assert_eq!(query.questions[0].qtype, RecordType::PTR);
            let mut reply = query.clone();
            reply.header.qr = true;
            let ptr = PTR {
                location: Name::from_ascii("host.example").unwrap(),
            };
            reply.answers.push(Record::NONOPT(NonOptRecord::new(
                query.questions[0].qname.clone(),
                60,
                Rdata::PTR(ptr),
            )));
            Ok(reply)
        }
    }

    struct Failing;

    impl Exchange for Failing {
        fn exchange(&mut self, _query: &Message) -> Result<Message> {
            bail!("network unreachable")
        }
    }

    fn entry() -> Entry {
        let queries = vec![reply_with(Vec::new()), reply_with(Vec::new())];
        let mut entry = Entry::new("192.0.2.53", queries);
        entry.replies = vec![
            Some(reply_with(vec![
                Rdata::A(A {
                    address: Ipv4Addr::new(192, 0, 2, 1),
                }),
                Rdata::TXT(TXT {
                    text: vec![b"not an address".to_vec()],
                }),
            ])),
            Some(reply_with(vec![Rdata::AAAA(AAAA {
                address: Ipv6Addr::LOCALHOST,
            })])),
        ];
        entry
    }

    #[test]
    fn addresses_are_enriched() {
        let mut entry = entry();
        let mut responder = PtrResponder { queries: 0 };
        entry.load_ptrs(&mut responder);

        assert_eq!(responder.queries, 2);
        assert_eq!(entry.ptrs["192.0.2.1"], "host.example");
        assert_eq!(entry.ptrs["::1"], "host.example");
        assert_eq!(entry.answer_addresses().len(), 2);
    }

    #[test]
    fn records_are_looked_up_once() {
        let mut entry = entry();
        let mut responder = PtrResponder { queries: 0 };
        entry.load_ptrs(&mut responder);
        entry.load_ptrs(&mut responder);
        assert_eq!(responder.queries, 2);
    }

    #[test]
    fn failing_transport_is_not_an_error() {
        let mut entry = entry();
        entry.load_ptrs(&mut Failing);
        assert!(entry.ptrs.is_empty());
    }

    #[test]
    fn missing_replies_are_skipped() {
        let mut entry = entry();
        entry.replies[0] = None;
        let mut responder = PtrResponder { queries: 0 };
        entry.load_ptrs(&mut responder);
        assert_eq!(responder.queries, 1);
        assert_eq!(entry.ptrs.len(), 1);
    }
}
