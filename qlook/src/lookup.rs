//! Driving lookup sessions: one per server, run concurrently.

use std::panic;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use qlook_proto::Message;
use tracing::{debug, warn};

use crate::entry::Entry;
use crate::error::ConfigError;
use crate::transport::{new_transport, Exchange, Protocol, Transport, TransportConfig};

/// Reverse lookups of the addresses in the answers.
#[derive(Clone, Debug, Default)]
pub struct PtrOptions {
    pub enabled: bool,
    /// Queried over plain DNS instead of the session's server if set.
    pub server: Option<String>,
}

/// Sends `queries` to `server` one after another and collects the replies.
///
/// A failed exchange is logged and leaves its slot empty, so the entry always has as many replies
/// as queries.
pub fn run_session<T: Exchange + ?Sized>(
    server: &str,
    transport: &mut T,
    queries: Vec<Message>,
) -> Entry {
    let mut entry = Entry::new(server, queries);
    let start = Instant::now();
    for query in &entry.queries {
        let reply = match transport.exchange(query) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(server, id = query.header.msg_id, "query failed: {:#}", e);
                None
            }
        };
        entry.replies.push(reply);
    }
    entry.time = start.elapsed();
    debug!(server, time = ?entry.time, "session finished");
    entry
}

/// Queries every server in `servers` with a copy of `queries`, each in its own thread, and
/// returns the entries in server order.
///
/// The protocol of a server is `protocol` if given and inferred from the server string otherwise.
/// All transports are built before any query is sent, so a configuration error aborts the lookup
/// without network traffic.
pub fn lookup_all(
    servers: &[String],
    protocol: Option<Protocol>,
    queries: &[Message],
    config: &TransportConfig,
    tls: &Arc<rustls::ClientConfig>,
    ptr: &PtrOptions,
) -> Result<Vec<Entry>, ConfigError> {
    let mut sessions = Vec::with_capacity(servers.len());
    for server in servers {
        let protocol = match protocol {
            Some(protocol) => protocol,
            None => Protocol::from_server(server)?,
        };
        let transport = new_transport(server, protocol, config, tls)?;
        let ptr_transport = match ptr.server.as_deref().filter(|_| ptr.enabled) {
            Some(ptr_server) => Some(new_transport(ptr_server, Protocol::Plain, config, tls)?),
            None => None,
        };
        sessions.push((server.as_str(), transport, ptr_transport));
    }

    let entries: Vec<Entry> = thread::scope(|scope| {
        let handles: Vec<_> = sessions
            .into_iter()
            .map(|(server, mut transport, mut ptr_transport)| {
                let queries = queries.to_vec();
                scope.spawn(move || {
                    let mut entry = run_session(server, &mut transport, queries);
                    if ptr.enabled {
                        let resolver: &mut Transport = match ptr_transport.as_mut() {
                            Some(dedicated) => dedicated,
                            None => &mut transport,
                        };
                        entry.load_ptrs(resolver);
                    }
                    transport.close();
                    if let Some(t) = ptr_transport.as_mut() {
                        t.close();
                    }
                    entry
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    });
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use anyhow::{bail, Result};
    use qlook_proto::{Class, HeaderFlags, Name, Question, RecordType};

    use super::*;

    fn query(id: u16) -> Message {
        let question = Question::new(Name::root(), RecordType::NS, Class::IN);
        Message::new_query(id, question, HeaderFlags::default())
    }

    /// Echoes queries back, except for those with an odd ID.
    struct EvenOnly;

    impl Exchange for EvenOnly {
        fn exchange(&mut self, query: &Message) -> Result<Message> {
            if query.header.msg_id % 2 == 1 {
                bail!("timed out");
            }
            let mut reply = query.clone();
            reply.header.qr = true;
            Ok(reply)
        }
    }

    #[test]
    fn failed_exchanges_leave_empty_slots() {
        let queries = vec![query(2), query(3), query(4)];
        let entry = run_session("192.0.2.53", &mut EvenOnly, queries);

        assert_eq!(entry.replies.len(), entry.queries.len());
        assert!(entry.replies[0].is_some());
        assert!(entry.replies[1].is_none());
        assert_eq!(entry.replies[2].as_ref().map(|r| r.header.msg_id), Some(4));
        assert_eq!(entry.server, "192.0.2.53");
    }

    #[test]
    fn configuration_errors_abort_before_sending() {
        let tls = crate::transport::build_tls_config(&Default::default()).unwrap();
        let servers = vec!["192.0.2.53".to_string(), "gopher://dns.example".to_string()];
        let res = lookup_all(
            &servers,
            None,
            &[query(1)],
            &TransportConfig::default(),
            &tls,
            &PtrOptions::default(),
        );
        assert!(matches!(res, Err(ConfigError::UnsupportedProtocol(_))));
    }
}
