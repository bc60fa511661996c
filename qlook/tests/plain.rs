use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use qlook::lookup::{lookup_all, run_session, PtrOptions};
use qlook::net::{read_framed, write_framed};
use qlook::options::Options;
use qlook::query::create_queries;
use qlook::transport::{
    build_tls_config, new_transport, Exchange, Protocol, TlsOptions, TransportConfig,
};
use qlook_proto::rdata::{A, PTR};
use qlook_proto::{Message, Name, NonOptRecord, Rdata, Record, RecordType};

const ANSWER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// Answers A queries with [`ANSWER`] and PTR queries with `host.example`.
fn answer(query: &Message) -> Message {
    let mut reply = query.clone();
    reply.header.qr = true;
    let question = &query.questions[0];
    let rdata = match question.qtype {
        RecordType::A => Rdata::A(A { address: ANSWER }),
        RecordType::PTR => Rdata::PTR(PTR {
            location: Name::from_ascii("host.example").unwrap(),
        }),
        _ => return reply,
    };
    reply
        .answers
        .push(Record::NONOPT(NonOptRecord::new(question.qname.clone(), 60, rdata)));
    reply
}

fn parse(bytes: &[u8]) -> Message {
    Message::parse(&mut Cursor::new(bytes)).unwrap()
}

/// Binds a UDP socket and a TCP listener to the same loopback port.
fn bind_pair() -> (UdpSocket, TcpListener) {
    for _ in 0..16 {
        let tcp = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = tcp.local_addr().unwrap().port();
        if let Ok(udp) = UdpSocket::bind((Ipv4Addr::LOCALHOST, port)) {
            return (udp, tcp);
        }
    }
    panic!("no free port pair");
}

/// Serves UDP queries with `respond` until the socket has been idle for a second.
fn serve_udp(socket: UdpSocket, respond: impl Fn(&Message) -> Vec<Message> + Send + 'static) {
    socket
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    thread::spawn(move || {
        let mut buf = [0; 4096];
        while let Ok((len, peer)) = socket.recv_from(&mut buf) {
            let query = parse(&buf[..len]);
            for reply in respond(&query) {
                socket.send_to(&reply.encode().unwrap(), peer).unwrap();
            }
        }
    });
}

fn config() -> TransportConfig {
    TransportConfig {
        timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn tls() -> Arc<rustls::ClientConfig> {
    build_tls_config(&TlsOptions::default()).unwrap()
}

fn queries(types: &[RecordType]) -> Vec<Message> {
    let opts = Options {
        name: Name::from_ascii("example.org").unwrap(),
        types: types.to_vec(),
        ..Default::default()
    };
    create_queries(&opts).unwrap()
}

fn server(addr: SocketAddr) -> String {
    addr.to_string()
}

#[test]
fn udp_reply_is_returned() {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = socket.local_addr().unwrap();
    serve_udp(socket, |query| vec![answer(query)]);

    let mut transport = new_transport(&server(addr), Protocol::Plain, &config(), &tls()).unwrap();
    let query = &queries(&[RecordType::A])[0];
    let reply = transport.exchange(query).unwrap();
    assert_eq!(reply.header.msg_id, query.header.msg_id);
    assert_eq!(reply.answer_records().count(), 1);
}

#[test]
fn stray_udp_replies_are_skipped() {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = socket.local_addr().unwrap();
    serve_udp(socket, |query| {
        let mut stray = answer(query);
        stray.header.msg_id = query.header.msg_id.wrapping_add(1);
        vec![stray, answer(query)]
    });

    let mut transport = new_transport(&server(addr), Protocol::Plain, &config(), &tls()).unwrap();
    let query = &queries(&[RecordType::A])[0];
    let reply = transport.exchange(query).unwrap();
    assert_eq!(reply.header.msg_id, query.header.msg_id);
}

#[test]
fn truncated_reply_is_retried_over_tcp() {
    let (udp, tcp) = bind_pair();
    let addr = tcp.local_addr().unwrap();
    serve_udp(udp, |query| {
        let mut truncated = query.clone();
        truncated.header.qr = true;
        truncated.header.flags.tc = true;
        vec![truncated]
    });
    thread::spawn(move || {
        let (mut stream, _) = tcp.accept().unwrap();
        let query = parse(&read_framed(&mut stream).unwrap());
        write_framed(&mut stream, &answer(&query).encode().unwrap()).unwrap();
    });

    let mut transport = new_transport(&server(addr), Protocol::Plain, &config(), &tls()).unwrap();
    let reply = transport.exchange(&queries(&[RecordType::A])[0]).unwrap();
    assert!(!reply.header.flags.tc);
    assert_eq!(reply.answer_records().count(), 1);
}

#[test]
fn tcp_transport_skips_udp() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        // one connection serves both queries
        for _ in 0..2 {
            let query = parse(&read_framed(&mut stream).unwrap());
            write_framed(&mut stream, &answer(&query).encode().unwrap()).unwrap();
        }
    });

    let config = TransportConfig {
        reuse_conn: true,
        ..config()
    };
    let mut transport = new_transport(&server(addr), Protocol::Tcp, &config, &tls()).unwrap();
    for query in queries(&[RecordType::A, RecordType::A]) {
        let reply = transport.exchange(&query).unwrap();
        assert_eq!(reply.header.msg_id, query.header.msg_id);
    }
    transport.close();
}

#[test]
fn session_keeps_a_slot_per_query() {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = socket.local_addr().unwrap();
    // ignore everything but A queries
    serve_udp(socket, |query| match query.questions[0].qtype {
        RecordType::A => vec![answer(query)],
        _ => Vec::new(),
    });

    let mut transport = new_transport(&server(addr), Protocol::Plain, &config(), &tls()).unwrap();
    let entry = run_session(
        &server(addr),
        &mut transport,
        queries(&[RecordType::A, RecordType::MX, RecordType::A]),
    );
    assert_eq!(entry.replies.len(), entry.queries.len());
    assert!(entry.replies[0].is_some());
    assert!(entry.replies[1].is_none());
    assert!(entry.replies[2].is_some());
}

#[test]
fn lookup_all_enriches_addresses() {
    let mut servers = Vec::new();
    for _ in 0..2 {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        servers.push(server(socket.local_addr().unwrap()));
        serve_udp(socket, |query| vec![answer(query)]);
    }

    let ptr = PtrOptions {
        enabled: true,
        server: None,
    };
    let entries = lookup_all(
        &servers,
        None,
        &queries(&[RecordType::A]),
        &config(),
        &tls(),
        &ptr,
    )
    .unwrap();

    assert_eq!(entries.len(), 2);
    for (entry, server) in entries.iter().zip(&servers) {
        assert_eq!(&entry.server, server);
        assert_eq!(entry.replies.len(), 1);
        assert_eq!(entry.ptrs["192.0.2.1"], "host.example");
    }
}
