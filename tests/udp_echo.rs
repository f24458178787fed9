#![cfg(unix)]

use std::io;
use std::net::UdpSocket;

use prefork::{Child, Config, Protocol, Request};

mod util;
use util::{Server, CLIENT_TIMEOUT};

struct Upper;

impl Child for Upper {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        assert_eq!(req.protocol(), Protocol::Udp);
        assert!(req.stream().is_none());
        let reply = req.payload().unwrap().to_ascii_uppercase();
        req.respond_to(&reply)?;
        Ok(())
    }
}

#[test]
fn datagrams_are_answered_in_order() {
    let config = Config {
        protocol: Protocol::Udp,
        min_servers: 1,
        max_servers: 1,
        min_spare_servers: 1,
        max_spare_servers: 1,
        ..Config::default()
    };
    let server = Server::start(config, || Upper);

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();

    for payload in [&b"a"[..], b"bb", b"ccc"] {
        client.send_to(payload, server.addr).unwrap();
    }

    let mut buf = [0; 16];
    for expected in [&b"A"[..], b"BB", b"CCC"] {
        let (n, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(from, server.addr);
        assert_eq!(&buf[..n], expected);
    }

    server.stop();
}

#[test]
fn empty_datagram_is_a_unit_of_work() {
    let config = Config {
        protocol: Protocol::Udp,
        min_servers: 1,
        max_servers: 1,
        min_spare_servers: 1,
        max_spare_servers: 1,
        ..Config::default()
    };
    let server = Server::start(config, || Upper);

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();

    client.send_to(b"", server.addr).unwrap();
    // The reply is empty too; a follow-up round proves the worker is alive.
    let mut buf = [0; 16];
    let (n, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(n, 0);

    client.send_to(b"still here", server.addr).unwrap();
    let (n, _) = client.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"STILL HERE");

    server.stop();
}
