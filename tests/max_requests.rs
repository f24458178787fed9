#![cfg(unix)]

use std::io::{self, Read, Write};
use std::net::TcpStream;

use prefork::{Child, Config, Request};

mod util;
use util::{Server, CLIENT_TIMEOUT};

struct CountingEcho;

impl Child for CountingEcho {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        // The per-worker counter restarts with every replacement worker and
        // never reaches the cap.
        assert!(req.requests_handled() < 3);
        let stream = req.stream().unwrap();
        let mut buf = [0; 2];
        stream.read_exact(&mut buf)?;
        stream.write_all(&buf)
    }
}

#[test]
fn workers_rotate_at_the_request_cap() {
    // A pool pinned to one worker with a cap of three requests: seven
    // serial requests force two EXITING_MAX rotations, and every request
    // must still be serviced.
    let config = Config {
        min_servers: 1,
        max_servers: 1,
        min_spare_servers: 1,
        max_spare_servers: 1,
        max_requests: 3,
        ..Config::default()
    };
    let server = Server::start(config, || CountingEcho);

    for i in 0..7u8 {
        let mut stream = TcpStream::connect(server.addr).unwrap();
        stream.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();
        let payload = [b'a' + i, b'\n'];
        stream.write_all(&payload).unwrap();
        let mut buf = [0; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, payload);
    }

    server.stop();
}

#[test]
fn zero_cap_means_unbounded() {
    let config = Config {
        min_servers: 1,
        max_servers: 1,
        min_spare_servers: 1,
        max_spare_servers: 1,
        max_requests: 0,
        ..Config::default()
    };
    let server = Server::start(config, || Unbounded);

    // Far past any small cap; the single worker must survive all of it.
    for _ in 0..20 {
        let mut stream = TcpStream::connect(server.addr).unwrap();
        stream.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();
        stream.write_all(b"x\n").unwrap();
        let mut buf = [0; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x\n");
    }

    server.stop();
}

struct Unbounded;

impl Child for Unbounded {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        let stream = req.stream().unwrap();
        let mut buf = [0; 2];
        stream.read_exact(&mut buf)?;
        stream.write_all(&buf)
    }
}
