#![cfg(unix)]

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use prefork::{Child, Config, Request};

mod util;
use util::{Server, CLIENT_TIMEOUT};

struct Echo;

impl Child for Echo {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        let stream = req.stream().unwrap();
        let mut buf = [0; 6];
        stream.read_exact(&mut buf)?;
        stream.write_all(&buf)
    }
}

fn connect(server: &Server) -> TcpStream {
    let stream = TcpStream::connect(server.addr).expect("unable to connect");
    stream.set_read_timeout(Some(CLIENT_TIMEOUT)).unwrap();
    stream.set_write_timeout(Some(CLIENT_TIMEOUT)).unwrap();
    stream
}

fn echo_once(server: &Server, payload: &[u8; 6]) {
    let mut stream = connect(server);
    stream.write_all(payload).unwrap();
    let mut buf = [0; 6];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, payload);
}

#[test]
fn echo_under_steady_load() {
    let config = Config {
        min_servers: 2,
        max_servers: 4,
        min_spare_servers: 1,
        max_spare_servers: 2,
        ..Config::default()
    };
    let server = Server::start(config, || Echo);

    for _ in 0..50 {
        let mut payload: [u8; 6] = rand::random();
        payload[5] = b'\n';
        echo_once(&server, &payload);
    }

    server.stop();
}

struct FailOnBoom;

impl Child for FailOnBoom {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        let stream = req.stream().unwrap();
        let mut buf = [0; 6];
        stream.read_exact(&mut buf)?;
        if &buf == b"boom!\n" {
            return Err(io::Error::new(io::ErrorKind::Other, "boom requested"));
        }
        stream.write_all(&buf)
    }
}

#[test]
fn worker_error_is_replaced() {
    let config = Config {
        min_servers: 1,
        max_servers: 2,
        min_spare_servers: 1,
        max_spare_servers: 2,
        ..Config::default()
    };
    let server = Server::start(config, || FailOnBoom);

    // A healthy request first.
    {
        let mut stream = connect(&server);
        stream.write_all(b"fine!\n").unwrap();
        let mut buf = [0; 6];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"fine!\n");
    }

    // This one makes the worker exit with EXITING_ERROR; the connection is
    // dropped without a reply.
    {
        let mut stream = connect(&server);
        stream.write_all(b"boom!\n").unwrap();
        let mut buf = [0; 6];
        assert!(stream.read_exact(&mut buf).is_err());
    }

    // The sizing controller forks a replacement; service resumes.
    {
        let mut stream = connect(&server);
        stream.write_all(b"again\n").unwrap();
        let mut buf = [0; 6];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"again\n");
    }

    server.stop();
}

struct SlowEcho;

impl Child for SlowEcho {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        let stream = req.stream().unwrap();
        let mut buf = [0; 6];
        stream.read_exact(&mut buf)?;
        std::thread::sleep(Duration::from_millis(200));
        stream.write_all(&buf)
    }
}

#[test]
fn graceful_shutdown_completes_request_in_flight() {
    let config = Config {
        min_servers: 1,
        max_servers: 2,
        min_spare_servers: 1,
        max_spare_servers: 2,
        ..Config::default()
    };
    let server = Server::start(config, || SlowEcho);
    let addr = server.addr;

    let mut stream = connect(&server);
    stream.write_all(b"hello\n").unwrap();
    // Let the worker go BUSY, then request a stop mid-request.
    std::thread::sleep(Duration::from_millis(50));
    server.shutdown_handle().request();

    // The request in flight still completes.
    let mut buf = [0; 6];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello\n");

    // After the manager exits the socket is released.
    server.stop();
    assert!(TcpStream::connect(addr).is_err());
}
