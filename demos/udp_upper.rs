//! A UDP server that replies to each datagram with its payload uppercased.
//!
//! Run it from the repository root:
//!
//!     cargo run --example udp_upper
//!
//! then: `echo hello | nc -u 127.0.0.1 10000`

use std::io;

use prefork::{Child, Config, Manager, Protocol, Request};

struct Upper;

impl Child for Upper {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        let reply = req.payload().expect("udp server").to_ascii_uppercase();
        req.respond_to(&reply)?;
        Ok(())
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let config = Config {
        protocol: Protocol::Udp,
        min_servers: 2,
        max_servers: 4,
        ..Config::default()
    };
    let mut manager = Manager::new(config, || Upper)?;
    println!("uppercasing datagrams on {:?}", manager.bound_address());
    manager.run()
}
