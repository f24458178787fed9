//! A line-echo TCP server over a dynamically sized worker pool.
//!
//! Run it from the repository root:
//!
//!     cargo run --example tcp_echo
//!
//! then connect with `nc 127.0.0.1 10000` and type a line.

use std::io::{self, BufRead, BufReader, Write};

use prefork::{Child, Config, Manager, Request};

struct Echo;

impl Child for Echo {
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        let stream = req.stream().expect("tcp server");
        let mut line = String::new();
        BufReader::new(stream.try_clone()?).read_line(&mut line)?;
        stream.write_all(line.as_bytes())
    }

    fn post_process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
        println!(
            "served {} (request #{} of this worker)",
            req.peer_addr(),
            req.requests_handled() + 1
        );
        Ok(())
    }
}

fn main() -> io::Result<()> {
    env_logger::init();

    let config = Config {
        min_servers: 2,
        max_servers: 8,
        min_spare_servers: 1,
        max_spare_servers: 4,
        ..Config::default()
    };
    let mut manager = Manager::new(config, || Echo)?;
    println!("echoing on {:?}", manager.bound_address());
    println!("try: nc 127.0.0.1 10000");
    manager.run()
}
