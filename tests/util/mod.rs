// Not every helper is used by every test binary.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Once;
use std::thread;
use std::time::Duration;

use prefork::{Child, Config, Manager, Shutdown};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // Another harness in the same process may already have installed a
        // logger.
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// How long clients wait on a socket before declaring the server stuck.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A manager running on an ephemeral port in a background thread, stopped
/// and joined on drop.
pub struct Server {
    pub addr: SocketAddr,
    shutdown: Shutdown,
    thread: Option<thread::JoinHandle<()>>,
}

impl Server {
    pub fn start<C, F>(config: Config, factory: F) -> Server
    where
        C: Child + 'static,
        F: FnMut() -> C + Send + 'static,
    {
        init();
        let config = Config { port: 0, ..config };
        let mut manager = Manager::new(config, factory).expect("unable to create manager");
        let addr = manager.bound_address().expect("not in reuse-port mode");
        let shutdown = manager.shutdown_handle();
        let thread = thread::spawn(move || manager.run().expect("manager failed"));
        // Give the pool a beat to fork its first workers.
        thread::sleep(Duration::from_millis(200));
        Server {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stops the manager and waits for the full graceful shutdown.
    pub fn stop(mut self) {
        self.shutdown.request();
        if let Some(thread) = self.thread.take() {
            thread.join().expect("manager thread panicked");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.request();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
