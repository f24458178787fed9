use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::sys;

/// Transport protocol served by the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protocol {
    /// Stream connections; each accepted connection is one unit of work.
    Tcp,
    /// Datagrams; each received datagram is one unit of work.
    Udp,
}

/// Pool and endpoint configuration, immutable once the [`Manager`] is
/// constructed.
///
/// Build one with struct update syntax over [`Config::default`]:
///
/// ```
/// use prefork::{Config, Protocol};
///
/// let config = Config {
///     port: 9000,
///     protocol: Protocol::Udp,
///     max_requests: 500,
///     ..Config::default()
/// };
/// ```
///
/// [`Manager`]: crate::Manager
#[derive(Clone, Debug)]
pub struct Config {
    /// Most workers the pool may hold. Default 20.
    pub max_servers: usize,
    /// Fewest workers the pool may hold; also the number forked at startup.
    /// Default 5.
    pub min_servers: usize,
    /// Fewest idle workers to keep available. Default 2.
    pub min_spare_servers: usize,
    /// Most idle workers to keep around before retiring some. Default 10.
    pub max_spare_servers: usize,
    /// Requests a worker services before it is retired and replaced;
    /// 0 means unbounded. Default 0.
    pub max_requests: u64,
    /// Address to bind. Default 127.0.0.1.
    pub bind_ip: IpAddr,
    /// Port to bind; 0 picks an ephemeral port. Default 10000.
    pub port: u16,
    /// Transport protocol. Default TCP.
    pub protocol: Protocol,
    /// TCP listen backlog; ignored for UDP. Default 5.
    pub listen_backlog: u32,
    /// Bind one socket per worker with SO_REUSEPORT instead of sharing a
    /// socket bound by the manager; the kernel then balances connections
    /// across workers. Falls back to the shared socket on platforms without
    /// the option. Default false.
    pub reuse_port: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_servers: 20,
            min_servers: 5,
            min_spare_servers: 2,
            max_spare_servers: 10,
            max_requests: 0,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 10_000,
            protocol: Protocol::Tcp,
            listen_backlog: 5,
            reuse_port: false,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> io::Result<()> {
        if self.min_servers > self.max_servers {
            return Err(invalid(format!(
                "min_servers ({}) cannot exceed max_servers ({})",
                self.min_servers, self.max_servers
            )));
        }
        if self.min_spare_servers > self.max_spare_servers {
            return Err(invalid(format!(
                "min_spare_servers ({}) cannot exceed max_spare_servers ({})",
                self.min_spare_servers, self.max_spare_servers
            )));
        }
        Ok(())
    }

    /// True when the manager binds one socket all workers share, i.e. always
    /// except when reuse-port was requested and the platform has it.
    pub(crate) fn shared_socket(&self) -> bool {
        !(self.reuse_port && sys::net::REUSE_PORT_SUPPORTED)
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};

    use super::{Config, Protocol};

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.max_servers, 20);
        assert_eq!(config.min_servers, 5);
        assert_eq!(config.min_spare_servers, 2);
        assert_eq!(config.max_spare_servers, 10);
        assert_eq!(config.max_requests, 0);
        assert_eq!(config.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port, 10_000);
        assert_eq!(config.protocol, Protocol::Tcp);
        assert_eq!(config.listen_backlog, 5);
        assert!(!config.reuse_port);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_misordered_server_bounds() {
        let config = Config {
            min_servers: 10,
            max_servers: 5,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_misordered_spare_bounds() {
        let config = Config {
            min_spare_servers: 11,
            max_spare_servers: 3,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn equal_bounds_are_valid() {
        let config = Config {
            min_servers: 3,
            max_servers: 3,
            min_spare_servers: 1,
            max_spare_servers: 1,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
