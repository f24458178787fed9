use std::io;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use crate::config::{Config, Protocol};
use crate::sys;

/// Timeout armed on the shared listening socket: bounds how long a worker
/// that won the poll wakeup but lost the accept race stays blocked.
const ACCEPT_TIMEOUT: Duration = Duration::from_millis(10);

/// Datagram receive size; one `recvfrom` per unit of work.
const UDP_RECV_SIZE: usize = 8192;

/// The bound endpoint workers accept from, TCP or UDP.
#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl Listener {
    /// Binds according to `config`. `reuse_port` is set when a worker binds
    /// its own socket in reuse-port mode.
    pub(crate) fn bind(config: &Config, reuse_port: bool) -> io::Result<Listener> {
        let addr = config.addr();
        match config.protocol {
            Protocol::Tcp => {
                sys::net::bind_tcp(addr, config.listen_backlog, reuse_port).map(Listener::Tcp)
            }
            Protocol::Udp => sys::net::bind_udp(addr, reuse_port).map(Listener::Udp),
        }
    }

    /// Arms the short receive timeout used in shared-socket mode.
    pub(crate) fn set_accept_timeout(&self) -> io::Result<()> {
        sys::net::set_recv_timeout(self.as_raw_fd(), ACCEPT_TIMEOUT)
    }

    pub(crate) fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr(),
            Listener::Udp(socket) => socket.local_addr(),
        }
    }

    /// Accepts one unit of work. `Ok(None)` is a lost accept race: another
    /// worker took the connection (or datagram) this worker woke up for.
    pub(crate) fn accept(&self) -> io::Result<Option<Accepted>> {
        match self {
            Listener::Tcp(listener) => match listener.accept() {
                Ok((stream, peer)) => Ok(Some(Accepted::Stream(stream, peer))),
                Err(ref err) if lost_race(err) => Ok(None),
                Err(err) => Err(err),
            },
            Listener::Udp(socket) => {
                let mut buf = vec![0; UDP_RECV_SIZE];
                match socket.recv_from(&mut buf) {
                    Ok((len, peer)) => {
                        buf.truncate(len);
                        Ok(Some(Accepted::Datagram(buf, peer)))
                    }
                    Err(ref err) if lost_race(err) => Ok(None),
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// The underlying UDP socket, for datagram replies.
    pub(crate) fn udp_socket(&self) -> Option<&UdpSocket> {
        match self {
            Listener::Udp(socket) => Some(socket),
            Listener::Tcp(_) => None,
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(listener) => listener.as_raw_fd(),
            Listener::Udp(socket) => socket.as_raw_fd(),
        }
    }
}

/// One accepted unit of work.
pub(crate) enum Accepted {
    Stream(TcpStream, SocketAddr),
    Datagram(Vec<u8>, SocketAddr),
}

// With SO_RCVTIMEO armed a lost race can also surface as a timeout.
fn lost_race(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
