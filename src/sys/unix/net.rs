use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Whether this platform has `SO_REUSEPORT`. When it does not, a reuse-port
/// request falls back to binding the shared socket in the parent.
#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
pub const REUSE_PORT_SUPPORTED: bool = true;
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
pub const REUSE_PORT_SUPPORTED: bool = false;

/// Creates a bound, listening TCP socket: `socket(2)`, SO_REUSEADDR (and
/// SO_REUSEPORT when asked), `bind(2)`, `listen(2)`.
pub fn bind_tcp(addr: SocketAddr, backlog: u32, reuse_port: bool) -> io::Result<TcpListener> {
    let socket = new_socket(&addr, libc::SOCK_STREAM)?;
    set_reuseaddr(socket.as_raw_fd())?;
    if reuse_port {
        set_reuseport(socket.as_raw_fd())?;
    }
    bind(socket.as_raw_fd(), &addr)?;
    syscall!(listen(socket.as_raw_fd(), backlog as libc::c_int))?;
    Ok(TcpListener::from(socket))
}

/// Creates a bound UDP socket.
pub fn bind_udp(addr: SocketAddr, reuse_port: bool) -> io::Result<UdpSocket> {
    let socket = new_socket(&addr, libc::SOCK_DGRAM)?;
    set_reuseaddr(socket.as_raw_fd())?;
    if reuse_port {
        set_reuseport(socket.as_raw_fd())?;
    }
    bind(socket.as_raw_fd(), &addr)?;
    Ok(UdpSocket::from(socket))
}

/// Sets SO_RCVTIMEO. On the shared listening socket this bounds how long a
/// worker that lost the accept race stays blocked in `accept`/`recvfrom`.
pub fn set_recv_timeout(fd: RawFd, timeout: Duration) -> io::Result<()> {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_RCVTIMEO,
        &tv as *const _ as *const libc::c_void,
        mem::size_of::<libc::timeval>() as libc::socklen_t,
    ))
    .map(|_| ())
}

fn new_socket(addr: &SocketAddr, ty: libc::c_int) -> io::Result<OwnedFd> {
    let domain = match addr {
        SocketAddr::V4(..) => libc::AF_INET,
        SocketAddr::V6(..) => libc::AF_INET6,
    };

    #[cfg(not(any(
        target_os = "ios",
        target_os = "macos",
        target_os = "tvos",
        target_os = "watchos"
    )))]
    let ty = ty | libc::SOCK_CLOEXEC;

    let fd = syscall!(socket(domain, ty, 0))?;
    // SAFETY: `socket(2)` returned a valid descriptor.
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    // Darwin lacks SOCK_CLOEXEC.
    #[cfg(any(
        target_os = "ios",
        target_os = "macos",
        target_os = "tvos",
        target_os = "watchos"
    ))]
    syscall!(fcntl(socket.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC))?;

    Ok(socket)
}

fn set_reuseaddr(fd: RawFd) -> io::Result<()> {
    let val: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEADDR,
        &val as *const libc::c_int as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

#[cfg(not(any(target_os = "solaris", target_os = "illumos")))]
fn set_reuseport(fd: RawFd) -> io::Result<()> {
    let val: libc::c_int = 1;
    syscall!(setsockopt(
        fd,
        libc::SOL_SOCKET,
        libc::SO_REUSEPORT,
        &val as *const libc::c_int as *const libc::c_void,
        mem::size_of::<libc::c_int>() as libc::socklen_t,
    ))
    .map(|_| ())
}

#[cfg(any(target_os = "solaris", target_os = "illumos"))]
fn set_reuseport(_fd: RawFd) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "SO_REUSEPORT is not available on this platform",
    ))
}

fn bind(fd: RawFd, addr: &SocketAddr) -> io::Result<()> {
    let (addr, len) = socket_addr(addr);
    syscall!(bind(fd, addr.as_ptr(), len)).map(|_| ())
}

/// Converts a `SocketAddr` into its system representation for `bind(2)`.
fn socket_addr(addr: &SocketAddr) -> (SocketAddrCRepr, libc::socklen_t) {
    match addr {
        SocketAddr::V4(addr) => {
            let sin = libc::sockaddr_in {
                #[cfg(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd",
                    target_os = "tvos",
                    target_os = "watchos"
                ))]
                sin_len: 0,
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: addr.port().to_be(),
                sin_addr: libc::in_addr {
                    // `octets` returns the address in network byte order.
                    s_addr: u32::from_ne_bytes(addr.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            (
                SocketAddrCRepr { v4: sin },
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        }
        SocketAddr::V6(addr) => {
            let sin6 = libc::sockaddr_in6 {
                #[cfg(any(
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "ios",
                    target_os = "macos",
                    target_os = "netbsd",
                    target_os = "openbsd",
                    target_os = "tvos",
                    target_os = "watchos"
                ))]
                sin6_len: 0,
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: addr.port().to_be(),
                sin6_flowinfo: addr.flowinfo(),
                sin6_addr: libc::in6_addr {
                    s6_addr: addr.ip().octets(),
                },
                sin6_scope_id: addr.scope_id(),
                #[cfg(any(target_os = "illumos", target_os = "solaris"))]
                __sin6_src_id: 0,
            };
            (
                SocketAddrCRepr { v6: sin6 },
                mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
            )
        }
    }
}

#[repr(C)]
union SocketAddrCRepr {
    v4: libc::sockaddr_in,
    v6: libc::sockaddr_in6,
}

impl SocketAddrCRepr {
    fn as_ptr(&self) -> *const libc::sockaddr {
        self as *const SocketAddrCRepr as *const libc::sockaddr
    }
}
