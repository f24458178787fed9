use std::os::fd::RawFd;
use std::{fmt, io};

/// Identifier of a forked worker process.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Pid(libc::pid_t);

impl Pid {
    /// The calling process, as a stand-in record identity in tests.
    #[cfg(test)]
    pub fn current() -> Pid {
        // SAFETY: `getpid(2)` cannot fail.
        Pid(unsafe { libc::getpid() })
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pid").field(&self.0).finish()
    }
}

pub enum Fork {
    Parent(Pid),
    Child,
}

/// Forks the process. The child keeps the parent's descriptors; no `exec`
/// follows.
pub fn fork() -> io::Result<Fork> {
    match syscall!(fork())? {
        0 => Ok(Fork::Child),
        pid => Ok(Fork::Parent(Pid(pid))),
    }
}

/// Waits for `pid` to terminate, retrying on EINTR. ECHILD means the child
/// was already reaped, which callers treat as done.
pub fn wait_for(pid: Pid) -> io::Result<()> {
    let mut status = 0;
    loop {
        match syscall!(waitpid(pid.0, &mut status, 0)) {
            Ok(_) => return Ok(()),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.raw_os_error() == Some(libc::ECHILD) => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// Terminates the calling process immediately, without running atexit
/// handlers. A forked worker shares the parent's stdio buffers and must not
/// flush them a second time on the way out.
pub fn exit(status: i32) -> ! {
    unsafe { libc::_exit(status) }
}

/// Closes a raw descriptor, ignoring errors. Used for descriptors the owner
/// has lost track of.
pub fn close(fd: RawFd) {
    let _ = syscall!(close(fd));
}
