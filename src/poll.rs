use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use log::trace;

use crate::{sys, Events, Interest, Token};

/// Readiness polling over the best primitive the platform offers.
///
/// `Poll` watches a set of descriptors for readiness and returns the ready
/// ones as [`Event`]s keyed by the [`Token`] chosen at registration. The
/// backend is picked at compile time: epoll on Linux, Android and illumos,
/// kqueue on the BSDs and macOS, and `poll(2)` everywhere else (or anywhere
/// when built with the `prefork_force_poll_poll` cfg).
///
/// The interface is level triggered on every backend: a source that is ready
/// and not drained is reported again by the next call. Closing the poller is
/// dropping it.
///
/// # Examples
///
/// ```
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// use std::io::Write;
/// use std::os::unix::net::UnixStream;
/// use std::time::Duration;
///
/// use prefork::{Events, Interest, Poll, Token};
///
/// let mut poll = Poll::new()?;
/// let mut events = Events::with_capacity(16);
///
/// let (mut tx, rx) = UnixStream::pair()?;
/// poll.register(&rx, Token(0), Interest::READABLE)?;
///
/// tx.write_all(b"ping")?;
/// poll.poll(&mut events, Some(Duration::from_secs(1)))?;
///
/// for event in &events {
///     assert_eq!(event.token(), Token(0));
///     assert!(event.is_readable());
/// }
/// #     Ok(())
/// # }
/// ```
///
/// [`Event`]: crate::event::Event
pub struct Poll {
    selector: sys::Selector,
}

impl Poll {
    /// Creates a new poller.
    pub fn new() -> io::Result<Poll> {
        sys::Selector::new().map(|selector| Poll { selector })
    }

    /// Starts watching `source`, tagging its events with `token`.
    pub fn register<S: AsRawFd>(&self, source: &S, token: Token, interest: Interest) -> io::Result<()> {
        trace!(
            "registering event source with poller: token={:?}, interest={:?}",
            token,
            interest
        );
        self.selector.register(source.as_raw_fd(), token, interest)
    }

    /// Changes the interest set (and token) of an already watched source.
    pub fn reregister<S: AsRawFd>(&self, source: &S, token: Token, interest: Interest) -> io::Result<()> {
        trace!(
            "reregistering event source with poller: token={:?}, interest={:?}",
            token,
            interest
        );
        self.selector.reregister(source.as_raw_fd(), token, interest)
    }

    /// Stops watching `source`.
    ///
    /// Deregistering a source that is not (or no longer) registered is a
    /// no-op, so teardown paths need not track registration state.
    pub fn deregister<S: AsRawFd>(&self, source: &S) -> io::Result<()> {
        self.deregister_fd(source.as_raw_fd())
    }

    pub(crate) fn deregister_fd(&self, fd: RawFd) -> io::Result<()> {
        trace!("deregistering event source from poller: fd={}", fd);
        match self.selector.deregister(fd) {
            Err(ref err)
                if err.raw_os_error() == Some(libc::ENOENT)
                    || err.raw_os_error() == Some(libc::EBADF) =>
            {
                Ok(())
            }
            other => other,
        }
    }

    /// Blocks until a watched source is ready or `timeout` elapses, filling
    /// `events` up to its capacity. `None` blocks indefinitely.
    ///
    /// A signal interrupting the underlying call yields an empty set rather
    /// than an error; callers in signal-heavy processes simply loop.
    pub fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        match self.selector.select(events.sys(), timeout) {
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {
                events.clear();
                Ok(())
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Poll {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Poll").finish()
    }
}
