use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::time::Duration;
use std::{fmt, io};

use crate::{Interest, Token};

/// Portable fallback selector built on `poll(2)`, used on platforms without
/// epoll or kqueue and under the `prefork_force_poll_poll` cfg.
///
/// The interest list lives in userspace and `poll(2)` is level triggered by
/// nature, so the facade contract holds without extra bookkeeping. Only
/// readable and writable interests are expressible; PRIORITY is coerced to
/// readable.
pub struct Selector {
    state: Mutex<State>,
}

// `libc::pollfd` has no Debug impl, so no derives here.
struct State {
    poll_fds: Vec<libc::pollfd>,
    tokens: Vec<Token>,
    index: HashMap<RawFd, usize>,
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector").finish()
    }
}

impl Selector {
    pub fn new() -> io::Result<Selector> {
        Ok(Selector {
            state: Mutex::new(State {
                poll_fds: Vec::new(),
                tokens: Vec::new(),
                index: HashMap::new(),
            }),
        })
    }

    pub fn select(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        let timeout = timeout
            .map(|to| {
                // Round up to avoid a sub-millisecond timeout becoming a
                // busy loop.
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis() as libc::c_int
            })
            .unwrap_or(-1);

        events.clear();
        let State { poll_fds, tokens, .. } = &mut *state;
        let mut n_events =
            syscall!(poll(poll_fds.as_mut_ptr(), poll_fds.len() as libc::nfds_t, timeout))?
                as usize;

        for (poll_fd, token) in poll_fds.iter_mut().zip(tokens.iter()) {
            if n_events == 0 || events.len() == events.capacity() {
                break;
            }
            if poll_fd.revents != 0 {
                events.push(Event {
                    token: *token,
                    revents: poll_fd.revents,
                });
                poll_fd.revents = 0;
                n_events -= 1;
            }
        }
        Ok(())
    }

    pub fn register(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.index.contains_key(&fd) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        let slot = state.poll_fds.len();
        state.poll_fds.push(libc::pollfd {
            fd,
            events: interests_to_poll(interests),
            revents: 0,
        });
        state.tokens.push(token);
        state.index.insert(fd, slot);
        Ok(())
    }

    pub fn reregister(&self, fd: RawFd, token: Token, interests: Interest) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.index.get(&fd).copied() {
            Some(slot) => {
                state.poll_fds[slot].events = interests_to_poll(interests);
                state.poll_fds[slot].revents = 0;
                state.tokens[slot] = token;
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.index.remove(&fd) {
            Some(slot) => {
                state.poll_fds.swap_remove(slot);
                state.tokens.swap_remove(slot);
                if slot < state.poll_fds.len() {
                    let moved = state.poll_fds[slot].fd;
                    state.index.insert(moved, slot);
                }
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::ENOENT)),
        }
    }
}

fn interests_to_poll(interests: Interest) -> libc::c_short {
    let mut events = 0;
    // PRIORITY coerces to readable; there is no portable poll(2) bit for it.
    if interests.is_readable() || interests.is_priority() {
        events |= libc::POLLIN | libc::POLLPRI;
    }
    if interests.is_writable() {
        events |= libc::POLLOUT;
    }
    events
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    token: Token,
    revents: libc::c_short,
}

pub type Events = Vec<Event>;

pub mod event {
    use crate::sys::Event;
    use crate::Token;

    pub fn token(event: &Event) -> Token {
        event.token
    }

    pub fn is_readable(event: &Event) -> bool {
        (event.revents & (libc::POLLIN | libc::POLLPRI | libc::POLLHUP)) != 0
    }

    pub fn is_writable(event: &Event) -> bool {
        (event.revents & libc::POLLOUT) != 0
    }

    pub fn is_error(event: &Event) -> bool {
        (event.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL)) != 0
    }
}
