//! Signal handling for the manager process.
//!
//! The installed handlers only flip bits in an atomic pending set, the one
//! async-signal-safe thing needed; the supervisor loop drains the set each
//! iteration and dispatches to the user's hooks. SA_RESTART is deliberately
//! left off so a signal interrupts the supervisor's poll and is noticed
//! right away.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};

const HUP: u8 = 0b001;
const INT: u8 = 0b010;
const TERM: u8 = 0b100;

static PENDING: AtomicU8 = AtomicU8::new(0);

extern "C" fn record_signal(signum: libc::c_int) {
    let bit = match signum {
        libc::SIGHUP => HUP,
        libc::SIGINT => INT,
        libc::SIGTERM => TERM,
        _ => return,
    };
    PENDING.fetch_or(bit, Ordering::Relaxed);
}

/// Signals drained from the pending set.
#[derive(Copy, Clone, Debug, Default)]
pub struct Pending {
    pub hup: bool,
    pub int: bool,
    pub term: bool,
}

/// Installs the HUP/INT/TERM handlers.
pub fn install() -> io::Result<()> {
    for signum in [libc::SIGHUP, libc::SIGINT, libc::SIGTERM] {
        install_handler(signum)?;
    }
    Ok(())
}

/// Drains and clears the pending set.
pub fn take() -> Pending {
    let bits = PENDING.swap(0, Ordering::Relaxed);
    Pending {
        hup: bits & HUP != 0,
        int: bits & INT != 0,
        term: bits & TERM != 0,
    }
}

fn install_handler(signum: libc::c_int) -> io::Result<()> {
    // SAFETY: a zeroed sigaction is a valid all-defaults base; sa_mask is
    // emptied explicitly and `record_signal` only touches an atomic.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    unsafe { libc::sigemptyset(&mut action.sa_mask) };
    action.sa_sigaction = record_signal as libc::sighandler_t;
    syscall!(sigaction(signum, &action, ptr::null_mut())).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::{install, take};

    #[test]
    fn raised_signal_is_pending_until_taken() {
        install().unwrap();
        assert!(!take().hup);

        // SAFETY: the handler for SIGHUP was installed above and only
        // records the signal.
        unsafe { libc::raise(libc::SIGHUP) };

        let pending = take();
        assert!(pending.hup);
        assert!(!pending.int);
        assert!(!pending.term);
        // Drained: a second take is empty.
        assert!(!take().hup);
    }
}
