#![cfg(unix)]

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use prefork::{Events, Interest, Poll, Token};

mod util;
use util::init;

const ID1: Token = Token(0);
const ID2: Token = Token(1);

fn init_with_poll() -> (Poll, Events) {
    init();
    let poll = Poll::new().expect("unable to create poller");
    let events = Events::with_capacity(16);
    (poll, events)
}

#[test]
fn poll_with_timeout_returns_empty() {
    let (mut poll, mut events) = init_with_poll();

    let start = Instant::now();
    poll.poll(&mut events, Some(Duration::from_millis(20))).unwrap();
    assert!(events.is_empty());
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn readable_readiness() {
    let (mut poll, mut events) = init_with_poll();

    let (mut tx, rx) = UnixStream::pair().unwrap();
    poll.register(&rx, ID1, Interest::READABLE).unwrap();

    // Nothing to read yet.
    poll.poll(&mut events, Some(Duration::from_millis(20))).unwrap();
    assert!(events.is_empty());

    tx.write_all(b"ping").unwrap();
    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();

    let event = events.iter().next().expect("expected a readiness event");
    assert_eq!(event.token(), ID1);
    assert!(event.is_readable());
}

#[test]
fn level_triggered_until_drained() {
    let (mut poll, mut events) = init_with_poll();

    let (mut tx, mut rx) = UnixStream::pair().unwrap();
    poll.register(&rx, ID1, Interest::READABLE).unwrap();
    tx.write_all(b"ping").unwrap();

    // Undrained readiness is reported again.
    for _ in 0..2 {
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(events.iter().count(), 1);
    }

    let mut buf = [0; 8];
    let n = rx.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping");

    poll.poll(&mut events, Some(Duration::from_millis(20))).unwrap();
    assert!(events.is_empty());
}

#[test]
fn writable_readiness() {
    let (mut poll, mut events) = init_with_poll();

    let (tx, _rx) = UnixStream::pair().unwrap();
    poll.register(&tx, ID1, Interest::WRITABLE).unwrap();

    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
    let event = events.iter().next().expect("expected a readiness event");
    assert_eq!(event.token(), ID1);
    assert!(event.is_writable());
}

#[test]
fn reregister_changes_interest_and_token() {
    let (mut poll, mut events) = init_with_poll();

    let (mut tx, rx) = UnixStream::pair().unwrap();
    poll.register(&rx, ID1, Interest::WRITABLE).unwrap();
    tx.write_all(b"ping").unwrap();

    poll.reregister(&rx, ID2, Interest::READABLE).unwrap();
    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();

    let event = events.iter().next().expect("expected a readiness event");
    assert_eq!(event.token(), ID2);
    assert!(event.is_readable());
}

#[test]
fn deregister_is_idempotent() {
    let (mut poll, mut events) = init_with_poll();

    let (mut tx, rx) = UnixStream::pair().unwrap();
    poll.register(&rx, ID1, Interest::READABLE).unwrap();
    tx.write_all(b"ping").unwrap();

    poll.deregister(&rx).unwrap();
    // Repeating the deregistration is a no-op, as is deregistering a source
    // that was never registered.
    poll.deregister(&rx).unwrap();
    let (never, _other) = UnixStream::pair().unwrap();
    poll.deregister(&never).unwrap();

    poll.poll(&mut events, Some(Duration::from_millis(20))).unwrap();
    assert!(events.is_empty());
}

#[test]
fn events_bounded_by_capacity() {
    init();
    let mut poll = Poll::new().unwrap();
    let mut events = Events::with_capacity(1);

    let (mut tx1, rx1) = UnixStream::pair().unwrap();
    let (mut tx2, rx2) = UnixStream::pair().unwrap();
    poll.register(&rx1, ID1, Interest::READABLE).unwrap();
    poll.register(&rx2, ID2, Interest::READABLE).unwrap();
    tx1.write_all(b"a").unwrap();
    tx2.write_all(b"b").unwrap();

    // Both are ready but only one slot is available; the rest surfaces on
    // the next call because the poller is level triggered.
    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(events.iter().count(), 1);
    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(events.iter().count(), 1);
}

#[test]
fn priority_interest_is_accepted() {
    // On the poll(2) fallback PRIORITY is silently coerced to readable; on
    // every backend registering with it must succeed.
    let (mut poll, mut events) = init_with_poll();

    let (mut tx, rx) = UnixStream::pair().unwrap();
    poll.register(&rx, ID1, Interest::READABLE | Interest::PRIORITY)
        .unwrap();
    tx.write_all(b"ping").unwrap();

    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
    let event = events.iter().next().expect("expected a readiness event");
    assert!(event.is_readable());
}

#[test]
fn peer_close_surfaces_as_readable() {
    let (mut poll, mut events) = init_with_poll();

    let (tx, rx) = UnixStream::pair().unwrap();
    poll.register(&rx, ID1, Interest::READABLE).unwrap();
    drop(tx);

    poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
    let event = events.iter().next().expect("expected a readiness event");
    assert_eq!(event.token(), ID1);
    assert!(event.is_readable());
}
