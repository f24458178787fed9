use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::config::{Config, Protocol};
use crate::control::{ChildEvent, ControlChannel};
use crate::net::{Accepted, Listener};
use crate::sys;
use crate::{Events, Interest, Poll, Token};

const LISTENER: Token = Token(0);
const CONTROL: Token = Token(1);

/// How long an exiting worker lingers so the manager can drain its final
/// control message before the descriptor goes away with the process.
const EXIT_LINGER: Duration = Duration::from_millis(100);

/// Per-worker service logic; the extension point of the framework.
///
/// A value is produced by the factory closure handed to
/// [`Manager::new`] — the closure runs **in the worker process**, right
/// after the fork, so nothing the child sets up is ever shared between
/// workers. Every hook has a default; only [`process_request`] must be
/// written.
///
/// For each accepted unit of work the worker drives the pipeline
/// [`post_accept`] → [`allow_deny`] → [`process_request`] (or
/// [`request_denied`]) → connection close → [`post_process_request`]. A hook
/// returning `Err` aborts the pipeline: the worker reports the error to the
/// manager and exits with status 1, and the manager forks a replacement.
///
/// [`Manager::new`]: crate::Manager::new
/// [`post_accept`]: Child::post_accept
/// [`allow_deny`]: Child::allow_deny
/// [`process_request`]: Child::process_request
/// [`request_denied`]: Child::request_denied
/// [`post_process_request`]: Child::post_process_request
pub trait Child {
    /// Runs once in the worker process right after the fork, before the
    /// worker announces itself to the manager.
    fn initialize(&mut self) {}

    /// Reuse-port mode only: runs in the worker before it binds its socket.
    fn pre_bind(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Reuse-port mode only: runs right after the worker bound its socket.
    fn post_bind(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// First hook of the pipeline; the connection (or datagram) is in hand.
    fn post_accept(&mut self, _req: &mut Request<'_>) -> io::Result<()> {
        Ok(())
    }

    /// Gate for the request: returning false routes it to
    /// [`request_denied`](Child::request_denied) instead of
    /// [`process_request`](Child::process_request).
    fn allow_deny(&mut self, _req: &mut Request<'_>) -> bool {
        true
    }

    /// Called for a denied request. Anything to tell the client must be sent
    /// here; the connection is closed right after.
    fn request_denied(&mut self, _req: &mut Request<'_>) -> io::Result<()> {
        Ok(())
    }

    /// Services one allowed request.
    fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()>;

    /// Runs after the connection has been closed.
    fn post_process_request(&mut self, _req: &mut Request<'_>) -> io::Result<()> {
        Ok(())
    }

    /// Last hook before the worker process exits, on every exit path.
    /// `error` carries the failure when the exit is an error exit.
    fn shutdown(&mut self, _error: Option<&io::Error>) {}
}

/// Per-request context handed to the [`Child`] hooks.
pub struct Request<'a> {
    conn: Conn,
    peer: SocketAddr,
    socket: Option<&'a UdpSocket>,
    protocol: Protocol,
    requests_handled: u64,
}

enum Conn {
    Stream(TcpStream),
    Datagram(Vec<u8>),
    Closed,
}

impl Request<'_> {
    /// The protocol this worker serves.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Address of the connecting client (TCP) or datagram sender (UDP).
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Requests this worker completed before the current one.
    pub fn requests_handled(&self) -> u64 {
        self.requests_handled
    }

    /// The accepted TCP connection. `None` when serving UDP, or after the
    /// pipeline closed the connection.
    pub fn stream(&mut self) -> Option<&mut TcpStream> {
        match &mut self.conn {
            Conn::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// The received datagram. `None` when serving TCP.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.conn {
            Conn::Datagram(payload) => Some(payload),
            _ => None,
        }
    }

    /// Replies to the datagram sender. UDP only; the TCP reply path is
    /// writing to [`stream`](Request::stream).
    pub fn respond_to(&self, payload: &[u8]) -> io::Result<usize> {
        match self.socket {
            Some(socket) => socket.send_to(payload, self.peer),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "respond_to is only available for udp",
            )),
        }
    }

    fn close(&mut self) {
        // Dropping the stream closes the client socket; a datagram has no
        // socket of its own.
        self.conn = Conn::Closed;
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("protocol", &self.protocol)
            .field("peer", &self.peer)
            .field("requests_handled", &self.requests_handled)
            .finish()
    }
}

/// Entry point of the forked worker process; never returns.
pub(crate) fn spawn<C: Child>(
    mut handler: C,
    channel: ControlChannel,
    inherited: Option<Listener>,
    config: &Config,
) -> ! {
    match setup(&mut handler, &channel, inherited, config) {
        Ok((listener, poll)) => Worker {
            handler,
            listener,
            channel,
            poll,
            protocol: config.protocol,
            max_requests: config.max_requests,
            requests_handled: 0,
            closed: false,
        }
        .run(),
        Err(err) => {
            let _ = channel.send(ChildEvent::EXITING_ERROR, &err.to_string());
            handler.shutdown(Some(&err));
            thread::sleep(EXIT_LINGER);
            sys::process::exit(1)
        }
    }
}

fn setup<C: Child>(
    handler: &mut C,
    channel: &ControlChannel,
    inherited: Option<Listener>,
    config: &Config,
) -> io::Result<(Listener, Poll)> {
    let listener = match inherited {
        Some(listener) => listener,
        // Reuse-port mode: the bind hooks run here, in the worker.
        None => {
            handler.pre_bind()?;
            let listener = Listener::bind(config, true)?;
            handler.post_bind()?;
            listener
        }
    };
    let poll = Poll::new()?;
    poll.register(&listener, LISTENER, Interest::READABLE | Interest::PRIORITY)?;
    poll.register(channel, CONTROL, Interest::READABLE | Interest::PRIORITY)?;
    Ok((listener, poll))
}

/// The worker-side event loop: multiplexes the listening socket and the
/// control channel, drives the hook pipeline and reports state transitions.
struct Worker<C: Child> {
    handler: C,
    listener: Listener,
    channel: ControlChannel,
    poll: Poll,
    protocol: Protocol,
    max_requests: u64,
    requests_handled: u64,
    closed: bool,
}

impl<C: Child> Worker<C> {
    fn run(mut self) -> ! {
        self.handler.initialize();
        // Announce the initial WAITING state.
        if self.report(ChildEvent::WAITING).is_err() {
            self.exit(None, 1);
        }

        let mut events = Events::with_capacity(8);
        loop {
            if self.poll.poll(&mut events, None).is_err() {
                // Interrupted calls already yield an empty set; any other
                // failure means the poller itself is gone.
                self.exit(None, 1);
            }

            // Control traffic first: a CLOSE that is already queued wins
            // over accepting more work from the same batch.
            for event in events.iter() {
                if event.token() == CONTROL {
                    self.handle_manager_event();
                }
            }
            if !self.closed {
                for event in events.iter() {
                    if event.token() == LISTENER {
                        if let Err(err) = self.handle_connection() {
                            let _ = self
                                .channel
                                .send(ChildEvent::EXITING_ERROR, &err.to_string());
                            self.exit(Some(&err), 1);
                        }
                    }
                }
            }

            if self.closed {
                self.exit(None, 0);
            }
            if self.max_requests > 0 && self.requests_handled >= self.max_requests {
                let _ = self.channel.send(ChildEvent::EXITING_MAX, "");
                self.exit(None, 0);
            }
        }
    }

    fn handle_manager_event(&mut self) {
        match self.channel.recv() {
            Ok(Some((event, _))) if event == ChildEvent::CLOSE => self.closed = true,
            Ok(Some(_)) => {}
            // Peer gone: an implicit CLOSE.
            Ok(None) | Err(_) => self.closed = true,
        }
    }

    /// Accepts and services one unit of work, driving the hook pipeline.
    fn handle_connection(&mut self) -> io::Result<()> {
        let accepted = match self.listener.accept()? {
            Some(accepted) => accepted,
            // Lost the accept race against a sibling; back to polling.
            None => return Ok(()),
        };
        self.report(ChildEvent::BUSY)?;

        let (conn, peer) = match accepted {
            Accepted::Stream(stream, peer) => (Conn::Stream(stream), peer),
            Accepted::Datagram(payload, peer) => (Conn::Datagram(payload), peer),
        };
        let mut req = Request {
            conn,
            peer,
            socket: self.listener.udp_socket(),
            protocol: self.protocol,
            requests_handled: self.requests_handled,
        };

        self.handler.post_accept(&mut req)?;
        if self.handler.allow_deny(&mut req) {
            self.handler.process_request(&mut req)?;
        } else {
            self.handler.request_denied(&mut req)?;
        }
        req.close();
        self.handler.post_process_request(&mut req)?;
        drop(req);

        self.requests_handled += 1;
        self.report(ChildEvent::WAITING)
    }

    fn report(&mut self, event: ChildEvent) -> io::Result<()> {
        match self
            .channel
            .send(event, &self.requests_handled.to_string())
        {
            Err(ref err)
                if err.kind() == io::ErrorKind::BrokenPipe
                    || err.kind() == io::ErrorKind::ConnectionReset =>
            {
                // The manager end is gone; treat it as an implicit CLOSE but
                // let the request in flight finish.
                self.closed = true;
                Ok(())
            }
            other => other,
        }
    }

    /// Tears the worker down and terminates the process.
    fn exit(&mut self, error: Option<&io::Error>, status: i32) -> ! {
        trace!("worker exiting with status {}", status);
        let _ = self.poll.deregister(&self.channel);
        let _ = self.poll.deregister(&self.listener);
        self.handler.shutdown(error);
        thread::sleep(EXIT_LINGER);
        sys::process::exit(status)
    }
}
