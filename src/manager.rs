use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, trace, warn};

use crate::child::{self, Child};
use crate::config::Config;
use crate::control::{ChildEvent, ControlChannel};
use crate::net::Listener;
use crate::sys::process::{Fork, Pid};
use crate::sys;
use crate::{Events, Interest, Poll, Token};

/// Poll timeout of the supervisor loop; bounds how late it notices the stop
/// flag when no events arrive.
const LOOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Cloneable handle requesting a graceful stop of a [`Manager`].
///
/// Handed to the signal hooks and obtainable through
/// [`Manager::shutdown_handle`] for use from other threads. Requesting a
/// stop any number of times is safe.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    /// Requests a graceful stop; the supervisor loop exits at its next
    /// iteration.
    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Manager-side lifecycle hooks, all defaulting to no-ops.
///
/// `()` is the stock implementation used by [`Manager::new`]. The fallible
/// hooks run during startup and shutdown; an `Err` from any of them aborts
/// [`Manager::run`]. The signal hooks run in the supervisor loop (not in
/// signal-handler context) and receive a [`Shutdown`] handle.
pub trait ManagerHooks {
    /// Before the listening socket is created and bound. Not called in
    /// reuse-port mode, where the bind happens in each worker.
    fn pre_bind(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Right after the listening socket was bound. Not called in reuse-port
    /// mode.
    fn post_bind(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Before the signal handlers are installed.
    fn pre_signal_setup(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// After the signal handlers are installed.
    fn post_signal_setup(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Before the initial workers are forked.
    fn pre_init_children(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// After the initial workers are forked.
    fn post_init_children(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Last hook before the supervisor loop takes over.
    fn pre_loop(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Before the pool is shut down.
    fn pre_server_close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// SIGHUP was received. Default: nothing; override e.g. to reload
    /// configuration.
    fn hup_handler(&mut self, _shutdown: &Shutdown) {}

    /// SIGINT was received. Default: request a graceful stop.
    fn int_handler(&mut self, shutdown: &Shutdown) {
        shutdown.request();
    }

    /// SIGTERM was received. Default: request a graceful stop.
    fn term_handler(&mut self, shutdown: &Shutdown) {
        shutdown.request();
    }
}

impl ManagerHooks for () {}

/// Worker-state record, one per live worker.
struct ManagerChild {
    pid: Pid,
    channel: ControlChannel,
    state: ChildEvent,
    requests_handled: u64,
}

/// The supervisor: forks and reaps workers, tracks their state over the
/// control channels and keeps the pool sized to the configured bounds.
///
/// Constructing a manager validates the [`Config`] and, unless reuse-port
/// mode is active, binds the listening socket right away so
/// [`bound_address`] works before [`run`]. `run` then installs signal
/// handlers, forks the initial workers and supervises until a stop is
/// requested by SIGINT/SIGTERM, [`close`] or a [`Shutdown`] handle, at
/// which point every worker is sent a CLOSE, allowed to finish its request
/// in flight and reaped.
///
/// Worker failures never abort the supervisor; it logs, reaps and lets the
/// sizing controller fork a replacement on the next iteration.
///
/// [`bound_address`]: Manager::bound_address
/// [`run`]: Manager::run
/// [`close`]: Manager::close
pub struct Manager<C: Child + 'static, H: ManagerHooks = ()> {
    config: Config,
    factory: Box<dyn FnMut() -> C + Send>,
    hooks: H,
    poll: Poll,
    listener: Option<Listener>,
    bound: Option<SocketAddr>,
    children: HashMap<Token, ManagerChild>,
    shutdown: Shutdown,
}

impl<C: Child + 'static> Manager<C> {
    /// Creates a manager with the stock hooks. `factory` produces the
    /// [`Child`] value and runs in each worker process after the fork.
    pub fn new(
        config: Config,
        factory: impl FnMut() -> C + Send + 'static,
    ) -> io::Result<Manager<C>> {
        Manager::with_hooks(config, factory, ())
    }
}

impl<C: Child + 'static, H: ManagerHooks> Manager<C, H> {
    /// Creates a manager with user lifecycle hooks.
    pub fn with_hooks(
        config: Config,
        factory: impl FnMut() -> C + Send + 'static,
        mut hooks: H,
    ) -> io::Result<Manager<C, H>> {
        config.validate()?;
        let poll = Poll::new()?;

        let mut listener = None;
        let mut bound = None;
        if config.shared_socket() {
            hooks.pre_bind()?;
            let l = Listener::bind(&config, false)?;
            l.set_accept_timeout()?;
            bound = Some(l.local_addr()?);
            listener = Some(l);
            hooks.post_bind()?;
        }

        Ok(Manager {
            config,
            factory: Box::new(factory),
            hooks,
            poll,
            listener,
            bound,
            children: HashMap::new(),
            shutdown: Shutdown::default(),
        })
    }

    /// The bound address, available from construction on. `None` in
    /// reuse-port mode, where every worker binds its own socket.
    pub fn bound_address(&self) -> Option<SocketAddr> {
        self.bound
    }

    /// Requests a graceful stop. Idempotent.
    pub fn close(&self) {
        self.shutdown.request();
    }

    /// A handle other threads (or hooks) can use to stop the server.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Runs the supervisor until a stop is requested, then shuts the pool
    /// down gracefully. Errors from the manager hooks, the signal setup and
    /// the initial forks propagate and abort startup.
    pub fn run(&mut self) -> io::Result<()> {
        self.hooks.pre_signal_setup()?;
        sys::signals::install()?;
        self.hooks.post_signal_setup()?;

        self.hooks.pre_init_children()?;
        for _ in 0..self.config.min_servers {
            self.spawn_child()?;
        }
        self.hooks.post_init_children()?;

        self.hooks.pre_loop()?;
        self.event_loop();

        self.hooks.pre_server_close()?;
        self.shutdown_server();
        Ok(())
    }

    fn event_loop(&mut self) {
        let mut events = Events::with_capacity(64);
        loop {
            self.dispatch_signals();
            if self.shutdown.requested() {
                break;
            }

            if let Err(err) = self.poll.poll(&mut events, Some(LOOP_TIMEOUT)) {
                warn!("manager poll failed: {}", err);
                continue;
            }

            let ready: Vec<Token> = events.iter().map(|event| event.token()).collect();
            for token in ready {
                if self.children.contains_key(&token) {
                    self.handle_child_event(token);
                } else {
                    // A source we no longer know about; make sure it cannot
                    // wake us again.
                    warn!("event for unknown token {:?}", token);
                    let fd = token.0 as RawFd;
                    if let Err(err) = self.poll.deregister_fd(fd) {
                        warn!("error deregistering fd {}: {}", fd, err);
                    }
                    sys::process::close(fd);
                }
            }

            self.assess_state();
        }
    }

    fn dispatch_signals(&mut self) {
        let pending = sys::signals::take();
        let shutdown = self.shutdown.clone();
        if pending.hup {
            debug!("received SIGHUP");
            self.hooks.hup_handler(&shutdown);
        }
        if pending.int {
            debug!("received SIGINT");
            self.hooks.int_handler(&shutdown);
        }
        if pending.term {
            debug!("received SIGTERM");
            self.hooks.term_handler(&shutdown);
        }
    }

    /// Receives and dispatches one message from a child. One message per
    /// poll event: remaining traffic surfaces on the next iteration, after
    /// the sizing controller has seen this update.
    fn handle_child_event(&mut self, token: Token) {
        let msg = match self.children.get(&token) {
            Some(child) => child.channel.recv(),
            None => return,
        };
        match msg {
            Ok(Some((event, payload))) if event.is_exiting() => {
                if event == ChildEvent::EXITING_ERROR {
                    if let Some(child) = self.children.get(&token) {
                        error!("child {} exited due to error: {}", child.pid, payload);
                    }
                }
                self.remove_child(token, true);
            }
            Ok(Some((event, payload))) => {
                if let Some(child) = self.children.get_mut(&token) {
                    child.state = event;
                    if let Ok(count) = payload.parse() {
                        child.requests_handled = count;
                    }
                }
            }
            // EOF or a torn frame: the worker is gone.
            Ok(None) | Err(_) => self.remove_child(token, true),
        }
    }

    /// Deregisters, drops the record and reaps: the single removal point,
    /// so every worker is reaped exactly once.
    fn remove_child(&mut self, token: Token, background: bool) {
        if let Some(child) = self.children.remove(&token) {
            trace!("removing child {}", child.pid);
            if let Err(err) = self.poll.deregister(&child.channel) {
                warn!("error deregistering child {}: {}", child.pid, err);
            }
            drop(child.channel);
            reap(child.pid, background);
        }
    }

    /// Sends CLOSE and removes the record. Send errors are benign: the
    /// worker may already be gone.
    fn kill_child(&mut self, token: Token, background: bool) {
        if let Some(child) = self.children.get(&token) {
            trace!("closing child {}", child.pid);
            if let Err(err) = child.channel.send(ChildEvent::CLOSE, "") {
                warn!("error sending close to child {}: {}", child.pid, err);
            }
        }
        self.remove_child(token, background);
    }

    /// Forks one worker. The parent endpoint is registered with the poller
    /// before the fork, so the child's first message cannot be lost.
    fn spawn_child(&mut self) -> io::Result<()> {
        let (parent, child) = ControlChannel::pair()?;
        let token = Token(parent.as_raw_fd() as usize);
        self.poll
            .register(&parent, token, Interest::READABLE | Interest::PRIORITY)?;

        match sys::process::fork() {
            Ok(Fork::Parent(pid)) => {
                debug!("forked child {}", pid);
                drop(child);
                self.children.insert(
                    token,
                    ManagerChild {
                        pid,
                        channel: parent,
                        state: ChildEvent::WAITING,
                        requests_handled: 0,
                    },
                );
                Ok(())
            }
            Ok(Fork::Child) => {
                drop(parent);
                // Drop every parent endpoint this child inherited, so a
                // closed parent end reaches exactly one worker as EOF.
                self.children.clear();
                let handler = (self.factory)();
                let listener = self.listener.take();
                child::spawn(handler, child, listener, &self.config)
            }
            Err(err) => {
                let _ = self.poll.deregister(&parent);
                Err(err)
            }
        }
    }

    fn assess_state(&mut self) {
        let workers = self.children.len();
        let busy = self
            .children
            .values()
            .filter(|child| child.state == ChildEvent::BUSY)
            .count();
        let Plan { fork, kill } = plan(workers, busy, &self.config);

        if kill > 0 {
            debug!("{} spare children over the limit, closing {}", workers - busy, kill);
            for token in victims(&self.children, kill) {
                self.kill_child(token, true);
            }
        }
        for _ in 0..fork {
            if let Err(err) = self.spawn_child() {
                error!("error forking child: {}", err);
                break;
            }
        }
    }

    fn shutdown_server(&mut self) {
        debug!("starting server shutdown");
        let tokens: Vec<Token> = self.children.keys().copied().collect();
        for token in tokens {
            self.kill_child(token, false);
        }
        self.listener = None;
        debug!("server shutdown completed");
    }
}

/// Sizing decision for one controller iteration.
#[derive(Debug, PartialEq, Eq)]
struct Plan {
    fork: usize,
    kill: usize,
}

/// The spare-count controller, a pure function of the pool snapshot.
///
/// In order: fork up to the spare deficit (bounded by `max_servers`); else
/// retire down to `max_spare_servers` once spares exceed
/// `max_spare_servers + min_servers` — the added `min_servers` widens the
/// band between the fork and kill triggers so the pool does not oscillate
/// near its minimum; finally refill to `min_servers`.
fn plan(workers: usize, busy: usize, config: &Config) -> Plan {
    let spares = workers - busy;
    let mut fork = 0;
    let mut kill = 0;

    if spares < config.min_spare_servers {
        let headroom = config.max_servers.saturating_sub(workers);
        fork = (config.min_spare_servers - spares).min(headroom);
    } else if spares > config.max_spare_servers + config.min_servers {
        kill = spares - config.max_spare_servers;
    }

    if workers + fork < config.min_servers {
        fork = config.min_servers - workers;
    }

    Plan { fork, kill }
}

/// Workers to retire, most used first: retirement prefers the workers
/// closest to any cache or config staleness.
fn victims(children: &HashMap<Token, ManagerChild>, kill: usize) -> Vec<Token> {
    let mut ranked: Vec<(Token, u64)> = children
        .iter()
        .map(|(token, child)| (*token, child.requests_handled))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(kill);
    ranked.into_iter().map(|(token, _)| token).collect()
}

/// Reaps `pid`, on a short-lived helper thread during normal operation so
/// the supervisor loop is not held up by a worker's exit linger, and
/// synchronously during final shutdown.
fn reap(pid: Pid, background: bool) {
    if background {
        thread::spawn(move || {
            if let Err(err) = sys::process::wait_for(pid) {
                warn!("error reaping child {}: {}", pid, err);
            }
        });
    } else if let Err(err) = sys::process::wait_for(pid) {
        warn!("error reaping child {}: {}", pid, err);
    }
}

impl<C: Child + 'static, H: ManagerHooks> std::fmt::Debug for Manager<C, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("bound", &self.bound)
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{plan, victims, ManagerChild, Plan};
    use crate::config::Config;
    use crate::control::{ChildEvent, ControlChannel};
    use crate::sys::process::Pid;
    use crate::Token;

    fn config(min: usize, max: usize, min_spares: usize, max_spares: usize) -> Config {
        Config {
            min_servers: min,
            max_servers: max,
            min_spare_servers: min_spares,
            max_spare_servers: max_spares,
            ..Config::default()
        }
    }

    #[test]
    fn forks_the_spare_deficit() {
        let config = config(5, 20, 2, 10);
        assert_eq!(plan(5, 4, &config), Plan { fork: 1, kill: 0 });
        assert_eq!(plan(5, 5, &config), Plan { fork: 2, kill: 0 });
    }

    #[test]
    fn fork_clamped_by_max_servers() {
        let config = config(5, 6, 4, 10);
        // Deficit is 2 but only one slot of headroom remains.
        assert_eq!(plan(5, 2, &config), Plan { fork: 1, kill: 0 });
        assert_eq!(plan(6, 4, &config), Plan { fork: 0, kill: 0 });
    }

    #[test]
    fn hysteresis_suppresses_kills_near_minimum() {
        let config = config(5, 40, 2, 10);
        // 15 spares is over max_spare_servers, but not over
        // max_spare_servers + min_servers.
        assert_eq!(plan(16, 1, &config), Plan { fork: 0, kill: 0 });
        assert_eq!(plan(15, 0, &config), Plan { fork: 0, kill: 0 });
    }

    #[test]
    fn kills_down_to_max_spares() {
        let config = config(5, 40, 2, 10);
        // 18 spares, band ends at 15: retire down to 10 spares.
        assert_eq!(plan(20, 2, &config), Plan { fork: 0, kill: 8 });
    }

    #[test]
    fn fixed_pool_when_min_equals_max() {
        let config = config(3, 3, 1, 2);
        assert_eq!(plan(3, 0, &config), Plan { fork: 0, kill: 0 });
        assert_eq!(plan(3, 3, &config), Plan { fork: 0, kill: 0 });
    }

    #[test]
    fn refills_below_minimum() {
        let config = config(5, 20, 2, 10);
        // All three busy: the deficit branch forks 2, the minimum refill
        // raises that to the full gap.
        assert_eq!(plan(3, 3, &config), Plan { fork: 2, kill: 0 });
        assert_eq!(plan(0, 0, &config), Plan { fork: 5, kill: 0 });
        assert_eq!(plan(4, 0, &config), Plan { fork: 1, kill: 0 });
    }

    #[test]
    fn retires_most_used_first() {
        let mut children = HashMap::new();
        for (token, handled) in [(10, 7), (11, 99), (12, 42)] {
            let (parent, _child) = ControlChannel::pair().unwrap();
            children.insert(
                Token(token),
                ManagerChild {
                    pid: Pid::current(),
                    channel: parent,
                    state: ChildEvent::WAITING,
                    requests_handled: handled,
                },
            );
        }
        let ranked = victims(&children, 2);
        assert_eq!(ranked, vec![Token(11), Token(12)]);
    }
}
