//! A prefork TCP/UDP server framework.
//!
//! `prefork` accepts connections or datagrams on one bound endpoint and
//! services each unit of work in one of a pool of worker *processes*, grown
//! and shrunk at runtime to keep a configured band of spare capacity. The
//! supervisor ([`Manager`]) owns the pool; per-request policy lives in a user
//! type implementing [`Child`].
//!
//! The pieces:
//!
//! * [`Manager`] forks workers, tracks each worker's WAITING/BUSY state over
//!   a private control channel and runs the spare-count controller. Its
//!   lifecycle can be observed through [`ManagerHooks`].
//! * [`Child`] is the worker-side extension point: `process_request` and the
//!   hooks around it run in the worker process, one request at a time.
//! * [`Poll`] is the readiness facade both sides multiplex with: a small
//!   level-triggered interface over epoll, kqueue or `poll(2)`, selected at
//!   compile time.
//!
//! By default all workers inherit a single listening socket bound by the
//! manager and race on `accept`; with [`Config::reuse_port`] each worker
//! binds its own socket and the kernel balances connections across them.
//!
//! # Example
//!
//! A TCP echo server with the stock pool bounds:
//!
//! ```no_run
//! use std::io::{self, Read, Write};
//!
//! use prefork::{Child, Config, Manager, Request};
//!
//! struct Echo;
//!
//! impl Child for Echo {
//!     fn process_request(&mut self, req: &mut Request<'_>) -> io::Result<()> {
//!         let stream = req.stream().unwrap();
//!         let mut buf = [0; 512];
//!         let n = stream.read(&mut buf)?;
//!         stream.write_all(&buf[..n])
//!     }
//! }
//!
//! fn main() -> io::Result<()> {
//!     let config = Config {
//!         port: 10_000,
//!         ..Config::default()
//!     };
//!     Manager::new(config, || Echo)?.run()
//! }
//! ```
//!
//! Internal events (forks, reaps, sizing decisions, worker errors) are
//! reported through the [`log`] facade; install a logger to observe them.

#![warn(missing_docs, missing_debug_implementations)]

#[cfg(not(unix))]
compile_error!("prefork relies on fork(2) and only targets Unix platforms");

mod child;
mod config;
mod control;
pub mod event;
mod interest;
mod manager;
mod net;
mod poll;
mod sys;
mod token;

pub use crate::child::{Child, Request};
pub use crate::config::{Config, Protocol};
pub use crate::control::ChildEvent;
pub use crate::event::Events;
pub use crate::interest::Interest;
pub use crate::manager::{Manager, ManagerHooks, Shutdown};
pub use crate::poll::Poll;
pub use crate::token::Token;
