//! Readiness multiplexing abstraction.
//!
//! The event loop only needs two things from the OS primitive: bring the
//! interest set in line with the registry, and block until something is
//! readable. Any readiness backend (epoll, kqueue, poll) fits behind this.

use crate::runtime::connection::{ConnId, ConnectionRegistry};
use std::io;
use std::time::Duration;

/// Point-in-time result of one wait call.
///
/// Consumed within a single event loop iteration and then discarded.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Readiness {
    /// The listening socket has pending connections.
    pub listener: bool,
    /// Termination was requested (signal or shutdown handle).
    pub shutdown: bool,
    /// Client connections that became readable, in event order.
    pub clients: Vec<ConnId>,
}

impl Readiness {
    /// True if nothing was reported, e.g. after a benign interruption.
    pub fn is_empty(&self) -> bool {
        !self.listener && !self.shutdown && self.clients.is_empty()
    }
}

/// Readiness backend driven by the event loop.
pub trait Multiplexer<S> {
    /// Recompute readable interest from the current registry membership.
    ///
    /// Called only after the registry changed. Holds no ownership of the
    /// connections it watches. Returns the connections that could not be
    /// watched; the caller closes them; the rest of the set is unaffected.
    fn rebuild(&mut self, registry: &mut ConnectionRegistry<S>) -> Vec<ConnId>;

    /// Block until at least one watched source is ready, or until `timeout`
    /// elapses. `None` waits indefinitely.
    ///
    /// Any error returned here is fatal to the event loop.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Readiness>;
}
