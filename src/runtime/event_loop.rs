//! Single-threaded readiness-driven event loop.
//!
//! One iteration: wait for readiness, accept pending connections, service
//! each readable client with one bounded receive, then apply removals and
//! rebuild interest. The registry is only mutated between traversals, never
//! during one.
//!
//! Readiness is edge-triggered. A client whose receive returned data is
//! carried into the next iteration, which polls without blocking, so one
//! busy sender cannot hold the loop while others wait.

use crate::runtime::acceptor::{accept_pending, Acceptor};
use crate::runtime::broadcast::on_readable;
use crate::runtime::connection::{ConnId, ConnectionRegistry};
use crate::runtime::multiplexer::Multiplexer;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Whether the loop should keep going after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// Ties the acceptor, multiplexer and broadcast engine together.
pub struct EventLoop<A: Acceptor, M> {
    acceptor: A,
    multiplexer: M,
    registry: ConnectionRegistry<A::Stream>,
    buffer: Box<[u8]>,
    /// Clients that may still hold unread data.
    carried: Vec<ConnId>,
}

impl<A, M> EventLoop<A, M>
where
    A: Acceptor,
    A::Stream: Read + Write,
    M: Multiplexer<A::Stream>,
{
    /// Create an event loop with a receive buffer of `buffer_size` bytes.
    pub fn new(acceptor: A, multiplexer: M, buffer_size: usize) -> Self {
        Self {
            acceptor,
            multiplexer,
            registry: ConnectionRegistry::new(),
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            carried: Vec::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry<A::Stream> {
        &self.registry
    }

    pub fn multiplexer(&self) -> &M {
        &self.multiplexer
    }

    pub fn multiplexer_mut(&mut self) -> &mut M {
        &mut self.multiplexer
    }

    /// Run one iteration.
    ///
    /// Returns an error only when the readiness wait fails, which is fatal.
    pub fn turn(&mut self) -> io::Result<Flow> {
        let timeout = if self.carried.is_empty() {
            None
        } else {
            Some(Duration::ZERO)
        };
        let readiness = self.multiplexer.wait(timeout)?;

        if readiness.shutdown {
            return Ok(Flow::Shutdown);
        }

        if readiness.is_empty() && self.carried.is_empty() {
            debug!("Spurious wake-up");
            return Ok(Flow::Continue);
        }

        if readiness.listener {
            accept_pending(&mut self.acceptor, &mut self.registry);
        }

        let mut ready = std::mem::take(&mut self.carried);
        for id in readiness.clients {
            if !ready.contains(&id) {
                ready.push(id);
            }
        }

        let mut removals: Vec<ConnId> = Vec::new();
        for id in ready {
            let outcome = on_readable(id, &mut self.registry, &mut self.buffer);
            if outcome.remove {
                removals.push(id);
            } else if outcome.more {
                self.carried.push(id);
            }
        }

        for id in removals {
            if let Some(conn) = self.registry.remove(id) {
                info!(
                    conn_id = %id,
                    session_ms = conn.age().num_milliseconds(),
                    remaining = self.registry.len(),
                    "Connection closed"
                );
                drop(conn);
            }
        }

        while self.registry.take_changed() {
            for id in self.multiplexer.rebuild(&mut self.registry) {
                if let Some(conn) = self.registry.remove(id) {
                    warn!(conn_id = %id, "Closing connection that could not be watched");
                    drop(conn);
                }
            }
            debug!(connections = self.registry.len(), "Readiness interest rebuilt");
        }

        Ok(Flow::Continue)
    }

    /// Run until shutdown is requested or the multiplexer fails.
    ///
    /// On shutdown every connection is closed in registry order.
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            match self.turn() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Shutdown) => break,
                Err(e) => {
                    error!(error = %e, "Readiness wait failed");
                    return Err(e);
                }
            }
        }

        let closed = self.close_all();
        info!(closed, "Event loop stopped");
        Ok(())
    }

    /// Remove and close every registered connection. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        self.carried.clear();
        let connections = self.registry.drain();
        let count = connections.len();
        for conn in connections {
            debug!(conn_id = %conn.id(), "Closing connection on shutdown");
        }
        count
    }
}
