//! mio readiness multiplexer.
//!
//! Uses epoll on Linux, kqueue on macOS. Besides the listener and client
//! sockets it watches two termination sources: a `Waker` behind
//! `ShutdownHandle` and, optionally, SIGINT/SIGTERM through
//! `signal-hook-mio`.

use crate::runtime::connection::{ConnId, ConnectionRegistry};
use crate::runtime::multiplexer::{Multiplexer, Readiness};
use crate::runtime::token::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Waker};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Requests that a running event loop stop.
///
/// Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Wake the event loop and make it exit after closing all connections.
    pub fn shutdown(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle").finish_non_exhaustive()
    }
}

pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    signals: Option<Signals>,
    /// Client identities currently registered with the poller.
    registered: HashSet<ConnId>,
}

impl MioMultiplexer {
    /// Create a poller watching `listener` and the shutdown waker.
    pub fn new(listener: &mut TcpListener, event_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(listener, Source::Listener.token(), Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), Source::Waker.token())?);

        Ok(Self {
            poll,
            events: Events::with_capacity(event_capacity),
            waker,
            signals: None,
            registered: HashSet::new(),
        })
    }

    /// Also treat SIGINT and SIGTERM as shutdown requests.
    pub fn watch_termination_signals(&mut self) -> io::Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        self.poll
            .registry()
            .register(&mut signals, Source::Signals.token(), Interest::READABLE)?;
        self.signals = Some(signals);
        Ok(())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
        }
    }
}

impl Multiplexer<TcpStream> for MioMultiplexer {
    fn rebuild(&mut self, registry: &mut ConnectionRegistry<TcpStream>) -> Vec<ConnId> {
        // Closed sockets leave the OS interest set on their own.
        self.registered.retain(|id| registry.contains(*id));

        let poll_registry = self.poll.registry();
        let registered = &mut self.registered;
        let mut rejected = Vec::new();
        registry.for_each_mut(|conn| {
            let id = conn.id();
            if registered.contains(&id) {
                return;
            }
            match poll_registry.register(
                &mut conn.stream,
                Source::Client(id).token(),
                Interest::READABLE,
            ) {
                Ok(()) => {
                    registered.insert(id);
                }
                Err(e) => {
                    error!(conn_id = %id, error = %e, "Failed to watch connection");
                    rejected.push(id);
                }
            }
        });
        rejected
    }

    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
        loop {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("Readiness wait interrupted, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        let mut readiness = Readiness::default();
        for event in self.events.iter() {
            match Source::from_token(event.token()) {
                Source::Listener => readiness.listener = true,
                Source::Waker => {
                    info!("Shutdown requested");
                    readiness.shutdown = true;
                }
                Source::Signals => {
                    if let Some(signals) = self.signals.as_mut() {
                        for signal in signals.pending() {
                            info!(signal, "Termination signal received");
                            readiness.shutdown = true;
                        }
                    }
                }
                Source::Client(id) => readiness.clients.push(id),
            }
        }

        Ok(readiness)
    }
}
