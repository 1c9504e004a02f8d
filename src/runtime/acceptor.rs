//! Accepting new connections into the registry.

use crate::runtime::connection::{ConnId, Connection, ConnectionRegistry};
use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

/// A freshly accepted connection, not yet registered.
#[derive(Debug)]
pub struct Accepted<S> {
    pub id: ConnId,
    pub stream: S,
    pub peer: SocketAddr,
}

/// Source of new connections.
///
/// `accept` must not block: once the pending queue is empty it returns
/// `WouldBlock`.
pub trait Acceptor {
    type Stream;

    fn accept(&mut self) -> io::Result<Accepted<Self::Stream>>;
}

/// Accept every pending connection and register it.
///
/// Readiness is edge-triggered, so the queue is drained until `WouldBlock`.
/// Failures are logged and never propagated; the listener stays open.
/// Returns the number of connections registered.
pub fn accept_pending<A: Acceptor>(
    acceptor: &mut A,
    registry: &mut ConnectionRegistry<A::Stream>,
) -> usize {
    let mut registered = 0;

    loop {
        match acceptor.accept() {
            Ok(Accepted { id, stream, peer }) => {
                match registry.insert(Connection::new(id, stream, Some(peer))) {
                    Ok(id) => {
                        registered += 1;
                        info!(conn_id = %id, peer = %peer, "Client connected");
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Refusing connection");
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) =>
            {
                debug!(error = %e, "Accept interrupted, continuing");
            }
            Err(e) => {
                if is_descriptor_exhaustion(&e) {
                    error!(error = %e, "Accept failed: descriptor limit reached");
                } else {
                    error!(error = %e, "Accept failed");
                }
                break;
            }
        }
    }

    registered
}

fn is_descriptor_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}
