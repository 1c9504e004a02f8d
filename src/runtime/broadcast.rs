//! Echo/broadcast engine.
//!
//! Every chunk received from a client is written, verbatim and without
//! framing, to every registered connection including the sender. Sends are
//! non-blocking and best-effort: a peer whose buffer is full simply misses
//! that chunk. Only read failures remove a connection; write failures are
//! logged and the peer stays registered until its own next read fails.

use crate::runtime::connection::{ConnId, ConnectionRegistry};
use std::io::{self, Read, Write};
use tracing::{debug, error, info, warn};

/// Result of one send attempt to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The whole payload was accepted.
    Sent,
    /// Only part of the payload was accepted; the rest is dropped.
    Partial { written: usize },
    /// The peer's buffer was full; the payload is dropped for this peer.
    WouldBlock,
    /// The send failed for another reason. The peer is not removed.
    Failed(io::ErrorKind),
}

/// Per-peer outcome of one broadcast pass, in fan-out order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub deliveries: Vec<(ConnId, Delivery)>,
}

impl BroadcastReport {
    /// Peers that received the full payload.
    pub fn delivered(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.deliveries
            .iter()
            .filter(|(_, d)| *d == Delivery::Sent)
            .map(|(id, _)| *id)
    }

    /// Outcome for one peer, if it was part of the pass.
    pub fn delivery(&self, id: ConnId) -> Option<Delivery> {
        self.deliveries
            .iter()
            .find(|(peer, _)| *peer == id)
            .map(|(_, d)| *d)
    }
}

/// What happened when a readable connection was serviced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// The connection closed or failed and must leave the registry.
    pub remove: bool,
    /// Bytes received (and broadcast) during this call.
    pub bytes_read: usize,
    /// The socket may still hold data; service it again next iteration.
    pub more: bool,
}

/// Write `payload` once to every registered connection, in registry order.
pub fn broadcast<S: Write>(
    payload: &[u8],
    registry: &mut ConnectionRegistry<S>,
) -> BroadcastReport {
    let mut report = BroadcastReport {
        deliveries: Vec::with_capacity(registry.len()),
    };

    registry.for_each_mut(|conn| {
        let id = conn.id();
        let delivery = match conn.stream.write(payload) {
            Ok(n) if n == payload.len() => Delivery::Sent,
            Ok(n) => {
                warn!(
                    conn_id = %id,
                    written = n,
                    len = payload.len(),
                    "Short send, dropping remainder"
                );
                Delivery::Partial { written: n }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(conn_id = %id, len = payload.len(), "Peer not writable, dropping message");
                Delivery::WouldBlock
            }
            Err(e) => {
                error!(conn_id = %id, error = %e, "Error echoing message");
                Delivery::Failed(e.kind())
            }
        };
        report.deliveries.push((id, delivery));
    });

    report
}

/// Service a connection that was reported readable.
///
/// Performs at most one bounded receive into `buf` and broadcasts exactly
/// the bytes it returned. Readiness is edge-triggered, so a successful
/// receive sets `more` and the caller must come back until the socket would
/// block. A zero-length read (orderly close) or a read error requests
/// removal. Unknown identities are ignored.
pub fn on_readable<S: Read + Write>(
    id: ConnId,
    registry: &mut ConnectionRegistry<S>,
    buf: &mut [u8],
) -> ReadOutcome {
    let mut outcome = ReadOutcome::default();

    let Some(conn) = registry.get_mut(id) else {
        return outcome;
    };

    let received = loop {
        match conn.stream.read(buf) {
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => break result,
        }
    };

    match received {
        Ok(0) => {
            info!(conn_id = %id, "Client disconnected");
            outcome.remove = true;
        }
        Ok(n) => {
            outcome.bytes_read = n;
            outcome.more = true;
            broadcast(&buf[..n], registry);
        }
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => {
            warn!(conn_id = %id, error = %e, "Error receiving message from client");
            outcome.remove = true;
        }
    }

    outcome
}
