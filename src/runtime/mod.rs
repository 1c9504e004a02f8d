//! Readiness-driven broadcast runtime.
//!
//! Platform-independent pieces:
//! - `ConnectionRegistry`: ordered set of live connections
//! - `Multiplexer`: readiness backend abstraction
//! - `accept_pending`: registers new connections
//! - `on_readable` / `broadcast`: best-effort fan-out
//! - `EventLoop`: single-threaded driver tying them together
//!
//! The mio backend (epoll on Linux, kqueue on macOS) lives in `mio_impl`.

pub mod acceptor;
pub mod broadcast;
pub mod connection;
pub mod event_loop;
pub mod multiplexer;

#[cfg(unix)]
mod token;

#[cfg(unix)]
pub mod mio_impl;

#[cfg(test)]
pub(crate) mod testing;

pub use acceptor::{accept_pending, Accepted, Acceptor};
pub use broadcast::{broadcast, on_readable, BroadcastReport, Delivery, ReadOutcome};
pub use connection::{ConnId, ConnState, Connection, ConnectionRegistry, RegistryError};
pub use event_loop::{EventLoop, Flow};
pub use multiplexer::{Multiplexer, Readiness};

#[cfg(unix)]
pub use mio_impl::{bind, MioMultiplexer, Server, ShutdownHandle, TcpAcceptor};

use crate::config::Config;

/// Run the server with the platform's readiness backend.
pub fn run(config: Config) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        mio_impl::run(config)
    }

    #[cfg(not(unix))]
    {
        let _ = config;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unsupported platform: only Unix-like systems are supported",
        ))
    }
}
