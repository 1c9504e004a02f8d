//! Listening socket for the mio backend.

use crate::runtime::acceptor::{Accepted, Acceptor};
use crate::runtime::connection::ConnId;
use mio::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;

/// Accepts non-blocking client sockets from a mio listener.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind a listener on `addr` with the given backlog.
    pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let listener = create_listener(addr, backlog)?;
        Ok(Self {
            listener: TcpListener::from_std(listener),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub(crate) fn listener_mut(&mut self) -> &mut TcpListener {
        &mut self.listener
    }
}

impl Acceptor for TcpAcceptor {
    type Stream = TcpStream;

    fn accept(&mut self) -> io::Result<Accepted<TcpStream>> {
        let (stream, peer) = self.listener.accept()?;
        Ok(Accepted {
            id: ConnId::from(stream.as_raw_fd()),
            stream,
            peer,
        })
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
