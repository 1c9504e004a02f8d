//! mio-based server.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS). A single
//! thread owns the listener, the poller and every client connection.

mod listener;
mod poller;

pub use listener::TcpAcceptor;
pub use poller::{MioMultiplexer, ShutdownHandle};

use crate::config::Config;
use crate::runtime::event_loop::EventLoop;
use std::io;
use std::net::SocketAddr;
use tracing::info;

/// A bound server that has not started its event loop yet.
pub struct Server {
    event_loop: EventLoop<TcpAcceptor, MioMultiplexer>,
    local_addr: SocketAddr,
}

impl Server {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.event_loop.multiplexer().shutdown_handle()
    }

    /// Stop on SIGINT/SIGTERM in addition to the shutdown handle.
    pub fn watch_termination_signals(mut self) -> io::Result<Self> {
        self.event_loop
            .multiplexer_mut()
            .watch_termination_signals()?;
        Ok(self)
    }

    /// Run the event loop on the calling thread until shutdown.
    pub fn run(mut self) -> io::Result<()> {
        self.event_loop.run()
    }
}

/// Bind the listener and set up the poller without running anything.
pub fn bind(config: &Config) -> io::Result<Server> {
    let mut acceptor = TcpAcceptor::bind(config.listen_addr(), config.backlog)?;
    let local_addr = acceptor.local_addr()?;
    let multiplexer = MioMultiplexer::new(acceptor.listener_mut(), config.events)?;

    info!(
        addr = %local_addr,
        buffer_size = config.buffer_size,
        backlog = config.backlog,
        "Listening"
    );

    Ok(Server {
        event_loop: EventLoop::new(acceptor, multiplexer, config.buffer_size),
        local_addr,
    })
}

/// Run the mio-based server until a termination signal arrives.
pub fn run(config: Config) -> io::Result<()> {
    bind(&config)?.watch_termination_signals()?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            host: [127, 0, 0, 1].into(),
            port: 0,
            backlog: 16,
            buffer_size: 1024,
            events: 64,
            log_level: "debug".to_string(),
        }
    }

    fn start() -> (SocketAddr, ShutdownHandle, thread::JoinHandle<io::Result<()>>) {
        let server = bind(&test_config()).unwrap();
        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        let join = thread::spawn(move || server.run());
        (addr, handle, join)
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    /// Send a marker from `stream` and wait for its own echo, proving the
    /// server has registered it.
    fn sync(stream: &mut TcpStream, marker: &[u8]) {
        stream.write_all(marker).unwrap();
        assert_eq!(read_exact(stream, marker.len()), marker);
    }

    fn assert_nothing_pending(stream: &mut TcpStream) {
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 64];
        match stream.read(&mut buf) {
            Ok(n) => panic!("unexpected {n} bytes: {:?}", &buf[..n]),
            Err(e) => assert!(matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            )),
        }
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
    }

    #[test]
    fn test_broadcast_between_two_clients() {
        let (addr, shutdown, join) = start();

        let mut first = connect(addr);
        sync(&mut first, b"1");
        let mut second = connect(addr);
        sync(&mut second, b"2");
        // The second client's marker was broadcast to the first as well.
        assert_eq!(read_exact(&mut first, 1), b"2");

        first.write_all(b"hello\n").unwrap();
        assert_eq!(read_exact(&mut first, 6), b"hello\n");
        assert_eq!(read_exact(&mut second, 6), b"hello\n");

        // First client leaves; only the second hears the next message.
        drop(first);
        second.write_all(b"still here\n").unwrap();
        assert_eq!(read_exact(&mut second, 11), b"still here\n");
        assert_nothing_pending(&mut second);

        shutdown.shutdown().unwrap();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_server_survives_empty_registry() {
        let (addr, shutdown, join) = start();

        let mut first = connect(addr);
        sync(&mut first, b"a");
        drop(first);

        // Give the server a moment to observe the close.
        thread::sleep(Duration::from_millis(50));

        let mut second = connect(addr);
        sync(&mut second, b"b");
        second.write_all(b"again\n").unwrap();
        assert_eq!(read_exact(&mut second, 6), b"again\n");

        shutdown.shutdown().unwrap();
        join.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_closes_clients() {
        let (addr, shutdown, join) = start();

        let mut client = connect(addr);
        sync(&mut client, b"x");

        shutdown.shutdown().unwrap();
        join.join().unwrap().unwrap();

        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).unwrap_or(0);
        assert_eq!(n, 0);
    }
}
