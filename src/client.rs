//! Console client for the broadcast server.
//!
//! Sends each console line to the server and prints whatever the server
//! sends back. An empty line (or end of input) ends the session without
//! being sent.

use crate::config::ClientArgs;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, error};

/// Receive buffer size
const BUFFER_SIZE: usize = 1024;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The user entered an empty line or input ended.
    UserQuit,
    /// The server closed the connection.
    ServerClosed,
}

/// Resolve `host:port` and connect to the first address that accepts.
pub async fn connect(host: &str, port: u16) -> io::Result<(TcpStream, SocketAddr)> {
    let mut last_err = None;

    for addr in lookup_host((host, port)).await? {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")
    }))
}

/// Relay console lines to `stream` and server data to `output` until either
/// side ends the session.
///
/// Console lines are forwarded as raw bytes. A failed socket read is logged
/// and the session carries on; only end of stream from the server ends it.
pub async fn run_session<I, S, O>(input: I, stream: S, output: &mut O) -> io::Result<SessionEnd>
where
    I: AsyncBufRead + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut lines = input.split(b'\n');
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    output
        .write_all(b"Enter messages to send [empty message exits]:\n")
        .await?;
    output.flush().await?;

    loop {
        tokio::select! {
            biased;

            received = reader.read_buf(&mut buffer) => {
                match received {
                    Ok(0) => {
                        output
                            .write_all(b"Server closed connection.  Exiting ...\n")
                            .await?;
                        output.flush().await?;
                        return Ok(SessionEnd::ServerClosed);
                    }
                    Ok(_) => {
                        output.write_all(b"Received: ").await?;
                        output.write_all(&buffer).await?;
                        output.flush().await?;
                        buffer.clear();
                    }
                    Err(e) => error!(error = %e, "Error receiving echo"),
                }
            }

            line = lines.next_segment() => {
                let mut message = line?.unwrap_or_default();
                if message.last() == Some(&b'\r') {
                    message.pop();
                }
                if message.is_empty() {
                    return Ok(SessionEnd::UserQuit);
                }

                message.push(b'\n');
                if let Err(e) = writer.write_all(&message).await {
                    error!(error = %e, "Error sending message to server");
                }
            }
        }
    }
}

/// Run the interactive client on stdin/stdout.
pub async fn run(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = tokio::io::stdout();

    stdout
        .write_all(format!("Trying {}...\n", args.host).as_bytes())
        .await?;
    stdout.flush().await?;

    let (stream, addr) = connect(&args.host, args.port).await.map_err(|e| {
        io::Error::new(e.kind(), format!("Unable to connect to server: {e}"))
    })?;

    stdout
        .write_all(format!("Connected to {addr}\n").as_bytes())
        .await?;

    let stdin = BufReader::new(tokio::io::stdin());
    let end = run_session(stdin, stream, &mut stdout).await?;
    debug!(?end, "Session finished");
    Ok(())
}
