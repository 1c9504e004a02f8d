//! Scripted in-memory streams for exercising the runtime without sockets.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

/// How a scripted stream answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Accept every byte.
    Open,
    /// Peer buffer permanently full.
    Full,
    /// Accept at most this many bytes per call.
    Short(usize),
    /// Fail with the given error.
    Broken(io::ErrorKind),
}

/// Observable side of a scripted stream, shared with the test body.
#[derive(Debug, Default)]
pub struct Tally {
    pub received: Vec<u8>,
    pub write_attempts: usize,
    pub drops: usize,
}

/// A stream whose reads are scripted and whose writes are recorded.
///
/// Once the read script runs out, reads report `WouldBlock`.
#[derive(Debug)]
pub struct ScriptedStream {
    reads: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
    mode: WriteMode,
    tally: Rc<RefCell<Tally>>,
}

impl ScriptedStream {
    pub fn new(mode: WriteMode) -> (Self, Rc<RefCell<Tally>>) {
        let tally = Rc::new(RefCell::new(Tally::default()));
        let stream = Self {
            reads: VecDeque::new(),
            mode,
            tally: Rc::clone(&tally),
        };
        (stream, tally)
    }

    pub fn open() -> (Self, Rc<RefCell<Tally>>) {
        Self::new(WriteMode::Open)
    }

    /// Queue inbound bytes for the next read.
    pub fn with_read(mut self, data: &[u8]) -> Self {
        self.reads.push_back(Ok(data.to_vec()));
        self
    }

    /// Queue an orderly close.
    pub fn with_eof(self) -> Self {
        self.with_read(&[])
    }

    /// Queue a read failure.
    pub fn with_read_error(mut self, kind: io::ErrorKind) -> Self {
        self.reads.push_back(Err(kind));
        self
    }
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Err(kind)) => Err(kind.into()),
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Ok(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }
}

impl Write for ScriptedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut tally = self.tally.borrow_mut();
        tally.write_attempts += 1;
        match self.mode {
            WriteMode::Open => {
                tally.received.extend_from_slice(buf);
                Ok(buf.len())
            }
            WriteMode::Full => Err(io::ErrorKind::WouldBlock.into()),
            WriteMode::Short(limit) => {
                let n = limit.min(buf.len());
                tally.received.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            WriteMode::Broken(kind) => Err(kind.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.tally.borrow_mut().drops += 1;
    }
}
