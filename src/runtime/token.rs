//! Token layout for the mio backend.
//!
//! Client connections use their descriptor as the token value. The fixed
//! sources sit at the top of the token space, where no descriptor can land.

use crate::runtime::connection::ConnId;
use mio::Token;

const LISTENER: Token = Token(usize::MAX);
const WAKER: Token = Token(usize::MAX - 1);
const SIGNALS: Token = Token(usize::MAX - 2);

/// Which registered source an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The listening socket.
    Listener,
    /// Programmatic shutdown request.
    Waker,
    /// Pending termination signals.
    Signals,
    /// A client connection.
    Client(ConnId),
}

impl Source {
    pub fn from_token(token: Token) -> Self {
        match token {
            LISTENER => Source::Listener,
            WAKER => Source::Waker,
            SIGNALS => Source::Signals,
            Token(n) => Source::Client(ConnId(n)),
        }
    }

    pub fn token(self) -> Token {
        match self {
            Source::Listener => LISTENER,
            Source::Waker => WAKER,
            Source::Signals => SIGNALS,
            Source::Client(ConnId(n)) => Token(n),
        }
    }
}
