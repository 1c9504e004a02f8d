//! fanout-echo: a multi-client TCP echo server with broadcast fan-out.
//!
//! Every chunk a client sends is written back to every connected client,
//! sender included. Delivery is best-effort: a client that cannot keep up
//! misses messages instead of stalling the server.

pub mod client;
pub mod config;
pub mod runtime;
