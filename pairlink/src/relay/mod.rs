//! The rendezvous and relay core.
//!
//! Pairs supply peers with demand peers, forwards bytes transparently
//! between the halves of every pair, reports the unmet-demand backlog to
//! driver clients, and ages out idle connections. See [`RelayServer`] for
//! the event loop and the state machine.

mod drivers;
mod error;
mod pairing;
mod server;
mod ticker;

pub use error::RelayError;
pub use server::{RelayServer, RelayStats};
pub use ticker::Ticker;
