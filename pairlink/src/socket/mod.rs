//! Socket service abstraction for the relay event loop.
//!
//! The event loop never touches sockets directly. It speaks to a
//! [`SocketService`], which owns descriptor lifetimes, buffers, and the OS
//! multiplexer, and surfaces everything that happened as three drainable
//! event queues (disconnections, new connections, incoming bytes).
//!
//! Two implementations are provided:
//!
//! - [`TcpSocketService`]: the production implementation over non-blocking
//!   TCP sockets and a `mio` poll.
//! - [`MemorySocketService`]: a deterministic in-memory implementation for
//!   tests and embedding, with scripted connections and byte injection.
//!
//! # Contract
//!
//! - `serve` advances I/O by at most one multiplexer wait and fills the
//!   event queues. It returns `false` only on a fatal multiplexer error.
//! - `next_connection` / `next_disconnection` / `next_incoming` each drain
//!   one pending event; `None` means the queue is empty.
//! - `freeze` suppresses reads from a descriptor without closing it;
//!   `unfreeze` resumes them. This is the only backpressure primitive.
//! - `disconnect` is an idempotent close request. The descriptor is
//!   surfaced by `next_disconnection` on a later `serve` rather than being
//!   removed synchronously, so callers always observe the closure through
//!   the queue.
//! - Peer identity (`host` / `port`) stays resolvable while the
//!   disconnection event for that descriptor is being drained.

mod memory;
mod tcp;

pub use memory::MemorySocketService;
pub use tcp::TcpSocketService;

use std::fmt;
use std::time::Duration;

/// Opaque connection or listener handle issued by a socket service.
///
/// Descriptors are never reused while the descriptor is live; a service may
/// recycle the value after the disconnection event has been drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor(pub usize);

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The socket layer the relay event loop runs against.
///
/// All methods are synchronous; the only blocking point is `serve`, which
/// waits on the OS multiplexer (bounded by `timeout`).
pub trait SocketService {
    /// Opens a listening endpoint on the given TCP port.
    ///
    /// Returns `None` if the endpoint could not be opened; the cause is
    /// logged by the implementation.
    fn listen(&mut self, port: u16) -> Option<Descriptor>;

    /// Advances I/O one step: waits for readiness (up to `timeout`, or
    /// indefinitely when `None`), accepts, reads, and writes whatever is
    /// ready, and fills the event queues.
    ///
    /// Returns `false` on a fatal multiplexer error.
    fn serve(&mut self, timeout: Option<Duration>) -> bool;

    /// Drains one pending disconnection, if any.
    fn next_disconnection(&mut self) -> Option<Descriptor>;

    /// Drains one pending new connection, if any.
    fn next_connection(&mut self) -> Option<Descriptor>;

    /// Drains one descriptor with pending incoming bytes, if any.
    fn next_incoming(&mut self) -> Option<Descriptor>;

    /// Returns the listener that accepted `d`, if `d` is a live connection.
    fn listener_of(&self, d: Descriptor) -> Option<Descriptor>;

    /// Stops reading from `d`. Bytes sent by the peer are left in the OS
    /// until `unfreeze`.
    fn freeze(&mut self, d: Descriptor);

    /// Resumes reading from `d`.
    fn unfreeze(&mut self, d: Descriptor);

    /// Moves `d`'s incoming bytes into `buf`, leaving `d`'s incoming buffer
    /// empty. Any previous content of `buf` is discarded.
    fn swap_incoming(&mut self, d: Descriptor, buf: &mut Vec<u8>);

    /// Queues `bytes` for writing to `d`.
    fn append_outgoing(&mut self, d: Descriptor, bytes: &[u8]);

    /// Queues formatted text for writing to `d`.
    ///
    /// Counterpart of a C-style `writef`: callers pass `format_args!` and
    /// the rendered text lands in `d`'s outgoing buffer.
    fn write_fmt(&mut self, d: Descriptor, args: fmt::Arguments<'_>) {
        self.append_outgoing(d, args.to_string().as_bytes());
    }

    /// Human-readable peer host for log lines.
    fn host(&self, d: Descriptor) -> String;

    /// Human-readable peer port for log lines.
    fn port(&self, d: Descriptor) -> String;

    /// Requests that `d` be closed. Idempotent. For connections the closure
    /// is surfaced by `next_disconnection` after a later `serve`; listeners
    /// are closed immediately and surface nothing.
    fn disconnect(&mut self, d: Descriptor);
}
