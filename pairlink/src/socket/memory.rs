//! Deterministic in-memory socket service.
//!
//! Implements the full [`SocketService`] contract without any real I/O.
//! Tests script peer behavior (connect, send bytes, hang up) and observe
//! what the relay wrote back. `serve` is where scripted effects become
//! visible, matching the production implementation's timing: a disconnect
//! requested during one loop iteration surfaces on the next.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use super::{Descriptor, SocketService};

/// Base for synthesized peer port numbers, one per accepted connection.
const PEER_PORT_BASE: u16 = 49152;

#[derive(Debug)]
struct MemoryConnection {
    listener: Descriptor,
    host: String,
    port: String,
    incoming: Vec<u8>,
    /// Bytes sent by the peer while the connection was frozen. Released
    /// into `incoming` by the `serve` that follows `unfreeze`.
    held: Vec<u8>,
    outgoing: Vec<u8>,
    frozen: bool,
    closing: bool,
    queued_incoming: bool,
}

/// In-memory [`SocketService`] with scripted peers.
///
/// # Example
///
/// ```
/// use pairlink::socket::{MemorySocketService, SocketService};
///
/// let mut service = MemorySocketService::new();
/// service.listen(4501).unwrap();
/// let peer = service.connect(4501);
/// service.push_incoming(peer, b"hello");
/// service.serve(None);
/// assert_eq!(service.next_connection(), Some(peer));
/// ```
#[derive(Debug, Default)]
pub struct MemorySocketService {
    next_descriptor: usize,
    refused_ports: HashSet<u16>,
    listeners: HashMap<Descriptor, u16>,
    by_port: HashMap<u16, Descriptor>,
    connections: HashMap<Descriptor, MemoryConnection>,
    /// Peer identity of connections whose disconnection event has been
    /// drained but may still be referenced by log lines this iteration.
    parting: HashMap<Descriptor, (String, String)>,
    connection_queue: VecDeque<Descriptor>,
    disconnection_queue: VecDeque<Descriptor>,
    incoming_queue: VecDeque<Descriptor>,
    pending_disconnects: VecDeque<Descriptor>,
    failed: bool,
    peer_seq: u16,
}

impl MemorySocketService {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> Descriptor {
        let d = Descriptor(self.next_descriptor);
        self.next_descriptor += 1;
        d
    }

    /// Makes future `listen` calls for `port` fail, simulating a bind error.
    pub fn refuse_port(&mut self, port: u16) {
        self.refused_ports.insert(port);
    }

    /// Makes every future `serve` call report a multiplexer failure.
    pub fn fail_serve(&mut self) {
        self.failed = true;
    }

    /// Scripts a new peer connecting to the listener bound on `port`.
    ///
    /// The connection surfaces via `next_connection` once queued here.
    ///
    /// # Panics
    ///
    /// Panics if no listener is bound on `port`.
    pub fn connect(&mut self, port: u16) -> Descriptor {
        let listener = *self
            .by_port
            .get(&port)
            .unwrap_or_else(|| panic!("no listener bound on port {port}"));

        let d = self.allocate();
        let peer_port = PEER_PORT_BASE.wrapping_add(self.peer_seq);
        self.peer_seq = self.peer_seq.wrapping_add(1);

        self.connections.insert(
            d,
            MemoryConnection {
                listener,
                host: "127.0.0.1".to_string(),
                port: peer_port.to_string(),
                incoming: Vec::new(),
                held: Vec::new(),
                outgoing: Vec::new(),
                frozen: false,
                closing: false,
                queued_incoming: false,
            },
        );
        self.connection_queue.push_back(d);
        d
    }

    /// Scripts the peer of `d` sending `bytes`.
    ///
    /// Bytes sent to a frozen connection are held back, as the OS would
    /// hold them, and delivered by the first `serve` after `unfreeze`.
    pub fn push_incoming(&mut self, d: Descriptor, bytes: &[u8]) {
        let Some(conn) = self.connections.get_mut(&d) else {
            return;
        };
        if conn.closing {
            return;
        }
        if conn.frozen {
            conn.held.extend_from_slice(bytes);
            return;
        }
        conn.incoming.extend_from_slice(bytes);
        if !conn.queued_incoming {
            conn.queued_incoming = true;
            self.incoming_queue.push_back(d);
        }
    }

    /// Scripts the peer of `d` closing its end of the connection.
    pub fn hang_up(&mut self, d: Descriptor) {
        if let Some(conn) = self.connections.get_mut(&d) {
            if !conn.closing {
                conn.closing = true;
                self.disconnection_queue.push_back(d);
            }
        }
    }

    /// Returns the bytes queued for writing to `d`.
    pub fn outgoing(&self, d: Descriptor) -> &[u8] {
        self.connections
            .get(&d)
            .map(|conn| conn.outgoing.as_slice())
            .unwrap_or(&[])
    }

    /// Takes the bytes queued for writing to `d`, leaving its outgoing
    /// buffer empty.
    pub fn take_outgoing(&mut self, d: Descriptor) -> Vec<u8> {
        self.connections
            .get_mut(&d)
            .map(|conn| std::mem::take(&mut conn.outgoing))
            .unwrap_or_default()
    }

    /// Whether reads from `d` are currently suppressed.
    pub fn is_frozen(&self, d: Descriptor) -> bool {
        self.connections.get(&d).is_some_and(|conn| conn.frozen)
    }

    /// Whether `d` is a live connection (not yet drained as disconnected).
    pub fn is_connected(&self, d: Descriptor) -> bool {
        self.connections.contains_key(&d)
    }

    /// Live connection descriptors, in no particular order.
    pub fn live_connections(&self) -> Vec<Descriptor> {
        self.connections.keys().copied().collect()
    }

    /// Number of open listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl SocketService for MemorySocketService {
    fn listen(&mut self, port: u16) -> Option<Descriptor> {
        if self.refused_ports.contains(&port) || self.by_port.contains_key(&port) {
            return None;
        }
        let d = self.allocate();
        self.listeners.insert(d, port);
        self.by_port.insert(port, d);
        Some(d)
    }

    fn serve(&mut self, _timeout: Option<Duration>) -> bool {
        self.parting.clear();

        // Requested closes become observable disconnection events now.
        while let Some(d) = self.pending_disconnects.pop_front() {
            if self.connections.contains_key(&d) {
                self.disconnection_queue.push_back(d);
            }
        }

        // Bytes held back during a freeze are readable again.
        for (&d, conn) in &mut self.connections {
            if !conn.frozen && !conn.closing && !conn.held.is_empty() {
                let held = std::mem::take(&mut conn.held);
                conn.incoming.extend_from_slice(&held);
                if !conn.queued_incoming {
                    conn.queued_incoming = true;
                    self.incoming_queue.push_back(d);
                }
            }
        }

        !self.failed
    }

    fn next_disconnection(&mut self) -> Option<Descriptor> {
        let d = self.disconnection_queue.pop_front()?;
        if let Some(conn) = self.connections.remove(&d) {
            self.parting.insert(d, (conn.host, conn.port));
        }
        Some(d)
    }

    fn next_connection(&mut self) -> Option<Descriptor> {
        self.connection_queue.pop_front()
    }

    fn next_incoming(&mut self) -> Option<Descriptor> {
        loop {
            let d = self.incoming_queue.pop_front()?;
            // A descriptor queued before its disconnection surfaced is gone.
            if self.connections.contains_key(&d) {
                return Some(d);
            }
        }
    }

    fn listener_of(&self, d: Descriptor) -> Option<Descriptor> {
        self.connections.get(&d).map(|conn| conn.listener)
    }

    fn freeze(&mut self, d: Descriptor) {
        if let Some(conn) = self.connections.get_mut(&d) {
            conn.frozen = true;
        }
    }

    fn unfreeze(&mut self, d: Descriptor) {
        if let Some(conn) = self.connections.get_mut(&d) {
            conn.frozen = false;
        }
    }

    fn swap_incoming(&mut self, d: Descriptor, buf: &mut Vec<u8>) {
        buf.clear();
        if let Some(conn) = self.connections.get_mut(&d) {
            std::mem::swap(&mut conn.incoming, buf);
            conn.queued_incoming = false;
        }
    }

    fn append_outgoing(&mut self, d: Descriptor, bytes: &[u8]) {
        if let Some(conn) = self.connections.get_mut(&d) {
            if !conn.closing {
                conn.outgoing.extend_from_slice(bytes);
            }
        }
    }

    fn host(&self, d: Descriptor) -> String {
        if let Some(conn) = self.connections.get(&d) {
            return conn.host.clone();
        }
        if let Some((host, _)) = self.parting.get(&d) {
            return host.clone();
        }
        if self.listeners.contains_key(&d) {
            return "0.0.0.0".to_string();
        }
        "?".to_string()
    }

    fn port(&self, d: Descriptor) -> String {
        if let Some(conn) = self.connections.get(&d) {
            return conn.port.clone();
        }
        if let Some((_, port)) = self.parting.get(&d) {
            return port.clone();
        }
        if let Some(port) = self.listeners.get(&d) {
            return port.to_string();
        }
        "?".to_string()
    }

    fn disconnect(&mut self, d: Descriptor) {
        if let Some(port) = self.listeners.remove(&d) {
            self.by_port.remove(&port);
            return;
        }
        if let Some(conn) = self.connections.get_mut(&d) {
            if !conn.closing {
                conn.closing = true;
                self.pending_disconnects.push_back(d);
            }
        }
    }
}
