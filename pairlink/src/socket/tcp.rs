//! Production socket service over non-blocking TCP and a `mio` poll.
//!
//! One `Poll` multiplexes every listener and connection; the descriptor
//! value doubles as the poll token. Read interest tracks the freeze state
//! and write interest tracks whether the outgoing buffer has bytes, so a
//! frozen connection with nothing to write is deregistered entirely.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, warn};

use super::{Descriptor, SocketService};

/// Poll event buffer capacity.
const EVENT_CAPACITY: usize = 256;

/// Read chunk size; incoming bytes are drained until `WouldBlock`.
const READ_CHUNK: usize = 4096;

#[derive(Debug)]
struct TcpConnection {
    stream: TcpStream,
    listener: Descriptor,
    host: String,
    port: String,
    incoming: Vec<u8>,
    outgoing: Vec<u8>,
    frozen: bool,
    registered: bool,
    queued_incoming: bool,
    closing: bool,
}

impl TcpConnection {
    fn desired_interest(&self) -> Option<Interest> {
        let readable = !self.frozen;
        let writable = !self.outgoing.is_empty();
        match (readable, writable) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// [`SocketService`] over real TCP sockets.
///
/// Single-threaded; `serve` is the only blocking call and is bounded by
/// its timeout.
#[derive(Debug)]
pub struct TcpSocketService {
    poll: Poll,
    events: Events,
    next_token: usize,
    listeners: HashMap<Descriptor, TcpListener>,
    connections: HashMap<Descriptor, TcpConnection>,
    /// Peer identity of connections whose disconnection event has been
    /// drained but may still be referenced by log lines this iteration.
    parting: HashMap<Descriptor, (String, String)>,
    connection_queue: VecDeque<Descriptor>,
    disconnection_queue: VecDeque<Descriptor>,
    incoming_queue: VecDeque<Descriptor>,
    pending_disconnects: VecDeque<Descriptor>,
}

impl TcpSocketService {
    /// Creates the service and its poll instance.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            next_token: 0,
            listeners: HashMap::new(),
            connections: HashMap::new(),
            parting: HashMap::new(),
            connection_queue: VecDeque::new(),
            disconnection_queue: VecDeque::new(),
            incoming_queue: VecDeque::new(),
            pending_disconnects: VecDeque::new(),
        })
    }

    /// Actual local port of a listener, useful when bound to port 0.
    pub fn local_port(&self, d: Descriptor) -> Option<u16> {
        self.listeners
            .get(&d)
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }

    fn allocate(&mut self) -> Descriptor {
        let d = Descriptor(self.next_token);
        self.next_token += 1;
        d
    }

    /// Brings a connection's poll registration in line with its freeze
    /// state and outgoing backlog.
    fn update_registration(&mut self, d: Descriptor) {
        let Some(conn) = self.connections.get_mut(&d) else {
            return;
        };
        if conn.closing {
            return;
        }
        let registry = self.poll.registry();
        match (conn.registered, conn.desired_interest()) {
            (false, Some(interest)) => {
                if let Err(e) = registry.register(&mut conn.stream, Token(d.0), interest) {
                    warn!("Failed to register descriptor {}: {}.", d, e);
                } else {
                    conn.registered = true;
                }
            }
            (true, Some(interest)) => {
                if let Err(e) = registry.reregister(&mut conn.stream, Token(d.0), interest) {
                    warn!("Failed to reregister descriptor {}: {}.", d, e);
                }
            }
            (true, None) => {
                if let Err(e) = registry.deregister(&mut conn.stream) {
                    warn!("Failed to deregister descriptor {}: {}.", d, e);
                }
                conn.registered = false;
            }
            (false, None) => {}
        }
    }

    /// Takes a connection out of the poll and queues its disconnection
    /// event. The entry itself stays until the event is drained so the
    /// peer identity remains resolvable.
    fn retire(&mut self, d: Descriptor) {
        let Some(conn) = self.connections.get_mut(&d) else {
            return;
        };
        if conn.closing {
            return;
        }
        conn.closing = true;
        if conn.registered {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            conn.registered = false;
        }
        self.disconnection_queue.push_back(d);
    }

    fn accept_ready(&mut self, listener_descriptor: Descriptor) {
        loop {
            let accepted = match self.listeners.get_mut(&listener_descriptor) {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, peer)) => self.adopt(listener_descriptor, stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept failed on descriptor {}: {}.", listener_descriptor, e);
                    return;
                }
            }
        }
    }

    fn adopt(&mut self, listener: Descriptor, mut stream: TcpStream, peer: SocketAddr) {
        let d = self.allocate();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, Token(d.0), Interest::READABLE)
        {
            warn!("Failed to register accepted connection: {}.", e);
            return;
        }
        self.connections.insert(
            d,
            TcpConnection {
                stream,
                listener,
                host: peer.ip().to_string(),
                port: peer.port().to_string(),
                incoming: Vec::new(),
                outgoing: Vec::new(),
                frozen: false,
                registered: true,
                queued_incoming: false,
                closing: false,
            },
        );
        self.connection_queue.push_back(d);
    }

    /// Reads until `WouldBlock`; returns `false` if the connection must be
    /// retired (EOF or hard error).
    fn read_ready(&mut self, d: Descriptor) -> bool {
        let Some(conn) = self.connections.get_mut(&d) else {
            return true;
        };
        if conn.closing || conn.frozen {
            return true;
        }
        let mut chunk = [0u8; READ_CHUNK];
        let mut fresh = false;
        let alive = loop {
            match conn.stream.read(&mut chunk) {
                Ok(0) => break false,
                Ok(n) => {
                    conn.incoming.extend_from_slice(&chunk[..n]);
                    fresh = true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break true,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Read failed on descriptor {}: {}.", d, e);
                    break false;
                }
            }
        };
        if fresh && !conn.queued_incoming {
            conn.queued_incoming = true;
            self.incoming_queue.push_back(d);
        }
        alive
    }

    /// Flushes the outgoing buffer until empty or `WouldBlock`; returns
    /// `false` if the connection must be retired.
    fn write_ready(&mut self, d: Descriptor) -> bool {
        let Some(conn) = self.connections.get_mut(&d) else {
            return true;
        };
        if conn.closing {
            return true;
        }
        while !conn.outgoing.is_empty() {
            match conn.stream.write(&conn.outgoing) {
                Ok(0) => return false,
                Ok(n) => {
                    conn.outgoing.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Write failed on descriptor {}: {}.", d, e);
                    return false;
                }
            }
        }
        true
    }
}

impl SocketService for TcpSocketService {
    fn listen(&mut self, port: u16) -> Option<Descriptor> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let mut listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind port {}: {}.", port, e);
                return None;
            }
        };
        let d = self.allocate();
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut listener, Token(d.0), Interest::READABLE)
        {
            error!("Failed to register listener on port {}: {}.", port, e);
            return None;
        }
        self.listeners.insert(d, listener);
        Some(d)
    }

    fn serve(&mut self, timeout: Option<Duration>) -> bool {
        self.parting.clear();

        // Requested closes become observable disconnection events now.
        while let Some(d) = self.pending_disconnects.pop_front() {
            self.retire(d);
        }

        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() == io::ErrorKind::Interrupted {
                return true;
            }
            error!("Poll failed: {}.", e);
            return false;
        }

        let ready: Vec<(Descriptor, bool, bool)> = self
            .events
            .iter()
            .map(|event| {
                (
                    Descriptor(event.token().0),
                    event.is_readable(),
                    event.is_writable(),
                )
            })
            .collect();

        for (d, readable, writable) in ready {
            if self.listeners.contains_key(&d) {
                if readable {
                    self.accept_ready(d);
                }
                continue;
            }
            if readable && !self.read_ready(d) {
                self.retire(d);
                continue;
            }
            if writable && !self.write_ready(d) {
                self.retire(d);
                continue;
            }
            // Write interest drops away once the backlog is flushed.
            self.update_registration(d);
        }

        true
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
            if self.connections.contains_key(&d) {
                return Some(d);
            }
        }
    }

    fn listener_of(&self, d: Descriptor) -> Option<Descriptor> {
        self.connections.get(&d).map(|conn| conn.listener)
    }

    fn freeze(&mut self, d: Descriptor) {
        let Some(conn) = self.connections.get_mut(&d) else {
            return;
        };
        if conn.frozen {
            return;
        }
        conn.frozen = true;
        self.update_registration(d);
    }

    fn unfreeze(&mut self, d: Descriptor) {
        let Some(conn) = self.connections.get_mut(&d) else {
            return;
        };
        if !conn.frozen {
            return;
        }
        conn.frozen = false;
        self.update_registration(d);
    }

    fn swap_incoming(&mut self, d: Descriptor, buf: &mut Vec<u8>) {
        buf.clear();
        if let Some(conn) = self.connections.get_mut(&d) {
            std::mem::swap(&mut conn.incoming, buf);
            conn.queued_incoming = false;
        }
    }

    fn append_outgoing(&mut self, d: Descriptor, bytes: &[u8]) {
        let Some(conn) = self.connections.get_mut(&d) else {
            return;
        };
        if conn.closing || bytes.is_empty() {
            return;
        }
        let was_empty = conn.outgoing.is_empty();
        conn.outgoing.extend_from_slice(bytes);
        if was_empty {
            self.update_registration(d);
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
            return Ipv4Addr::UNSPECIFIED.to_string();
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
        if let Some(port) = self.local_port(d) {
            return port.to_string();
        }
        "?".to_string()
    }

    fn disconnect(&mut self, d: Descriptor) {
        if let Some(mut listener) = self.listeners.remove(&d) {
            let _ = self.poll.registry().deregister(&mut listener);
            return;
        }
        if let Some(conn) = self.connections.get(&d) {
            if !conn.closing && !self.pending_disconnects.contains(&d) {
                self.pending_disconnects.push_back(d);
            }
        }
    }
}
