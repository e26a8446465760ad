//! Pairlink - TCP rendezvous and relay service
//!
//! This library pairs two classes of TCP clients, "supply" peers and
//! "demand" peers, and transparently forwards byte streams between each
//! matched pair. An optional third class of "driver" clients receives
//! unmet-demand backlog counts, enabling an external autoscaler to spawn
//! additional supply peers on demand.
//!
//! # High-Level API
//!
//! ```no_run
//! use pairlink::config::Settings;
//! use pairlink::relay::RelayServer;
//! use pairlink::socket::TcpSocketService;
//!
//! let settings = Settings::new(4501, 4502).with_driver_port(4503);
//! let mut service = TcpSocketService::new().expect("poll");
//! let mut server = RelayServer::new(settings);
//! server.run(&mut service).expect("relay");
//! ```
//!
//! The relay is generic over [`socket::SocketService`], so the same event
//! loop can be driven against [`socket::MemorySocketService`] in tests.

pub mod config;
pub mod logging;
pub mod relay;
pub mod signals;
pub mod socket;

/// Version of the pairlink library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
