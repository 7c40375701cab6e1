//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Without connection hooks:
//!     libunftp binds the public address itself
//!
//! With connection hooks (e.g. implicit TLS):
//!     Incoming TCP connection
//!         → listener.rs (accept loop, connection limits)
//!         → connection.rs (ConnectionSetup, hooks)
//!         → tls.rs (handshake when the setup demands it)
//!         → relay.rs (byte relay to libunftp on loopback)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Hooks see every connection before any FTP byte is exchanged
//! - Certificates are loaded once at startup

pub mod connection;
pub mod listener;
pub mod relay;
pub mod tls;

pub use connection::{ConnectionHook, ConnectionId, ConnectionSetup, ImplicitTls, TlsStart};
pub use listener::{Listener, ListenerError};
pub use tls::{load_server_config, TlsError};
