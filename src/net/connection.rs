//! Per-connection setup and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Describe how a new control connection is set up (`ConnectionSetup`)
//! - Let registered hooks adjust that setup before the session starts
//! - Count live relayed connections

use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// When TLS starts on a control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsStart {
    /// Plain until the client sends `AUTH TLS`.
    #[default]
    OnRequest,
    /// Handshake before the first byte of FTP traffic.
    Immediate,
}

/// Mutable description of a freshly accepted control connection.
#[derive(Debug, Clone)]
pub struct ConnectionSetup {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub tls: TlsStart,
}

impl ConnectionSetup {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            tls: TlsStart::default(),
        }
    }
}

/// Callback run for every new control connection before the session starts.
pub trait ConnectionHook: Send + Sync + Debug {
    fn on_connection(&self, setup: &mut ConnectionSetup);
}

/// Forces the TLS handshake as soon as a connection is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImplicitTls;

impl ConnectionHook for ImplicitTls {
    fn on_connection(&self, setup: &mut ConnectionSetup) {
        setup.tls = TlsStart::Immediate;
        tracing::trace!(connection_id = %setup.id, peer = %setup.peer, "Implicit TLS requested");
    }
}

/// Run all hooks in registration order.
pub fn apply_hooks(hooks: &[Arc<dyn ConnectionHook>], setup: &mut ConnectionSetup) {
    for hook in hooks {
        hook.on_connection(setup);
    }
}

/// Counts live connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self, id: ConnectionId) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connections_start_plain() {
        let setup = ConnectionSetup::new(peer());
        assert_eq!(setup.tls, TlsStart::OnRequest);
    }

    #[test]
    fn implicit_tls_hook_forces_handshake() {
        let hooks: Vec<Arc<dyn ConnectionHook>> = vec![Arc::new(ImplicitTls)];
        let mut setup = ConnectionSetup::new(peer());
        apply_hooks(&hooks, &mut setup);
        assert_eq!(setup.tls, TlsStart::Immediate);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track(ConnectionId::new());
        let guard2 = tracker.track(ConnectionId::new());
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }
}
