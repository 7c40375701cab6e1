//! Front relay for control connections.
//!
//! # Data Flow
//! ```text
//! client ──TCP──▶ Listener (public address, bounded)
//!                   → ConnectionSetup + hooks
//!                   → TLS handshake when TlsStart::Immediate
//!                   → copy_bidirectional ──TCP──▶ libunftp (loopback)
//! ```
//!
//! Passive data connections bypass the relay and reach libunftp directly.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::net::connection::{apply_hooks, ConnectionHook, ConnectionSetup, ConnectionTracker, TlsStart};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};

/// Accepts public control connections and forwards them to the FTP engine.
pub struct FrontRelay {
    listener: Listener,
    upstream: SocketAddr,
    hooks: Arc<[Arc<dyn ConnectionHook>]>,
    acceptor: Option<TlsAcceptor>,
    tracker: ConnectionTracker,
}

impl FrontRelay {
    pub fn new(
        listener: Listener,
        upstream: SocketAddr,
        hooks: Vec<Arc<dyn ConnectionHook>>,
        acceptor: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            listener,
            upstream,
            hooks: hooks.into(),
            acceptor,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until shutdown is signalled. Live relays are closed on shutdown too.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        loop {
            let (stream, peer, permit) = tokio::select! {
                _ = stop.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            let mut setup = ConnectionSetup::new(peer);
            apply_hooks(&self.hooks, &mut setup);

            let session = RelaySession {
                setup,
                upstream: self.upstream,
                acceptor: self.acceptor.clone(),
                _permit: permit,
            };
            let guard = self.tracker.track(session.setup.id);
            let mut session_stop = shutdown.subscribe();
            tokio::spawn(async move {
                let id = guard.id();
                tokio::select! {
                    result = session.run(stream) => {
                        if let Err(e) = result {
                            tracing::debug!(connection_id = %id, error = %e, "Relay ended with error");
                        }
                    }
                    _ = session_stop.recv() => {
                        tracing::debug!(connection_id = %id, "Relay closed by shutdown");
                    }
                }
                drop(guard);
            });
        }

        tracing::info!(active = self.tracker.active_count(), "Front listener stopped");
        Ok(())
    }
}

struct RelaySession {
    setup: ConnectionSetup,
    upstream: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    _permit: ConnectionPermit,
}

impl RelaySession {
    async fn run(self, client: TcpStream) -> std::io::Result<()> {
        let _ = client.set_nodelay(true);
        match (self.setup.tls, self.acceptor.as_ref()) {
            (TlsStart::Immediate, Some(acceptor)) => {
                let tls = acceptor.accept(client).await?;
                tracing::debug!(connection_id = %self.setup.id, peer = %self.setup.peer, "TLS handshake complete");
                self.forward(tls).await
            }
            (TlsStart::Immediate, None) => Err(std::io::Error::other("immediate TLS requested without a certificate")),
            (TlsStart::OnRequest, _) => self.forward(client).await,
        }
    }

    async fn forward<S>(&self, mut client: S) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut upstream = TcpStream::connect(self.upstream).await?;
        let _ = upstream.set_nodelay(true);
        let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
        tracing::debug!(
            connection_id = %self.setup.id,
            peer = %self.setup.peer,
            bytes_in = sent,
            bytes_out = received,
            "Relay finished"
        );
        Ok(())
    }
}
