//! Server host abstraction.
//!
//! # Data Flow
//! ```text
//! ServiceRegistry<S> ──▶ UnftpHost<S>
//!                          register_connection_hook()*   (pre-start hooks)
//!                          start()   → libunftp listen task (+ front relay)
//!                          wait()    → resolves if the host stops on its own
//!                          stop()    → relay shutdown broadcast, listen task aborted,
//!                                      background storage work drained
//! ```
//!
//! # Design Decisions
//! - The runner only sees the `ServerHost` trait, so tests drive it with a fake
//! - Connection hooks must be registered before `start`

pub mod unftp;

use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::schema::{Options, ServerOptions};
use crate::net::{ConnectionHook, ListenerError};

pub use unftp::UnftpHost;

/// Errors raised by a server host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to build FTP server: {0}")]
    Build(String),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("FTP server failed: {0}")]
    Server(String),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("cannot prepare {path}: {source}")]
    Prepare {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("host was not started")]
    NotStarted,

    #[error("connection hooks must be registered before start")]
    AlreadyStarted,
}

/// Something that can serve FTP sessions.
#[async_trait]
pub trait ServerHost: Send {
    /// Add a hook run for every new control connection.
    fn register_connection_hook(&mut self, hook: Arc<dyn ConnectionHook>) -> Result<(), HostError>;

    async fn start(&mut self) -> Result<(), HostError>;

    /// Resolves when the host stops without being asked to.
    async fn wait(&mut self) -> Result<(), HostError>;

    async fn stop(&mut self) -> Result<(), HostError>;
}

/// Listener settings resolved from the options.
#[derive(Debug, Clone)]
pub struct HostSettings {
    /// Public control address (`host:port`).
    pub bind_address: String,
    pub passive_ports: Option<RangeInclusive<u16>>,
    pub passive_host: Option<String>,
    pub idle_timeout_secs: Option<u64>,
    pub max_connections: usize,
    pub shutdown_grace: std::time::Duration,
    /// Certificate for explicit FTPS and implicit TLS.
    pub tls: Option<Arc<rustls::ServerConfig>>,
    pub implicit_tls: bool,
}

impl HostSettings {
    pub fn from_options(options: &Options) -> Self {
        Self::from_server(&options.server, options.tls.implicit)
    }

    pub fn from_server(server: &ServerOptions, implicit_tls: bool) -> Self {
        Self {
            bind_address: server.bind_address(implicit_tls),
            passive_ports: server.passive.map(|range| range.to_range()),
            passive_host: server.passive_host.clone(),
            idle_timeout_secs: server.idle_timeout_secs,
            max_connections: server.max_connections,
            shutdown_grace: std::time::Duration::from_secs(server.shutdown_grace_secs),
            tls: None,
            implicit_tls,
        }
    }
}
