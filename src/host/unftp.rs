//! `ServerHost` backed by a libunftp server.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use libunftp::options::ActivePassiveMode;
use libunftp::storage::StorageBackend;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::task::TaskTracker;

use crate::auth::{FtpAuthenticator, FtpUser};
use crate::host::{HostError, HostSettings, ServerHost};
use crate::lifecycle::Shutdown;
use crate::net::relay::FrontRelay;
use crate::net::{ConnectionHook, Listener, ListenerError};

/// Creates one storage adapter per FTP session.
pub type StorageFactory<S> = Box<dyn Fn() -> S + Send + Sync>;

const GREETING: &str = "ftpserver ready";

pub struct UnftpHost<S> {
    storage: Option<StorageFactory<S>>,
    authenticator: Arc<FtpAuthenticator>,
    settings: HostSettings,
    hooks: Vec<Arc<dyn ConnectionHook>>,
    shutdown: Shutdown,
    server_task: Option<JoinHandle<Result<(), libunftp::ServerError>>>,
    relay_task: Option<JoinHandle<Result<(), ListenerError>>>,
    background: Option<TaskTracker>,
    public_addr: Option<SocketAddr>,
}

enum Finished {
    Server(Result<Result<(), libunftp::ServerError>, tokio::task::JoinError>),
    Relay(Result<Result<(), ListenerError>, tokio::task::JoinError>),
}

impl<S> UnftpHost<S>
where
    S: StorageBackend<FtpUser> + 'static,
{
    pub fn new(storage: StorageFactory<S>, authenticator: Arc<FtpAuthenticator>, settings: HostSettings) -> Self {
        Self {
            storage: Some(storage),
            authenticator,
            settings,
            hooks: Vec::new(),
            shutdown: Shutdown::new(),
            server_task: None,
            relay_task: None,
            background: None,
            public_addr: None,
        }
    }

    /// Work the storage backend finishes after a transfer is acknowledged.
    /// `stop` waits for it up to the shutdown grace period.
    pub fn with_background_tasks(mut self, tracker: TaskTracker) -> Self {
        self.background = Some(tracker);
        self
    }

    /// Address of the front listener once started with connection hooks.
    pub fn public_addr(&self) -> Option<SocketAddr> {
        self.public_addr
    }

    fn build_server(
        &self,
        storage: StorageFactory<S>,
        passive_host: Option<String>,
    ) -> Result<libunftp::Server<S, FtpUser>, HostError> {
        let mut builder = libunftp::ServerBuilder::with_authenticator(storage, self.authenticator.clone())
            .greeting(GREETING)
            .active_passive_mode(ActivePassiveMode::ActiveAndPassive);

        if let Some(range) = self.settings.passive_ports.clone() {
            builder = builder.passive_ports(range);
        }
        if let Some(host) = passive_host {
            builder = match host.parse::<std::net::Ipv4Addr>() {
                Ok(ip) => builder.passive_host(ip),
                Err(_) => builder.passive_host(host.as_str()),
            };
        }
        if let Some(secs) = self.settings.idle_timeout_secs {
            builder = builder.idle_session_timeout(secs);
        }
        if let Some(tls) = self.settings.tls.clone() {
            builder = builder.ftps_manual::<std::path::PathBuf>(tls);
        }

        builder.build().map_err(|e| HostError::Build(e.to_string()))
    }

    /// Bind the front listener and pick the loopback port libunftp will use.
    async fn prepare_relay(&self) -> Result<(FrontRelay, SocketAddr), HostError> {
        let listener = Listener::bind(&self.settings.bind_address, self.settings.max_connections).await?;
        let upstream = reserve_loopback_port()?;
        let acceptor = self.settings.tls.clone().map(TlsAcceptor::from);
        Ok((FrontRelay::new(listener, upstream, self.hooks.clone(), acceptor), upstream))
    }
}

/// Pick a free loopback port for the engine behind the relay.
fn reserve_loopback_port() -> Result<SocketAddr, HostError> {
    let probe = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| ListenerError::Bind("127.0.0.1:0".to_string(), e))?;
    probe
        .local_addr()
        .map_err(|e| HostError::Listener(ListenerError::Bind("127.0.0.1:0".to_string(), e)))
}

#[async_trait]
impl<S> ServerHost for UnftpHost<S>
where
    S: StorageBackend<FtpUser> + 'static,
{
    fn register_connection_hook(&mut self, hook: Arc<dyn ConnectionHook>) -> Result<(), HostError> {
        if self.server_task.is_some() {
            return Err(HostError::AlreadyStarted);
        }
        tracing::debug!(hook = ?hook, "Connection hook registered");
        self.hooks.push(hook);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), HostError> {
        let storage = self.storage.take().ok_or(HostError::AlreadyStarted)?;

        let (listen_address, passive_host, relay) = if self.hooks.is_empty() {
            (self.settings.bind_address.clone(), self.settings.passive_host.clone(), None)
        } else {
            let (relay, upstream) = self.prepare_relay().await?;
            let public = relay.local_addr().map_err(|e| ListenerError::Bind(self.settings.bind_address.clone(), e))?;
            self.public_addr = Some(public);

            // PASV replies must announce the public address, not the loopback hop.
            let passive_host = self.settings.passive_host.clone().or_else(|| match public.ip() {
                IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip.to_string()),
                _ => {
                    tracing::warn!(address = %public, "Front listener has no usable IPv4 address; set server.passive_host");
                    None
                }
            });
            (upstream.to_string(), passive_host, Some(relay))
        };

        let server = self.build_server(storage, passive_host.clone())?;

        tracing::info!(
            address = %self.settings.bind_address,
            engine = %listen_address,
            relayed = relay.is_some(),
            implicit_tls = self.settings.implicit_tls,
            explicit_tls = self.settings.tls.is_some(),
            passive_ports = ?self.settings.passive_ports,
            passive_host = ?passive_host,
            "Starting FTP server"
        );

        self.server_task = Some(tokio::spawn(async move { server.listen(listen_address).await }));
        if let Some(relay) = relay {
            self.relay_task = Some(tokio::spawn(relay.run(self.shutdown.sender())));
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), HostError> {
        let Some(server) = self.server_task.as_mut() else {
            return Err(HostError::NotStarted);
        };
        let finished = match self.relay_task.as_mut() {
            Some(relay) => tokio::select! {
                result = server => Finished::Server(result),
                result = relay => Finished::Relay(result),
            },
            None => Finished::Server(server.await),
        };

        match finished {
            Finished::Server(result) => {
                self.server_task = None;
                result?.map_err(|e| HostError::Server(e.to_string()))
            }
            Finished::Relay(result) => {
                self.relay_task = None;
                Ok(result??)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), HostError> {
        self.shutdown.trigger();
        let grace = self.settings.shutdown_grace;

        let stopped = stop_tasks(self.relay_task.take(), self.server_task.take(), grace).await;
        if let Some(tracker) = self.background.take() {
            drain_background(tracker, grace).await;
        }

        tracing::info!("FTP server stopped");
        stopped
    }
}

/// Tear down the front relay, then the engine.
///
/// The engine task is aborted even when the relay ended with an error; the
/// relay's error is returned afterwards.
async fn stop_tasks(
    relay: Option<JoinHandle<Result<(), ListenerError>>>,
    server: Option<JoinHandle<Result<(), libunftp::ServerError>>>,
    grace: Duration,
) -> Result<(), HostError> {
    let relay_result = match relay {
        Some(task) => {
            let abort = task.abort_handle();
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(result)) => result.map_err(HostError::from),
                Ok(Err(e)) if e.is_cancelled() => Ok(()),
                Ok(Err(e)) => Err(HostError::Task(e)),
                Err(_) => {
                    tracing::warn!("Front listener did not stop in time, aborting");
                    abort.abort();
                    Ok(())
                }
            }
        }
        None => Ok(()),
    };

    let server_result = match server {
        Some(task) => {
            task.abort();
            match task.await {
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "FTP server reported an error while stopping");
                    Ok(())
                }
                Err(e) if !e.is_cancelled() => Err(HostError::Task(e)),
                _ => Ok(()),
            }
        }
        None => Ok(()),
    };

    relay_result.and(server_result)
}

async fn drain_background(tracker: TaskTracker, grace: Duration) {
    tracker.close();
    if tracker.is_empty() {
        return;
    }
    tracing::info!(pending = tracker.len(), "Waiting for background storage work");
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        tracing::warn!(pending = tracker.len(), "Background storage work did not finish in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn endless_server(dropped: Arc<AtomicBool>) -> JoinHandle<Result<(), libunftp::ServerError>> {
        tokio::spawn(async move {
            let _guard = SetOnDrop(dropped);
            std::future::pending::<Result<(), libunftp::ServerError>>().await
        })
    }

    #[tokio::test]
    async fn failed_relay_still_aborts_the_engine() {
        let dropped = Arc::new(AtomicBool::new(false));
        let server = endless_server(dropped.clone());
        let relay = tokio::spawn(async {
            Err::<(), _>(ListenerError::Accept(std::io::Error::other("accept loop died")))
        });

        let result = stop_tasks(Some(relay), Some(server), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(HostError::Listener(_))));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panicking_relay_still_aborts_the_engine() {
        let dropped = Arc::new(AtomicBool::new(false));
        let server = endless_server(dropped.clone());
        let relay = tokio::spawn(panicking_relay());

        let result = stop_tasks(Some(relay), Some(server), Duration::from_secs(1)).await;

        assert!(matches!(result, Err(HostError::Task(_))));
        assert!(dropped.load(Ordering::SeqCst));
    }

    async fn panicking_relay() -> Result<(), ListenerError> {
        panic!("relay panicked")
    }

    #[tokio::test]
    async fn stuck_relay_is_aborted_after_the_grace_period() {
        let dropped = Arc::new(AtomicBool::new(false));
        let server = endless_server(dropped.clone());
        let relay = tokio::spawn(std::future::pending::<Result<(), ListenerError>>());

        let result = stop_tasks(Some(relay), Some(server), Duration::from_millis(50)).await;

        assert!(result.is_ok());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn background_work_is_drained() {
        let tracker = TaskTracker::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        tracker.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        drain_background(tracker.clone(), Duration::from_secs(5)).await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(tracker.is_closed());
    }

    #[tokio::test]
    async fn background_drain_gives_up_after_the_grace_period() {
        let tracker = TaskTracker::new();
        tracker.spawn(std::future::pending::<()>());

        let started = std::time::Instant::now();
        drain_background(tracker.clone(), Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(tracker.len(), 1);
    }
}
