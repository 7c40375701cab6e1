//! Host lifecycle: pre-start hooks, start, wait for the operator, stop.

use std::future::Future;

use crate::host::{HostError, ServerHost};
use crate::registry::PreStartHook;

/// Drives one host from construction to shutdown.
#[derive(Debug, Default)]
pub struct Runner {
    pre_start: Vec<PreStartHook>,
}

impl Runner {
    pub fn new(pre_start: Vec<PreStartHook>) -> Self {
        Self { pre_start }
    }

    /// Apply the pre-start hooks in order, start the host and serve until
    /// `quit` resolves or the host stops by itself.
    ///
    /// The host is always asked to stop before returning. A failure while
    /// stopping is only logged when an earlier error is already reported.
    pub async fn run<H, Q>(&self, host: &mut H, quit: Q) -> Result<(), HostError>
    where
        H: ServerHost + ?Sized,
        Q: Future<Output = ()>,
    {
        let served = match self.start(host).await {
            Ok(()) => Self::serve(host, quit).await,
            Err(e) => Err(e),
        };

        let stopped = host.stop().await;
        match served {
            Ok(()) => stopped,
            Err(e) => {
                if let Err(stop_error) = stopped {
                    tracing::warn!(error = %stop_error, "Stop after failure also failed");
                }
                Err(e)
            }
        }
    }

    async fn start<H>(&self, host: &mut H) -> Result<(), HostError>
    where
        H: ServerHost + ?Sized,
    {
        for (index, hook) in self.pre_start.iter().enumerate() {
            tracing::debug!(index, hook = ?hook, "Applying pre-start hook");
            hook.apply(host).await?;
        }
        host.start().await?;
        tracing::info!("Server started");
        Ok(())
    }

    async fn serve<H, Q>(host: &mut H, quit: Q) -> Result<(), HostError>
    where
        H: ServerHost + ?Sized,
        Q: Future<Output = ()>,
    {
        tokio::select! {
            _ = quit => {
                tracing::info!("Stopping server");
                Ok(())
            }
            result = host.wait() => {
                if result.is_ok() {
                    tracing::warn!("Server stopped on its own");
                }
                result
            }
        }
    }
}
