//! Operator shutdown signal.
//!
//! # Responsibilities
//! - Resolve when the operator presses Enter on the console
//! - Resolve on Ctrl-C
//!
//! # Design Decisions
//! - A closed stdin (daemonized or piped from /dev/null) is not a quit request;
//!   only Ctrl-C stops such a run

use tokio::io::{AsyncBufReadExt, BufReader};

/// Resolve once the operator asks the server to stop.
pub async fn operator_quit() {
    eprintln!("Press ENTER to stop the server.");
    tokio::select! {
        _ = console_line(tokio::io::stdin()) => tracing::info!("Stop requested from console"),
        _ = ctrl_c() => tracing::info!("Stop requested by Ctrl-C"),
    }
}

/// Resolve when a full line was read; pend forever on EOF.
pub async fn console_line<R>(input: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    match BufReader::new(input).read_line(&mut line).await {
        Ok(0) => {
            tracing::debug!("Console input closed, waiting for Ctrl-C");
            std::future::pending::<()>().await
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Console input unreadable, waiting for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn a_line_resolves() {
        console_line(&b"\n"[..]).await;
    }

    #[tokio::test]
    async fn eof_does_not_resolve() {
        let waited = tokio::time::timeout(Duration::from_millis(50), console_line(&b""[..])).await;
        assert!(waited.is_err());
    }
}
