//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tokio::net::TcpListener;

use ftpserver::cli::Cli;
use ftpserver::host::{HostError, ServerHost};
use ftpserver::net::connection::apply_hooks;
use ftpserver::net::{ConnectionHook, ConnectionSetup};
use ftpserver::Options;

/// Parse `args` and overlay them on default options, without a settings file.
pub fn options_from(args: &[&str]) -> Result<Options, clap::Error> {
    let cli = Cli::try_parse_from(std::iter::once("ftpserver").chain(args.iter().copied()))?;
    let mut options = Options::default();
    cli.apply(&mut options);
    Ok(options)
}

/// Write a throw-away certificate and key into `dir`.
pub fn write_certificate(dir: &Path) -> PathBuf {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let path = dir.join("server.pem");
    std::fs::write(&path, format!("{}{}", cert.cert.pem(), cert.signing_key.serialize_pem())).unwrap();
    path
}

/// A free loopback port at the time of the call.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// What a `FakeHost` was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Hook,
    Start,
    Stop,
}

/// Host that records calls instead of serving FTP.
#[derive(Debug, Default)]
pub struct FakeHost {
    pub events: Vec<HostEvent>,
    pub hooks: Vec<Arc<dyn ConnectionHook>>,
    pub fail_start: bool,
    /// Error returned from `wait` right away, as if the server died.
    pub crash: Option<String>,
}

impl FakeHost {
    /// Simulate a new control connection and return what the hooks decided.
    pub fn connect(&self, peer: SocketAddr) -> ConnectionSetup {
        let mut setup = ConnectionSetup::new(peer);
        apply_hooks(&self.hooks, &mut setup);
        setup
    }
}

#[async_trait]
impl ServerHost for FakeHost {
    fn register_connection_hook(&mut self, hook: Arc<dyn ConnectionHook>) -> Result<(), HostError> {
        if self.events.contains(&HostEvent::Start) {
            return Err(HostError::AlreadyStarted);
        }
        self.events.push(HostEvent::Hook);
        self.hooks.push(hook);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), HostError> {
        if self.fail_start {
            return Err(HostError::Build("refused".to_string()));
        }
        self.events.push(HostEvent::Start);
        Ok(())
    }

    async fn wait(&mut self) -> Result<(), HostError> {
        match self.crash.take() {
            Some(reason) => Err(HostError::Server(reason)),
            None => std::future::pending().await,
        }
    }

    async fn stop(&mut self) -> Result<(), HostError> {
        self.events.push(HostEvent::Stop);
        Ok(())
    }
}
