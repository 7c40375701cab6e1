//! Configuration schema definitions.
//!
//! This module defines the complete option structure for the FTP server
//! harness. All types derive Serde traits for deserialization from the JSON
//! settings file; every field has a default so a minimal file is enough.

use std::fmt;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::AuthenticationMode;
use crate::layout::LayoutMode;

/// Name of the directory below the temp directory used by `system-io` without a root.
pub const DEFAULT_SYSTEM_IO_DIR: &str = "TestFtpServer";

/// Control port for plain and explicit-TLS FTP.
pub const DEFAULT_PORT: u16 = 21;

/// Control port for implicit FTPS.
pub const DEFAULT_IMPLICIT_PORT: u16 = 990;

/// Root options for one server run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Options {
    /// Enabled membership sources.
    pub authentication: AuthenticationMode,

    /// PAM membership settings.
    pub pam: PamOptions,

    /// Account → directory mapping.
    pub layout: LayoutMode,

    /// Listener settings.
    pub server: ServerOptions,

    /// Certificate and TLS mode.
    pub tls: TlsOptions,

    /// Backend used when no subcommand selects one.
    pub backend: BackendKind,

    pub system_io: SystemIoOptions,

    pub unix: UnixOptions,

    pub in_memory: InMemoryOptions,

    pub google_drive: GoogleDriveOptions,

    /// Accounts for the custom membership provider.
    pub accounts: Vec<AccountOptions>,

    pub logging: LoggingOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            authentication: AuthenticationMode::CUSTOM,
            pam: PamOptions::default(),
            layout: LayoutMode::default(),
            server: ServerOptions::default(),
            tls: TlsOptions::default(),
            backend: BackendKind::default(),
            system_io: SystemIoOptions::default(),
            unix: UnixOptions::default(),
            in_memory: InMemoryOptions::default(),
            google_drive: GoogleDriveOptions::default(),
            accounts: vec![AccountOptions {
                name: "tester".to_string(),
                password: "testing".to_string(),
            }],
            logging: LoggingOptions::default(),
        }
    }
}

/// PAM membership settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PamOptions {
    /// Skip the account check after PAM authentication succeeded.
    pub no_account_management: bool,

    /// PAM service name.
    pub service: String,
}

impl Default for PamOptions {
    fn default() -> Self {
        Self {
            no_account_management: false,
            service: "ftp".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Address to bind (IP or host name).
    pub address: Option<String>,

    /// Control port. Defaults depend on the TLS mode.
    pub port: Option<u16>,

    /// Passive data port range.
    pub passive: Option<PassivePortRange>,

    /// Accept passive data connections from any peer address.
    pub promiscuous_passive: bool,

    /// Host or IP announced in PASV replies.
    pub passive_host: Option<String>,

    /// Idle session timeout in seconds.
    pub idle_timeout_secs: Option<u64>,

    /// Maximum concurrent control connections on the TLS front listener.
    pub max_connections: usize,

    /// Seconds the front listener gets to wind down on stop.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            address: None,
            port: None,
            passive: None,
            promiscuous_passive: false,
            passive_host: None,
            idle_timeout_secs: None,
            max_connections: 1_000,
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerOptions {
    pub fn effective_port(&self, implicit_tls: bool) -> u16 {
        self.port.unwrap_or(if implicit_tls { DEFAULT_IMPLICIT_PORT } else { DEFAULT_PORT })
    }

    /// `host:port` string suitable for binding.
    pub fn bind_address(&self, implicit_tls: bool) -> String {
        let host = self.address.as_deref().unwrap_or("127.0.0.1");
        let port = self.effective_port(implicit_tls);
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, port),
            _ => format!("{}:{}", host, port),
        }
    }
}

/// Inclusive passive port range written as `FIRST:LAST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct PassivePortRange {
    pub first: u16,
    pub last: u16,
}

impl PassivePortRange {
    pub fn to_range(self) -> RangeInclusive<u16> {
        self.first..=self.last
    }
}

/// Error for malformed passive port ranges.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid passive port range '{0}', expected FIRST:LAST with FIRST <= LAST")]
pub struct PassivePortRangeError(pub String);

impl FromStr for PassivePortRange {
    type Err = PassivePortRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PassivePortRangeError(s.to_string());
        let (first, last) = s.split_once(':').ok_or_else(err)?;
        let first: u16 = first.trim().parse().map_err(|_| err())?;
        let last: u16 = last.trim().parse().map_err(|_| err())?;
        if first == 0 || first > last {
            return Err(err());
        }
        Ok(Self { first, last })
    }
}

impl TryFrom<String> for PassivePortRange {
    type Error = PassivePortRangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PassivePortRange> for String {
    fn from(range: PassivePortRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for PassivePortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.last)
    }
}

/// TLS settings.
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsOptions {
    /// PEM file with the certificate chain and private key.
    pub certificate: Option<PathBuf>,

    /// Password of an encrypted private key in the PEM file.
    pub password: Option<String>,

    /// Start TLS on connect instead of waiting for `AUTH TLS`.
    pub implicit: bool,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("certificate", &self.certificate)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("implicit", &self.implicit)
            .finish()
    }
}

/// Storage backend kinds selectable from the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    SystemIo,
    Unix,
    #[default]
    InMemory,
    GoogleDriveUser,
    GoogleDriveService,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::SystemIo => "system-io",
            BackendKind::Unix => "unix",
            BackendKind::InMemory => "in-memory",
            BackendKind::GoogleDriveUser => "google-drive-user",
            BackendKind::GoogleDriveService => "google-drive-service",
        };
        f.write_str(name)
    }
}

/// Local filesystem backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemIoOptions {
    /// Backend root; `<temp>/TestFtpServer` when unset.
    pub root: Option<PathBuf>,
}

impl SystemIoOptions {
    pub fn resolved_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(default_system_io_root)
    }
}

/// `<temp>/TestFtpServer`.
pub fn default_system_io_root() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_SYSTEM_IO_DIR)
}

/// POSIX filesystem backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UnixOptions {
    pub root: PathBuf,
}

impl Default for UnixOptions {
    fn default() -> Self {
        Self { root: PathBuf::from("/") }
    }
}

/// In-memory backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct InMemoryOptions {
    /// Keep anonymous file trees between sessions.
    pub keep_anonymous: bool,
}

/// Google Drive backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GoogleDriveOptions {
    pub user: GoogleDriveUserOptions,

    pub service: GoogleDriveServiceOptions,

    /// Directory holding cached OAuth tokens, one file per user name.
    pub token_cache: Option<PathBuf>,

    /// Drive folder id used as the backend root.
    pub root_folder: String,
}

impl Default for GoogleDriveOptions {
    fn default() -> Self {
        Self {
            user: GoogleDriveUserOptions::default(),
            service: GoogleDriveServiceOptions::default(),
            token_cache: None,
            root_folder: "root".to_string(),
        }
    }
}

impl GoogleDriveOptions {
    pub fn resolved_token_cache(&self) -> PathBuf {
        self.token_cache.clone().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config").join("ftpserver").join("google-drive"))
                .unwrap_or_else(|| std::env::temp_dir().join("ftpserver-google-drive"))
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GoogleDriveUserOptions {
    /// OAuth client secrets JSON.
    pub client_secrets: Option<PathBuf>,

    /// Name the token is cached under.
    pub user_name: Option<String>,

    /// Force a token refresh after authorization.
    pub refresh: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GoogleDriveServiceOptions {
    /// Service account key file.
    pub credential_file: Option<PathBuf>,

    /// Finish uploads after STOR has been acknowledged.
    pub background_upload: bool,
}

/// A custom membership account.
#[derive(Clone, Deserialize, Serialize)]
pub struct AccountOptions {
    pub name: String,
    pub password: String,
}

impl fmt::Debug for AccountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountOptions")
            .field("name", &self.name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "ftpserver=info,libunftp=info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
