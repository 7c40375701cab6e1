//! Command-line surface.
//!
//! `ftpserver [OPTIONS] [COMMAND]`. Global flags overlay the settings file;
//! the subcommand selects the storage backend. Without a subcommand the
//! backend named in the settings file is used.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::auth::{AuthenticationMode, AuthenticationToken};
use crate::config::loader::ENVIRONMENT_VAR;
use crate::config::schema::{BackendKind, Options, PassivePortRange};
use crate::layout::LayoutMode;

#[derive(Debug, Parser)]
#[command(name = "ftpserver", version)]
#[command(about = "Test FTP server with selectable storage backends", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to ./appsettings.json when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Environment name selecting appsettings.<NAME>.json
    #[arg(long, env = ENVIRONMENT_VAR, value_name = "NAME")]
    pub environment: Option<String>,

    /// Log filter, e.g. "debug" or "ftpserver=trace"
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Authentication source, repeatable (custom, anonymous, pam)
    #[arg(short = 'a', long = "authentication", value_enum, value_delimiter = ',', value_name = "MODE")]
    pub authentication: Vec<AuthenticationToken>,

    /// Disable the PAM account management step
    #[arg(long)]
    pub no_pam_account_management: bool,

    /// Directory layout (default, single-root, root-per-user, pam-home, pam-home-chroot)
    #[arg(short = 'l', long, value_enum, value_name = "LAYOUT")]
    pub layout: Option<LayoutMode>,

    /// Server address
    #[arg(short = 's', long, value_name = "ADDRESS")]
    pub address: Option<String>,

    /// Server port
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Passive port range
    #[arg(long, value_name = "FIRST:LAST")]
    pub passive: Option<PassivePortRange>,

    /// Accept passive data connections from any address
    #[arg(long)]
    pub promiscuous: bool,

    /// Path to the PEM certificate (chain and private key)
    #[arg(short = 'c', long, value_name = "CERTIFICATE")]
    pub certificate: Option<PathBuf>,

    /// Password of the encrypted private key
    #[arg(short = 'P', long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Use implicit TLS
    #[arg(long)]
    pub implicit: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve a directory of the local filesystem
    SystemIo {
        /// Root directory (defaults to <temp>/TestFtpServer)
        #[arg(value_name = "ROOT-DIRECTORY")]
        root: Option<PathBuf>,
    },
    /// Serve the POSIX filesystem
    Unix,
    /// Serve a volatile in-memory filesystem
    InMemory {
        /// Keep anonymous file trees between sessions
        #[arg(long)]
        keep_anonymous: bool,
    },
    /// Serve Google Drive
    GoogleDrive {
        #[command(subcommand)]
        mode: GoogleDriveCommand,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum GoogleDriveCommand {
    /// Authorize as a user through the OAuth consent flow
    User {
        #[arg(value_name = "CLIENT-SECRETS-FILE")]
        client_secrets: PathBuf,
        #[arg(value_name = "USERNAME")]
        username: String,
        /// Refresh the access token after authorization
        #[arg(long)]
        refresh: bool,
    },
    /// Authorize with a service account key
    Service {
        #[arg(value_name = "SERVICE-CREDENTIAL-FILE")]
        credential_file: PathBuf,
        /// Acknowledge uploads before they reach Drive
        #[arg(long)]
        background_upload: bool,
    },
}

impl Cli {
    /// Overlay the flags onto options loaded from the settings file.
    pub fn apply(&self, options: &mut Options) {
        if !self.authentication.is_empty() {
            options.authentication = AuthenticationMode::from_tokens(self.authentication.iter().copied());
        }
        if self.no_pam_account_management {
            options.pam.no_account_management = true;
        }
        if let Some(layout) = self.layout {
            options.layout = layout;
        }
        if let Some(address) = &self.address {
            options.server.address = Some(address.clone());
        }
        if let Some(port) = self.port {
            options.server.port = Some(port);
        }
        if let Some(passive) = self.passive {
            options.server.passive = Some(passive);
        }
        if self.promiscuous {
            options.server.promiscuous_passive = true;
        }
        if let Some(certificate) = &self.certificate {
            options.tls.certificate = Some(certificate.clone());
        }
        if let Some(password) = &self.password {
            options.tls.password = Some(password.clone());
        }
        if self.implicit {
            options.tls.implicit = true;
        }
        if let Some(level) = &self.log_level {
            options.logging.level = level.clone();
        }
        if let Some(command) = &self.command {
            command.apply(options);
        }
    }
}

impl Command {
    fn apply(&self, options: &mut Options) {
        match self {
            Command::SystemIo { root } => {
                options.backend = BackendKind::SystemIo;
                if let Some(root) = root {
                    options.system_io.root = Some(root.clone());
                }
            }
            Command::Unix => options.backend = BackendKind::Unix,
            Command::InMemory { keep_anonymous } => {
                options.backend = BackendKind::InMemory;
                if *keep_anonymous {
                    options.in_memory.keep_anonymous = true;
                }
            }
            Command::GoogleDrive {
                mode: GoogleDriveCommand::User {
                    client_secrets,
                    username,
                    refresh,
                },
            } => {
                options.backend = BackendKind::GoogleDriveUser;
                let user = &mut options.google_drive.user;
                user.client_secrets = Some(client_secrets.clone());
                user.user_name = Some(username.clone());
                user.refresh |= *refresh;
            }
            Command::GoogleDrive {
                mode: GoogleDriveCommand::Service {
                    credential_file,
                    background_upload,
                },
            } => {
                options.backend = BackendKind::GoogleDriveService;
                let service = &mut options.google_drive.service;
                service.credential_file = Some(credential_file.clone());
                service.background_upload |= *background_upload;
            }
        }
    }
}
