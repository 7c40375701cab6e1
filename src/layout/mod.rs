//! Directory layout subsystem.
//!
//! # Data Flow
//! ```text
//! authenticated Account
//!     → AccountDirectoryQuery (chosen once from LayoutMode)
//!     → AccountDirectories { root, home }
//!     → carried on FtpUser, applied by every storage adapter
//! ```
//!
//! # Design Decisions
//! - Layout is independent of the storage backend; every combination is accepted
//! - Roots are relative to the backend root and never contain `..`
//! - Home directories are relative to the account root

pub mod passwd;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::user::{Account, AccountKind};
use crate::layout::passwd::{SystemUserDatabase, UserDatabase};

/// Prefix below which anonymous sessions are rooted in the root-per-user layout.
pub const ANONYMOUS_ROOT: &str = "anonymous";

/// How an authenticated account is mapped onto the backend's directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutMode {
    /// All accounts share the backend root.
    #[default]
    #[value(alias = "default")]
    #[serde(alias = "default")]
    SingleRoot,
    /// Every account gets its own root named after the account.
    RootPerUser,
    /// Sessions start in the account's home directory.
    PamHome,
    /// The account's home directory becomes the session root.
    PamHomeChroot,
}

/// Errors raised while resolving account directories.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("no user database entry for account '{0}'")]
    UnknownUser(String),

    #[error("user database lookup failed for '{name}': {reason}")]
    Lookup { name: String, reason: String },

    #[error("user database lookups are not supported on this platform")]
    Unsupported,
}

/// Directories assigned to an account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountDirectories {
    /// Session root relative to the backend root. Empty means the backend root.
    pub root: PathBuf,
    /// Initial working directory relative to `root`.
    pub home: Option<PathBuf>,
}

impl AccountDirectories {
    fn rooted_at(root: impl AsRef<Path>) -> Self {
        Self {
            root: relative(root),
            home: None,
        }
    }
}

/// Strategy mapping accounts to their directories.
pub trait AccountDirectoryQuery: Send + Sync + std::fmt::Debug {
    fn directories(&self, account: &Account) -> Result<AccountDirectories, LayoutError>;
}

/// Build the query for a layout mode.
pub fn query_for(mode: LayoutMode) -> Arc<dyn AccountDirectoryQuery> {
    let database: Arc<dyn UserDatabase> = Arc::new(SystemUserDatabase);
    match mode {
        LayoutMode::SingleRoot => Arc::new(SingleRootQuery),
        LayoutMode::RootPerUser => Arc::new(RootPerUserQuery),
        LayoutMode::PamHome => Arc::new(PamHomeQuery::new(database, false)),
        LayoutMode::PamHomeChroot => Arc::new(PamHomeQuery::new(database, true)),
    }
}

#[derive(Debug, Default)]
pub struct SingleRootQuery;

impl AccountDirectoryQuery for SingleRootQuery {
    fn directories(&self, _account: &Account) -> Result<AccountDirectories, LayoutError> {
        Ok(AccountDirectories::default())
    }
}

/// One root per account; anonymous sessions are rooted per e-mail.
#[derive(Debug, Default)]
pub struct RootPerUserQuery;

impl AccountDirectoryQuery for RootPerUserQuery {
    fn directories(&self, account: &Account) -> Result<AccountDirectories, LayoutError> {
        let root = match &account.kind {
            AccountKind::Anonymous { email: Some(email) } if !email.is_empty() => {
                Path::new(ANONYMOUS_ROOT).join(email)
            }
            AccountKind::Anonymous { .. } => PathBuf::from(ANONYMOUS_ROOT),
            AccountKind::Custom | AccountKind::Pam { .. } => PathBuf::from(&account.name),
        };
        Ok(AccountDirectories::rooted_at(root))
    }
}

/// Home directory from the user database, optionally used as the root.
#[derive(Debug)]
pub struct PamHomeQuery {
    database: Arc<dyn UserDatabase>,
    chroot: bool,
    anonymous_root: PathBuf,
}

impl PamHomeQuery {
    pub fn new(database: Arc<dyn UserDatabase>, chroot: bool) -> Self {
        Self {
            database,
            chroot,
            anonymous_root: std::env::temp_dir(),
        }
    }

    /// Override where anonymous sessions are rooted.
    pub fn with_anonymous_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.anonymous_root = root.into();
        self
    }
}

impl AccountDirectoryQuery for PamHomeQuery {
    fn directories(&self, account: &Account) -> Result<AccountDirectories, LayoutError> {
        if account.is_anonymous() {
            return Ok(AccountDirectories::rooted_at(&self.anonymous_root));
        }

        let home = self
            .database
            .home_directory(&account.name)?
            .ok_or_else(|| LayoutError::UnknownUser(account.name.clone()))?;

        if self.chroot {
            Ok(AccountDirectories::rooted_at(home))
        } else {
            Ok(AccountDirectories {
                root: PathBuf::new(),
                home: Some(relative(home)),
            })
        }
    }
}

/// Drop root, prefix, `.` and `..` components so the result can be joined safely.
pub fn relative(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref()
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}
