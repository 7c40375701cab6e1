//! Session user type handed to libunftp.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use libunftp::auth::UserDetail;

use crate::layout::AccountDirectories;

/// How an account was authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountKind {
    Anonymous { email: Option<String> },
    Custom,
    Pam { uid: Option<u32>, gid: Option<u32> },
}

/// Identity produced by a membership provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub kind: AccountKind,
}

impl Account {
    pub fn is_anonymous(&self) -> bool {
        matches!(self.kind, AccountKind::Anonymous { .. })
    }
}

/// An authenticated FTP session user with its resolved directories.
#[derive(Debug, Clone)]
pub struct FtpUser {
    pub account: Account,
    /// Session root relative to the backend root.
    pub root: PathBuf,
    /// Initial directory as an absolute session path (below `root`).
    pub home: Option<PathBuf>,
}

impl FtpUser {
    pub fn new(account: Account, directories: AccountDirectories) -> Self {
        Self {
            account,
            root: directories.root,
            home: directories.home.map(|home| Path::new("/").join(home)),
        }
    }

    pub fn name(&self) -> &str {
        &self.account.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.account.is_anonymous()
    }
}

impl UserDetail for FtpUser {
    fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }
}

impl Display for FtpUser {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.account.kind {
            AccountKind::Anonymous { email: Some(email) } => write!(f, "anonymous({})", email),
            AccountKind::Anonymous { email: None } => write!(f, "anonymous"),
            _ => write!(f, "{}", self.account.name),
        }
    }
}
