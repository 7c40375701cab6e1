//! User database lookups for the PAM layouts.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::layout::LayoutError;

/// Source of home directories and ids for system accounts.
pub trait UserDatabase: Send + Sync + std::fmt::Debug {
    fn home_directory(&self, name: &str) -> Result<Option<PathBuf>, LayoutError>;
}

/// The host's passwd database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUserDatabase;

/// A passwd record reduced to what sessions need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub name: String,
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

impl SystemUserDatabase {
    #[cfg(unix)]
    pub fn lookup(&self, name: &str) -> Result<Option<PasswdEntry>, LayoutError> {
        let user = nix::unistd::User::from_name(name).map_err(|e| LayoutError::Lookup {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(user.map(|user| PasswdEntry {
            name: user.name,
            home: user.dir,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }))
    }

    #[cfg(not(unix))]
    pub fn lookup(&self, _name: &str) -> Result<Option<PasswdEntry>, LayoutError> {
        Err(LayoutError::Unsupported)
    }
}

impl UserDatabase for SystemUserDatabase {
    fn home_directory(&self, name: &str) -> Result<Option<PathBuf>, LayoutError> {
        Ok(self.lookup(name)?.map(|entry| entry.home))
    }
}

/// Fixed name → home map.
#[derive(Debug, Default, Clone)]
pub struct StaticUserDatabase {
    homes: HashMap<String, PathBuf>,
}

impl StaticUserDatabase {
    pub fn new<I, N, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            homes: entries
                .into_iter()
                .map(|(name, home)| (name.into(), home.into()))
                .collect(),
        }
    }
}

impl UserDatabase for StaticUserDatabase {
    fn home_directory(&self, name: &str) -> Result<Option<PathBuf>, LayoutError> {
        Ok(self.homes.get(name).cloned())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn root_has_a_record() {
        let entry = SystemUserDatabase.lookup("root").unwrap().expect("root account");
        assert_eq!(entry.uid, 0);
    }

    #[test]
    fn missing_user_is_none() {
        let entry = SystemUserDatabase
            .lookup("no-such-user-for-ftpserver-tests")
            .unwrap();
        assert!(entry.is_none());
    }
}
