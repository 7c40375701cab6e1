//! Storage adapters behind libunftp.
//!
//! # Data Flow
//! ```text
//! FTP command path (absolute or relative to the session cwd)
//!     → normalize()      (drop `.`, clamp `..` at the session root)
//!     → FtpUser.root     (layout-assigned subtree of the backend)
//!     → adapter          (unftp-sbe-fs, opendal memory, Google Drive)
//! ```
//!
//! # Design Decisions
//! - Paths are resolved purely lexically; a session can never name a
//!   location above its root
//! - Every adapter reports the same metadata type
//! - Adapter failures are mapped onto libunftp's error kinds

pub mod gdrive;
pub mod local;
pub mod memory;

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use libunftp::storage::{Error, ErrorKind, Metadata, Result};

pub use gdrive::GoogleDriveFilesystem;
pub use local::LocalFilesystem;
pub use memory::{InMemoryFilesystem, MemoryTrees};

/// Metadata shared by all adapters.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub len: u64,
    pub dir: bool,
    pub modified: SystemTime,
    pub uid: u32,
    pub gid: u32,
    pub links: u64,
}

impl FileMeta {
    pub fn file(len: u64, modified: SystemTime) -> Self {
        Self {
            len,
            dir: false,
            modified,
            uid: 0,
            gid: 0,
            links: 1,
        }
    }

    pub fn directory(modified: SystemTime) -> Self {
        Self {
            len: 0,
            dir: true,
            modified,
            uid: 0,
            gid: 0,
            links: 1,
        }
    }
}

impl Metadata for FileMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn is_dir(&self) -> bool {
        self.dir
    }

    fn is_file(&self) -> bool {
        !self.dir
    }

    fn is_symlink(&self) -> bool {
        false
    }

    fn modified(&self) -> Result<SystemTime> {
        Ok(self.modified)
    }

    fn gid(&self) -> u32 {
        self.gid
    }

    fn uid(&self) -> u32 {
        self.uid
    }

    fn links(&self) -> u64 {
        self.links
    }
}

/// Lexically normalize a session path into relative components.
///
/// `..` above the top is clamped, so `/../../etc` becomes `etc`.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.iter().collect()
}

/// Map I/O failures onto FTP reply categories.
pub fn io_error(err: io::Error) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::PermanentFileNotAvailable,
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        io::ErrorKind::AlreadyExists | io::ErrorKind::InvalidInput => ErrorKind::FileNameNotAllowedError,
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            ErrorKind::TransientFileNotAvailable
        }
        _ => ErrorKind::LocalError,
    };
    Error::new(kind, err)
}
