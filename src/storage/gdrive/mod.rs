//! Google Drive storage adapter.
//!
//! # Data Flow
//! ```text
//! FTP path → session root folder (layout root, created on first use)
//!          → name lookups per component (Drive has ids, not paths)
//!          → DriveClient REST call with a bearer token from the TokenSource
//! ```
//!
//! # Design Decisions
//! - Partial writes (REST/APPE) are refused; Drive only replaces whole files
//! - Background uploads buffer the transfer and acknowledge it before the
//!   Drive request finishes; failures are only logged. The uploads are
//!   tracked so the host can wait for them on stop

pub mod client;

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use libunftp::storage::{Error, ErrorKind, Fileinfo, Result, StorageBackend};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;
use tokio_util::task::TaskTracker;

use crate::auth::FtpUser;
use crate::storage::{normalize, FileMeta};

pub use client::{DriveClient, DriveError, DriveFile};

impl From<DriveError> for Error {
    fn from(err: DriveError) -> Self {
        let kind = match err.status() {
            Some(404) => ErrorKind::PermanentFileNotAvailable,
            Some(401) | Some(403) => ErrorKind::PermissionDenied,
            Some(429) | Some(500..=599) => ErrorKind::TransientFileNotAvailable,
            _ => ErrorKind::LocalError,
        };
        Error::new(kind, err)
    }
}

fn not_found() -> Error {
    Error::new(ErrorKind::PermanentFileNotAvailable, "no such file or directory")
}

fn names(path: &Path) -> Vec<String> {
    normalize(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect()
}

/// One connection's view of a Drive.
#[derive(Debug)]
pub struct GoogleDriveFilesystem {
    client: DriveClient,
    root_folder: String,
    background_upload: bool,
    uploads: TaskTracker,
    session_root: OnceCell<String>,
}

impl GoogleDriveFilesystem {
    pub fn new(client: DriveClient, root_folder: impl Into<String>, background_upload: bool) -> Self {
        Self {
            client,
            root_folder: root_folder.into(),
            background_upload,
            uploads: TaskTracker::new(),
            session_root: OnceCell::new(),
        }
    }

    /// Fresh adapter for a new connection sharing the client and upload tracker.
    pub fn session(&self) -> Self {
        Self {
            client: self.client.clone(),
            root_folder: self.root_folder.clone(),
            background_upload: self.background_upload,
            uploads: self.uploads.clone(),
            session_root: OnceCell::new(),
        }
    }

    /// Background uploads still in flight across all sessions.
    pub fn uploads(&self) -> TaskTracker {
        self.uploads.clone()
    }

    /// Folder id of the session root, creating missing layout folders.
    async fn root_id(&self, user: &FtpUser) -> Result<String> {
        self.session_root
            .get_or_try_init(|| async {
                let mut id = self.root_folder.clone();
                for name in names(&user.root) {
                    id = match self.client.find_child(&id, &name).await? {
                        Some(folder) if folder.is_folder() => folder.id,
                        Some(_) => {
                            return Err(Error::new(
                                ErrorKind::PermanentDirectoryNotAvailable,
                                format!("session root component '{}' is a file", name),
                            ))
                        }
                        None => {
                            tracing::info!(user = %user, folder = %name, "Creating Drive session folder");
                            self.client.create_folder(&id, &name).await?.id
                        }
                    };
                }
                Ok::<_, Error>(id)
            })
            .await
            .cloned()
    }

    async fn resolve(&self, user: &FtpUser, path: &Path) -> Result<DriveFile> {
        let root = self.root_id(user).await?;
        let mut current = self.client.get(&root).await?;
        for name in names(path) {
            if !current.is_folder() {
                return Err(not_found());
            }
            current = self.client.find_child(&current.id, &name).await?.ok_or_else(not_found)?;
        }
        Ok(current)
    }

    /// Parent folder id and final name of `path`.
    async fn resolve_parent(&self, user: &FtpUser, path: &Path) -> Result<(String, String)> {
        let mut parts = names(path);
        let name = parts
            .pop()
            .ok_or_else(|| Error::new(ErrorKind::PermissionDenied, "operation not allowed on the root"))?;
        let parent = self.resolve(user, &parts.iter().collect::<PathBuf>()).await?;
        if !parent.is_folder() {
            return Err(not_found());
        }
        Ok((parent.id, name))
    }
}

#[async_trait]
impl StorageBackend<FtpUser> for GoogleDriveFilesystem {
    type Metadata = FileMeta;

    async fn metadata<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<Self::Metadata> {
        Ok(self.resolve(user, path.as_ref()).await?.meta())
    }

    async fn list<P: AsRef<Path> + Send + Debug>(
        &self,
        user: &FtpUser,
        path: P,
    ) -> Result<Vec<Fileinfo<PathBuf, Self::Metadata>>> {
        let folder = self.resolve(user, path.as_ref()).await?;
        if !folder.is_folder() {
            return Err(Error::new(ErrorKind::PermanentDirectoryNotAvailable, "not a directory"));
        }
        let children = self.client.list_children(&folder.id).await?;
        Ok(children
            .into_iter()
            .map(|file| Fileinfo {
                metadata: file.meta(),
                path: PathBuf::from(file.name),
            })
            .collect())
    }

    async fn get<P: AsRef<Path> + Send + Debug>(
        &self,
        user: &FtpUser,
        path: P,
        start_pos: u64,
    ) -> Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        let file = self.resolve(user, path.as_ref()).await?;
        if file.is_folder() {
            return Err(Error::new(ErrorKind::PermanentFileNotAvailable, "is a directory"));
        }
        Ok(Box::new(self.client.download(&file.id, start_pos).await?))
    }

    async fn put<P: AsRef<Path> + Send + Debug, R: AsyncRead + Send + Sync + Unpin + 'static>(
        &self,
        user: &FtpUser,
        mut input: R,
        path: P,
        start_pos: u64,
    ) -> Result<u64> {
        if start_pos > 0 {
            return Err(Error::new(
                ErrorKind::PermanentFileNotAvailable,
                "partial uploads are not supported by Google Drive",
            ));
        }

        let (parent, name) = self.resolve_parent(user, path.as_ref()).await?;
        let existing = match self.client.find_child(&parent, &name).await? {
            Some(file) if file.is_folder() => {
                return Err(Error::new(ErrorKind::FileNameNotAllowedError, "is a directory"));
            }
            Some(file) => Some(file.id),
            None => None,
        };

        if self.background_upload {
            let mut buffer = Vec::new();
            input
                .read_to_end(&mut buffer)
                .await
                .map_err(|e| Error::new(ErrorKind::TransientFileNotAvailable, e))?;
            let len = buffer.len() as u64;
            let client = self.client.clone();
            let user_name = user.to_string();
            self.uploads.spawn(async move {
                let content = std::io::Cursor::new(buffer);
                match client.upload(&parent, &name, existing.as_deref(), content).await {
                    Ok(file) => tracing::debug!(user = %user_name, file_id = %file.id, "Background upload finished"),
                    Err(e) => tracing::error!(user = %user_name, file = %name, error = %e, "Background upload failed"),
                }
            });
            return Ok(len);
        }

        let file = self.client.upload(&parent, &name, existing.as_deref(), input).await?;
        let len = file.meta().len;
        tracing::debug!(user = %user, path = ?path, bytes = len, "Uploaded file to Drive");
        Ok(len)
    }

    async fn del<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let file = self.resolve(user, path.as_ref()).await?;
        if file.is_folder() {
            return Err(Error::new(ErrorKind::PermanentFileNotAvailable, "is a directory"));
        }
        Ok(self.client.delete(&file.id).await?)
    }

    async fn mkd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let (parent, name) = self.resolve_parent(user, path.as_ref()).await?;
        if self.client.find_child(&parent, &name).await?.is_some() {
            return Err(Error::new(ErrorKind::FileNameNotAllowedError, "already exists"));
        }
        self.client.create_folder(&parent, &name).await?;
        Ok(())
    }

    async fn rename<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, from: P, to: P) -> Result<()> {
        let source = self.resolve(user, from.as_ref()).await?;
        let (from_parent, _) = self.resolve_parent(user, from.as_ref()).await?;
        let (to_parent, to_name) = self.resolve_parent(user, to.as_ref()).await?;
        if self.client.find_child(&to_parent, &to_name).await?.is_some() {
            return Err(Error::new(ErrorKind::FileNameNotAllowedError, "target already exists"));
        }

        let (add, remove) = if from_parent == to_parent {
            (None, None)
        } else {
            (Some(to_parent.as_str()), Some(from_parent.as_str()))
        };
        self.client.update(&source.id, &to_name, add, remove).await?;
        Ok(())
    }

    async fn rmd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        if names(path.as_ref()).is_empty() {
            return Err(Error::new(ErrorKind::PermissionDenied, "cannot remove the session root"));
        }
        let folder = self.resolve(user, path.as_ref()).await?;
        if !folder.is_folder() {
            return Err(Error::new(ErrorKind::PermanentDirectoryNotAvailable, "not a directory"));
        }
        if !self.client.list_children(&folder.id).await?.is_empty() {
            return Err(Error::new(ErrorKind::PermanentDirectoryNotEmpty, "directory not empty"));
        }
        Ok(self.client.delete(&folder.id).await?)
    }

    async fn cwd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        if self.resolve(user, path.as_ref()).await?.is_folder() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::PermanentDirectoryNotAvailable, "not a directory"))
        }
    }
}
