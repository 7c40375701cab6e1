//! Local filesystem adapter used by the `system-io` and `unix` backends.
//!
//! Transfers run on `unftp_sbe_fs::Filesystem`, opened once per session at
//! the account's layout root so cap-std keeps every access below it.

use std::fmt::Debug;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use libunftp::storage::{Error, ErrorKind, Fileinfo, Metadata, Result, StorageBackend};
use tokio::io::AsyncRead;
use tokio::sync::OnceCell;
use unftp_sbe_fs::Filesystem;

use crate::auth::FtpUser;
use crate::storage::{io_error, normalize, FileMeta};

/// One connection's view of a local directory tree.
#[derive(Debug)]
pub struct LocalFilesystem {
    root: PathBuf,
    report_owner: bool,
    session: OnceCell<Filesystem>,
}

impl LocalFilesystem {
    /// Portable variant: ownership is reported as 0/0.
    pub fn system_io(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            report_owner: false,
            session: OnceCell::new(),
        }
    }

    /// POSIX variant: reports owner uid/gid and link counts.
    pub fn unix(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            report_owner: true,
            session: OnceCell::new(),
        }
    }

    /// Fresh adapter for a new connection.
    pub fn session(&self) -> Self {
        Self {
            root: self.root.clone(),
            report_owner: self.report_owner,
            session: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self, user: &FtpUser) -> std::io::Result<Filesystem> {
        let dir = self.root.join(normalize(&user.root));
        std::fs::create_dir_all(&dir)?;
        tracing::debug!(user = %user, root = %dir.display(), "Session root ready");
        Filesystem::new(dir)
    }

    /// The session's filesystem, opened at the layout root on first use.
    async fn inner(&self, user: &FtpUser) -> Result<&Filesystem> {
        self.session
            .get_or_try_init(|| async { self.open(user).map_err(io_error) })
            .await
    }

    fn meta(&self, metadata: &impl Metadata) -> FileMeta {
        let modified = metadata.modified().unwrap_or(std::time::UNIX_EPOCH);
        let mut meta = if metadata.is_dir() {
            FileMeta::directory(modified)
        } else {
            FileMeta::file(metadata.len(), modified)
        };
        if self.report_owner {
            meta.uid = metadata.uid();
            meta.gid = metadata.gid();
            meta.links = metadata.links();
        }
        meta
    }
}

/// Session path with `.` and `..` resolved, rooted at `/`.
fn jailed(path: &Path) -> PathBuf {
    Path::new("/").join(normalize(path))
}

#[async_trait]
impl StorageBackend<FtpUser> for LocalFilesystem {
    type Metadata = FileMeta;

    fn enter(&mut self, user: &FtpUser) -> std::io::Result<()> {
        self.session = OnceCell::new_with(Some(self.open(user)?));
        Ok(())
    }

    fn supported_features(&self) -> u32 {
        libunftp::storage::FEATURE_RESTART | libunftp::storage::FEATURE_SITEMD5
    }

    async fn metadata<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<Self::Metadata> {
        let fs = self.inner(user).await?;
        let metadata = fs.metadata(user, jailed(path.as_ref())).await?;
        Ok(self.meta(&metadata))
    }

    async fn list<P: AsRef<Path> + Send + Debug>(
        &self,
        user: &FtpUser,
        path: P,
    ) -> Result<Vec<Fileinfo<PathBuf, Self::Metadata>>> {
        let fs = self.inner(user).await?;
        let listing: Vec<_> = fs
            .list(user, jailed(path.as_ref()))
            .await?
            .into_iter()
            .map(|info| Fileinfo {
                metadata: self.meta(&info.metadata),
                path: info.path,
            })
            .collect();
        tracing::trace!(path = ?path, entries = listing.len(), "Listed local directory");
        Ok(listing)
    }

    async fn get<P: AsRef<Path> + Send + Debug>(
        &self,
        user: &FtpUser,
        path: P,
        start_pos: u64,
    ) -> Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        let fs = self.inner(user).await?;
        fs.get(user, jailed(path.as_ref()), start_pos).await
    }

    async fn put<P: AsRef<Path> + Send + Debug, R: AsyncRead + Send + Sync + Unpin + 'static>(
        &self,
        user: &FtpUser,
        input: R,
        path: P,
        start_pos: u64,
    ) -> Result<u64> {
        let fs = self.inner(user).await?;
        let written = fs.put(user, input, jailed(path.as_ref()), start_pos).await?;
        tracing::debug!(user = %user, path = ?path, bytes = written, "Stored file");
        Ok(written)
    }

    async fn del<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let fs = self.inner(user).await?;
        fs.del(user, jailed(path.as_ref())).await
    }

    async fn mkd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let fs = self.inner(user).await?;
        fs.mkd(user, jailed(path.as_ref())).await
    }

    async fn rename<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, from: P, to: P) -> Result<()> {
        let fs = self.inner(user).await?;
        let (from, to) = (jailed(from.as_ref()), jailed(to.as_ref()));
        if fs.metadata(user, &to).await.is_ok() {
            return Err(Error::new(ErrorKind::FileNameNotAllowedError, "target already exists"));
        }
        fs.rename(user, &from, &to).await
    }

    async fn rmd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let path = jailed(path.as_ref());
        if path == Path::new("/") {
            return Err(Error::new(ErrorKind::PermissionDenied, "cannot remove the session root"));
        }
        let fs = self.inner(user).await?;
        fs.rmd(user, path).await
    }

    async fn cwd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let fs = self.inner(user).await?;
        let metadata = fs.metadata(user, jailed(path.as_ref())).await?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::PermanentDirectoryNotAvailable, "not a directory"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Account, AccountKind};
    use crate::layout::AccountDirectories;
    use tokio::io::AsyncReadExt;

    fn user(root: &str) -> FtpUser {
        FtpUser::new(
            Account {
                name: "tester".into(),
                kind: AccountKind::Custom,
            },
            AccountDirectories {
                root: PathBuf::from(root),
                home: None,
            },
        )
    }

    async fn read_all(mut reader: Box<dyn AsyncRead + Send + Sync + Unpin>) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn put_get_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::system_io(dir.path());
        let user = user("");

        let written = fs.put(&user, &b"hello world"[..], "/greeting.txt", 0).await.unwrap();
        assert_eq!(written, 11);
        assert_eq!(read_all(fs.get(&user, "/greeting.txt", 6).await.unwrap()).await, "world");

        fs.put(&user, &b"there"[..], "/greeting.txt", 6).await.unwrap();
        assert_eq!(read_all(fs.get(&user, "greeting.txt", 0).await.unwrap()).await, "hello there");
    }

    #[tokio::test]
    async fn sessions_cannot_escape_their_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tester")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "top").unwrap();
        let fs = LocalFilesystem::system_io(dir.path());
        let user = user("tester");

        assert!(fs.get(&user, "/../secret.txt", 0).await.is_err());
        fs.put(&user, &b"x"[..], "/../../escaped.txt", 0).await.unwrap();
        assert!(dir.path().join("tester/escaped.txt").exists());
        assert!(fs.rmd(&user, "/..").await.is_err());
    }

    #[tokio::test]
    async fn layout_root_is_created_on_login() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = LocalFilesystem::system_io(dir.path()).session();

        fs.enter(&user("alice")).unwrap();
        assert!(dir.path().join("alice").is_dir());
        fs.cwd(&user("alice"), "/").await.unwrap();
    }

    #[tokio::test]
    async fn directory_operations() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem::system_io(dir.path());
        let user = user("");

        fs.mkd(&user, "/docs").await.unwrap();
        fs.cwd(&user, "/docs").await.unwrap();
        fs.put(&user, &b"abc"[..], "/docs/a.txt", 0).await.unwrap();
        fs.put(&user, &b"z"[..], "/docs/c.txt", 0).await.unwrap();
        assert!(fs.rename(&user, "/docs/a.txt", "/docs/c.txt").await.is_err());
        fs.rename(&user, "/docs/a.txt", "/docs/b.txt").await.unwrap();
        fs.del(&user, "/docs/c.txt").await.unwrap();

        let listing = fs.list(&user, "/docs").await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].path, PathBuf::from("b.txt"));
        assert_eq!(listing[0].metadata.len(), 3);

        assert!(fs.cwd(&user, "/docs/b.txt").await.is_err());
        assert!(fs.rmd(&user, "/docs").await.is_err());
        fs.del(&user, "/docs/b.txt").await.unwrap();
        fs.rmd(&user, "/docs").await.unwrap();
        assert!(fs.metadata(&user, "/docs").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_variant_reports_owner() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f"), "x").unwrap();
        let expected = std::fs::metadata(dir.path().join("f")).unwrap().uid();

        let meta = LocalFilesystem::unix(dir.path()).metadata(&user(""), "/f").await.unwrap();
        assert_eq!(meta.uid(), expected);
        let meta = LocalFilesystem::system_io(dir.path()).metadata(&user(""), "/f").await.unwrap();
        assert_eq!(meta.uid(), 0);
    }
}
