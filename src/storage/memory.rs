//! Volatile in-memory filesystem.
//!
//! Files live in an opendal `Memory` operator and transfers go through
//! [`OpendalStorage`]. The operator is an object store, so this adapter adds
//! the directory rules FTP clients expect: a parent must exist, `RMD` needs an
//! empty directory, `RNTO` never overwrites. Modification times are kept next
//! to the operator because the memory service does not record them.
//!
//! libunftp creates one adapter per control connection. The adapter looks up
//! the tree for the session's root in [`MemoryTrees`], so accounts sharing a
//! root see the same files for the life of the process. Anonymous sessions
//! get a private tree that dies with the connection unless anonymous trees
//! are kept.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use libunftp::storage::{Error, ErrorKind, Fileinfo, Metadata, Result, StorageBackend};
use opendal::{services, Operator};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;
use unftp_sbe_opendal::OpendalStorage;

use crate::auth::FtpUser;
use crate::storage::{normalize, FileMeta};

/// One opendal memory store plus the bookkeeping FTP needs on top of it.
#[derive(Debug, Clone)]
struct MemoryTree {
    op: Operator,
    storage: OpendalStorage,
    modified: Arc<DashMap<String, SystemTime>>,
    structure: Arc<Mutex<()>>,
}

impl MemoryTree {
    fn new() -> Result<Self> {
        let op = Operator::new(services::Memory::default())
            .map_err(opendal_error)?
            .finish();
        let modified = DashMap::new();
        modified.insert(Key::root().dir(), SystemTime::now());
        Ok(Self {
            storage: OpendalStorage::new(op.clone()),
            op,
            modified: Arc::new(modified),
            structure: Arc::new(Mutex::new(())),
        })
    }

    fn touch(&self, key: String) {
        self.modified.insert(key, SystemTime::now());
    }

    fn modified(&self, key: &str) -> SystemTime {
        self.modified.get(key).map(|t| *t).unwrap_or(SystemTime::UNIX_EPOCH)
    }

    async fn entry(&self, key: &Key) -> Result<Option<Entry>> {
        if key.is_root() {
            return Ok(Some(Entry::Dir));
        }
        match self.op.stat(key.file()).await {
            Ok(meta) if meta.is_file() => return Ok(Some(Entry::File(meta.content_length()))),
            Ok(_) => {}
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {}
            Err(e) => return Err(opendal_error(e)),
        }
        match self.op.stat(&key.dir()).await {
            Ok(_) => Ok(Some(Entry::Dir)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(opendal_error(e)),
        }
    }

    async fn require_dir(&self, key: &Key) -> Result<()> {
        match self.entry(key).await? {
            Some(Entry::Dir) => Ok(()),
            Some(Entry::File(_)) => Err(Error::new(ErrorKind::PermanentDirectoryNotAvailable, "not a directory")),
            None => Err(not_found()),
        }
    }

    /// Direct children of a directory, without the directory itself.
    async fn children(&self, key: &Key) -> Result<Vec<(String, bool)>> {
        let dir = key.dir();
        let entries = self.op.list(&dir).await.map_err(opendal_error)?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.path() != dir && entry.path() != "/")
            .map(|entry| {
                let is_dir = entry.metadata().is_dir();
                (entry.name().trim_end_matches('/').to_string(), is_dir)
            })
            .collect())
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let data = self.op.read(from).await.map_err(opendal_error)?;
        self.op.write(to, data).await.map_err(opendal_error)?;
        self.op.delete(from).await.map_err(opendal_error)?;
        if let Some((_, time)) = self.modified.remove(from) {
            self.modified.insert(to.to_string(), time);
        }
        Ok(())
    }

    /// Copy every key below `from` to `to`, then drop the source subtree.
    async fn move_dir(&self, from: &Key, to: &Key) -> Result<()> {
        let (source, target) = (from.dir(), to.dir());
        let entries = self
            .op
            .list_with(&source)
            .recursive(true)
            .await
            .map_err(opendal_error)?;

        for entry in &entries {
            let Some(rest) = entry.path().strip_prefix(source.as_str()) else {
                continue;
            };
            let destination = format!("{}{}", target, rest);
            if entry.path().ends_with('/') {
                self.op.create_dir(&destination).await.map_err(opendal_error)?;
            } else {
                let data = self.op.read(entry.path()).await.map_err(opendal_error)?;
                self.op.write(&destination, data).await.map_err(opendal_error)?;
            }
            if let Some(time) = self.modified.get(entry.path()).map(|t| *t) {
                self.modified.insert(destination, time);
            }
        }

        self.op.remove_all(&source).await.map_err(opendal_error)?;
        self.modified.retain(|key, _| !key.starts_with(source.as_str()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    File(u64),
    Dir,
}

/// Object key for a session path: `a/b`, empty for the root.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Key(String);

impl Key {
    fn root() -> Self {
        Key(String::new())
    }

    fn of(path: &Path) -> Self {
        let parts: Vec<String> = normalize(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Key(parts.join("/"))
    }

    fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    fn file(&self) -> &str {
        &self.0
    }

    fn dir(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("{}/", self.0)
        }
    }

    fn parent(&self) -> Key {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Key(parent.to_string()),
            None => Key::root(),
        }
    }

    fn child(&self, name: &str) -> Key {
        if self.is_root() {
            Key(name.to_string())
        } else {
            Key(format!("{}/{}", self.0, name))
        }
    }

    /// True when `self` is `other` or lies below it.
    fn is_within(&self, other: &Key) -> bool {
        other.is_root() || self == other || self.0.starts_with(&other.dir())
    }
}

fn not_found() -> Error {
    Error::new(ErrorKind::PermanentFileNotAvailable, "no such file or directory")
}

fn root_denied() -> Error {
    Error::new(ErrorKind::PermissionDenied, "operation not allowed on the root")
}

fn opendal_error(err: opendal::Error) -> Error {
    let kind = match err.kind() {
        opendal::ErrorKind::NotFound => ErrorKind::PermanentFileNotAvailable,
        opendal::ErrorKind::AlreadyExists => ErrorKind::FileNameNotAllowedError,
        opendal::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        _ if err.is_temporary() => ErrorKind::TransientFileNotAvailable,
        _ => ErrorKind::LocalError,
    };
    Error::new(kind, err)
}

/// Process-wide registry of in-memory trees keyed by session root.
#[derive(Debug, Clone, Default)]
pub struct MemoryTrees {
    trees: Arc<DashMap<PathBuf, MemoryTree>>,
    keep_anonymous: bool,
}

impl MemoryTrees {
    pub fn new(keep_anonymous: bool) -> Self {
        Self {
            trees: Arc::new(DashMap::new()),
            keep_anonymous,
        }
    }

    fn shared(&self, root: &Path) -> Result<MemoryTree> {
        if let Some(tree) = self.trees.get(root) {
            return Ok(tree.clone());
        }
        let tree = MemoryTree::new()?;
        Ok(self.trees.entry(root.to_path_buf()).or_insert(tree).clone())
    }
}

/// One connection's view of the in-memory backend.
#[derive(Debug)]
pub struct InMemoryFilesystem {
    trees: MemoryTrees,
    session_tree: OnceLock<MemoryTree>,
}

impl InMemoryFilesystem {
    pub fn new(trees: MemoryTrees) -> Self {
        Self {
            trees,
            session_tree: OnceLock::new(),
        }
    }

    fn tree(&self, user: &FtpUser) -> Result<MemoryTree> {
        if user.is_anonymous() && !self.trees.keep_anonymous {
            if let Some(tree) = self.session_tree.get() {
                return Ok(tree.clone());
            }
            let tree = MemoryTree::new()?;
            return Ok(self.session_tree.get_or_init(|| tree).clone());
        }
        self.trees.shared(&user.root)
    }
}

#[async_trait]
impl StorageBackend<FtpUser> for InMemoryFilesystem {
    type Metadata = FileMeta;

    fn supported_features(&self) -> u32 {
        libunftp::storage::FEATURE_RESTART
    }

    async fn metadata<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<Self::Metadata> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        match tree.entry(&key).await?.ok_or_else(not_found)? {
            Entry::File(len) => Ok(FileMeta::file(len, tree.modified(key.file()))),
            Entry::Dir => Ok(FileMeta::directory(tree.modified(&key.dir()))),
        }
    }

    async fn list<P: AsRef<Path> + Send + Debug>(
        &self,
        user: &FtpUser,
        path: P,
    ) -> Result<Vec<Fileinfo<PathBuf, Self::Metadata>>> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        tree.require_dir(&key).await?;

        let mut listing = Vec::new();
        for (name, is_dir) in tree.children(&key).await? {
            let child = key.child(&name);
            let metadata = if is_dir {
                FileMeta::directory(tree.modified(&child.dir()))
            } else {
                let len = tree.storage.metadata(user, child.file()).await?.len();
                FileMeta::file(len, tree.modified(child.file()))
            };
            listing.push(Fileinfo {
                path: PathBuf::from(name),
                metadata,
            });
        }
        Ok(listing)
    }

    async fn get<P: AsRef<Path> + Send + Debug>(
        &self,
        user: &FtpUser,
        path: P,
        start_pos: u64,
    ) -> Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        match tree.entry(&key).await? {
            Some(Entry::File(len)) if start_pos >= len => Ok(Box::new(tokio::io::empty())),
            Some(Entry::File(_)) => tree.storage.get(user, key.file(), start_pos).await,
            Some(Entry::Dir) => Err(Error::new(ErrorKind::PermanentFileNotAvailable, "is a directory")),
            None => Err(not_found()),
        }
    }

    async fn put<P: AsRef<Path> + Send + Debug, R: AsyncRead + Send + Sync + Unpin + 'static>(
        &self,
        user: &FtpUser,
        mut input: R,
        path: P,
        start_pos: u64,
    ) -> Result<u64> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        if key.is_root() {
            return Err(root_denied());
        }
        tree.require_dir(&key.parent()).await.map_err(|_| not_found())?;

        let written = match tree.entry(&key).await? {
            Some(Entry::Dir) => return Err(Error::new(ErrorKind::FileNameNotAllowedError, "is a directory")),
            Some(Entry::File(_)) if start_pos > 0 => {
                let mut data = tree.op.read(key.file()).await.map_err(opendal_error)?.to_vec();
                data.truncate(usize::try_from(start_pos).unwrap_or(usize::MAX));
                let mut incoming = Vec::new();
                input
                    .read_to_end(&mut incoming)
                    .await
                    .map_err(|e| Error::new(ErrorKind::TransientFileNotAvailable, e))?;
                data.extend_from_slice(&incoming);
                tree.op.write(key.file(), data).await.map_err(opendal_error)?;
                incoming.len() as u64
            }
            _ => tree.storage.put(user, input, key.file(), 0).await?,
        };

        tree.touch(key.file().to_string());
        tree.touch(key.parent().dir());
        tracing::debug!(user = %user, path = ?path, bytes = written, "Stored in-memory file");
        Ok(written)
    }

    async fn del<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        match tree.entry(&key).await? {
            Some(Entry::File(_)) => {
                tree.storage.del(user, key.file()).await?;
                tree.modified.remove(key.file());
                tree.touch(key.parent().dir());
                Ok(())
            }
            Some(Entry::Dir) => Err(Error::new(ErrorKind::PermanentFileNotAvailable, "is a directory")),
            None => Err(not_found()),
        }
    }

    async fn mkd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        if key.is_root() {
            return Err(root_denied());
        }
        let _guard = tree.structure.lock().await;
        tree.require_dir(&key.parent()).await.map_err(|_| not_found())?;
        if tree.entry(&key).await?.is_some() {
            return Err(Error::new(ErrorKind::FileNameNotAllowedError, "already exists"));
        }

        tree.storage.mkd(user, key.file()).await?;
        tree.touch(key.dir());
        tree.touch(key.parent().dir());
        Ok(())
    }

    async fn rename<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, from: P, to: P) -> Result<()> {
        let tree = self.tree(user)?;
        let (from, to) = (Key::of(from.as_ref()), Key::of(to.as_ref()));
        if from.is_root() || to.is_root() {
            return Err(root_denied());
        }
        if to.is_within(&from) {
            return Err(Error::new(ErrorKind::FileNameNotAllowedError, "cannot move a directory into itself"));
        }

        let _guard = tree.structure.lock().await;
        let source = tree.entry(&from).await?.ok_or_else(not_found)?;
        tree.require_dir(&to.parent()).await.map_err(|_| not_found())?;
        if tree.entry(&to).await?.is_some() {
            return Err(Error::new(ErrorKind::FileNameNotAllowedError, "target already exists"));
        }

        match source {
            Entry::File(_) => tree.move_file(from.file(), to.file()).await?,
            Entry::Dir => tree.move_dir(&from, &to).await?,
        }
        tree.touch(from.parent().dir());
        tree.touch(to.parent().dir());
        tracing::debug!(user = %user, from = %from.0, to = %to.0, "Renamed in-memory entry");
        Ok(())
    }

    async fn rmd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        if key.is_root() {
            return Err(root_denied());
        }
        let _guard = tree.structure.lock().await;
        tree.require_dir(&key).await?;
        if !tree.children(&key).await?.is_empty() {
            return Err(Error::new(ErrorKind::PermanentDirectoryNotEmpty, "directory not empty"));
        }

        tree.storage.rmd(user, key.dir()).await?;
        tree.modified.remove(&key.dir());
        tree.touch(key.parent().dir());
        Ok(())
    }

    async fn cwd<P: AsRef<Path> + Send + Debug>(&self, user: &FtpUser, path: P) -> Result<()> {
        let tree = self.tree(user)?;
        let key = Key::of(path.as_ref());
        tree.storage.cwd(user, key.dir()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Account, AccountKind};
    use crate::layout::AccountDirectories;
    use std::time::Duration;

    fn session(name: &str, anonymous: bool, root: &str) -> FtpUser {
        let kind = if anonymous {
            AccountKind::Anonymous { email: None }
        } else {
            AccountKind::Custom
        };
        FtpUser::new(
            Account {
                name: name.into(),
                kind,
            },
            AccountDirectories {
                root: PathBuf::from(root),
                home: None,
            },
        )
    }

    async fn read(fs: &InMemoryFilesystem, user: &FtpUser, path: &str, start: u64) -> String {
        let mut out = String::new();
        fs.get(user, path, start).await.unwrap().read_to_string(&mut out).await.unwrap();
        out
    }

    #[test]
    fn keys_follow_session_paths() {
        let key = Key::of(Path::new("/a/./b/../c"));
        assert_eq!(key.file(), "a/c");
        assert_eq!(key.dir(), "a/c/");
        assert_eq!(key.parent(), Key("a".into()));
        assert_eq!(Key::of(Path::new("/")).dir(), "/");
        assert!(Key("a/c".into()).is_within(&Key("a".into())));
        assert!(!Key("ab".into()).is_within(&Key("a".into())));
    }

    #[tokio::test]
    async fn files_round_trip_and_append() {
        let fs = InMemoryFilesystem::new(MemoryTrees::new(false));
        let user = session("tester", false, "");

        fs.mkd(&user, "/dir").await.unwrap();
        assert_eq!(fs.put(&user, &b"abcdef"[..], "/dir/f.txt", 0).await.unwrap(), 6);
        fs.put(&user, &b"XY"[..], "/dir/f.txt", 3).await.unwrap();
        assert_eq!(read(&fs, &user, "/dir/f.txt", 0).await, "abcXY");
        assert_eq!(read(&fs, &user, "/dir/f.txt", 3).await, "XY");
        assert_eq!(fs.metadata(&user, "/dir/f.txt").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn trees_are_shared_per_root_across_sessions() {
        let trees = MemoryTrees::new(false);
        let alice = session("alice", false, "alice");
        let bob = session("bob", false, "bob");

        InMemoryFilesystem::new(trees.clone())
            .put(&alice, &b"1"[..], "/a.txt", 0)
            .await
            .unwrap();

        let next_session = InMemoryFilesystem::new(trees.clone());
        assert!(next_session.metadata(&alice, "/a.txt").await.is_ok());
        assert!(next_session.metadata(&bob, "/a.txt").await.is_err());
    }

    #[tokio::test]
    async fn anonymous_trees_are_per_session_unless_kept() {
        let anon = session("anonymous", true, "");

        let trees = MemoryTrees::new(false);
        let first = InMemoryFilesystem::new(trees.clone());
        first.put(&anon, &b"1"[..], "/a.txt", 0).await.unwrap();
        assert!(first.metadata(&anon, "/a.txt").await.is_ok());
        assert!(InMemoryFilesystem::new(trees).metadata(&anon, "/a.txt").await.is_err());

        let kept = MemoryTrees::new(true);
        InMemoryFilesystem::new(kept.clone())
            .put(&anon, &b"1"[..], "/a.txt", 0)
            .await
            .unwrap();
        assert!(InMemoryFilesystem::new(kept).metadata(&anon, "/a.txt").await.is_ok());
    }

    #[tokio::test]
    async fn directory_rules() {
        let fs = InMemoryFilesystem::new(MemoryTrees::default());
        let user = session("tester", false, "");

        fs.mkd(&user, "/d").await.unwrap();
        assert!(fs.mkd(&user, "/d").await.is_err());
        assert!(fs.mkd(&user, "/missing/child").await.is_err());
        assert!(fs.put(&user, &b"x"[..], "/missing/f", 0).await.is_err());
        fs.put(&user, &b"x"[..], "/d/f", 0).await.unwrap();

        assert!(fs.rmd(&user, "/d").await.is_err());
        assert!(fs.del(&user, "/d").await.is_err());
        assert!(fs.rename(&user, "/d", "/d/inner").await.is_err());

        fs.rename(&user, "/d/f", "/g").await.unwrap();
        assert_eq!(fs.list(&user, "/").await.unwrap().len(), 2);
        fs.rmd(&user, "/d").await.unwrap();
        fs.cwd(&user, "/").await.unwrap();
        assert!(fs.cwd(&user, "/g").await.is_err());
        assert!(fs.rmd(&user, "/").await.is_err());
    }

    #[tokio::test]
    async fn listing_reports_sizes_and_kinds() {
        let fs = InMemoryFilesystem::new(MemoryTrees::default());
        let user = session("tester", false, "");

        fs.mkd(&user, "/docs").await.unwrap();
        fs.mkd(&user, "/docs/sub").await.unwrap();
        fs.put(&user, &b"abc"[..], "/docs/a.txt", 0).await.unwrap();

        let mut listing = fs.list(&user, "/docs").await.unwrap();
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].path, PathBuf::from("a.txt"));
        assert_eq!(listing[0].metadata.len(), 3);
        assert!(listing[1].metadata.is_dir());
        assert!(fs.list(&user, "/docs/a.txt").await.is_err());
    }

    #[tokio::test]
    async fn failed_rename_onto_the_root_keeps_the_source() {
        let fs = InMemoryFilesystem::new(MemoryTrees::default());
        let user = session("tester", false, "");
        fs.put(&user, &b"data"[..], "/f", 0).await.unwrap();

        assert!(fs.rename(&user, "/f", "/").await.is_err());
        assert!(fs.rename(&user, "/f", "/..").await.is_err());
        assert!(fs.rename(&user, "/f", "/missing/f").await.is_err());

        assert_eq!(fs.metadata(&user, "/f").await.unwrap().len(), 4);
        assert_eq!(read(&fs, &user, "/f", 0).await, "data");
    }

    #[tokio::test]
    async fn directories_move_with_their_contents() {
        let fs = InMemoryFilesystem::new(MemoryTrees::default());
        let user = session("tester", false, "");
        fs.mkd(&user, "/a").await.unwrap();
        fs.mkd(&user, "/a/b").await.unwrap();
        fs.put(&user, &b"deep"[..], "/a/b/f", 0).await.unwrap();
        fs.mkd(&user, "/ab").await.unwrap();

        fs.rename(&user, "/a", "/z").await.unwrap();

        assert!(fs.metadata(&user, "/a").await.is_err());
        assert!(fs.metadata(&user, "/ab").await.unwrap().is_dir());
        assert!(fs.metadata(&user, "/z/b").await.unwrap().is_dir());
        assert_eq!(read(&fs, &user, "/z/b/f", 0).await, "deep");
    }

    #[tokio::test]
    async fn failed_changes_leave_the_parent_time_alone() {
        let fs = InMemoryFilesystem::new(MemoryTrees::default());
        let user = session("tester", false, "");
        fs.mkd(&user, "/d").await.unwrap();
        fs.put(&user, &b"x"[..], "/d/f", 0).await.unwrap();
        let root_before = fs.metadata(&user, "/").await.unwrap().modified().unwrap();
        let dir_before = fs.metadata(&user, "/d").await.unwrap().modified().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fs.mkd(&user, "/d").await.is_err());
        assert!(fs.rmd(&user, "/d").await.is_err());
        assert!(fs.mkd(&user, "/d/f").await.is_err());
        assert!(fs.del(&user, "/d/missing").await.is_err());

        assert_eq!(fs.metadata(&user, "/").await.unwrap().modified().unwrap(), root_before);
        assert_eq!(fs.metadata(&user, "/d").await.unwrap().modified().unwrap(), dir_before);

        fs.mkd(&user, "/e").await.unwrap();
        assert!(fs.metadata(&user, "/").await.unwrap().modified().unwrap() > root_before);
    }
}
