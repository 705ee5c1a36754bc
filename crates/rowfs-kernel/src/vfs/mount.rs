//! Mount table with longest-prefix routing.
//!
//! Several row filesystems, typically one per table/column pair, can be
//! attached under one namespace, e.g. `/uploads`, `/att`, `/testscript`.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::error::{VfsError, VfsResult};
use super::ops::VfsOps;
use super::types::{DirEntry, FileAttr, SetAttr, StatFs};

/// Information about a mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// The mount path (e.g., "/uploads").
    pub path: String,
    /// Whether this mount is read-only.
    pub read_only: bool,
}

/// Routes filesystem operations to mounted filesystems.
///
/// Mount points are kept as `/`-prefixed strings without a trailing slash.
/// `/` itself may be mounted and then catches everything not claimed by a
/// longer prefix.
pub struct MountTable {
    mounts: RwLock<BTreeMap<String, Arc<dyn VfsOps>>>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &"<locked>")
            .finish()
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

/// `/`-prefixed, no trailing slash, `.`/`..` resolved.
fn absolute(path: &Path) -> String {
    format!("/{}", crate::index::normalize(&path.to_string_lossy()))
}

/// Path below `mount`, or `None` if `path` is not under it.
fn strip_mount<'a>(path: &'a str, mount: &str) -> Option<&'a str> {
    if mount == "/" {
        return Some(path.trim_start_matches('/'));
    }
    match path.strip_prefix(mount)? {
        "" => Some(""),
        rest => rest.strip_prefix('/'),
    }
}

impl MountTable {
    pub fn new() -> Self {
        Self {
            mounts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Mount a filesystem at `path`, replacing any existing mount there.
    pub async fn mount(&self, path: impl AsRef<Path>, fs: impl VfsOps + 'static) {
        self.mount_arc(path, Arc::new(fs)).await;
    }

    /// Mount a filesystem (already wrapped in Arc) at `path`.
    pub async fn mount_arc(&self, path: impl AsRef<Path>, fs: Arc<dyn VfsOps>) {
        let path = absolute(path.as_ref());
        info!(mount = %path, "mounted filesystem");
        self.mounts.write().await.insert(path, fs);
    }

    /// Returns `true` if a mount was removed.
    pub async fn unmount(&self, path: impl AsRef<Path>) -> bool {
        let path = absolute(path.as_ref());
        self.mounts.write().await.remove(&path).is_some()
    }

    /// All current mounts, sorted by path.
    pub async fn list_mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .read()
            .await
            .iter()
            .map(|(path, fs)| MountInfo {
                path: path.clone(),
                read_only: fs.read_only(),
            })
            .collect()
    }

    /// Find the filesystem for `path` and the path relative to its mount.
    async fn route(&self, path: &Path) -> VfsResult<(Arc<dyn VfsOps>, PathBuf)> {
        let path = absolute(path);
        let mounts = self.mounts.read().await;
        mounts
            .iter()
            .filter_map(|(mount, fs)| strip_mount(&path, mount).map(|rest| (mount, fs, rest)))
            .max_by_key(|(mount, _, _)| mount.len())
            .map(|(_, fs, rest)| (Arc::clone(fs), PathBuf::from(rest)))
            .ok_or_else(|| VfsError::no_mount_point(path.clone()))
    }

    /// Names of mount-point components directly below `dir` (absolute).
    async fn synthesized_children(&self, dir: &str) -> BTreeSet<String> {
        let mounts = self.mounts.read().await;
        mounts
            .keys()
            .filter(|mount| mount.as_str() != dir)
            .filter_map(|mount| strip_mount(mount, dir))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    }

    /// True if `dir` is a mount point or an ancestor of one.
    async fn is_mount_prefix(&self, dir: &str) -> bool {
        dir == "/"
            || self
                .mounts
                .read()
                .await
                .keys()
                .any(|mount| strip_mount(mount, dir).is_some())
    }

    /// The two paths must live on the same mount.
    async fn route_pair(
        &self,
        a: &Path,
        b: &Path,
    ) -> VfsResult<(Arc<dyn VfsOps>, PathBuf, PathBuf)> {
        let (a_fs, a_rel) = self.route(a).await?;
        let (b_fs, b_rel) = self.route(b).await?;
        if !Arc::ptr_eq(&a_fs, &b_fs) {
            return Err(VfsError::CrossDeviceLink);
        }
        Ok((a_fs, a_rel, b_rel))
    }
}

#[async_trait]
impl VfsOps for MountTable {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let mount_prefix = self.is_mount_prefix(&absolute(path)).await;
        let result = match self.route(path).await {
            Ok((fs, relative)) => fs.getattr(&relative).await,
            Err(e) => Err(e),
        };
        match result {
            Err(VfsError::NotFound(_) | VfsError::NoMountPoint(_)) if mount_prefix => {
                Ok(FileAttr::directory())
            }
            other => other,
        }
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let dir = absolute(path);
        let synthesized = self.synthesized_children(&dir).await;

        let mut entries = match self.route(path).await {
            Ok((fs, relative)) => match fs.readdir(&relative).await {
                Ok(entries) => entries,
                Err(VfsError::NotFound(_) | VfsError::NoMountPoint(_))
                    if !synthesized.is_empty() =>
                {
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
            Err(VfsError::NoMountPoint(_)) if !synthesized.is_empty() || dir == "/" => {
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        // Mount points shadow same-named entries of the parent filesystem.
        entries.retain(|e| !synthesized.contains(&e.name));
        entries.extend(synthesized.into_iter().map(DirEntry::directory));
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let (fs, relative) = self.route(path).await?;
        fs.read(&relative, offset, size).await
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let (fs, relative) = self.route(path).await?;
        fs.readlink(&relative).await
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let (fs, relative) = self.route(path).await?;
        fs.write(&relative, offset, data).await
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let (fs, relative) = self.route(path).await?;
        fs.create(&relative, mode).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let (fs, relative) = self.route(path).await?;
        fs.mkdir(&relative, mode).await
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        let (fs, relative) = self.route(path).await?;
        fs.unlink(&relative).await
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        let (fs, relative) = self.route(path).await?;
        fs.rmdir(&relative).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let (fs, from, to) = self.route_pair(from, to).await?;
        fs.rename(&from, &to).await
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let (fs, relative) = self.route(path).await?;
        fs.truncate(&relative, size).await
    }

    async fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr> {
        let (fs, relative) = self.route(path).await?;
        fs.setattr(&relative, attr).await
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        let (fs, relative) = self.route(path).await?;
        fs.symlink(&relative, target).await
    }

    async fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr> {
        let (fs, old, new) = self.route_pair(oldpath, newpath).await?;
        fs.link(&old, &new).await
    }

    fn read_only(&self) -> bool {
        false
    }

    /// Totals across every mount.
    async fn statfs(&self) -> VfsResult<StatFs> {
        let mounts: Vec<_> = self.mounts.read().await.values().cloned().collect();
        let mut total = StatFs::default();
        for fs in mounts {
            let stats = fs.statfs().await?;
            total.files += stats.files;
            total.directories += stats.directories;
        }
        Ok(total)
    }

    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let (fs, relative) = self.route(path).await?;
        fs.read_all(&relative).await
    }

    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let (fs, relative) = self.route(path).await?;
        fs.write_all(&relative, data).await
    }
}
