//! The path-based operation set a mount collaborator drives.
//!
//! No inodes and no handles: every call names a path and, for content,
//! an explicit offset and size. Implementations that buffer content (like
//! [`RowFs`](crate::RowFs)) open, work and close inside each call.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::VfsResult;
use super::types::{DirEntry, FileAttr, SetAttr, StatFs};

/// Filesystem operations, routed by [`MountTable`](super::MountTable).
///
/// Paths are relative to the filesystem's own root.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // Namespace

    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Immediate children, sorted by name.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    async fn statfs(&self) -> VfsResult<StatFs>;

    fn read_only(&self) -> bool;

    // Content

    /// Up to `size` bytes from `offset`; short at end of file.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    /// Returns the byte count written.
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32>;

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    /// Apply the requested attribute changes and return the result.
    async fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr>;

    // Structure. Row filesystems answer all of these with
    // `UnsupportedOperation`.

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    async fn unlink(&self, path: &Path) -> VfsResult<()>;

    async fn rmdir(&self, path: &Path) -> VfsResult<()>;

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf>;

    /// Symlink at `path` whose target is `target`.
    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr>;

    /// Hard link at `newpath` to `oldpath`.
    async fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr>;

    // Provided

    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Whole content, sized by `getattr`.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let size = self.getattr(path).await?.size;
        self.read(path, 0, u32::try_from(size).unwrap_or(u32::MAX)).await
    }

    /// Truncate, then write from offset 0. That costs two commits on a
    /// buffering backend; override to replace content in one.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        self.truncate(path, 0).await?;
        self.write(path, 0, data).await.map(|_| ())
    }
}
