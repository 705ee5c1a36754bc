//! The row-backed filesystem facade.
//!
//! [`RowFs`] composes the path index, the row accessor and file handles into
//! the capability set a filesystem consumer expects: stat, list, open file,
//! open directory. Everything that would create, delete or move a row is
//! rejected with `UnsupportedOperation` before any statement runs.
//!
//! The index is cached. It is built on construction and rebuilt by
//! [`RowFs::refresh`], or lazily once it is older than the configured
//! max age. A rebuild never mutates the live index: the new snapshot is built
//! off to the side and swapped in, so concurrent readers see either the old
//! or the new listing in full.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::db::Session;
use crate::handle::{FileHandle, OpenFiles};
use crate::index::{PathIndex, normalize};
use crate::rows::RowAccessor;
use crate::schema::{ListingSchema, QueryTemplates};
use crate::vfs::{DirEntry, FileAttr, OpenFlags, SetAttr, StatFs, VfsError, VfsOps, VfsResult};

/// Filesystem exposing the rows of one listing as files.
pub struct RowFs {
    session: Arc<dyn Session>,
    templates: QueryTemplates,
    schema: ListingSchema,
    rows: Arc<RowAccessor>,
    index: RwLock<Arc<PathIndex>>,
    open_files: Arc<OpenFiles>,
    max_age: Option<Duration>,
}

impl fmt::Debug for RowFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowFs")
            .field("templates", &self.templates)
            .field("max_age", &self.max_age)
            .field("open_handles", &self.open_files.len())
            .finish_non_exhaustive()
    }
}

impl RowFs {
    /// Validate the templates against the session and build the first index.
    pub fn new(session: Arc<dyn Session>, templates: QueryTemplates) -> VfsResult<Self> {
        let schema = templates.validate(session.as_ref())?;
        let rows = Arc::new(RowAccessor::new(Arc::clone(&session), &templates));
        let fs = Self {
            session,
            templates,
            schema,
            rows,
            index: RwLock::new(Arc::new(PathIndex::empty())),
            open_files: Arc::new(OpenFiles::new()),
            max_age: None,
        };
        fs.refresh()?;
        Ok(fs)
    }

    /// Re-list automatically when the index is older than `max_age`.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn templates(&self) -> &QueryTemplates {
        &self.templates
    }

    /// Run the listing statement and swap in a fresh index.
    ///
    /// On failure the previous index stays live.
    pub fn refresh(&self) -> VfsResult<()> {
        let result = self.session.query(&self.templates.listing, &[])?;
        let index = PathIndex::from_rows(&result, &self.schema)?;
        info!(
            files = index.file_count(),
            directories = index.directory_count(),
            "path index refreshed"
        );
        *self.index.write() = Arc::new(index);
        Ok(())
    }

    /// Current index snapshot, refreshed first if it has gone stale.
    pub fn index(&self) -> VfsResult<Arc<PathIndex>> {
        let current = Arc::clone(&self.index.read());
        match self.max_age {
            Some(max_age) if current.age() > max_age => {
                debug!(age = ?current.age(), "path index stale");
                self.refresh()?;
                Ok(Arc::clone(&self.index.read()))
            }
            _ => Ok(current),
        }
    }

    /// Attributes of a file or directory. Files with an open handle report
    /// the handle's buffer size.
    pub fn stat(&self, path: &str) -> VfsResult<FileAttr> {
        let entry = self.index()?.lookup(path)?;
        let mut attr = entry.attr();
        if let Some(size) = self.open_files.size_of(&entry.path) {
            attr.size = size;
        }
        Ok(attr)
    }

    /// Immediate children of a directory, sorted by name.
    pub fn list_directory(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        self.index()?.child_entries(path)
    }

    /// Iterator over a directory's children, taken from one index snapshot.
    pub fn open_directory(&self, path: &str) -> VfsResult<DirIter> {
        let entries = self.list_directory(path)?;
        Ok(DirIter {
            path: normalize(path),
            entries: entries.into_iter(),
        })
    }

    /// Open a row-backed file.
    ///
    /// Flags that would bring a file into existence are refused: `exclusive`
    /// always, `create` only when the path is missing.
    pub fn open_file(&self, path: &str, flags: OpenFlags) -> VfsResult<FileHandle> {
        if flags.exclusive {
            return Err(VfsError::unsupported("create", normalize(path)));
        }
        let entry = match self.index()?.lookup(path) {
            Ok(entry) => entry,
            Err(VfsError::NotFound(p)) if flags.creates() => {
                return Err(VfsError::unsupported("create", p));
            }
            Err(e) => return Err(e),
        };
        if entry.is_directory() {
            return Err(VfsError::is_a_directory(entry.path));
        }
        FileHandle::open(
            &entry,
            flags,
            Arc::clone(&self.rows),
            Arc::clone(&self.open_files),
        )
    }

    /// Number of handles currently open on this filesystem.
    pub fn open_handles(&self) -> usize {
        self.open_files.len()
    }

    // ========================================================================
    // Outside the read/write boundary
    // ========================================================================

    pub fn create_file(&self, path: &str) -> VfsResult<FileHandle> {
        Err(VfsError::unsupported("create", normalize(path)))
    }

    pub fn create_directory(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("mkdir", normalize(path)))
    }

    pub fn remove_file(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("unlink", normalize(path)))
    }

    pub fn remove_directory(&self, path: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("rmdir", normalize(path)))
    }

    pub fn rename(&self, from: &str, _to: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("rename", normalize(from)))
    }

    pub fn set_permissions(&self, path: &str, _perm: u32) -> VfsResult<()> {
        Err(VfsError::unsupported("chmod", normalize(path)))
    }

    pub fn set_owner(&self, path: &str, _uid: u32, _gid: u32) -> VfsResult<()> {
        Err(VfsError::unsupported("chown", normalize(path)))
    }

    pub fn symlink(&self, path: &str, _target: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("symlink", normalize(path)))
    }

    pub fn link(&self, _existing: &str, path: &str) -> VfsResult<()> {
        Err(VfsError::unsupported("link", normalize(path)))
    }
}

/// Directory iterator handed out by [`RowFs::open_directory`].
#[derive(Debug)]
pub struct DirIter {
    path: String,
    entries: std::vec::IntoIter<DirEntry>,
}

impl DirIter {
    /// Normalized path of the directory being iterated.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Iterator for DirIter {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for DirIter {}

fn path_str(path: &Path) -> VfsResult<&str> {
    path.to_str()
        .ok_or_else(|| VfsError::invalid_path(path.display().to_string()))
}

/// Stateless adapter: every read or write opens a handle, does its work and
/// closes it, so each `write`/`truncate` is one write statement.
#[async_trait]
impl VfsOps for RowFs {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.stat(path_str(path)?)
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        self.list_directory(path_str(path)?)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let handle = self.open_file(path_str(path)?, OpenFlags::read())?;
        let data = handle.read_at(offset, size as usize).to_vec();
        handle.close()?;
        Ok(data)
    }

    async fn readlink(&self, path: &Path) -> VfsResult<std::path::PathBuf> {
        Err(VfsError::unsupported("readlink", path_str(path)?))
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let mut handle = self.open_file(path_str(path)?, OpenFlags::write())?;
        let written = handle.write_at(offset, data)?;
        handle.close()?;
        Ok(written as u32)
    }

    async fn create(&self, path: &Path, _mode: u32) -> VfsResult<FileAttr> {
        self.create_file(path_str(path)?).map(|_| FileAttr::file(0))
    }

    async fn mkdir(&self, path: &Path, _mode: u32) -> VfsResult<FileAttr> {
        self.create_directory(path_str(path)?).map(|_| FileAttr::directory())
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.remove_file(path_str(path)?)
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.remove_directory(path_str(path)?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        RowFs::rename(self, path_str(from)?, path_str(to)?)
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let mut handle = self.open_file(path_str(path)?, OpenFlags::write())?;
        handle.truncate(size)?;
        handle.close()
    }

    async fn setattr(&self, path: &Path, attr: SetAttr) -> VfsResult<FileAttr> {
        let path = path_str(path)?;
        if attr.changes_ownership() {
            return Err(VfsError::unsupported("setattr", normalize(path)));
        }
        if let Some(size) = attr.size {
            let mut handle = self.open_file(path, OpenFlags::write())?;
            handle.truncate(size)?;
            handle.close()?;
        }
        if attr.mtime.is_some() {
            debug!(path, "ignoring mtime change, rows carry no timestamps");
        }
        self.stat(path)
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        RowFs::symlink(self, path_str(path)?, path_str(target)?).map(|_| FileAttr::file(0))
    }

    async fn link(&self, oldpath: &Path, newpath: &Path) -> VfsResult<FileAttr> {
        RowFs::link(self, path_str(oldpath)?, path_str(newpath)?).map(|_| FileAttr::file(0))
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn statfs(&self) -> VfsResult<StatFs> {
        let index = self.index()?;
        Ok(StatFs {
            files: index.file_count() as u64,
            directories: index.directory_count() as u64,
            ..StatFs::default()
        })
    }

    /// Full content regardless of the size the listing reported.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let handle = self.open_file(path_str(path)?, OpenFlags::read())?;
        let data = handle.contents().to_vec();
        handle.close()?;
        Ok(data)
    }

    /// Replace content with a single write statement.
    async fn write_all(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let mut handle = self.open_file(path_str(path)?, OpenFlags::truncate())?;
        handle.write_at(0, data)?;
        handle.close()
    }
}
