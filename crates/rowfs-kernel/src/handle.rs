//! Virtual file handles.
//!
//! A handle loads the whole row content into memory on open, serves partial
//! reads and writes from that buffer, and writes the buffer back as one
//! complete value when it is flushed or closed while dirty. Handles never
//! share buffers: two dirty handles on the same row both write, and the last
//! one to close wins.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, error, warn};

use crate::db::RowId;
use crate::index::PathEntry;
use crate::rows::RowAccessor;
use crate::vfs::{OpenFlags, VfsError, VfsResult};

/// Largest buffer a handle will grow to: SQLite's default
/// `SQLITE_MAX_LENGTH`, past which the write statement would fail anyway.
pub const MAX_CONTENT_LEN: usize = 1_000_000_000;

/// Buffer state of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Buffer matches what was loaded or last flushed.
    Clean,
    /// Buffer has changes the row does not have yet.
    Dirty,
}

/// Registry of open handles and their live buffer sizes, so `stat` can
/// report the size a reader of an open file would see.
#[derive(Debug, Default)]
pub struct OpenFiles {
    next_id: AtomicU64,
    handles: DashMap<u64, (String, u64)>,
}

impl OpenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, path: &str, size: u64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(id, (path.to_string(), size));
        id
    }

    fn update(&self, id: u64, size: u64) {
        if let Some(mut entry) = self.handles.get_mut(&id) {
            entry.1 = size;
        }
    }

    fn release(&self, id: u64) {
        if self.handles.remove(&id).is_none() {
            warn!(handle = id, "released a handle that was not registered");
        }
    }

    /// Live size of `path` if a handle is open on it. With several handles
    /// open, the most recently opened one is reported.
    pub fn size_of(&self, path: &str) -> Option<u64> {
        self.handles
            .iter()
            .filter(|h| h.value().0 == path)
            .max_by_key(|h| *h.key())
            .map(|h| h.value().1)
    }

    /// Number of handles currently open.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// An open row-backed file.
///
/// `close` consumes the handle. Dropping a handle that is still dirty
/// flushes it and logs any failure.
#[derive(Debug)]
pub struct FileHandle {
    id: u64,
    path: String,
    row_id: RowId,
    flags: OpenFlags,
    buffer: Vec<u8>,
    state: HandleState,
    cursor: u64,
    released: bool,
    rows: Arc<RowAccessor>,
    open_files: Arc<OpenFiles>,
}

impl FileHandle {
    /// Open a handle on a file entry, loading its content.
    pub(crate) fn open(
        entry: &PathEntry,
        flags: OpenFlags,
        rows: Arc<RowAccessor>,
        open_files: Arc<OpenFiles>,
    ) -> VfsResult<Self> {
        let row_id = match (&entry.row_id, entry.is_directory()) {
            (Some(row_id), false) => row_id.clone(),
            _ => return Err(VfsError::is_a_directory(entry.path.as_str())),
        };

        // Always read, even when truncating: a vanished row fails here
        // rather than at close.
        let content = rows.read(&row_id)?;
        let (buffer, state) = if flags.truncate {
            let state = if content.is_empty() {
                HandleState::Clean
            } else {
                HandleState::Dirty
            };
            (Vec::new(), state)
        } else {
            (content, HandleState::Clean)
        };

        let id = open_files.register(&entry.path, buffer.len() as u64);
        debug!(handle = id, path = %entry.path, row = %row_id, ?flags, "opened file");

        Ok(Self {
            id,
            path: entry.path.clone(),
            row_id,
            flags,
            buffer,
            state,
            cursor: 0,
            released: false,
            rows,
            open_files,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn row_id(&self) -> &RowId {
        &self.row_id
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == HandleState::Dirty
    }

    /// Current buffer length.
    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// The whole buffer.
    pub fn contents(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes in `[offset, offset + len)`, clamped to the buffer.
    pub fn read_at(&self, offset: u64, len: usize) -> &[u8] {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.buffer.len());
        let end = start.saturating_add(len).min(self.buffer.len());
        &self.buffer[start..end]
    }

    /// Overwrite or extend the buffer at `offset`. A gap past the current
    /// end is zero-filled. In append mode the offset is ignored and data
    /// lands at the end.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> VfsResult<usize> {
        self.check_writable()?;
        let start = if self.flags.append {
            self.buffer.len()
        } else {
            self.offset_to_index(offset)?
        };
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| self.invalid_offset(offset))?;
        if end > self.buffer.len() {
            self.grow(end, offset)?;
        }
        self.buffer[start..end].copy_from_slice(data);
        self.mark_dirty();
        Ok(data.len())
    }

    /// Resize the buffer, zero-filling when it grows.
    pub fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let new_len = self.offset_to_index(size)?;
        if new_len > self.buffer.len() {
            self.grow(new_len, size)?;
        } else {
            self.buffer.truncate(new_len);
        }
        self.cursor = self.cursor.min(size);
        self.mark_dirty();
        Ok(())
    }

    /// Commit the buffer now if dirty; the handle stays open and clean.
    pub fn flush(&mut self) -> VfsResult<()> {
        self.commit()
    }

    /// Commit the buffer if dirty and release the handle.
    ///
    /// The buffer is released even when the write fails; the failure is
    /// still returned.
    pub fn close(mut self) -> VfsResult<()> {
        let result = self.commit();
        if let Err(e) = &result {
            warn!(path = %self.path, row = %self.row_id, error = %e, "flush on close failed");
        }
        self.release();
        result
    }

    fn commit(&mut self) -> VfsResult<()> {
        if self.state == HandleState::Clean {
            debug!(path = %self.path, "flush skipped, handle is clean");
            return Ok(());
        }
        self.rows.write(&self.row_id, &self.buffer)?;
        self.state = HandleState::Clean;
        debug!(path = %self.path, bytes = self.buffer.len(), "flushed to row");
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.open_files.release(self.id);
            self.buffer = Vec::new();
        }
    }

    fn offset_to_index(&self, offset: u64) -> VfsResult<usize> {
        usize::try_from(offset).map_err(|_| self.invalid_offset(offset))
    }

    /// Zero-fill up to `len`, failing instead of aborting when the
    /// allocation cannot be made.
    fn grow(&mut self, len: usize, offset: u64) -> VfsResult<()> {
        if len > MAX_CONTENT_LEN {
            return Err(self.invalid_offset(offset));
        }
        self.buffer
            .try_reserve_exact(len - self.buffer.len())
            .map_err(|_| self.invalid_offset(offset))?;
        self.buffer.resize(len, 0);
        Ok(())
    }

    fn invalid_offset(&self, offset: u64) -> VfsError {
        VfsError::InvalidOffset {
            path: self.path.clone(),
            offset,
        }
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.flags.write {
            Ok(())
        } else {
            Err(VfsError::permission_denied(format!(
                "{} is open read-only",
                self.path
            )))
        }
    }

    fn mark_dirty(&mut self) {
        self.state = HandleState::Dirty;
        self.open_files.update(self.id, self.buffer.len() as u64);
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.commit() {
            error!(path = %self.path, row = %self.row_id, error = %e, "flush on drop failed, changes lost");
        }
        self.release();
    }
}

impl Read for FileHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let chunk = self.read_at(self.cursor, buf.len());
            buf[..chunk.len()].copy_from_slice(chunk);
            chunk.len()
        };
        self.cursor += n as u64;
        Ok(n)
    }
}

impl Write for FileHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(self.cursor, buf)?;
        self.cursor = if self.flags.append {
            self.buffer.len() as u64
        } else {
            self.cursor + n as u64
        };
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.commit()?)
    }
}

impl Seek for FileHandle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.cursor.checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.cursor = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use crate::testing::feedback_fs;

    const JANE: &str = "byname/Doe_Jane";

    #[test]
    fn test_state_transitions() {
        let (fs, _) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::write()).unwrap();
        assert_eq!(handle.state(), HandleState::Clean);
        handle.write_at(0, b"H").unwrap();
        assert_eq!(handle.state(), HandleState::Dirty);
        handle.flush().unwrap();
        assert_eq!(handle.state(), HandleState::Clean);
        handle.truncate(3).unwrap();
        assert!(handle.is_dirty());
    }

    #[test]
    fn test_flush_then_close_writes_once() {
        let (fs, session) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::write()).unwrap();
        handle.write_at(0, b"J").unwrap();
        handle.flush().unwrap();
        handle.close().unwrap();
        assert_eq!(session.executed().len(), 1);
    }

    #[test]
    fn test_read_only_handle_rejects_writes() {
        let (fs, session) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::read()).unwrap();
        assert!(matches!(handle.write_at(0, b"x"), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(handle.truncate(0), Err(VfsError::PermissionDenied(_))));
        assert!(!handle.is_dirty());
        handle.close().unwrap();
        assert!(session.executed().is_empty());
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let (fs, _) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::write()).unwrap();
        handle.write_at(13, b"!").unwrap();
        assert_eq!(handle.contents(), b"hello world\0\0!");
    }

    #[test]
    fn test_out_of_range_offsets_are_rejected() {
        let (fs, session) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::write()).unwrap();

        assert!(matches!(
            handle.write_at(u64::MAX - 1, b"xy"),
            Err(VfsError::InvalidOffset { offset, .. }) if offset == u64::MAX - 1
        ));
        assert!(matches!(
            handle.write_at(MAX_CONTENT_LEN as u64, b"x"),
            Err(VfsError::InvalidOffset { .. })
        ));
        assert!(matches!(
            handle.truncate(u64::MAX),
            Err(VfsError::InvalidOffset { .. })
        ));
        assert_eq!(handle.state(), HandleState::Clean);
        assert_eq!(handle.contents(), b"hello world");

        handle.seek(SeekFrom::Start(u64::MAX - 1)).unwrap();
        let err = handle.write(b"xy").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        handle.close().unwrap();
        assert!(session.executed().is_empty());
    }

    #[test]
    fn test_truncate_grows_with_zeros_and_shrinks() {
        let (fs, _) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::write()).unwrap();
        handle.truncate(13).unwrap();
        assert_eq!(handle.contents(), b"hello world\0\0");
        handle.truncate(5).unwrap();
        assert_eq!(handle.contents(), b"hello");
    }

    #[test]
    fn test_append_ignores_offset() {
        let (fs, session) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::append()).unwrap();
        handle.write_at(0, b"!").unwrap();
        assert_eq!(handle.contents(), b"hello world!");
        handle.close().unwrap();
        assert_eq!(
            session.executed()[0].1[0],
            SqlValue::Text("hello world!".into())
        );
    }

    #[test]
    fn test_truncate_on_open_counts_as_modification() {
        let (fs, session) = feedback_fs();
        let handle = fs.open_file(JANE, OpenFlags::truncate()).unwrap();
        assert!(handle.is_dirty());
        handle.close().unwrap();
        assert_eq!(session.executed()[0].1[0], SqlValue::Text(String::new()));
    }

    #[test]
    fn test_drop_flushes_dirty_handle() {
        let (fs, session) = feedback_fs();
        {
            let mut handle = fs.open_file(JANE, OpenFlags::write()).unwrap();
            handle.write_at(0, b"J").unwrap();
        }
        assert_eq!(session.executed().len(), 1);
        assert_eq!(fs.open_handles(), 0);
    }

    #[test]
    fn test_last_close_wins() {
        let (fs, _) = feedback_fs();
        let mut first = fs.open_file(JANE, OpenFlags::write()).unwrap();
        let mut second = fs.open_file(JANE, OpenFlags::write()).unwrap();
        first.write_at(0, b"first").unwrap();
        second.write_at(0, b"second").unwrap();

        // Buffers are independent.
        assert_eq!(first.contents(), b"first world");
        assert_eq!(second.contents(), b"secondworld");

        second.close().unwrap();
        first.close().unwrap();

        let handle = fs.open_file(JANE, OpenFlags::read()).unwrap();
        assert_eq!(handle.contents(), b"first world");
    }

    #[test]
    fn test_std_io_traits() {
        let (fs, session) = feedback_fs();
        let mut handle = fs.open_file(JANE, OpenFlags::write()).unwrap();

        let mut text = String::new();
        handle.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hello world");

        handle.seek(SeekFrom::Start(6)).unwrap();
        handle.write_all(b"rust!").unwrap();
        assert_eq!(handle.seek(SeekFrom::Current(0)).unwrap(), 11);

        handle.seek(SeekFrom::End(-5)).unwrap();
        let mut tail = Vec::new();
        handle.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, b"rust!");

        assert!(handle.seek(SeekFrom::Current(-100)).is_err());

        Write::flush(&mut handle).unwrap();
        assert_eq!(session.executed().len(), 1);
    }

    #[test]
    fn test_open_files_tracks_latest_handle() {
        let (fs, _) = feedback_fs();
        let first = fs.open_file(JANE, OpenFlags::read()).unwrap();
        let mut second = fs.open_file(JANE, OpenFlags::write()).unwrap();
        second.truncate(2).unwrap();
        assert_eq!(fs.open_handles(), 2);
        assert_eq!(fs.stat(JANE).unwrap().size, 2);
        second.close().unwrap();
        assert_eq!(fs.stat(JANE).unwrap().size, 11);
        first.close().unwrap();
        assert_eq!(fs.open_handles(), 0);
    }
}
