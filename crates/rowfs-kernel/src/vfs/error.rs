//! VFS error types.

use std::io;
use thiserror::Error;

use crate::db::{DbError, RowId};

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// A listing, read or write statement failed to execute or returned
    /// values of the wrong shape.
    #[error("query failed: {0}")]
    Query(#[from] DbError),

    /// A statement does not match the column/parameter contract.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// The listing describes a path as both a file and a directory.
    #[error("index conflict at {path}: {reason}")]
    IndexConflict { path: String, reason: String },

    /// The read statement returned no row for this id.
    #[error("row {0} not found")]
    RowNotFound(RowId),

    /// The read statement returned more than one row for this id.
    #[error("row {row_id} is ambiguous ({rows} rows matched)")]
    AmbiguousRow { row_id: RowId, rows: usize },

    /// The write statement did not affect exactly one row.
    #[error("write to row {row_id} rejected ({affected} rows affected)")]
    WriteRejected { row_id: RowId, affected: usize },

    /// Buffer content cannot be bound to the content column.
    #[error("invalid content for {0}: not valid UTF-8")]
    InvalidContent(String),

    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Operation outside the read/write boundary (create, delete, rename...).
    #[error("unsupported operation: {op} on {path}")]
    UnsupportedOperation { op: &'static str, path: String },

    /// Handle was not opened for writing.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Offset or size the buffer of `path` cannot reach.
    #[error("offset {offset} out of range for {path}")]
    InvalidOffset { path: String, offset: u64 },

    /// No mount point for path.
    #[error("no mount point for path: {0}")]
    NoMountPoint(String),

    /// Cross-device link.
    #[error("cross-device link")]
    CrossDeviceLink,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an UnsupportedOperation error.
    pub fn unsupported(op: &'static str, path: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            op,
            path: path.into(),
        }
    }

    /// Create an IndexConflict error.
    pub fn index_conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IndexConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidSchema error.
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a NoMountPoint error.
    pub fn no_mount_point(path: impl Into<String>) -> Self {
        Self::NoMountPoint(path.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Convert VfsError to std::io::Error so handles can back `std::io` traits.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) | VfsError::NoMountPoint(msg) => {
                io::Error::new(io::ErrorKind::NotFound, msg)
            }
            VfsError::RowNotFound(id) => {
                io::Error::new(io::ErrorKind::NotFound, format!("row {id} not found"))
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            e @ VfsError::UnsupportedOperation { .. } => {
                io::Error::new(io::ErrorKind::Unsupported, e.to_string())
            }
            e @ (VfsError::InvalidPath(_)
            | VfsError::InvalidOffset { .. }
            | VfsError::InvalidContent(_)) => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            VfsError::CrossDeviceLink => io::Error::new(io::ErrorKind::CrossesDevices, "cross-device link"),
            VfsError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let err: io::Error = VfsError::unsupported("create", "byname/NewPerson").into();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let err: io::Error = VfsError::is_a_directory("byname").into();
        assert_eq!(err.kind(), io::ErrorKind::IsADirectory);

        let err: io::Error = VfsError::RowNotFound(RowId::Integer(7)).into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err: io::Error = VfsError::InvalidOffset {
            path: "byname/Doe_Jane".into(),
            offset: u64::MAX,
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
