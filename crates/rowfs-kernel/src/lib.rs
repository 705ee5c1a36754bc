//! # rowfs-kernel
//!
//! Rows of a SQL table exposed as files in a virtual filesystem.
//!
//! A listing statement maps every row to a path; one column of the row is
//! the file's content. The filesystem:
//! - Builds a path index from the listing and synthesizes directories
//! - Reads a row's content when a file is opened
//! - Writes the buffer back with one statement when a dirty file is closed
//! - Refuses anything that would create, delete or move a row
//!
//! Several filesystems can be composed under one namespace with a
//! [`MountTable`], usually built from a [`Config`].

pub mod config;
pub mod db;
pub mod fs;
pub mod handle;
pub mod index;
pub mod rows;
pub mod schema;
pub mod vfs;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError, MountConfig};
pub use db::{DbError, RowId, Session, SqlValue, SqliteSession};
pub use fs::{DirIter, RowFs};
pub use handle::{FileHandle, HandleState};
pub use index::{PathEntry, PathIndex};
pub use rows::RowAccessor;
pub use schema::{ContentEncoding, ListingColumns, QueryTemplates};
pub use vfs::{
    DirEntry, FileAttr, FileType, MountInfo, MountTable, OpenFlags, SetAttr, StatFs, VfsError,
    VfsOps, VfsResult,
};
