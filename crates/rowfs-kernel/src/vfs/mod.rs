//! Virtual filesystem surface.
//!
//! - [`VfsOps`] - path-based operations a mount collaborator drives
//! - [`MountTable`] - routes operations to filesystems by longest prefix
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: operations use paths, not inode numbers.
//! - **Explicit offset/size**: read/write take offset and size so the
//!   surface stays stateless; handle-based access lives on
//!   [`RowFs`](crate::RowFs).
//! - **Longest-prefix routing**: the most specific mount point wins.

mod error;
mod mount;
mod ops;
mod types;

pub use error::{VfsError, VfsResult};
pub use mount::{MountInfo, MountTable};
pub use ops::VfsOps;
pub use types::{DIR_PERM, DirEntry, FILE_PERM, FileAttr, FileType, OpenFlags, SetAttr, StatFs};
