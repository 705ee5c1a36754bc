//! Query templates and the column/parameter contract they must satisfy.
//!
//! The contract is checked once, when a filesystem is built: the listing
//! takes no parameters and exposes the row-id, path and size columns; the
//! read statement takes the row id; the write statement takes the new
//! content followed by the row id.

use serde::{Deserialize, Serialize};

use crate::db::Session;
use crate::vfs::{VfsError, VfsResult};

/// Names of the listing columns that carry the row id, path and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingColumns {
    pub row_id: String,
    pub path: String,
    pub size: String,
}

impl Default for ListingColumns {
    fn default() -> Self {
        Self {
            row_id: "fid".to_string(),
            path: "path".to_string(),
            size: "size".to_string(),
        }
    }
}

/// How a buffer is bound when written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Bind as TEXT; content must be valid UTF-8.
    #[default]
    Text,
    /// Bind as BLOB.
    Blob,
}

/// The listing, read and write statements of one filesystem.
///
/// Connection setup belongs to the session and is not repeated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplates {
    pub listing: String,
    pub read: String,
    pub write: String,
    pub columns: ListingColumns,
    pub encoding: ContentEncoding,
}

impl QueryTemplates {
    pub fn new(
        listing: impl Into<String>,
        read: impl Into<String>,
        write: impl Into<String>,
    ) -> Self {
        Self {
            listing: listing.into(),
            read: read.into(),
            write: write.into(),
            columns: ListingColumns::default(),
            encoding: ContentEncoding::default(),
        }
    }

    pub fn with_columns(mut self, columns: ListingColumns) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_encoding(mut self, encoding: ContentEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Prepare all three statements and check them against the contract.
    pub fn validate(&self, session: &dyn Session) -> VfsResult<ListingSchema> {
        let listing = session.describe(&self.listing)?;
        if listing.params != 0 {
            return Err(VfsError::invalid_schema(format!(
                "listing statement takes {} parameters, expected none",
                listing.params
            )));
        }
        let column = |name: &str| {
            listing.column_index(name).ok_or_else(|| {
                VfsError::invalid_schema(format!(
                    "listing statement has no `{name}` column (columns: {})",
                    listing.columns.join(", ")
                ))
            })
        };
        let schema = ListingSchema {
            row_id: column(&self.columns.row_id)?,
            path: column(&self.columns.path)?,
            size: column(&self.columns.size)?,
            columns: self.columns.clone(),
        };

        let read = session.describe(&self.read)?;
        if read.params != 1 {
            return Err(VfsError::invalid_schema(format!(
                "read statement takes {} parameters, expected 1 (row id)",
                read.params
            )));
        }
        if read.columns.is_empty() {
            return Err(VfsError::invalid_schema(
                "read statement returns no columns",
            ));
        }

        let write = session.describe(&self.write)?;
        if write.params != 2 {
            return Err(VfsError::invalid_schema(format!(
                "write statement takes {} parameters, expected 2 (content, row id)",
                write.params
            )));
        }

        Ok(schema)
    }
}

/// Resolved positions of the listing columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingSchema {
    pub row_id: usize,
    pub path: usize,
    pub size: usize,
    pub columns: ListingColumns,
}
