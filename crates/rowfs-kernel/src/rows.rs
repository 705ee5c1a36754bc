//! Row content accessor: whole-value reads and writes of the content column.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::db::{Session, SqlValue, RowId};
use crate::schema::{ContentEncoding, QueryTemplates};
use crate::vfs::{VfsError, VfsResult};

/// Reads and replaces the content column of one row at a time.
pub struct RowAccessor {
    session: Arc<dyn Session>,
    read_sql: String,
    write_sql: String,
    encoding: ContentEncoding,
}

impl fmt::Debug for RowAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowAccessor")
            .field("read_sql", &self.read_sql)
            .field("write_sql", &self.write_sql)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl RowAccessor {
    pub fn new(session: Arc<dyn Session>, templates: &QueryTemplates) -> Self {
        Self {
            session,
            read_sql: templates.read.clone(),
            write_sql: templates.write.clone(),
            encoding: templates.encoding,
        }
    }

    /// Fetch the current content of a row.
    ///
    /// The first column of the single result row is the content. NULL reads
    /// as empty; numbers read as their decimal text.
    pub fn read(&self, row_id: &RowId) -> VfsResult<Vec<u8>> {
        let result = self.session.query(&self.read_sql, &[SqlValue::from(row_id)])?;
        let [row] = match <[Vec<SqlValue>; 1]>::try_from(result.rows) {
            Ok(single) => single,
            Err(rows) if rows.is_empty() => {
                return Err(VfsError::RowNotFound(row_id.clone()));
            }
            Err(rows) => {
                return Err(VfsError::AmbiguousRow {
                    row_id: row_id.clone(),
                    rows: rows.len(),
                });
            }
        };
        let first = row
            .into_iter()
            .next()
            .ok_or_else(|| VfsError::invalid_schema("read statement returned no columns"))?;

        let content = match first {
            SqlValue::Null => Vec::new(),
            SqlValue::Integer(i) => i.to_string().into_bytes(),
            SqlValue::Real(f) => f.to_string().into_bytes(),
            SqlValue::Text(s) => s.into_bytes(),
            SqlValue::Blob(b) => b,
        };
        debug!(row = %row_id, bytes = content.len(), "read row content");
        Ok(content)
    }

    /// Replace the content of a row. Exactly one row must be affected.
    pub fn write(&self, row_id: &RowId, content: &[u8]) -> VfsResult<()> {
        let value = match self.encoding {
            ContentEncoding::Text => match std::str::from_utf8(content) {
                Ok(text) => SqlValue::Text(text.to_string()),
                Err(_) => return Err(VfsError::InvalidContent(format!("row {row_id}"))),
            },
            ContentEncoding::Blob => SqlValue::Blob(content.to_vec()),
        };

        let affected = self
            .session
            .execute(&self.write_sql, &[value, SqlValue::from(row_id)])?;
        if affected != 1 {
            return Err(VfsError::WriteRejected {
                row_id: row_id.clone(),
                affected,
            });
        }
        debug!(row = %row_id, bytes = content.len(), "wrote row content");
        Ok(())
    }
}
