//! Database session interface and its SQLite driver.
//!
//! The rest of the crate only talks to [`Session`]: describe a statement,
//! run a query, execute an update. [`SqliteSession`] is the driver shipped
//! with the crate; it owns one `rusqlite::Connection` and serializes every
//! call through a mutex, since a connection is not safe for concurrent use.

use std::fmt;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Database-layer error.
#[derive(Debug, Error)]
pub enum DbError {
    /// The driver rejected or failed the statement.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A required column is absent from a result set.
    #[error("missing column `{0}`")]
    MissingColumn(String),

    /// A value has a type the caller cannot use.
    #[error("column `{column}`: expected {expected}, found {found}")]
    BadValue {
        column: String,
        expected: &'static str,
        found: String,
    },
}

impl DbError {
    pub fn bad_value(column: impl Into<String>, expected: &'static str, found: &SqlValue) -> Self {
        Self::BadValue {
            column: column.into(),
            expected,
            found: found.describe(),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// A single SQL value, independent of the driver.
///
/// TEXT that is not valid UTF-8 is carried as `Blob` with its bytes
/// untouched, so content reads back exactly as stored.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    fn describe(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(i) => format!("INTEGER {i}"),
            SqlValue::Real(f) => format!("REAL {f}"),
            SqlValue::Text(s) => format!("TEXT {s:?}"),
            SqlValue::Blob(b) => format!("BLOB ({} bytes)", b.len()),
        }
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(text) => SqlValue::Text(text.to_string()),
                Err(_) => SqlValue::Blob(t.to_vec()),
            },
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
        })
    }
}

/// Identifies one row for the read and write statements.
///
/// Listings may map several paths to the same id, much like hard links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Integer(i64),
    Text(String),
}

impl RowId {
    /// Convert a listing value into a row id. Only INTEGER and TEXT keys
    /// are stable enough to bind back into statements.
    pub fn from_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Integer(i) => Some(RowId::Integer(*i)),
            SqlValue::Text(s) => Some(RowId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Integer(i) => write!(f, "{i}"),
            RowId::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RowId {
    fn from(id: i64) -> Self {
        RowId::Integer(id)
    }
}

impl From<&str> for RowId {
    fn from(id: &str) -> Self {
        RowId::Text(id.to_string())
    }
}

impl From<&RowId> for SqlValue {
    fn from(id: &RowId) -> Self {
        match id {
            RowId::Integer(i) => SqlValue::Integer(*i),
            RowId::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

/// Result columns and positional parameter count of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementShape {
    pub columns: Vec<String>,
    pub params: usize,
}

impl StatementShape {
    /// Position of a named result column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// A fully fetched result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

/// DB access interface consumed by the filesystem core.
///
/// Implementations that wrap a connection which is not safe for concurrent
/// use must serialize calls themselves.
pub trait Session: Send + Sync {
    /// Prepare `sql` without running it and report its shape.
    fn describe(&self, sql: &str) -> DbResult<StatementShape>;

    /// Run a row-returning statement and fetch every row.
    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<QueryRows>;

    /// Run a data-modifying statement and return the affected-row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize>;
}

/// SQLite session over a single connection.
pub struct SqliteSession {
    conn: Mutex<Connection>,
}

impl fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteSession")
            .field("conn", &"<locked>")
            .finish()
    }
}

impl SqliteSession {
    /// Open or create a database file, then run the setup batch if given.
    pub fn open<P: AsRef<Path>>(path: P, setup: Option<&str>) -> DbResult<Self> {
        info!(path = %path.as_ref().display(), "opening sqlite session");
        Self::with_setup(Connection::open(path)?, setup)
    }

    /// Create an in-memory database (for testing and `:memory:` configs).
    pub fn in_memory(setup: Option<&str>) -> DbResult<Self> {
        Self::with_setup(Connection::open_in_memory()?, setup)
    }

    fn with_setup(conn: Connection, setup: Option<&str>) -> DbResult<Self> {
        if let Some(setup) = setup.filter(|s| !s.trim().is_empty()) {
            debug!("running connection setup batch");
            conn.execute_batch(setup)?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a batch of statements outside the query contract, e.g. to seed
    /// a schema.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

impl Session for SqliteSession {
    fn describe(&self, sql: &str) -> DbResult<StatementShape> {
        let conn = self.conn.lock();
        let stmt = conn.prepare(sql)?;
        Ok(StatementShape {
            columns: stmt.column_names().into_iter().map(String::from).collect(),
            params: stmt.parameter_count(),
        })
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<QueryRows> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut fetched = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(SqlValue::from(row.get_ref(i)?));
            }
            fetched.push(values);
        }

        Ok(QueryRows {
            columns,
            rows: fetched,
        })
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }
}
