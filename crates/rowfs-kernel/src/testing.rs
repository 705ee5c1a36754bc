//! Shared fixtures for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::db::{DbResult, QueryRows, Session, SqlValue, SqliteSession, StatementShape};
use crate::fs::RowFs;
use crate::schema::QueryTemplates;

pub(crate) const FEEDBACK_SCHEMA: &str = "
    CREATE TABLE feedback (
        id INTEGER PRIMARY KEY,
        firstname TEXT NOT NULL,
        lastname TEXT NOT NULL,
        comment TEXT
    );
    INSERT INTO feedback VALUES (1, 'Jane', 'Doe', 'hello world');
";

pub(crate) fn feedback_templates() -> QueryTemplates {
    QueryTemplates::new(
        "SELECT id AS fid, 'byname/' || lastname || '_' || firstname AS path,
                length(comment) AS size
         FROM feedback",
        "SELECT comment FROM feedback WHERE id = ?1",
        "UPDATE feedback SET comment = ?1 WHERE id = ?2",
    )
}

/// Session wrapper that records every `execute` call.
pub(crate) struct RecordingSession {
    inner: SqliteSession,
    executed: Mutex<Vec<(String, Vec<SqlValue>)>>,
}

impl RecordingSession {
    pub(crate) fn new(seed: &str) -> Arc<Self> {
        let inner = SqliteSession::in_memory(None).unwrap();
        inner.execute_batch(seed).unwrap();
        Arc::new(Self {
            inner,
            executed: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn executed(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.executed.lock().clone()
    }

    pub(crate) fn seed(&self, sql: &str) {
        self.inner.execute_batch(sql).unwrap();
    }
}

impl Session for RecordingSession {
    fn describe(&self, sql: &str) -> DbResult<StatementShape> {
        self.inner.describe(sql)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<QueryRows> {
        self.inner.query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        self.executed
            .lock()
            .push((sql.to_string(), params.to_vec()));
        self.inner.execute(sql, params)
    }
}

/// A feedback filesystem over a recording session.
pub(crate) fn feedback_fs() -> (RowFs, Arc<RecordingSession>) {
    let session = RecordingSession::new(FEEDBACK_SCHEMA);
    let fs = RowFs::new(session.clone(), feedback_templates()).unwrap();
    (fs, session)
}
