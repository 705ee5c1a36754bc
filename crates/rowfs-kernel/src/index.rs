//! Path index: virtual paths → row ids, built from one listing result.
//!
//! Every listed path becomes a file entry. Every proper prefix of a file
//! path becomes a synthesized directory. The root is always a directory and
//! is never stored. An index is immutable once built; refreshing means
//! building a new one and swapping it in.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::db::{DbError, QueryRows, RowId, SqlValue};
use crate::schema::ListingSchema;
use crate::vfs::{DirEntry, FileAttr, FileType, VfsError, VfsResult};

/// Normalize a virtual path: forward slashes, no leading slash, empty and
/// `.` segments dropped, `..` removes the previous segment.
///
/// The root normalizes to the empty string.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// One path in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathEntry {
    /// Normalized path.
    pub path: String,
    /// Row behind a file; `None` for synthesized directories.
    pub row_id: Option<RowId>,
    /// Size reported by the listing. Display metadata only; content length
    /// is not checked against it.
    pub size: u64,
    pub kind: FileType,
}

impl PathEntry {
    pub fn file(path: impl Into<String>, row_id: RowId, size: u64) -> Self {
        Self {
            path: path.into(),
            row_id: Some(row_id),
            size,
            kind: FileType::File,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            row_id: None,
            size: 0,
            kind: FileType::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind.is_dir()
    }

    /// Final path segment; empty for the root.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn attr(&self) -> FileAttr {
        match self.kind {
            FileType::File => FileAttr::file(self.size),
            FileType::Directory => FileAttr::directory(),
        }
    }
}

/// Immutable snapshot of one listing.
#[derive(Debug, Clone)]
pub struct PathIndex {
    entries: BTreeMap<String, PathEntry>,
    /// Directory path → names of its immediate children.
    children: BTreeMap<String, BTreeSet<String>>,
    files: usize,
    built_at: Instant,
}

impl Default for PathIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl PathIndex {
    /// An index holding only the root directory.
    pub fn empty() -> Self {
        let mut children = BTreeMap::new();
        children.insert(String::new(), BTreeSet::new());
        Self {
            entries: BTreeMap::new(),
            children,
            files: 0,
            built_at: Instant::now(),
        }
    }

    /// Build an index from a listing result using resolved column positions.
    pub fn from_rows(result: &QueryRows, schema: &ListingSchema) -> VfsResult<Self> {
        let files = result
            .rows
            .iter()
            .map(|row| listing_row(row, schema))
            .collect::<VfsResult<Vec<_>>>()?;
        Self::build(files)
    }

    /// Build an index from `(path, row id, size)` triples.
    ///
    /// Fails with `IndexConflict` when a path is both a file and an implied
    /// directory, when one path is listed for two different rows, or when a
    /// path normalizes to the root. Conflicts are reported in path order, so
    /// the same listing always fails the same way.
    pub fn build(rows: impl IntoIterator<Item = (String, RowId, u64)>) -> VfsResult<Self> {
        let mut files: BTreeMap<String, PathEntry> = BTreeMap::new();
        for (raw, row_id, size) in rows {
            let path = normalize(&raw);
            if path.is_empty() {
                return Err(VfsError::index_conflict(
                    raw,
                    format!("row {row_id} maps onto the root directory"),
                ));
            }
            if let Some(existing) = files.get(&path) {
                if existing.row_id.as_ref() == Some(&row_id) {
                    continue;
                }
                let reason = match &existing.row_id {
                    Some(other) => format!("listed for rows {other} and {row_id}"),
                    None => format!("listed twice for row {row_id}"),
                };
                return Err(VfsError::index_conflict(path, reason));
            }
            files.insert(path.clone(), PathEntry::file(path, row_id, size));
        }

        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        children.insert(String::new(), BTreeSet::new());
        let mut directories: BTreeSet<String> = BTreeSet::new();

        for path in files.keys() {
            let segments: Vec<&str> = path.split('/').collect();
            for depth in 0..segments.len() {
                let parent = segments[..depth].join("/");
                children
                    .entry(parent)
                    .or_default()
                    .insert(segments[depth].to_string());

                if depth + 1 < segments.len() {
                    let dir = segments[..=depth].join("/");
                    if let Some(file) = files.get(&dir) {
                        let row = file.row_id.as_ref().map(ToString::to_string).unwrap_or_default();
                        return Err(VfsError::index_conflict(
                            dir,
                            format!("file for row {row} is also a parent directory of {path}"),
                        ));
                    }
                    directories.insert(dir);
                }
            }
        }

        let file_count = files.len();
        let mut entries = files;
        for dir in directories {
            children.entry(dir.clone()).or_default();
            entries.insert(dir.clone(), PathEntry::directory(dir));
        }

        Ok(Self {
            entries,
            children,
            files: file_count,
            built_at: Instant::now(),
        })
    }

    /// Resolve a path. The root always resolves to a directory.
    pub fn lookup(&self, path: &str) -> VfsResult<PathEntry> {
        let normalized = normalize(path);
        if normalized.is_empty() {
            return Ok(PathEntry::directory(""));
        }
        self.entries
            .get(&normalized)
            .cloned()
            .ok_or_else(|| VfsError::not_found(normalized))
    }

    /// Names of the immediate children of a directory, sorted.
    pub fn list_children(&self, path: &str) -> VfsResult<Vec<String>> {
        let normalized = normalize(path);
        self.children_of(&normalized)
            .map(|names| names.iter().cloned().collect())
    }

    /// Immediate children of a directory as typed entries, sorted by name.
    pub fn child_entries(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let normalized = normalize(path);
        let names = self.children_of(&normalized)?;
        Ok(names
            .iter()
            .map(|name| {
                let full = if normalized.is_empty() {
                    name.clone()
                } else {
                    format!("{normalized}/{name}")
                };
                let kind = self
                    .entries
                    .get(&full)
                    .map(|e| e.kind)
                    .unwrap_or(FileType::Directory);
                DirEntry::new(name.clone(), kind)
            })
            .collect())
    }

    fn children_of(&self, normalized: &str) -> VfsResult<&BTreeSet<String>> {
        match self.children.get(normalized) {
            Some(names) => Ok(names),
            None if self.entries.contains_key(normalized) => {
                Err(VfsError::not_a_directory(normalized))
            }
            None => Err(VfsError::not_found(normalized)),
        }
    }

    /// All entries, files and synthesized directories, in path order.
    pub fn entries(&self) -> impl Iterator<Item = &PathEntry> {
        self.entries.values()
    }

    /// Number of row-backed files.
    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Number of synthesized directories, root excluded.
    pub fn directory_count(&self) -> usize {
        self.entries.len() - self.files
    }

    /// Time since this snapshot was built.
    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }
}

/// Extract `(path, row id, size)` from one listing row.
fn listing_row(row: &[SqlValue], schema: &ListingSchema) -> VfsResult<(String, RowId, u64)> {
    let value = |index: usize, name: &str| {
        row.get(index)
            .ok_or_else(|| VfsError::Query(DbError::MissingColumn(name.to_string())))
    };

    let id_value = value(schema.row_id, &schema.columns.row_id)?;
    let row_id = RowId::from_value(id_value).ok_or_else(|| {
        DbError::bad_value(&schema.columns.row_id, "INTEGER or TEXT row id", id_value)
    })?;

    let path = match value(schema.path, &schema.columns.path)? {
        SqlValue::Text(s) => s.clone(),
        SqlValue::Integer(i) => i.to_string(),
        other => {
            return Err(DbError::bad_value(&schema.columns.path, "TEXT path", other).into());
        }
    };

    let size = match value(schema.size, &schema.columns.size)? {
        SqlValue::Integer(n) if *n >= 0 => *n as u64,
        other => {
            return Err(
                DbError::bad_value(&schema.columns.size, "non-negative INTEGER size", other).into(),
            );
        }
    };

    Ok((path, row_id, size))
}
