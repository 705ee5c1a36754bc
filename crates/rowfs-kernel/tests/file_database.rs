//! Integration tests against SQLite database files on disk.
//!
//! Covers what the in-memory unit tests can't: content surviving a fresh
//! connection, and a config that mounts several tables of one database
//! the way an upload server lays them out.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use rowfs_kernel::{
    Config, ContentEncoding, ListingColumns, OpenFlags, QueryTemplates, RowFs, SqliteSession,
    VfsError, VfsOps,
};
use tempfile::TempDir;

const UPLOADS_SCHEMA: &str = "
    CREATE TABLE uploads (id INTEGER PRIMARY KEY, filename TEXT NOT NULL, data BLOB);
    CREATE TABLE attachments (id INTEGER PRIMARY KEY, upload INTEGER, note TEXT);
    CREATE TABLE testscripts (name TEXT PRIMARY KEY, script TEXT);

    INSERT INTO uploads VALUES (1, 'report.txt', X'6869');
    INSERT INTO uploads VALUES (2, 'image.bin', X'00FF00');
    INSERT INTO attachments VALUES (10, 1, 'first note');
    INSERT INTO attachments VALUES (11, 1, 'second note');
    INSERT INTO testscripts VALUES ('smoke', 'echo ok');
";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn seeded_database(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("uploads.db");
    SqliteSession::open(&path, Some(UPLOADS_SCHEMA)).unwrap();
    path
}

fn uploads_templates() -> QueryTemplates {
    QueryTemplates::new(
        "SELECT id AS fid, 'id/' || id || '/' || filename AS path, length(data) AS size
         FROM uploads",
        "SELECT data FROM uploads WHERE id = ?1",
        "UPDATE uploads SET data = ?1 WHERE id = ?2",
    )
    .with_encoding(ContentEncoding::Blob)
}

#[test]
fn test_write_survives_new_connection() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = seeded_database(&dir);

    {
        let fs = RowFs::new(Arc::new(SqliteSession::open(&db, None).unwrap()), uploads_templates())
            .unwrap();
        let mut handle = fs.open_file("id/2/image.bin", OpenFlags::write()).unwrap();
        handle.write_at(3, &[0xAA, 0xBB]).unwrap();
        handle.close().unwrap();
    }

    let fs = RowFs::new(Arc::new(SqliteSession::open(&db, None).unwrap()), uploads_templates())
        .unwrap();
    let attr = fs.stat("id/2/image.bin").unwrap();
    assert_eq!(attr.size, 5);

    let handle = fs.open_file("id/2/image.bin", OpenFlags::read()).unwrap();
    assert_eq!(handle.contents(), &[0x00, 0xFF, 0x00, 0xAA, 0xBB]);
    handle.close().unwrap();
}

#[test]
fn test_std_io_over_file_database() {
    let dir = TempDir::new().unwrap();
    let db = seeded_database(&dir);
    let fs = RowFs::new(Arc::new(SqliteSession::open(&db, None).unwrap()), uploads_templates())
        .unwrap();

    let mut handle = fs.open_file("id/1/report.txt", OpenFlags::append()).unwrap();
    write!(handle, " there").unwrap();
    handle.close().unwrap();

    let mut handle = fs.open_file("id/1/report.txt", OpenFlags::read()).unwrap();
    let mut text = String::new();
    handle.read_to_string(&mut text).unwrap();
    assert_eq!(text, "hi there");
}

#[test]
fn test_blob_content_is_not_utf8_checked() {
    let dir = TempDir::new().unwrap();
    let db = seeded_database(&dir);
    let session = Arc::new(SqliteSession::open(&db, None).unwrap());

    let blob = RowFs::new(session.clone(), uploads_templates()).unwrap();
    let mut handle = blob.open_file("id/1/report.txt", OpenFlags::truncate()).unwrap();
    handle.write_at(0, &[0xC3, 0x28]).unwrap();
    handle.close().unwrap();

    let text = RowFs::new(session, uploads_templates().with_encoding(ContentEncoding::Text))
        .unwrap();
    let mut handle = text.open_file("id/1/report.txt", OpenFlags::write()).unwrap();
    handle.write_at(0, &[0xFF]).unwrap();
    assert!(matches!(handle.close(), Err(VfsError::InvalidContent(_))));
}

#[tokio::test]
async fn test_config_mounts_three_tables() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let db = seeded_database(&dir);

    let config_path = dir.path().join("rowfs.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
database = "{db}"

[[mount]]
path = "/uploads"
listing = "SELECT id AS fid, 'id/' || id || '/' || filename AS path, length(data) AS size FROM uploads"
read = "SELECT data FROM uploads WHERE id = ?1"
write = "UPDATE uploads SET data = ?1 WHERE id = ?2"
encoding = "blob"

[[mount]]
path = "/att"
listing = "SELECT id AS fid, 'upload/' || upload || '/' || id AS path, length(note) AS size FROM attachments"
read = "SELECT note FROM attachments WHERE id = ?1"
write = "UPDATE attachments SET note = ?1 WHERE id = ?2"

[[mount]]
path = "/testscript"
listing = "SELECT name AS key, name || '.sh' AS file, length(script) AS bytes FROM testscripts"
read = "SELECT script FROM testscripts WHERE name = ?1"
write = "UPDATE testscripts SET script = ?1 WHERE name = ?2"
columns = {{ row_id = "key", path = "file", size = "bytes" }}
"#,
            db = db.display()
        ),
    )
    .unwrap();

    let table = Config::load(&config_path).unwrap().build().await.unwrap();

    let root: Vec<_> = table
        .readdir(Path::new("/"))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(root, vec!["att", "testscript", "uploads"]);

    let notes: Vec<_> = table
        .readdir(Path::new("/att/upload/1"))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(notes, vec!["10", "11"]);

    assert_eq!(
        table.read_all(Path::new("/testscript/smoke.sh")).await.unwrap(),
        b"echo ok"
    );

    table
        .write_all(Path::new("/testscript/smoke.sh"), b"echo fine")
        .await
        .unwrap();
    let check = SqliteSession::open(&db, None).unwrap();
    let fs = RowFs::new(
        Arc::new(check),
        QueryTemplates::new(
            "SELECT name AS fid, name AS path, length(script) AS size FROM testscripts",
            "SELECT script FROM testscripts WHERE name = ?1",
            "UPDATE testscripts SET script = ?1 WHERE name = ?2",
        )
        .with_columns(ListingColumns::default()),
    )
    .unwrap();
    assert_eq!(fs.stat("smoke").unwrap().size, 9);

    assert!(matches!(
        table
            .rename(Path::new("/att/upload/1/10"), Path::new("/uploads/10"))
            .await,
        Err(VfsError::CrossDeviceLink)
    ));
}
