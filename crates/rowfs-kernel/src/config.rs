//! TOML configuration: databases, statements and mount points.
//!
//! ```toml
//! database = "~/shop.db"
//! refresh_secs = 1
//!
//! [[mount]]
//! path = "/feedback"
//! listing = "SELECT id AS fid, 'byname/' || lastname AS path, length(comment) AS size FROM feedback"
//! read = "SELECT comment FROM feedback WHERE id = ?1"
//! write = "UPDATE feedback SET comment = ?1 WHERE id = ?2"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::db::{DbError, SqliteSession};
use crate::fs::RowFs;
use crate::index::normalize;
use crate::schema::{ContentEncoding, ListingColumns, QueryTemplates};
use crate::vfs::{MountTable, VfsError};

/// Database name that selects a private in-memory SQLite database.
pub const MEMORY_DATABASE: &str = ":memory:";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("database {database}: {source}")]
    Database {
        database: String,
        #[source]
        source: DbError,
    },

    #[error("mount {mount}: {source}")]
    Mount {
        mount: String,
        #[source]
        source: VfsError,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Default database for mounts that don't name one.
    pub database: Option<String>,
    /// SQL batch run once on every opened connection.
    pub setup: Option<String>,
    /// Default max index age in seconds.
    pub refresh_secs: Option<u64>,
    #[serde(default, rename = "mount")]
    pub mounts: Vec<MountConfig>,
}

/// One `[[mount]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountConfig {
    pub path: String,
    pub database: Option<String>,
    pub listing: String,
    pub read: String,
    pub write: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
    #[serde(default)]
    pub columns: ListingColumns,
    pub refresh_secs: Option<u64>,
}

impl MountConfig {
    pub fn templates(&self) -> QueryTemplates {
        QueryTemplates::new(&self.listing, &self.read, &self.write)
            .with_columns(self.columns.clone())
            .with_encoding(self.encoding)
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/rowfs/rowfs.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rowfs").join("rowfs.toml"))
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), mounts = config.mounts.len(), "loaded config");
        Ok(config)
    }

    /// Parse and validate.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.mounts.is_empty() {
            return Err(ConfigError::Invalid("no [[mount]] entries".into()));
        }
        let mut seen = HashSet::new();
        for mount in &self.mounts {
            if !seen.insert(normalize(&mount.path)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate mount path {}",
                    mount.path
                )));
            }
            self.database_for(mount)?;
        }
        Ok(())
    }

    /// The mount's own database, else the top-level default.
    pub fn database_for<'a>(&'a self, mount: &'a MountConfig) -> ConfigResult<&'a str> {
        mount
            .database
            .as_deref()
            .or(self.database.as_deref())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("mount {} has no database", mount.path))
            })
    }

    /// Open one session per distinct database and mount a [`RowFs`] for
    /// every `[[mount]]`.
    pub async fn build(&self) -> ConfigResult<MountTable> {
        let mut sessions: HashMap<String, Arc<SqliteSession>> = HashMap::new();
        let table = MountTable::new();

        for mount in &self.mounts {
            let database = expand_database(self.database_for(mount)?);
            let session = match sessions.get(&database) {
                Some(session) => Arc::clone(session),
                None => {
                    let session = Arc::new(open_session(&database, self.setup.as_deref())?);
                    sessions.insert(database.clone(), Arc::clone(&session));
                    session
                }
            };

            let mut fs = RowFs::new(session, mount.templates()).map_err(|source| {
                ConfigError::Mount {
                    mount: mount.path.clone(),
                    source,
                }
            })?;
            if let Some(secs) = mount.refresh_secs.or(self.refresh_secs) {
                fs = fs.with_max_age(Duration::from_secs(secs));
            }

            info!(mount = %mount.path, database = %database, "mounting row filesystem");
            table.mount(&mount.path, fs).await;
        }

        Ok(table)
    }
}

/// Expand `~` in file databases; `:memory:` passes through.
pub fn expand_database(database: &str) -> String {
    if database == MEMORY_DATABASE {
        return database.to_string();
    }
    shellexpand::tilde(database).into_owned()
}

fn open_session(database: &str, setup: Option<&str>) -> ConfigResult<SqliteSession> {
    let result = if database == MEMORY_DATABASE {
        SqliteSession::in_memory(setup)
    } else {
        SqliteSession::open(database, setup)
    };
    result.map_err(|source| ConfigError::Database {
        database: database.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::VfsOps;

    const SHOP: &str = r#"
database = ":memory:"
setup = """
CREATE TABLE feedback (id INTEGER PRIMARY KEY, lastname TEXT, comment TEXT);
INSERT INTO feedback VALUES (1, 'Doe', 'hello world');
INSERT INTO feedback VALUES (2, 'Roe', NULL);
"""

[[mount]]
path = "/feedback"
listing = "SELECT id AS fid, 'byname/' || lastname AS path, length(coalesce(comment, '')) AS size FROM feedback"
read = "SELECT comment FROM feedback WHERE id = ?1"
write = "UPDATE feedback SET comment = ?1 WHERE id = ?2"

[[mount]]
path = "/byid"
refresh_secs = 5
listing = "SELECT id AS rid, 'id/' || id AS name, length(coalesce(comment, '')) AS bytes FROM feedback"
read = "SELECT comment FROM feedback WHERE id = ?1"
write = "UPDATE feedback SET comment = ?1 WHERE id = ?2"
columns = { row_id = "rid", path = "name", size = "bytes" }
encoding = "blob"
"#;

    #[test]
    fn test_parse() {
        let config = Config::from_toml(SHOP).unwrap();
        assert_eq!(config.database.as_deref(), Some(":memory:"));
        assert_eq!(config.mounts.len(), 2);

        let feedback = &config.mounts[0];
        assert_eq!(feedback.columns, ListingColumns::default());
        assert_eq!(feedback.encoding, ContentEncoding::Text);
        assert_eq!(feedback.refresh_secs, None);

        let byid = &config.mounts[1];
        assert_eq!(byid.columns.row_id, "rid");
        assert_eq!(byid.columns.size, "bytes");
        assert_eq!(byid.encoding, ContentEncoding::Blob);
        assert_eq!(byid.refresh_secs, Some(5));
        assert_eq!(byid.templates().columns.path, "name");
    }

    #[test]
    fn test_missing_database() {
        let err = Config::from_toml(
            r#"
[[mount]]
path = "/x"
listing = "SELECT 1 AS fid, 'a' AS path, 0 AS size"
read = "SELECT ?1"
write = "SELECT ?1, ?2"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("no database")));
    }

    #[test]
    fn test_duplicate_mount_paths() {
        let mount = r#"
[[mount]]
path = "/x/"
listing = "SELECT 1 AS fid, 'a' AS path, 0 AS size"
read = "SELECT ?1"
write = "SELECT ?1, ?2"
"#;
        let text = format!("database = \":memory:\"\n{mount}{}", mount.replace("/x/", "x"));
        let err = Config::from_toml(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_no_mounts_and_unknown_keys() {
        assert!(matches!(
            Config::from_toml("database = \"a.db\"").unwrap_err(),
            ConfigError::Invalid(_)
        ));
        assert!(matches!(
            Config::from_toml("databse = \"a.db\"").unwrap_err(),
            ConfigError::Toml(_)
        ));
    }

    #[test]
    fn test_expand_database() {
        assert_eq!(expand_database(":memory:"), ":memory:");
        assert_eq!(expand_database("/var/db/shop.db"), "/var/db/shop.db");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                PathBuf::from(expand_database("~/shop.db")),
                home.join("shop.db")
            );
        }
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/rowfs.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[tokio::test]
    async fn test_build_shares_sessions() {
        let config = Config::from_toml(SHOP).unwrap();
        let table = config.build().await.unwrap();

        let mounts: Vec<_> = table.list_mounts().await.into_iter().map(|m| m.path).collect();
        assert_eq!(mounts, vec!["/byid", "/feedback"]);

        assert_eq!(
            table.read_all(Path::new("/feedback/byname/Doe")).await.unwrap(),
            b"hello world"
        );
        assert_eq!(table.read_all(Path::new("/byid/id/2")).await.unwrap(), b"");

        // Both mounts sit on one in-memory connection, so a write through
        // one is visible through the other.
        table
            .write_all(Path::new("/byid/id/1"), b"via blob")
            .await
            .unwrap();
        assert_eq!(
            table.read_all(Path::new("/feedback/byname/Doe")).await.unwrap(),
            b"via blob"
        );
    }

    #[tokio::test]
    async fn test_build_reports_bad_mount() {
        let mut config = Config::from_toml(SHOP).unwrap();
        config.mounts[0].read = "SELECT comment FROM feedback".into();

        let err = config.build().await.unwrap_err();
        match err {
            ConfigError::Mount { mount, source } => {
                assert_eq!(mount, "/feedback");
                assert!(matches!(source, VfsError::InvalidSchema(_)));
            }
            other => panic!("expected mount error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_reports_bad_setup() {
        let mut config = Config::from_toml(SHOP).unwrap();
        config.setup = Some("CREATE TABLE".into());
        assert!(matches!(
            config.build().await.unwrap_err(),
            ConfigError::Database { .. }
        ));
    }
}
