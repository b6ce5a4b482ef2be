//! SQLite bootstrap for the document tables.
//!
//! # Responsibility
//! - Open and configure SQLite connections backing document collections.
//! - Bring the `documents` table to the latest migration before use.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - A connection handed to `store::sqlite` has the `documents` table.
//!
//! # See also
//! - `store::sqlite` for the collection layout on top of these tables.

use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub(crate) use open::bootstrap_connection;
pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failures while preparing or querying the document database.
#[derive(Debug)]
pub enum DbError {
    /// The connection itself could not be opened (`mode` is `file` or `memory`).
    Open {
        mode: &'static str,
        source: rusqlite::Error,
    },
    /// A migration script failed; nothing from that run was committed.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The file was written by a newer build of the document store.
    SchemaTooNew { found: u32, supported: u32 },
    /// `user_version` claims the schema is current but the table is gone.
    MissingDocumentsTable,
    Sqlite(rusqlite::Error),
}

impl DbError {
    /// Stable short code used in `error_code=` log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Open { .. } => "db_open_failed",
            Self::Migration { .. } => "db_migration_failed",
            Self::SchemaTooNew { .. } => "db_schema_too_new",
            Self::MissingDocumentsTable => "db_documents_missing",
            Self::Sqlite(_) => "db_sqlite",
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { mode, source } => write!(f, "cannot open {mode} database: {source}"),
            Self::Migration { version, source } => {
                write!(f, "document migration {version} failed: {source}")
            }
            Self::SchemaTooNew { found, supported } => write!(
                f,
                "document schema version {found} is newer than supported {supported}"
            ),
            Self::MissingDocumentsTable => {
                write!(f, "schema is marked current but table `documents` is missing")
            }
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Migration { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::SchemaTooNew { .. } | Self::MissingDocumentsTable => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Whether `err` is a primary-key or unique-index violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::{is_unique_violation, DbError};
    use rusqlite::Connection;
    use std::error::Error;

    #[test]
    fn duplicate_primary_key_is_a_unique_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
        assert!(is_unique_violation(&err));

        let other = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();
        assert!(!is_unique_violation(&other));
    }

    #[test]
    fn codes_and_sources_follow_variant() {
        let err = DbError::SchemaTooNew {
            found: 9,
            supported: 1,
        };
        assert_eq!(err.code(), "db_schema_too_new");
        assert!(err.source().is_none());
        assert!(err.to_string().contains("9"));

        let sqlite = Connection::open_in_memory()
            .unwrap()
            .execute("NOT SQL", [])
            .unwrap_err();
        let err = DbError::Migration {
            version: 1,
            source: sqlite,
        };
        assert_eq!(err.code(), "db_migration_failed");
        assert!(err.source().is_some());
    }
}
