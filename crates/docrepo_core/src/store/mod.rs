//! Document-store driver contract.
//!
//! # Responsibility
//! - Define the collection operations the repository engine relies on.
//! - Keep the engine independent of the concrete storage backend.
//!
//! # Invariants
//! - Documents are JSON objects keyed by field name; `_id` is the primary key.
//! - Filters and `$set` payloads address fields by dot-qualified paths.
//! - Duplicate primary keys surface as [`StoreError::DuplicateKey`].
//!
//! # See also
//! - `filter` for the supported filter operators.

use crate::db::DbError;
use crate::model::page::SortPair;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod filter;
pub mod sqlite;

pub use sqlite::{SqliteCollection, SqliteStore};

/// Flat or nested JSON document; also used for filters and payloads.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Primary-key field of every stored document.
pub const ID_KEY: &str = "_id";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Another document already uses this key (canonical JSON of `_id`).
    DuplicateKey(String),
    /// Inserted document has no `_id`.
    MissingId,
    /// A replace or update tried to change `_id`.
    ImmutableId,
    InvalidFilter(String),
    InvalidUpdate(String),
    Codec(serde_json::Error),
    Db(DbError),
    /// The connection lock was poisoned by a panicking holder.
    Poisoned,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey(id) => write!(f, "duplicate key: {id}"),
            Self::MissingId => write!(f, "document has no `{ID_KEY}`"),
            Self::ImmutableId => write!(f, "`{ID_KEY}` is immutable"),
            Self::InvalidFilter(message) => write!(f, "invalid filter: {message}"),
            Self::InvalidUpdate(message) => write!(f, "invalid update: {message}"),
            Self::Codec(err) => write!(f, "document codec failed: {err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Poisoned => write!(f, "store connection lock poisoned"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Sort/skip/limit for `find`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<SortPair>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    /// At most one document, natural order.
    pub fn first() -> Self {
        Self {
            limit: Some(1),
            ..Self::default()
        }
    }
}

/// Counts reported by replace/update operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
}

/// One named collection of documents.
///
/// Without a sort, `find` returns documents in insertion order.
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>>;

    fn count(&self, filter: &Document) -> StoreResult<u64>;

    fn insert_one(&self, doc: Document) -> StoreResult<()>;

    /// Inserts in order and stops at the first failure; earlier inserts stay.
    fn insert_many(&self, docs: Vec<Document>) -> StoreResult<u64>;

    /// Replaces the first match. With `upsert`, inserts `doc` when nothing
    /// matches, taking `_id` from an equality condition in `filter` if `doc`
    /// has none.
    fn replace_one(&self, filter: &Document, doc: Document, upsert: bool)
        -> StoreResult<UpdateOutcome>;

    /// Applies `set` (path → value) to the first match.
    fn update_one(&self, filter: &Document, set: &Document) -> StoreResult<UpdateOutcome>;

    fn update_many(&self, filter: &Document, set: &Document) -> StoreResult<UpdateOutcome>;

    fn delete_one(&self, filter: &Document) -> StoreResult<u64>;

    fn delete_many(&self, filter: &Document) -> StoreResult<u64>;

    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        Ok(self.find(filter, &FindOptions::first())?.into_iter().next())
    }
}
