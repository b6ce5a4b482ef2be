//! SQLite-backed document collections.
//!
//! # Responsibility
//! - Persist JSON documents per named collection in the `documents` table.
//! - Evaluate filters, sorting and `$set` updates in process (see `filter`).
//!
//! # Invariants
//! - `doc_id` is the canonical JSON text of the document's `_id`, so ids of
//!   different JSON types never collide.
//! - Every read-modify-write runs under the connection mutex inside one
//!   immediate transaction; a compare-and-swap filter is therefore atomic.
//! - Natural order is insertion order (`rowid`).

use super::filter::{apply_set, equality_value, matches, sort_documents};
use super::{
    Document, DocumentCollection, FindOptions, StoreError, StoreResult, UpdateOutcome, ID_KEY,
};
use crate::db::{bootstrap_connection, is_unique_violation, open_db, open_db_in_memory};
use log::debug;
use rusqlite::{params, Connection, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared SQLite connection hosting any number of collections.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::wrap(open_db(path)?))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::wrap(open_db_in_memory()?))
    }

    /// Adopts an existing connection and applies pending migrations to it.
    pub fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        bootstrap_connection(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn collection(&self, name: impl Into<String>) -> SqliteCollection {
        SqliteCollection {
            conn: Arc::clone(&self.conn),
            name: name.into(),
        }
    }
}

/// Handle to one named collection; cheap to clone.
#[derive(Clone)]
pub struct SqliteCollection {
    conn: Arc<Mutex<Connection>>,
    name: String,
}

struct StoredDocument {
    doc_id: String,
    doc: Document,
}

fn doc_key(doc: &Document) -> StoreResult<String> {
    match doc.get(ID_KEY) {
        None | Some(Value::Null) => Err(StoreError::MissingId),
        Some(id) => Ok(serde_json::to_string(id)?),
    }
}

fn map_insert_error(err: rusqlite::Error, doc_id: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::DuplicateKey(doc_id.to_string())
    } else {
        err.into()
    }
}

impl SqliteCollection {
    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn load(&self, conn: &Connection) -> StoreResult<Vec<StoredDocument>> {
        let mut stmt = conn.prepare(
            "SELECT doc_id, body FROM documents WHERE collection = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![self.name], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut docs = Vec::new();
        for row in rows {
            let (doc_id, body) = row?;
            docs.push(StoredDocument {
                doc_id,
                doc: serde_json::from_str(&body)?,
            });
        }
        Ok(docs)
    }

    fn load_matching(
        &self,
        conn: &Connection,
        filter: &Document,
    ) -> StoreResult<Vec<StoredDocument>> {
        let mut selected = Vec::new();
        for stored in self.load(conn)? {
            if matches(&stored.doc, filter)? {
                selected.push(stored);
            }
        }
        Ok(selected)
    }

    fn insert(&self, conn: &Connection, doc: &Document) -> StoreResult<()> {
        let doc_id = doc_key(doc)?;
        let body = serde_json::to_string(doc)?;
        conn.execute(
            "INSERT INTO documents (collection, doc_id, body) VALUES (?1, ?2, ?3)",
            params![self.name, doc_id, body],
        )
        .map_err(|err| map_insert_error(err, &doc_id))?;
        Ok(())
    }

    fn overwrite(&self, conn: &Connection, doc_id: &str, doc: &Document) -> StoreResult<()> {
        let body = serde_json::to_string(doc)?;
        conn.execute(
            "UPDATE documents SET body = ?3 WHERE collection = ?1 AND doc_id = ?2",
            params![self.name, doc_id, body],
        )?;
        Ok(())
    }

    fn remove(&self, conn: &Connection, doc_id: &str) -> StoreResult<u64> {
        let removed = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
            params![self.name, doc_id],
        )?;
        Ok(removed as u64)
    }

    fn update_matching(
        &self,
        filter: &Document,
        set: &Document,
        many: bool,
    ) -> StoreResult<UpdateOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut outcome = UpdateOutcome::default();

        let mut targets = self.load_matching(&tx, filter)?;
        if !many {
            targets.truncate(1);
        }
        for mut stored in targets {
            outcome.matched += 1;
            if apply_set(&mut stored.doc, set)? {
                self.overwrite(&tx, &stored.doc_id, &stored.doc)?;
                outcome.modified += 1;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn delete_matching(&self, filter: &Document, many: bool) -> StoreResult<u64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut targets = self.load_matching(&tx, filter)?;
        if !many {
            targets.truncate(1);
        }
        let mut removed = 0;
        for stored in targets {
            removed += self.remove(&tx, &stored.doc_id)?;
        }

        tx.commit()?;
        Ok(removed)
    }
}

impl DocumentCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, filter: &Document, options: &FindOptions) -> StoreResult<Vec<Document>> {
        let conn = self.lock()?;
        let mut docs: Vec<Document> = self
            .load_matching(&conn, filter)?
            .into_iter()
            .map(|stored| stored.doc)
            .collect();
        drop(conn);

        sort_documents(&mut docs, &options.sort);
        let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
        let limit = options
            .limit
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(docs.into_iter().skip(skip).take(limit).collect())
    }

    fn count(&self, filter: &Document) -> StoreResult<u64> {
        let conn = self.lock()?;
        Ok(self.load_matching(&conn, filter)?.len() as u64)
    }

    fn insert_one(&self, doc: Document) -> StoreResult<()> {
        let conn = self.lock()?;
        self.insert(&conn, &doc)
    }

    fn insert_many(&self, docs: Vec<Document>) -> StoreResult<u64> {
        let conn = self.lock()?;
        let mut inserted = 0;
        for doc in &docs {
            if let Err(err) = self.insert(&conn, doc) {
                debug!(
                    "event=insert_many module=store status=error collection={} inserted={} error={}",
                    self.name, inserted, err
                );
                return Err(err);
            }
            inserted += 1;
        }
        Ok(inserted)
    }

    fn replace_one(
        &self,
        filter: &Document,
        mut doc: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut outcome = UpdateOutcome::default();

        match self.load_matching(&tx, filter)?.into_iter().next() {
            Some(stored) => {
                let existing_id = stored.doc.get(ID_KEY).cloned().unwrap_or(Value::Null);
                match doc.get(ID_KEY) {
                    Some(id) if *id != existing_id => return Err(StoreError::ImmutableId),
                    Some(_) => {}
                    None => {
                        doc.insert(ID_KEY.to_string(), existing_id);
                    }
                }
                outcome.matched = 1;
                if stored.doc != doc {
                    self.overwrite(&tx, &stored.doc_id, &doc)?;
                    outcome.modified = 1;
                }
            }
            None if upsert => {
                if !doc.contains_key(ID_KEY) {
                    let id = equality_value(filter, ID_KEY)
                        .cloned()
                        .ok_or(StoreError::MissingId)?;
                    doc.insert(ID_KEY.to_string(), id);
                }
                self.insert(&tx, &doc)?;
                outcome.upserted = 1;
            }
            None => {}
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn update_one(&self, filter: &Document, set: &Document) -> StoreResult<UpdateOutcome> {
        self.update_matching(filter, set, false)
    }

    fn update_many(&self, filter: &Document, set: &Document) -> StoreResult<UpdateOutcome> {
        self.update_matching(filter, set, true)
    }

    fn delete_one(&self, filter: &Document) -> StoreResult<u64> {
        self.delete_matching(filter, false)
    }

    fn delete_many(&self, filter: &Document) -> StoreResult<u64> {
        self.delete_matching(filter, true)
    }
}
