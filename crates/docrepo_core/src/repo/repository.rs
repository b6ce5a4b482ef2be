//! Generic repository engine.
//!
//! # Responsibility
//! - Expose CRUD, patch, paging and batch operations for any [`Entity`].
//! - Apply audit stamping, isolation, soft delete and optimistic locking
//!   from the entity's capabilities and the effective policy, so callers
//!   never build those conditions themselves.
//!
//! # Invariants
//! - Every operation resolves the policy once and injects isolation and
//!   soft-delete conditions before touching storage (`patch_raw` may opt out).
//! - Writes of an entity with update audit are compare-and-swap on the
//!   update-time the caller last observed.
//! - Only `NotFound` on single-record reads is retried, and only under the
//!   backoff fix strategy.
//! - The context deadline is checked before every store call.
//!
//! # See also
//! - `repo::builder` for filter and payload derivation.
//! - `model::audit` for stamping rules.

use crate::context::Context;
use crate::logging::ctx_prefix;
use crate::model::audit::{
    delete_stamp_fields, stamp_create, stamp_delete, update_lock_and_audit, update_stamp_fields,
    CREATED_AT, UPDATED_AT,
};
use crate::model::entity::{Capabilities, Entity, EntityId, ID_KEY};
use crate::model::page::{PagedResult, Pager, SortPair, SortSpec};
use crate::model::policy::{resolve_policy, EffectivePolicy, FixStrategy, RepoPolicy, RetryConfig};
use crate::repo::builder::{
    build_isolation_filter, build_optimistic_lock_filter, build_patch_payload,
    build_soft_delete_filter,
};
use crate::repo::error::{ErrorKind, RepoError, RepoResult};
use crate::repo::schema::{validate_schema, SchemaError};
use crate::store::{Document, DocumentCollection, FindOptions, StoreError, UpdateOutcome};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::marker::PhantomData;
use std::time::Instant;

/// Filtered, paged and sorted query.
#[derive(Debug, Clone, Default)]
pub struct PageQueryInput {
    pub filter: Document,
    /// `None` returns every matching row.
    pub pager: Option<Pager>,
    /// `None` or empty falls back to ascending `created_at` when available.
    pub sort: Option<SortSpec>,
}

/// Caller-built partial update.
#[derive(Debug, Clone, Default)]
pub struct PatchRawInput {
    pub filter: Document,
    /// Dot-path assignments applied as `$set`.
    pub payload: Document,
    /// Update every match instead of the first one.
    pub many: bool,
    /// Use `filter` as is, without isolation or soft-delete conditions.
    pub skip_inject_cond: bool,
}

/// Repository for entity `T` stored in collection `C`.
pub struct Repository<T, C> {
    collection: C,
    policy: RepoPolicy,
    retry: RetryConfig,
    caps: Capabilities,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, C: DocumentCollection> Repository<T, C> {
    /// Builds a repository after checking `T`'s document shape.
    ///
    /// # Errors
    /// - `SchemaError::NotInline` when a capability group is nested.
    pub fn new(collection: C) -> Result<Self, SchemaError> {
        let caps = match validate_schema::<T>() {
            Ok(caps) => caps,
            Err(err) => {
                error!(
                    "event=repo_init module=repo status=error collection={} error={}",
                    collection.name(),
                    err
                );
                return Err(err);
            }
        };

        info!(
            "event=repo_init module=repo status=ok collection={} entity={} {}",
            collection.name(),
            std::any::type_name::<T>(),
            caps
        );
        Ok(Self {
            collection,
            policy: RepoPolicy::default(),
            retry: RetryConfig::default(),
            caps,
            _entity: PhantomData,
        })
    }

    /// Sets the repository default policy.
    pub fn with_policy(mut self, policy: RepoPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    pub fn default_policy(&self) -> &RepoPolicy {
        &self.policy
    }

    /// Policy in force for a call made with `ctx`.
    pub fn merged_policy(&self, ctx: &Context) -> EffectivePolicy {
        resolve_policy(&ctx.policy_override(), &self.policy)
    }

    /// Adds isolation and soft-delete conditions to `filter`.
    pub fn inject_conditions(&self, ctx: &Context, filter: Document) -> RepoResult<Document> {
        self.inject_with(&self.merged_policy(ctx), ctx, filter)
    }

    pub fn get(&self, ctx: &Context, id: &T::Id) -> RepoResult<T> {
        self.observe(ctx, "get", || {
            let filter = Self::id_filter(id)?;
            self.fetch_one(ctx, "get", filter)
        })
    }

    /// Exactly one record matching `filter`, or `NotFound`.
    pub fn get_by_filter(&self, ctx: &Context, filter: Document) -> RepoResult<T> {
        self.observe(ctx, "get_by_filter", || {
            self.fetch_one(ctx, "get_by_filter", filter)
        })
    }

    pub fn find(&self, ctx: &Context, filter: Document) -> RepoResult<Vec<T>> {
        self.find_with(ctx, filter, FindOptions::default())
    }

    /// `find` with explicit sort, skip and limit.
    pub fn find_with(
        &self,
        ctx: &Context,
        filter: Document,
        mut options: FindOptions,
    ) -> RepoResult<Vec<T>> {
        self.observe(ctx, "find", || {
            let filter = self.inject_conditions(ctx, filter)?;
            if options.sort.is_empty() {
                options.sort = self.default_sort();
            }
            let docs = self.store(ctx, "find", |coll| coll.find(&filter, &options))?;
            docs.into_iter().map(Self::decode).collect()
        })
    }

    /// Counts all matches, then fetches the requested page.
    pub fn page_query(&self, ctx: &Context, input: PageQueryInput) -> RepoResult<PagedResult<T>> {
        self.observe(ctx, "page_query", || {
            let filter = self.inject_conditions(ctx, input.filter)?;
            let total_count = self.store(ctx, "page_query", |coll| coll.count(&filter))?;

            let (limit, skip) = input
                .pager
                .as_ref()
                .map_or((None, 0), Pager::limit_and_skip);
            let sort = match input.sort {
                Some(spec) if !spec.is_empty() => spec.pairs().to_vec(),
                _ => self.default_sort(),
            };
            let options = FindOptions { sort, skip, limit };

            let docs = self.store(ctx, "page_query", |coll| coll.find(&filter, &options))?;
            let rows = docs
                .into_iter()
                .map(Self::decode)
                .collect::<RepoResult<Vec<T>>>()?;
            Ok(PagedResult { rows, total_count })
        })
    }

    /// Stamps and inserts a new record.
    ///
    /// # Errors
    /// - `Validation` for a zero id, `Conflict` when the id is taken.
    pub fn create(&self, ctx: &Context, mut entity: T) -> RepoResult<T> {
        self.observe(ctx, "create", || {
            Self::ensure_id(&entity)?;
            stamp_create(ctx, &mut entity)?;
            let doc = Self::encode(&entity)?;
            self.store_write(ctx, "create", |coll| coll.insert_one(doc))?;
            Ok(entity)
        })
    }

    /// Replaces the stored record, guarded by the optimistic lock.
    pub fn update(&self, ctx: &Context, mut entity: T) -> RepoResult<T> {
        self.observe(ctx, "update", || {
            self.replace(ctx, &mut entity, false, "update")?;
            Ok(entity)
        })
    }

    /// Update, or insert when nothing matches.
    ///
    /// An entity whose create-time is unset is treated as a fresh create:
    /// fully stamped and matched by id alone.
    pub fn upsert(&self, ctx: &Context, mut entity: T) -> RepoResult<T> {
        self.observe(ctx, "upsert", || {
            self.replace(ctx, &mut entity, true, "upsert")?;
            Ok(entity)
        })
    }

    /// Writes the entity's non-zero fields, leaving the rest of the record as is.
    ///
    /// `entity` is re-stamped in place. `_id`, creation audit and tenant
    /// fields are never written.
    pub fn patch(&self, ctx: &Context, entity: &mut T) -> RepoResult<()> {
        self.observe(ctx, "patch", || {
            Self::ensure_id(entity)?;
            let policy = self.merged_policy(ctx);
            let filter = self.lock_and_filter(ctx, &policy, entity)?;
            let payload = build_patch_payload(entity)?;

            let outcome = self.store(ctx, "patch", |coll| coll.update_one(&filter, &payload))?;
            self.classify_outcome(ctx, "patch", filter, &outcome)
        })
    }

    /// Applies a caller-built payload; returns the matched count.
    ///
    /// Update audit fields are added to the payload. A filter carrying
    /// `updated_at` acts as an optimistic lock.
    pub fn patch_raw(&self, ctx: &Context, input: PatchRawInput) -> RepoResult<u64> {
        self.observe(ctx, "patch_raw", || {
            let filter = if input.skip_inject_cond {
                input.filter
            } else {
                self.inject_conditions(ctx, input.filter)?
            };
            let mut payload = input.payload;
            payload.extend(update_stamp_fields::<T>(ctx)?);

            let outcome = self.store(ctx, "patch_raw", |coll| {
                if input.many {
                    coll.update_many(&filter, &payload)
                } else {
                    coll.update_one(&filter, &payload)
                }
            })?;

            if outcome.matched == 0 {
                return Err(RepoError::NotFound);
            }
            if filter.contains_key(UPDATED_AT) && outcome.modified == 0 {
                return Err(RepoError::Conflict("optimistic locking failed".to_string()));
            }
            Ok(outcome.matched)
        })
    }

    /// Soft-deletes through an update when applicable, else removes the record.
    ///
    /// `entity` carries the delete stamp afterwards.
    pub fn delete(&self, ctx: &Context, entity: &mut T) -> RepoResult<()> {
        self.observe(ctx, "delete", || {
            let soft = stamp_delete(ctx, entity)?;
            let policy = self.merged_policy(ctx);
            if soft && policy.soft_delete.is_enabled() {
                return self.replace(ctx, entity, false, "delete");
            }

            let filter = self.inject_with(&policy, ctx, Self::id_filter(entity.id())?)?;
            let deleted = self.store(ctx, "delete", |coll| coll.delete_one(&filter))?;
            if deleted == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        })
    }

    /// Stamps every entity, then inserts them in one ordered call.
    ///
    /// Not atomic: records before a duplicate stay inserted.
    pub fn batch_create(&self, ctx: &Context, mut entities: Vec<T>) -> RepoResult<Vec<T>> {
        self.observe(ctx, "batch_create", || {
            if entities.is_empty() {
                return Ok(entities);
            }
            let mut docs = Vec::with_capacity(entities.len());
            for entity in &mut entities {
                Self::ensure_id(entity)?;
                stamp_create(ctx, entity)?;
                docs.push(Self::encode(entity)?);
            }
            self.store_write(ctx, "batch_create", |coll| coll.insert_many(docs))?;
            Ok(entities)
        })
    }

    /// Updates one by one; the first failure aborts the rest.
    pub fn batch_update(&self, ctx: &Context, mut entities: Vec<T>) -> RepoResult<Vec<T>> {
        self.observe(ctx, "batch_update", || {
            for entity in &mut entities {
                self.replace(ctx, entity, false, "batch_update")?;
            }
            Ok(entities)
        })
    }

    pub fn batch_delete(&self, ctx: &Context, entities: &[T]) -> RepoResult<u64> {
        let ids: Vec<T::Id> = entities.iter().map(|entity| entity.id().clone()).collect();
        self.batch_delete_by_ids(ctx, &ids)
    }

    pub fn batch_delete_by_ids(&self, ctx: &Context, ids: &[T::Id]) -> RepoResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = serde_json::to_value(ids).map_err(RepoError::from)?;
        let mut filter = Document::new();
        filter.insert(ID_KEY.to_string(), json!({ "$in": ids }));
        self.batch_delete_by_filter(ctx, filter)
    }

    /// Deletes every match; returns how many records were affected.
    pub fn batch_delete_by_filter(&self, ctx: &Context, filter: Document) -> RepoResult<u64> {
        self.observe(ctx, "batch_delete", || {
            let policy = self.merged_policy(ctx);
            let filter = self.inject_with(&policy, ctx, filter)?;

            let affected = if self.caps.deleted && policy.soft_delete.is_enabled() {
                let mut set = delete_stamp_fields::<T>(ctx)?;
                set.extend(update_stamp_fields::<T>(ctx)?);
                self.store(ctx, "batch_delete", |coll| coll.update_many(&filter, &set))?
                    .matched
            } else {
                self.store(ctx, "batch_delete", |coll| coll.delete_many(&filter))?
            };

            if affected == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(affected)
        })
    }

    fn replace(
        &self,
        ctx: &Context,
        entity: &mut T,
        upsert: bool,
        op: &'static str,
    ) -> RepoResult<()> {
        Self::ensure_id(entity)?;
        let policy = self.merged_policy(ctx);

        let fresh = upsert
            && entity
                .created_audit()
                .is_some_and(|created| created.created_at_raw().is_none());
        let filter = if fresh {
            stamp_create(ctx, entity)?;
            self.inject_with(&policy, ctx, Self::id_filter(entity.id())?)?
        } else {
            self.lock_and_filter(ctx, &policy, entity)?
        };

        let doc = Self::encode(entity)?;
        let outcome = self.store_write(ctx, op, |coll| coll.replace_one(&filter, doc, upsert))?;
        if upsert && outcome.upserted > 0 {
            return Ok(());
        }
        self.classify_outcome(ctx, op, filter, &outcome)
    }

    /// Captures the lock value, re-stamps and builds the guarded id filter.
    fn lock_and_filter(
        &self,
        ctx: &Context,
        policy: &EffectivePolicy,
        entity: &mut T,
    ) -> RepoResult<Document> {
        let lock = update_lock_and_audit(ctx, entity, policy)?;
        let mut filter = Self::id_filter(entity.id())?;
        build_optimistic_lock_filter(&lock, &mut filter);
        self.inject_with(policy, ctx, filter)
    }

    /// Maps replace/patch counts to `NotFound` or `Conflict`.
    ///
    /// With no match, the lock is dropped and the filter re-counted: a record
    /// that still exists was advanced by another writer.
    fn classify_outcome(
        &self,
        ctx: &Context,
        op: &'static str,
        mut filter: Document,
        outcome: &UpdateOutcome,
    ) -> RepoResult<()> {
        let locked = filter.contains_key(UPDATED_AT);
        if outcome.matched == 0 {
            if locked {
                filter.remove(UPDATED_AT);
                let existing = self.store(ctx, op, |coll| coll.count(&filter))?;
                if existing > 0 {
                    return Err(RepoError::Conflict("data is modified by other".to_string()));
                }
            }
            return Err(RepoError::NotFound);
        }
        if locked && outcome.modified == 0 {
            return Err(RepoError::Conflict("optimistic locking failed".to_string()));
        }
        Ok(())
    }

    fn fetch_one(&self, ctx: &Context, op: &'static str, filter: Document) -> RepoResult<T> {
        let policy = self.merged_policy(ctx);
        let filter = self.inject_with(&policy, ctx, filter)?;
        let find_once = || -> RepoResult<T> {
            let doc = self
                .store(ctx, op, |coll| coll.find_one(&filter))?
                .ok_or(RepoError::NotFound)?;
            Self::decode(doc)
        };

        match policy.fix_strategy {
            FixStrategy::None => find_once(),
            FixStrategy::Backoff => self.with_backoff(ctx, find_once),
        }
    }

    /// Retries `NotFound` with exponential backoff and jitter.
    fn with_backoff<R>(
        &self,
        ctx: &Context,
        mut call: impl FnMut() -> RepoResult<R>,
    ) -> RepoResult<R> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Err(err) if err.is(ErrorKind::NotFound) && attempt < attempts => {
                    let delay = self.retry.delay_after(attempt);
                    if ctx.remaining().is_some_and(|left| left <= delay) {
                        return Err(RepoError::DeadlineExceeded);
                    }
                    debug!(
                        "event=read_retry module=repo status=retry collection={} attempt={} delay_ms={} {}",
                        self.collection.name(),
                        attempt,
                        delay.as_millis(),
                        ctx_prefix(ctx)
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn inject_with(
        &self,
        policy: &EffectivePolicy,
        ctx: &Context,
        mut filter: Document,
    ) -> RepoResult<Document> {
        build_isolation_filter(policy, &self.caps, ctx, &mut filter)?;
        build_soft_delete_filter(policy, &self.caps, &mut filter);
        Ok(filter)
    }

    fn default_sort(&self) -> Vec<SortPair> {
        if self.caps.created {
            vec![SortPair::asc(CREATED_AT)]
        } else {
            Vec::new()
        }
    }

    fn store<R>(
        &self,
        ctx: &Context,
        op: &'static str,
        call: impl FnOnce(&C) -> Result<R, StoreError>,
    ) -> RepoResult<R> {
        if ctx.is_expired() {
            return Err(RepoError::DeadlineExceeded);
        }
        call(&self.collection).map_err(RepoError::storage(op))
    }

    /// Like `store`, with duplicate keys reported as `Conflict`.
    fn store_write<R>(
        &self,
        ctx: &Context,
        op: &'static str,
        call: impl FnOnce(&C) -> Result<R, StoreError>,
    ) -> RepoResult<R> {
        self.store(ctx, op, call).map_err(|err| match err {
            RepoError::Storage {
                source: StoreError::DuplicateKey(id),
                ..
            } => RepoError::Conflict(format!("duplicate key {id}")),
            other => other,
        })
    }

    fn observe<R>(
        &self,
        ctx: &Context,
        op: &'static str,
        call: impl FnOnce() -> RepoResult<R>,
    ) -> RepoResult<R> {
        let started_at = Instant::now();
        let result = call();
        let duration_ms = started_at.elapsed().as_millis();
        let collection = self.collection.name();

        match &result {
            Ok(_) => debug!(
                "event=repo_call module=repo status=ok op={} collection={} duration_ms={} {}",
                op,
                collection,
                duration_ms,
                ctx_prefix(ctx)
            ),
            Err(err) => match err.kind() {
                ErrorKind::NotFound | ErrorKind::Conflict => debug!(
                    "event=repo_call module=repo status=rejected op={} collection={} duration_ms={} error_kind={} {}",
                    op,
                    collection,
                    duration_ms,
                    err.kind(),
                    ctx_prefix(ctx)
                ),
                ErrorKind::Storage | ErrorKind::Codec => error!(
                    "event=repo_call module=repo status=error op={} collection={} duration_ms={} error_kind={} error={} {}",
                    op,
                    collection,
                    duration_ms,
                    err.kind(),
                    err,
                    ctx_prefix(ctx)
                ),
                _ => warn!(
                    "event=repo_call module=repo status=error op={} collection={} duration_ms={} error_kind={} error={} {}",
                    op,
                    collection,
                    duration_ms,
                    err.kind(),
                    err,
                    ctx_prefix(ctx)
                ),
            },
        }
        result
    }

    fn ensure_id(entity: &T) -> RepoResult<()> {
        if entity.id().is_zero() {
            return Err(RepoError::Validation("id can not be empty".to_string()));
        }
        Ok(())
    }

    fn id_filter(id: &T::Id) -> RepoResult<Document> {
        let mut filter = Document::new();
        filter.insert(ID_KEY.to_string(), serde_json::to_value(id)?);
        Ok(filter)
    }

    fn encode(entity: &T) -> RepoResult<Document> {
        match serde_json::to_value(entity)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(RepoError::Validation(
                "entity must serialize to an object".to_string(),
            )),
        }
    }

    fn decode(doc: Document) -> RepoResult<T> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}
