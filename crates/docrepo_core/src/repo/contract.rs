//! Storage-agnostic repository contract.
//!
//! # Responsibility
//! - Name the entity operations services depend on, so callers can hold a
//!   `&dyn Repo<T>` and tests can substitute their own implementation.
//!
//! # See also
//! - `repository::Repository`, the document-store implementation.

use crate::context::Context;
use crate::model::entity::Entity;
use crate::repo::error::RepoResult;
use crate::repo::repository::Repository;
use crate::store::DocumentCollection;

/// Per-entity CRUD and batch operations.
///
/// Batch operations are not atomic: a failure part-way leaves earlier writes
/// in place.
pub trait Repo<T: Entity> {
    fn get(&self, ctx: &Context, id: &T::Id) -> RepoResult<T>;
    fn create(&self, ctx: &Context, entity: T) -> RepoResult<T>;
    fn update(&self, ctx: &Context, entity: T) -> RepoResult<T>;
    fn upsert(&self, ctx: &Context, entity: T) -> RepoResult<T>;
    fn patch(&self, ctx: &Context, entity: &mut T) -> RepoResult<()>;
    fn delete(&self, ctx: &Context, entity: &mut T) -> RepoResult<()>;
    fn batch_create(&self, ctx: &Context, entities: Vec<T>) -> RepoResult<Vec<T>>;
    fn batch_update(&self, ctx: &Context, entities: Vec<T>) -> RepoResult<Vec<T>>;
    /// Returns how many records were removed or soft-deleted.
    fn batch_delete(&self, ctx: &Context, entities: &[T]) -> RepoResult<u64>;
    fn batch_delete_by_ids(&self, ctx: &Context, ids: &[T::Id]) -> RepoResult<u64>;
}

impl<T: Entity, C: DocumentCollection> Repo<T> for Repository<T, C> {
    fn get(&self, ctx: &Context, id: &T::Id) -> RepoResult<T> {
        Repository::get(self, ctx, id)
    }

    fn create(&self, ctx: &Context, entity: T) -> RepoResult<T> {
        Repository::create(self, ctx, entity)
    }

    fn update(&self, ctx: &Context, entity: T) -> RepoResult<T> {
        Repository::update(self, ctx, entity)
    }

    fn upsert(&self, ctx: &Context, entity: T) -> RepoResult<T> {
        Repository::upsert(self, ctx, entity)
    }

    fn patch(&self, ctx: &Context, entity: &mut T) -> RepoResult<()> {
        Repository::patch(self, ctx, entity)
    }

    fn delete(&self, ctx: &Context, entity: &mut T) -> RepoResult<()> {
        Repository::delete(self, ctx, entity)
    }

    fn batch_create(&self, ctx: &Context, entities: Vec<T>) -> RepoResult<Vec<T>> {
        Repository::batch_create(self, ctx, entities)
    }

    fn batch_update(&self, ctx: &Context, entities: Vec<T>) -> RepoResult<Vec<T>> {
        Repository::batch_update(self, ctx, entities)
    }

    fn batch_delete(&self, ctx: &Context, entities: &[T]) -> RepoResult<u64> {
        Repository::batch_delete(self, ctx, entities)
    }

    fn batch_delete_by_ids(&self, ctx: &Context, ids: &[T::Id]) -> RepoResult<u64> {
        Repository::batch_delete_by_ids(self, ctx, ids)
    }
}
