//! Repository engine and its supporting pieces.
//!
//! # Responsibility
//! - Derive filters and payloads from entity capabilities (`builder`).
//! - Reject entity shapes the engine cannot address (`schema`).
//! - Run CRUD, patch, paging and batch operations (`repository`).
//! - Expose the operation surface as a trait for callers (`contract`).
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `Conflict`) in
//!   addition to storage errors.

pub mod builder;
pub mod contract;
pub mod error;
pub mod repository;
pub mod schema;

pub use contract::Repo;
pub use error::{ErrorKind, RepoError, RepoResult};
pub use repository::{PageQueryInput, PatchRawInput, Repository};
pub use schema::{validate_schema, SchemaError};
