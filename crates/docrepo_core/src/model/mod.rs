//! Domain model for repository-managed records.
//!
//! # Responsibility
//! - Define the entity contract and its optional capabilities.
//! - Define audit groups, policy modes and paging shapes used by the engine.
//!
//! # Invariants
//! - Every record is identified by a stable, non-zero `_id`.
//! - Cross-cutting behavior is driven by capabilities, never by entity type names.

pub mod audit;
pub mod entity;
pub mod page;
pub mod policy;
