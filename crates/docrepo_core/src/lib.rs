//! Generic repository layer over a JSON document store.
//!
//! Entities opt into audit stamping, tenant scoping, soft delete and run
//! context recording through capability accessors on [`Entity`];
//! [`Repository`] turns those capabilities into filters, payloads and
//! optimistic locks.

pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod store;

pub use context::{Context, ContextField, MissingContext};
pub use logging::{ctx_prefix, default_log_level, init_logging, logging_status, LoggingError};
pub use model::audit::{
    ctx_audit, AuditTarget, CreateAudit, CreateAuditMs, CreatedAuditor, DeleteAudit,
    DeleteAuditMs, DeletedAuditor, OperatorAudit, OperatorCarrier, RunContext, RunContextAudit,
    RunContextRecorder, TenantAudit, TenantCarrier, UpdateAudit, UpdateAuditMs, UpdatedAuditor,
};
pub use model::entity::{Capabilities, Entity, EntityId};
pub use model::page::{PagedResult, Pager, SortPair, SortSpec};
pub use model::policy::{
    DataIsolation, EffectivePolicy, FixStrategy, ReauditMode, RepoPolicy, RetryConfig,
    SoftDeleteMode,
};
pub use repo::{
    validate_schema, ErrorKind, PageQueryInput, PatchRawInput, Repo, RepoError, RepoResult,
    Repository, SchemaError,
};
pub use store::{
    Document, DocumentCollection, FindOptions, SqliteCollection, SqliteStore, StoreError,
    UpdateOutcome,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
