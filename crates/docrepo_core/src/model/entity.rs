//! Entity contract and capability probes.
//!
//! # Responsibility
//! - Define what a repository-managed record must provide (`Entity`).
//! - Expose optional audit/tenant capabilities as accessor methods the
//!   engine probes at runtime.
//!
//! # Invariants
//! - The identifier serializes at document key `_id` and is never zero on create.
//! - Capability accessors are consistent: `x()` is `Some` iff `x_mut()` is `Some`.
//! - Audit and tenant groups are embedded with `#[serde(flatten)]` so their
//!   fields live at the document's top level (checked by `validate_schema`).

use crate::model::audit::{
    CreatedAuditor, DeletedAuditor, RunContextRecorder, TenantCarrier, UpdatedAuditor,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Debug, Display, Formatter};

pub use crate::store::ID_KEY;

/// Scalar identifier types accepted as entity keys.
pub trait EntityId:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Whether this is the type's empty value (rejected on create).
    fn is_zero(&self) -> bool;

    /// A non-zero value used when probing an entity's document shape.
    fn schema_probe() -> Self;
}

impl EntityId for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }

    fn schema_probe() -> Self {
        "schema-probe".to_string()
    }
}

impl EntityId for i32 {
    fn is_zero(&self) -> bool {
        *self == 0
    }

    fn schema_probe() -> Self {
        1
    }
}

impl EntityId for i64 {
    fn is_zero(&self) -> bool {
        *self == 0
    }

    fn schema_probe() -> Self {
        1
    }
}

impl EntityId for u64 {
    fn is_zero(&self) -> bool {
        *self == 0
    }

    fn schema_probe() -> Self {
        1
    }
}

/// A record managed by [`crate::Repository`].
///
/// Only `id`/`set_id` are required. Every capability accessor defaults to
/// `None`; an entity without capabilities behaves as a bare keyed record.
pub trait Entity: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {
    type Id: EntityId;

    fn id(&self) -> &Self::Id;
    fn set_id(&mut self, id: Self::Id);

    fn created_audit(&self) -> Option<&dyn CreatedAuditor> {
        None
    }

    fn created_audit_mut(&mut self) -> Option<&mut dyn CreatedAuditor> {
        None
    }

    fn updated_audit(&self) -> Option<&dyn UpdatedAuditor> {
        None
    }

    fn updated_audit_mut(&mut self) -> Option<&mut dyn UpdatedAuditor> {
        None
    }

    fn deleted_audit(&self) -> Option<&dyn DeletedAuditor> {
        None
    }

    fn deleted_audit_mut(&mut self) -> Option<&mut dyn DeletedAuditor> {
        None
    }

    fn tenant(&self) -> Option<&dyn TenantCarrier> {
        None
    }

    fn tenant_mut(&mut self) -> Option<&mut dyn TenantCarrier> {
        None
    }

    fn run_context(&self) -> Option<&dyn RunContextRecorder> {
        None
    }

    fn run_context_mut(&mut self) -> Option<&mut dyn RunContextRecorder> {
        None
    }
}

/// Type-level capability set, probed once from `T::default()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub created: bool,
    pub updated: bool,
    pub deleted: bool,
    pub tenant: bool,
    pub run_context: bool,
}

impl Capabilities {
    pub fn of<T: Entity>() -> Self {
        let probe = T::default();
        Self {
            created: probe.created_audit().is_some(),
            updated: probe.updated_audit().is_some(),
            deleted: probe.deleted_audit().is_some(),
            tenant: probe.tenant().is_some(),
            run_context: probe.run_context().is_some(),
        }
    }
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created_audit={} updated_audit={} deleted_audit={} tenant={} run_context={}",
            self.created, self.updated, self.deleted, self.tenant, self.run_context
        )
    }
}
