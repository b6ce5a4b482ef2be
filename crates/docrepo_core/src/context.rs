//! Request context carrier threaded through every repository call.
//!
//! # Responsibility
//! - Carry operator/tenant/app identity and trace/request ids.
//! - Carry the per-call repository policy override and an optional deadline.
//!
//! # Invariants
//! - A `Context` is immutable: every `with_*` call returns a new carrier and
//!   leaves the receiver untouched.
//! - Lookups resolve to the most recently set value for a key.
//! - Cloning is cheap (one `Arc` bump); chains share their ancestors.

use crate::model::policy::{DataIsolation, FixStrategy, ReauditMode, RepoPolicy, SoftDeleteMode};
use std::any::{Any, TypeId};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// String-valued identity and tracing fields known to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextField {
    TraceId,
    RequestId,
    Operator,
    TenantId,
    AppId,
}

impl ContextField {
    pub const ALL: [ContextField; 5] = [
        Self::TraceId,
        Self::RequestId,
        Self::Operator,
        Self::TenantId,
        Self::AppId,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TraceId => "trace_id",
            Self::RequestId => "request_id",
            Self::Operator => "operator",
            Self::TenantId => "tenant_id",
            Self::AppId => "app_id",
        }
    }

    /// Whether the value travels to downstream calls (see [`Context::outgoing`]).
    ///
    /// The request id identifies a single hop and stays local.
    pub fn is_pass_through(self) -> bool {
        !matches!(self, Self::RequestId)
    }
}

impl Display for ContextField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A required identity field is absent from the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingContext(pub ContextField);

impl Display for MissingContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "there is no {} in context", self.0)
    }
}

impl Error for MissingContext {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Key {
    Field(ContextField),
    Policy,
    Deadline,
    Custom(TypeId),
}

struct Node {
    key: Key,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Node>>,
}

/// Immutable chained key-value carrier.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Node>>,
}

impl Context {
    /// Empty context with no identity, no override and no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    fn with(&self, key: Key, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            head: Some(Arc::new(Node {
                key,
                value,
                parent: self.head.clone(),
            })),
        }
    }

    fn lookup(&self, key: Key) -> Option<&(dyn Any + Send + Sync)> {
        let mut cursor = self.head.as_deref();
        while let Some(node) = cursor {
            if node.key == key {
                return Some(node.value.as_ref());
            }
            cursor = node.parent.as_deref();
        }
        None
    }

    pub fn with_field(&self, field: ContextField, value: impl Into<String>) -> Self {
        self.with(Key::Field(field), Arc::new(value.into()))
    }

    pub fn field(&self, field: ContextField) -> Option<&str> {
        self.lookup(Key::Field(field))
            .and_then(|value| value.downcast_ref::<String>())
            .map(String::as_str)
    }

    /// Returns the field value or a [`MissingContext`] error naming it.
    pub fn require(&self, field: ContextField) -> Result<&str, MissingContext> {
        self.field(field).ok_or(MissingContext(field))
    }

    pub fn with_trace_id(&self, value: impl Into<String>) -> Self {
        self.with_field(ContextField::TraceId, value)
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.field(ContextField::TraceId)
    }

    /// Sets a random trace id unless one is already present.
    pub fn ensure_trace_id(&self) -> Self {
        if self.trace_id().is_some() {
            return self.clone();
        }
        self.with_trace_id(Uuid::new_v4().to_string())
    }

    pub fn with_request_id(&self, value: impl Into<String>) -> Self {
        self.with_field(ContextField::RequestId, value)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.field(ContextField::RequestId)
    }

    pub fn with_operator(&self, value: impl Into<String>) -> Self {
        self.with_field(ContextField::Operator, value)
    }

    pub fn operator(&self) -> Option<&str> {
        self.field(ContextField::Operator)
    }

    pub fn with_tenant_id(&self, value: impl Into<String>) -> Self {
        self.with_field(ContextField::TenantId, value)
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.field(ContextField::TenantId)
    }

    pub fn with_app_id(&self, value: impl Into<String>) -> Self {
        self.with_field(ContextField::AppId, value)
    }

    pub fn app_id(&self) -> Option<&str> {
        self.field(ContextField::AppId)
    }

    /// Replaces the whole per-call policy override.
    pub fn with_policy(&self, policy: RepoPolicy) -> Self {
        self.with(Key::Policy, Arc::new(policy))
    }

    /// Current policy override, or an empty one when none was set.
    pub fn policy_override(&self) -> RepoPolicy {
        self.lookup(Key::Policy)
            .and_then(|value| value.downcast_ref::<RepoPolicy>())
            .cloned()
            .unwrap_or_default()
    }

    pub fn with_isolation(&self, isolation: DataIsolation) -> Self {
        let mut policy = self.policy_override();
        policy.isolation = Some(isolation);
        self.with_policy(policy)
    }

    pub fn with_soft_delete(&self, soft_delete: SoftDeleteMode) -> Self {
        let mut policy = self.policy_override();
        policy.soft_delete = Some(soft_delete);
        self.with_policy(policy)
    }

    pub fn with_fix_strategy(&self, fix_strategy: FixStrategy) -> Self {
        let mut policy = self.policy_override();
        policy.fix_strategy = Some(fix_strategy);
        self.with_policy(policy)
    }

    pub fn with_reaudit(&self, reaudit: ReauditMode) -> Self {
        let mut policy = self.policy_override();
        policy.reaudit = Some(reaudit);
        self.with_policy(policy)
    }

    /// Sets an absolute deadline. An earlier deadline already in the chain wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let effective = match self.deadline() {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        self.with(Key::Deadline, Arc::new(effective))
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.lookup(Key::Deadline)
            .and_then(|value| value.downcast_ref::<Instant>())
            .copied()
    }

    /// Time left before the deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline()
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Attaches a caller-defined typed value, keyed by its type.
    pub fn with_value<V: Any + Send + Sync>(&self, value: V) -> Self {
        self.with(Key::Custom(TypeId::of::<V>()), Arc::new(value))
    }

    pub fn value<V: Any + Send + Sync>(&self) -> Option<&V> {
        self.lookup(Key::Custom(TypeId::of::<V>()))
            .and_then(|value| value.downcast_ref::<V>())
    }

    /// Context for a downstream call: pass-through fields and the deadline.
    ///
    /// The request id, policy override and custom values are dropped.
    pub fn outgoing(&self) -> Self {
        let mut next = Context::new();
        for field in ContextField::ALL {
            if !field.is_pass_through() {
                continue;
            }
            if let Some(value) = self.field(field) {
                next = next.with_field(field, value);
            }
        }
        if let Some(deadline) = self.deadline() {
            next = next.with_deadline(deadline);
        }
        next
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("Context");
        for field in ContextField::ALL {
            if let Some(value) = self.field(field) {
                debug.field(field.as_str(), &value);
            }
        }
        debug
            .field("policy", &self.policy_override())
            .field("deadline", &self.deadline())
            .finish()
    }
}
