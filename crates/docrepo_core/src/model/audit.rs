//! Audit groups and the stamping engine.
//!
//! # Responsibility
//! - Define create/update/delete audit groups in calendar and epoch-millisecond
//!   representations, plus tenant scope and run context groups.
//! - Stamp those groups from the request [`Context`] before writes.
//!
//! # Invariants
//! - Create stamps are written once, at creation.
//! - Update stamps are re-written on every mutation and strictly advance:
//!   [`now`] and [`now_millis`] never return the same value twice per process.
//! - Calendar timestamps carry microsecond precision so the stored text
//!   round-trips exactly and orders lexically.
//! - A zero epoch-millisecond value reads back as unset.

use crate::context::{Context, ContextField, MissingContext};
use crate::model::entity::Entity;
use crate::model::policy::{EffectivePolicy, ReauditMode};
use crate::store::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

pub const CREATED_AT: &str = "created_at";
pub const CREATED_BY: &str = "created_by";
pub const UPDATED_AT: &str = "updated_at";
pub const UPDATED_BY: &str = "updated_by";
pub const DELETED_AT: &str = "deleted_at";
pub const DELETED_BY: &str = "deleted_by";
pub const TENANT_ID: &str = "tenant_id";
pub const APP_ID: &str = "app_id";
pub const RUN_CONTEXT: &str = "run_context";

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);
static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

fn next_tick(last: &AtomicI64, current: i64) -> i64 {
    let mut previous = last.load(Ordering::Relaxed);
    loop {
        let next = if current > previous {
            current
        } else {
            previous + 1
        };
        match last.compare_exchange_weak(previous, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => previous = actual,
        }
    }
}

/// Strictly increasing wall-clock time at microsecond precision.
pub fn now() -> DateTime<Utc> {
    let micros = next_tick(&LAST_MICROS, Utc::now().timestamp_micros());
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// Strictly increasing wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    next_tick(&LAST_MILLIS, Utc::now().timestamp_millis())
}

/// Fixed-width RFC 3339 UTC text, e.g. `2024-05-01T08:30:00.000123Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn millis_to_time(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

fn is_zero_millis(value: &i64) -> bool {
    *value == 0
}

/// Serde adapter for optional calendar audit timestamps.
pub mod timestamp_format {
    use super::format_timestamp;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(text) if text.is_empty() => Ok(None),
            Some(text) => DateTime::parse_from_rfc3339(&text)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Creation audit capability.
pub trait CreatedAuditor {
    fn creator(&self) -> &str;
    fn created_at(&self) -> Option<DateTime<Utc>>;
    /// Stored representation of the create time; `None` when unset.
    fn created_at_raw(&self) -> Option<Value>;
    /// Sets creator and create time to now.
    fn set_creator(&mut self, user: &str);
}

/// Update audit capability; its timestamp doubles as the optimistic lock.
pub trait UpdatedAuditor {
    fn updater(&self) -> &str;
    fn updated_at(&self) -> Option<DateTime<Utc>>;
    fn updated_at_raw(&self) -> Option<Value>;
    fn set_updater(&mut self, user: &str);
}

/// Delete audit capability; presence enables soft delete.
pub trait DeletedAuditor {
    fn deleter(&self) -> &str;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    fn deleted_at_raw(&self) -> Option<Value>;
    fn set_deleter(&mut self, user: &str);
}

/// Tenant scope capability.
pub trait TenantCarrier {
    fn tenant_id(&self) -> &str;
    fn set_tenant_id(&mut self, id: &str);
    fn app_id(&self) -> &str;
    fn set_app_id(&mut self, id: &str);
}

/// Carries the acting user on values that are not repository entities.
pub trait OperatorCarrier {
    fn operator(&self) -> &str;
    fn set_operator(&mut self, user: &str);
}

/// Records which call last wrote the entity.
pub trait RunContextRecorder {
    fn run_context(&self) -> Option<&RunContext>;
    fn set_run_context(&mut self, run_context: RunContext);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAudit {
    #[serde(
        default,
        with = "timestamp_format",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

impl CreatedAuditor for CreateAudit {
    fn creator(&self) -> &str {
        &self.created_by
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn created_at_raw(&self) -> Option<Value> {
        self.created_at
            .as_ref()
            .map(|ts| Value::String(format_timestamp(ts)))
    }

    fn set_creator(&mut self, user: &str) {
        self.created_by = user.to_string();
        self.created_at = Some(now());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAuditMs {
    #[serde(default, skip_serializing_if = "is_zero_millis")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

impl CreatedAuditor for CreateAuditMs {
    fn creator(&self) -> &str {
        &self.created_by
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.created_at)
    }

    fn created_at_raw(&self) -> Option<Value> {
        (self.created_at != 0).then(|| Value::from(self.created_at))
    }

    fn set_creator(&mut self, user: &str) {
        self.created_by = user.to_string();
        self.created_at = now_millis();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAudit {
    #[serde(
        default,
        with = "timestamp_format",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_by: String,
}

impl UpdatedAuditor for UpdateAudit {
    fn updater(&self) -> &str {
        &self.updated_by
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn updated_at_raw(&self) -> Option<Value> {
        self.updated_at
            .as_ref()
            .map(|ts| Value::String(format_timestamp(ts)))
    }

    fn set_updater(&mut self, user: &str) {
        self.updated_by = user.to_string();
        self.updated_at = Some(now());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAuditMs {
    #[serde(default, skip_serializing_if = "is_zero_millis")]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated_by: String,
}

impl UpdatedAuditor for UpdateAuditMs {
    fn updater(&self) -> &str {
        &self.updated_by
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.updated_at)
    }

    fn updated_at_raw(&self) -> Option<Value> {
        (self.updated_at != 0).then(|| Value::from(self.updated_at))
    }

    fn set_updater(&mut self, user: &str) {
        self.updated_by = user.to_string();
        self.updated_at = now_millis();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAudit {
    #[serde(
        default,
        with = "timestamp_format",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deleted_by: String,
}

impl DeletedAuditor for DeleteAudit {
    fn deleter(&self) -> &str {
        &self.deleted_by
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn deleted_at_raw(&self) -> Option<Value> {
        self.deleted_at
            .as_ref()
            .map(|ts| Value::String(format_timestamp(ts)))
    }

    fn set_deleter(&mut self, user: &str) {
        self.deleted_by = user.to_string();
        self.deleted_at = Some(now());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAuditMs {
    #[serde(default, skip_serializing_if = "is_zero_millis")]
    pub deleted_at: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deleted_by: String,
}

impl DeletedAuditor for DeleteAuditMs {
    fn deleter(&self) -> &str {
        &self.deleted_by
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.deleted_at)
    }

    fn deleted_at_raw(&self) -> Option<Value> {
        (self.deleted_at != 0).then(|| Value::from(self.deleted_at))
    }

    fn set_deleter(&mut self, user: &str) {
        self.deleted_by = user.to_string();
        self.deleted_at = now_millis();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantAudit {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
}

impl TenantCarrier for TenantAudit {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn set_tenant_id(&mut self, id: &str) {
        self.tenant_id = id.to_string();
    }

    fn app_id(&self) -> &str {
        &self.app_id
    }

    fn set_app_id(&mut self, id: &str) {
        self.app_id = id.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAudit {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,
}

impl OperatorCarrier for OperatorAudit {
    fn operator(&self) -> &str {
        &self.operator
    }

    fn set_operator(&mut self, user: &str) {
        self.operator = user.to_string();
    }
}

/// Trace/request ids of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

impl RunContext {
    pub fn from_context(ctx: &Context) -> Self {
        Self {
            trace_id: ctx.trace_id().unwrap_or_default().to_string(),
            request_id: ctx.request_id().unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContextAudit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_context: Option<RunContext>,
}

impl RunContextRecorder for RunContextAudit {
    fn run_context(&self) -> Option<&RunContext> {
        self.run_context.as_ref()
    }

    fn set_run_context(&mut self, run_context: RunContext) {
        self.run_context = Some(run_context);
    }
}

/// Stamps creation audit, tenant scope and run context, then update audit.
///
/// # Errors
/// - `MissingContext(Operator)` when the entity has create or update audit and
///   no operator is present.
/// - `MissingContext(TenantId | AppId)` when the entity carries tenant scope.
pub fn stamp_create<T: Entity>(ctx: &Context, entity: &mut T) -> Result<(), MissingContext> {
    if let Some(created) = entity.created_audit_mut() {
        let operator = ctx.require(ContextField::Operator)?;
        created.set_creator(operator);
    }

    if let Some(tenant) = entity.tenant_mut() {
        stamp_tenant(ctx, tenant)?;
    }

    if let Some(recorder) = entity.run_context_mut() {
        recorder.set_run_context(RunContext::from_context(ctx));
    }

    stamp_update(ctx, entity)
}

/// Copies tenant and app id from the context; both must be present.
pub fn stamp_tenant(ctx: &Context, carrier: &mut dyn TenantCarrier) -> Result<(), MissingContext> {
    let tenant_id = ctx.require(ContextField::TenantId)?;
    let app_id = ctx.require(ContextField::AppId)?;
    carrier.set_tenant_id(tenant_id);
    carrier.set_app_id(app_id);
    Ok(())
}

/// A loose value `ctx_audit` should stamp.
pub enum AuditTarget<'a> {
    Operator(&'a mut dyn OperatorCarrier),
    Tenant(&'a mut dyn TenantCarrier),
}

/// Stamps context identity onto values outside a repository call, such as
/// command objects or embedded sub-records.
///
/// Stops at the first target whose identity is missing; earlier targets keep
/// their stamps.
pub fn ctx_audit(ctx: &Context, targets: &mut [AuditTarget<'_>]) -> Result<(), MissingContext> {
    for target in targets.iter_mut() {
        match target {
            AuditTarget::Operator(carrier) => {
                carrier.set_operator(ctx.require(ContextField::Operator)?);
            }
            AuditTarget::Tenant(carrier) => stamp_tenant(ctx, &mut **carrier)?,
        }
    }
    Ok(())
}

/// Stamps update audit. No-op without the capability.
pub fn stamp_update<T: Entity>(ctx: &Context, entity: &mut T) -> Result<(), MissingContext> {
    if let Some(updated) = entity.updated_audit_mut() {
        let operator = ctx.require(ContextField::Operator)?;
        updated.set_updater(operator);
    }
    Ok(())
}

/// Stamps delete audit and reports whether a soft delete applies.
///
/// Returns `Ok(false)` without touching the entity when it has no delete
/// audit capability; callers fall back to a physical delete.
pub fn stamp_delete<T: Entity>(ctx: &Context, entity: &mut T) -> Result<bool, MissingContext> {
    match entity.deleted_audit_mut() {
        Some(deleted) => {
            let operator = ctx.require(ContextField::Operator)?;
            deleted.set_deleter(operator);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Update-time held by an entity before it was re-stamped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateLock {
    pub original_updated_at: Option<Value>,
}

impl UpdateLock {
    pub fn is_locked(&self) -> bool {
        self.original_updated_at.is_some()
    }
}

/// Captures the optimistic-lock value, then re-stamps update audit.
///
/// With [`ReauditMode::Always`] the run context is refreshed as well.
pub fn update_lock_and_audit<T: Entity>(
    ctx: &Context,
    entity: &mut T,
    policy: &EffectivePolicy,
) -> Result<UpdateLock, MissingContext> {
    let original_updated_at = entity
        .updated_audit()
        .and_then(|updated| updated.updated_at_raw());

    stamp_update(ctx, entity)?;

    if policy.reaudit == ReauditMode::Always {
        if let Some(recorder) = entity.run_context_mut() {
            recorder.set_run_context(RunContext::from_context(ctx));
        }
    }

    Ok(UpdateLock {
        original_updated_at,
    })
}

/// `updated_at`/`updated_by` payload fields in `T`'s own representation.
///
/// Empty when `T` has no update audit.
pub fn update_stamp_fields<T: Entity>(ctx: &Context) -> Result<Document, MissingContext> {
    let mut probe = T::default();
    let mut fields = Document::new();
    stamp_update(ctx, &mut probe)?;
    if let Some(updated) = probe.updated_audit() {
        if let Some(raw) = updated.updated_at_raw() {
            fields.insert(UPDATED_AT.to_string(), raw);
        }
        fields.insert(
            UPDATED_BY.to_string(),
            Value::String(updated.updater().to_string()),
        );
    }
    Ok(fields)
}

/// `deleted_at`/`deleted_by` payload fields in `T`'s own representation.
pub fn delete_stamp_fields<T: Entity>(ctx: &Context) -> Result<Document, MissingContext> {
    let mut probe = T::default();
    let mut fields = Document::new();
    stamp_delete(ctx, &mut probe)?;
    if let Some(deleted) = probe.deleted_audit() {
        if let Some(raw) = deleted.deleted_at_raw() {
            fields.insert(DELETED_AT.to_string(), raw);
        }
        fields.insert(
            DELETED_BY.to_string(),
            Value::String(deleted.deleter().to_string()),
        );
    }
    Ok(fields)
}
