//! Query-filter and patch-payload derivation.
//!
//! # Responsibility
//! - Add isolation, soft-delete and optimistic-lock conditions to filters
//!   based on the effective policy and the entity's capabilities.
//! - Flatten an entity into a sparse `$set` payload of dot paths.
//!
//! # Invariants
//! - A condition is only added when the entity has the matching capability.
//! - Patch payloads never carry zero values, so absent fields stay untouched.

use crate::context::{Context, ContextField, MissingContext};
use crate::model::audit::{
    UpdateLock, APP_ID, CREATED_AT, CREATED_BY, DELETED_AT, TENANT_ID, UPDATED_AT,
};
use crate::model::entity::{Capabilities, ID_KEY};
use crate::model::policy::{DataIsolation, EffectivePolicy};
use crate::store::Document;
use serde::Serialize;
use serde_json::{json, Value};

/// Fields a patch must never overwrite.
const PATCH_PROTECTED: [&str; 5] = [ID_KEY, CREATED_AT, CREATED_BY, TENANT_ID, APP_ID];

/// Scopes `filter` to the caller's user, tenant or app.
///
/// # Errors
/// - `MissingContext` when the isolation identity is absent from `ctx`.
pub fn build_isolation_filter(
    policy: &EffectivePolicy,
    caps: &Capabilities,
    ctx: &Context,
    filter: &mut Document,
) -> Result<(), MissingContext> {
    let (key, field) = match policy.isolation {
        DataIsolation::None => return Ok(()),
        DataIsolation::User if caps.created => (CREATED_BY, ContextField::Operator),
        DataIsolation::Tenant if caps.tenant => (TENANT_ID, ContextField::TenantId),
        DataIsolation::App if caps.tenant => (APP_ID, ContextField::AppId),
        _ => return Ok(()),
    };

    let value = ctx.require(field)?;
    filter.insert(key.to_string(), Value::String(value.to_string()));
    Ok(())
}

/// Hides soft-deleted records.
pub fn build_soft_delete_filter(
    policy: &EffectivePolicy,
    caps: &Capabilities,
    filter: &mut Document,
) {
    if caps.deleted && policy.soft_delete.is_enabled() {
        filter.insert(DELETED_AT.to_string(), json!({ "$exists": false }));
    }
}

/// Pins the write to the update-time the caller last observed.
pub fn build_optimistic_lock_filter(lock: &UpdateLock, filter: &mut Document) {
    if let Some(original) = &lock.original_updated_at {
        filter.insert(UPDATED_AT.to_string(), original.clone());
    }
}

/// Flattens `entity` into dot-path assignments, skipping zero values.
///
/// Nested objects recurse; arrays are assigned whole. `_id`, creation audit
/// and tenant fields are dropped.
pub fn build_patch_payload<T: Serialize>(entity: &T) -> Result<Document, serde_json::Error> {
    let mut payload = Document::new();
    if let Value::Object(fields) = serde_json::to_value(entity)? {
        for (key, value) in fields {
            flatten_into(&key, value, &mut payload);
        }
    }
    for key in PATCH_PROTECTED {
        payload.remove(key);
    }
    Ok(payload)
}

/// Writes `value` at `path`, expanding nested objects into `path.child` keys.
pub fn flatten_into(path: &str, value: Value, out: &mut Document) {
    if is_zero_value(&value) {
        return;
    }
    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                flatten_into(&format!("{path}.{key}"), child, out);
            }
        }
        other => {
            out.insert(path.to_string(), other);
        }
    }
}

/// `null`, `false`, `0`, `""`, `[]` and objects holding only zero values.
pub fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.values().all(is_zero_value),
    }
}
