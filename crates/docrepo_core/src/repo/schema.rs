//! Construction-time check of an entity's document shape.
//!
//! The engine addresses `_id`, audit fields and tenant fields at the
//! document's top level. An entity that nests one of its capability groups
//! (a missing `#[serde(flatten)]`) would silently escape filters, so the
//! repository refuses to be built for it.

use crate::model::audit::{
    RunContext, APP_ID, CREATED_AT, CREATED_BY, DELETED_AT, DELETED_BY, RUN_CONTEXT, TENANT_ID,
    UPDATED_AT, UPDATED_BY,
};
use crate::model::entity::{Capabilities, Entity, EntityId, ID_KEY};
use crate::store::Document;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

const PROBE_IDENTITY: &str = "schema-probe";

#[derive(Debug)]
pub enum SchemaError {
    /// A capability group is not flattened into the top-level document.
    NotInline {
        entity: &'static str,
        group: &'static str,
    },
    /// The entity does not serialize to a JSON object.
    NotAnObject { entity: &'static str },
    Codec(serde_json::Error),
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInline { entity, group } => write!(
                f,
                "{entity}: `{group}` must be inline (#[serde(flatten)]) at the document top level"
            ),
            Self::NotAnObject { entity } => {
                write!(f, "{entity}: entity must serialize to a JSON object")
            }
            Self::Codec(err) => write!(f, "entity schema probe failed: {err}"),
        }
    }
}

impl Error for SchemaError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Stamps a default `T`, serializes it and checks every group is top-level.
///
/// Returns the capability set on success.
pub fn validate_schema<T: Entity>() -> Result<Capabilities, SchemaError> {
    let entity = std::any::type_name::<T>();
    let caps = Capabilities::of::<T>();

    let mut probe = T::default();
    probe.set_id(T::Id::schema_probe());
    if let Some(created) = probe.created_audit_mut() {
        created.set_creator(PROBE_IDENTITY);
    }
    if let Some(updated) = probe.updated_audit_mut() {
        updated.set_updater(PROBE_IDENTITY);
    }
    if let Some(deleted) = probe.deleted_audit_mut() {
        deleted.set_deleter(PROBE_IDENTITY);
    }
    if let Some(tenant) = probe.tenant_mut() {
        tenant.set_tenant_id(PROBE_IDENTITY);
        tenant.set_app_id(PROBE_IDENTITY);
    }
    if let Some(recorder) = probe.run_context_mut() {
        recorder.set_run_context(RunContext {
            trace_id: PROBE_IDENTITY.to_string(),
            request_id: PROBE_IDENTITY.to_string(),
        });
    }

    let doc = match serde_json::to_value(&probe)? {
        Value::Object(doc) => doc,
        _ => return Err(SchemaError::NotAnObject { entity }),
    };

    let groups: [(bool, &'static str, &[&str]); 6] = [
        (true, "id", &[ID_KEY]),
        (caps.created, "created_audit", &[CREATED_AT, CREATED_BY]),
        (caps.updated, "updated_audit", &[UPDATED_AT, UPDATED_BY]),
        (caps.deleted, "deleted_audit", &[DELETED_AT, DELETED_BY]),
        (caps.tenant, "tenant", &[TENANT_ID, APP_ID]),
        (caps.run_context, "run_context", &[RUN_CONTEXT]),
    ];
    for (present, group, keys) in groups {
        if present && !has_keys(&doc, keys) {
            return Err(SchemaError::NotInline { entity, group });
        }
    }

    Ok(caps)
}

fn has_keys(doc: &Document, keys: &[&str]) -> bool {
    keys.iter().all(|key| doc.contains_key(*key))
}

#[cfg(test)]
mod tests {
    use super::{validate_schema, SchemaError};
    use crate::model::audit::{CreateAudit, CreatedAuditor};
    use crate::model::entity::Entity;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Nested {
        #[serde(rename = "_id")]
        id: String,
        created: CreateAudit,
    }

    impl Entity for Nested {
        type Id = String;

        fn id(&self) -> &String {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn created_audit(&self) -> Option<&dyn CreatedAuditor> {
            Some(&self.created)
        }

        fn created_audit_mut(&mut self) -> Option<&mut dyn CreatedAuditor> {
            Some(&mut self.created)
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Unrenamed {
        id: i64,
    }

    impl Entity for Unrenamed {
        type Id = i64;

        fn id(&self) -> &i64 {
            &self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[test]
    fn nested_audit_group_is_rejected() {
        let err = validate_schema::<Nested>().unwrap_err();
        assert!(matches!(err, SchemaError::NotInline { group: "created_audit", .. }));
        assert!(err.to_string().contains("must be inline"));
    }

    #[test]
    fn id_must_serialize_as_underscore_id() {
        let err = validate_schema::<Unrenamed>().unwrap_err();
        assert!(matches!(err, SchemaError::NotInline { group: "id", .. }));
    }
}
