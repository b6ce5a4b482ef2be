#![allow(dead_code)]

use docrepo_core::{
    Context, CreateAudit, CreateAuditMs, CreatedAuditor, DeleteAudit, DeleteAuditMs,
    DeletedAuditor, Entity, Repository, RunContextAudit, RunContextRecorder, SqliteCollection,
    SqliteStore, TenantAudit, TenantCarrier, UpdateAudit, UpdateAuditMs, UpdatedAuditor,
};
use serde::{Deserialize, Serialize};

macro_rules! capability {
    (created, $field:ident) => {
        fn created_audit(&self) -> Option<&dyn CreatedAuditor> {
            Some(&self.$field)
        }
        fn created_audit_mut(&mut self) -> Option<&mut dyn CreatedAuditor> {
            Some(&mut self.$field)
        }
    };
    (updated, $field:ident) => {
        fn updated_audit(&self) -> Option<&dyn UpdatedAuditor> {
            Some(&self.$field)
        }
        fn updated_audit_mut(&mut self) -> Option<&mut dyn UpdatedAuditor> {
            Some(&mut self.$field)
        }
    };
    (deleted, $field:ident) => {
        fn deleted_audit(&self) -> Option<&dyn DeletedAuditor> {
            Some(&self.$field)
        }
        fn deleted_audit_mut(&mut self) -> Option<&mut dyn DeletedAuditor> {
            Some(&mut self.$field)
        }
    };
    (tenant, $field:ident) => {
        fn tenant(&self) -> Option<&dyn TenantCarrier> {
            Some(&self.$field)
        }
        fn tenant_mut(&mut self) -> Option<&mut dyn TenantCarrier> {
            Some(&mut self.$field)
        }
    };
    (run_context, $field:ident) => {
        fn run_context(&self) -> Option<&dyn RunContextRecorder> {
            Some(&self.$field)
        }
        fn run_context_mut(&mut self) -> Option<&mut dyn RunContextRecorder> {
            Some(&mut self.$field)
        }
    };
}

/// Fully audited, tenant-scoped, soft-deletable record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Article {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub created: CreateAudit,
    #[serde(flatten)]
    pub updated: UpdateAudit,
    #[serde(flatten)]
    pub deleted: DeleteAudit,
    #[serde(flatten)]
    pub scope: TenantAudit,
}

impl Article {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Article {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    capability!(created, created);
    capability!(updated, updated);
    capability!(deleted, deleted);
    capability!(tenant, scope);
}

/// Audited record without soft delete or tenant scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(flatten)]
    pub created: CreateAudit,
    #[serde(flatten)]
    pub updated: UpdateAudit,
}

impl Note {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Note {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    capability!(created, created);
    capability!(updated, updated);
}

/// Record stamped with epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(default)]
    pub kind: String,
    #[serde(flatten)]
    pub created: CreateAuditMs,
    #[serde(flatten)]
    pub updated: UpdateAuditMs,
    #[serde(flatten)]
    pub deleted: DeleteAuditMs,
}

impl Entity for Event {
    type Id = i64;

    fn id(&self) -> &i64 {
        &self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    capability!(created, created);
    capability!(updated, updated);
    capability!(deleted, deleted);
}

/// Keyed record with no capabilities at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    #[serde(rename = "_id")]
    pub id: u64,
    #[serde(default)]
    pub value: i64,
}

impl Entity for Counter {
    type Id = u64;

    fn id(&self) -> &u64 {
        &self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Audited record that remembers which call wrote it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub state: String,
    #[serde(flatten)]
    pub created: CreateAudit,
    #[serde(flatten)]
    pub updated: UpdateAudit,
    #[serde(flatten)]
    pub run: RunContextAudit,
}

impl Entity for Job {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    capability!(created, created);
    capability!(updated, updated);
    capability!(run_context, run);
}

pub const OPERATOR: &str = "vinci";
pub const TENANT: &str = "tenant";
pub const APP: &str = "app";

/// Context carrying the default operator, tenant and app.
pub fn ctx() -> Context {
    Context::new()
        .with_operator(OPERATOR)
        .with_tenant_id(TENANT)
        .with_app_id(APP)
        .with_trace_id("trace-test")
}

/// Context for another identity.
pub fn ctx_as(operator: &str, tenant: &str, app: &str) -> Context {
    Context::new()
        .with_operator(operator)
        .with_tenant_id(tenant)
        .with_app_id(app)
}

pub fn repo<T: Entity>(name: &str) -> Repository<T, SqliteCollection> {
    let store = SqliteStore::open_in_memory().unwrap();
    Repository::new(store.collection(name)).unwrap()
}
