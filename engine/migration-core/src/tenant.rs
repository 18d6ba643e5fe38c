//! Contracts of the external tenant collaborators.
//!
//! Tenant registration, identity resolution and storage live outside the
//! engine; these traits are the only surface the orchestrator sees. The
//! store is read-only to the engine.

use crate::error::CoreResult;
use entity_model::{EntityDefinition, Tenant};
use sql_connection::Queryable;

#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    async fn get_all(&self) -> CoreResult<Vec<Tenant>>;

    async fn get(&self, tenant_id: &str, include_inactive: bool) -> CoreResult<Option<Tenant>>;

    async fn add_or_update(&self, tenant: Tenant) -> CoreResult<()>;
}

/// Resolves a tenant id to its connection string. The default resolution
/// reads the tenant record itself.
#[async_trait::async_trait]
pub trait ConnectionStringResolver: Send + Sync {
    async fn resolve(&self, tenant_id: &str) -> CoreResult<String>;
}

/// Resolves a tenant id to its schema name; `None` means the default
/// schema.
#[async_trait::async_trait]
pub trait SchemaNameResolver: Send + Sync {
    async fn resolve(&self, tenant_id: &str) -> CoreResult<Option<String>>;
}

/// An optional external impact analyzer. When absent, the engine falls
/// back to its internal differ.
#[async_trait::async_trait]
pub trait SchemaImpactAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        conn: &dyn Queryable,
        desired: &[EntityDefinition],
    ) -> CoreResult<String>;
}

/// An in-memory tenant store, useful for embedding and for tests.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    tenants: std::sync::Mutex<Vec<Tenant>>,
}

impl InMemoryTenantStore {
    pub fn new(tenants: Vec<Tenant>) -> Self {
        InMemoryTenantStore {
            tenants: std::sync::Mutex::new(tenants),
        }
    }
}

#[async_trait::async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get_all(&self) -> CoreResult<Vec<Tenant>> {
        Ok(self.tenants.lock().unwrap().clone())
    }

    async fn get(&self, tenant_id: &str, include_inactive: bool) -> CoreResult<Option<Tenant>> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.tenant_id == tenant_id && (include_inactive || t.is_active))
            .cloned())
    }

    async fn add_or_update(&self, tenant: Tenant) -> CoreResult<()> {
        let mut tenants = self.tenants.lock().unwrap();
        match tenants.iter_mut().find(|t| t.tenant_id == tenant.tenant_id) {
            Some(existing) => *existing = tenant,
            None => tenants.push(tenant),
        }
        Ok(())
    }
}
