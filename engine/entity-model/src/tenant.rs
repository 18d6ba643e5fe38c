use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One isolated migration target: a database, or a schema within one,
/// addressed by an opaque identifier.
///
/// Tenants are registered in an external store; the engine reads them and
/// never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub tenant_id: String,
    /// `None` means the default schema of the target database.
    pub schema_name: Option<String>,
    pub connection_string: String,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Tenant {
    pub fn new(tenant_id: impl Into<String>, connection_string: impl Into<String>) -> Self {
        Tenant {
            tenant_id: tenant_id.into(),
            schema_name: None,
            connection_string: connection_string.into(),
            is_active: true,
            metadata: BTreeMap::new(),
        }
    }

    /// The schema migrations run against for this tenant.
    pub fn effective_schema(&self) -> &str {
        self.schema_name.as_deref().unwrap_or("dbo")
    }
}
