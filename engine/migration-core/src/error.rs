use model_builder::BuilderError;
use mssql_schema_describer::DescriberError;
use sql_connection::ConnectionError;

pub type CoreResult<T> = Result<T, CoreError>;

/// The error taxonomy of the engine. Recoverable conditions (refused
/// changes, skipped statements) never surface here; they travel as
/// diagnostics inside the reports. Database messages are preserved
/// unchanged in the sources.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("database connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("catalog read failed: {0}")]
    Describer(#[from] DescriberError),

    #[error("model derivation failed: {0}")]
    Builder(#[from] BuilderError),

    #[error("migration execution failed in batch {batch}: {message}")]
    Execution { batch: usize, message: String },

    #[error("migration cancelled")]
    Cancelled,

    #[error("migration aborted by operator")]
    AbortedByOperator,

    #[error("migration stopped: plan contains unsafe statements")]
    UnsafePlan { reasons: Vec<String> },

    #[error("tenant `{tenant_id}` failed: {source}")]
    TenantFailed {
        tenant_id: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
