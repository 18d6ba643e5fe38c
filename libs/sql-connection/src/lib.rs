//! Thin connection layer between the migration engine and SQL Server.
//!
//! The engine is written against [`Queryable`], never against the driver.
//! Production code talks to a [`MssqlConnection`]; tests substitute scripted
//! fakes.

mod mssql;
mod result_set;
mod value;

pub use mssql::MssqlConnection;
pub use result_set::{ResultRow, ResultSet};
pub use value::Value;

pub type ConnectionResult<T> = Result<T, ConnectionError>;

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("database error: {0}")]
    Driver(#[from] tiberius::error::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("{0}")]
    Other(String),
}

/// A connection the engine can issue raw SQL through.
///
/// Transactions are server-side: the executor brackets batches with
/// `BEGIN TRAN` / `COMMIT TRAN` / `ROLLBACK TRAN` raw commands, so a
/// `Queryable` is all it needs.
#[async_trait::async_trait]
pub trait Queryable: Send + Sync {
    async fn query_raw(&self, sql: &str, params: &[Value]) -> ConnectionResult<ResultSet>;

    async fn execute_raw(&self, sql: &str, params: &[Value]) -> ConnectionResult<u64>;

    async fn raw_cmd(&self, sql: &str) -> ConnectionResult<()>;

    async fn begin_transaction(&self) -> ConnectionResult<()> {
        self.raw_cmd("BEGIN TRAN").await
    }

    async fn commit_transaction(&self) -> ConnectionResult<()> {
        self.raw_cmd("COMMIT TRAN").await
    }

    async fn rollback_transaction(&self) -> ConnectionResult<()> {
        self.raw_cmd("ROLLBACK TRAN").await
    }
}

/// Opens connections from tenant connection strings.
///
/// The orchestrator resolves a connection string per tenant and hands it
/// here; injecting a factory is also how tests run the whole engine against
/// fakes.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, connection_string: &str) -> ConnectionResult<Box<dyn Queryable>>;
}

/// The production factory.
#[derive(Debug, Default)]
pub struct MssqlConnectionFactory;

#[async_trait::async_trait]
impl ConnectionFactory for MssqlConnectionFactory {
    async fn connect(&self, connection_string: &str) -> ConnectionResult<Box<dyn Queryable>> {
        let conn = MssqlConnection::connect(connection_string).await?;
        Ok(Box::new(conn))
    }
}
