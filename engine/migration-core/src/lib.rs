//! The migration engine: executor, history, reports and the multi-tenant
//! orchestrator.
//!
//! Single-target entry point: [`MigrationEngine::run_migrations`]. Fleet
//! entry point: [`MigrationEngine::run_migrations_for_all_tenants`]. Both
//! derive the desired model from entity descriptors, introspect the
//! target, plan, and execute under the behavior flags in
//! [`MigrationOptions`].

mod batch_split;
mod error;
mod executor;
mod history;
mod options;
mod orchestrator;
mod prompt;
mod report;
mod tenant;

pub use batch_split::split_batches;
pub use error::{CoreError, CoreResult};
pub use executor::MigrationExecutor;
pub use history::{content_hash, MigrationHistory, HISTORY_TABLE};
pub use options::{InteractiveMode, MigrationOptions};
pub use orchestrator::{NoLifecycle, OrchestratorOptions, TenantLifecycle, TenantOrchestrator};
pub use prompt::{ConsolePrompt, FixedPrompt, MigrationPrompt, PromptAnswer};
pub use report::{
    render_impact_html, render_impact_markdown, render_pre_migration_report,
    write_impact_artifacts, MigrationRunReport, MigrationSummary,
};
pub use tenant::{
    ConnectionStringResolver, InMemoryTenantStore, SchemaImpactAnalyzer, SchemaNameResolver,
    TenantStore,
};

use entity_model::Tenant;
use model_builder::{DescriptorSource, ModelBuilder};
use sql_connection::ConnectionFactory;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The top-level facade.
pub struct MigrationEngine {
    connections: Arc<dyn ConnectionFactory>,
}

impl MigrationEngine {
    pub fn new(connections: Arc<dyn ConnectionFactory>) -> Self {
        MigrationEngine { connections }
    }

    /// Plans and (per the options) executes the migrations for one
    /// target database.
    pub async fn run_migrations(
        &self,
        connection_string: &str,
        schema: &str,
        source: &dyn DescriptorSource,
        options: MigrationOptions,
    ) -> CoreResult<MigrationRunReport> {
        let entities = ModelBuilder::new(schema).build(source)?;
        let conn = self.connections.connect(connection_string).await?;

        MigrationExecutor::new(conn, schema, options)
            .run(&entities, &CancellationToken::new())
            .await
    }

    /// Plans and executes the migrations for every active tenant in the
    /// store that passes `filter`, with bounded parallelism.
    pub async fn run_migrations_for_all_tenants(
        &self,
        store: Arc<dyn TenantStore>,
        source: &dyn DescriptorSource,
        filter: impl Fn(&Tenant) -> bool,
        options: OrchestratorOptions,
        lifecycle: Arc<dyn TenantLifecycle>,
        cancellation: &CancellationToken,
    ) -> CoreResult<MigrationSummary> {
        // The per-tenant schema is applied by each executor; the model is
        // built once against the default namespace.
        let entities = ModelBuilder::default().build(source)?;

        TenantOrchestrator::new(store, self.connections.clone())
            .run_for_all_tenants(Arc::new(entities), filter, options, lifecycle, cancellation)
            .await
    }
}
