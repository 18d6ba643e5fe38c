//! Fans a migration run across a population of tenants with bounded
//! parallelism.

use crate::error::{CoreError, CoreResult};
use crate::executor::MigrationExecutor;
use crate::options::MigrationOptions;
use crate::prompt::MigrationPrompt;
use crate::report::{MigrationRunReport, MigrationSummary};
use crate::tenant::{ConnectionStringResolver, SchemaNameResolver, TenantStore};
use entity_model::{EntityDefinition, Tenant};
use sql_connection::ConnectionFactory;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-tenant lifecycle callbacks. Both default to no-ops.
pub trait TenantLifecycle: Send + Sync {
    fn on_tenant_start(&self, tenant_id: &str) {
        let _ = tenant_id;
    }

    fn on_tenant_completed(&self, tenant_id: &str, report: &MigrationRunReport) {
        let _ = (tenant_id, report);
    }
}

/// The default lifecycle: nothing.
pub struct NoLifecycle;

impl TenantLifecycle for NoLifecycle {}

#[derive(Clone)]
pub struct OrchestratorOptions {
    pub migration: MigrationOptions,
    /// Bounded parallelism level, `P >= 1`. `1` iterates sequentially.
    pub parallelism: usize,
    /// Keep going after a failed tenant, accumulating its report, instead
    /// of aborting the batch.
    pub continue_on_error: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        OrchestratorOptions {
            migration: MigrationOptions::default(),
            parallelism: 1,
            continue_on_error: false,
        }
    }
}

pub struct TenantOrchestrator {
    store: Arc<dyn TenantStore>,
    connections: Arc<dyn ConnectionFactory>,
    connection_strings: Option<Arc<dyn ConnectionStringResolver>>,
    schemas: Option<Arc<dyn SchemaNameResolver>>,
    prompt: Option<Arc<dyn MigrationPrompt>>,
}

impl TenantOrchestrator {
    pub fn new(store: Arc<dyn TenantStore>, connections: Arc<dyn ConnectionFactory>) -> Self {
        TenantOrchestrator {
            store,
            connections,
            connection_strings: None,
            schemas: None,
            prompt: None,
        }
    }

    /// Overrides connection-string resolution; the default reads the
    /// tenant record.
    pub fn with_connection_string_resolver(
        mut self,
        resolver: Arc<dyn ConnectionStringResolver>,
    ) -> Self {
        self.connection_strings = Some(resolver);
        self
    }

    /// Overrides schema-name resolution; the default reads the tenant
    /// record.
    pub fn with_schema_resolver(mut self, resolver: Arc<dyn SchemaNameResolver>) -> Self {
        self.schemas = Some(resolver);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn MigrationPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Runs the migration for every active tenant passing `filter`.
    ///
    /// Each tenant's plan executes atomically against that tenant's
    /// database; no ordering is guaranteed across tenants.
    pub async fn run_for_all_tenants(
        &self,
        entities: Arc<Vec<EntityDefinition>>,
        filter: impl Fn(&Tenant) -> bool,
        options: OrchestratorOptions,
        lifecycle: Arc<dyn TenantLifecycle>,
        cancellation: &CancellationToken,
    ) -> CoreResult<MigrationSummary> {
        let started = Instant::now();

        let tenants: Vec<Tenant> = self
            .store
            .get_all()
            .await?
            .into_iter()
            .filter(|t| t.is_active && filter(t))
            .collect();

        info!(tenants = tenants.len(), parallelism = options.parallelism, "starting multi-tenant migration");

        let mut summary = MigrationSummary {
            total_tenants: tenants.len(),
            ..Default::default()
        };

        if options.parallelism <= 1 {
            self.run_sequential(tenants, entities, &options, lifecycle, cancellation, &mut summary)
                .await?;
        } else {
            self.run_parallel(tenants, entities, &options, lifecycle, cancellation, &mut summary)
                .await?;
        }

        summary.total_duration = started.elapsed();
        Ok(summary)
    }

    async fn run_sequential(
        &self,
        tenants: Vec<Tenant>,
        entities: Arc<Vec<EntityDefinition>>,
        options: &OrchestratorOptions,
        lifecycle: Arc<dyn TenantLifecycle>,
        cancellation: &CancellationToken,
        summary: &mut MigrationSummary,
    ) -> CoreResult<()> {
        for tenant in tenants {
            if cancellation.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let outcome = self
                .run_tenant(&tenant, &entities, options, &lifecycle, cancellation)
                .await;

            record_outcome(summary, tenant.tenant_id, outcome, options.continue_on_error)?;
        }

        Ok(())
    }

    async fn run_parallel(
        &self,
        tenants: Vec<Tenant>,
        entities: Arc<Vec<EntityDefinition>>,
        options: &OrchestratorOptions,
        lifecycle: Arc<dyn TenantLifecycle>,
        cancellation: &CancellationToken,
        summary: &mut MigrationSummary,
    ) -> CoreResult<()> {
        let semaphore = Arc::new(Semaphore::new(options.parallelism));
        // A child token lets an aborting batch stop tenants that have not
        // started yet without cancelling the caller's token.
        let batch_token = cancellation.child_token();
        let mut tasks: JoinSet<(String, CoreResult<MigrationRunReport>)> = JoinSet::new();

        for tenant in tenants {
            let semaphore = semaphore.clone();
            let token = batch_token.clone();
            let entities = entities.clone();
            let options = options.clone();
            let lifecycle = lifecycle.clone();
            let runner = self.tenant_runner();

            tasks.spawn(async move {
                let tenant_id = tenant.tenant_id.clone();

                let permit = tokio::select! {
                    _ = token.cancelled() => return (tenant_id, Err(CoreError::Cancelled)),
                    permit = semaphore.acquire_owned() => permit.expect("semaphore never closes"),
                };

                let outcome = runner
                    .run_tenant(&tenant, &entities, &options, &lifecycle, &token)
                    .await;

                drop(permit);
                (tenant_id, outcome)
            });
        }

        let mut first_failure: Option<CoreError> = None;

        while let Some(joined) = tasks.join_next().await {
            let (tenant_id, outcome) = joined.expect("tenant task never panics");

            match record_outcome(summary, tenant_id, outcome, options.continue_on_error) {
                Ok(()) => {}
                Err(err) if first_failure.is_none() => {
                    // Abort the batch: pending tenants see the token before
                    // they start.
                    batch_token.cancel();
                    first_failure = Some(err);
                }
                Err(_) => {}
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The pieces a spawned tenant task needs, detached from `&self`.
    fn tenant_runner(&self) -> TenantRunner {
        TenantRunner {
            connections: self.connections.clone(),
            connection_strings: self.connection_strings.clone(),
            schemas: self.schemas.clone(),
            prompt: self.prompt.clone(),
        }
    }

    async fn run_tenant(
        &self,
        tenant: &Tenant,
        entities: &[EntityDefinition],
        options: &OrchestratorOptions,
        lifecycle: &Arc<dyn TenantLifecycle>,
        cancellation: &CancellationToken,
    ) -> CoreResult<MigrationRunReport> {
        self.tenant_runner()
            .run_tenant(tenant, entities, options, lifecycle, cancellation)
            .await
    }
}

struct TenantRunner {
    connections: Arc<dyn ConnectionFactory>,
    connection_strings: Option<Arc<dyn ConnectionStringResolver>>,
    schemas: Option<Arc<dyn SchemaNameResolver>>,
    prompt: Option<Arc<dyn MigrationPrompt>>,
}

impl TenantRunner {
    async fn run_tenant(
        &self,
        tenant: &Tenant,
        entities: &[EntityDefinition],
        options: &OrchestratorOptions,
        lifecycle: &Arc<dyn TenantLifecycle>,
        cancellation: &CancellationToken,
    ) -> CoreResult<MigrationRunReport> {
        let tenant_id = tenant.tenant_id.as_str();
        lifecycle.on_tenant_start(tenant_id);

        let result = self
            .run_tenant_inner(tenant, entities, options, cancellation)
            .await;

        match result {
            Ok(mut report) => {
                report.tenant_id = Some(tenant_id.to_owned());
                lifecycle.on_tenant_completed(tenant_id, &report);
                Ok(report)
            }
            Err(err) => {
                warn!(tenant = tenant_id, error = %err, "tenant migration failed");

                let failed_report = MigrationRunReport {
                    tenant_id: Some(tenant_id.to_owned()),
                    error: Some(err.to_string()),
                    ..Default::default()
                };
                lifecycle.on_tenant_completed(tenant_id, &failed_report);

                Err(CoreError::TenantFailed {
                    tenant_id: tenant_id.to_owned(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn run_tenant_inner(
        &self,
        tenant: &Tenant,
        entities: &[EntityDefinition],
        options: &OrchestratorOptions,
        cancellation: &CancellationToken,
    ) -> CoreResult<MigrationRunReport> {
        let connection_string = match &self.connection_strings {
            Some(resolver) => resolver.resolve(&tenant.tenant_id).await?,
            None => tenant.connection_string.clone(),
        };

        let schema = match &self.schemas {
            Some(resolver) => resolver
                .resolve(&tenant.tenant_id)
                .await?
                .unwrap_or_else(|| "dbo".to_owned()),
            None => tenant.effective_schema().to_owned(),
        };

        let conn = self.connections.connect(&connection_string).await?;

        let mut executor = MigrationExecutor::new(conn, schema, options.migration.clone());
        if let Some(prompt) = &self.prompt {
            executor = executor.with_prompt(prompt.clone());
        }

        executor.run(entities, cancellation).await
    }
}

/// Folds one tenant outcome into the summary. A failure either aborts the
/// batch or is accumulated, depending on `continue_on_error`.
fn record_outcome(
    summary: &mut MigrationSummary,
    tenant_id: String,
    outcome: CoreResult<MigrationRunReport>,
    continue_on_error: bool,
) -> CoreResult<()> {
    match outcome {
        Ok(report) => {
            summary.succeeded += 1;
            summary.reports.insert(tenant_id, report);
            Ok(())
        }
        Err(err) => {
            summary.failed += 1;

            let message = match &err {
                CoreError::TenantFailed { source, .. } => source.to_string(),
                other => other.to_string(),
            };
            summary.reports.insert(
                tenant_id.clone(),
                MigrationRunReport {
                    tenant_id: Some(tenant_id),
                    error: Some(message),
                    ..Default::default()
                },
            );

            if continue_on_error {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}
