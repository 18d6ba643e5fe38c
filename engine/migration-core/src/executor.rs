//! The per-target migration executor.
//!
//! One invocation is a single cooperative task: introspect, plan, gate,
//! execute inside one transaction, record history. No parallelism within a
//! target.

use crate::batch_split::split_batches;
use crate::error::{CoreError, CoreResult};
use crate::history::{content_hash, MigrationHistory};
use crate::options::{InteractiveMode, MigrationOptions};
use crate::prompt::{ConsolePrompt, MigrationPrompt, PromptAnswer};
use crate::report::{
    render_impact_markdown, render_pre_migration_report, write_impact_artifacts,
    MigrationRunReport,
};
use crate::tenant::SchemaImpactAnalyzer;
use entity_model::EntityDefinition;
use mssql_schema_describer::SchemaDescriber;
use sql_connection::Queryable;
use sql_ddl::EnsureSchema;
use sql_migration_planner::{
    all_additive, analyze_safety, plan_entity_migration, synthesize_rollback, Diagnostics,
    EntityPlan, ImpactItem, MigrationScript, TableFacts,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PlannedEntity {
    current: EntityDefinition,
    desired: EntityDefinition,
    plan: EntityPlan,
}

pub struct MigrationExecutor {
    conn: Box<dyn Queryable>,
    schema: String,
    options: MigrationOptions,
    prompt: Arc<dyn MigrationPrompt>,
    impact_analyzer: Option<Arc<dyn SchemaImpactAnalyzer>>,
}

impl MigrationExecutor {
    pub fn new(conn: Box<dyn Queryable>, schema: impl Into<String>, options: MigrationOptions) -> Self {
        MigrationExecutor {
            conn,
            schema: schema.into(),
            options,
            prompt: Arc::new(ConsolePrompt),
            impact_analyzer: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn MigrationPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_impact_analyzer(mut self, analyzer: Arc<dyn SchemaImpactAnalyzer>) -> Self {
        self.impact_analyzer = Some(analyzer);
        self
    }

    /// Runs one migration pass for the given desired entities.
    pub async fn run(
        &self,
        entities: &[EntityDefinition],
        cancellation: &CancellationToken,
    ) -> CoreResult<MigrationRunReport> {
        let started = Instant::now();
        let mut report = MigrationRunReport::default();

        // Entities are bound to this target's schema: the same model fans
        // out across schema-per-tenant databases.
        let desired: Vec<EntityDefinition> = entities
            .iter()
            .cloned()
            .map(|mut e| {
                e.schema = self.schema.clone();
                e
            })
            .collect();

        let (planned, diagnostics) = self.plan_all(&desired, cancellation).await?;

        let script =
            MigrationScript::concat(planned.iter().map(|p| p.plan.script.clone()));
        let impacts: Vec<ImpactItem> = planned
            .iter()
            .flat_map(|p| p.plan.impacts.iter().cloned())
            .collect();

        let rendered = script.render();
        let snapshot = entity_model::snapshot_json(&desired)?;
        let version = content_hash(&rendered, &snapshot);

        report.script = rendered.clone();
        report.version = Some(version.clone());
        report.skipped = diagnostics.skips().to_vec();

        let safety = analyze_safety(&script);
        report.unsafe_reasons = safety.reasons.clone();

        if self.options.impact_analysis {
            report.impact_analysis_ran = true;
            report.impact_summary = Some(match &self.impact_analyzer {
                Some(analyzer) => analyzer.analyze(self.conn.as_ref(), &desired).await?,
                None => render_impact_markdown(&impacts),
            });

            if let Some(dir) = &self.options.artifact_dir {
                write_impact_artifacts(dir, &impacts)?;
            }
        }

        if self.options.show_report || self.options.preview_only {
            report.pre_migration_report = Some(render_pre_migration_report(
                &impacts,
                &safety,
                diagnostics.skips(),
            ));
        }

        if self.options.rollback_on_failure || self.options.rollback_preview_only {
            let mut rollback = String::new();
            for entry in &planned {
                rollback.push_str(
                    &synthesize_rollback(&entry.plan.impacts, &entry.current, &entry.desired)
                        .render(),
                );
            }
            report.rollback_script = Some(rollback);
        }

        if self.options.preview_only || self.options.dry_run {
            if self.options.dry_run {
                info!(script = %rendered, "dry run, nothing executed");
            }
            report.duration = started.elapsed();
            return Ok(report);
        }

        if !self.options.execute {
            report.duration = started.elapsed();
            return Ok(report);
        }

        if script.is_empty() {
            debug!("schema is up to date, nothing to execute");
            report.duration = started.elapsed();
            return Ok(report);
        }

        if self.options.stop_on_unsafe && !safety.is_safe {
            warn!(
                reasons = ?safety.reasons,
                "plan contains unsafe statements, stopping before execution"
            );
            report.duration = started.elapsed();
            return Ok(report);
        }

        // Auto-merge: clean safety analysis and purely additive actions
        // execute without prompting.
        let auto_merged = self.options.auto_merge && safety.is_safe && all_additive(&impacts);
        let interactive = self.options.interactive && !auto_merged;

        self.conn
            .raw_cmd(&EnsureSchema { schema: &self.schema }.to_string())
            .await?;

        let history = MigrationHistory::new(self.conn.as_ref(), &self.schema);
        history.ensure_table().await?;

        // The same plan applied before is a no-op, not an error.
        if history.is_applied(&version).await? {
            info!(version = %version, "plan already applied, skipping");
            report.duration = started.elapsed();
            return Ok(report);
        }

        history
            .insert_pending(&version, &self.options.logical_group, &snapshot)
            .await?;

        match self.execute_script(&script, interactive, cancellation).await {
            Ok(()) => {
                let duration_ms = started.elapsed().as_millis() as i64;
                history.mark_applied(&version, duration_ms, &snapshot).await?;
                report.applied = true;

                self.write_snapshot_artifact(&version, &snapshot)?;
                self.append_log(&format!(
                    "applied version {version} in {duration_ms}ms ({} batches)",
                    script.batches.len()
                ))?;
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(history_err) = history.mark_failed(&version, &message).await {
                    warn!(error = %history_err, "failed to record the failure in the history table");
                }
                self.append_log(&format!("failed version {version}: {message}"))?;

                if self.options.rollback_on_failure
                    && self.options.auto_execute_rollback
                    && !self.options.rollback_preview_only
                {
                    if let Some(rollback) = report.rollback_script.clone() {
                        warn!("executing synthesized rollback after failure");
                        let _ = self.execute_rollback(&rollback).await;
                    }
                }

                return Err(err);
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    /// Introspects and plans every entity. Live-data facts are gathered
    /// here so the planner stays pure.
    async fn plan_all(
        &self,
        desired: &[EntityDefinition],
        cancellation: &CancellationToken,
    ) -> CoreResult<(Vec<PlannedEntity>, Diagnostics)> {
        let describer = SchemaDescriber::new(self.conn.as_ref());
        let mut diagnostics = Diagnostics::new();
        let mut planned = Vec::with_capacity(desired.len());

        for entity in desired {
            if cancellation.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let current = describer.describe(&entity.schema, &entity.name).await?;
            let facts = self.gather_facts(&describer, &current, entity).await?;

            let plan = plan_entity_migration(
                &current,
                entity,
                &facts,
                &self.options.planner,
                &mut diagnostics,
            );

            planned.push(PlannedEntity {
                current,
                desired: entity.clone(),
                plan,
            });
        }

        Ok((planned, diagnostics))
    }

    async fn gather_facts(
        &self,
        describer: &SchemaDescriber<'_>,
        current: &EntityDefinition,
        desired: &EntityDefinition,
    ) -> CoreResult<TableFacts> {
        if current.is_empty_shape() {
            return Ok(TableFacts::empty());
        }

        let row_count = describer.row_count(&current.schema, &current.name).await?;

        // Only columns being tightened need the NULL probe.
        let probe: Vec<String> = desired
            .persisted_columns()
            .filter(|c| !c.is_nullable)
            .filter(|c| {
                current
                    .find_column(&c.name)
                    .is_some_and(|previous| previous.is_nullable)
            })
            .map(|c| c.name.clone())
            .collect();

        let with_nulls = if row_count == 0 || probe.is_empty() {
            HashSet::new()
        } else {
            describer
                .columns_with_nulls(&current.schema, &current.name, &probe)
                .await?
        };

        Ok(TableFacts::new(row_count, with_nulls))
    }

    async fn execute_script(
        &self,
        script: &MigrationScript,
        interactive: bool,
        cancellation: &CancellationToken,
    ) -> CoreResult<()> {
        let own_transaction = !self.options.external_transaction;

        if own_transaction {
            self.conn.begin_transaction().await?;
        }

        let result = self
            .execute_batches(script, interactive, cancellation)
            .await;

        match &result {
            Ok(()) => {
                if own_transaction {
                    self.conn.commit_transaction().await?;
                }
            }
            Err(_) => {
                if own_transaction {
                    // Preserve the original failure even when the rollback
                    // command itself fails on a dead connection.
                    let _ = self.conn.rollback_transaction().await;
                }
            }
        }

        result
    }

    async fn execute_batches(
        &self,
        script: &MigrationScript,
        interactive: bool,
        cancellation: &CancellationToken,
    ) -> CoreResult<()> {
        if interactive {
            return self.execute_interactive(script, cancellation).await;
        }

        // Non-interactive execution goes through the textual batch split,
        // the same path scripts from outside the planner take.
        for (index, batch) in split_batches(&script.render()).iter().enumerate() {
            if cancellation.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            self.conn.raw_cmd(batch).await.map_err(|err| CoreError::Execution {
                batch: index,
                message: err.to_string(),
            })?;
        }

        Ok(())
    }

    async fn execute_interactive(
        &self,
        script: &MigrationScript,
        cancellation: &CancellationToken,
    ) -> CoreResult<()> {
        for (index, batch) in script.batches.iter().enumerate() {
            if cancellation.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            match self.options.interactive_mode {
                InteractiveMode::Batch => {
                    let text: String = batch
                        .statements
                        .iter()
                        .map(|s| s.sql.as_str())
                        .collect::<Vec<_>>()
                        .join("\n");

                    match self.prompt.ask(&text) {
                        PromptAnswer::Execute => {
                            self.conn.raw_cmd(&text).await.map_err(|err| {
                                CoreError::Execution {
                                    batch: index,
                                    message: err.to_string(),
                                }
                            })?;
                        }
                        PromptAnswer::Skip => continue,
                        PromptAnswer::Quit => return Err(CoreError::AbortedByOperator),
                    }
                }
                InteractiveMode::Step => {
                    for statement in &batch.statements {
                        if statement.is_comment() {
                            continue;
                        }

                        match self.prompt.ask(&statement.sql) {
                            PromptAnswer::Execute => {
                                self.conn.raw_cmd(&statement.sql).await.map_err(|err| {
                                    CoreError::Execution {
                                        batch: index,
                                        message: err.to_string(),
                                    }
                                })?;
                            }
                            PromptAnswer::Skip => continue,
                            PromptAnswer::Quit => return Err(CoreError::AbortedByOperator),
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn execute_rollback(&self, rollback: &str) -> CoreResult<()> {
        self.conn.begin_transaction().await?;

        for statement in rollback.lines().filter(|l| !l.trim_start().starts_with("--")) {
            if statement.trim().is_empty() {
                continue;
            }

            if let Err(err) = self.conn.raw_cmd(statement).await {
                let _ = self.conn.rollback_transaction().await;
                return Err(CoreError::Execution {
                    batch: 0,
                    message: err.to_string(),
                });
            }
        }

        self.conn.commit_transaction().await?;
        Ok(())
    }

    fn write_snapshot_artifact(&self, version: &str, snapshot: &str) -> CoreResult<()> {
        let Some(dir) = &self.options.artifact_dir else {
            return Ok(());
        };

        let snapshots = dir.join("snapshots");
        std::fs::create_dir_all(&snapshots)?;
        std::fs::write(snapshots.join(format!("{version}.json")), snapshot)?;

        Ok(())
    }

    fn append_log(&self, line: &str) -> CoreResult<()> {
        if !self.options.log_to_file {
            return Ok(());
        }

        let Some(dir) = &self.options.artifact_dir else {
            return Ok(());
        };

        use std::io::Write as _;

        std::fs::create_dir_all(dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("migration.log"))?;
        writeln!(file, "{} {line}", chrono::Utc::now().to_rfc3339())?;

        Ok(())
    }
}
