use sql_migration_planner::PlannerOptions;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractiveMode {
    /// Prompt per statement.
    #[default]
    Step,
    /// Prompt per batch.
    Batch,
}

/// The behavior flags of one migration run.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Apply the plan. When off, the run stops after planning and
    /// reporting.
    pub execute: bool,
    /// Print the plan and do nothing.
    pub dry_run: bool,
    /// Prompt before statements or batches.
    pub interactive: bool,
    pub interactive_mode: InteractiveMode,
    /// Render the pre-migration report and stop.
    pub preview_only: bool,
    /// Execute without prompting when the safety analysis is clean and
    /// every change is additive.
    pub auto_merge: bool,
    /// Attach the pre-migration report to the run report.
    pub show_report: bool,
    /// Run the impact analysis and write the report artifacts.
    pub impact_analysis: bool,
    /// Synthesize a rollback script for the plan.
    pub rollback_on_failure: bool,
    /// Execute the synthesized rollback after a post-commit failure
    /// instead of only attaching it.
    pub auto_execute_rollback: bool,
    /// Attach the rollback script without ever executing it.
    pub rollback_preview_only: bool,
    /// Refuse to execute when the safety analysis finds unsafe
    /// statements.
    pub stop_on_unsafe: bool,
    /// Append a line-oriented `migration.log` in the artifact directory.
    pub log_to_file: bool,
    /// Label grouping related runs in the history table.
    pub logical_group: String,
    /// Where report artifacts, snapshots and the log land. `None`
    /// disables all file artifacts.
    pub artifact_dir: Option<PathBuf>,
    /// The caller owns an open transaction; the executor neither commits
    /// nor rolls back.
    pub external_transaction: bool,
    /// Overrides for the safe column migration protocol.
    pub planner: PlannerOptions,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        MigrationOptions {
            execute: true,
            dry_run: false,
            interactive: false,
            interactive_mode: InteractiveMode::default(),
            preview_only: false,
            auto_merge: false,
            show_report: false,
            impact_analysis: false,
            rollback_on_failure: false,
            auto_execute_rollback: false,
            rollback_preview_only: false,
            stop_on_unsafe: false,
            log_to_file: false,
            logical_group: "schema".to_owned(),
            artifact_dir: None,
            external_transaction: false,
            planner: PlannerOptions::default(),
        }
    }
}
