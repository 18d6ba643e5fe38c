use entity_model::{Column, EntityDefinition, PrimaryKey};
use migration_core::{
    CoreError, FixedPrompt, InteractiveMode, MigrationExecutor, MigrationOptions, PromptAnswer,
};
use sql_connection::Value;
use std::sync::Arc;
use test_setup::{rows, FakeConnection};
use tokio_util::sync::CancellationToken;

fn user_entity() -> EntityDefinition {
    let mut user = EntityDefinition::new("dbo", "User");
    user.columns.push(Column::new("Id", "uniqueidentifier"));
    user.columns.push(Column::new("Name", "nvarchar(100)"));
    user.primary_key = Some(PrimaryKey {
        name: "PK_User".into(),
        columns: vec!["Id".into()],
        is_auto_generated: true,
    });
    user
}

fn executor(conn: &FakeConnection, options: MigrationOptions) -> MigrationExecutor {
    test_setup::init_logging();
    MigrationExecutor::new(Box::new(conn.clone()), "t1", options)
}

#[tokio::test]
async fn first_run_creates_the_table_inside_a_transaction() {
    let conn = FakeConnection::new();
    let executor = executor(&conn, MigrationOptions::default());

    let report = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.applied);
    assert!(report.error.is_none());
    assert!(report.version.is_some());

    // Entities are bound to the executor's schema.
    assert!(report.script.contains("CREATE TABLE [t1].[User]"));

    let executed = conn.executed();
    let begin = executed.iter().position(|s| s == "BEGIN TRAN").unwrap();
    let create = executed
        .iter()
        .position(|s| s.contains("CREATE TABLE [t1].[User]"))
        .unwrap();
    let commit = executed.iter().position(|s| s == "COMMIT TRAN").unwrap();
    assert!(begin < create && create < commit);

    // Schema and history bookkeeping happened before execution.
    assert!(conn.has_executed("CREATE SCHEMA [t1]"));
    assert!(conn.has_executed("_migration_history"));
    assert!(conn.has_executed("'pending'"));
    assert!(conn.has_executed("= 'applied'"));
}

#[tokio::test]
async fn duplicate_plan_version_is_a_noop_success() {
    let conn = FakeConnection::new();
    // The history table already holds this plan version as applied.
    conn.on_query(
        "AND [status] = 'applied'",
        rows(&["version"], vec![vec![Value::Text("whatever".into())]]),
    );

    let executor = executor(&conn, MigrationOptions::default());
    let report = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.applied);
    assert!(report.error.is_none());
    assert!(!conn.has_executed("BEGIN TRAN"));
    assert!(!conn.has_executed("CREATE TABLE [t1].[User]"));
}

#[tokio::test]
async fn execution_failure_rolls_back_and_marks_history_failed() {
    let conn = FakeConnection::new();
    conn.fail_on("CREATE TABLE [t1].[User]", "Deadlock victim");

    let executor = executor(&conn, MigrationOptions::default());
    let err = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap_err();

    // The underlying database message surfaces unchanged.
    assert!(err.to_string().contains("Deadlock victim"));
    assert!(conn.has_executed("ROLLBACK TRAN"));
    assert!(conn.has_executed("= 'failed'"));
    assert!(!conn.has_executed("COMMIT TRAN"));
}

#[tokio::test]
async fn dry_run_executes_nothing() {
    let conn = FakeConnection::new();
    let executor = executor(
        &conn,
        MigrationOptions {
            dry_run: true,
            ..MigrationOptions::default()
        },
    );

    let report = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.applied);
    assert!(report.script.contains("CREATE TABLE"));
    assert!(!conn.has_executed("BEGIN TRAN"));
    assert!(!conn.has_executed("CREATE TABLE [t1].[User]"));
}

#[tokio::test]
async fn preview_only_attaches_the_report_without_executing() {
    let conn = FakeConnection::new();
    let executor = executor(
        &conn,
        MigrationOptions {
            preview_only: true,
            ..MigrationOptions::default()
        },
    );

    let report = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.applied);
    let preview = report.pre_migration_report.unwrap();
    assert!(preview.contains("Added:"));
    assert!(!conn.has_executed("BEGIN TRAN"));
}

#[tokio::test]
async fn interactive_quit_rolls_back_immediately() {
    let conn = FakeConnection::new();
    let executor = executor(
        &conn,
        MigrationOptions {
            interactive: true,
            interactive_mode: InteractiveMode::Step,
            ..MigrationOptions::default()
        },
    )
    .with_prompt(Arc::new(FixedPrompt(PromptAnswer::Quit)));

    let err = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::AbortedByOperator));
    assert!(conn.has_executed("ROLLBACK TRAN"));
    assert!(!conn.has_executed("CREATE TABLE [t1].[User]"));
}

#[tokio::test]
async fn interactive_skip_completes_without_executing_statements() {
    let conn = FakeConnection::new();
    let executor = executor(
        &conn,
        MigrationOptions {
            interactive: true,
            ..MigrationOptions::default()
        },
    )
    .with_prompt(Arc::new(FixedPrompt(PromptAnswer::Skip)));

    let report = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.applied);
    assert!(!conn.has_executed("CREATE TABLE [t1].[User]"));
    assert!(conn.has_executed("COMMIT TRAN"));
}

#[tokio::test]
async fn auto_merge_bypasses_the_prompt_for_additive_safe_plans() {
    let conn = FakeConnection::new();
    let executor = executor(
        &conn,
        MigrationOptions {
            interactive: true,
            auto_merge: true,
            ..MigrationOptions::default()
        },
    )
    // Would abort if the prompt were consulted.
    .with_prompt(Arc::new(FixedPrompt(PromptAnswer::Quit)));

    let report = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.applied);
    assert!(conn.has_executed("CREATE TABLE [t1].[User]"));
}

#[tokio::test]
async fn external_transaction_is_neither_committed_nor_rolled_back() {
    let conn = FakeConnection::new();
    let executor = executor(
        &conn,
        MigrationOptions {
            external_transaction: true,
            ..MigrationOptions::default()
        },
    );

    executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(!conn.has_executed("BEGIN TRAN"));
    assert!(!conn.has_executed("COMMIT TRAN"));
    assert!(!conn.has_executed("ROLLBACK TRAN"));
}

#[tokio::test]
async fn cancellation_before_planning_propagates() {
    let conn = FakeConnection::new();
    let executor = executor(&conn, MigrationOptions::default());

    let token = CancellationToken::new();
    token.cancel();

    let err = executor.run(&[user_entity()], &token).await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
}

#[tokio::test]
async fn artifacts_land_in_the_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    let conn = FakeConnection::new();
    let executor = executor(
        &conn,
        MigrationOptions {
            impact_analysis: true,
            log_to_file: true,
            artifact_dir: Some(dir.path().to_path_buf()),
            ..MigrationOptions::default()
        },
    );

    let report = executor
        .run(&[user_entity()], &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.impact_analysis_ran);
    assert!(report.impact_summary.is_some());
    assert!(dir.path().join("impact.md").exists());
    assert!(dir.path().join("impact.html").exists());
    assert!(dir.path().join("migration.log").exists());

    let version = report.version.unwrap();
    assert!(dir.path().join("snapshots").join(format!("{version}.json")).exists());
}
