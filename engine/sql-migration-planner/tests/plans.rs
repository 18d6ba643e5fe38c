use entity_model::{
    CheckConstraint, Column, EntityDefinition, ForeignKey, Index, PrimaryKey, ReferentialAction,
};
use expect_test::expect;
use sql_migration_planner::{
    analyze_safety, plan_entity_migration, ChangeAction, Diagnostics, EntityPlan, ObjectKind,
    PlannerOptions, Severity, TableFacts,
};

fn plan(old: &EntityDefinition, new: &EntityDefinition, facts: &TableFacts) -> EntityPlan {
    let mut diagnostics = Diagnostics::new();
    plan_entity_migration(old, new, facts, &PlannerOptions::new(), &mut diagnostics)
}

fn empty(schema: &str, name: &str) -> EntityDefinition {
    EntityDefinition::new(schema, name)
}

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

fn profile_entity() -> EntityDefinition {
    let mut profile = EntityDefinition::new("dbo", "Profile");
    profile.columns.push(Column::new("Id", "uniqueidentifier"));
    profile.columns.push(Column {
        is_nullable: true,
        ..Column::new("Bio", "nvarchar(max)")
    });
    profile.primary_key = Some(PrimaryKey {
        name: "PK_Profile".into(),
        columns: vec!["Id".into()],
        is_auto_generated: false,
    });
    profile
        .constraints
        .push(entity_model::Constraint::unique("UQ_Profile_Id", vec!["Id".into()]));
    profile.foreign_keys.push(ForeignKey {
        name: "FK_Profile_Id".into(),
        columns: vec!["Id".into()],
        referenced_schema: None,
        referenced_table: "User".into(),
        referenced_columns: vec!["Id".into()],
        on_delete: ReferentialAction::Cascade,
        on_update: ReferentialAction::NoAction,
    });
    profile
}

// S1: a fresh one-to-one pair produces CREATE scripts, the dependent one
// with its synthesized UNIQUE and the FK.
#[test]
fn new_table_produces_a_create_script() {
    let plan = plan(&empty("dbo", "User"), &user_entity(), &TableFacts::empty());

    expect![[r#"
        CREATE TABLE [dbo].[User] (
            [Id] uniqueidentifier NOT NULL,
            [Name] nvarchar(100) NOT NULL,
            CONSTRAINT [PK_User] PRIMARY KEY ([Id])
        );
        GO
    "#]]
    .assert_eq(&plan.script.render());
}

#[test]
fn new_dependent_table_carries_unique_and_foreign_key() {
    let plan = plan(&empty("dbo", "Profile"), &profile_entity(), &TableFacts::empty());

    expect![[r#"
        CREATE TABLE [dbo].[Profile] (
            [Id] uniqueidentifier NOT NULL,
            [Bio] nvarchar(max) NULL,
            CONSTRAINT [PK_Profile] PRIMARY KEY ([Id])
        );
        GO
        ALTER TABLE [dbo].[Profile] ADD CONSTRAINT [UQ_Profile_Id] UNIQUE ([Id]);
        ALTER TABLE [dbo].[Profile] ADD CONSTRAINT [FK_Profile_Id] FOREIGN KEY ([Id]) REFERENCES [dbo].[User] ([Id]) ON DELETE CASCADE ON UPDATE NO ACTION;
        GO
    "#]]
    .assert_eq(&plan.script.render());
}

// An FK present in both the constraint form and the denormalized form is
// emitted exactly once.
#[test]
fn fk_declared_in_both_forms_is_emitted_once() {
    let mut profile = profile_entity();
    let fk = profile.foreign_keys[0].clone();
    profile
        .constraints
        .push(entity_model::Constraint::from_foreign_key(&fk));

    let plan = plan(&empty("dbo", "Profile"), &profile, &TableFacts::empty());
    let rendered = plan.script.render();

    assert_eq!(rendered.matches("FK_Profile_Id").count(), 1);
}

// Property 4: PK-migration batch precedes add-columns, which precedes the
// other changes.
#[test]
fn batch_order_is_pk_migration_then_adds_then_changes() {
    let mut old = user_entity();
    old.columns[0].type_name = "int".into();
    old.indexes.push(Index::new("IX_User_Name", vec!["Name".into()]));

    let mut new = user_entity();
    new.columns.push(Column {
        is_nullable: true,
        ..Column::new("Age", "int")
    });
    // Changed shape forces a drop in the changes batch.
    new.indexes.push(Index {
        is_unique: true,
        ..Index::new("IX_User_Name", vec!["Name".into()])
    });

    let plan = plan(&old, &new, &TableFacts::new(5, Vec::new()));

    let labels: Vec<&str> = plan.script.batches.iter().map(|b| b.label.as_str()).collect();
    assert_eq!(labels, vec!["primary key migration", "add columns", "changes"]);
}

// S2: a PK retype with referencing children.
#[test]
fn pk_retype_emits_the_key_migration_protocol() {
    let mut old = EntityDefinition::new("dbo", "Order");
    old.columns.push(Column::new("Id", "int"));
    old.primary_key = Some(PrimaryKey {
        name: "PK_Order".into(),
        columns: vec!["Id".into()],
        is_auto_generated: true,
    });

    let mut new = EntityDefinition::new("dbo", "Order");
    new.columns.push(Column::new("Id", "uniqueidentifier"));
    new.primary_key = Some(PrimaryKey {
        name: "PK_Order".into(),
        columns: vec!["Id".into()],
        is_auto_generated: true,
    });

    let plan = plan(&old, &new, &TableFacts::new(10, Vec::new()));
    let rendered = plan.script.render();

    assert_eq!(plan.script.batches[0].label, "primary key migration");
    assert!(rendered.contains("ADD [Id_New] uniqueidentifier NULL;"));
    assert!(rendered.contains("UPDATE [dbo].[Order] SET [Id_New] = TRY_CONVERT(uniqueidentifier, [Id]);"));
    assert!(rendered.contains("ALTER COLUMN [Id_New] uniqueidentifier NOT NULL;"));
    // Referencing FKs are enumerated from the catalog, dropped, re-pointed
    // and re-added.
    assert!(rendered.contains("FROM sys.foreign_keys fk"));
    assert!(rendered.contains("DROP CONSTRAINT [' + @fk_name + N']"));
    assert!(rendered.contains("] = p.[Id_New] FROM ["));
    assert!(rendered.contains("FOREIGN KEY ([' + @child_column + N']) REFERENCES [dbo].[Order] ([Id])"));
    // The key swap itself.
    assert!(rendered.contains("ALTER TABLE [dbo].[Order] DROP CONSTRAINT [PK_Order];"));
    assert!(rendered.contains("ALTER TABLE [dbo].[Order] DROP COLUMN [Id];"));
    assert!(rendered.contains("EXEC sp_rename 'dbo.Order.Id_New', 'Id', 'COLUMN';"));
    assert!(rendered.contains("ADD CONSTRAINT [PK_Order] PRIMARY KEY ([Id]);"));

    // The migrated column is excluded from the general change stages: no
    // further statements touch [Id] outside the protocol batch.
    for batch in &plan.script.batches[1..] {
        for statement in &batch.statements {
            assert!(
                !statement.sql.contains("[Id]"),
                "downstream stage touches the migrated key: {}",
                statement.sql
            );
        }
    }
}

// S3: NOT NULL tightening over existing NULLs is refused, not emitted.
#[test]
fn not_null_tightening_over_nulls_is_refused() {
    let mut old = user_entity();
    old.columns.push(Column {
        is_nullable: true,
        ..Column::new("Email", "nvarchar(200)")
    });
    let mut new = user_entity();
    new.columns.push(Column {
        is_nullable: false,
        ..Column::new("Email", "nvarchar(200)")
    });

    let mut diagnostics = Diagnostics::new();
    let plan = plan_entity_migration(
        &old,
        &new,
        &TableFacts::new(3, vec!["Email".to_owned()]),
        &PlannerOptions::new(),
        &mut diagnostics,
    );
    let rendered = plan.script.render();

    assert!(rendered.contains("-- skipped NOT NULL tightening on Email: column contains NULLs"));
    assert!(!rendered.contains("ALTER COLUMN"));
    assert!(!diagnostics.is_clean());

    // The impact analysis still reports the tightening at high severity.
    let impact = plan
        .impacts
        .iter()
        .find(|i| i.object_kind == ObjectKind::Column && i.name == "Email")
        .unwrap();
    assert_eq!(impact.action, ChangeAction::Modified);
    assert_eq!(impact.severity, Severity::High);
}

// S5, same constraint name: the normalizer sees through the catalog's
// decoration and the plan is empty.
#[test]
fn equivalent_check_under_the_same_name_is_a_noop() {
    let mut old = user_entity();
    old.check_constraints.push(CheckConstraint {
        name: "CK_Price".into(),
        expression: "([Price] >= (0) AND [Price] <= (1000))".into(),
        referenced_columns: vec!["Price".into()],
        description: None,
    });
    let mut new = user_entity();
    new.check_constraints.push(CheckConstraint {
        name: "CK_Price".into(),
        expression: "[Price] BETWEEN 0 AND 1000".into(),
        referenced_columns: vec!["Price".into()],
        description: None,
    });

    let plan = plan(&old, &new, &TableFacts::new(1, Vec::new()));

    assert!(plan.script.is_effectively_empty());
    assert!(plan.impacts.is_empty());
}

// S5, renamed: the plan swaps the constraint, and the safety reconciler
// treats the semantically identical pair as safe.
#[test]
fn equivalent_check_under_a_new_name_reconciles_to_safe() {
    let mut old = user_entity();
    old.check_constraints.push(CheckConstraint {
        name: "CK_Price".into(),
        expression: "([Price] >= (0) AND [Price] <= (1000))".into(),
        referenced_columns: vec!["Price".into()],
        description: None,
    });
    let mut new = user_entity();
    new.check_constraints.push(CheckConstraint {
        name: "CK_Price_Range".into(),
        expression: "[Price] BETWEEN 0 AND 1000".into(),
        referenced_columns: vec!["Price".into()],
        description: None,
    });

    let plan = plan(&old, &new, &TableFacts::new(1, Vec::new()));
    let safety = analyze_safety(&plan.script);

    assert!(plan.script.render().contains("DROP CONSTRAINT [CK_Price];"));
    assert!(safety.is_safe, "reasons: {:?}", safety.reasons);
}

// Property 1: a declared model diffed against its introspected shape is
// empty, modulo expression normalization. The two producers disagree on
// where the PK and defaults live and on expression decoration.
#[test]
fn declared_model_round_trips_against_its_catalog_shape() {
    // The shape the describer reconstructs after this model is applied.
    let mut catalog = EntityDefinition::new("dbo", "User");
    catalog.columns.push(Column::new("Id", "uniqueidentifier"));
    catalog.columns.push(Column {
        default_value: Some("('anonymous')".into()),
        ..Column::new("Name", "nvarchar(100)")
    });
    catalog.primary_key = Some(PrimaryKey {
        name: "PK_User".into(),
        columns: vec!["Id".into()],
        is_auto_generated: false,
    });
    catalog
        .constraints
        .push(entity_model::Constraint::primary_key("PK_User", vec!["Id".into()]));
    catalog.constraints.push(entity_model::Constraint::default(
        "DF_User_Name",
        "Name",
        "('anonymous')",
    ));
    catalog.check_constraints.push(CheckConstraint {
        name: "CK_User_Name_NotEmpty".into(),
        expression: "(LEN([Name])>(0))".into(),
        referenced_columns: vec!["Name".into()],
        description: None,
    });

    // The shape the model builder declares.
    let mut declared = user_entity();
    declared.columns[1].default_value = Some("'anonymous'".into());
    declared.check_constraints.push(CheckConstraint {
        name: "CK_User_Name_NotEmpty".into(),
        expression: "LEN([Name]) > 0".into(),
        referenced_columns: vec!["Name".into()],
        description: None,
    });

    let plan = plan(&catalog, &declared, &TableFacts::new(12, Vec::new()));

    assert_eq!(plan.impacts, vec![]);
    assert!(plan.script.is_effectively_empty());
}

// Property 2: a plan against its own post-state is empty.
#[test]
fn idempotent_plan_is_empty() {
    let entity = profile_entity();
    let plan = plan(&entity, &entity, &TableFacts::new(100, Vec::new()));

    assert!(plan.script.is_effectively_empty());
    assert!(plan.impacts.is_empty());
    assert!(analyze_safety(&plan.script).is_safe);
}

// Property 3: byte-identical output for identical inputs.
#[test]
fn planning_is_deterministic() {
    let old = user_entity();
    let mut new = user_entity();
    new.columns.push(Column {
        is_nullable: true,
        ..Column::new("Age", "int")
    });
    new.indexes.push(Index::new("IX_User_Age", vec!["Age".into()]));

    let first = plan(&old, &new, &TableFacts::new(7, Vec::new()));
    let second = plan(&old, &new, &TableFacts::new(7, Vec::new()));

    assert_eq!(first.script.render(), second.script.render());
}

// Property 7: the 900-byte index key rule.
#[test]
fn oversized_index_keys_are_skipped() {
    let mut old = user_entity();
    old.columns.push(Column::new("Wide", "nvarchar(500)"));
    let mut new = old.clone();
    new.indexes.push(Index::new("IX_User_Wide", vec!["Wide".into(), "Name".into()]));
    new.indexes.push(Index::new("IX_User_Name", vec!["Name".into()]));

    let plan = plan(&old, &new, &TableFacts::new(0, Vec::new()));
    let rendered = plan.script.render();

    assert!(rendered.contains("-- skipped index IX_User_Wide"));
    assert!(!rendered.contains("CREATE INDEX [IX_User_Wide]"));
    assert!(rendered.contains("CREATE INDEX [IX_User_Name]"));
}

// An index on a column added by the same plan is deferred.
#[test]
fn index_on_a_column_added_in_the_same_plan_is_deferred() {
    let old = user_entity();
    let mut new = user_entity();
    new.columns.push(Column {
        is_nullable: true,
        ..Column::new("Age", "int")
    });
    new.indexes.push(Index::new("IX_User_Age", vec!["Age".into()]));

    let plan = plan(&old, &new, &TableFacts::new(0, Vec::new()));
    let rendered = plan.script.render();

    assert!(rendered.contains("ALTER TABLE [dbo].[User] ADD [Age] int NULL;"));
    assert!(rendered.contains("-- deferred index IX_User_Age"));
    assert!(!rendered.contains("CREATE INDEX [IX_User_Age]"));
}

// Property 5: the safe column migration protocol preserves pre-existing
// checks that the new model does not replace.
#[test]
fn safe_column_migration_reinstates_orphaned_checks() {
    let mut old = user_entity();
    old.columns.push(Column {
        is_nullable: true,
        ..Column::new("Email", "nvarchar(400)")
    });
    old.check_constraints.push(CheckConstraint {
        name: "CK_User_Email_NotEmpty".into(),
        expression: "LEN([Email]) > 0".into(),
        referenced_columns: vec!["Email".into()],
        description: None,
    });

    let mut new = user_entity();
    // Length reduction: unsafe in place, goes through the protocol.
    new.columns.push(Column {
        is_nullable: false,
        ..Column::new("Email", "nvarchar(100)")
    });

    let plan = plan(&old, &new, &TableFacts::new(50, Vec::new()));
    let rendered = plan.script.render();

    assert!(rendered.contains("BEGIN TRANSACTION;"));
    assert!(rendered.contains("ADD [Email_New] nvarchar(100) NULL;"));
    assert!(rendered.contains("UPDATE [dbo].[User] SET [Email_New] = [Email];"));
    assert!(rendered.contains("ALTER TABLE [dbo].[User] DROP COLUMN [Email];"));
    assert!(rendered.contains("EXEC sp_rename 'dbo.User.Email_New', 'Email', 'COLUMN';"));
    assert!(rendered.contains("ALTER TABLE [dbo].[User] ALTER COLUMN [Email] nvarchar(100) NOT NULL;"));
    assert!(rendered.contains("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION;"));

    // The orphaned check is reinstated verbatim after the swap.
    assert!(rendered.contains("ADD CONSTRAINT [CK_User_Email_NotEmpty] CHECK (LEN([Email]) > 0);"));

    // The general change stage does not drop what the protocol drops.
    assert_eq!(rendered.matches("DROP CONSTRAINT [CK_User_Email_NotEmpty]").count(), 0);
}
