//! Classifies the emitted plan into safe and unsafe statements.
//!
//! First pass: keyword scan per statement. Second pass: reconcile false
//! positives. A CHECK or index dropped and re-created semantically
//! identical within the same plan is a no-op, not a destructive change.

use crate::script::{MigrationScript, Statement, StatementTag};

const UNSAFE_KEYWORDS: &[&str] = &["DROP COLUMN", "DROP CONSTRAINT", "ALTER COLUMN", "DROP INDEX"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationSafetyResult {
    pub is_safe: bool,
    pub safe_commands: Vec<String>,
    pub unsafe_commands: Vec<String>,
    pub reasons: Vec<String>,
}

pub fn analyze_safety(script: &MigrationScript) -> MigrationSafetyResult {
    let statements: Vec<&Statement> = script.statements().filter(|s| !s.is_comment()).collect();

    // Signatures of checks and indexes added by this same plan, for
    // reconciliation.
    let added_checks: Vec<&str> = statements
        .iter()
        .filter_map(|s| match &s.tag {
            StatementTag::CheckAdded { expression } => Some(expression.as_str()),
            _ => None,
        })
        .collect();
    let added_indexes: Vec<&str> = statements
        .iter()
        .filter_map(|s| match &s.tag {
            StatementTag::IndexAdded { signature } => Some(signature.as_str()),
            _ => None,
        })
        .collect();

    let mut result = MigrationSafetyResult {
        is_safe: true,
        ..Default::default()
    };

    for statement in statements {
        let classification = classify(statement, &added_checks, &added_indexes);

        match classification {
            Classification::Safe => result.safe_commands.push(statement.sql.clone()),
            Classification::Unsafe(reason) => {
                result.unsafe_commands.push(statement.sql.clone());
                result.reasons.push(reason);
            }
        }
    }

    result.is_safe = result.unsafe_commands.is_empty();
    result
}

enum Classification {
    Safe,
    Unsafe(String),
}

fn classify(statement: &Statement, added_checks: &[&str], added_indexes: &[&str]) -> Classification {
    match &statement.tag {
        // Any CHECK addition is safe by definition.
        StatementTag::CheckAdded { .. } => return Classification::Safe,
        // CHECK drops that belong to an active key migration are part of
        // the protocol, not a destructive model change.
        StatementTag::CheckDropped {
            during_pk_migration: true,
            ..
        } => return Classification::Safe,
        // Dropping a CHECK that a semantically identical addition
        // replaces within the same plan is a false positive.
        StatementTag::CheckDropped { expression, .. } => {
            if added_checks.contains(&expression.as_str()) {
                return Classification::Safe;
            }
        }
        StatementTag::IndexDropped { signature } => {
            if added_indexes.contains(&signature.as_str()) {
                return Classification::Safe;
            }
        }
        _ => {}
    }

    let upper = statement.sql.to_ascii_uppercase();
    for keyword in UNSAFE_KEYWORDS {
        if upper.contains(keyword) {
            return Classification::Unsafe(format!("statement contains `{keyword}`"));
        }
    }

    Classification::Safe
}
