//! Run reports and the impact report artifacts.

use crate::error::CoreResult;
use sql_migration_planner::{ChangeAction, ImpactItem, MigrationSafetyResult, Severity, SkipRecord};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

/// Outcome of one migration run against one target.
#[derive(Debug, Clone, Default)]
pub struct MigrationRunReport {
    pub tenant_id: Option<String>,
    pub duration: Duration,
    /// Whether any migration was applied to the database.
    pub applied: bool,
    /// The plan version hash, when a plan was produced.
    pub version: Option<String>,
    pub impact_analysis_ran: bool,
    pub impact_summary: Option<String>,
    /// The rendered plan.
    pub script: String,
    /// The synthesized rollback script, when requested.
    pub rollback_script: Option<String>,
    /// The pre-migration report, when requested.
    pub pre_migration_report: Option<String>,
    pub unsafe_reasons: Vec<String>,
    pub skipped: Vec<SkipRecord>,
    pub error: Option<String>,
}

/// Aggregate outcome of a multi-tenant run.
#[derive(Debug, Default)]
pub struct MigrationSummary {
    pub total_tenants: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub reports: BTreeMap<String, MigrationRunReport>,
    pub total_duration: Duration,
}

/// The pre-migration report: added/dropped/altered object lists plus the
/// warnings, grouped by severity.
pub fn render_pre_migration_report(
    impacts: &[ImpactItem],
    safety: &MigrationSafetyResult,
    skips: &[SkipRecord],
) -> String {
    let mut out = String::new();

    writeln!(out, "Migration preview").unwrap();
    writeln!(out, "=================").unwrap();

    for (action, title) in [
        (ChangeAction::Added, "Added"),
        (ChangeAction::Modified, "Altered"),
        (ChangeAction::Dropped, "Dropped"),
    ] {
        let entries: Vec<&ImpactItem> = impacts.iter().filter(|i| i.action == action).collect();
        if entries.is_empty() {
            continue;
        }

        writeln!(out).unwrap();
        writeln!(out, "{title}:").unwrap();
        for item in entries {
            writeln!(
                out,
                "  - [{}] {} `{}` on `{}`",
                item.severity, item.object_kind, item.name, item.table
            )
            .unwrap();
        }
    }

    for severity in [Severity::High, Severity::Medium, Severity::Low] {
        let warnings: Vec<&ImpactItem> =
            impacts.iter().filter(|i| i.severity == severity).collect();
        if warnings.is_empty() {
            continue;
        }

        writeln!(out).unwrap();
        writeln!(out, "{severity} impact:").unwrap();
        for item in warnings {
            writeln!(out, "  - {}", item.reason).unwrap();
        }
    }

    if !skips.is_empty() {
        writeln!(out).unwrap();
        writeln!(out, "Skipped:").unwrap();
        for skip in skips {
            writeln!(out, "  - {}", skip.message).unwrap();
        }
    }

    if !safety.unsafe_commands.is_empty() {
        writeln!(out).unwrap();
        writeln!(out, "Unsafe statements:").unwrap();
        for (command, reason) in safety.unsafe_commands.iter().zip(&safety.reasons) {
            writeln!(out, "  - {reason}:").unwrap();
            for line in command.lines().take(1) {
                writeln!(out, "      {line}").unwrap();
            }
        }
    }

    out
}

pub fn render_impact_markdown(impacts: &[ImpactItem]) -> String {
    let mut out = String::new();

    writeln!(out, "# Schema impact analysis").unwrap();
    writeln!(out).unwrap();

    if impacts.is_empty() {
        writeln!(out, "No schema changes detected.").unwrap();
        return out;
    }

    writeln!(out, "| Severity | Action | Object | Table | Name | Reason |").unwrap();
    writeln!(out, "|---|---|---|---|---|---|").unwrap();
    for item in impacts {
        writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            item.severity, item.action, item.object_kind, item.table, item.name, item.reason
        )
        .unwrap();
    }

    out
}

pub fn render_impact_html(impacts: &[ImpactItem]) -> String {
    let mut rows = String::new();

    for item in impacts {
        write!(
            rows,
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            item.severity.to_string().to_ascii_lowercase(),
            escape_html(&item.severity.to_string()),
            escape_html(&item.action.to_string()),
            escape_html(&item.object_kind.to_string()),
            escape_html(&item.table),
            escape_html(&item.name),
            escape_html(&item.reason),
        )
        .unwrap();
    }

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Schema impact analysis</title>\n\
         <style>table{{border-collapse:collapse}}td,th{{border:1px solid #ccc;padding:4px 8px}}\
         tr.high{{background:#fdd}}tr.medium{{background:#ffd}}</style></head>\n\
         <body><h1>Schema impact analysis</h1>\n\
         <table><tr><th>Severity</th><th>Action</th><th>Object</th><th>Table</th><th>Name</th><th>Reason</th></tr>{rows}</table>\n\
         </body></html>\n"
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Writes `impact.md` and `impact.html` into the artifact directory.
pub fn write_impact_artifacts(dir: &Path, impacts: &[ImpactItem]) -> CoreResult<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("impact.md"), render_impact_markdown(impacts))?;
    std::fs::write(dir.join("impact.html"), render_impact_html(impacts))?;
    Ok(())
}
