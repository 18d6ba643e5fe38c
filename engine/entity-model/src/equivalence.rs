//! Equivalence predicates used by the differ.
//!
//! Two producers never agree on surface details (type casing, expression
//! decoration, column ordering in multisets), so equality on the raw
//! structs is useless for diffing. These predicates encode what actually
//! matters per object kind.

use crate::{
    normalize_expression, same_column_multiset, CheckConstraint, Column, Constraint,
    ConstraintKind, Index,
};

/// Column equivalence: base type (case-insensitive), identity, nullability,
/// normalized default, and declared length for text types; `max` is
/// distinct from any finite size.
pub fn columns_equivalent(previous: &Column, next: &Column) -> bool {
    if !previous.base_type().eq_ignore_ascii_case(next.base_type()) {
        return false;
    }

    if previous.is_identity != next.is_identity || previous.is_nullable != next.is_nullable {
        return false;
    }

    if !defaults_equivalent(previous.default_value.as_deref(), next.default_value.as_deref()) {
        return false;
    }

    if previous.is_text_type() && previous.declared_length() != next.declared_length() {
        return false;
    }

    true
}

fn defaults_equivalent(previous: Option<&str>, next: Option<&str>) -> bool {
    match (previous, next) {
        (None, None) => true,
        (Some(p), Some(n)) => normalize_expression(p) == normalize_expression(n),
        _ => false,
    }
}

/// Constraint equivalence: same kind and column multiset; foreign keys also
/// compare the referenced table and column multiset; defaults and checks
/// compare normalized expressions.
pub fn constraints_equivalent(previous: &Constraint, next: &Constraint) -> bool {
    if previous.kind != next.kind {
        return false;
    }

    if !same_column_multiset(&previous.columns, &next.columns) {
        return false;
    }

    match previous.kind {
        ConstraintKind::ForeignKey => {
            let same_table = match (&previous.referenced_table, &next.referenced_table) {
                (Some(p), Some(n)) => p.eq_ignore_ascii_case(n),
                _ => false,
            };

            same_table && same_column_multiset(&previous.referenced_columns, &next.referenced_columns)
        }
        ConstraintKind::Default | ConstraintKind::Check => defaults_equivalent(
            previous.expression.as_deref(),
            next.expression.as_deref(),
        ),
        ConstraintKind::PrimaryKey | ConstraintKind::Unique => true,
    }
}

pub fn checks_equivalent(previous: &CheckConstraint, next: &CheckConstraint) -> bool {
    normalize_expression(&previous.expression) == normalize_expression(&next.expression)
}

/// Index equivalence: same ordered column list, uniqueness, normalized
/// filter and include-column multiset.
pub fn indexes_equivalent(previous: &Index, next: &Index) -> bool {
    if previous.columns.len() != next.columns.len() {
        return false;
    }

    let ordered_columns_match = previous
        .columns
        .iter()
        .zip(next.columns.iter())
        .all(|(p, n)| p.eq_ignore_ascii_case(n));

    if !ordered_columns_match || previous.is_unique != next.is_unique {
        return false;
    }

    let filters_match = match (&previous.filter_expression, &next.filter_expression) {
        (None, None) => true,
        (Some(p), Some(n)) => normalize_expression(p) == normalize_expression(n),
        _ => false,
    };

    filters_match && same_column_multiset(&previous.include_columns, &next.include_columns)
}
