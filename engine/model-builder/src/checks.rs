//! CHECK constraint inference from declarative annotations.

use crate::descriptor::{Annotation, EntityDescriptor, MemberShape, ScalarKind};
use entity_model::{CheckConstraint, EntityDefinition};
use tracing::trace;

pub(crate) fn infer_check_constraints(descriptor: &EntityDescriptor, entity: &mut EntityDefinition) {
    let table = entity.name.clone();

    for member in &descriptor.members {
        let kind = match member.shape {
            MemberShape::Scalar(kind) => kind,
            _ => continue,
        };

        if member.has(|a| matches!(a, Annotation::NotMapped)) {
            continue;
        }

        let column = &member.name;
        let is_key = member.has(|a| matches!(a, Annotation::Key));

        for annotation in &member.annotations {
            let check = match annotation {
                Annotation::Required if !is_key => {
                    if kind == ScalarKind::String {
                        check(&table, column, "NotEmpty", format!("LEN([{column}]) > 0"))
                    } else {
                        check(&table, column, "NotNull", format!("[{column}] IS NOT NULL"))
                    }
                }
                Annotation::StringLength { min, max } => {
                    let expression = match min {
                        Some(min) => {
                            format!("LEN([{column}]) >= {min} AND LEN([{column}]) <= {max}")
                        }
                        None => format!("LEN([{column}]) <= {max}"),
                    };
                    check(&table, column, "Length", expression)
                }
                Annotation::Range { min, max } => check(
                    &table,
                    column,
                    "Range",
                    format!(
                        "[{column}] >= {} AND [{column}] <= {}",
                        format_number(*min),
                        format_number(*max)
                    ),
                ),
                Annotation::RegularExpression(regex) => match like_pattern(regex) {
                    Some(pattern) => check(
                        &table,
                        column,
                        "Pattern",
                        format!("[{column}] LIKE '{pattern}'"),
                    ),
                    None => {
                        trace!(
                            entity = %table,
                            column = %column,
                            regex = %regex,
                            "regular expression is not expressible as a LIKE pattern, skipping check constraint"
                        );
                        continue;
                    }
                },
                _ => continue,
            };

            entity.check_constraints.push(check);
        }
    }
}

fn check(table: &str, column: &str, kind: &str, expression: String) -> CheckConstraint {
    CheckConstraint {
        name: format!("CK_{table}_{column}_{kind}"),
        expression,
        referenced_columns: vec![column.to_owned()],
        description: None,
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Converts an anchored regular expression made of literals, `.` tokens and
/// `\.` escapes into a LIKE pattern. Anything requiring a real regex engine
/// returns `None`.
fn like_pattern(regex: &str) -> Option<String> {
    let body = regex.strip_prefix('^')?.strip_suffix('$')?;

    let mut pattern = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                // Only the full-stop escape is expressible.
                Some('.') => pattern.push('.'),
                _ => return None,
            },
            '.' => pattern.push('_'),
            '*' | '+' | '?' | '[' | ']' | '(' | ')' | '{' | '}' | '|' | '^' | '$' => return None,
            // LIKE wildcards in the literal text must be bracketed.
            '%' => pattern.push_str("[%]"),
            '_' => pattern.push_str("[_]"),
            '\'' => pattern.push_str("''"),
            other => pattern.push(other),
        }
    }

    Some(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::build_entity;
    use crate::descriptor::MemberDescriptor as M;
    use pretty_assertions::assert_eq;

    fn checks_for(descriptor: EntityDescriptor) -> Vec<CheckConstraint> {
        let mut entity = build_entity(&descriptor, "dbo");
        infer_check_constraints(&descriptor, &mut entity);
        entity.check_constraints
    }

    #[test]
    fn required_text_gets_a_not_empty_check() {
        let checks = checks_for(
            EntityDescriptor::new("User")
                .member(M::scalar("Id", ScalarKind::Guid).key())
                .member(M::scalar("Name", ScalarKind::String).required().max_length(100)),
        );

        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].name, "CK_User_Name_NotEmpty");
        assert_eq!(checks[0].expression, "LEN([Name]) > 0");
    }

    #[test]
    fn required_non_text_gets_a_not_null_check() {
        let checks = checks_for(
            EntityDescriptor::new("Order")
                .member(M::scalar("Id", ScalarKind::I32).key())
                .member(M::scalar("PlacedAt", ScalarKind::DateTime).required()),
        );

        assert_eq!(checks[0].name, "CK_Order_PlacedAt_NotNull");
        assert_eq!(checks[0].expression, "[PlacedAt] IS NOT NULL");
    }

    #[test]
    fn range_translates_to_its_literal_form() {
        let checks = checks_for(
            EntityDescriptor::new("Product")
                .member(M::scalar("Id", ScalarKind::I32).key())
                .member(M::scalar("Price", ScalarKind::Decimal).range(0.0, 1000.0)),
        );

        assert_eq!(checks[0].name, "CK_Product_Price_Range");
        assert_eq!(checks[0].expression, "[Price] >= 0 AND [Price] <= 1000");
    }

    #[test]
    fn string_length_with_bounds() {
        let checks = checks_for(
            EntityDescriptor::new("User")
                .member(M::scalar("Id", ScalarKind::Guid).key())
                .member(M::scalar("Code", ScalarKind::String).string_length(Some(2), 10)),
        );

        assert_eq!(checks[0].expression, "LEN([Code]) >= 2 AND LEN([Code]) <= 10");
    }

    #[test]
    fn simple_anchored_regex_becomes_like() {
        let checks = checks_for(
            EntityDescriptor::new("Invoice")
                .member(M::scalar("Id", ScalarKind::I32).key())
                .member(M::scalar("Code", ScalarKind::String).pattern(r"^INV-..\.X$")),
        );

        assert_eq!(checks[0].name, "CK_Invoice_Code_Pattern");
        assert_eq!(checks[0].expression, "[Code] LIKE 'INV-__.X'");
    }

    #[test]
    fn unconvertible_regex_is_skipped() {
        let checks = checks_for(
            EntityDescriptor::new("Invoice")
                .member(M::scalar("Id", ScalarKind::I32).key())
                .member(M::scalar("Code", ScalarKind::String).pattern(r"^[A-Z]+[0-9]*$")),
        );

        assert!(checks.is_empty());
    }

    #[test]
    fn unanchored_regex_is_skipped() {
        let checks = checks_for(
            EntityDescriptor::new("Invoice")
                .member(M::scalar("Id", ScalarKind::I32).key())
                .member(M::scalar("Code", ScalarKind::String).pattern("INV-...")),
        );

        assert!(checks.is_empty());
    }
}
