//! Canonicalization of constraint and default expressions.
//!
//! The catalog hands back expressions in its own decorated form
//! (`([Price]>=(0) AND [Price]<=(1000))`), while desired models carry the
//! form the author wrote (`[Price] BETWEEN 0 AND 1000`). Both sides are
//! normalized before any equivalence decision.

use once_cell::sync::Lazy;
use regex::Regex;

/// Redundant parentheses around a bare numeric literal: `(1000)` → `1000`.
static PARENTHESIZED_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((\d+(?:\.\d+)?)\)").unwrap());

/// A trailing fractional part of zeroes: `1.0`, `1.00` → `1`. The regex
/// crate has no lookahead, so the following non-digit is captured and put
/// back.
static TRAILING_ZERO_FRACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.0+(\D|$)").unwrap());

/// A closed numeric range on one column:
/// `[C]>=X AND [C]<=Y` (whitespace already removed).
static CLOSED_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[?([A-Z_][A-Z0-9_]*)\]?>=(\d+(?:\.\d+)?)AND\[?([A-Z_][A-Z0-9_]*)\]?<=(\d+(?:\.\d+)?)$")
        .unwrap()
});

/// `ISNULL` as a predicate, not the `ISNULL(x, y)` function.
static IS_NULL_PREDICATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ISNULL(?:$|([^(]))").unwrap());

/// Normalizes an expression to its canonical comparison form.
///
/// The pipeline, in order: upper-case, strip whitespace, strip one layer of
/// symmetric enclosing parentheses, canonicalize numeric literals, rewrite
/// closed ranges to `BETWEEN`, fold boolean comparisons to bit comparisons,
/// re-space null predicates.
pub fn normalize_expression(expression: &str) -> String {
    let mut expr: String = expression
        .to_ascii_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    while let Some(stripped) = strip_symmetric_parens(&expr) {
        expr = stripped;
    }

    // Numeric literal canonicalization may expose another paren layer
    // (`((0))` → `(0)` → `0`), so run it to a fixed point.
    loop {
        let next = PARENTHESIZED_NUMBER.replace_all(&expr, "$1").into_owned();
        if next == expr {
            break;
        }
        expr = next;
    }
    expr = TRAILING_ZERO_FRACTION
        .replace_all(&expr, "${1}${2}")
        .into_owned();

    if let Some(caps) = CLOSED_RANGE.captures(&expr) {
        if caps[1] == caps[3] {
            expr = format!("[{}]BETWEEN{}AND{}", &caps[1], &caps[2], &caps[4]);
        }
    }

    expr = expr.replace("=TRUE", "=1").replace("=FALSE", "=0");

    expr = expr.replace("ISNOTNULL", " IS NOT NULL");
    expr = IS_NULL_PREDICATE
        .replace_all(&expr, " IS NULL$1")
        .into_owned();

    expr
}

/// Strips one layer of enclosing parentheses when the opening parenthesis
/// closes at the very end of the expression.
fn strip_symmetric_parens(expr: &str) -> Option<String> {
    let inner = expr.strip_prefix('(')?.strip_suffix(')')?;

    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                // The leading paren closed before the end: not symmetric.
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }

    (depth == 0).then(|| inner.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn catalog_range_matches_between_form() {
        let from_catalog = normalize_expression("([Price] >= (0) AND [Price] <= (1000))");
        let from_model = normalize_expression("[Price] BETWEEN 0 AND 1000");
        assert_eq!(from_catalog, from_model);
        assert_eq!(from_catalog, "[PRICE]BETWEEN0AND1000");
    }

    #[test]
    fn range_over_two_different_columns_is_not_rewritten() {
        let normalized = normalize_expression("([Lo] >= (0) AND [Hi] <= (1000))");
        assert_eq!(normalized, "[LO]>=0AND[HI]<=1000");
    }

    #[test]
    fn boolean_comparisons_fold_to_bits() {
        assert_eq!(
            normalize_expression("[IsActive] = TRUE"),
            normalize_expression("[IsActive]=(1)")
        );
        assert_eq!(
            normalize_expression("[IsActive] = FALSE"),
            normalize_expression("[IsActive] = 0")
        );
    }

    #[test]
    fn null_predicates_get_canonical_spacing() {
        assert_eq!(
            normalize_expression("[Email] IS NOT NULL"),
            normalize_expression("([Email]ISNOTNULL)")
        );
        assert_eq!(
            normalize_expression("[Email] IS NULL"),
            "[EMAIL] IS NULL"
        );
    }

    #[test]
    fn isnull_function_calls_are_left_alone() {
        assert_eq!(normalize_expression("ISNULL([A], 0) = 0"), "ISNULL([A],0)=0");
    }

    #[test]
    fn asymmetric_parens_are_kept() {
        assert_eq!(normalize_expression("(LEN([A])>0)AND([B]>1)"), "(LEN([A])>0)AND([B]>1)");
    }

    #[test]
    fn nested_symmetric_parens_strip_one_layer_at_a_time() {
        assert_eq!(normalize_expression("((LEN([Name]) > 0))"), "LEN([NAME])>0");
    }

    #[test]
    fn trailing_zero_fractions_are_trimmed() {
        assert_eq!(
            normalize_expression("[Price] >= 10.0"),
            normalize_expression("[Price] >= (10)")
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = normalize_expression("([Price] >= (0) AND [Price] <= (1000))");
        let twice = normalize_expression(&once);
        assert_eq!(once, twice);
    }
}
