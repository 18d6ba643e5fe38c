//! Safety checks the planner refuses to cross.

use entity_model::{Column, EntityDefinition, Index, TextLength};

/// The index key size limit imposed by the target database.
pub(crate) const MAX_INDEX_KEY_BYTES: u32 = 900;

/// Total key width of an index against the entity's column types. Unknown
/// columns count as a plain fixed width.
pub(crate) fn index_key_bytes(index: &Index, entity: &EntityDefinition) -> u32 {
    index
        .columns
        .iter()
        .map(|name| {
            entity
                .find_column(name)
                .map(column_key_bytes)
                .unwrap_or(8)
        })
        .sum()
}

/// Structural identity of an index, used to reconcile drop/add pairs in
/// the safety analysis.
pub(crate) fn index_signature(index: &Index) -> String {
    let columns: Vec<String> = index.columns.iter().map(|c| c.to_ascii_lowercase()).collect();
    let mut includes: Vec<String> = index
        .include_columns
        .iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();
    includes.sort();

    let filter = index
        .filter_expression
        .as_deref()
        .map(entity_model::normalize_expression)
        .unwrap_or_default();

    format!(
        "{}|unique={}|filter={}|include={}",
        columns.join(","),
        index.is_unique,
        filter,
        includes.join(",")
    )
}

/// Byte width of one column in an index key. Variable text counts its
/// declared maximum; `max` types count the full key limit.
pub(crate) fn column_key_bytes(column: &Column) -> u32 {
    let base = column.base_type().to_ascii_lowercase();

    match base.as_str() {
        "nvarchar" | "nchar" => match column.declared_length() {
            Some(TextLength::Chars(n)) => 2 * n,
            Some(TextLength::Max) => MAX_INDEX_KEY_BYTES,
            None => MAX_INDEX_KEY_BYTES,
        },
        "varchar" | "char" | "binary" | "varbinary" => match column.declared_length() {
            Some(TextLength::Chars(n)) => n,
            Some(TextLength::Max) => MAX_INDEX_KEY_BYTES,
            None => MAX_INDEX_KEY_BYTES,
        },
        "tinyint" | "bit" => 1,
        "smallint" => 2,
        "int" | "real" | "smallmoney" => 4,
        "bigint" | "float" | "money" | "datetime" | "datetime2" => 8,
        "smalldatetime" => 4,
        "date" => 3,
        "time" => 5,
        "uniqueidentifier" => 16,
        "decimal" | "numeric" => match column.precision.unwrap_or(18) {
            0..=9 => 5,
            10..=19 => 9,
            20..=28 => 13,
            _ => 17,
        },
        _ => 8,
    }
}
