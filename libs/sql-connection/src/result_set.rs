use crate::Value;
use std::sync::Arc;

/// The rows returned by one query, with column names shared across rows.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Arc<Vec<String>>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        ResultSet {
            columns: Arc::new(columns),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Consumes the set, returning the only row, if there is exactly one.
    pub fn into_single(self) -> Option<ResultRow> {
        let columns = self.columns;
        let mut rows = self.rows;

        if rows.len() != 1 {
            return None;
        }

        Some(ResultRow {
            columns,
            values: rows.remove(0),
        })
    }
}

impl IntoIterator for ResultSet {
    type Item = ResultRow;
    type IntoIter = ResultSetIterator;

    fn into_iter(self) -> Self::IntoIter {
        ResultSetIterator {
            columns: self.columns,
            rows: self.rows.into_iter(),
        }
    }
}

pub struct ResultSetIterator {
    columns: Arc<Vec<String>>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl Iterator for ResultSetIterator {
    type Item = ResultRow;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|values| ResultRow {
            columns: self.columns.clone(),
            values,
        })
    }
}

/// One row, addressed by column name.
#[derive(Debug, Clone)]
pub struct ResultRow {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl ResultRow {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| &self.values[idx])
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.to_string_value())
    }

    pub fn get_expect_string(&self, name: &str) -> String {
        self.get_string(name)
            .unwrap_or_else(|| panic!("expected a string value in column `{name}`"))
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_bool())
    }

    pub fn get_expect_bool(&self, name: &str) -> bool {
        self.get_bool(name)
            .unwrap_or_else(|| panic!("expected a boolean value in column `{name}`"))
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.as_i64())
    }

    pub fn get_expect_i64(&self, name: &str) -> i64 {
        self.get_i64(name)
            .unwrap_or_else(|| panic!("expected an integer value in column `{name}`"))
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get_i64(name).and_then(|i| u32::try_from(i).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ResultSet {
        ResultSet::new(
            vec!["name".into(), "is_nullable".into(), "max_length".into()],
            vec![
                vec![Value::Text("Id".into()), Value::Boolean(false), Value::Int32(16)],
                vec![Value::Text("Email".into()), Value::Boolean(true), Value::Int32(400)],
            ],
        )
    }

    #[test]
    fn rows_are_addressed_by_column_name() {
        let mut rows = sample().into_iter();

        let first = rows.next().unwrap();
        assert_eq!(first.get_expect_string("name"), "Id");
        assert!(!first.get_expect_bool("is_nullable"));
        assert_eq!(first.get_expect_i64("max_length"), 16);

        let second = rows.next().unwrap();
        assert_eq!(second.get_u32("max_length"), Some(400));
        assert!(rows.next().is_none());
    }

    #[test]
    fn into_single_requires_exactly_one_row() {
        assert!(sample().into_single().is_none());

        let single = ResultSet::new(vec!["n".into()], vec![vec![Value::Int32(1)]]);
        assert_eq!(single.into_single().unwrap().get_expect_i64("n"), 1);
    }

    #[test]
    fn integers_coerce_to_bool_for_bit_columns() {
        let set = ResultSet::new(vec!["is_identity".into()], vec![vec![Value::Int32(1)]]);
        assert!(set.into_single().unwrap().get_expect_bool("is_identity"));
    }
}
