//! Schema snapshot: table -> column -> declared type.
//!
//! Taken once per repair session. Lookups are case-insensitive; names are
//! stored lowercased.

use std::collections::BTreeMap;

use crate::live::{ExecError, LiveDatabase};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, column: &str, data_type: &str) {
        self.tables
            .entry(table.to_lowercase())
            .or_default()
            .insert(column.to_lowercase(), data_type.to_string());
    }

    /// Builder form of [`SchemaSnapshot::insert`] for one table.
    pub fn with_table(mut self, table: &str, columns: &[(&str, &str)]) -> Self {
        for (column, data_type) in columns {
            self.insert(table, column, data_type);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn columns(&self, table: &str) -> Option<&BTreeMap<String, String>> {
        self.tables.get(&table.to_lowercase())
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|cols| cols.contains_key(&column.to_lowercase()))
    }

    /// Tables declaring `column`, in name order.
    pub fn tables_with_column(&self, column: &str) -> Vec<&str> {
        let column = column.to_lowercase();
        self.tables
            .iter()
            .filter(|(_, cols)| cols.contains_key(&column))
            .map(|(table, _)| table.as_str())
            .collect()
    }

    /// Every distinct column name across all tables.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tables
            .values()
            .flat_map(|cols| cols.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Read the full schema in one metadata query. Any failure aborts; a partial
/// snapshot is never returned.
pub fn snapshot(db: &mut dyn LiveDatabase) -> Result<SchemaSnapshot, ExecError> {
    let columns = db.schema_columns()?;
    let mut schema = SchemaSnapshot::new();
    for info in &columns {
        schema.insert(&info.table, &info.column, &info.data_type);
    }
    if schema.is_empty() {
        tracing::warn!(backend = %db.backend(), "schema snapshot is empty");
    } else {
        tracing::debug!(tables = schema.table_count(), columns = columns.len(), "schema snapshot taken");
    }
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table("Orders", &[("id", "integer"), ("Customer_ID", "integer")])
            .with_table("customers", &[("id", "integer"), ("name", "text")])
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let schema = sample();
        assert!(schema.has_column("ORDERS", "customer_id"));
        assert_eq!(
            schema.columns("Customers").and_then(|c| c.get("name")).map(String::as_str),
            Some("text")
        );
        assert!(!schema.has_column("missing", "id"));
    }

    #[test]
    fn test_tables_with_column() {
        assert_eq!(sample().tables_with_column("ID"), vec!["customers", "orders"]);
        assert!(sample().tables_with_column("total").is_empty());
    }

    #[test]
    fn test_column_names_are_distinct() {
        assert_eq!(sample().column_names(), vec!["customer_id", "id", "name"]);
    }
}
