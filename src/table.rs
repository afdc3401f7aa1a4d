//! In-memory string table shared by every stage.
//!
//! All cell values are kept as text, the way the inputs arrive; numeric and
//! date interpretation happens at the point of use.

use crate::error::{LinkageError, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Build a table, padding short rows and truncating long ones to the header width.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut table = Self::new(headers);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Index of `name`, or a schema error naming the table it was expected in.
    pub fn require_column(&self, name: &str, source: &str) -> Result<usize> {
        self.column_index(name).ok_or_else(|| {
            LinkageError::Schema(format!("column '{}' is missing from {}", name, source))
        })
    }

    /// Append a row fitted to the header width; returns how many non-empty
    /// cells fell beyond the last header.
    pub fn push_row(&mut self, mut row: Vec<String>) -> usize {
        let width = self.headers.len();
        let cut = row.iter().skip(width).filter(|v| !v.trim().is_empty()).count();
        row.resize(width, String::new());
        self.rows.push(row);
        cut
    }

    pub fn value(&self, row: usize, col: usize) -> &str {
        self.rows[row][col].as_str()
    }

    pub fn column_values(&self, col: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| row[col].as_str())
    }

    /// Add a column, replacing the values if it already exists.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(LinkageError::Schema(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.headers.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    /// Add a column filled with one value, replacing it if it already exists.
    pub fn fill_column(&mut self, name: &str, value: &str) {
        let values = vec![value.to_string(); self.rows.len()];
        // lengths always agree here
        let _ = self.set_column(name, values);
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.headers[idx] = to.to_string();
        }
    }

    pub fn rename_columns(&mut self, mut rename: impl FnMut(&str) -> String) {
        for header in &mut self.headers {
            *header = rename(header);
        }
    }

    pub fn drop_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.headers.remove(idx);
            for row in &mut self.rows {
                row.remove(idx);
            }
        }
    }

    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[String]) -> bool) {
        self.rows.retain(|row| keep(row));
    }

    /// Copy of the rows at `indices`, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            headers: self.headers.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Rearrange columns; `order` lists existing column indices.
    pub fn reorder_columns(&mut self, order: &[usize]) {
        self.headers = order.iter().map(|&i| self.headers[i].clone()).collect();
        for row in &mut self.rows {
            *row = order.iter().map(|&i| std::mem::take(&mut row[i])).collect();
        }
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<String>>) {
        (self.headers, self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            vec!["id".into(), "address".into()],
            vec![vec!["1".into(), "a".into()], vec!["2".into()]],
        )
    }

    #[test]
    fn test_short_rows_are_padded() {
        let table = sample();
        assert_eq!(table.value(1, 1), "");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_push_row_counts_cut_cells() {
        let mut table = Table::new(vec!["id".into(), "address".into()]);
        assert_eq!(table.push_row(vec!["1".into(), "a".into(), "extra".into(), " ".into()]), 1);
        assert_eq!(table.push_row(vec!["2".into(), "b".into(), String::new()]), 0);
        assert_eq!(table.rows()[0].len(), 2);
    }

    #[test]
    fn test_set_column_appends_then_replaces() {
        let mut table = sample();
        table.set_column("flag", vec!["1".into(), "0".into()]).unwrap();
        assert_eq!(table.headers().len(), 3);
        table.fill_column("flag", "1");
        assert_eq!(table.column_values(2).collect::<Vec<_>>(), vec!["1", "1"]);
        assert!(table.set_column("bad", vec![]).is_err());
    }

    #[test]
    fn test_reorder_and_drop() {
        let mut table = sample();
        table.reorder_columns(&[1, 0]);
        assert_eq!(table.headers(), &["address".to_string(), "id".to_string()]);
        assert_eq!(table.value(0, 1), "1");
        table.drop_column("address");
        assert_eq!(table.rows()[0], vec!["1".to_string()]);
    }

    #[test]
    fn test_require_column_names_source() {
        let err = sample().require_column("meter_number", "water_status").unwrap_err();
        assert!(err.to_string().contains("water_status"));
    }
}
