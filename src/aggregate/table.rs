// src/aggregate/table.rs
use std::cmp::Ordering;
use std::io;

use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::record::{Record, Value};

/// A named table of named columns. Rows always have one cell per column.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a table from records; columns follow first appearance across the records.
    pub fn from_records<'a>(
        name: impl Into<String>,
        records: impl IntoIterator<Item = &'a Record>,
    ) -> Self {
        let records: Vec<&Record> = records.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.to_string());
                }
            }
        }
        let mut table = Self::new(name, columns);
        for record in records {
            table.push_record(record);
        }
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, padding short rows with absent numbers.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Number(None));
        self.rows.push(row);
    }

    pub fn push_record(&mut self, record: &Record) {
        let row = self
            .columns
            .iter()
            .map(|c| record.get(c).cloned().unwrap_or(Value::Number(None)))
            .collect();
        self.rows.push(row);
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let c = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(c))
    }

    pub fn number(&self, row: usize, column: &str) -> Option<f64> {
        self.cell(row, column).and_then(Value::number)
    }

    pub fn column(&self, column: &str) -> Option<Vec<&Value>> {
        let c = self.column_index(column)?;
        Some(self.rows.iter().map(|r| &r[c]).collect())
    }

    /// Writes the header and every row as CSV; absent numbers become empty cells.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(&self.columns)?;
        for row in &self.rows {
            out.write_record(row.iter().map(Value::render))?;
        }
        out.flush()?;
        Ok(())
    }
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Table", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &self.rows)?;
        state.end()
    }
}

/// Epoch labels sort numerically when both parse as numbers, otherwise as text.
pub fn compare_epochs(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Epoch label usable as an ordered map key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochKey(pub String);

impl Ord for EpochKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_epochs(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for EpochKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Totally ordered wrapper for amplitudes used as group keys.
#[derive(Clone, Copy, Debug)]
pub struct Amp(pub f64);

impl PartialEq for Amp {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Amp {}

impl Ord for Amp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Amp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_share_a_column_union() {
        let a = Record::new().with("x", 1.0).with("y", 2.0);
        let b = Record::new().with("x", 3.0).with("z", "t");
        let table = Table::from_records("t", [&a, &b]);
        assert_eq!(table.columns(), &["x", "y", "z"]);
        assert_eq!(table.number(1, "y"), None);
        assert_eq!(table.cell(1, "z").and_then(Value::text), Some("t"));
    }

    #[test]
    fn csv_leaves_absent_cells_empty() {
        let mut table = Table::new("t", vec!["a".into(), "b".into()]);
        table.push_row(vec![Value::from(1.5)]);
        let mut out = Vec::new();
        table.write_csv(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a,b\n1.5,\n");
    }

    #[test]
    fn epochs_sort_numerically() {
        let mut epochs = vec!["10", "2", "b", "a", "1"];
        epochs.sort_by(|a, b| compare_epochs(a, b));
        assert_eq!(epochs, vec!["1", "2", "10", "a", "b"]);
    }
}
