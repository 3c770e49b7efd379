use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::{DataSetDefinition, ParameterValues};
use crate::error::{ReportError, Result};
use crate::value::{TypeCode, Value};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub type_code: TypeCode,
}

impl Field {
    pub fn new(name: impl Into<String>, type_code: TypeCode) -> Self {
        Self {
            name: name.into(),
            type_code,
        }
    }
}

pub(crate) fn field_position(fields: &[Field], name: &str) -> Option<usize> {
    fields
        .iter()
        .position(|field| field.name == name)
        .or_else(|| {
            fields
                .iter()
                .position(|field| field.name.eq_ignore_ascii_case(name))
        })
}

/// A row: its position in the owning rowset plus shared values.
#[derive(Debug, Clone)]
pub struct Row {
    index: usize,
    schema: Arc<[Field]>,
    values: Arc<[Value]>,
}

impl Row {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, position: usize) -> &Value {
        self.values.get(position).unwrap_or(&NULL)
    }

    /// Looks a field up by name; `hint` is tried first.
    pub fn field(&self, name: &str, hint: Option<usize>) -> Option<&Value> {
        if let Some(position) = hint {
            if self.schema.get(position).is_some_and(|f| f.name == name) {
                return Some(self.get(position));
            }
        }
        field_position(&self.schema, name).map(|position| self.get(position))
    }

    fn reindexed(&self, index: usize) -> Row {
        Row {
            index,
            schema: Arc::clone(&self.schema),
            values: Arc::clone(&self.values),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowSet {
    fields: Arc<[Field]>,
    rows: Vec<Row>,
}

impl RowSet {
    pub fn new(fields: Vec<Field>, rows: Vec<Vec<Value>>) -> Self {
        let fields: Arc<[Field]> = fields.into();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, values)| Row {
                index,
                schema: Arc::clone(&fields),
                values: values.into(),
            })
            .collect();
        Self { fields, rows }
    }

    pub fn empty(fields: Vec<Field>) -> Self {
        Self::new(fields, Vec::new())
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        field_position(&self.fields, name)
    }

    /// Builds a copy holding `rows` in the given order, renumbered from zero.
    /// Values are shared with the source.
    pub fn with_rows<'a>(&self, rows: impl IntoIterator<Item = &'a Row>) -> RowSet {
        RowSet {
            fields: Arc::clone(&self.fields),
            rows: rows
                .into_iter()
                .enumerate()
                .map(|(index, row)| row.reindexed(index))
                .collect(),
        }
    }

    /// Copy of the inclusive range `start..=end`; `end < start` gives an empty set.
    pub fn slice(&self, start: usize, end: isize) -> RowSet {
        if end < 0 || (end as usize) < start || start >= self.rows.len() {
            return self.with_rows(std::iter::empty());
        }
        let end = (end as usize).min(self.rows.len() - 1);
        self.with_rows(&self.rows[start..=end])
    }
}

/// An inclusive row range over a shared rowset. `end == -1` marks an empty window.
#[derive(Debug, Clone)]
pub struct RowWindow {
    pub rows: Arc<RowSet>,
    pub start: usize,
    pub end: isize,
}

impl RowWindow {
    pub fn all(rows: Arc<RowSet>) -> Self {
        let end = rows.len() as isize - 1;
        Self {
            rows,
            start: 0,
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start as isize
    }

    pub fn first(&self) -> Option<&Row> {
        if self.is_empty() {
            None
        } else {
            self.rows.row(self.start)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        let rows = self.rows.rows();
        let slice: &[Row] = if self.is_empty() || self.start >= rows.len() {
            &[]
        } else {
            let end = (self.end as usize).min(rows.len() - 1);
            &rows[self.start..=end]
        };
        slice.iter()
    }
}

/// Supplies the rows of a data set. Fetches complete before layout starts.
pub trait RowSource: Send + Sync {
    fn fetch(&self, data_set: &DataSetDefinition, parameters: &ParameterValues) -> Result<RowSet>;
}

/// In-process rowsets keyed by data set name.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowSource {
    sets: HashMap<String, RowSet>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_set(mut self, name: impl Into<String>, rows: RowSet) -> Self {
        self.insert(name, rows);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, rows: RowSet) {
        self.sets.insert(name.into().to_ascii_lowercase(), rows);
    }
}

impl RowSource for MemoryRowSource {
    fn fetch(&self, data_set: &DataSetDefinition, _parameters: &ParameterValues) -> Result<RowSet> {
        let name = data_set.name.as_deref().unwrap_or_default();
        self.sets
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ReportError::MissingDataSet(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RowSet {
        RowSet::new(
            vec![
                Field::new("Region", TypeCode::String),
                Field::new("Amount", TypeCode::Int64),
            ],
            vec![
                vec!["North".into(), 10.into()],
                vec!["South".into(), 20.into()],
                vec!["East".into(), 30.into()],
            ],
        )
    }

    #[test]
    fn slices_renumber_and_share_values() {
        let rows = sample();
        let tail = rows.slice(1, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.rows()[0].index(), 0);
        assert_eq!(tail.rows()[0].get(0), &Value::from("South"));
        assert!(Arc::ptr_eq(&tail.rows()[0].values, &rows.rows()[1].values));
        assert!(rows.slice(2, 1).is_empty());
        assert!(rows.slice(0, -1).is_empty());
    }

    #[test]
    fn field_lookup_ignores_stale_hint() {
        let rows = sample();
        let row = &rows.rows()[2];
        assert_eq!(row.field("Amount", Some(0)), Some(&Value::Int(30)));
        assert_eq!(row.field("amount", None), Some(&Value::Int(30)));
        assert_eq!(row.field("Missing", None), None);
    }

    #[test]
    fn window_iterates_inclusive_range() {
        let rows = Arc::new(sample());
        let window = RowWindow {
            rows: Arc::clone(&rows),
            start: 1,
            end: 2,
        };
        let indices: Vec<usize> = window.iter().map(Row::index).collect();
        assert_eq!(indices, vec![1, 2]);
        let empty = RowWindow {
            rows,
            start: 0,
            end: -1,
        };
        assert!(empty.is_empty());
        assert_eq!(empty.iter().count(), 0);
    }
}
