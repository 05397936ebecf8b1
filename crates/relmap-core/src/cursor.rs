//! Result rows, cursors and scan destinations.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Where a scanned column ends up.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Route {
    /// A scalar column of the record.
    Field(String),
    /// A column of a belongs-to or has-one target (`assoc.field`).
    Nested(String, Box<Route>),
    /// Keep the value; the caller reads it back.
    Capture,
    /// Drop the value.
    Discard,
}

/// One destination for a scanned column.
///
/// A [`Cursor`] writes into scanners with [`Scanner::put`]; the owning
/// [`Document`](crate::document::Document) then applies them with
/// `assign`.
#[derive(Debug, Clone)]
pub struct Scanner {
    pub(crate) route: Route,
    value: Option<Value>,
}

impl Scanner {
    pub(crate) fn new(route: Route) -> Self {
        Self { route, value: None }
    }

    /// A destination that only holds the value for the caller.
    pub fn capture() -> Self {
        Self::new(Route::Capture)
    }

    /// A destination that drops whatever is written into it.
    pub fn discard() -> Self {
        Self::new(Route::Discard)
    }

    pub fn is_discard(&self) -> bool {
        self.route == Route::Discard
    }

    pub fn put(&mut self, value: Value) {
        if self.route != Route::Discard {
            self.value = Some(value);
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn take(&mut self) -> Option<Value> {
        self.value.take()
    }

    pub(crate) fn into_parts(self) -> (Route, Option<Value>) {
        (self.route, self.value)
    }
}

/// Forward-only access to a query result.
pub trait Cursor: Send {
    /// Column names of the result, in scan order.
    fn fields(&mut self) -> Result<Vec<String>>;

    /// Advance to the next row. Returns false once exhausted.
    fn next(&mut self) -> bool;

    /// Write the current row into `dest`, one scanner per column.
    fn scan(&mut self, dest: &mut [Scanner]) -> Result<()>;

    fn close(&mut self) {}
}

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with its own column metadata.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row sharing column metadata with its result set.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A [`Cursor`] over rows already buffered in memory.
///
/// Drivers that hand back a complete `Vec<Row>` can return this from
/// [`Adapter::query`](crate::adapter::Adapter::query).
#[derive(Debug)]
pub struct RowCursor {
    columns: Arc<ColumnInfo>,
    rows: std::vec::IntoIter<Row>,
    current: Option<Row>,
}

impl RowCursor {
    pub fn new(columns: Arc<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows: rows.into_iter(),
            current: None,
        }
    }

    /// Build from column names and raw value vectors.
    pub fn from_values(names: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let columns = Arc::new(ColumnInfo::new(names));
        let rows = rows
            .into_iter()
            .map(|values| Row::with_columns(Arc::clone(&columns), values))
            .collect();
        Self::new(columns, rows)
    }
}

impl Cursor for RowCursor {
    fn fields(&mut self) -> Result<Vec<String>> {
        Ok(self.columns.names().to_vec())
    }

    fn next(&mut self) -> bool {
        self.current = self.rows.next();
        self.current.is_some()
    }

    fn scan(&mut self, dest: &mut [Scanner]) -> Result<()> {
        let Some(row) = &self.current else {
            return Err(Error::Custom("scan called without a current row".to_string()));
        };
        if dest.len() != row.len() {
            return Err(Error::Type(TypeError {
                expected: "one destination per column",
                actual: format!("{} destinations for {} columns", dest.len(), row.len()),
                column: None,
            }));
        }
        for (scanner, value) in dest.iter_mut().zip(row.values()) {
            scanner.put(value.clone());
        }
        Ok(())
    }

    fn close(&mut self) {
        self.current = None;
        self.rows = Vec::new().into_iter();
    }
}
