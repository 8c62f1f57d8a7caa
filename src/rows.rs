//! In-memory result set / write payload.

use serde::Serialize;

use crate::error::{DbError, DbResult};
use crate::types::Field;
use crate::value::{FromValues, Value};

/// Default schema used when a Rows value leaves it empty.
pub const DEFAULT_SCHEMA: &str = "public";

/// A set of rows: column metadata plus a value matrix.
///
/// Every tuple in `values` holds exactly one value per entry of `fields`, in the
/// same order; `Value::Null` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rows {
    pub schema_name: String,
    pub table_name: String,
    pub fields: Vec<Field>,
    pub values: Vec<Vec<Value>>,
}

impl Rows {
    /// Empty rows bound to `table` in the default schema.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table_name: table.into(),
            ..Self::default()
        }
    }

    /// Set the schema name.
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema_name = schema.into();
        self
    }

    /// Append a column.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Replace the column list.
    pub fn with_fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }

    /// Append a value tuple.
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.values.push(values);
        self
    }

    /// Append a value tuple in place.
    pub fn push(&mut self, values: Vec<Value>) {
        self.values.push(values);
    }

    /// Schema name, falling back to `public`.
    pub fn schema_or_default(&self) -> &str {
        if self.schema_name.is_empty() {
            DEFAULT_SCHEMA
        } else {
            &self.schema_name
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check the shape and representability invariants.
    pub fn validate(&self) -> DbResult<()> {
        if self.table_name.is_empty() {
            return Err(DbError::invalid("rows have no table name"));
        }
        if self.fields.is_empty() {
            return Err(DbError::invalid("rows have no fields"));
        }
        for tuple in &self.values {
            if tuple.len() != self.fields.len() {
                return Err(DbError::Shape {
                    expected: self.fields.len(),
                    found: tuple.len(),
                });
            }
            for (value, field) in tuple.iter().zip(&self.fields) {
                if !value.fits(field.datatype) {
                    return Err(DbError::mismatch(&field.name, field.datatype, value.kind()));
                }
            }
        }
        Ok(())
    }

    /// Decode every tuple into `T`.
    pub fn decode<T: FromValues>(&self) -> DbResult<Vec<T>> {
        self.values.iter().map(|v| T::from_values(v)).collect()
    }

    /// Decode the first tuple, failing with `NotFound` when there is none.
    pub fn decode_first<T: FromValues>(&self) -> DbResult<T> {
        let first = self.values.first().ok_or_else(|| {
            DbError::NotFound(format!("no row returned from '{}'", self.table_name))
        })?;
        T::from_values(first)
    }
}
