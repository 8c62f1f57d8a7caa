//! Engine rows into `Value`s and `Field`s.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgColumn, PgRow};
use sqlx::{Column, Row, TypeInfo};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::types::{Datatype, Field};
use crate::value::Value;

/// Column metadata as a `Field`.
pub(crate) fn column_field(column: &PgColumn) -> DbResult<Field> {
    let type_name = column.type_info().name();
    let datatype = Datatype::from_engine_name(type_name)
        .ok_or_else(|| DbError::UnsupportedType(format!("{} ({})", type_name, column.name())))?;
    Ok(Field::new(column.name(), datatype))
}

fn cell<'r, T>(row: &'r PgRow, idx: usize) -> DbResult<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).map_err(DbError::Execution)
}

/// Decode one row by engine type name. TIMESTAMPTZ is normalized to UTC.
pub(crate) fn row_values(row: &PgRow) -> DbResult<Vec<Value>> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => cell::<bool>(row, i)?.map(Value::Bool),
            "INT2" => cell::<i16>(row, i)?.map(|v| Value::Int(i32::from(v))),
            "INT4" => cell::<i32>(row, i)?.map(Value::Int),
            "INT8" => cell::<i64>(row, i)?.map(Value::BigInt),
            "FLOAT4" => cell::<f32>(row, i)?.map(Value::Real),
            "FLOAT8" => cell::<f64>(row, i)?.map(Value::Double),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => cell::<String>(row, i)?.map(Value::Text),
            "TIMESTAMP" => cell::<NaiveDateTime>(row, i)?.map(Value::Timestamp),
            "TIMESTAMPTZ" => {
                cell::<DateTime<Utc>>(row, i)?.map(|t| Value::Timestamp(t.naive_utc()))
            }
            "BYTEA" => cell::<Vec<u8>>(row, i)?.map(Value::Bytes),
            "JSON" | "JSONB" => cell::<serde_json::Value>(row, i)?.map(Value::Json),
            "UUID" => cell::<Uuid>(row, i)?.map(Value::Uuid),
            other => {
                return Err(DbError::UnsupportedType(format!("{} ({})", other, column.name())));
            }
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}
