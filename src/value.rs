//! Dynamic cell values and typed binders.
//!
//! `Value` is what flows through a [`Rows`](crate::rows::Rows) matrix. Typed access goes
//! through [`FromValue`] (one cell) and [`FromValues`] (one tuple), checked at compile
//! time per destination type instead of by runtime reflection.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::builder::TIME_FORMAT;
use crate::error::{DbError, DbResult};
use crate::types::Datatype;

/// Dynamic value type for cells and query bindings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Uuid(Uuid),
}

impl Value {
    /// The datatype this value naturally belongs to; `None` for `Null`.
    pub fn datatype(&self) -> Option<Datatype> {
        let dt = match self {
            Value::Null => return None,
            Value::Bool(_) => Datatype::Boolean,
            Value::Int(_) => Datatype::Integer,
            Value::BigInt(_) => Datatype::Bigint,
            Value::Real(_) => Datatype::Real,
            Value::Double(_) => Datatype::Double,
            Value::Text(_) => Datatype::Text,
            Value::Timestamp(_) => Datatype::Timestamp,
            Value::Bytes(_) => Datatype::Blob,
            Value::Json(_) => Datatype::Json,
            Value::Uuid(_) => Datatype::Uuid,
        };
        Some(dt)
    }

    /// Variant name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::BigInt(_) => "BigInt",
            Value::Real(_) => "Real",
            Value::Double(_) => "Double",
            Value::Text(_) => "Text",
            Value::Timestamp(_) => "Timestamp",
            Value::Bytes(_) => "Bytes",
            Value::Json(_) => "Json",
            Value::Uuid(_) => "Uuid",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be stored in a column of `datatype`.
    ///
    /// Null fits everywhere, integers widen into larger integer and float columns,
    /// and text is accepted for every textual kind (the engine parses it).
    pub fn fits(&self, datatype: Datatype) -> bool {
        match (self, datatype) {
            (Value::Null, _) => true,
            (
                Value::Int(_),
                Datatype::Integer | Datatype::Bigint | Datatype::Real | Datatype::Double,
            ) => true,
            (Value::BigInt(_), Datatype::Bigint | Datatype::Double) => true,
            (Value::Real(_), Datatype::Real | Datatype::Double) => true,
            (Value::Double(_), Datatype::Double | Datatype::Real) => true,
            (Value::Text(_), dt) => dt.is_textual(),
            (v, dt) => v.datatype() == Some(dt),
        }
    }
}

/// Plain text form: timestamps in the fixed format, blobs as `\x` hex.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::BigInt(n) => write!(f, "{}", n),
            Value::Real(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Value::Bytes(b) => {
                f.write_str("\\x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Json(j) => write!(f, "{}", j),
            Value::Uuid(u) => write!(f, "{}", u),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Typed extraction of one cell.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> DbResult<Self>;
}

fn wrong(expected: Datatype, value: &Value) -> DbError {
    DbError::mismatch("<cell>", expected, value.kind())
}

impl FromValue for Value {
    fn from_value(value: &Value) -> DbResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            v => Err(wrong(Datatype::Boolean, v)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Int(n) => Ok(*n),
            Value::BigInt(n) => i32::try_from(*n).map_err(|_| wrong(Datatype::Integer, value)),
            v => Err(wrong(Datatype::Integer, v)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Int(n) => Ok(i64::from(*n)),
            Value::BigInt(n) => Ok(*n),
            v => Err(wrong(Datatype::Bigint, v)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Real(n) => Ok(*n),
            v => Err(wrong(Datatype::Real, v)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Real(n) => Ok(f64::from(*n)),
            Value::Double(n) => Ok(*n),
            Value::Int(n) => Ok(f64::from(*n)),
            v => Err(wrong(Datatype::Double, v)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            Value::Uuid(u) => Ok(u.to_string()),
            Value::Json(j) => Ok(j.to_string()),
            v => Err(wrong(Datatype::Text, v)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Timestamp(t) => Ok(*t),
            v => Err(wrong(Datatype::Timestamp, v)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            v => Err(wrong(Datatype::Blob, v)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Json(j) => Ok(j.clone()),
            v => Err(wrong(Datatype::Json, v)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            v => Err(wrong(Datatype::Uuid, v)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> DbResult<Self> {
        match value {
            Value::Null => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }
}

/// Typed extraction of one value tuple.
///
/// Implemented for tuples up to eight elements; implement it by hand for entity
/// structs to map a row onto named fields.
pub trait FromValues: Sized {
    fn from_values(values: &[Value]) -> DbResult<Self>;
}

/// Check that a tuple has exactly `expected` cells.
pub fn expect_arity(values: &[Value], expected: usize) -> DbResult<()> {
    if values.len() != expected {
        return Err(DbError::Shape {
            expected,
            found: values.len(),
        });
    }
    Ok(())
}

macro_rules! impl_from_values {
    ($len:expr; $($t:ident : $i:tt),+) => {
        impl<$($t: FromValue),+> FromValues for ($($t,)+) {
            fn from_values(values: &[Value]) -> DbResult<Self> {
                expect_arity(values, $len)?;
                Ok(($($t::from_value(&values[$i])?,)+))
            }
        }
    };
}

impl_from_values!(1; A: 0);
impl_from_values!(2; A: 0, B: 1);
impl_from_values!(3; A: 0, B: 1, C: 2);
impl_from_values!(4; A: 0, B: 1, C: 2, D: 3);
impl_from_values!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_values!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_from_values!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_from_values!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

impl FromValues for Vec<Value> {
    fn from_values(values: &[Value]) -> DbResult<Self> {
        Ok(values.to_vec())
    }
}
