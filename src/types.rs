//! Column kinds, field metadata and small enums shared across the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DbError;

/// Name of the time column every time-series table carries.
pub const TIME_COLUMN: &str = "Time";

/// Supported column kinds.
///
/// Never inferred from values: supplied by the caller or read back from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    Boolean,
    Text,
    Integer,
    Bigint,
    Real,
    Double,
    Timestamp,
    Blob,
    Json,
    Uuid,
}

impl Datatype {
    /// The SQL spelling used in DDL and casts.
    pub fn sql_name(&self) -> &'static str {
        match self {
            Datatype::Boolean => "boolean",
            Datatype::Text => "text",
            Datatype::Integer => "integer",
            Datatype::Bigint => "bigint",
            Datatype::Real => "real",
            Datatype::Double => "double precision",
            Datatype::Timestamp => "timestamp without time zone",
            Datatype::Blob => "bytea",
            Datatype::Json => "jsonb",
            Datatype::Uuid => "uuid",
        }
    }

    /// Map an engine type name (`PgTypeInfo::name`) onto a datatype.
    pub fn from_engine_name(name: &str) -> Option<Self> {
        let dt = match name.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Datatype::Boolean,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Datatype::Text,
            "INT2" | "INT4" | "SMALLINT" | "INTEGER" => Datatype::Integer,
            "INT8" | "BIGINT" => Datatype::Bigint,
            "FLOAT4" | "REAL" => Datatype::Real,
            "FLOAT8" | "DOUBLE PRECISION" => Datatype::Double,
            "TIMESTAMP" | "TIMESTAMPTZ" => Datatype::Timestamp,
            "BYTEA" => Datatype::Blob,
            "JSON" | "JSONB" => Datatype::Json,
            "UUID" => Datatype::Uuid,
            _ => return None,
        };
        Some(dt)
    }

    /// True for kinds rendered as quoted text literals.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Datatype::Text | Datatype::Timestamp | Datatype::Json | Datatype::Uuid
        )
    }

    /// True for IEEE floating point kinds.
    pub fn is_float(&self) -> bool {
        matches!(self, Datatype::Real | Datatype::Double)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for Datatype {
    type Err = DbError;

    /// Parse a catalog spelling (`information_schema.columns.data_type`) or an
    /// engine type name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = match s.trim().to_ascii_lowercase().as_str() {
            "boolean" => Datatype::Boolean,
            "text" | "character varying" | "character" => Datatype::Text,
            "integer" | "smallint" => Datatype::Integer,
            "bigint" => Datatype::Bigint,
            "real" => Datatype::Real,
            "double precision" => Datatype::Double,
            "timestamp without time zone" | "timestamp with time zone" | "timestamp" => {
                Datatype::Timestamp
            }
            "bytea" => Datatype::Blob,
            "jsonb" | "json" => Datatype::Json,
            "uuid" => Datatype::Uuid,
            other => {
                return Datatype::from_engine_name(other)
                    .ok_or_else(|| DbError::UnsupportedType(s.to_string()));
            }
        };
        Ok(dt)
    }
}

/// One column: name plus datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub datatype: Datatype,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
        }
    }
}

/// Lower/upper bound predicate shape for historian range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoricWhere {
    /// `"Time" > start`
    TimeGreater,
    /// `"Time" < start`
    TimeLess,
    /// `start < "Time" < end`
    TimeSlot,
    /// `start <= "Time" < end`
    TimeSlotEqStart,
    /// `start < "Time" <= end`
    TimeSlotEqEnd,
}

/// Aggregate function applied per time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    Max,
    Min,
    Count,
    Avg,
}

impl Aggregate {
    /// SQL expression aggregating `column` (already quoted).
    pub(crate) fn apply(&self, column: &str) -> String {
        match self {
            Aggregate::Max => format!("max({})", column),
            Aggregate::Min => format!("min({})", column),
            Aggregate::Count => format!("count({})", column),
            Aggregate::Avg => format!("avg({})::double precision", column),
        }
    }
}

/// Point-in-time snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnPoolStat {
    /// Max simultaneous connections.
    pub max_connections: u32,
    /// Live connections, idle or checked out.
    pub current_connections: u32,
    /// Idle live connections.
    pub available_connections: u32,
}
