//! # pgts
//!
//! PostgreSQL / TimescaleDB access layer: dynamic, type-aware query building,
//! pooled and transactional execution, schema introspection and time-series reads.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pgts::prelude::*;
//!
//! let db = pgts::connect("localhost", 5432, "postgres", "secret", "metrics", 10, 30).await?;
//!
//! let rows = Rows::new("readings")
//!     .field(Field::new("Time", Datatype::Timestamp))
//!     .field(Field::new("temp", Datatype::Double))
//!     .row(vec![Utc::now().naive_utc().into(), 21.5.into()]);
//! db.create_table(&rows, true, &[]).await?;
//! db.insert(&rows, &[]).await?;
//!
//! let latest = db.get_latest_value(&["temp"], "readings").await?;
//! ```
//!
//! ## Layers
//!
//! | Module       | Role                                            |
//! |--------------|-------------------------------------------------|
//! | `rows`       | Result sets and write payloads                  |
//! | `builder`    | SQL text for writes and DDL                     |
//! | `driver`     | Pool, execution, batches, transactions, COPY    |
//! | `schema`     | Catalog reads, DDL, hypertables, retention      |
//! | `timeseries` | Latest, range, downsampled and gap-filled reads |

pub mod builder;
pub mod config;
pub mod driver;
pub mod error;
pub mod parser;
pub mod rows;
pub mod schema;
pub mod timeseries;
pub mod types;
pub mod value;

pub use driver::{connect, Batch, Driver, PoolConfig, Transaction};
pub use error::{DbError, DbResult};

pub mod prelude {
    pub use crate::builder::{
        build_insert_query, encode_literal, format_timestamp, CompareOp, Filter, Render, Statement,
        ToSql, UpdateRequest,
    };
    pub use crate::driver::{connect, Batch, Driver, PoolConfig, Transaction};
    pub use crate::error::*;
    pub use crate::rows::Rows;
    pub use crate::types::{Aggregate, ConnPoolStat, Datatype, Field, HistoricWhere, TIME_COLUMN};
    pub use crate::value::{FromValue, FromValues, Value};
    pub use chrono::Utc;
}
