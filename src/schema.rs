//! Schema introspection, DDL and retention.
//!
//! Table and column listings come from the catalog. Hypertable promotion and
//! chunk-based retention need the TimescaleDB extension; retention falls back to a
//! plain row delete when the extension or the hypertable is absent.

use crate::builder::{CreateIndex, CreateTable, Render, Statement, ToSql, qualified_table};
use crate::driver::Driver;
use crate::error::{DbError, DbResult};
use crate::rows::{DEFAULT_SCHEMA, Rows};
use crate::types::{Datatype, Field, TIME_COLUMN};
use crate::value::Value;

/// Chunk width of every hypertable created here.
pub const CHUNK_INTERVAL: &str = "1 day";

const TABLES_QUERY: &str = "SELECT tablename::text FROM pg_catalog.pg_tables \
     WHERE schemaname = $1 ORDER BY tablename";

const FIELDS_QUERY: &str = "SELECT column_name::text, data_type::text \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position";

const TIMESCALE_QUERY: &str =
    "SELECT extname::text FROM pg_catalog.pg_extension WHERE extname = 'timescaledb'";

const HYPERTABLES_QUERY: &str = "SELECT table_name::text FROM _timescaledb_catalog.hypertable \
     WHERE schema_name = $1 ORDER BY table_name";

fn days_param(days: u32) -> DbResult<Value> {
    i32::try_from(days)
        .map(Value::Int)
        .map_err(|_| DbError::invalid(format!("retention of {} days is out of range", days)))
}

/// Promote `schema.table` to a hypertable on `"Time"`; a no-op if it already is one.
pub fn hypertable_statement(schema: &str, table: &str) -> Statement {
    Statement::new(
        format!(
            "SELECT create_hypertable($1::regclass, '{}', \
             chunk_time_interval => interval '{}', if_not_exists => TRUE)",
            TIME_COLUMN, CHUNK_INTERVAL
        ),
        vec![Value::Text(qualified_table(schema, table))],
    )
}

/// Row-by-row retention delete.
pub fn retention_delete(schema: &str, table: &str, days: u32) -> DbResult<Statement> {
    Ok(Statement::new(
        format!(
            "DELETE FROM {} WHERE \"{}\" < now() - $1::int * interval '1 day'",
            qualified_table(schema, table),
            TIME_COLUMN
        ),
        vec![days_param(days)?],
    ))
}

/// Whole-chunk retention for a hypertable; returns one row per dropped chunk.
pub fn retention_drop_chunks(schema: &str, table: &str, days: u32) -> DbResult<Statement> {
    Ok(Statement::new(
        "SELECT drop_chunks($1::regclass, older_than => $2::int * interval '1 day')::text",
        vec![Value::Text(qualified_table(schema, table)), days_param(days)?],
    ))
}

impl Driver {
    /// Tables of the `public` schema.
    pub async fn get_tables_name(&self) -> DbResult<Vec<String>> {
        let names: Vec<(String,)> = self
            .query_as(TABLES_QUERY, &[Value::from(DEFAULT_SCHEMA)])
            .await?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    /// Column names and datatypes of a `public` table, in column order.
    pub async fn get_fields(&self, table: &str) -> DbResult<Vec<Field>> {
        let columns: Vec<(String, String)> = self
            .query_as(FIELDS_QUERY, &[Value::from(DEFAULT_SCHEMA), Value::from(table)])
            .await?;
        columns
            .into_iter()
            .map(|(name, data_type)| Ok(Field::new(name, data_type.parse::<Datatype>()?)))
            .collect()
    }

    /// Create the table described by `rows` in its schema (`public` when unset);
    /// columns named in `constraints` become `NOT NULL UNIQUE`. A time-series
    /// table is also promoted to a hypertable, which needs the extension.
    pub async fn create_table(
        &self,
        rows: &Rows,
        is_time_series: bool,
        constraints: &[String],
    ) -> DbResult<u64> {
        let stmt = CreateTable { rows, constraints }.to_sql(Render::Inline)?;
        if is_time_series {
            if !self.has_timescale().await? {
                return Err(DbError::Unsupported("hypertables need the timescaledb extension"));
            }
            if rows.column_index(TIME_COLUMN).is_none() {
                return Err(DbError::invalid(format!(
                    "time-series table '{}' has no \"{}\" column",
                    rows.table_name, TIME_COLUMN
                )));
            }
        }
        let affected = self.exec_statement(&stmt).await?;
        if is_time_series {
            self.create_hypertable_in(rows.schema_or_default(), &rows.table_name)
                .await?;
        }
        self.invalidate_table_cache();
        tracing::info!("Created table '{}'", rows.table_name);
        Ok(affected)
    }

    /// Promote an existing `public` table to a hypertable.
    pub async fn create_hypertable(&self, table: &str) -> DbResult<()> {
        self.create_hypertable_in(DEFAULT_SCHEMA, table).await
    }

    pub async fn create_hypertable_in(&self, schema: &str, table: &str) -> DbResult<()> {
        self.exec_statement(&hypertable_statement(schema, table)).await?;
        self.invalidate_table_cache();
        tracing::info!("Promoted '{}.{}' to a hypertable", schema, table);
        Ok(())
    }

    pub async fn create_index(&self, name: &str, table: &str, columns: &[String]) -> DbResult<u64> {
        let stmt = CreateIndex { name, table, columns }.to_sql(Render::Inline)?;
        let affected = self.exec_statement(&stmt).await?;
        self.invalidate_table_cache();
        Ok(affected)
    }

    /// Whether the timescaledb extension is installed in this database.
    pub async fn has_timescale(&self) -> DbResult<bool> {
        Ok(!self.query(TIMESCALE_QUERY, &[]).await?.is_empty())
    }

    /// Hypertables of the `public` schema.
    pub async fn get_hypertables_name(&self) -> DbResult<Vec<String>> {
        let names: Vec<(String,)> = self
            .query_as(HYPERTABLES_QUERY, &[Value::from(DEFAULT_SCHEMA)])
            .await?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    pub async fn is_hypertable(&self, table: &str) -> DbResult<bool> {
        Ok(self.get_hypertables_name().await?.iter().any(|t| t == table))
    }

    /// Remove data older than `days` from a `public` table. Hypertables drop whole
    /// chunks (the count returned is chunks dropped); other tables delete rows.
    pub async fn delete_values_from_interval(&self, table: &str, days: u32) -> DbResult<u64> {
        if !self.has_timescale().await? {
            tracing::warn!("timescaledb not installed, deleting rows from '{}'", table);
            return self
                .exec_statement(&retention_delete(DEFAULT_SCHEMA, table, days)?)
                .await;
        }
        if !self.is_hypertable(table).await? {
            tracing::debug!("'{}' is not a hypertable, deleting rows", table);
            return self
                .exec_statement(&retention_delete(DEFAULT_SCHEMA, table, days)?)
                .await;
        }
        let stmt = retention_drop_chunks(DEFAULT_SCHEMA, table, days)?;
        let dropped = self.query(&stmt.sql, &stmt.params).await?;
        tracing::info!("Dropped {} chunks from '{}'", dropped.len(), table);
        Ok(dropped.len() as u64)
    }
}
