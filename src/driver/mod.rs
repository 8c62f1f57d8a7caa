//! Execution engine over a pooled PostgreSQL connection set.
//!
//! A [`Driver`] is a cheap, cloneable handle. Every operation holds one connection
//! for its whole duration, either acquired from the pool or borrowed from an open
//! [`Transaction`]; the connection goes back on every exit path when it drops.
//!
//! Write paths render through [`crate::builder`] with bound parameters; read paths
//! return [`Rows`] with field metadata populated even when no row matched.

mod batch;
mod copy;
mod pool;
mod row;
mod transaction;

pub use batch::Batch;
pub use copy::encode_copy_text;
pub use pool::{PoolConfig, connect};
pub use transaction::Transaction;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgColumn, PgConnection, PgPool, PgTypeInfo, Postgres,
};
use sqlx::query::Query;
use sqlx::{Executor, Row};

use crate::builder::{
    DeleteRequest, Filter, Insert, Render, Statement, ToSql, UpdateRequest, Upsert,
};
use crate::error::{DbError, DbResult};
use crate::rows::Rows;
use crate::types::Field;
use crate::value::{FromValues, Value};

use pool::{ResetMarker, Ticker};

/// Handle to a connection pool plus the execution engine over it.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    pool: PgPool,
    config: PoolConfig,
    reset: Arc<ResetMarker>,
    ticker: Mutex<Option<Ticker>>,
    /// Relation OID to table name.
    tables: RwLock<HashMap<u32, String>>,
}

/// SQL NULL sent with an unspecified parameter type, so the server infers it
/// from the surrounding statement.
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl sqlx::Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Whether `sql` is DDL that can rename, drop or recreate a relation.
fn changes_schema(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == ';')
        .next()
        .unwrap_or_default();
    ["ALTER", "DROP", "CREATE"]
        .iter()
        .any(|keyword| head.eq_ignore_ascii_case(keyword))
}

/// Bind one value onto a query.
pub(crate) fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(UntypedNull),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::BigInt(v) => query.bind(*v),
        Value::Real(v) => query.bind(*v),
        Value::Double(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Timestamp(v) => query.bind(*v),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(v),
        Value::Uuid(v) => query.bind(*v),
    }
}

pub(crate) fn bind_all<'q>(sql: &'q str, params: &'q [Value]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

impl Driver {
    /// Connect a pool as described by `config`.
    pub async fn connect(config: PoolConfig) -> DbResult<Self> {
        pool::open(config).await
    }

    pub(crate) fn from_parts(
        pool: PgPool,
        config: PoolConfig,
        reset: Arc<ResetMarker>,
        ticker: Option<Ticker>,
    ) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                pool,
                config,
                reset,
                ticker: Mutex::new(ticker),
                tables: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// The configuration this driver was opened with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    async fn acquire(&self) -> DbResult<sqlx::pool::PoolConnection<Postgres>> {
        self.inner.pool.acquire().await.map_err(DbError::Connection)
    }

    /// Run a query and drain every row.
    pub async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Rows> {
        let mut conn = self.acquire().await?;
        self.fetch_on(&mut conn, sql, params).await
    }

    /// Run a query and decode each tuple into `T`.
    pub async fn query_as<T: FromValues>(&self, sql: &str, params: &[Value]) -> DbResult<Vec<T>> {
        self.query(sql, params).await?.decode()
    }

    /// Run a query and decode its first tuple, `NotFound` when there is none.
    pub async fn query_one<T: FromValues>(&self, sql: &str, params: &[Value]) -> DbResult<T> {
        self.query(sql, params).await?.decode_first()
    }

    /// Run a statement, returning the affected row count (0 for DDL).
    pub async fn exec(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        let mut conn = self.acquire().await?;
        self.execute_on(&mut conn, sql, params).await
    }

    /// Run a built statement.
    pub async fn exec_statement(&self, statement: &Statement) -> DbResult<u64> {
        self.exec(&statement.sql, &statement.params).await
    }

    /// Insert every tuple of `rows`, returning the `returning` columns of the new rows.
    ///
    /// Tuples past the bind-parameter cap go out as several statements inside one
    /// transaction.
    pub async fn insert(&self, rows: &Rows, returning: &[Field]) -> DbResult<Rows> {
        let chunks = Insert::new(rows).returning(returning).to_bound_chunks()?;
        if chunks.len() == 1 {
            let mut conn = self.acquire().await?;
            return self.insert_chunks_on(&mut conn, rows, returning, &chunks).await;
        }
        let mut tx = self.inner.pool.begin().await?;
        let out = self.insert_chunks_on(&mut tx, rows, returning, &chunks).await?;
        tx.commit().await.map_err(DbError::Execution)?;
        Ok(out)
    }

    /// Insert, or update every non-constraint column when `constraint` collides.
    pub async fn upsert(&self, rows: &Rows, constraint: &str) -> DbResult<u64> {
        let chunks = Upsert { rows, constraint }.to_bound_chunks()?;
        if let [stmt] = chunks.as_slice() {
            return self.exec_statement(stmt).await;
        }
        let mut tx = self.inner.pool.begin().await?;
        let mut affected = 0;
        for stmt in &chunks {
            affected += self.execute_on(&mut tx, &stmt.sql, &stmt.params).await?;
        }
        tx.commit().await.map_err(DbError::Execution)?;
        Ok(affected)
    }

    pub async fn update(&self, request: &UpdateRequest) -> DbResult<u64> {
        let stmt = request.to_sql(Render::Bind)?;
        self.exec_statement(&stmt).await
    }

    /// Delete rows where `column = value`.
    pub async fn delete(
        &self,
        table: &str,
        column: &str,
        value: impl Into<Value>,
    ) -> DbResult<u64> {
        let stmt = DeleteRequest::new(table, Filter::eq(column, value)).to_sql(Render::Bind)?;
        self.exec_statement(&stmt).await
    }

    /// Delete the row whose `id` column equals `id`.
    pub async fn delete_by_id(&self, table: &str, id: impl Into<Value>) -> DbResult<u64> {
        self.delete(table, "id", id).await
    }

    /// Forget every cached OID to table-name mapping.
    pub fn invalidate_table_cache(&self) {
        if let Ok(mut tables) = self.inner.tables.write() {
            tables.clear();
        }
        tracing::debug!("Invalidated table name cache");
    }

    pub(crate) async fn insert_on(
        &self,
        conn: &mut PgConnection,
        rows: &Rows,
        returning: &[Field],
    ) -> DbResult<Rows> {
        let chunks = Insert::new(rows).returning(returning).to_bound_chunks()?;
        self.insert_chunks_on(conn, rows, returning, &chunks).await
    }

    /// Run insert chunks in order, concatenating their RETURNING rows.
    async fn insert_chunks_on(
        &self,
        conn: &mut PgConnection,
        rows: &Rows,
        returning: &[Field],
        chunks: &[Statement],
    ) -> DbResult<Rows> {
        let mut out = Rows::new(rows.table_name.clone()).schema(rows.schema_or_default());
        for stmt in chunks {
            if returning.is_empty() {
                self.execute_on(conn, &stmt.sql, &stmt.params).await?;
                continue;
            }
            let part = self.fetch_on(conn, &stmt.sql, &stmt.params).await?;
            if out.fields.is_empty() {
                out.fields = part.fields;
            }
            out.values.extend(part.values);
        }
        Ok(out)
    }

    pub(crate) async fn execute_on(
        &self,
        conn: &mut PgConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<u64> {
        tracing::debug!("exec: {} ({} params)", sql, params.len());
        let result = bind_all(sql, params)
            .execute(&mut *conn)
            .await
            .map_err(DbError::Execution)?;
        if changes_schema(sql) {
            self.invalidate_table_cache();
        }
        Ok(result.rows_affected())
    }

    /// Fetch all rows. Column metadata comes from the first row, or from the
    /// statement description when the result is empty.
    pub(crate) async fn fetch_on(
        &self,
        conn: &mut PgConnection,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Rows> {
        tracing::debug!("query: {} ({} params)", sql, params.len());
        let pg_rows = bind_all(sql, params)
            .fetch_all(&mut *conn)
            .await
            .map_err(DbError::Execution)?;
        if changes_schema(sql) {
            self.invalidate_table_cache();
        }

        let columns: Vec<PgColumn> = match pg_rows.first() {
            Some(first) => first.columns().to_vec(),
            None => (&mut *conn)
                .describe(sql)
                .await
                .map_err(DbError::Execution)?
                .columns()
                .to_vec(),
        };

        let mut rows = Rows::default();
        if let Some(oid) = columns.iter().find_map(|c| c.relation_id()) {
            rows.table_name = self.table_name(conn, oid).await?;
        }
        rows.fields = columns.iter().map(row::column_field).collect::<DbResult<_>>()?;
        rows.values.reserve(pg_rows.len());
        for pg_row in &pg_rows {
            rows.push(row::row_values(pg_row)?);
        }
        Ok(rows)
    }

    /// Resolve a relation OID to its table name, through the cache.
    async fn table_name(&self, conn: &mut PgConnection, oid: Oid) -> DbResult<String> {
        if let Some(name) = self
            .inner
            .tables
            .read()
            .ok()
            .and_then(|tables| tables.get(&oid.0).cloned())
        {
            return Ok(name);
        }
        let row = sqlx::query("SELECT relname::text FROM pg_catalog.pg_class WHERE oid = $1")
            .bind(oid)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DbError::Execution)?;
        let name = match row {
            Some(row) => row.try_get::<String, _>(0).map_err(DbError::Execution)?,
            None => String::new(),
        };
        if let Ok(mut tables) = self.inner.tables.write() {
            tables.insert(oid.0, name.clone());
        }
        Ok(name)
    }
}
