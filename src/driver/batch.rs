//! Batched statements on one exclusively held connection.

use sqlx::postgres::PgConnection;

use super::Driver;
use crate::builder::Statement;
use crate::error::DbResult;
use crate::rows::Rows;
use crate::value::Value;

/// An ordered list of statements run back to back on one connection.
///
/// Results come back in submission order. A failing statement stops the batch;
/// the connection is still released.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    statements: Vec<Statement>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair each query with its arguments; queries past the end of `args` run
    /// without any.
    pub fn with_args<S: AsRef<str>>(queries: &[S], args: &[Vec<Value>]) -> Self {
        let statements = queries
            .iter()
            .enumerate()
            .map(|(i, sql)| Statement::new(sql.as_ref(), args.get(i).cloned().unwrap_or_default()))
            .collect();
        Self { statements }
    }

    /// Queue a statement with no parameters.
    pub fn push(&mut self, sql: impl Into<String>) -> &mut Self {
        self.statements.push(Statement::raw(sql));
        self
    }

    /// Queue a statement with positional parameters.
    pub fn push_with(&mut self, sql: impl Into<String>, params: Vec<Value>) -> &mut Self {
        self.statements.push(Statement::new(sql, params));
        self
    }

    pub fn push_statement(&mut self, statement: Statement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}

impl FromIterator<Statement> for Batch {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        Self {
            statements: iter.into_iter().collect(),
        }
    }
}

impl Driver {
    /// Run every statement of `batch` as a query, one `Rows` per statement.
    pub async fn batch_query(&self, batch: &Batch) -> DbResult<Vec<Rows>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.acquire().await?;
        self.batch_query_on(&mut conn, batch).await
    }

    /// Run every statement of `batch` for effect, returning each affected count.
    pub async fn batch_exec(&self, batch: &Batch) -> DbResult<Vec<u64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.acquire().await?;
        tracing::debug!("Executing batch of {} statements", batch.len());
        let mut counts = Vec::with_capacity(batch.len());
        for stmt in batch.statements() {
            counts.push(self.execute_on(&mut conn, &stmt.sql, &stmt.params).await?);
        }
        Ok(counts)
    }

    pub(crate) async fn batch_query_on(
        &self,
        conn: &mut PgConnection,
        batch: &Batch,
    ) -> DbResult<Vec<Rows>> {
        tracing::debug!("Querying batch of {} statements", batch.len());
        let mut results = Vec::with_capacity(batch.len());
        for stmt in batch.statements() {
            results.push(self.fetch_on(conn, &stmt.sql, &stmt.params).await?);
        }
        Ok(results)
    }
}
