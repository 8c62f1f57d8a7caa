//! Transaction lifecycle and the transactional execution variants.

use sqlx::Postgres;

use super::{Batch, Driver};
use crate::error::{DbError, DbResult};
use crate::rows::Rows;
use crate::types::Field;
use crate::value::Value;

/// An open transaction holding one connection exclusively.
///
/// `commit` and `rollback` consume it; dropping it unfinished rolls back.
pub struct Transaction {
    driver: Driver,
    tx: sqlx::Transaction<'static, Postgres>,
}

impl Transaction {
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Rows> {
        self.driver.fetch_on(&mut self.tx, sql, params).await
    }

    pub async fn exec(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.driver.execute_on(&mut self.tx, sql, params).await
    }

    pub async fn insert(&mut self, rows: &Rows, returning: &[Field]) -> DbResult<Rows> {
        self.driver.insert_on(&mut self.tx, rows, returning).await
    }

    pub async fn batch_query(&mut self, batch: &Batch) -> DbResult<Vec<Rows>> {
        self.driver.batch_query_on(&mut self.tx, batch).await
    }

    pub async fn commit(self) -> DbResult<()> {
        tracing::debug!("Committing transaction");
        self.tx.commit().await.map_err(DbError::Execution)
    }

    pub async fn rollback(self) -> DbResult<()> {
        tracing::debug!("Rolling back transaction");
        self.tx.rollback().await.map_err(DbError::Execution)
    }
}

impl Driver {
    /// Begin a transaction on a freshly acquired connection.
    pub async fn create_transaction(&self) -> DbResult<Transaction> {
        let tx = self.inner.pool.begin().await?;
        Ok(Transaction {
            driver: self.clone(),
            tx,
        })
    }

    pub async fn commit(&self, tx: Transaction) -> DbResult<()> {
        tx.commit().await
    }

    pub async fn rollback(&self, tx: Transaction) -> DbResult<()> {
        tx.rollback().await
    }

    pub async fn query_tx(
        &self,
        tx: &mut Transaction,
        sql: &str,
        params: &[Value],
    ) -> DbResult<Rows> {
        tx.query(sql, params).await
    }

    pub async fn exec_tx(
        &self,
        tx: &mut Transaction,
        sql: &str,
        params: &[Value],
    ) -> DbResult<u64> {
        tx.exec(sql, params).await
    }

    pub async fn insert_tx(
        &self,
        tx: &mut Transaction,
        rows: &Rows,
        returning: &[Field],
    ) -> DbResult<Rows> {
        tx.insert(rows, returning).await
    }

    pub async fn batch_query_tx(&self, tx: &mut Transaction, batch: &Batch) -> DbResult<Vec<Rows>> {
        tx.batch_query(batch).await
    }
}
