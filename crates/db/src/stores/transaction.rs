use async_trait::async_trait;
use sqlx::Row;

use tradeflow_core::store::{RequestStore, RevisionToken, StagedCommit, StoreError};
use tradeflow_core::{FinanceTransaction, RecordKind, UserRole};

use super::{apply_plan, backend, decode_body, encode_body, insert_transaction_row, pending_statuses};
use crate::DbPool;

pub struct SqlTransactionStore {
    pool: DbPool,
}

impl SqlTransactionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Approval queue for a role, oldest submissions first.
    pub async fn pending_for_role(
        &self,
        role: UserRole,
    ) -> Result<Vec<FinanceTransaction>, StoreError> {
        let statuses = pending_statuses(role);
        let mut records = Vec::new();
        for status in statuses {
            let rows = sqlx::query(
                "SELECT id, body FROM finance_transaction WHERE status = ? ORDER BY created_at ASC",
            )
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
            for row in rows {
                let id: String = row.try_get("id").map_err(backend)?;
                let body: String = row.try_get("body").map_err(backend)?;
                records.push(decode_body(&id, &body)?);
            }
        }
        Ok(records)
    }

    /// Transactions spawned by posting the given record.
    pub async fn spawned_by(
        &self,
        kind: RecordKind,
        record_id: &str,
    ) -> Result<Vec<FinanceTransaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, body FROM finance_transaction
             WHERE reference_kind = ? AND reference_id = ?
             ORDER BY created_at ASC",
        )
        .bind(kind.as_str())
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(backend)?;
                let body: String = row.try_get("body").map_err(backend)?;
                decode_body(&id, &body)
            })
            .collect()
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<FinanceTransaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, body FROM finance_transaction ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(backend)?;
                let body: String = row.try_get("body").map_err(backend)?;
                decode_body(&id, &body)
            })
            .collect()
    }
}

#[async_trait]
impl RequestStore<FinanceTransaction> for SqlTransactionStore {
    async fn load(&self, id: &str) -> Result<(FinanceTransaction, RevisionToken), StoreError> {
        let row = sqlx::query("SELECT body, revision FROM finance_transaction WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;

        let body: String = row.try_get("body").map_err(backend)?;
        let revision: i64 = row.try_get("revision").map_err(backend)?;
        Ok((decode_body(id, &body)?, RevisionToken(revision)))
    }

    async fn commit(
        &self,
        id: &str,
        expected: RevisionToken,
        staged: StagedCommit<FinanceTransaction>,
    ) -> Result<(), StoreError> {
        let body = encode_body(&staged.record)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            "UPDATE finance_transaction
             SET status = ?, body = ?, revision = revision + 1, updated_at = ?
             WHERE id = ? AND revision = ?",
        )
        .bind(staged.record.status.as_str())
        .bind(body)
        .bind(staged.record.updated_at.to_rfc3339())
        .bind(id)
        .bind(expected.0)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM finance_transaction WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?
                .is_some();
            return Err(if exists {
                StoreError::Conflict(format!("transaction {id}"))
            } else {
                StoreError::NotFound(format!("transaction {id}"))
            });
        }

        if let Some(plan) = &staged.plan {
            apply_plan(&mut tx, plan).await?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn insert(&self, record: FinanceTransaction) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;
        insert_transaction_row(&mut conn, &record).await
    }
}
