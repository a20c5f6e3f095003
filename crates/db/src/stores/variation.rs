use async_trait::async_trait;
use sqlx::Row;

use tradeflow_core::store::{RequestStore, RevisionToken, StagedCommit, StoreError};
use tradeflow_core::{UserRole, Variation};

use super::{apply_plan, backend, decode_body, encode_body, pending_statuses};
use crate::DbPool;

pub struct SqlVariationStore {
    pool: DbPool,
}

impl SqlVariationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Change orders of a job card, in issue order.
    pub async fn for_job_card(&self, job_card_id: &str) -> Result<Vec<Variation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, body FROM job_card_variation
             WHERE job_card_id = ? ORDER BY variation_number ASC",
        )
        .bind(job_card_id)
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

    /// Sequential numbering per job card, assigned at creation.
    pub async fn next_variation_number(&self, job_card_id: &str) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(variation_number), 0) AS n FROM job_card_variation WHERE job_card_id = ?",
        )
        .bind(job_card_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let highest: i64 = row.try_get("n").map_err(backend)?;
        Ok(u32::try_from(highest).unwrap_or(u32::MAX).saturating_add(1))
    }

    pub async fn pending_for_role(&self, role: UserRole) -> Result<Vec<Variation>, StoreError> {
        let mut records = Vec::new();
        for status in pending_statuses(role) {
            let rows = sqlx::query(
                "SELECT id, body FROM job_card_variation WHERE status = ? ORDER BY created_at ASC",
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
}

#[async_trait]
impl RequestStore<Variation> for SqlVariationStore {
    async fn load(&self, id: &str) -> Result<(Variation, RevisionToken), StoreError> {
        let row = sqlx::query("SELECT body, revision FROM job_card_variation WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(format!("variation {id}")))?;

        let body: String = row.try_get("body").map_err(backend)?;
        let revision: i64 = row.try_get("revision").map_err(backend)?;
        Ok((decode_body(id, &body)?, RevisionToken(revision)))
    }

    async fn commit(
        &self,
        id: &str,
        expected: RevisionToken,
        staged: StagedCommit<Variation>,
    ) -> Result<(), StoreError> {
        let body = encode_body(&staged.record)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            "UPDATE job_card_variation
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
            let exists = sqlx::query("SELECT 1 FROM job_card_variation WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?
                .is_some();
            return Err(if exists {
                StoreError::Conflict(format!("variation {id}"))
            } else {
                StoreError::NotFound(format!("variation {id}"))
            });
        }

        if let Some(plan) = &staged.plan {
            apply_plan(&mut tx, plan).await?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn insert(&self, record: Variation) -> Result<(), StoreError> {
        let body = encode_body(&record)?;
        sqlx::query(
            "INSERT INTO job_card_variation
                 (id, job_card_id, variation_number, status, body, revision, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.job_card_id)
        .bind(record.variation_number)
        .bind(record.status.as_str())
        .bind(body)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use tradeflow_core::store::RequestStore;
    use tradeflow_core::{MaterialLine, Variation};

    use super::SqlVariationStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample(id: &str, job_card_id: &str, number: u32) -> Variation {
        Variation::draft(
            id,
            job_card_id,
            "JC-2026-0007",
            number,
            "Client added two extra bays",
            vec![MaterialLine::new(
                "item-angle",
                "Angle iron 40mm",
                "length",
                Decimal::from(4),
                Decimal::new(2_00, 2),
            )],
            Vec::new(),
            "USD",
            "acct-cash",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn variation_numbers_are_sequential_per_job_card() {
        let store = SqlVariationStore::new(setup().await);

        assert_eq!(store.next_variation_number("jc-1").await.expect("empty"), 1);

        store.insert(sample("var-1", "jc-1", 1)).await.expect("insert 1");
        store.insert(sample("var-2", "jc-1", 2)).await.expect("insert 2");
        store.insert(sample("var-9", "jc-other", 7)).await.expect("insert other");

        assert_eq!(store.next_variation_number("jc-1").await.expect("next"), 3);
        assert_eq!(store.next_variation_number("jc-other").await.expect("next other"), 8);
    }

    #[tokio::test]
    async fn for_job_card_lists_in_issue_order() {
        let store = SqlVariationStore::new(setup().await);
        store.insert(sample("var-2", "jc-1", 2)).await.expect("insert 2");
        store.insert(sample("var-1", "jc-1", 1)).await.expect("insert 1");

        let variations = store.for_job_card("jc-1").await.expect("list");
        assert_eq!(
            variations.iter().map(|v| v.variation_number).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn duplicate_numbering_is_rejected_by_the_schema() {
        let store = SqlVariationStore::new(setup().await);
        store.insert(sample("var-1", "jc-1", 1)).await.expect("insert");
        let error = store.insert(sample("var-dup", "jc-1", 1)).await.expect_err("unique");
        assert!(error.to_string().contains("UNIQUE") || error.to_string().contains("unique"));
    }
}
