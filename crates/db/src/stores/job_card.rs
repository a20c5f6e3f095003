use async_trait::async_trait;
use sqlx::Row;

use tradeflow_core::store::{RequestStore, RevisionToken, StagedCommit, StoreError};
use tradeflow_core::{JobCard, UserRole};

use super::{apply_plan, backend, decode_body, encode_body, pending_statuses};
use crate::DbPool;

pub struct SqlJobCardStore {
    pool: DbPool,
}

impl SqlJobCardStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn pending_for_role(&self, role: UserRole) -> Result<Vec<JobCard>, StoreError> {
        let mut records = Vec::new();
        for status in pending_statuses(role) {
            let rows = sqlx::query(
                "SELECT id, body FROM job_card WHERE status = ? ORDER BY created_at ASC",
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

    pub async fn pending_count(&self, role: UserRole) -> Result<u32, StoreError> {
        let mut total: i64 = 0;
        for status in pending_statuses(role) {
            let row = sqlx::query("SELECT COUNT(*) AS n FROM job_card WHERE status = ?")
                .bind(status)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
            total += row.try_get::<i64, _>("n").map_err(backend)?;
        }
        Ok(u32::try_from(total).unwrap_or(u32::MAX))
    }
}

#[async_trait]
impl RequestStore<JobCard> for SqlJobCardStore {
    async fn load(&self, id: &str) -> Result<(JobCard, RevisionToken), StoreError> {
        let row = sqlx::query("SELECT body, revision FROM job_card WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound(format!("job card {id}")))?;

        let body: String = row.try_get("body").map_err(backend)?;
        let revision: i64 = row.try_get("revision").map_err(backend)?;
        Ok((decode_body(id, &body)?, RevisionToken(revision)))
    }

    async fn commit(
        &self,
        id: &str,
        expected: RevisionToken,
        staged: StagedCommit<JobCard>,
    ) -> Result<(), StoreError> {
        let body = encode_body(&staged.record)?;
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            "UPDATE job_card
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
            let exists = sqlx::query("SELECT 1 FROM job_card WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?
                .is_some();
            return Err(if exists {
                StoreError::Conflict(format!("job card {id}"))
            } else {
                StoreError::NotFound(format!("job card {id}"))
            });
        }

        if let Some(plan) = &staged.plan {
            apply_plan(&mut tx, plan).await?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn insert(&self, record: JobCard) -> Result<(), StoreError> {
        let body = encode_body(&record)?;
        sqlx::query(
            "INSERT INTO job_card (id, job_number, status, body, revision, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.job_number)
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

    use tradeflow_core::store::{RequestStore, StagedCommit, StoreError};
    use tradeflow_core::{ExpenseLine, JobCard, MaterialLine, RequestStatus, UserRole};

    use super::SqlJobCardStore;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample(id: &str) -> JobCard {
        JobCard::draft(
            id,
            format!("JC-2026-{id}"),
            "Warehouse shelving",
            "Supply and fit shelving bays",
            "client-1",
            "Mercury Hardware",
            vec![MaterialLine::new(
                "item-angle",
                "Angle iron 40mm",
                "length",
                Decimal::from(5),
                Decimal::new(2_00, 2),
            )],
            vec![ExpenseLine { label: "Labour".to_string(), amount: Decimal::new(20_00, 2) }],
            "USD",
            "acct-cash",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn insert_load_round_trips_lines_and_totals() {
        let store = SqlJobCardStore::new(setup().await);
        store.insert(sample("jc-1")).await.expect("insert");

        let (loaded, _) = store.load("jc-1").await.expect("load");
        assert_eq!(loaded.materials.len(), 1);
        assert_eq!(loaded.total_cost, Decimal::new(30_00, 2));
        assert!(loaded.returned_movement_ids.is_empty());
    }

    #[tokio::test]
    async fn posting_failure_inside_commit_rolls_back_the_status_write() {
        let store = SqlJobCardStore::new(setup().await);
        store.insert(sample("jc-1")).await.expect("insert");

        let (mut card, token) = store.load("jc-1").await.expect("load");
        card.status = RequestStatus::ApprovedFinal;

        // A plan referencing an account that does not exist: the record
        // update must roll back with it.
        let plan = tradeflow_core::PostingPlan {
            balance_deltas: vec![tradeflow_core::posting::BalanceDelta {
                account_id: "acct-ghost".to_string(),
                delta: Decimal::new(-10_00, 2),
            }],
            ..tradeflow_core::PostingPlan::default()
        };

        let error = store
            .commit("jc-1", token, StagedCommit { record: card, plan: Some(plan) })
            .await
            .expect_err("missing account");
        assert!(matches!(error, StoreError::PostingFailed(_)));

        let (reloaded, reloaded_token) = store.load("jc-1").await.expect("reload");
        assert_eq!(reloaded.status, RequestStatus::Draft);
        assert_eq!(reloaded_token, token);
    }

    #[tokio::test]
    async fn pending_count_tracks_queue_sizes() {
        let store = SqlJobCardStore::new(setup().await);

        let mut submitted = sample("jc-1");
        submitted.status = RequestStatus::Submitted;
        store.insert(submitted).await.expect("insert");

        let mut staged = sample("jc-2");
        staged.status = RequestStatus::ApprovedByAccountant;
        store.insert(staged).await.expect("insert");

        assert_eq!(store.pending_count(UserRole::Accountant).await.expect("count"), 1);
        assert_eq!(store.pending_count(UserRole::Admin).await.expect("count"), 2);
        assert_eq!(store.pending_count(UserRole::User).await.expect("count"), 0);
    }
}
