use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use tradeflow_core::store::{PostingInputs, StoreError};
use tradeflow_core::{AccountKind, InventoryItem, InventoryMovement, TreasuryAccount};

use super::{backend, parse_decimal};
use crate::DbPool;

/// Read-side adapter over accounts, items, and the movement journal.
/// Balances and quantities are written exclusively by workflow commits
/// (`stores::apply_plan`); this type only reads and upserts masters.
pub struct SqlTreasuryStore {
    pool: DbPool,
}

impl SqlTreasuryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_account(&self, account: &TreasuryAccount) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO treasury_account (id, name, kind, balance, currency, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 kind = excluded.kind,
                 balance = excluded.balance,
                 currency = excluded.currency,
                 updated_at = excluded.updated_at",
        )
        .bind(&account.id)
        .bind(&account.name)
        .bind(account.kind.as_str())
        .bind(account.balance.to_string())
        .bind(&account.currency)
        .bind(account.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    pub async fn upsert_item(&self, item: &InventoryItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO inventory_item (id, sku, name, unit, on_hand_qty, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 sku = excluded.sku,
                 name = excluded.name,
                 unit = excluded.unit,
                 on_hand_qty = excluded.on_hand_qty,
                 updated_at = excluded.updated_at",
        )
        .bind(&item.id)
        .bind(&item.sku)
        .bind(&item.name)
        .bind(&item.unit)
        .bind(item.on_hand_qty.to_string())
        .bind(item.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    pub async fn accounts(&self) -> Result<Vec<TreasuryAccount>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, kind, balance, currency, updated_at FROM treasury_account ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_account).collect()
    }

    pub async fn movements_for_job_card(
        &self,
        job_card_id: &str,
    ) -> Result<Vec<InventoryMovement>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, body FROM inventory_movement WHERE job_card_id = ? ORDER BY created_at ASC",
        )
        .bind(job_card_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(backend)?;
                let body: String = row.try_get("body").map_err(backend)?;
                serde_json::from_str(&body).map_err(|error| {
                    StoreError::Backend(format!("decode of movement {id} failed: {error}"))
                })
            })
            .collect()
    }
}

#[async_trait]
impl PostingInputs for SqlTreasuryStore {
    async fn account(&self, id: &str) -> Result<Option<TreasuryAccount>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, kind, balance, currency, updated_at FROM treasury_account WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn item(&self, id: &str) -> Result<Option<InventoryItem>, StoreError> {
        let row = sqlx::query(
            "SELECT id, sku, name, unit, on_hand_qty, updated_at FROM inventory_item WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(row_to_item).transpose()
    }
}

fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<TreasuryAccount, StoreError> {
    let id: String = row.try_get("id").map_err(backend)?;
    let name: String = row.try_get("name").map_err(backend)?;
    let kind_raw: String = row.try_get("kind").map_err(backend)?;
    let balance_raw: String = row.try_get("balance").map_err(backend)?;
    let currency: String = row.try_get("currency").map_err(backend)?;
    let updated_at_raw: String = row.try_get("updated_at").map_err(backend)?;

    Ok(TreasuryAccount {
        kind: AccountKind::parse(&kind_raw)
            .ok_or_else(|| StoreError::Backend(format!("unknown account kind `{kind_raw}`")))?,
        balance: parse_decimal(&balance_raw, "account balance")?,
        updated_at: parse_timestamp(&updated_at_raw),
        id,
        name,
        currency,
    })
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<InventoryItem, StoreError> {
    let id: String = row.try_get("id").map_err(backend)?;
    let sku: String = row.try_get("sku").map_err(backend)?;
    let name: String = row.try_get("name").map_err(backend)?;
    let unit: String = row.try_get("unit").map_err(backend)?;
    let on_hand_raw: String = row.try_get("on_hand_qty").map_err(backend)?;
    let updated_at_raw: String = row.try_get("updated_at").map_err(backend)?;

    Ok(InventoryItem {
        on_hand_qty: parse_decimal(&on_hand_raw, "on-hand quantity")?,
        updated_at: parse_timestamp(&updated_at_raw),
        id,
        sku,
        name,
        unit,
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
