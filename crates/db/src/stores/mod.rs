//! SQLite store adapters.
//!
//! Each workflow entity gets a store implementing the core `RequestStore`
//! trait: record bodies are stored as JSON documents beside the columns the
//! pending queues filter on, and every commit is guarded by the `revision`
//! column. Posting-plan writes land inside the same transaction as the
//! record update, so a failed posting rolls the whole approval back.

use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sqlx::{Row, SqliteConnection};

use tradeflow_core::posting::PostingPlan;
use tradeflow_core::store::StoreError;
use tradeflow_core::{FinanceTransaction, Requestable, UserRole};

pub mod job_card;
pub mod memory;
pub mod transaction;
pub mod treasury;
pub mod variation;

pub use job_card::SqlJobCardStore;
pub use memory::{InMemoryIdentityProvider, InMemoryRequestStore, InMemoryTreasury};
pub use transaction::SqlTransactionStore;
pub use treasury::SqlTreasuryStore;
pub use variation::SqlVariationStore;

pub(crate) fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

pub(crate) fn decode_body<R: DeserializeOwned>(id: &str, body: &str) -> Result<R, StoreError> {
    serde_json::from_str(body)
        .map_err(|error| StoreError::Backend(format!("decode of record {id} failed: {error}")))
}

pub(crate) fn encode_body<R: serde::Serialize + Requestable>(record: &R) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|error| {
        StoreError::Backend(format!("encode of record {} failed: {error}", record.record_id()))
    })
}

pub(crate) fn parse_decimal(value: &str, what: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value)
        .map_err(|error| StoreError::Backend(format!("decode of {what} failed: {error}")))
}

/// Statuses a role's approval queue shows. Accountants work stage one,
/// managers stage two, admins both.
pub fn pending_statuses(role: UserRole) -> &'static [&'static str] {
    match role {
        UserRole::Accountant => &["SUBMITTED"],
        UserRole::Manager => &["APPROVED_BY_ACCOUNTANT"],
        UserRole::Admin => &["SUBMITTED", "APPROVED_BY_ACCOUNTANT"],
        UserRole::User | UserRole::StoresApprover => &[],
    }
}

/// Applies a posting plan inside the caller's transaction. Balance and
/// stock arithmetic happens here in Rust against the live rows so the
/// sufficiency checks and the mutation cannot diverge.
pub(crate) async fn apply_plan(
    conn: &mut SqliteConnection,
    plan: &PostingPlan,
) -> Result<(), StoreError> {
    let now = Utc::now().to_rfc3339();

    for delta in &plan.balance_deltas {
        let row = sqlx::query("SELECT balance FROM treasury_account WHERE id = ?")
            .bind(&delta.account_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?;
        let Some(row) = row else {
            return Err(StoreError::PostingFailed(format!(
                "account {} not found",
                delta.account_id
            )));
        };
        let balance: String = row.try_get("balance").map_err(backend)?;
        let updated = parse_decimal(&balance, "account balance")? + delta.delta;

        sqlx::query("UPDATE treasury_account SET balance = ?, updated_at = ? WHERE id = ?")
            .bind(updated.to_string())
            .bind(&now)
            .bind(&delta.account_id)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
    }

    for delta in &plan.stock_deltas {
        let row = sqlx::query("SELECT on_hand_qty FROM inventory_item WHERE id = ?")
            .bind(&delta.item_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?;
        let Some(row) = row else {
            return Err(StoreError::PostingFailed(format!(
                "inventory item {} not found",
                delta.item_id
            )));
        };
        let on_hand: String = row.try_get("on_hand_qty").map_err(backend)?;
        let updated = parse_decimal(&on_hand, "on-hand quantity")? + delta.qty_delta;
        if updated < Decimal::ZERO {
            return Err(StoreError::PostingFailed(format!(
                "stock for {} would go negative",
                delta.item_id
            )));
        }

        sqlx::query("UPDATE inventory_item SET on_hand_qty = ?, updated_at = ? WHERE id = ?")
            .bind(updated.to_string())
            .bind(&now)
            .bind(&delta.item_id)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
    }

    if let Some(movement) = &plan.movement {
        let body = serde_json::to_string(movement).map_err(|error| {
            StoreError::Backend(format!("encode of movement {} failed: {error}", movement.id))
        })?;
        sqlx::query(
            "INSERT INTO inventory_movement (id, kind, job_card_id, record_kind, record_id, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&movement.id)
        .bind(movement.kind.as_str())
        .bind(&movement.job_card_id)
        .bind(movement.record.as_ref().map(|r| r.kind.as_str()))
        .bind(movement.record.as_ref().map(|r| r.id.as_str()))
        .bind(body)
        .bind(movement.created_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    }

    for spawned in &plan.spawned_transactions {
        insert_transaction_row(conn, spawned).await?;
    }

    Ok(())
}

pub(crate) async fn insert_transaction_row(
    conn: &mut SqliteConnection,
    record: &FinanceTransaction,
) -> Result<(), StoreError> {
    let body = encode_body(record)?;
    sqlx::query(
        "INSERT INTO finance_transaction
             (id, status, kind, reference_kind, reference_id, body, revision, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(&record.id)
    .bind(record.status.as_str())
    .bind(record.kind.as_str())
    .bind(record.reference.as_ref().map(|r| r.kind.as_str()))
    .bind(record.reference.as_ref().map(|r| r.id.as_str()))
    .bind(body)
    .bind(record.created_at.to_rfc3339())
    .bind(record.updated_at.to_rfc3339())
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(())
}
