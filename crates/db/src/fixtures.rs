//! Deterministic demo fixtures for the CLI `seed`/`smoke` commands and the
//! integration suite.

use sqlx::{Executor, Row};

use tradeflow_core::store::StoreError;
use tradeflow_core::{ActorProfile, UserRole};

use crate::stores::memory::InMemoryIdentityProvider;
use crate::stores::{backend, parse_decimal};
use crate::DbPool;

pub struct SeedDataset;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedVerification {
    pub accounts: u32,
    pub items: u32,
    pub ok: bool,
}

impl SeedDataset {
    /// Treasury/inventory master fixture. Re-runnable: values reset on each
    /// load.
    pub const SQL: &'static str = include_str!("../../../config/fixtures/demo_seed.sql");

    pub async fn load(pool: &DbPool) -> Result<(), StoreError> {
        let mut tx = pool.begin().await.map_err(backend)?;
        tx.execute(sqlx::query(Self::SQL)).await.map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    pub async fn verify(pool: &DbPool) -> Result<SeedVerification, StoreError> {
        let accounts = count(pool, "treasury_account").await?;
        let items = count(pool, "inventory_item").await?;

        let cash_balance =
            sqlx::query("SELECT balance FROM treasury_account WHERE id = 'acct-cash'")
                .fetch_optional(pool)
                .await
                .map_err(backend)?;
        let cash_ok = match cash_balance {
            Some(row) => {
                let raw: String = row.try_get("balance").map_err(backend)?;
                parse_decimal(&raw, "seeded balance").is_ok()
            }
            None => false,
        };

        Ok(SeedVerification { accounts, items, ok: accounts >= 3 && items >= 3 && cash_ok })
    }
}

async fn count(pool: &DbPool, table: &str) -> Result<u32, StoreError> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(backend)?;
    let n: i64 = row.try_get("n").map_err(backend)?;
    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}

/// The demo team used by `seed`/`smoke` and the integration tests.
pub fn demo_profiles() -> Vec<ActorProfile> {
    [
        ("u-clerk", "Tariro Chikomo", UserRole::User),
        ("u-accountant", "Nyasha Moyo", UserRole::Accountant),
        ("u-manager", "Rudo Dube", UserRole::Manager),
        ("u-admin", "Farai Ncube", UserRole::Admin),
        ("u-stores", "Tendai Banda", UserRole::StoresApprover),
    ]
    .into_iter()
    .map(|(uid, name, role)| ActorProfile {
        uid: uid.to_string(),
        display_name: name.to_string(),
        role,
        active: true,
    })
    .collect()
}

pub fn demo_identity() -> InMemoryIdentityProvider {
    InMemoryIdentityProvider::with_profiles(demo_profiles())
}
