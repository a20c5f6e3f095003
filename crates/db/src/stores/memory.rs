//! In-memory store implementations for engine and race tests. Same
//! contract as the SQL adapters, including revision checks and atomic
//! plan application.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use tradeflow_core::store::{
    IdentityProvider, PostingInputs, RequestStore, RevisionToken, StagedCommit, StoreError,
};
use tradeflow_core::{
    ActorProfile, FinanceTransaction, InventoryItem, InventoryMovement, PostingPlan, Requestable,
    TreasuryAccount,
};

#[derive(Default)]
pub struct InMemoryTreasury {
    accounts: RwLock<HashMap<String, TreasuryAccount>>,
    items: RwLock<HashMap<String, InventoryItem>>,
    movements: RwLock<Vec<InventoryMovement>>,
    spawned: RwLock<Vec<FinanceTransaction>>,
}

impl InMemoryTreasury {
    pub async fn upsert_account(&self, account: TreasuryAccount) {
        self.accounts.write().await.insert(account.id.clone(), account);
    }

    pub async fn upsert_item(&self, item: InventoryItem) {
        self.items.write().await.insert(item.id.clone(), item);
    }

    pub async fn balance(&self, id: &str) -> Option<Decimal> {
        self.accounts.read().await.get(id).map(|account| account.balance)
    }

    pub async fn on_hand(&self, id: &str) -> Option<Decimal> {
        self.items.read().await.get(id).map(|item| item.on_hand_qty)
    }

    pub async fn movements(&self) -> Vec<InventoryMovement> {
        self.movements.read().await.clone()
    }

    pub async fn spawned_transactions(&self) -> Vec<FinanceTransaction> {
        self.spawned.read().await.clone()
    }

    async fn apply_plan(&self, plan: &PostingPlan) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().await;
        let mut items = self.items.write().await;

        for delta in &plan.balance_deltas {
            if !accounts.contains_key(&delta.account_id) {
                return Err(StoreError::PostingFailed(format!(
                    "account {} not found",
                    delta.account_id
                )));
            }
        }
        for delta in &plan.stock_deltas {
            let Some(item) = items.get(&delta.item_id) else {
                return Err(StoreError::PostingFailed(format!(
                    "inventory item {} not found",
                    delta.item_id
                )));
            };
            if item.on_hand_qty + delta.qty_delta < Decimal::ZERO {
                return Err(StoreError::PostingFailed(format!(
                    "stock for {} would go negative",
                    delta.item_id
                )));
            }
        }

        for delta in &plan.balance_deltas {
            let account = accounts.get_mut(&delta.account_id).expect("checked above");
            account.balance += delta.delta;
        }
        for delta in &plan.stock_deltas {
            let item = items.get_mut(&delta.item_id).expect("checked above");
            item.on_hand_qty += delta.qty_delta;
        }
        if let Some(movement) = &plan.movement {
            self.movements.write().await.push(movement.clone());
        }
        if !plan.spawned_transactions.is_empty() {
            self.spawned.write().await.extend(plan.spawned_transactions.iter().cloned());
        }

        Ok(())
    }
}

#[async_trait]
impl PostingInputs for InMemoryTreasury {
    async fn account(&self, id: &str) -> Result<Option<TreasuryAccount>, StoreError> {
        Ok(self.accounts.read().await.get(id).cloned())
    }

    async fn item(&self, id: &str) -> Result<Option<InventoryItem>, StoreError> {
        Ok(self.items.read().await.get(id).cloned())
    }
}

pub struct InMemoryRequestStore<R> {
    records: RwLock<HashMap<String, (R, i64)>>,
    treasury: Arc<InMemoryTreasury>,
}

impl<R: Requestable> InMemoryRequestStore<R> {
    pub fn new(treasury: Arc<InMemoryTreasury>) -> Self {
        Self { records: RwLock::new(HashMap::new()), treasury }
    }
}

#[async_trait]
impl<R: Requestable + 'static> RequestStore<R> for InMemoryRequestStore<R> {
    async fn load(&self, id: &str) -> Result<(R, RevisionToken), StoreError> {
        let records = self.records.read().await;
        let (record, revision) =
            records.get(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok((record.clone(), RevisionToken(*revision)))
    }

    async fn commit(
        &self,
        id: &str,
        expected: RevisionToken,
        staged: StagedCommit<R>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let (_, revision) =
            records.get(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if *revision != expected.0 {
            return Err(StoreError::Conflict(id.to_string()));
        }

        if let Some(plan) = &staged.plan {
            self.treasury.apply_plan(plan).await?;
        }

        records.insert(id.to_string(), (staged.record, expected.0 + 1));
        Ok(())
    }

    async fn insert(&self, record: R) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.record_id().to_string(), (record, 1));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryIdentityProvider {
    profiles: HashMap<String, ActorProfile>,
}

impl InMemoryIdentityProvider {
    pub fn with_profiles(profiles: Vec<ActorProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|profile| (profile.uid.clone(), profile)).collect(),
        }
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn fetch_profile(&self, uid: &str) -> Result<Option<ActorProfile>, StoreError> {
        Ok(self.profiles.get(uid).cloned())
    }
}
