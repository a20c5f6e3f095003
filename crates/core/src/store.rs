//! Persistence seams consumed by the workflow coordinator.
//!
//! The coordinator never talks to a database directly; it goes through these
//! traits so any backend with a versioning primitive (row version, document
//! ETag, append log) can participate.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::request::{ActorProfile, Requestable};
use crate::domain::treasury::{InventoryItem, TreasuryAccount};
use crate::errors::WorkflowError;
use crate::posting::PostingPlan;

/// Opaque optimistic-concurrency witness captured at load time. A commit
/// carrying a stale token is rejected with `StoreError::Conflict`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevisionToken(pub i64);

/// Everything a single workflow commit writes: the mutated record (status,
/// trail, postings) and, when final approval fired, the posting plan. The
/// adapter applies the whole set in one transaction or not at all.
#[derive(Clone, Debug)]
pub struct StagedCommit<R> {
    pub record: R,
    pub plan: Option<PostingPlan>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("revision conflict on {0}")]
    Conflict(String),
    #[error("posting write failed: {0}")]
    PostingFailed(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(what) => Self::NotFound(what),
            // Conflicts are retried by the coordinator; one escaping here
            // means the retry budget was already spent.
            StoreError::Conflict(_) => Self::Contention { attempts: 0 },
            StoreError::PostingFailed(reason) => Self::PostingFailed(reason),
            StoreError::Backend(message) => Self::Store(message),
        }
    }
}

/// Per-entity record store with optimistic concurrency.
#[async_trait]
pub trait RequestStore<R: Requestable>: Send + Sync {
    async fn load(&self, id: &str) -> Result<(R, RevisionToken), StoreError>;

    /// Applies the staged commit iff the stored revision still matches
    /// `expected`. All writes (record, trail, posting plan) land in one
    /// transaction; on any failure nothing is visible.
    async fn commit(
        &self,
        id: &str,
        expected: RevisionToken,
        staged: StagedCommit<R>,
    ) -> Result<(), StoreError>;

    /// Inserts a brand-new record (draft creation, spawned submissions).
    async fn insert(&self, record: R) -> Result<(), StoreError>;
}

/// Read access to the accounts and items a posting references.
#[async_trait]
pub trait PostingInputs: Send + Sync {
    async fn account(&self, id: &str) -> Result<Option<TreasuryAccount>, StoreError>;
    async fn item(&self, id: &str) -> Result<Option<InventoryItem>, StoreError>;
}

/// Resolves the acting user. Mirrors the upstream identity service; the
/// workflow refuses actors it cannot resolve.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_profile(&self, uid: &str) -> Result<Option<ActorProfile>, StoreError>;
}

#[async_trait]
impl<R: Requestable + 'static, T: RequestStore<R> + ?Sized> RequestStore<R> for std::sync::Arc<T> {
    async fn load(&self, id: &str) -> Result<(R, RevisionToken), StoreError> {
        (**self).load(id).await
    }

    async fn commit(
        &self,
        id: &str,
        expected: RevisionToken,
        staged: StagedCommit<R>,
    ) -> Result<(), StoreError> {
        (**self).commit(id, expected, staged).await
    }

    async fn insert(&self, record: R) -> Result<(), StoreError> {
        (**self).insert(record).await
    }
}

#[async_trait]
impl<T: PostingInputs + ?Sized> PostingInputs for std::sync::Arc<T> {
    async fn account(&self, id: &str) -> Result<Option<TreasuryAccount>, StoreError> {
        (**self).account(id).await
    }

    async fn item(&self, id: &str) -> Result<Option<InventoryItem>, StoreError> {
        (**self).item(id).await
    }
}

#[async_trait]
impl<T: IdentityProvider + ?Sized> IdentityProvider for std::sync::Arc<T> {
    async fn fetch_profile(&self, uid: &str) -> Result<Option<ActorProfile>, StoreError> {
        (**self).fetch_profile(uid).await
    }
}
