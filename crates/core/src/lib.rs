pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod posting;
pub mod store;
pub mod workflow;

pub use domain::job_card::{ExpenseLine, JobCard, MaterialLine};
pub use domain::request::{
    ActorProfile, ApprovalAction, ApprovalLetter, ApprovalStage, ApprovalTrailEntry, PostingRefs,
    RecordKind, RecordRef, RequestStatus, Requestable, SubmitterRef, UserRole,
};
pub use domain::transaction::{FinanceTransaction, TransactionKind};
pub use domain::treasury::{
    AccountKind, InventoryItem, InventoryMovement, MovementKind, MovementLine, TreasuryAccount,
};
pub use domain::variation::{Variation, VariationTotals};
pub use errors::WorkflowError;
pub use events::{EventOutcome, EventSink, InMemoryEventSink, NullEventSink, WorkflowEvent};
pub use ledger::{ApprovalLedger, ChainVerification, LedgerAction, LedgerEntry};
pub use posting::{ApprovalPosting, PostingPlan, PostingSnapshots, PostingSource};
pub use store::{
    IdentityProvider, PostingInputs, RequestStore, RevisionToken, StagedCommit, StoreError,
};
pub use workflow::{CoordinatorSettings, WorkflowCoordinator};
