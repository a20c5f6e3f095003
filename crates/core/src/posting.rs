//! Posting planner.
//!
//! Computes the exact side-effect writes a final approval requires: balance
//! deltas, stock issues, the movement journal entry, and any follow-up
//! expense transactions. Planning is pure; the store adapter applies the
//! plan in the same atomic commit as the status write. Any planning failure
//! aborts the approval before anything is persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::job_card::MaterialLine;
use crate::domain::request::{ActorProfile, PostingRefs, RecordRef};
use crate::domain::transaction::{FinanceTransaction, TransactionKind};
use crate::domain::treasury::{
    InventoryItem, InventoryMovement, MovementKind, MovementLine, TreasuryAccount,
};
use crate::errors::WorkflowError;

/// What a record needs posted on final approval, extracted from the entity
/// by `Requestable::posting_source`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostingSource {
    Finance {
        kind: TransactionKind,
        amount: Decimal,
        source_account_id: Option<String>,
        target_account_id: Option<String>,
    },
    Materials {
        record: RecordRef,
        job_card_id: String,
        project_name: String,
        lines: Vec<MaterialLine>,
        expense_account_id: String,
        expense_total: Decimal,
        currency: String,
    },
}

impl PostingSource {
    /// Accounts the planner needs snapshots of.
    pub fn account_ids(&self) -> Vec<String> {
        match self {
            Self::Finance { source_account_id, target_account_id, .. } => source_account_id
                .iter()
                .chain(target_account_id.iter())
                .cloned()
                .collect(),
            Self::Materials { expense_account_id, .. } => vec![expense_account_id.clone()],
        }
    }

    /// Inventory items the planner needs snapshots of.
    pub fn item_ids(&self) -> Vec<String> {
        match self {
            Self::Finance { .. } => Vec::new(),
            Self::Materials { lines, .. } => {
                lines.iter().map(|line| line.item_id.clone()).collect()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: String,
    pub delta: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockDelta {
    pub item_id: String,
    pub qty_delta: Decimal,
}

/// The set of writes the store adapter applies atomically with the record
/// commit. Balance and stock deltas are relative so the adapter can apply
/// them against live rows inside its transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostingPlan {
    pub balance_deltas: Vec<BalanceDelta>,
    pub stock_deltas: Vec<StockDelta>,
    pub movement: Option<InventoryMovement>,
    pub spawned_transactions: Vec<FinanceTransaction>,
}

impl PostingPlan {
    pub fn is_empty(&self) -> bool {
        self.balance_deltas.is_empty()
            && self.stock_deltas.is_empty()
            && self.movement.is_none()
            && self.spawned_transactions.is_empty()
    }
}

/// A plan plus the references the record carries forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalPosting {
    pub plan: PostingPlan,
    pub refs: PostingRefs,
}

/// Read snapshots of the accounts/items a posting references, captured just
/// before the commit. Existence and sufficiency checks run against these;
/// the adapter re-applies the deltas transactionally.
#[derive(Clone, Debug, Default)]
pub struct PostingSnapshots {
    pub accounts: HashMap<String, TreasuryAccount>,
    pub items: HashMap<String, InventoryItem>,
}

/// Builds the side-effect plan for a record entering final approval.
pub fn build_plan(
    source: &PostingSource,
    snapshots: &PostingSnapshots,
    actor: &ActorProfile,
    now: DateTime<Utc>,
) -> Result<ApprovalPosting, WorkflowError> {
    match source {
        PostingSource::Finance { kind, amount, source_account_id, target_account_id } => {
            plan_finance(*kind, *amount, source_account_id, target_account_id, snapshots, now)
        }
        PostingSource::Materials {
            record,
            job_card_id,
            project_name,
            lines,
            expense_account_id,
            expense_total,
            currency,
        } => plan_materials(
            record,
            job_card_id,
            project_name,
            lines,
            expense_account_id,
            *expense_total,
            currency,
            snapshots,
            actor,
            now,
        ),
    }
}

fn plan_finance(
    kind: TransactionKind,
    amount: Decimal,
    source_account_id: &Option<String>,
    target_account_id: &Option<String>,
    snapshots: &PostingSnapshots,
    now: DateTime<Utc>,
) -> Result<ApprovalPosting, WorkflowError> {
    let mut balance_deltas = Vec::new();

    if matches!(kind, TransactionKind::Expense | TransactionKind::Transfer) {
        let source = require_account(source_account_id.as_deref(), "source", snapshots)?;
        balance_deltas.push(BalanceDelta { account_id: source.id.clone(), delta: -amount });
    }
    if matches!(kind, TransactionKind::Income | TransactionKind::Transfer) {
        let target = require_account(target_account_id.as_deref(), "target", snapshots)?;
        balance_deltas.push(BalanceDelta { account_id: target.id.clone(), delta: amount });
    }

    Ok(ApprovalPosting {
        plan: PostingPlan { balance_deltas, ..PostingPlan::default() },
        refs: PostingRefs {
            inventory_movement_id: None,
            finance_transaction_ids: Vec::new(),
            ledger_applied: true,
            approval_letter: None,
            posted_at: now,
        },
    })
}

#[allow(clippy::too_many_arguments)]
fn plan_materials(
    record: &RecordRef,
    job_card_id: &str,
    project_name: &str,
    lines: &[MaterialLine],
    expense_account_id: &str,
    expense_total: Decimal,
    currency: &str,
    snapshots: &PostingSnapshots,
    actor: &ActorProfile,
    now: DateTime<Utc>,
) -> Result<ApprovalPosting, WorkflowError> {
    let mut stock_deltas = Vec::new();
    let mut movement_lines = Vec::new();

    for line in lines {
        let item = snapshots.items.get(&line.item_id).ok_or_else(|| {
            WorkflowError::PostingFailed(format!(
                "inventory item {} ({}) not found",
                line.item_id, line.name
            ))
        })?;
        if item.on_hand_qty < line.qty {
            return Err(WorkflowError::PostingFailed(format!(
                "insufficient stock for {}: available {}, required {}",
                line.name, item.on_hand_qty, line.qty
            )));
        }
        stock_deltas.push(StockDelta { item_id: line.item_id.clone(), qty_delta: -line.qty });
        movement_lines.push(MovementLine { item_id: line.item_id.clone(), qty: line.qty });
    }

    let movement = if movement_lines.is_empty() {
        None
    } else {
        Some(InventoryMovement {
            id: Uuid::new_v4().to_string(),
            kind: MovementKind::Issue,
            lines: movement_lines,
            job_card_id: Some(job_card_id.to_string()),
            record: Some(record.clone()),
            created_by: actor.submitter_ref(),
            note: Some(format!("Auto-issued on approval: {project_name}")),
            created_at: now,
        })
    };

    let mut spawned_transactions = Vec::new();
    if expense_total > Decimal::ZERO {
        let account = snapshots.accounts.get(expense_account_id).ok_or_else(|| {
            WorkflowError::PostingFailed(format!(
                "expense account {expense_account_id} not found"
            ))
        })?;
        spawned_transactions.push(FinanceTransaction::spawned_expense(
            Uuid::new_v4().to_string(),
            expense_total,
            currency,
            account.id.clone(),
            "Project Materials",
            format!("Approval posting: {project_name}"),
            record.clone(),
            now,
        ));
    }

    let refs = PostingRefs {
        inventory_movement_id: movement.as_ref().map(|m| m.id.clone()),
        finance_transaction_ids: spawned_transactions.iter().map(|tx| tx.id.clone()).collect(),
        ledger_applied: false,
        approval_letter: None,
        posted_at: now,
    };

    Ok(ApprovalPosting {
        plan: PostingPlan {
            balance_deltas: Vec::new(),
            stock_deltas,
            movement,
            spawned_transactions,
        },
        refs,
    })
}

/// Builds the stock-return plan for an already-approved job card.
pub fn plan_return(
    record: &RecordRef,
    job_card_id: &str,
    project_name: &str,
    lines: &[MovementLine],
    snapshots: &PostingSnapshots,
    actor: &ActorProfile,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<(PostingPlan, String), WorkflowError> {
    if lines.is_empty() {
        return Err(WorkflowError::ValidationFailed(
            "a stock return requires at least one line".to_string(),
        ));
    }

    let mut stock_deltas = Vec::new();
    for line in lines {
        if !snapshots.items.contains_key(&line.item_id) {
            return Err(WorkflowError::PostingFailed(format!(
                "inventory item {} not found",
                line.item_id
            )));
        }
        if line.qty <= Decimal::ZERO {
            return Err(WorkflowError::ValidationFailed(format!(
                "return quantity for {} must be positive",
                line.item_id
            )));
        }
        stock_deltas.push(StockDelta { item_id: line.item_id.clone(), qty_delta: line.qty });
    }

    let movement = InventoryMovement {
        id: Uuid::new_v4().to_string(),
        kind: MovementKind::Return,
        lines: lines.to_vec(),
        job_card_id: Some(job_card_id.to_string()),
        record: Some(record.clone()),
        created_by: actor.submitter_ref(),
        note: note.or_else(|| Some(format!("Return processed for: {project_name}"))),
        created_at: now,
    };
    let movement_id = movement.id.clone();

    Ok((
        PostingPlan {
            balance_deltas: Vec::new(),
            stock_deltas,
            movement: Some(movement),
            spawned_transactions: Vec::new(),
        },
        movement_id,
    ))
}

fn require_account<'a>(
    account_id: Option<&str>,
    side: &str,
    snapshots: &'a PostingSnapshots,
) -> Result<&'a TreasuryAccount, WorkflowError> {
    let id = account_id.ok_or_else(|| {
        WorkflowError::PostingFailed(format!("no {side} account on transaction"))
    })?;
    snapshots.accounts.get(id).ok_or_else(|| {
        WorkflowError::PostingFailed(format!("{side} account {id} not found"))
    })
}
