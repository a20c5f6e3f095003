use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::{
    ApprovalLetter, ApprovalTrailEntry, PostingRefs, RecordKind, RecordRef, RequestStatus,
    Requestable, SubmitterRef,
};
use crate::posting::PostingSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
            Self::Transfer => "TRANSFER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INCOME" => Some(Self::Income),
            "EXPENSE" => Some(Self::Expense),
            "TRANSFER" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// A treasury movement awaiting (or past) two-stage approval. The account
/// balance is touched only when the workflow posts the final approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinanceTransaction {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub currency: String,
    /// Debited for `EXPENSE` and `TRANSFER`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_account_id: Option<String>,
    /// Credited for `INCOME` and `TRANSFER`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_account_id: Option<String>,
    pub category: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<RecordRef>,
    pub date: DateTime<Utc>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<SubmitterRef>,
    #[serde(default)]
    pub approval_trail: Vec<ApprovalTrailEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postings: Option<PostingRefs>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FinanceTransaction {
    /// A fresh draft owned by the author until submission.
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        id: impl Into<String>,
        kind: TransactionKind,
        amount: Decimal,
        currency: impl Into<String>,
        source_account_id: Option<String>,
        target_account_id: Option<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            amount,
            currency: currency.into(),
            source_account_id,
            target_account_id,
            category: category.into(),
            description: description.into(),
            reference: None,
            date: now,
            status: RequestStatus::Draft,
            submitted_by: None,
            approval_trail: Vec::new(),
            postings: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// An expense spawned by posting another record. Starts in `SUBMITTED`
    /// with an empty trail; it runs through its own independent approval.
    #[allow(clippy::too_many_arguments)]
    pub fn spawned_expense(
        id: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
        source_account_id: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        reference: RecordRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: TransactionKind::Expense,
            amount,
            currency: currency.into(),
            source_account_id: Some(source_account_id.into()),
            target_account_id: None,
            category: category.into(),
            description: description.into(),
            reference: Some(reference),
            date: now,
            status: RequestStatus::Submitted,
            submitted_by: Some(SubmitterRef {
                uid: "system".to_string(),
                name: "Workflow Posting".to_string(),
            }),
            approval_trail: Vec::new(),
            postings: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Payload checks: positive amount and the account fields the kind needs.
    pub fn validate(&self) -> Result<(), String> {
        if self.amount <= Decimal::ZERO {
            return Err(format!("amount must be positive, got {}", self.amount));
        }

        match self.kind {
            TransactionKind::Income => {
                if self.target_account_id.is_none() {
                    return Err("income requires a target account".to_string());
                }
            }
            TransactionKind::Expense => {
                if self.source_account_id.is_none() {
                    return Err("expense requires a source account".to_string());
                }
            }
            TransactionKind::Transfer => {
                match (&self.source_account_id, &self.target_account_id) {
                    (Some(source), Some(target)) if source == target => {
                        return Err("transfer source and target must differ".to_string());
                    }
                    (Some(_), Some(_)) => {}
                    _ => return Err("transfer requires source and target accounts".to_string()),
                }
            }
        }

        Ok(())
    }
}

impl Requestable for FinanceTransaction {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Transaction
    }

    fn status(&self) -> RequestStatus {
        self.status
    }

    fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    fn submitted_by(&self) -> Option<&SubmitterRef> {
        self.submitted_by.as_ref()
    }

    fn set_submitted_by(&mut self, submitter: SubmitterRef) {
        if self.submitted_by.is_none() {
            self.submitted_by = Some(submitter);
        }
    }

    fn approval_trail(&self) -> &[ApprovalTrailEntry] {
        &self.approval_trail
    }

    fn push_trail(&mut self, entry: ApprovalTrailEntry) {
        self.approval_trail.push(entry);
    }

    fn postings(&self) -> Option<&PostingRefs> {
        self.postings.as_ref()
    }

    fn set_postings(&mut self, refs: PostingRefs) {
        if self.postings.is_none() {
            self.postings = Some(refs);
        }
    }

    fn attach_approval_letter(&mut self, letter: ApprovalLetter) {
        if let Some(postings) = self.postings.as_mut() {
            if postings.approval_letter.is_none() {
                postings.approval_letter = Some(letter);
            }
        }
    }

    fn posting_source(&self) -> PostingSource {
        PostingSource::Finance {
            kind: self.kind,
            amount: self.amount,
            source_account_id: self.source_account_id.clone(),
            target_account_id: self.target_account_id.clone(),
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate_for_submit(&self) -> Result<(), String> {
        self.validate()
    }
}
