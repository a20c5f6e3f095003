use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::posting::PostingSource;

/// The six lifecycle statuses shared by every approvable record.
///
/// Stored as the original wire strings (`DRAFT`, `SUBMITTED`, ...) so that
/// persisted records stay readable in ad-hoc queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Draft,
    Submitted,
    ApprovedByAccountant,
    RejectedByAccountant,
    ApprovedFinal,
    RejectedByManager,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::ApprovedByAccountant => "APPROVED_BY_ACCOUNTANT",
            Self::RejectedByAccountant => "REJECTED_BY_ACCOUNTANT",
            Self::ApprovedFinal => "APPROVED_FINAL",
            Self::RejectedByManager => "REJECTED_BY_MANAGER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(Self::Draft),
            "SUBMITTED" => Some(Self::Submitted),
            "APPROVED_BY_ACCOUNTANT" => Some(Self::ApprovedByAccountant),
            "REJECTED_BY_ACCOUNTANT" => Some(Self::RejectedByAccountant),
            "APPROVED_FINAL" => Some(Self::ApprovedFinal),
            "REJECTED_BY_MANAGER" => Some(Self::RejectedByManager),
            _ => None,
        }
    }

    /// Terminal statuses accept no further workflow action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RejectedByAccountant | Self::ApprovedFinal | Self::RejectedByManager
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStage {
    Accountant,
    Manager,
}

impl ApprovalStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accountant => "ACCOUNTANT",
            Self::Manager => "MANAGER",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Approve,
    Reject,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    User,
    Accountant,
    Manager,
    Admin,
    StoresApprover,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Accountant => "ACCOUNTANT",
            Self::Manager => "MANAGER",
            Self::Admin => "ADMIN",
            Self::StoresApprover => "STORES_APPROVER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "USER" => Some(Self::User),
            "ACCOUNTANT" => Some(Self::Accountant),
            "MANAGER" => Some(Self::Manager),
            "ADMIN" => Some(Self::Admin),
            "STORES_APPROVER" => Some(Self::StoresApprover),
            _ => None,
        }
    }

    /// Whether this role may act at the given stage. Admin substitutes for
    /// either stage; the trail still records the stage, never the override.
    pub fn can_act_at(&self, stage: ApprovalStage) -> bool {
        match stage {
            ApprovalStage::Accountant => matches!(self, Self::Accountant | Self::Admin),
            ApprovalStage::Manager => matches!(self, Self::Manager | Self::Admin),
        }
    }
}

/// Identity-provider view of the acting user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub uid: String,
    pub display_name: String,
    pub role: UserRole,
    pub active: bool,
}

impl ActorProfile {
    pub fn submitter_ref(&self) -> SubmitterRef {
        SubmitterRef { uid: self.uid.clone(), name: self.display_name.clone() }
    }
}

/// Who submitted a record. Written once, at submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitterRef {
    pub uid: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTrailEntry {
    pub action: ApprovalAction,
    pub stage: ApprovalStage,
    pub by_uid: String,
    pub by_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Transaction,
    JobCard,
    Variation,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::JobCard => "job_card",
            Self::Variation => "variation",
        }
    }

    /// Short code used in approval-letter reference numbers.
    pub fn letter_code(&self) -> &'static str {
        match self {
            Self::Transaction => "FIN",
            Self::JobCard => "JOB",
            Self::Variation => "VAR",
        }
    }
}

/// A `(kind, id)` pair identifying a workflow record across entity stores.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: RecordKind,
    pub id: String,
}

impl RecordRef {
    pub fn new(kind: RecordKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn chain_key(&self) -> String {
        format!("{}/{}", self.kind.as_str(), self.id)
    }
}

/// Reference to an externally rendered approval letter. The core never
/// renders documents; it only stores what the issuer reports back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLetter {
    pub ref_no: String,
    pub url: String,
    pub storage_path: String,
    pub generated_at: DateTime<Utc>,
}

impl ApprovalLetter {
    /// `APP-YYYYMMDD-<TYPE>-<SHORT_ID>`, the reference format letter issuers
    /// are expected to use.
    pub fn reference_number(record: &RecordRef, date: DateTime<Utc>) -> String {
        let short_id: String =
            record.id.chars().filter(|c| c.is_ascii_alphanumeric()).take(8).collect();
        format!(
            "APP-{}-{}-{}",
            date.format("%Y%m%d"),
            record.kind.letter_code(),
            short_id.to_ascii_uppercase()
        )
    }
}

/// Side-effect references attached exactly once, atomically with the
/// transition into `APPROVED_FINAL`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_movement_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finance_transaction_ids: Vec<String>,
    pub ledger_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_letter: Option<ApprovalLetter>,
    pub posted_at: DateTime<Utc>,
}

/// Minimal accessor surface the generic workflow machinery needs. The state
/// machine is written once against this trait and instantiated per entity.
pub trait Requestable: Clone + Send + Sync + serde::Serialize {
    fn record_id(&self) -> &str;
    fn kind(&self) -> RecordKind;
    fn status(&self) -> RequestStatus;
    fn set_status(&mut self, status: RequestStatus);
    fn submitted_by(&self) -> Option<&SubmitterRef>;
    /// Stamps the submitter. Implementations keep the first value; later
    /// calls are ignored.
    fn set_submitted_by(&mut self, submitter: SubmitterRef);
    fn approval_trail(&self) -> &[ApprovalTrailEntry];
    fn push_trail(&mut self, entry: ApprovalTrailEntry);
    fn postings(&self) -> Option<&PostingRefs>;
    /// Attaches posting references. Implementations keep the first value.
    fn set_postings(&mut self, refs: PostingRefs);
    /// Attaches the issued letter reference. Only meaningful once postings
    /// exist; implementations keep the first letter.
    fn attach_approval_letter(&mut self, letter: ApprovalLetter);
    /// The side effects this record requires on final approval.
    fn posting_source(&self) -> PostingSource;
    fn touch(&mut self, now: DateTime<Utc>);

    fn record_ref(&self) -> RecordRef {
        RecordRef::new(self.kind(), self.record_id())
    }

    /// Entity-specific payload checks run at submission time.
    fn validate_for_submit(&self) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{ApprovalLetter, ApprovalStage, RecordKind, RecordRef, RequestStatus, UserRole};

    #[test]
    fn status_round_trips_from_storage_encoding() {
        let cases = [
            RequestStatus::Draft,
            RequestStatus::Submitted,
            RequestStatus::ApprovedByAccountant,
            RequestStatus::RejectedByAccountant,
            RequestStatus::ApprovedFinal,
            RequestStatus::RejectedByManager,
        ];

        for status in cases {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RequestStatus::parse("CANCELLED"), None);
    }

    #[test]
    fn terminal_statuses_are_exactly_the_rejections_and_final_approval() {
        assert!(RequestStatus::ApprovedFinal.is_terminal());
        assert!(RequestStatus::RejectedByAccountant.is_terminal());
        assert!(RequestStatus::RejectedByManager.is_terminal());
        assert!(!RequestStatus::Draft.is_terminal());
        assert!(!RequestStatus::Submitted.is_terminal());
        assert!(!RequestStatus::ApprovedByAccountant.is_terminal());
    }

    #[test]
    fn admin_substitutes_for_both_stages() {
        assert!(UserRole::Admin.can_act_at(ApprovalStage::Accountant));
        assert!(UserRole::Admin.can_act_at(ApprovalStage::Manager));
        assert!(UserRole::Accountant.can_act_at(ApprovalStage::Accountant));
        assert!(!UserRole::Accountant.can_act_at(ApprovalStage::Manager));
        assert!(!UserRole::Manager.can_act_at(ApprovalStage::Accountant));
        assert!(!UserRole::User.can_act_at(ApprovalStage::Accountant));
        assert!(!UserRole::StoresApprover.can_act_at(ApprovalStage::Manager));
    }

    #[test]
    fn letter_reference_number_follows_issuer_format() {
        let record = RecordRef::new(RecordKind::Transaction, "tx-9f2b71aa-0001");
        let date = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();

        assert_eq!(ApprovalLetter::reference_number(&record, date), "APP-20260314-FIN-TX9F2B71");
    }
}
