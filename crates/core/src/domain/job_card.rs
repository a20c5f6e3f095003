use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::{
    ApprovalLetter, ApprovalTrailEntry, PostingRefs, RecordKind, RequestStatus, Requestable,
    SubmitterRef,
};
use crate::posting::PostingSource;

/// One allocated material on a job card or variation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialLine {
    pub item_id: String,
    pub name: String,
    pub unit: String,
    pub qty: Decimal,
    pub unit_cost: Decimal,
    pub line_total: Decimal,
}

impl MaterialLine {
    pub fn new(
        item_id: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        qty: Decimal,
        unit_cost: Decimal,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            name: name.into(),
            unit: unit.into(),
            qty,
            unit_cost,
            line_total: qty * unit_cost,
        }
    }
}

/// A non-material cost line (labour, transport, subcontractors).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLine {
    pub label: String,
    pub amount: Decimal,
}

/// A costed unit of work. Final approval issues its materials from stock and
/// spawns an expense transaction for the total cost.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCard {
    pub id: String,
    pub job_number: String,
    pub project_name: String,
    pub description: String,
    pub client_id: String,
    pub client_name: String,
    pub materials: Vec<MaterialLine>,
    #[serde(default)]
    pub expenses: Vec<ExpenseLine>,
    pub total_cost: Decimal,
    pub currency: String,
    /// Treasury account the spawned expense is drawn against. Explicit
    /// input; there is no default-account fallback.
    pub expense_account_id: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<SubmitterRef>,
    #[serde(default)]
    pub approval_trail: Vec<ApprovalTrailEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postings: Option<PostingRefs>,
    /// Movements created by post-approval stock returns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub returned_movement_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobCard {
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        id: impl Into<String>,
        job_number: impl Into<String>,
        project_name: impl Into<String>,
        description: impl Into<String>,
        client_id: impl Into<String>,
        client_name: impl Into<String>,
        materials: Vec<MaterialLine>,
        expenses: Vec<ExpenseLine>,
        currency: impl Into<String>,
        expense_account_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let total_cost = compute_total_cost(&materials, &expenses);
        Self {
            id: id.into(),
            job_number: job_number.into(),
            project_name: project_name.into(),
            description: description.into(),
            client_id: client_id.into(),
            client_name: client_name.into(),
            materials,
            expenses,
            total_cost,
            currency: currency.into(),
            expense_account_id: expense_account_id.into(),
            status: RequestStatus::Draft,
            submitted_by: None,
            approval_trail: Vec::new(),
            postings: None,
            returned_movement_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn compute_total_cost(materials: &[MaterialLine], expenses: &[ExpenseLine]) -> Decimal {
    let material_total: Decimal = materials.iter().map(|line| line.line_total).sum();
    let expense_total: Decimal = expenses.iter().map(|line| line.amount).sum();
    material_total + expense_total
}

impl Requestable for JobCard {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> RecordKind {
        RecordKind::JobCard
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
        PostingSource::Materials {
            record: self.record_ref(),
            job_card_id: self.id.clone(),
            project_name: self.project_name.clone(),
            lines: self.materials.clone(),
            expense_account_id: self.expense_account_id.clone(),
            expense_total: self.total_cost,
            currency: self.currency.clone(),
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate_for_submit(&self) -> Result<(), String> {
        if self.expense_account_id.trim().is_empty() {
            return Err("job card requires an expense account".to_string());
        }
        if self.materials.is_empty() && self.expenses.is_empty() {
            return Err("job card requires at least one material or expense line".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{compute_total_cost, ExpenseLine, JobCard, MaterialLine};
    use crate::domain::request::Requestable;

    fn sample() -> JobCard {
        JobCard::draft(
            "jc-1",
            "JC-2026-0007",
            "Warehouse shelving",
            "Supply and fit shelving bays",
            "client-1",
            "Mercury Hardware",
            vec![
                MaterialLine::new("item-angle", "Angle iron 40mm", "length", Decimal::from(5), Decimal::new(2_00, 2)),
                MaterialLine::new("item-bolts", "M10 bolt pack", "pack", Decimal::from(2), Decimal::new(3_50, 2)),
            ],
            vec![ExpenseLine { label: "Labour".to_string(), amount: Decimal::new(20_00, 2) }],
            "USD",
            "acct-cash",
            Utc::now(),
        )
    }

    #[test]
    fn total_cost_sums_materials_and_expenses() {
        let card = sample();
        // 5 * 2.00 + 2 * 3.50 + 20.00
        assert_eq!(card.total_cost, Decimal::new(37_00, 2));
        assert_eq!(compute_total_cost(&card.materials, &[]), Decimal::new(17_00, 2));
    }

    #[test]
    fn material_line_total_is_qty_times_unit_cost() {
        let line = MaterialLine::new("item-1", "Paint 5l", "tin", Decimal::from(3), Decimal::new(12_75, 2));
        assert_eq!(line.line_total, Decimal::new(38_25, 2));
    }

    #[test]
    fn submit_validation_requires_expense_account_and_lines() {
        let mut card = sample();
        card.validate_for_submit().expect("complete card");

        card.expense_account_id = " ".to_string();
        assert!(card.validate_for_submit().is_err());

        let mut empty = sample();
        empty.materials.clear();
        empty.expenses.clear();
        assert!(empty.validate_for_submit().is_err());
    }
}
