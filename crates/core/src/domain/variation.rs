use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::job_card::{ExpenseLine, MaterialLine};
use crate::domain::request::{
    ApprovalLetter, ApprovalTrailEntry, PostingRefs, RecordKind, RequestStatus, Requestable,
    SubmitterRef,
};
use crate::posting::PostingSource;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationTotals {
    pub inventory_total: Decimal,
    pub expenses_total: Decimal,
    pub grand_total: Decimal,
}

impl VariationTotals {
    pub fn from_lines(items: &[MaterialLine], expenses: &[ExpenseLine]) -> Self {
        let inventory_total: Decimal = items.iter().map(|line| line.line_total).sum();
        let expenses_total: Decimal = expenses.iter().map(|line| line.amount).sum();
        Self { inventory_total, expenses_total, grand_total: inventory_total + expenses_total }
    }
}

/// A change order against an existing job card. Numbered sequentially per
/// job card; approved through the same two-stage workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    pub id: String,
    pub job_card_id: String,
    pub job_card_number: String,
    pub variation_number: u32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub items: Vec<MaterialLine>,
    #[serde(default)]
    pub expenses: Vec<ExpenseLine>,
    pub totals: VariationTotals,
    pub currency: String,
    /// Treasury account the variation expense is drawn against. Explicit
    /// input; there is no default-account fallback.
    pub expense_account_id: String,
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

impl Variation {
    #[allow(clippy::too_many_arguments)]
    pub fn draft(
        id: impl Into<String>,
        job_card_id: impl Into<String>,
        job_card_number: impl Into<String>,
        variation_number: u32,
        reason: impl Into<String>,
        items: Vec<MaterialLine>,
        expenses: Vec<ExpenseLine>,
        currency: impl Into<String>,
        expense_account_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let totals = VariationTotals::from_lines(&items, &expenses);
        Self {
            id: id.into(),
            job_card_id: job_card_id.into(),
            job_card_number: job_card_number.into(),
            variation_number,
            reason: reason.into(),
            notes: None,
            items,
            expenses,
            totals,
            currency: currency.into(),
            expense_account_id: expense_account_id.into(),
            status: RequestStatus::Draft,
            submitted_by: None,
            approval_trail: Vec::new(),
            postings: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Requestable for Variation {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> RecordKind {
        RecordKind::Variation
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
            job_card_id: self.job_card_id.clone(),
            project_name: format!("{} variation {}", self.job_card_number, self.variation_number),
            lines: self.items.clone(),
            expense_account_id: self.expense_account_id.clone(),
            expense_total: self.totals.grand_total,
            currency: self.currency.clone(),
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    fn validate_for_submit(&self) -> Result<(), String> {
        if self.reason.trim().is_empty() {
            return Err("variation requires a reason".to_string());
        }
        if self.expense_account_id.trim().is_empty() {
            return Err("variation requires an expense account".to_string());
        }
        if self.items.is_empty() && self.expenses.is_empty() {
            return Err("variation requires at least one item or expense line".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Variation, VariationTotals};
    use crate::domain::job_card::{ExpenseLine, MaterialLine};
    use crate::domain::request::Requestable;
    use crate::posting::PostingSource;

    fn sample() -> Variation {
        Variation::draft(
            "var-1",
            "jc-1",
            "JC-2026-0007",
            2,
            "Client added two extra bays",
            vec![MaterialLine::new(
                "item-angle",
                "Angle iron 40mm",
                "length",
                Decimal::from(4),
                Decimal::new(2_00, 2),
            )],
            vec![ExpenseLine { label: "Labour".to_string(), amount: Decimal::new(15_00, 2) }],
            "USD",
            "acct-cash",
            Utc::now(),
        )
    }

    #[test]
    fn totals_split_inventory_and_expenses() {
        let variation = sample();
        assert_eq!(
            variation.totals,
            VariationTotals {
                inventory_total: Decimal::new(8_00, 2),
                expenses_total: Decimal::new(15_00, 2),
                grand_total: Decimal::new(23_00, 2),
            }
        );
    }

    #[test]
    fn posting_source_charges_the_grand_total() {
        let variation = sample();
        match variation.posting_source() {
            PostingSource::Materials { expense_total, job_card_id, .. } => {
                assert_eq!(expense_total, Decimal::new(23_00, 2));
                assert_eq!(job_card_id, "jc-1");
            }
            other => panic!("unexpected posting source: {other:?}"),
        }
    }

    #[test]
    fn submit_validation_requires_a_reason() {
        let mut variation = sample();
        variation.validate_for_submit().expect("complete variation");

        variation.reason = String::new();
        assert!(variation.validate_for_submit().is_err());
    }
}
