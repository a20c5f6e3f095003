use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::{RecordRef, SubmitterRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Bank,
    Cash,
    Mobile,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Cash => "cash",
            Self::Mobile => "mobile",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bank" => Some(Self::Bank),
            "cash" => Some(Self::Cash),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }
}

/// A treasury account holding a running balance. Balances are only ever
/// mutated inside a workflow commit that was authorized by final approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryAccount {
    pub id: String,
    pub name: String,
    pub kind: AccountKind,
    pub balance: Decimal,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

/// A stocked inventory item. `on_hand_qty` moves only through movement
/// records committed by the workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub on_hand_qty: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Issue,
    Return,
    Receipt,
    Adjustment,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "ISSUE",
            Self::Return => "RETURN",
            Self::Receipt => "RECEIPT",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ISSUE" => Some(Self::Issue),
            "RETURN" => Some(Self::Return),
            "RECEIPT" => Some(Self::Receipt),
            "ADJUSTMENT" => Some(Self::Adjustment),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub item_id: String,
    pub qty: Decimal,
}

/// Immutable journal entry for a stock mutation. Movements are only ever
/// appended, never edited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: String,
    pub kind: MovementKind,
    pub lines: Vec<MovementLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_card_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordRef>,
    pub created_by: SubmitterRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
