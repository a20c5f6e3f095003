//! Tamper-evident approval ledger.
//!
//! Every committed workflow transition appends a hash-chained, HMAC-signed
//! entry keyed by record. `verify_chain` detects any mutation, reordering,
//! or re-signing of the history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::request::RecordRef;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Submit,
    Approve,
    Reject,
    Letter,
    Return,
}

impl LedgerAction {
    fn as_key(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Letter => "letter",
            Self::Return => "return",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub record: RecordRef,
    pub version: u32,
    pub content_hash: String,
    pub prev_hash: Option<String>,
    pub entry_hash: String,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub action: LedgerAction,
    pub signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub record: RecordRef,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ApprovalLedger {
    signing_key: Vec<u8>,
    entries_by_record: HashMap<String, Vec<LedgerEntry>>,
}

impl ApprovalLedger {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec(), entries_by_record: HashMap::new() }
    }

    pub fn append_entry(
        &mut self,
        record: &RecordRef,
        content_json: &str,
        action: LedgerAction,
        actor_id: impl Into<String>,
    ) -> LedgerEntry {
        let actor_id = actor_id.into();
        let chain = self.entries_by_record.entry(record.chain_key()).or_default();
        let version = u32::try_from(chain.len()).unwrap_or(u32::MAX).saturating_add(1);
        let prev_hash = chain.last().map(|entry| entry.entry_hash.clone());
        let timestamp = Utc::now();
        let content_hash = sha256_hex(content_json.as_bytes());
        let entry_hash = hash_entry_material(
            record,
            version,
            &content_hash,
            prev_hash.as_deref(),
            timestamp,
            &actor_id,
            &action,
        );
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        let entry = LedgerEntry {
            entry_id: Uuid::new_v4().to_string(),
            record: record.clone(),
            version,
            content_hash,
            prev_hash,
            entry_hash,
            timestamp,
            actor_id,
            action,
            signature,
        };

        chain.push(entry.clone());
        entry
    }

    pub fn verify_chain(&self, record: &RecordRef) -> ChainVerification {
        let Some(entries) = self.entries_by_record.get(&record.chain_key()) else {
            return ChainVerification {
                record: record.clone(),
                valid: false,
                verified_entries: 0,
                latest_hash: None,
                failure_reason: Some("no ledger entries found for record".to_string()),
            };
        };

        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let expected_version = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.version != expected_version {
                return self.failed(record, index, previous_hash, format!(
                    "version mismatch at entry {}: expected {}, found {}",
                    entry.entry_id, expected_version, entry.version
                ));
            }

            if entry.prev_hash != previous_hash {
                return self.failed(
                    record,
                    index,
                    previous_hash,
                    format!("previous hash mismatch at entry {}", entry.entry_id),
                );
            }

            let computed_entry_hash = hash_entry_material(
                &entry.record,
                entry.version,
                &entry.content_hash,
                entry.prev_hash.as_deref(),
                entry.timestamp,
                &entry.actor_id,
                &entry.action,
            );
            if computed_entry_hash != entry.entry_hash {
                return self.failed(
                    record,
                    index,
                    previous_hash,
                    format!("entry hash mismatch at entry {}", entry.entry_id),
                );
            }

            let expected_signature = hmac_hex(&self.signing_key, entry.entry_hash.as_bytes());
            if expected_signature != entry.signature {
                return self.failed(
                    record,
                    index,
                    previous_hash,
                    format!("signature mismatch at entry {}", entry.entry_id),
                );
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        ChainVerification {
            record: record.clone(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }

    pub fn entries_for(&self, record: &RecordRef) -> Vec<LedgerEntry> {
        self.entries_by_record.get(&record.chain_key()).cloned().unwrap_or_default()
    }

    fn failed(
        &self,
        record: &RecordRef,
        verified: usize,
        latest_hash: Option<String>,
        reason: String,
    ) -> ChainVerification {
        ChainVerification {
            record: record.clone(),
            valid: false,
            verified_entries: verified,
            latest_hash,
            failure_reason: Some(reason),
        }
    }

    #[cfg(test)]
    fn entries_mut(&mut self, record: &RecordRef) -> Option<&mut Vec<LedgerEntry>> {
        self.entries_by_record.get_mut(&record.chain_key())
    }
}

fn hash_entry_material(
    record: &RecordRef,
    version: u32,
    content_hash: &str,
    prev_hash: Option<&str>,
    timestamp: DateTime<Utc>,
    actor_id: &str,
    action: &LedgerAction,
) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        record.chain_key(),
        version,
        content_hash,
        prev_hash.unwrap_or(""),
        timestamp.to_rfc3339(),
        actor_id,
        action.as_key(),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
