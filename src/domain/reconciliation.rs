use crate::domain::wallet::Currency;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One line of an external gateway settlement feed. The feed's transport and
/// format are out of scope; by the time it reaches the engine it is a list of
/// these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub gateway_reference: String,
    pub amount: Decimal,
    pub currency: Currency,
}

/// Classification of one confirmed internal top-up against the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum MatchStatus {
    Matched,
    /// The ledger says confirmed but the gateway has no record. Flagged for
    /// investigation; never auto-reversed.
    MissingExternally,
    AmountMismatch { internal: Decimal, external: Decimal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledEntry {
    pub entry_id: Uuid,
    pub gateway_reference: String,
    pub outcome: MatchStatus,
}

/// Per (gateway, date) reconciliation result. Read-only after creation;
/// discrepancies require a human-triggered `reverse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub id: Uuid,
    pub gateway: String,
    pub date: NaiveDate,
    pub entries: Vec<ReconciledEntry>,
    /// Gateway references present in the feed with no internal counterpart.
    pub unmatched_external: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn new(gateway: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            gateway: gateway.into(),
            date,
            entries: Vec::new(),
            unmatched_external: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn matched_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == MatchStatus::Matched)
            .count()
    }

    pub fn missing_externally_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == MatchStatus::MissingExternally)
            .count()
    }

    pub fn mismatch_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, MatchStatus::AmountMismatch { .. }))
            .count()
    }

    /// True when anything needs a human: a mismatch, a missing external
    /// record, or an external record with no ledger counterpart.
    pub fn requires_review(&self) -> bool {
        self.missing_externally_count() > 0
            || self.mismatch_count() > 0
            || !self.unmatched_external.is_empty()
    }
}
