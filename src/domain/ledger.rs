use crate::domain::wallet::{Amount, Balance, Currency, WalletId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Topup,
    Charge,
    Capture,
    /// Zero-net audit marker written when a hold is released or expires.
    Release,
    Refund,
    Reversal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn inverted(self) -> Self {
        match self {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        }
    }
}

/// Only top-ups ever pass through `Pending`: they wait on gateway
/// confirmation before the funds are real. Everything else is born
/// `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Failed,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Pending => f.write_str("pending"),
            EntryStatus::Confirmed => f.write_str("confirmed"),
            EntryStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Immutable record of one balance-affecting event.
///
/// Entries are never updated or deleted; a mistake is corrected by appending
/// a `Reversal` entry referencing the original. The single permitted
/// transition is a top-up moving `Pending` to `Confirmed`/`Failed`, which is
/// when it receives its `seq` and `running_balance`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub entry_type: EntryType,
    pub direction: Direction,
    pub amount: Amount,
    pub currency: Currency,
    /// Total exposure (available + held) right after this entry took effect.
    /// `None` while a top-up is pending or after it failed.
    pub running_balance: Option<Balance>,
    /// Per-wallet monotonic sequence, assigned the moment the entry becomes
    /// balance-effective. Replaying entries in `seq` order reconstructs the
    /// balance.
    pub seq: Option<u64>,
    /// Caller-side reference, e.g. a shipment or subscription id.
    pub reference: String,
    /// Required for top-up/charge/refund, absent for system-only entries.
    pub idempotency_key: Option<String>,
    pub gateway: Option<String>,
    pub gateway_reference: Option<String>,
    pub status: EntryStatus,
    /// Original entry for refunds and reversals.
    pub related_entry_id: Option<Uuid>,
    /// Operator-supplied reason on refunds, reversals and failed top-ups.
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When a top-up was confirmed by the gateway.
    pub settled_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Whether this entry currently counts towards the wallet balance.
    pub fn is_effective(&self) -> bool {
        self.status == EntryStatus::Confirmed && self.seq.is_some()
    }

    /// The entry's contribution to `available + held`. Zero for pending or
    /// failed top-ups and for release audit markers.
    pub fn signed_amount(&self) -> Decimal {
        if !self.is_effective() || self.entry_type == EntryType::Release {
            return Decimal::ZERO;
        }
        match self.direction {
            Direction::Credit => self.amount.value(),
            Direction::Debit => -self.amount.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(entry_type: EntryType, direction: Direction, status: EntryStatus) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: WalletId::new("acct-1"),
            entry_type,
            direction,
            amount: Amount::new(dec!(50)).unwrap(),
            currency: Currency::Sar,
            running_balance: Some(Balance::new(dec!(50))),
            seq: Some(0),
            reference: "ship-1".to_string(),
            idempotency_key: None,
            gateway: None,
            gateway_reference: None,
            status,
            related_entry_id: None,
            memo: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn test_signed_amount_directions() {
        let credit = entry(EntryType::Topup, Direction::Credit, EntryStatus::Confirmed);
        assert_eq!(credit.signed_amount(), dec!(50));

        let debit = entry(EntryType::Charge, Direction::Debit, EntryStatus::Confirmed);
        assert_eq!(debit.signed_amount(), dec!(-50));
    }

    #[test]
    fn test_pending_topup_is_not_effective() {
        let mut pending = entry(EntryType::Topup, Direction::Credit, EntryStatus::Pending);
        pending.seq = None;
        pending.running_balance = None;
        assert!(!pending.is_effective());
        assert_eq!(pending.signed_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_release_marker_is_zero_net() {
        let release = entry(EntryType::Release, Direction::Credit, EntryStatus::Confirmed);
        assert!(release.is_effective());
        assert_eq!(release.signed_amount(), Decimal::ZERO);
    }
}
