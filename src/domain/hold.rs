use crate::domain::wallet::{Amount, Currency, WalletId};
use crate::error::{Result, WalletError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Hold lifecycle: `Open` is the only non-terminal state. Captured, released
/// and expired holds never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Open,
    Captured,
    Released,
    Expired,
}

impl HoldStatus {
    pub fn is_terminal(&self) -> bool {
        *self != HoldStatus::Open
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldStatus::Open => f.write_str("open"),
            HoldStatus::Captured => f.write_str("captured"),
            HoldStatus::Released => f.write_str("released"),
            HoldStatus::Expired => f.write_str("expired"),
        }
    }
}

/// A reservation against a wallet's available balance, tied to a caller
/// reference (e.g. a shipment). The amount never changes after creation;
/// capture may settle for less, never more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Uuid,
    pub wallet_id: WalletId,
    pub reference: String,
    pub amount: Amount,
    pub currency: Currency,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Hold {
    pub fn open(
        wallet_id: WalletId,
        reference: impl Into<String>,
        amount: Amount,
        currency: Currency,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet_id,
            reference: reference.into(),
            amount,
            currency,
            status: HoldStatus::Open,
            created_at: now,
            expires_at: now + ttl,
            closed_at: None,
        }
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.status == HoldStatus::Open {
            Ok(())
        } else {
            Err(WalletError::HoldNotOpen {
                id: self.id,
                status: self.status,
            })
        }
    }

    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Open && self.expires_at <= now
    }

    pub fn close(&mut self, status: HoldStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
    }
}
