use crate::domain::wallet::{Amount, Balance, WalletId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events the engine emits to its collaborators (notification and audit
/// subsystems). Delivery is the sink's problem; the engine only guarantees
/// one event per state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WalletEvent {
    Audit {
        operation: String,
        wallet_id: WalletId,
        entry_id: Option<Uuid>,
        balance_before: Balance,
        balance_after: Balance,
        at: DateTime<Utc>,
    },
    LowBalance {
        wallet_id: WalletId,
        available: Balance,
        threshold: Amount,
        /// The debit entry that crossed the threshold.
        triggered_by: Uuid,
        at: DateTime<Utc>,
    },
}

impl WalletEvent {
    pub fn audit(
        operation: impl Into<String>,
        wallet_id: WalletId,
        entry_id: Option<Uuid>,
        balance_before: Balance,
        balance_after: Balance,
    ) -> Self {
        WalletEvent::Audit {
            operation: operation.into(),
            wallet_id,
            entry_id,
            balance_before,
            balance_after,
            at: Utc::now(),
        }
    }

    pub fn wallet_id(&self) -> &WalletId {
        match self {
            WalletEvent::Audit { wallet_id, .. } | WalletEvent::LowBalance { wallet_id, .. } => {
                wallet_id
            }
        }
    }
}
