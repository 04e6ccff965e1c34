use crate::domain::hold::HoldStatus;
use crate::domain::ledger::EntryStatus;
use crate::domain::wallet::{Currency, WalletId};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, WalletError>;

/// Errors surfaced by the wallet engine.
///
/// `WalletBusy` and `OperationInProgress` are retryable: callers are expected
/// to resubmit with the same idempotency key. Everything else is terminal for
/// the attempted operation.
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },
    #[error("wallet {0} is suspended")]
    WalletSuspended(WalletId),
    #[error("currency mismatch: wallet currency is {expected}, operation used {got}")]
    CurrencyMismatch { expected: Currency, got: Currency },
    #[error("operation with idempotency key {0:?} is still in progress")]
    OperationInProgress(String),
    #[error("hold {id} is {status}, expected open")]
    HoldNotOpen { id: Uuid, status: HoldStatus },
    #[error("wallet {0} is busy, retry later")]
    WalletBusy(WalletId),
    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),
    #[error("ledger entry {0} not found")]
    EntryNotFound(Uuid),
    #[error("hold {0} not found")]
    HoldNotFound(Uuid),
    #[error(
        "refund of {requested} exceeds original amount {original} \
         ({already_refunded} already refunded)"
    )]
    RefundExceedsOriginal {
        original: Decimal,
        already_refunded: Decimal,
        requested: Decimal,
    },
    #[error("top-up {id} is {status}, cannot transition")]
    InvalidTopupState { id: Uuid, status: EntryStatus },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalletError {
    /// Whether the caller may safely retry the same operation (with the same
    /// idempotency key where one applies).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::WalletBusy(_) | WalletError::OperationInProgress(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::WalletId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_retryable_classification() {
        assert!(WalletError::WalletBusy(WalletId::new("w1")).is_retryable());
        assert!(WalletError::OperationInProgress("k1".into()).is_retryable());
        assert!(
            !WalletError::InsufficientFunds {
                requested: dec!(10),
                available: dec!(5),
            }
            .is_retryable()
        );
    }
}
