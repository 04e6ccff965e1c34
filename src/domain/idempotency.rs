use crate::domain::hold::HoldStatus;
use crate::domain::ledger::EntryStatus;
use crate::domain::wallet::{Currency, WalletId};
use crate::error::WalletError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a keyed operation, durable enough to replay. Clients (payment
/// callbacks, retried network calls) are expected to resend the same logical
/// operation; ledger correctness depends on this record, not on client-side
/// exactly-once delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IdempotencyState {
    /// The first attempt is executing. A concurrent duplicate must not race
    /// it; observers get `OperationInProgress`.
    InFlight { started_at: DateTime<Utc> },
    /// The operation succeeded and produced these ledger entries.
    Completed {
        entry_ids: Vec<Uuid>,
        completed_at: DateTime<Utc>,
    },
    /// The operation failed a business rule; retries replay the same error.
    Failed {
        failure: StoredFailure,
        completed_at: DateTime<Utc>,
    },
}

impl IdempotencyState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, IdempotencyState::InFlight { .. })
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            IdempotencyState::InFlight { .. } => None,
            IdempotencyState::Completed { completed_at, .. }
            | IdempotencyState::Failed { completed_at, .. } => Some(*completed_at),
        }
    }
}

/// Maps `(wallet_id, key)` to the outcome of the operation that first used
/// the key. Never mutated once terminal; garbage-collected after the
/// retention window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub wallet_id: WalletId,
    pub key: String,
    pub state: IdempotencyState,
}

impl IdempotencyRecord {
    pub fn in_flight(wallet_id: WalletId, key: impl Into<String>) -> Self {
        Self {
            wallet_id,
            key: key.into(),
            state: IdempotencyState::InFlight {
                started_at: Utc::now(),
            },
        }
    }

    pub fn completed(mut self, entry_ids: Vec<Uuid>) -> Self {
        self.state = IdempotencyState::Completed {
            entry_ids,
            completed_at: Utc::now(),
        };
        self
    }

    pub fn failed(mut self, failure: StoredFailure) -> Self {
        self.state = IdempotencyState::Failed {
            failure,
            completed_at: Utc::now(),
        };
        self
    }
}

/// Serializable mirror of the terminal business errors, so a retried key can
/// replay the exact failure the first attempt produced. Transient errors
/// (lock timeouts, storage faults) are deliberately not representable here:
/// they release the key instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredFailure {
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },
    WalletSuspended {
        wallet_id: WalletId,
    },
    CurrencyMismatch {
        expected: Currency,
        got: Currency,
    },
    HoldNotOpen {
        id: Uuid,
        status: HoldStatus,
    },
    RefundExceedsOriginal {
        original: Decimal,
        already_refunded: Decimal,
        requested: Decimal,
    },
    InvalidTopupState {
        id: Uuid,
        status: EntryStatus,
    },
    EntryNotFound {
        id: Uuid,
    },
    Validation {
        message: String,
    },
}

impl StoredFailure {
    /// Captures a business-rule failure; `None` for transient or
    /// infrastructure errors, which must not pin the key.
    pub fn from_error(err: &WalletError) -> Option<Self> {
        match err {
            WalletError::InsufficientFunds {
                requested,
                available,
            } => Some(StoredFailure::InsufficientFunds {
                requested: *requested,
                available: *available,
            }),
            WalletError::WalletSuspended(wallet_id) => Some(StoredFailure::WalletSuspended {
                wallet_id: wallet_id.clone(),
            }),
            WalletError::CurrencyMismatch { expected, got } => {
                Some(StoredFailure::CurrencyMismatch {
                    expected: *expected,
                    got: *got,
                })
            }
            WalletError::HoldNotOpen { id, status } => Some(StoredFailure::HoldNotOpen {
                id: *id,
                status: *status,
            }),
            WalletError::RefundExceedsOriginal {
                original,
                already_refunded,
                requested,
            } => Some(StoredFailure::RefundExceedsOriginal {
                original: *original,
                already_refunded: *already_refunded,
                requested: *requested,
            }),
            WalletError::InvalidTopupState { id, status } => {
                Some(StoredFailure::InvalidTopupState {
                    id: *id,
                    status: *status,
                })
            }
            WalletError::EntryNotFound(id) => Some(StoredFailure::EntryNotFound { id: *id }),
            WalletError::Validation(message) => Some(StoredFailure::Validation {
                message: message.clone(),
            }),
            _ => None,
        }
    }

    pub fn into_error(self) -> WalletError {
        match self {
            StoredFailure::InsufficientFunds {
                requested,
                available,
            } => WalletError::InsufficientFunds {
                requested,
                available,
            },
            StoredFailure::WalletSuspended { wallet_id } => {
                WalletError::WalletSuspended(wallet_id)
            }
            StoredFailure::CurrencyMismatch { expected, got } => {
                WalletError::CurrencyMismatch { expected, got }
            }
            StoredFailure::HoldNotOpen { id, status } => WalletError::HoldNotOpen { id, status },
            StoredFailure::RefundExceedsOriginal {
                original,
                already_refunded,
                requested,
            } => WalletError::RefundExceedsOriginal {
                original,
                already_refunded,
                requested,
            },
            StoredFailure::InvalidTopupState { id, status } => {
                WalletError::InvalidTopupState { id, status }
            }
            StoredFailure::EntryNotFound { id } => WalletError::EntryNotFound(id),
            StoredFailure::Validation { message } => WalletError::Validation(message),
        }
    }
}
