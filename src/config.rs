//! Engine configuration.
//!
//! Business rules that vary per deployment (lock timeouts, hold TTLs,
//! auto-top-up cool-downs, idempotency retention) are explicit structs with
//! defaults, resolved at call time. No ambient or string-keyed state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub locking: LockConfig,
    pub holds: HoldConfig,
    pub auto_topup: AutoTopupPolicy,
    pub idempotency: IdempotencyConfig,
}

/// Per-wallet lock acquisition policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Maximum time to wait for the wallet lock before failing with
    /// `WalletBusy`.
    pub acquire_timeout_ms: u64,
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 5_000,
        }
    }
}

/// Authorization hold policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldConfig {
    /// How long a hold stays open before the expiry sweep releases it.
    pub ttl_secs: i64,
}

impl HoldConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs)
    }
}

impl Default for HoldConfig {
    fn default() -> Self {
        // Pending charges are normally captured or abandoned within 72 hours.
        Self {
            ttl_secs: 72 * 3_600,
        }
    }
}

/// Auto-top-up trigger policy. The per-wallet enablement and amount live on
/// the wallet itself; this governs the trigger mechanics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTopupPolicy {
    /// Minimum time between two auto-initiated top-ups on the same wallet.
    pub cooldown_secs: i64,
    /// Gateway name recorded on auto-initiated top-up entries.
    pub gateway: String,
}

impl AutoTopupPolicy {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs)
    }
}

impl Default for AutoTopupPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 600,
            gateway: "default".to_string(),
        }
    }
}

/// Retention and recovery for idempotency records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    pub retention_days: i64,
    /// An in-flight record older than this is an orphan from a crashed
    /// attempt; the next holder of the wallet lock takes the key over.
    pub in_flight_takeover_secs: i64,
}

impl IdempotencyConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn in_flight_takeover(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.in_flight_takeover_secs)
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        // Comfortably past the lock acquire timeout: a live first attempt
        // still holds the wallet lock and can never be this old.
        Self {
            retention_days: 30,
            in_flight_takeover_secs: 30,
        }
    }
}
