use crate::domain::wallet::WalletId;
use crate::error::{Result, WalletError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-wallet exclusive locks.
///
/// Every wallet-mutating operation runs under the wallet's lock, so balance
/// checks never see stale data. Operations on different wallets never
/// contend. Acquisition is bounded: past the timeout the caller gets the
/// retryable `WalletBusy` instead of hanging.
pub struct WalletLocks {
    locks: Mutex<HashMap<WalletId, Arc<Mutex<()>>>>,
    acquire_timeout: Duration,
}

impl WalletLocks {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    pub async fn acquire(&self, wallet_id: &WalletId) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(wallet_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        tokio::time::timeout(self.acquire_timeout, lock.lock_owned())
            .await
            .map_err(|_| WalletError::WalletBusy(wallet_id.clone()))
    }
}
