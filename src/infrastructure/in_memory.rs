use crate::domain::event::WalletEvent;
use crate::domain::hold::{Hold, HoldStatus};
use crate::domain::idempotency::IdempotencyRecord;
use crate::domain::ledger::{EntryStatus, EntryType, LedgerEntry};
use crate::domain::ports::{
    EventSink, HoldStore, IdempotencyStore, LedgerStore, ReportStore, UnitOfWork, WalletStore,
};
use crate::domain::reconciliation::ReconciliationReport;
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Thread-safe in-memory wallet store. The default backend for tests and for
/// one-shot replay runs where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    wallets: Arc<RwLock<HashMap<WalletId, Wallet>>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn store(&self, wallet: Wallet) -> Result<()> {
        let mut wallets = self.wallets.write().await;
        wallets.insert(wallet.id.clone(), wallet);
        Ok(())
    }

    async fn get(&self, id: &WalletId) -> Result<Option<Wallet>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(id).cloned())
    }

    async fn all(&self) -> Result<Vec<Wallet>> {
        let wallets = self.wallets.read().await;
        let mut all: Vec<Wallet> = wallets.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

/// Thread-safe in-memory ledger. Keeps a per-wallet creation-order index so
/// replays and reference lookups come back in append order.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    entries: Arc<RwLock<LedgerState>>,
}

#[derive(Default)]
struct LedgerState {
    by_id: HashMap<Uuid, LedgerEntry>,
    by_wallet: HashMap<WalletId, Vec<Uuid>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn update_topup(&self, entry: LedgerEntry) -> Result<()> {
        let mut state = self.entries.write().await;
        let existing = state
            .by_id
            .get_mut(&entry.id)
            .ok_or(WalletError::EntryNotFound(entry.id))?;
        if existing.entry_type != EntryType::Topup || existing.status != EntryStatus::Pending {
            return Err(WalletError::InvalidTopupState {
                id: entry.id,
                status: existing.status,
            });
        }
        *existing = entry;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        let state = self.entries.read().await;
        Ok(state.by_id.get(&id).cloned())
    }

    async fn entries_for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<LedgerEntry>> {
        let state = self.entries.read().await;
        let ids = state.by_wallet.get(wallet_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }

    async fn find_by_reference(
        &self,
        wallet_id: &WalletId,
        reference: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries_for_wallet(wallet_id).await?;
        Ok(entries
            .into_iter()
            .filter(|e| e.reference == reference)
            .collect())
    }

    async fn refunds_of(&self, original_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let state = self.entries.read().await;
        Ok(state
            .by_id
            .values()
            .filter(|e| {
                e.entry_type == EntryType::Refund && e.related_entry_id == Some(original_id)
            })
            .cloned()
            .collect())
    }

    async fn reversals_of(&self, original_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let state = self.entries.read().await;
        Ok(state
            .by_id
            .values()
            .filter(|e| {
                e.entry_type == EntryType::Reversal && e.related_entry_id == Some(original_id)
            })
            .cloned()
            .collect())
    }

    async fn confirmed_topups(&self, gateway: &str, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        let state = self.entries.read().await;
        Ok(state
            .by_id
            .values()
            .filter(|e| {
                e.entry_type == EntryType::Topup
                    && e.status == EntryStatus::Confirmed
                    && e.gateway.as_deref() == Some(gateway)
                    && e.settled_at.map(|t| t.date_naive()) == Some(date)
            })
            .cloned()
            .collect())
    }
}

/// Thread-safe in-memory hold store.
#[derive(Default, Clone)]
pub struct InMemoryHoldStore {
    holds: Arc<RwLock<HashMap<Uuid, Hold>>>,
}

impl InMemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldStore for InMemoryHoldStore {
    async fn store(&self, hold: Hold) -> Result<()> {
        let mut holds = self.holds.write().await;
        holds.insert(hold.id, hold);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Hold>> {
        let holds = self.holds.read().await;
        Ok(holds.get(&id).cloned())
    }

    async fn open_holds(&self) -> Result<Vec<Hold>> {
        let holds = self.holds.read().await;
        let mut open: Vec<Hold> = holds
            .values()
            .filter(|h| h.status == HoldStatus::Open)
            .cloned()
            .collect();
        open.sort_by_key(|h| h.created_at);
        Ok(open)
    }

    async fn find_open_by_reference(
        &self,
        wallet_id: &WalletId,
        reference: &str,
    ) -> Result<Option<Hold>> {
        let holds = self.holds.read().await;
        Ok(holds
            .values()
            .find(|h| {
                h.status == HoldStatus::Open
                    && h.wallet_id == *wallet_id
                    && h.reference == reference
            })
            .cloned())
    }
}

/// Atomic commits across the in-memory stores. Holds the write locks of the
/// touched maps for the duration of the apply, so no reader interleaves
/// between the ledger write and the wallet write.
#[derive(Clone)]
pub struct InMemoryUnitOfWork {
    wallets: InMemoryWalletStore,
    ledger: InMemoryLedgerStore,
    holds: InMemoryHoldStore,
    idempotency: InMemoryIdempotencyStore,
}

impl InMemoryUnitOfWork {
    pub fn new(
        wallets: InMemoryWalletStore,
        ledger: InMemoryLedgerStore,
        holds: InMemoryHoldStore,
        idempotency: InMemoryIdempotencyStore,
    ) -> Self {
        Self {
            wallets,
            ledger,
            holds,
            idempotency,
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(
        &self,
        wallet: Wallet,
        entries: Vec<LedgerEntry>,
        hold: Option<Hold>,
        idempotency: Option<IdempotencyRecord>,
    ) -> Result<()> {
        let mut wallets = self.wallets.wallets.write().await;
        let mut state = self.ledger.entries.write().await;
        let mut holds = self.holds.holds.write().await;
        let mut records = self.idempotency.records.write().await;
        for entry in entries {
            if !state.by_id.contains_key(&entry.id) {
                state
                    .by_wallet
                    .entry(entry.wallet_id.clone())
                    .or_default()
                    .push(entry.id);
            }
            state.by_id.insert(entry.id, entry);
        }
        if let Some(hold) = hold {
            holds.insert(hold.id, hold);
        }
        if let Some(record) = idempotency {
            records.insert((record.wallet_id.clone(), record.key.clone()), record);
        }
        wallets.insert(wallet.id.clone(), wallet);
        Ok(())
    }
}

/// Thread-safe in-memory idempotency record store.
#[derive(Default, Clone)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<(WalletId, String), IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, wallet_id: &WalletId, key: &str) -> Result<Option<IdempotencyRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(wallet_id.clone(), key.to_string()))
            .cloned())
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert((record.wallet_id.clone(), record.key.clone()), record);
        Ok(())
    }

    async fn remove(&self, wallet_id: &WalletId, key: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(&(wallet_id.clone(), key.to_string()));
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| match record.state.completed_at() {
            Some(completed_at) => completed_at >= cutoff,
            None => true,
        });
        Ok(before - records.len())
    }
}

/// Thread-safe in-memory reconciliation report store.
#[derive(Default, Clone)]
pub struct InMemoryReportStore {
    reports: Arc<RwLock<HashMap<(String, NaiveDate), ReconciliationReport>>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn store(&self, report: ReconciliationReport) -> Result<()> {
        let mut reports = self.reports.write().await;
        reports.insert((report.gateway.clone(), report.date), report);
        Ok(())
    }

    async fn get(&self, gateway: &str, date: NaiveDate) -> Result<Option<ReconciliationReport>> {
        let reports = self.reports.read().await;
        Ok(reports.get(&(gateway.to_string(), date)).cloned())
    }
}

/// Collects emitted events for inspection. Stands in for the notification
/// and audit collaborators in tests and replay runs.
#[derive(Default, Clone)]
pub struct MemoryEventSink {
    events: Arc<RwLock<Vec<WalletEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<WalletEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: WalletEvent) -> Result<()> {
        let mut events = self.events.write().await;
        events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::Direction;
    use crate::domain::wallet::{Amount, Balance, Currency};
    use rust_decimal_macros::dec;

    fn entry(wallet: &str, reference: &str) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: WalletId::new(wallet),
            entry_type: EntryType::Charge,
            direction: Direction::Debit,
            amount: Amount::new(dec!(10)).unwrap(),
            currency: Currency::Sar,
            running_balance: Some(Balance::new(dec!(90))),
            seq: Some(0),
            reference: reference.to_string(),
            idempotency_key: None,
            gateway: None,
            gateway_reference: None,
            status: EntryStatus::Confirmed,
            related_entry_id: None,
            memo: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn test_wallet_store_round_trip() {
        let store = InMemoryWalletStore::new();
        let wallet = Wallet::new(WalletId::new("acct-1"), Currency::Sar);

        store.store(wallet.clone()).await.unwrap();
        let loaded = store.get(&wallet.id).await.unwrap().unwrap();
        assert_eq!(loaded, wallet);
        assert!(store.get(&WalletId::new("acct-2")).await.unwrap().is_none());
    }

    fn uow_for(ledger: &InMemoryLedgerStore) -> InMemoryUnitOfWork {
        InMemoryUnitOfWork::new(
            InMemoryWalletStore::new(),
            ledger.clone(),
            InMemoryHoldStore::new(),
            InMemoryIdempotencyStore::new(),
        )
    }

    #[tokio::test]
    async fn test_ledger_preserves_append_order() {
        let store = InMemoryLedgerStore::new();
        let uow = uow_for(&store);
        let wallet = Wallet::new(WalletId::new("acct-1"), Currency::Sar);
        let first = entry("acct-1", "order-1");
        let second = entry("acct-1", "order-2");
        uow.commit(wallet.clone(), vec![first.clone()], None, None)
            .await
            .unwrap();
        uow.commit(wallet, vec![second.clone()], None, None)
            .await
            .unwrap();

        let entries = store
            .entries_for_wallet(&WalletId::new("acct-1"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, first.id);
        assert_eq!(entries[1].id, second.id);
    }

    #[tokio::test]
    async fn test_update_topup_rejects_settled_entries() {
        let store = InMemoryLedgerStore::new();
        let charge = entry("acct-1", "order-1");
        uow_for(&store)
            .commit(
                Wallet::new(WalletId::new("acct-1"), Currency::Sar),
                vec![charge.clone()],
                None,
                None,
            )
            .await
            .unwrap();

        let err = store.update_topup(charge).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidTopupState { .. }));
    }

    #[tokio::test]
    async fn test_unit_of_work_commits_wallet_and_entry_together() {
        let wallets = InMemoryWalletStore::new();
        let ledger = InMemoryLedgerStore::new();
        let holds = InMemoryHoldStore::new();
        let idempotency = InMemoryIdempotencyStore::new();
        let uow = InMemoryUnitOfWork::new(
            wallets.clone(),
            ledger.clone(),
            holds.clone(),
            idempotency.clone(),
        );

        let wallet = Wallet::new(WalletId::new("acct-1"), Currency::Sar);
        let e = entry("acct-1", "order-1");
        let record = IdempotencyRecord::in_flight(wallet.id.clone(), "K1").completed(vec![e.id]);
        uow.commit(wallet.clone(), vec![e.clone()], None, Some(record))
            .await
            .unwrap();

        assert_eq!(wallets.get(&wallet.id).await.unwrap(), Some(wallet.clone()));
        assert_eq!(ledger.get(e.id).await.unwrap().unwrap().id, e.id);
        assert!(
            idempotency
                .get(&wallet.id, "K1")
                .await
                .unwrap()
                .is_some_and(|r| r.state.is_terminal())
        );
        // Re-committing the same entry id rewrites in place, no duplicate
        // index slot.
        let mut settled = e.clone();
        settled.memo = Some("settled".to_string());
        uow.commit(
            Wallet::new(WalletId::new("acct-1"), Currency::Sar),
            vec![settled],
            None,
            None,
        )
        .await
        .unwrap();
        let all = ledger
            .entries_for_wallet(&WalletId::new("acct-1"))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].memo.as_deref(), Some("settled"));
    }

    #[tokio::test]
    async fn test_idempotency_prune_keeps_in_flight() {
        let store = InMemoryIdempotencyStore::new();
        let wallet = WalletId::new("acct-1");
        store
            .put(IdempotencyRecord::in_flight(wallet.clone(), "k-old").completed(vec![]))
            .await
            .unwrap();
        store
            .put(IdempotencyRecord::in_flight(wallet.clone(), "k-live"))
            .await
            .unwrap();

        let removed = store
            .prune(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&wallet, "k-live").await.unwrap().is_some());
        assert!(store.get(&wallet, "k-old").await.unwrap().is_none());
    }
}
