use crate::domain::event::WalletEvent;
use crate::domain::hold::Hold;
use crate::domain::idempotency::IdempotencyRecord;
use crate::domain::ledger::LedgerEntry;
use crate::domain::reconciliation::ReconciliationReport;
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn store(&self, wallet: Wallet) -> Result<()>;
    async fn get(&self, id: &WalletId) -> Result<Option<Wallet>>;
    async fn all(&self) -> Result<Vec<Wallet>>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Rewrites a top-up entry for its one permitted transition
    /// (pending to confirmed/failed). New entries arrive through
    /// [`UnitOfWork::commit`], never here.
    async fn update_topup(&self, entry: LedgerEntry) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<LedgerEntry>>;
    /// All entries for a wallet in creation order.
    async fn entries_for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<LedgerEntry>>;
    async fn find_by_reference(
        &self,
        wallet_id: &WalletId,
        reference: &str,
    ) -> Result<Vec<LedgerEntry>>;
    /// Confirmed refund entries whose `related_entry_id` is the given entry.
    async fn refunds_of(&self, original_id: Uuid) -> Result<Vec<LedgerEntry>>;
    /// Reversal entries whose `related_entry_id` is the given entry.
    async fn reversals_of(&self, original_id: Uuid) -> Result<Vec<LedgerEntry>>;
    /// Confirmed top-ups for one gateway settled on the given date.
    async fn confirmed_topups(&self, gateway: &str, date: NaiveDate) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    async fn store(&self, hold: Hold) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Hold>>;
    async fn open_holds(&self) -> Result<Vec<Hold>>;
    async fn find_open_by_reference(
        &self,
        wallet_id: &WalletId,
        reference: &str,
    ) -> Result<Option<Hold>>;
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, wallet_id: &WalletId, key: &str) -> Result<Option<IdempotencyRecord>>;
    async fn put(&self, record: IdempotencyRecord) -> Result<()>;
    async fn remove(&self, wallet_id: &WalletId, key: &str) -> Result<()>;
    /// Deletes terminal records completed before the cutoff. Returns how many
    /// were removed.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn store(&self, report: ReconciliationReport) -> Result<()>;
    async fn get(&self, gateway: &str, date: NaiveDate) -> Result<Option<ReconciliationReport>>;
}

/// One operation's durable writes, applied as a single atomic commit: the
/// wallet snapshot, any ledger entry puts (fresh appends or the top-up
/// pending-to-settled rewrite), an optionally touched hold, and the
/// operation's completed idempotency record. Neither a concurrent reader
/// nor crash recovery can observe an entry without the balance that goes
/// with it, or a settled operation whose key is still unrecorded.
/// Entry-level transition rules are enforced by the engine under the wallet
/// lock before committing.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(
        &self,
        wallet: Wallet,
        entries: Vec<LedgerEntry>,
        hold: Option<Hold>,
        idempotency: Option<IdempotencyRecord>,
    ) -> Result<()>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: WalletEvent) -> Result<()>;
}

pub type WalletStoreRef = Arc<dyn WalletStore>;
pub type UnitOfWorkRef = Arc<dyn UnitOfWork>;
pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type HoldStoreRef = Arc<dyn HoldStore>;
pub type IdempotencyStoreRef = Arc<dyn IdempotencyStore>;
pub type ReportStoreRef = Arc<dyn ReportStore>;
pub type EventSinkRef = Arc<dyn EventSink>;
