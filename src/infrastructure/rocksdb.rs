use crate::domain::hold::{Hold, HoldStatus};
use crate::domain::idempotency::IdempotencyRecord;
use crate::domain::ledger::{EntryStatus, EntryType, LedgerEntry};
use crate::domain::ports::{
    HoldStore, IdempotencyStore, LedgerStore, ReportStore, UnitOfWork, WalletStore,
};
use crate::domain::reconciliation::ReconciliationReport;
use crate::domain::wallet::{Wallet, WalletId};
use crate::error::{Result, WalletError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub const CF_WALLETS: &str = "wallets";
pub const CF_ENTRIES: &str = "entries";
pub const CF_HOLDS: &str = "holds";
pub const CF_IDEMPOTENCY: &str = "idempotency";
pub const CF_REPORTS: &str = "reports";

/// Persistent store backed by RocksDB, one column family per entity, JSON
/// values. `Clone` shares the underlying `Arc<DB>`, so the same instance can
/// serve every store port of the engine.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Opens or creates the database at `path`, ensuring all column
    /// families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_WALLETS, CF_ENTRIES, CF_HOLDS, CF_IDEMPOTENCY, CF_REPORTS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| WalletError::Internal(format!("column family {name:?} not found")))
    }

    fn put_json<T: serde::Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_key, bytes) =
                item.map_err(|e| WalletError::Internal(format!("iteration error: {e}")))?;
            values.push(serde_json::from_slice(&bytes)?);
        }
        Ok(values)
    }

    fn idempotency_key(wallet_id: &WalletId, key: &str) -> Vec<u8> {
        let mut bytes = wallet_id.as_str().as_bytes().to_vec();
        bytes.push(0);
        bytes.extend_from_slice(key.as_bytes());
        bytes
    }

    fn report_key(gateway: &str, date: NaiveDate) -> Vec<u8> {
        format!("{gateway}\x00{date}").into_bytes()
    }
}

#[async_trait]
impl WalletStore for RocksDbStore {
    async fn store(&self, wallet: Wallet) -> Result<()> {
        self.put_json(CF_WALLETS, wallet.id.as_str().as_bytes(), &wallet)
    }

    async fn get(&self, id: &WalletId) -> Result<Option<Wallet>> {
        self.get_json(CF_WALLETS, id.as_str().as_bytes())
    }

    async fn all(&self) -> Result<Vec<Wallet>> {
        let mut wallets: Vec<Wallet> = self.scan(CF_WALLETS)?;
        wallets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(wallets)
    }
}

#[async_trait]
impl LedgerStore for RocksDbStore {
    async fn update_topup(&self, entry: LedgerEntry) -> Result<()> {
        let key = entry.id.as_bytes().to_vec();
        let existing: LedgerEntry = self
            .get_json(CF_ENTRIES, &key)?
            .ok_or(WalletError::EntryNotFound(entry.id))?;
        if existing.entry_type != EntryType::Topup || existing.status != EntryStatus::Pending {
            return Err(WalletError::InvalidTopupState {
                id: entry.id,
                status: existing.status,
            });
        }
        self.put_json(CF_ENTRIES, &key, &entry)
    }

    async fn get(&self, id: Uuid) -> Result<Option<LedgerEntry>> {
        self.get_json(CF_ENTRIES, id.as_bytes())
    }

    async fn entries_for_wallet(&self, wallet_id: &WalletId) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .scan::<LedgerEntry>(CF_ENTRIES)?
            .into_iter()
            .filter(|e| e.wallet_id == *wallet_id)
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
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
        Ok(self
            .scan::<LedgerEntry>(CF_ENTRIES)?
            .into_iter()
            .filter(|e| {
                e.entry_type == EntryType::Refund && e.related_entry_id == Some(original_id)
            })
            .collect())
    }

    async fn reversals_of(&self, original_id: Uuid) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .scan::<LedgerEntry>(CF_ENTRIES)?
            .into_iter()
            .filter(|e| {
                e.entry_type == EntryType::Reversal && e.related_entry_id == Some(original_id)
            })
            .collect())
    }

    async fn confirmed_topups(&self, gateway: &str, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .scan::<LedgerEntry>(CF_ENTRIES)?
            .into_iter()
            .filter(|e| {
                e.entry_type == EntryType::Topup
                    && e.status == EntryStatus::Confirmed
                    && e.gateway.as_deref() == Some(gateway)
                    && e.settled_at.map(|t| t.date_naive()) == Some(date)
            })
            .collect())
    }
}

#[async_trait]
impl HoldStore for RocksDbStore {
    async fn store(&self, hold: Hold) -> Result<()> {
        self.put_json(CF_HOLDS, hold.id.as_bytes(), &hold)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Hold>> {
        self.get_json(CF_HOLDS, id.as_bytes())
    }

    async fn open_holds(&self) -> Result<Vec<Hold>> {
        let mut open: Vec<Hold> = self
            .scan::<Hold>(CF_HOLDS)?
            .into_iter()
            .filter(|h| h.status == HoldStatus::Open)
            .collect();
        open.sort_by_key(|h| h.created_at);
        Ok(open)
    }

    async fn find_open_by_reference(
        &self,
        wallet_id: &WalletId,
        reference: &str,
    ) -> Result<Option<Hold>> {
        Ok(self
            .scan::<Hold>(CF_HOLDS)?
            .into_iter()
            .find(|h| {
                h.status == HoldStatus::Open
                    && h.wallet_id == *wallet_id
                    && h.reference == reference
            }))
    }
}

#[async_trait]
impl UnitOfWork for RocksDbStore {
    /// One `WriteBatch` across the column families, so a crash never leaves
    /// an entry without its balance update or a settled operation without
    /// its idempotency record.
    async fn commit(
        &self,
        wallet: Wallet,
        entries: Vec<LedgerEntry>,
        hold: Option<Hold>,
        idempotency: Option<IdempotencyRecord>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        for entry in &entries {
            batch.put_cf(
                self.cf(CF_ENTRIES)?,
                entry.id.as_bytes(),
                serde_json::to_vec(entry)?,
            );
        }
        if let Some(hold) = &hold {
            batch.put_cf(
                self.cf(CF_HOLDS)?,
                hold.id.as_bytes(),
                serde_json::to_vec(hold)?,
            );
        }
        if let Some(record) = &idempotency {
            batch.put_cf(
                self.cf(CF_IDEMPOTENCY)?,
                Self::idempotency_key(&record.wallet_id, &record.key),
                serde_json::to_vec(record)?,
            );
        }
        batch.put_cf(
            self.cf(CF_WALLETS)?,
            wallet.id.as_str().as_bytes(),
            serde_json::to_vec(&wallet)?,
        );
        self.db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for RocksDbStore {
    async fn get(&self, wallet_id: &WalletId, key: &str) -> Result<Option<IdempotencyRecord>> {
        self.get_json(CF_IDEMPOTENCY, &Self::idempotency_key(wallet_id, key))
    }

    async fn put(&self, record: IdempotencyRecord) -> Result<()> {
        let key = Self::idempotency_key(&record.wallet_id, &record.key);
        self.put_json(CF_IDEMPOTENCY, &key, &record)
    }

    async fn remove(&self, wallet_id: &WalletId, key: &str) -> Result<()> {
        self.db.delete_cf(
            self.cf(CF_IDEMPOTENCY)?,
            Self::idempotency_key(wallet_id, key),
        )?;
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let stale: Vec<Vec<u8>> = self
            .scan::<IdempotencyRecord>(CF_IDEMPOTENCY)?
            .into_iter()
            .filter(|r| r.state.completed_at().is_some_and(|t| t < cutoff))
            .map(|r| Self::idempotency_key(&r.wallet_id, &r.key))
            .collect();
        for key in &stale {
            self.db.delete_cf(self.cf(CF_IDEMPOTENCY)?, key)?;
        }
        Ok(stale.len())
    }
}

#[async_trait]
impl ReportStore for RocksDbStore {
    async fn store(&self, report: ReconciliationReport) -> Result<()> {
        let key = Self::report_key(&report.gateway, report.date);
        self.put_json(CF_REPORTS, &key, &report)
    }

    async fn get(&self, gateway: &str, date: NaiveDate) -> Result<Option<ReconciliationReport>> {
        self.get_json(CF_REPORTS, &Self::report_key(gateway, date))
    }
}
