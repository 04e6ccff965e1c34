use crate::application::locks::WalletLocks;
use crate::config::EngineConfig;
use crate::domain::event::WalletEvent;
use crate::domain::hold::{Hold, HoldStatus};
use crate::domain::idempotency::{IdempotencyRecord, IdempotencyState, StoredFailure};
use crate::domain::ledger::{Direction, EntryStatus, EntryType, LedgerEntry};
use crate::domain::ports::{
    EventSinkRef, HoldStoreRef, IdempotencyStoreRef, LedgerStoreRef, UnitOfWorkRef, WalletStoreRef,
};
use crate::domain::wallet::{Amount, AutoTopup, Currency, Wallet, WalletId};
use crate::error::{Result, WalletError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The wallet engine: every public balance-affecting operation of the
/// billing subsystem.
///
/// All mutations for one wallet run inside that wallet's critical section
/// (see [`WalletLocks`]), and per-wallet reads take the same lock, so a
/// half-applied mutation is never observable. The balance update and its
/// ledger append go to storage as one atomic commit (see
/// [`crate::domain::ports::UnitOfWork`]). Idempotency keys are checked and
/// recorded inside the same critical section, so a retried or concurrently
/// duplicated request can never double-apply.
pub struct WalletEngine {
    wallets: WalletStoreRef,
    ledger: LedgerStoreRef,
    holds: HoldStoreRef,
    idempotency: IdempotencyStoreRef,
    uow: UnitOfWorkRef,
    events: EventSinkRef,
    locks: WalletLocks,
    config: EngineConfig,
}

impl WalletEngine {
    pub fn new(
        wallets: WalletStoreRef,
        ledger: LedgerStoreRef,
        holds: HoldStoreRef,
        idempotency: IdempotencyStoreRef,
        uow: UnitOfWorkRef,
        events: EventSinkRef,
        config: EngineConfig,
    ) -> Self {
        let locks = WalletLocks::new(config.locking.acquire_timeout());
        Self {
            wallets,
            ledger,
            holds,
            idempotency,
            uow,
            events,
            locks,
            config,
        }
    }

    // ---- provisioning & admin ------------------------------------------

    /// Creates the wallet for a newly provisioned billing account. Calling
    /// it again with the same currency returns the existing wallet.
    pub async fn provision_wallet(&self, id: WalletId, currency: Currency) -> Result<Wallet> {
        let _lock = self.locks.acquire(&id).await?;
        if let Some(existing) = self.wallets.get(&id).await? {
            existing.ensure_currency(currency)?;
            return Ok(existing);
        }

        let wallet = Wallet::new(id.clone(), currency);
        self.wallets.store(wallet.clone()).await?;
        info!(wallet = %id, %currency, "wallet provisioned");
        self.emit(WalletEvent::audit(
            "provision_wallet",
            id,
            None,
            wallet.total(),
            wallet.total(),
        ))
        .await;
        Ok(wallet)
    }

    pub async fn suspend_wallet(&self, id: &WalletId) -> Result<Wallet> {
        self.update_wallet(id, "suspend_wallet", |wallet| {
            wallet.status = crate::domain::wallet::WalletStatus::Suspended;
            Ok(())
        })
        .await
    }

    pub async fn resume_wallet(&self, id: &WalletId) -> Result<Wallet> {
        self.update_wallet(id, "resume_wallet", |wallet| {
            wallet.status = crate::domain::wallet::WalletStatus::Active;
            Ok(())
        })
        .await
    }

    pub async fn set_overdraft_enabled(&self, id: &WalletId, enabled: bool) -> Result<Wallet> {
        self.update_wallet(id, "set_overdraft", |wallet| {
            wallet.overdraft_enabled = enabled;
            Ok(())
        })
        .await
    }

    pub async fn set_low_balance_threshold(
        &self,
        id: &WalletId,
        threshold: Option<Amount>,
    ) -> Result<Wallet> {
        self.update_wallet(id, "set_low_balance_threshold", |wallet| {
            wallet.low_balance_threshold = threshold;
            Ok(())
        })
        .await
    }

    pub async fn configure_auto_topup(
        &self,
        id: &WalletId,
        auto_topup: Option<AutoTopup>,
    ) -> Result<Wallet> {
        self.update_wallet(id, "configure_auto_topup", |wallet| {
            wallet.auto_topup = auto_topup;
            Ok(())
        })
        .await
    }

    async fn update_wallet(
        &self,
        id: &WalletId,
        operation: &str,
        apply: impl FnOnce(&mut Wallet) -> Result<()>,
    ) -> Result<Wallet> {
        let _lock = self.locks.acquire(id).await?;
        let mut wallet = self.load_wallet(id).await?;
        let before = wallet.total();
        apply(&mut wallet)?;
        wallet.touch(Utc::now());
        self.wallets.store(wallet.clone()).await?;
        info!(wallet = %id, operation, "wallet updated");
        self.emit(WalletEvent::audit(
            operation,
            id.clone(),
            None,
            before,
            wallet.total(),
        ))
        .await;
        Ok(wallet)
    }

    // ---- reads ----------------------------------------------------------
    //
    // Per-wallet reads take the wallet lock: a mutation in progress on
    // another task can never be observed with its entry appended but the
    // balance not yet stored.

    pub async fn wallet(&self, id: &WalletId) -> Result<Wallet> {
        let _lock = self.locks.acquire(id).await?;
        self.load_wallet(id).await
    }

    /// Point-in-time snapshot of all wallets; each row is internally
    /// consistent with its ledger through the atomic commit.
    pub async fn wallets(&self) -> Result<Vec<Wallet>> {
        self.wallets.all().await
    }

    pub async fn ledger_entries(&self, id: &WalletId) -> Result<Vec<LedgerEntry>> {
        let _lock = self.locks.acquire(id).await?;
        self.ledger.entries_for_wallet(id).await
    }

    pub async fn entries_by_reference(
        &self,
        id: &WalletId,
        reference: &str,
    ) -> Result<Vec<LedgerEntry>> {
        let _lock = self.locks.acquire(id).await?;
        self.ledger.find_by_reference(id, reference).await
    }

    pub async fn open_hold_by_reference(
        &self,
        id: &WalletId,
        reference: &str,
    ) -> Result<Option<Hold>> {
        let _lock = self.locks.acquire(id).await?;
        self.holds.find_open_by_reference(id, reference).await
    }

    pub async fn pending_topup_by_reference(
        &self,
        id: &WalletId,
        reference: &str,
    ) -> Result<Option<LedgerEntry>> {
        let _lock = self.locks.acquire(id).await?;
        let entries = self.ledger.find_by_reference(id, reference).await?;
        Ok(entries.into_iter().find(|e| {
            e.entry_type == EntryType::Topup && e.status == EntryStatus::Pending
        }))
    }

    // ---- top-ups --------------------------------------------------------

    /// Records a pending top-up awaiting gateway confirmation. No balance
    /// change: funds are not real until the gateway confirms.
    pub async fn initiate_topup(
        &self,
        wallet_id: &WalletId,
        amount: Amount,
        currency: Currency,
        gateway: &str,
        reference: &str,
        key: &str,
    ) -> Result<LedgerEntry> {
        let _lock = self.locks.acquire(wallet_id).await?;
        if let Some(prior) = self.begin_keyed(wallet_id, key).await? {
            return Ok(prior);
        }
        let result = match self.load_wallet(wallet_id).await {
            Ok(wallet) => {
                self.initiate_topup_locked(&wallet, amount, currency, gateway, reference, Some(key))
                    .await
            }
            Err(err) => Err(err),
        };
        self.finish_keyed(wallet_id, key, &result).await?;
        result
    }

    async fn initiate_topup_locked(
        &self,
        wallet: &Wallet,
        amount: Amount,
        currency: Currency,
        gateway: &str,
        reference: &str,
        key: Option<&str>,
    ) -> Result<LedgerEntry> {
        wallet.ensure_active()?;
        wallet.ensure_currency(currency)?;

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: wallet.id.clone(),
            entry_type: EntryType::Topup,
            direction: Direction::Credit,
            amount,
            currency: wallet.currency,
            running_balance: None,
            seq: None,
            reference: reference.to_string(),
            idempotency_key: key.map(str::to_string),
            gateway: Some(gateway.to_string()),
            gateway_reference: None,
            status: EntryStatus::Pending,
            related_entry_id: None,
            memo: None,
            created_at: Utc::now(),
            settled_at: None,
        };
        let record = key.map(|k| {
            IdempotencyRecord::in_flight(wallet.id.clone(), k).completed(vec![entry.id])
        });
        self.uow
            .commit(wallet.clone(), vec![entry.clone()], None, record)
            .await?;
        info!(wallet = %wallet.id, topup = %entry.id, %amount, gateway, "top-up initiated");
        self.emit(WalletEvent::audit(
            "initiate_topup",
            wallet.id.clone(),
            Some(entry.id),
            wallet.total(),
            wallet.total(),
        ))
        .await;
        Ok(entry)
    }

    /// Gateway callback: the money arrived. Credits the balance and settles
    /// the pending entry. Safe against repeated callbacks for the same
    /// top-up: a second confirm returns the already-confirmed entry.
    pub async fn confirm_topup(
        &self,
        topup_id: Uuid,
        gateway_reference: &str,
    ) -> Result<LedgerEntry> {
        let wallet_id = self.topup_wallet(topup_id).await?;
        let _lock = self.locks.acquire(&wallet_id).await?;

        let mut entry = self
            .ledger
            .get(topup_id)
            .await?
            .ok_or(WalletError::EntryNotFound(topup_id))?;
        match entry.status {
            EntryStatus::Confirmed => {
                debug!(topup = %topup_id, "repeated confirmation ignored");
                return Ok(entry);
            }
            EntryStatus::Failed => {
                return Err(WalletError::InvalidTopupState {
                    id: topup_id,
                    status: entry.status,
                });
            }
            EntryStatus::Pending => {}
        }

        // The gateway already moved the money; a suspended wallet still
        // receives the credit rather than losing track of it.
        let mut wallet = self.load_wallet(&wallet_id).await?;
        let before = wallet.total();
        let now = Utc::now();
        wallet.credit(entry.amount);

        entry.status = EntryStatus::Confirmed;
        entry.seq = Some(wallet.take_seq());
        entry.running_balance = Some(wallet.total());
        entry.gateway_reference = Some(gateway_reference.to_string());
        entry.settled_at = Some(now);

        wallet.touch(now);
        self.uow
            .commit(wallet.clone(), vec![entry.clone()], None, None)
            .await?;
        info!(
            wallet = %wallet_id, topup = %topup_id, amount = %entry.amount,
            gateway_reference, "top-up confirmed"
        );
        self.emit(WalletEvent::audit(
            "confirm_topup",
            wallet_id,
            Some(entry.id),
            before,
            wallet.total(),
        ))
        .await;
        Ok(entry)
    }

    /// Gateway callback: the top-up did not go through. No balance change.
    pub async fn fail_topup(&self, topup_id: Uuid, reason: &str) -> Result<LedgerEntry> {
        let wallet_id = self.topup_wallet(topup_id).await?;
        let _lock = self.locks.acquire(&wallet_id).await?;

        let mut entry = self
            .ledger
            .get(topup_id)
            .await?
            .ok_or(WalletError::EntryNotFound(topup_id))?;
        match entry.status {
            EntryStatus::Failed => return Ok(entry),
            EntryStatus::Confirmed => {
                return Err(WalletError::InvalidTopupState {
                    id: topup_id,
                    status: entry.status,
                });
            }
            EntryStatus::Pending => {}
        }

        entry.status = EntryStatus::Failed;
        entry.memo = Some(reason.to_string());
        self.ledger.update_topup(entry.clone()).await?;
        warn!(wallet = %wallet_id, topup = %topup_id, reason, "top-up failed");

        let wallet = self.load_wallet(&wallet_id).await?;
        self.emit(WalletEvent::audit(
            "fail_topup",
            wallet_id,
            Some(entry.id),
            wallet.total(),
            wallet.total(),
        ))
        .await;
        Ok(entry)
    }

    async fn topup_wallet(&self, topup_id: Uuid) -> Result<WalletId> {
        let entry = self
            .ledger
            .get(topup_id)
            .await?
            .ok_or(WalletError::EntryNotFound(topup_id))?;
        if entry.entry_type != EntryType::Topup {
            return Err(WalletError::Validation(format!(
                "entry {topup_id} is not a top-up"
            )));
        }
        Ok(entry.wallet_id)
    }

    // ---- charges, refunds, reversals -----------------------------------

    /// Direct debit, bypassing the hold workflow, for known-exact amounts.
    pub async fn charge(
        &self,
        wallet_id: &WalletId,
        reference: &str,
        amount: Amount,
        currency: Currency,
        key: &str,
    ) -> Result<LedgerEntry> {
        let _lock = self.locks.acquire(wallet_id).await?;
        if let Some(prior) = self.begin_keyed(wallet_id, key).await? {
            return Ok(prior);
        }
        let result = self
            .charge_locked(wallet_id, reference, amount, currency, Some(key))
            .await;
        self.finish_keyed(wallet_id, key, &result).await?;
        result
    }

    async fn charge_locked(
        &self,
        wallet_id: &WalletId,
        reference: &str,
        amount: Amount,
        currency: Currency,
        key: Option<&str>,
    ) -> Result<LedgerEntry> {
        let mut wallet = self.load_wallet(wallet_id).await?;
        wallet.ensure_active()?;
        wallet.ensure_currency(currency)?;

        let before = wallet.total();
        wallet.debit(amount)?;
        let entry = self.build_effective(
            &mut wallet,
            EntryType::Charge,
            Direction::Debit,
            amount,
            reference,
            key.map(str::to_string),
            None,
            None,
        );
        let record = key.map(|k| {
            IdempotencyRecord::in_flight(wallet.id.clone(), k).completed(vec![entry.id])
        });
        wallet.touch(Utc::now());
        self.uow
            .commit(wallet.clone(), vec![entry.clone()], None, record)
            .await?;
        info!(wallet = %wallet_id, entry = %entry.id, %amount, reference, "charge settled");
        self.emit(WalletEvent::audit(
            "charge",
            wallet.id.clone(),
            Some(entry.id),
            before,
            wallet.total(),
        ))
        .await;
        self.after_debit(&mut wallet, &entry).await;
        Ok(entry)
    }

    /// Credits back part or all of a settled debit. Fails closed: cumulative
    /// refunds never exceed the original amount.
    pub async fn refund(
        &self,
        wallet_id: &WalletId,
        original_entry_id: Uuid,
        amount: Amount,
        currency: Currency,
        reason: &str,
        key: &str,
    ) -> Result<LedgerEntry> {
        let _lock = self.locks.acquire(wallet_id).await?;
        if let Some(prior) = self.begin_keyed(wallet_id, key).await? {
            return Ok(prior);
        }
        let result = self
            .refund_locked(wallet_id, original_entry_id, amount, currency, reason, key)
            .await;
        self.finish_keyed(wallet_id, key, &result).await?;
        result
    }

    async fn refund_locked(
        &self,
        wallet_id: &WalletId,
        original_entry_id: Uuid,
        amount: Amount,
        currency: Currency,
        reason: &str,
        key: &str,
    ) -> Result<LedgerEntry> {
        let mut wallet = self.load_wallet(wallet_id).await?;
        wallet.ensure_active()?;
        wallet.ensure_currency(currency)?;

        let original = self
            .ledger
            .get(original_entry_id)
            .await?
            .ok_or(WalletError::EntryNotFound(original_entry_id))?;
        if original.wallet_id != *wallet_id {
            return Err(WalletError::Validation(
                "original entry belongs to another wallet".to_string(),
            ));
        }
        if !original.is_effective() || original.direction != Direction::Debit {
            return Err(WalletError::Validation(
                "only settled debit entries can be refunded".to_string(),
            ));
        }

        // A refund that was itself reversed no longer counts against the
        // original's refundable amount.
        let mut already_refunded = Decimal::ZERO;
        for refund in self.ledger.refunds_of(original.id).await? {
            if self.ledger.reversals_of(refund.id).await?.is_empty() {
                already_refunded += refund.amount.value();
            }
        }
        if already_refunded + amount.value() > original.amount.value() {
            return Err(WalletError::RefundExceedsOriginal {
                original: original.amount.value(),
                already_refunded,
                requested: amount.value(),
            });
        }

        let before = wallet.total();
        wallet.credit(amount);
        let mut entry = self.build_effective(
            &mut wallet,
            EntryType::Refund,
            Direction::Credit,
            amount,
            &original.reference,
            Some(key.to_string()),
            Some(original.id),
            None,
        );
        entry.memo = Some(reason.to_string());
        let record = IdempotencyRecord::in_flight(wallet.id.clone(), key).completed(vec![entry.id]);
        wallet.touch(Utc::now());
        self.uow
            .commit(wallet.clone(), vec![entry.clone()], None, Some(record))
            .await?;
        info!(
            wallet = %wallet_id, entry = %entry.id, original = %original.id,
            %amount, "refund settled"
        );
        self.emit(WalletEvent::audit(
            "refund",
            wallet.id.clone(),
            Some(entry.id),
            before,
            wallet.total(),
        ))
        .await;
        Ok(entry)
    }

    /// Administrative correction: appends an entry with inverted direction
    /// referencing the original. The original is never edited.
    pub async fn reverse(
        &self,
        wallet_id: &WalletId,
        entry_id: Uuid,
        reason: &str,
    ) -> Result<LedgerEntry> {
        let _lock = self.locks.acquire(wallet_id).await?;
        let mut wallet = self.load_wallet(wallet_id).await?;
        wallet.ensure_active()?;

        let original = self
            .ledger
            .get(entry_id)
            .await?
            .ok_or(WalletError::EntryNotFound(entry_id))?;
        if original.wallet_id != *wallet_id {
            return Err(WalletError::Validation(
                "original entry belongs to another wallet".to_string(),
            ));
        }
        if !original.is_effective() {
            return Err(WalletError::Validation(
                "only balance-effective entries can be reversed".to_string(),
            ));
        }
        if original.entry_type == EntryType::Release {
            return Err(WalletError::Validation(
                "release markers are zero-net and cannot be reversed".to_string(),
            ));
        }
        if !self.ledger.reversals_of(entry_id).await?.is_empty() {
            return Err(WalletError::Validation(format!(
                "entry {entry_id} has already been reversed"
            )));
        }

        let before = wallet.total();
        let direction = original.direction.inverted();
        match direction {
            Direction::Credit => wallet.credit(original.amount),
            Direction::Debit => wallet.debit(original.amount)?,
        }
        let mut entry = self.build_effective(
            &mut wallet,
            EntryType::Reversal,
            direction,
            original.amount,
            &original.reference,
            None,
            Some(original.id),
            None,
        );
        entry.memo = Some(reason.to_string());
        wallet.touch(Utc::now());
        self.uow
            .commit(wallet.clone(), vec![entry.clone()], None, None)
            .await?;
        info!(
            wallet = %wallet_id, entry = %entry.id, original = %original.id,
            reason, "entry reversed"
        );
        self.emit(WalletEvent::audit(
            "reverse",
            wallet.id.clone(),
            Some(entry.id),
            before,
            wallet.total(),
        ))
        .await;
        if direction == Direction::Debit {
            self.after_debit(&mut wallet, &entry).await;
        }
        Ok(entry)
    }

    // ---- holds ----------------------------------------------------------

    /// Reserves funds for a reference before the exact charge is known. No
    /// ledger entry yet: a hold is a reservation, not a settled transaction,
    /// visible in balance accounting through `held`.
    pub async fn create_hold(
        &self,
        wallet_id: &WalletId,
        reference: &str,
        amount: Amount,
        currency: Currency,
    ) -> Result<Hold> {
        let _lock = self.locks.acquire(wallet_id).await?;
        let mut wallet = self.load_wallet(wallet_id).await?;
        wallet.ensure_active()?;
        wallet.ensure_currency(currency)?;

        let before = wallet.total();
        wallet.hold_funds(amount)?;
        let hold = Hold::open(
            wallet.id.clone(),
            reference,
            amount,
            wallet.currency,
            self.config.holds.ttl(),
        );
        wallet.touch(Utc::now());
        self.uow
            .commit(wallet.clone(), vec![], Some(hold.clone()), None)
            .await?;
        info!(wallet = %wallet_id, hold = %hold.id, %amount, reference, "hold created");
        self.emit(WalletEvent::audit(
            "create_hold",
            wallet.id.clone(),
            None,
            before,
            wallet.total(),
        ))
        .await;
        Ok(hold)
    }

    /// Settles a hold into a debit, possibly for less than was reserved.
    /// The difference beyond `final_amount` returns to available.
    pub async fn capture_hold(
        &self,
        hold_id: Uuid,
        final_amount: Option<Amount>,
    ) -> Result<(Hold, LedgerEntry)> {
        let wallet_id = self.hold_wallet(hold_id).await?;
        let _lock = self.locks.acquire(&wallet_id).await?;

        let mut hold = self
            .holds
            .get(hold_id)
            .await?
            .ok_or(WalletError::HoldNotFound(hold_id))?;
        hold.ensure_open()?;
        let final_amount = final_amount.unwrap_or(hold.amount);
        if final_amount > hold.amount {
            return Err(WalletError::Validation(format!(
                "capture amount {final_amount} exceeds hold amount {}",
                hold.amount
            )));
        }

        let mut wallet = self.load_wallet(&wallet_id).await?;
        wallet.ensure_active()?;
        let before = wallet.total();
        let now = Utc::now();
        wallet.capture_held(hold.amount, final_amount)?;

        let reference = hold.reference.clone();
        let entry = self.build_effective(
            &mut wallet,
            EntryType::Capture,
            Direction::Debit,
            final_amount,
            &reference,
            None,
            None,
            None,
        );
        hold.close(HoldStatus::Captured, now);
        wallet.touch(now);
        self.uow
            .commit(wallet.clone(), vec![entry.clone()], Some(hold.clone()), None)
            .await?;
        info!(
            wallet = %wallet_id, hold = %hold_id, entry = %entry.id,
            %final_amount, "hold captured"
        );
        self.emit(WalletEvent::audit(
            "capture_hold",
            wallet.id.clone(),
            Some(entry.id),
            before,
            wallet.total(),
        ))
        .await;
        self.after_debit(&mut wallet, &entry).await;
        Ok((hold, entry))
    }

    /// Returns the full reserved amount to available. Net-zero: only a
    /// release audit marker is appended, no debit.
    pub async fn release_hold(&self, hold_id: Uuid) -> Result<Hold> {
        let wallet_id = self.hold_wallet(hold_id).await?;
        let _lock = self.locks.acquire(&wallet_id).await?;
        self.close_hold_locked(hold_id, HoldStatus::Released).await
    }

    /// Background sweep releasing holds past their TTL, marked `Expired` for
    /// a distinguishable audit trail. Serialized per wallet like any other
    /// mutation; a busy wallet is skipped and retried on the next sweep.
    pub async fn expire_due_holds(&self, now: DateTime<Utc>) -> Result<Vec<Hold>> {
        let mut expired = Vec::new();
        for hold in self.holds.open_holds().await? {
            if !hold.is_due_for_expiry(now) {
                continue;
            }
            let _lock = match self.locks.acquire(&hold.wallet_id).await {
                Ok(guard) => guard,
                Err(WalletError::WalletBusy(id)) => {
                    warn!(wallet = %id, hold = %hold.id, "wallet busy, expiry deferred");
                    continue;
                }
                Err(err) => return Err(err),
            };
            match self.close_hold_locked(hold.id, HoldStatus::Expired).await {
                Ok(hold) => expired.push(hold),
                // Raced with a capture/release between the scan and the lock.
                Err(WalletError::HoldNotOpen { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(expired)
    }

    async fn close_hold_locked(&self, hold_id: Uuid, status: HoldStatus) -> Result<Hold> {
        let mut hold = self
            .holds
            .get(hold_id)
            .await?
            .ok_or(WalletError::HoldNotFound(hold_id))?;
        hold.ensure_open()?;

        let mut wallet = self.load_wallet(&hold.wallet_id).await?;
        let before = wallet.total();
        let now = Utc::now();
        wallet.release_held(hold.amount)?;

        let reference = hold.reference.clone();
        let entry = self.build_effective(
            &mut wallet,
            EntryType::Release,
            Direction::Credit,
            hold.amount,
            &reference,
            None,
            None,
            None,
        );
        hold.close(status, now);
        wallet.touch(now);
        self.uow
            .commit(wallet.clone(), vec![entry.clone()], Some(hold.clone()), None)
            .await?;
        let operation = match status {
            HoldStatus::Expired => "expire_hold",
            _ => "release_hold",
        };
        info!(wallet = %hold.wallet_id, hold = %hold_id, operation, "hold closed");
        self.emit(WalletEvent::audit(
            operation,
            wallet.id.clone(),
            Some(entry.id),
            before,
            wallet.total(),
        ))
        .await;
        Ok(hold)
    }

    async fn hold_wallet(&self, hold_id: Uuid) -> Result<WalletId> {
        let hold = self
            .holds
            .get(hold_id)
            .await?
            .ok_or(WalletError::HoldNotFound(hold_id))?;
        Ok(hold.wallet_id)
    }

    // ---- maintenance ----------------------------------------------------

    /// Garbage-collects terminal idempotency records older than the
    /// retention window.
    pub async fn prune_idempotency(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.config.idempotency.retention();
        let removed = self.idempotency.prune(cutoff).await?;
        if removed > 0 {
            info!(removed, "pruned idempotency records");
        }
        Ok(removed)
    }

    // ---- internals ------------------------------------------------------

    async fn load_wallet(&self, id: &WalletId) -> Result<Wallet> {
        self.wallets
            .get(id)
            .await?
            .ok_or_else(|| WalletError::WalletNotFound(id.clone()))
    }

    /// Builds a balance-effective entry after the caller has applied the
    /// balance mutation: `seq` and `running_balance` snapshot the wallet
    /// post-mutation, inside the same critical section.
    #[allow(clippy::too_many_arguments)]
    fn build_effective(
        &self,
        wallet: &mut Wallet,
        entry_type: EntryType,
        direction: Direction,
        amount: Amount,
        reference: &str,
        idempotency_key: Option<String>,
        related_entry_id: Option<Uuid>,
        gateway: Option<String>,
    ) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            wallet_id: wallet.id.clone(),
            entry_type,
            direction,
            amount,
            currency: wallet.currency,
            running_balance: Some(wallet.total()),
            seq: Some(wallet.take_seq()),
            reference: reference.to_string(),
            idempotency_key,
            gateway,
            gateway_reference: None,
            status: EntryStatus::Confirmed,
            related_entry_id,
            memo: None,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Consults the idempotency record for `(wallet, key)` under the wallet
    /// lock. `Ok(Some(entry))` replays a completed operation; a recorded
    /// business failure replays as the same error; an in-flight record from
    /// a concurrent duplicate yields `OperationInProgress`. Fresh keys are
    /// marked in-flight before the operation executes.
    async fn begin_keyed(&self, wallet_id: &WalletId, key: &str) -> Result<Option<LedgerEntry>> {
        match self.idempotency.get(wallet_id, key).await? {
            Some(record) => match record.state {
                IdempotencyState::InFlight { started_at } => {
                    // The wallet lock is held here, so a live first attempt
                    // cannot be executing concurrently. A record past the
                    // takeover window is an orphan from a crash; reclaim it
                    // so the key is not dead forever.
                    if Utc::now() - started_at > self.config.idempotency.in_flight_takeover() {
                        warn!(wallet = %wallet_id, key, "reclaiming orphaned in-flight key");
                        self.idempotency
                            .put(IdempotencyRecord::in_flight(wallet_id.clone(), key))
                            .await?;
                        return Ok(None);
                    }
                    Err(WalletError::OperationInProgress(key.to_string()))
                }
                IdempotencyState::Completed { entry_ids, .. } => {
                    let id = entry_ids.first().copied().ok_or_else(|| {
                        WalletError::Internal(format!(
                            "idempotency record for key {key:?} has no entries"
                        ))
                    })?;
                    let entry = self
                        .ledger
                        .get(id)
                        .await?
                        .ok_or(WalletError::EntryNotFound(id))?;
                    debug!(wallet = %wallet_id, key, entry = %id, "idempotent replay");
                    Ok(Some(entry))
                }
                IdempotencyState::Failed { failure, .. } => {
                    debug!(wallet = %wallet_id, key, "replaying recorded failure");
                    Err(failure.into_error())
                }
            },
            None => {
                self.idempotency
                    .put(IdempotencyRecord::in_flight(wallet_id.clone(), key))
                    .await?;
                Ok(None)
            }
        }
    }

    /// Records the outcome of a failed keyed operation. Success outcomes are
    /// written atomically with the operation's commit, not here.
    async fn finish_keyed(
        &self,
        wallet_id: &WalletId,
        key: &str,
        result: &Result<LedgerEntry>,
    ) -> Result<()> {
        match result {
            Ok(_) => Ok(()),
            Err(err) => match StoredFailure::from_error(err) {
                Some(failure) => {
                    let record = IdempotencyRecord::in_flight(wallet_id.clone(), key);
                    self.idempotency.put(record.failed(failure)).await
                }
                // Transient errors release the key so a retry can execute.
                None => self.idempotency.remove(wallet_id, key).await,
            },
        }
    }

    /// Post-commit notification. The state change is already durable when
    /// this runs, so a sink failure is logged rather than reported as an
    /// operation failure: failing the call now would unpin the idempotency
    /// key and invite a retry that re-executes a settled debit.
    async fn emit(&self, event: WalletEvent) {
        if let Err(err) = self.events.emit(event).await {
            warn!(error = %err, "event sink failure after commit");
        }
    }

    /// Runs after every committed debit: emits the low-balance event when
    /// the threshold is crossed and, when configured, auto-initiates a
    /// top-up. The debit itself is already durable, so a failure here is
    /// logged and the next breach retries.
    async fn after_debit(&self, wallet: &mut Wallet, entry: &LedgerEntry) {
        let Some(threshold) = wallet.low_balance_threshold else {
            return;
        };
        if wallet.available >= threshold.into() {
            return;
        }

        warn!(
            wallet = %wallet.id, available = %wallet.available, threshold = %threshold,
            "balance below threshold"
        );
        self.emit(WalletEvent::LowBalance {
            wallet_id: wallet.id.clone(),
            available: wallet.available,
            threshold,
            triggered_by: entry.id,
            at: Utc::now(),
        })
        .await;

        if let Err(err) = self.try_auto_topup(wallet, entry).await {
            warn!(wallet = %wallet.id, error = %err, "auto top-up attempt failed");
        }
    }

    /// One attempt per breach event (key derived from the triggering entry)
    /// plus a per-wallet cool-down against repeated crossings.
    async fn try_auto_topup(&self, wallet: &mut Wallet, entry: &LedgerEntry) -> Result<()> {
        let Some(auto) = wallet.auto_topup else {
            return Ok(());
        };
        let now = Utc::now();
        if let Some(last) = wallet.last_auto_topup_at
            && now - last < self.config.auto_topup.cooldown()
        {
            debug!(wallet = %wallet.id, "auto top-up suppressed by cool-down");
            return Ok(());
        }

        let key = format!("auto-topup:{}:{}", wallet.id, entry.id);
        if self.idempotency.get(&wallet.id, &key).await?.is_some() {
            return Ok(());
        }
        let gateway = self.config.auto_topup.gateway.clone();
        // The cool-down stamp rides in the same commit as the pending entry
        // and its key record.
        wallet.last_auto_topup_at = Some(now);
        wallet.touch(now);
        let topup = self
            .initiate_topup_locked(
                wallet,
                auto.amount,
                wallet.currency,
                &gateway,
                &format!("auto-topup:{}", entry.id),
                Some(&key),
            )
            .await?;
        info!(wallet = %wallet.id, topup = %topup.id, "auto top-up initiated");
        Ok(())
    }
}
