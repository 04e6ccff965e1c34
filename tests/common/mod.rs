#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;
use wallet_ledger::application::engine::WalletEngine;
use wallet_ledger::application::reconciler::Reconciler;
use wallet_ledger::config::EngineConfig;
use wallet_ledger::domain::ports::{EventSinkRef, UnitOfWorkRef};
use wallet_ledger::domain::wallet::{Amount, Currency, Wallet, WalletId};
use wallet_ledger::infrastructure::in_memory::{
    InMemoryHoldStore, InMemoryIdempotencyStore, InMemoryLedgerStore, InMemoryReportStore,
    InMemoryUnitOfWork, InMemoryWalletStore, MemoryEventSink,
};

/// Fully wired in-memory engine plus handles to the collaborators tests
/// inspect directly.
pub struct TestContext {
    pub engine: WalletEngine,
    pub ledger: Arc<InMemoryLedgerStore>,
    pub idempotency: Arc<InMemoryIdempotencyStore>,
    pub reports: Arc<InMemoryReportStore>,
    pub events: MemoryEventSink,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, None, None)
    }

    /// Swaps the event sink, e.g. for a sink that fails on purpose.
    pub fn with_sink(sink: EventSinkRef) -> Self {
        Self::build(EngineConfig::default(), Some(sink), None)
    }

    /// Wraps the commit path, e.g. to pause a write mid-operation.
    pub fn with_uow(
        config: EngineConfig,
        wrap: impl FnOnce(InMemoryUnitOfWork) -> UnitOfWorkRef + 'static,
    ) -> Self {
        Self::build(config, None, Some(Box::new(wrap)))
    }

    fn build(
        config: EngineConfig,
        sink: Option<EventSinkRef>,
        wrap_uow: Option<Box<dyn FnOnce(InMemoryUnitOfWork) -> UnitOfWorkRef>>,
    ) -> Self {
        let wallets = InMemoryWalletStore::new();
        let ledger_store = InMemoryLedgerStore::new();
        let holds = InMemoryHoldStore::new();
        let idempotency_store = InMemoryIdempotencyStore::new();
        let inner_uow = InMemoryUnitOfWork::new(
            wallets.clone(),
            ledger_store.clone(),
            holds.clone(),
            idempotency_store.clone(),
        );
        let uow: UnitOfWorkRef = match wrap_uow {
            Some(wrap) => wrap(inner_uow),
            None => Arc::new(inner_uow),
        };

        let ledger = Arc::new(ledger_store);
        let idempotency = Arc::new(idempotency_store);
        let reports = Arc::new(InMemoryReportStore::new());
        let events = MemoryEventSink::new();
        let sink = sink.unwrap_or_else(|| Arc::new(events.clone()));
        let engine = WalletEngine::new(
            Arc::new(wallets),
            ledger.clone(),
            Arc::new(holds),
            idempotency.clone(),
            uow,
            sink,
            config,
        );
        Self {
            engine,
            ledger,
            idempotency,
            reports,
            events,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.ledger.clone(), self.reports.clone())
    }

    /// Provisions an active SAR wallet and tops it up with `initial`.
    pub async fn funded_wallet(&self, id: &str, initial: Decimal) -> Wallet {
        let wallet_id = WalletId::new(id);
        self.engine
            .provision_wallet(wallet_id.clone(), Currency::Sar)
            .await
            .unwrap();
        let topup = self
            .engine
            .initiate_topup(
                &wallet_id,
                amount(initial),
                Currency::Sar,
                "stripe",
                &format!("seed-{id}"),
                &format!("seed-key-{id}"),
            )
            .await
            .unwrap();
        self.engine
            .confirm_topup(topup.id, &format!("psp-seed-{id}"))
            .await
            .unwrap();
        self.engine.wallet(&wallet_id).await.unwrap()
    }
}

pub fn amount(value: Decimal) -> Amount {
    Amount::try_from(value).unwrap()
}

pub fn wallet_id(id: &str) -> WalletId {
    WalletId::new(id)
}
