use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use wallet_ledger::application::engine::WalletEngine;
use wallet_ledger::application::reconciler::Reconciler;
use wallet_ledger::config::EngineConfig;
use wallet_ledger::domain::ledger::{Direction, EntryType};
use wallet_ledger::domain::ports::{
    EventSinkRef, HoldStoreRef, IdempotencyStoreRef, LedgerStoreRef, ReportStoreRef,
    UnitOfWorkRef, WalletStoreRef,
};
use wallet_ledger::domain::reconciliation::{MatchStatus, SettlementRecord};
use wallet_ledger::domain::wallet::{Amount, AutoTopup, Currency, WalletId};
use wallet_ledger::error::WalletError;
use wallet_ledger::infrastructure::in_memory::{
    InMemoryHoldStore, InMemoryIdempotencyStore, InMemoryLedgerStore, InMemoryReportStore,
    InMemoryUnitOfWork, InMemoryWalletStore, MemoryEventSink,
};
#[cfg(feature = "storage-rocksdb")]
use wallet_ledger::infrastructure::rocksdb::RocksDbStore;
use wallet_ledger::interfaces::csv::operation_reader::{OpKind, OperationReader, OperationRecord};
use wallet_ledger::interfaces::csv::settlement_reader::SettlementReader;
use wallet_ledger::interfaces::csv::wallet_writer::WalletWriter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an operations CSV and print final wallet states as CSV
    Run {
        /// Input operations CSV file
        input: PathBuf,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Replay an operations CSV, then reconcile a gateway settlement feed
    Reconcile {
        /// Input operations CSV file
        input: PathBuf,

        /// Settlement feed CSV file (gateway_reference, amount, currency)
        settlement: PathBuf,

        /// Gateway the settlement feed belongs to
        #[arg(long)]
        gateway: String,

        /// Settlement date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

struct Stores {
    wallets: WalletStoreRef,
    ledger: LedgerStoreRef,
    holds: HoldStoreRef,
    idempotency: IdempotencyStoreRef,
    uow: UnitOfWorkRef,
    reports: ReportStoreRef,
    events: EventSinkRef,
}

fn build_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDbStore::open(path).into_diagnostic()?;
            Ok(Stores {
                wallets: Arc::new(store.clone()),
                ledger: Arc::new(store.clone()),
                holds: Arc::new(store.clone()),
                idempotency: Arc::new(store.clone()),
                uow: Arc::new(store.clone()),
                reports: Arc::new(store),
                events: Arc::new(MemoryEventSink::new()),
            })
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => Err(miette::miette!(
            "this build has no persistent storage; rebuild with --features storage-rocksdb"
        )),
        None => {
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
            Ok(Stores {
                wallets: Arc::new(wallets),
                ledger: Arc::new(ledger),
                holds: Arc::new(holds),
                idempotency: Arc::new(idempotency),
                uow: Arc::new(uow),
                reports: Arc::new(InMemoryReportStore::new()),
                events: Arc::new(MemoryEventSink::new()),
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { input, db_path } => {
            let stores = build_stores(db_path)?;
            let engine = new_engine(&stores);
            replay_operations(&engine, &input).await?;

            let wallets = engine.wallets().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = WalletWriter::new(stdout.lock());
            writer.write_wallets(wallets).into_diagnostic()?;
        }
        Command::Reconcile {
            input,
            settlement,
            gateway,
            date,
            db_path,
        } => {
            let stores = build_stores(db_path)?;
            let engine = new_engine(&stores);
            replay_operations(&engine, &input).await?;

            let file = File::open(settlement).into_diagnostic()?;
            let feed: Vec<SettlementRecord> = SettlementReader::new(file)
                .records()
                .collect::<wallet_ledger::error::Result<_>>()
                .into_diagnostic()?;

            let reconciler = Reconciler::new(stores.ledger.clone(), stores.reports.clone());
            let report = reconciler
                .reconcile(&gateway, date, &feed)
                .await
                .into_diagnostic()?;
            print_report(&report);
        }
    }

    Ok(())
}

fn new_engine(stores: &Stores) -> WalletEngine {
    WalletEngine::new(
        stores.wallets.clone(),
        stores.ledger.clone(),
        stores.holds.clone(),
        stores.idempotency.clone(),
        stores.uow.clone(),
        stores.events.clone(),
        EngineConfig::default(),
    )
}

async fn replay_operations(engine: &WalletEngine, input: &PathBuf) -> Result<()> {
    let file = File::open(input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for record in reader.operations() {
        match record {
            Ok(record) => {
                if let Err(e) = apply_operation(engine, &record).await {
                    eprintln!("Error applying {} for {}: {}", record.op, record.wallet, e);
                }
            }
            Err(e) => {
                eprintln!("Error reading operation: {}", e);
            }
        }
    }
    Ok(())
}

async fn apply_operation(
    engine: &WalletEngine,
    record: &OperationRecord,
) -> wallet_ledger::error::Result<()> {
    let wallet_id = WalletId::new(record.wallet.clone());
    match record.op {
        OpKind::Provision => {
            let currency = record.currency.ok_or_else(|| {
                WalletError::Validation("provision requires a currency".to_string())
            })?;
            engine.provision_wallet(wallet_id, currency).await?;
        }
        OpKind::Suspend => {
            engine.suspend_wallet(&wallet_id).await?;
        }
        OpKind::Resume => {
            engine.resume_wallet(&wallet_id).await?;
        }
        OpKind::EnableOverdraft => {
            engine.set_overdraft_enabled(&wallet_id, true).await?;
        }
        OpKind::DisableOverdraft => {
            engine.set_overdraft_enabled(&wallet_id, false).await?;
        }
        OpKind::SetThreshold => {
            let threshold = record.amount.map(Amount::try_from).transpose()?;
            engine
                .set_low_balance_threshold(&wallet_id, threshold)
                .await?;
        }
        OpKind::EnableAutoTopup => {
            // A row without an amount disables auto-top-up.
            let policy = record
                .amount
                .map(Amount::try_from)
                .transpose()?
                .map(|amount| AutoTopup { amount });
            engine.configure_auto_topup(&wallet_id, policy).await?;
        }
        OpKind::Topup => {
            let amount = Amount::try_from(record.require_amount()?)?;
            let currency = currency_for(engine, &wallet_id, record).await?;
            let gateway = record.gateway.as_deref().unwrap_or("default");
            engine
                .initiate_topup(
                    &wallet_id,
                    amount,
                    currency,
                    gateway,
                    record.require_reference()?,
                    record.require_key()?,
                )
                .await?;
        }
        OpKind::Confirm => {
            let reference = record.require_reference()?;
            let topup = engine
                .pending_topup_by_reference(&wallet_id, reference)
                .await?
                .ok_or_else(|| {
                    WalletError::Validation(format!("no pending top-up for {reference:?}"))
                })?;
            // The gateway column carries the PSP settlement reference here.
            let gateway_reference = record.gateway.as_deref().ok_or_else(|| {
                WalletError::Validation("confirm requires a gateway reference".to_string())
            })?;
            engine.confirm_topup(topup.id, gateway_reference).await?;
        }
        OpKind::Fail => {
            let reference = record.require_reference()?;
            let topup = engine
                .pending_topup_by_reference(&wallet_id, reference)
                .await?
                .ok_or_else(|| {
                    WalletError::Validation(format!("no pending top-up for {reference:?}"))
                })?;
            engine.fail_topup(topup.id, "declined by gateway").await?;
        }
        OpKind::Charge => {
            let amount = Amount::try_from(record.require_amount()?)?;
            let currency = currency_for(engine, &wallet_id, record).await?;
            engine
                .charge(
                    &wallet_id,
                    record.require_reference()?,
                    amount,
                    currency,
                    record.require_key()?,
                )
                .await?;
        }
        OpKind::Hold => {
            let amount = Amount::try_from(record.require_amount()?)?;
            let currency = currency_for(engine, &wallet_id, record).await?;
            engine
                .create_hold(&wallet_id, record.require_reference()?, amount, currency)
                .await?;
        }
        OpKind::Capture => {
            let hold = open_hold(engine, &wallet_id, record).await?;
            let final_amount = record.amount.map(Amount::try_from).transpose()?;
            engine.capture_hold(hold.id, final_amount).await?;
        }
        OpKind::Release => {
            let hold = open_hold(engine, &wallet_id, record).await?;
            engine.release_hold(hold.id).await?;
        }
        OpKind::Refund => {
            let reference = record.require_reference()?;
            let original = engine
                .entries_by_reference(&wallet_id, reference)
                .await?
                .into_iter()
                .find(|e| {
                    e.is_effective()
                        && e.direction == Direction::Debit
                        && matches!(e.entry_type, EntryType::Charge | EntryType::Capture)
                })
                .ok_or_else(|| {
                    WalletError::Validation(format!("no settled debit for {reference:?}"))
                })?;
            let amount = Amount::try_from(record.require_amount()?)?;
            let currency = currency_for(engine, &wallet_id, record).await?;
            engine
                .refund(
                    &wallet_id,
                    original.id,
                    amount,
                    currency,
                    "requested refund",
                    record.require_key()?,
                )
                .await?;
        }
        OpKind::Reverse => {
            let reference = record.require_reference()?;
            let original = engine
                .entries_by_reference(&wallet_id, reference)
                .await?
                .into_iter()
                .rev()
                .find(|e| e.is_effective())
                .ok_or_else(|| {
                    WalletError::Validation(format!("no effective entry for {reference:?}"))
                })?;
            engine
                .reverse(&wallet_id, original.id, "manual reversal")
                .await?;
        }
    }
    Ok(())
}

async fn currency_for(
    engine: &WalletEngine,
    wallet_id: &WalletId,
    record: &OperationRecord,
) -> wallet_ledger::error::Result<Currency> {
    match record.currency {
        Some(currency) => Ok(currency),
        None => Ok(engine.wallet(wallet_id).await?.currency),
    }
}

async fn open_hold(
    engine: &WalletEngine,
    wallet_id: &WalletId,
    record: &OperationRecord,
) -> wallet_ledger::error::Result<wallet_ledger::domain::hold::Hold> {
    let reference = record.require_reference()?;
    engine
        .open_hold_by_reference(wallet_id, reference)
        .await?
        .ok_or_else(|| WalletError::Validation(format!("no open hold for {reference:?}")))
}

fn print_report(report: &wallet_ledger::domain::reconciliation::ReconciliationReport) {
    println!(
        "reconciliation {} {}: {} matched, {} missing externally, {} amount mismatches, {} unmatched external",
        report.gateway,
        report.date,
        report.matched_count(),
        report.missing_externally_count(),
        report.mismatch_count(),
        report.unmatched_external.len(),
    );
    for entry in &report.entries {
        match &entry.outcome {
            MatchStatus::Matched => {}
            MatchStatus::MissingExternally => {
                println!(
                    "missing externally: entry {} ({})",
                    entry.entry_id, entry.gateway_reference
                );
            }
            MatchStatus::AmountMismatch { internal, external } => {
                println!(
                    "amount mismatch: entry {} ({}) internal {} external {}",
                    entry.entry_id, entry.gateway_reference, internal, external
                );
            }
        }
    }
    for reference in &report.unmatched_external {
        println!("unmatched external settlement: {}", reference);
    }
}
