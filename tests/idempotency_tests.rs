mod common;

use chrono::{Duration, Utc};
use common::{TestContext, amount, wallet_id};
use rust_decimal_macros::dec;
use std::sync::Arc;
use wallet_ledger::domain::idempotency::{IdempotencyRecord, IdempotencyState};
use wallet_ledger::domain::ledger::EntryType;
use wallet_ledger::domain::ports::IdempotencyStore;
use wallet_ledger::domain::wallet::{Balance, Currency};
use wallet_ledger::error::WalletError;

#[tokio::test]
async fn test_duplicate_charge_applies_once() {
    let ctx = TestContext::new();
    let wallet = ctx.funded_wallet("acct-1", dec!(500)).await;

    let first = ctx
        .engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap();
    let second = ctx
        .engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    let current = ctx.engine.wallet(&wallet.id).await.unwrap();
    assert_eq!(current.available, Balance::new(dec!(400)));

    let charges = ctx
        .engine
        .ledger_entries(&wallet.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Charge)
        .count();
    assert_eq!(charges, 1);
}

#[tokio::test]
async fn test_concurrent_duplicates_settle_to_one_debit() {
    let ctx = TestContext::new();
    let wallet = ctx.funded_wallet("acct-1", dec!(500)).await;
    let engine = Arc::new(ctx.engine);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let id = wallet.id.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .charge(&id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
                .await
        }));
    }

    let mut entry_ids = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(entry) => entry_ids.push(entry.id),
            // A duplicate that observed the in-flight first attempt.
            Err(WalletError::OperationInProgress(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert!(!entry_ids.is_empty());
    assert!(entry_ids.windows(2).all(|w| w[0] == w[1]));

    let current = engine.wallet(&wallet.id).await.unwrap();
    assert_eq!(current.available, Balance::new(dec!(400)));
}

#[tokio::test]
async fn test_in_flight_key_yields_operation_in_progress() {
    let ctx = TestContext::new();
    let wallet = ctx.funded_wallet("acct-1", dec!(500)).await;

    // Simulate a first attempt that is still executing elsewhere.
    ctx.idempotency
        .put(IdempotencyRecord::in_flight(wallet.id.clone(), "K1"))
        .await
        .unwrap();

    let err = ctx
        .engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::OperationInProgress(_)));

    let current = ctx.engine.wallet(&wallet.id).await.unwrap();
    assert_eq!(current.available, Balance::new(dec!(500)));
}

#[tokio::test]
async fn test_orphaned_in_flight_key_is_reclaimed() {
    let ctx = TestContext::new();
    let wallet = ctx.funded_wallet("acct-1", dec!(500)).await;

    // Left behind by a crashed attempt, well past the takeover window.
    ctx.idempotency
        .put(IdempotencyRecord {
            wallet_id: wallet.id.clone(),
            key: "K1".to_string(),
            state: IdempotencyState::InFlight {
                started_at: Utc::now() - Duration::minutes(5),
            },
        })
        .await
        .unwrap();

    let entry = ctx
        .engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap();
    let current = ctx.engine.wallet(&wallet.id).await.unwrap();
    assert_eq!(current.available, Balance::new(dec!(400)));

    // The reclaimed key replays like any completed operation.
    let replay = ctx
        .engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap();
    assert_eq!(replay.id, entry.id);
}

#[tokio::test]
async fn test_business_failure_replays_on_retry() {
    let ctx = TestContext::new();
    let wallet = ctx.funded_wallet("acct-1", dec!(50)).await;

    let err = ctx
        .engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { .. }));

    // Funds arrive, but the key is pinned to its recorded outcome.
    let topup = ctx
        .engine
        .initiate_topup(
            &wallet.id,
            amount(dec!(500)),
            Currency::Sar,
            "stripe",
            "inv-2",
            "T2",
        )
        .await
        .unwrap();
    ctx.engine.confirm_topup(topup.id, "psp-2").await.unwrap();
    let err = ctx
        .engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WalletError::InsufficientFunds {
            requested,
            available,
        } if requested == dec!(100) && available == dec!(50)
    ));

    // A fresh key sees the current balance.
    ctx.engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K2")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_keys_are_scoped_per_wallet() {
    let ctx = TestContext::new();
    let a = ctx.funded_wallet("acct-a", dec!(500)).await;
    let b = ctx.funded_wallet("acct-b", dec!(500)).await;

    ctx.engine
        .charge(&a.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap();
    // The same key on another wallet is a distinct operation.
    ctx.engine
        .charge(&b.id, "order-2", amount(dec!(70)), Currency::Sar, "K1")
        .await
        .unwrap();

    assert_eq!(
        ctx.engine.wallet(&a.id).await.unwrap().available,
        Balance::new(dec!(400))
    );
    assert_eq!(
        ctx.engine.wallet(&b.id).await.unwrap().available,
        Balance::new(dec!(430))
    );
}

#[tokio::test]
async fn test_prune_removes_terminal_records_after_retention() {
    let ctx = TestContext::new();
    let wallet = ctx.funded_wallet("acct-1", dec!(500)).await;

    ctx.engine
        .charge(&wallet.id, "order-1", amount(dec!(100)), Currency::Sar, "K1")
        .await
        .unwrap();

    // Within the retention window nothing is collected.
    assert_eq!(ctx.engine.prune_idempotency(Utc::now()).await.unwrap(), 0);

    let removed = ctx
        .engine
        .prune_idempotency(Utc::now() + Duration::days(31))
        .await
        .unwrap();
    // The seed top-up key and the charge key are both past retention.
    assert!(removed >= 2);
    assert!(
        ctx.idempotency
            .get(&wallet_id("acct-1"), "K1")
            .await
            .unwrap()
            .is_none()
    );
}
