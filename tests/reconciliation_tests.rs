mod common;

use chrono::Utc;
use common::{TestContext, amount};
use rust_decimal_macros::dec;
use wallet_ledger::domain::reconciliation::{MatchStatus, SettlementRecord};
use wallet_ledger::domain::wallet::Currency;
use wallet_ledger::error::WalletError;

async fn settle_topup(ctx: &TestContext, wallet: &str, value: rust_decimal::Decimal, n: u32) {
    let id = common::wallet_id(wallet);
    let topup = ctx
        .engine
        .initiate_topup(
            &id,
            amount(value),
            Currency::Sar,
            "stripe",
            &format!("inv-{n}"),
            &format!("K{n}"),
        )
        .await
        .unwrap();
    ctx.engine
        .confirm_topup(topup.id, &format!("psp-{n}"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_all_matched() {
    let ctx = TestContext::new();
    ctx.funded_wallet("acct-1", dec!(100)).await;
    settle_topup(&ctx, "acct-1", dec!(200), 1).await;
    settle_topup(&ctx, "acct-1", dec!(300), 2).await;

    let feed = vec![
        SettlementRecord {
            gateway_reference: "psp-1".into(),
            amount: dec!(200),
            currency: Currency::Sar,
        },
        SettlementRecord {
            gateway_reference: "psp-2".into(),
            amount: dec!(300),
            currency: Currency::Sar,
        },
        SettlementRecord {
            gateway_reference: "psp-seed-acct-1".into(),
            amount: dec!(100),
            currency: Currency::Sar,
        },
    ];

    let report = ctx
        .reconciler()
        .reconcile("stripe", Utc::now().date_naive(), &feed)
        .await
        .unwrap();
    assert_eq!(report.matched_count(), 3);
    assert_eq!(report.missing_externally_count(), 0);
    assert_eq!(report.mismatch_count(), 0);
    assert!(report.unmatched_external.is_empty());
    assert!(!report.requires_review());
}

#[tokio::test]
async fn test_discrepancies_classified() {
    let ctx = TestContext::new();
    ctx.funded_wallet("acct-1", dec!(100)).await;
    settle_topup(&ctx, "acct-1", dec!(200), 1).await;
    settle_topup(&ctx, "acct-1", dec!(300), 2).await;

    // psp-1 settled for a different amount, psp-2 never settled, and the
    // gateway reports a psp-9 we have no record of.
    let feed = vec![
        SettlementRecord {
            gateway_reference: "psp-1".into(),
            amount: dec!(250),
            currency: Currency::Sar,
        },
        SettlementRecord {
            gateway_reference: "psp-seed-acct-1".into(),
            amount: dec!(100),
            currency: Currency::Sar,
        },
        SettlementRecord {
            gateway_reference: "psp-9".into(),
            amount: dec!(40),
            currency: Currency::Sar,
        },
    ];

    let report = ctx
        .reconciler()
        .reconcile("stripe", Utc::now().date_naive(), &feed)
        .await
        .unwrap();
    assert_eq!(report.matched_count(), 1);
    assert_eq!(report.missing_externally_count(), 1);
    assert_eq!(report.mismatch_count(), 1);
    assert_eq!(report.unmatched_external, vec!["psp-9".to_string()]);
    assert!(report.requires_review());

    let mismatch = report
        .entries
        .iter()
        .find(|e| e.gateway_reference == "psp-1")
        .unwrap();
    assert!(matches!(
        mismatch.outcome,
        MatchStatus::AmountMismatch {
            internal,
            external,
        } if internal == dec!(200) && external == dec!(250)
    ));
}

#[tokio::test]
async fn test_scoped_to_gateway() {
    let ctx = TestContext::new();
    ctx.funded_wallet("acct-1", dec!(100)).await;

    // Entry settled through a different gateway is out of scope.
    let id = common::wallet_id("acct-1");
    let topup = ctx
        .engine
        .initiate_topup(&id, amount(dec!(50)), Currency::Sar, "checkout", "inv-1", "K1")
        .await
        .unwrap();
    ctx.engine.confirm_topup(topup.id, "co-1").await.unwrap();

    let report = ctx
        .reconciler()
        .reconcile("checkout", Utc::now().date_naive(), &[
            SettlementRecord {
                gateway_reference: "co-1".into(),
                amount: dec!(50),
                currency: Currency::Sar,
            },
        ])
        .await
        .unwrap();
    assert_eq!(report.matched_count(), 1);
    assert_eq!(report.entries.len(), 1);
}

#[tokio::test]
async fn test_duplicate_feed_reference_rejected() {
    let ctx = TestContext::new();
    let feed = vec![
        SettlementRecord {
            gateway_reference: "psp-1".into(),
            amount: dec!(100),
            currency: Currency::Sar,
        },
        SettlementRecord {
            gateway_reference: "psp-1".into(),
            amount: dec!(100),
            currency: Currency::Sar,
        },
    ];

    let err = ctx
        .reconciler()
        .reconcile("stripe", Utc::now().date_naive(), &feed)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));
}

#[tokio::test]
async fn test_report_is_stored_and_retrievable() {
    let ctx = TestContext::new();
    ctx.funded_wallet("acct-1", dec!(100)).await;

    let date = Utc::now().date_naive();
    let reconciler = ctx.reconciler();
    let report = reconciler.reconcile("stripe", date, &[]).await.unwrap();
    assert_eq!(report.missing_externally_count(), 1);

    let stored = reconciler.report("stripe", date).await.unwrap().unwrap();
    assert_eq!(stored.id, report.id);
    assert!(reconciler.report("stripe", date.pred_opt().unwrap()).await.unwrap().is_none());
}
