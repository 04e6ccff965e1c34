use crate::domain::ports::{LedgerStoreRef, ReportStoreRef};
use crate::domain::reconciliation::{
    MatchStatus, ReconciledEntry, ReconciliationReport, SettlementRecord,
};
use crate::error::{Result, WalletError};
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, warn};

/// Out-of-band comparison of confirmed top-ups against a gateway settlement
/// feed. Read-only over the ledger: discrepancies are reported, never
/// auto-corrected — resolving them takes an explicit administrative
/// `reverse` or manual override.
pub struct Reconciler {
    ledger: LedgerStoreRef,
    reports: ReportStoreRef,
}

impl Reconciler {
    pub fn new(ledger: LedgerStoreRef, reports: ReportStoreRef) -> Self {
        Self { ledger, reports }
    }

    /// Matches every confirmed top-up for `(gateway, date)` against the feed
    /// by gateway reference, stores the resulting report and returns it.
    pub async fn reconcile(
        &self,
        gateway: &str,
        date: NaiveDate,
        feed: &[SettlementRecord],
    ) -> Result<ReconciliationReport> {
        let mut external: HashMap<&str, &SettlementRecord> = HashMap::new();
        for record in feed {
            if external
                .insert(record.gateway_reference.as_str(), record)
                .is_some()
            {
                return Err(WalletError::Validation(format!(
                    "settlement feed contains duplicate reference {:?}",
                    record.gateway_reference
                )));
            }
        }

        let mut report = ReconciliationReport::new(gateway, date);
        for entry in self.ledger.confirmed_topups(gateway, date).await? {
            let Some(reference) = entry.gateway_reference.clone() else {
                // Confirmed top-ups always carry a gateway reference; a
                // missing one is itself a discrepancy.
                warn!(entry = %entry.id, "confirmed top-up without gateway reference");
                report.entries.push(ReconciledEntry {
                    entry_id: entry.id,
                    gateway_reference: String::new(),
                    outcome: MatchStatus::MissingExternally,
                });
                continue;
            };

            let outcome = match external.remove(reference.as_str()) {
                None => MatchStatus::MissingExternally,
                Some(record) if record.amount == entry.amount.value() => MatchStatus::Matched,
                Some(record) => MatchStatus::AmountMismatch {
                    internal: entry.amount.value(),
                    external: record.amount,
                },
            };
            report.entries.push(ReconciledEntry {
                entry_id: entry.id,
                gateway_reference: reference,
                outcome,
            });
        }

        report.unmatched_external = external.keys().map(|r| r.to_string()).collect();
        report.unmatched_external.sort();

        info!(
            gateway,
            %date,
            matched = report.matched_count(),
            missing_externally = report.missing_externally_count(),
            amount_mismatches = report.mismatch_count(),
            unmatched_external = report.unmatched_external.len(),
            "reconciliation complete"
        );
        if report.requires_review() {
            warn!(gateway, %date, "reconciliation discrepancies need manual review");
        }

        self.reports.store(report.clone()).await?;
        Ok(report)
    }

    pub async fn report(
        &self,
        gateway: &str,
        date: NaiveDate,
    ) -> Result<Option<ReconciliationReport>> {
        self.reports.get(gateway, date).await
    }
}
