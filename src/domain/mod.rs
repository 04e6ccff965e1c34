pub mod event;
pub mod hold;
pub mod idempotency;
pub mod ledger;
pub mod ports;
pub mod reconciliation;
pub mod wallet;
