use crate::domain::wallet::Currency;
use crate::error::{Result, WalletError};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// A single row of an operations script.
///
/// Only `op` and `wallet` are mandatory; the remaining columns are read per
/// operation kind and validated by the dispatcher, not here.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRecord {
    pub op: OpKind,
    pub wallet: String,
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
}

impl OperationRecord {
    pub fn require_reference(&self) -> Result<&str> {
        self.reference
            .as_deref()
            .ok_or_else(|| WalletError::Validation(format!("{} requires a reference", self.op)))
    }

    pub fn require_amount(&self) -> Result<Decimal> {
        self.amount
            .ok_or_else(|| WalletError::Validation(format!("{} requires an amount", self.op)))
    }

    pub fn require_key(&self) -> Result<&str> {
        self.key
            .as_deref()
            .ok_or_else(|| WalletError::Validation(format!("{} requires an idempotency key", self.op)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Provision,
    Suspend,
    Resume,
    EnableOverdraft,
    DisableOverdraft,
    SetThreshold,
    EnableAutoTopup,
    Topup,
    Confirm,
    Fail,
    Charge,
    Hold,
    Capture,
    Release,
    Refund,
    Reverse,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OpKind::Provision => "provision",
            OpKind::Suspend => "suspend",
            OpKind::Resume => "resume",
            OpKind::EnableOverdraft => "enable_overdraft",
            OpKind::DisableOverdraft => "disable_overdraft",
            OpKind::SetThreshold => "set_threshold",
            OpKind::EnableAutoTopup => "enable_auto_topup",
            OpKind::Topup => "topup",
            OpKind::Confirm => "confirm",
            OpKind::Fail => "fail",
            OpKind::Charge => "charge",
            OpKind::Hold => "hold",
            OpKind::Capture => "capture",
            OpKind::Release => "release",
            OpKind::Refund => "refund",
            OpKind::Reverse => "reverse",
        };
        f.write_str(name)
    }
}

/// Reads operation records from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// exposing an iterator over `Result<OperationRecord>` so large scripts can
/// be streamed without loading them entirely into memory.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn operations(self) -> impl Iterator<Item = Result<OperationRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(WalletError::from))
    }
}
