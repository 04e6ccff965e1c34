use crate::error::{Result, WalletError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Identifies a wallet. One wallet exists per billing account, so this is the
/// billing-account reference, passed explicitly through every call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settlement currencies supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Sar,
    Usd,
    Eur,
    Gbp,
    Aed,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Sar => "SAR",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Aed => "AED",
        };
        f.write_str(code)
    }
}

impl std::str::FromStr for Currency {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SAR" => Ok(Currency::Sar),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "AED" => Ok(Currency::Aed),
            other => Err(WalletError::Validation(format!(
                "unknown currency {other:?}"
            ))),
        }
    }
}

/// A positive monetary amount. Wraps `rust_decimal::Decimal`; floating point
/// is banned in this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(WalletError::Validation(
                "amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = WalletError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A signed monetary balance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Balance(pub Decimal);

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Suspended,
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletStatus::Active => f.write_str("active"),
            WalletStatus::Suspended => f.write_str("suspended"),
        }
    }
}

/// Per-wallet auto-top-up configuration. Presence means enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoTopup {
    /// Amount to top up with when the low-balance threshold is crossed.
    pub amount: Amount,
}

/// Prepaid balance state for one billing account.
///
/// Mutated only through ledger-producing operations inside the engine's
/// per-wallet critical section. Never deleted, only suspended.
/// Invariants: `held >= 0` always; `available >= 0` unless
/// `overdraft_enabled`; `available + held` equals the signed sum of all
/// balance-effective ledger entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub currency: Currency,
    /// Funds spendable right now.
    pub available: Balance,
    /// Funds reserved by open holds.
    pub held: Balance,
    pub status: WalletStatus,
    /// Explicit per-wallet flag permitting a negative available balance.
    pub overdraft_enabled: bool,
    pub low_balance_threshold: Option<Amount>,
    pub auto_topup: Option<AutoTopup>,
    /// When the engine last auto-initiated a top-up; used for the cool-down.
    pub last_auto_topup_at: Option<DateTime<Utc>>,
    /// Next per-wallet ledger sequence number.
    pub next_seq: u64,
    /// Bumped on every mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(id: WalletId, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id,
            currency,
            available: Balance::ZERO,
            held: Balance::ZERO,
            status: WalletStatus::Active,
            overdraft_enabled: false,
            low_balance_threshold: None,
            auto_topup: None,
            last_auto_topup_at: None,
            next_seq: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total exposure: spendable plus reserved funds.
    pub fn total(&self) -> Balance {
        self.available + self.held
    }

    pub fn ensure_active(&self) -> Result<()> {
        match self.status {
            WalletStatus::Active => Ok(()),
            WalletStatus::Suspended => Err(WalletError::WalletSuspended(self.id.clone())),
        }
    }

    pub fn ensure_currency(&self, currency: Currency) -> Result<()> {
        if self.currency == currency {
            Ok(())
        } else {
            Err(WalletError::CurrencyMismatch {
                expected: self.currency,
                got: currency,
            })
        }
    }

    /// Credits the available balance.
    pub fn credit(&mut self, amount: Amount) {
        self.available += amount.into();
    }

    /// Debits the available balance, rejecting a negative result unless
    /// overdraft is enabled for this wallet.
    pub fn debit(&mut self, amount: Amount) -> Result<()> {
        let after = self.available - amount.into();
        if after < Balance::ZERO && !self.overdraft_enabled {
            return Err(WalletError::InsufficientFunds {
                requested: amount.value(),
                available: self.available.value(),
            });
        }
        self.available = after;
        Ok(())
    }

    /// Moves funds from available to held. Holds always require coverage,
    /// overdraft or not: a reservation of funds that do not exist is useless.
    pub fn hold_funds(&mut self, amount: Amount) -> Result<()> {
        if self.available < amount.into() {
            return Err(WalletError::InsufficientFunds {
                requested: amount.value(),
                available: self.available.value(),
            });
        }
        self.available -= amount.into();
        self.held += amount.into();
        Ok(())
    }

    /// Returns held funds to available (hold release or expiry).
    pub fn release_held(&mut self, amount: Amount) -> Result<()> {
        if self.held < amount.into() {
            return Err(WalletError::Internal(format!(
                "held balance {} below release amount {}",
                self.held, amount
            )));
        }
        self.held -= amount.into();
        self.available += amount.into();
        Ok(())
    }

    /// Settles a hold: the full reserved amount leaves `held`, and whatever
    /// was reserved beyond `final_amount` returns to `available`. The caller
    /// validates `final_amount <= hold_amount`.
    pub fn capture_held(&mut self, hold_amount: Amount, final_amount: Amount) -> Result<()> {
        if self.held < hold_amount.into() {
            return Err(WalletError::Internal(format!(
                "held balance {} below hold amount {}",
                self.held, hold_amount
            )));
        }
        self.held -= hold_amount.into();
        let remainder = hold_amount.value() - final_amount.value();
        self.available += Balance::new(remainder);
        Ok(())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }

    pub fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
