use crate::domain::wallet::Wallet;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WalletRow {
    wallet: String,
    currency: String,
    available: String,
    held: String,
    status: String,
}

impl From<&Wallet> for WalletRow {
    fn from(wallet: &Wallet) -> Self {
        Self {
            wallet: wallet.id.to_string(),
            currency: wallet.currency.to_string(),
            available: wallet.available.value().round_dp(4).normalize().to_string(),
            held: wallet.held.value().round_dp(4).normalize().to_string(),
            status: wallet.status.to_string(),
        }
    }
}

/// Writes final wallet states as CSV to any `Write` destination.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(destination: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(destination),
        }
    }

    pub fn write_wallets(&mut self, wallets: Vec<Wallet>) -> Result<()> {
        for wallet in &wallets {
            self.writer.serialize(WalletRow::from(wallet))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::{Amount, Currency, WalletId};
    use rust_decimal_macros::dec;

    #[test]
    fn test_writer_output() {
        let mut wallet = Wallet::new(WalletId::new("acct-1"), Currency::Sar);
        wallet.credit(Amount::try_from(dec!(10.5)).unwrap());

        let mut buffer = Vec::new();
        {
            let mut writer = WalletWriter::new(&mut buffer);
            writer.write_wallets(vec![wallet]).unwrap();
        }

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.starts_with("wallet,currency,available,held,status"));
        assert!(output.contains("acct-1,SAR,10.5,0,active"));
    }
}
