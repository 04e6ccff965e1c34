use crate::domain::reconciliation::SettlementRecord;
use crate::error::{Result, WalletError};
use std::io::Read;

/// Reads a gateway settlement feed (`gateway_reference, amount, currency`)
/// from a CSV source.
pub struct SettlementReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SettlementReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn records(self) -> impl Iterator<Item = Result<SettlementRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(WalletError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wallet::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_feed() {
        let data = "gateway_reference, amount, currency\n\
                    psp-001, 100.00, SAR\n\
                    psp-002, 25.50, SAR";
        let reader = SettlementReader::new(data.as_bytes());
        let records: Vec<SettlementRecord> =
            reader.records().collect::<Result<Vec<_>>>().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].gateway_reference, "psp-001");
        assert_eq!(records[0].amount, dec!(100.00));
        assert_eq!(records[1].currency, Currency::Sar);
    }

    #[test]
    fn test_reader_malformed_amount() {
        let data = "gateway_reference, amount, currency\npsp-001, lots, SAR";
        let reader = SettlementReader::new(data.as_bytes());
        let results: Vec<Result<SettlementRecord>> = reader.records().collect();

        assert!(results[0].is_err());
    }
}
