use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One company to seed, with its opening balances.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct SeedCompany {
    pub name: String,
    pub carbon: i64,
    pub cash: Decimal,
}

/// Reads seed companies from a CSV source (`name,carbon,cash`).
///
/// Wraps `csv::Reader` and provides an iterator over `Result<SeedCompany>`,
/// trimming whitespace and tolerating flexible record lengths.
pub struct SeedReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SeedReader<R> {
    /// Creates a new `SeedReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes seed records.
    pub fn records(self) -> impl Iterator<Item = Result<SeedCompany>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "name, carbon, cash\nGreen Energy Corp, 1500, 50000\nEco Solutions Ltd, 2000, 75000.50";
        let reader = SeedReader::new(data.as_bytes());
        let results: Vec<Result<SeedCompany>> = reader.records().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(first.name, "Green Energy Corp");
        assert_eq!(first.carbon, 1500);
        assert_eq!(results[1].as_ref().unwrap().cash, dec!(75000.50));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "name, carbon, cash\nAcme, not-a-number, 100";
        let reader = SeedReader::new(data.as_bytes());
        let results: Vec<Result<SeedCompany>> = reader.records().collect();

        assert!(results[0].is_err());
    }
}
