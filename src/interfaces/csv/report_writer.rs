use crate::domain::company::CompanyId;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One line of a balance report.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct BalanceRow {
    pub id: CompanyId,
    pub name: String,
    pub carbon: i64,
    pub cash: Decimal,
}

/// Writes balance rows as CSV to any `Write` sink.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows(mut self, rows: impl IntoIterator<Item = BalanceRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
