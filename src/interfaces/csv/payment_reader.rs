use crate::domain::purchase::PaymentReference;
use crate::error::Result;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct PaymentRecord {
    reference: String,
    status: String,
}

/// A processor export row: reference plus the status in the processor's own
/// vocabulary (`paid` for sessions, `succeeded` for intents).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRow {
    pub reference: PaymentReference,
    pub status: String,
}

/// Reads a payment processor export (`reference,status`).
pub struct PaymentReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PaymentReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn payments(self) -> impl Iterator<Item = Result<PaymentRow>> {
        self.reader
            .into_deserialize::<PaymentRecord>()
            .map(|record| {
                let record = record?;
                Ok(PaymentRow {
                    reference: record.reference.parse()?,
                    status: record.status,
                })
            })
    }
}
