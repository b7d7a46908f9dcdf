use crate::domain::content::{Amount, ContentItemId, Currency};
use crate::domain::identity::BuyerIdentity;
use crate::domain::purchase::PurchaseIntent;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct PurchaseRecord {
    buyer: String,
    item: String,
    amount: Decimal,
    currency: String,
    reference: String,
}

impl TryFrom<PurchaseRecord> for PurchaseIntent {
    type Error = EngineError;

    fn try_from(record: PurchaseRecord) -> Result<Self> {
        if record.item.is_empty() {
            return Err(EngineError::ValidationError(
                "Purchase row without item id".to_string(),
            ));
        }
        Ok(PurchaseIntent::new(
            record.buyer.parse::<BuyerIdentity>()?,
            ContentItemId::new(record.item),
            Amount::new(record.amount)?,
            Currency::new(&record.currency)?,
            record.reference.parse()?,
        ))
    }
}

/// Reads purchase confirmations (`buyer,item,amount,currency,reference`).
///
/// Rows are validated at the boundary: the buyer column becomes a
/// [`BuyerIdentity`] and the reference a typed payment reference.
pub struct PurchaseReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PurchaseReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one result per data row; a bad row does not stop the stream.
    pub fn purchases(self) -> impl Iterator<Item = Result<PurchaseIntent>> {
        self.reader
            .into_deserialize::<PurchaseRecord>()
            .map(|record| PurchaseIntent::try_from(record?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::{AccountId, Email};
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "buyer, item, amount, currency, reference\n\
                    new@example.com, A1, 30, chf, pi_123\n\
                    42, C9, 300.00, CHF, cs_test_9";
        let results: Vec<Result<PurchaseIntent>> =
            PurchaseReader::new(data.as_bytes()).purchases().collect();

        assert_eq!(results.len(), 2);
        let first = results[0].as_ref().unwrap();
        assert_eq!(
            first.buyer(),
            &BuyerIdentity::ExternalEmail(Email::parse("new@example.com").unwrap())
        );
        assert_eq!(first.amount().value(), dec!(30));
        assert_eq!(first.currency().code(), "CHF");

        let second = results[1].as_ref().unwrap();
        assert_eq!(second.buyer(), &BuyerIdentity::InternalAccountId(AccountId(42)));
        assert_eq!(second.reference().as_str(), "cs_test_9");
    }

    #[test]
    fn test_reader_malformed_rows_are_reported_individually() {
        let data = "buyer,item,amount,currency,reference\n\
                    not-an-email,A1,30,CHF,pi_1\n\
                    a@example.com,A1,-5,CHF,pi_2\n\
                    a@example.com,A1,30,CHF,ch_3\n\
                    a@example.com,A1,abc,CHF,pi_4\n\
                    a@example.com,A1,30,CHF,pi_5";
        let results: Vec<Result<PurchaseIntent>> =
            PurchaseReader::new(data.as_bytes()).purchases().collect();

        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(|r| r.is_err()));
        assert!(results[4].is_ok());
    }
}
