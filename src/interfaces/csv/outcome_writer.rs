use crate::application::engine::ReconcileOutcome;
use crate::domain::identity::AccountId;
use crate::domain::purchase::PurchaseIntent;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One output line per replayed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeRow {
    pub reference: String,
    pub buyer: String,
    pub item: String,
    pub account: Option<AccountId>,
    pub granted: bool,
    pub grant_kind: Option<&'static str>,
    pub duplicate: bool,
    pub access: bool,
    pub error: Option<&'static str>,
}

impl OutcomeRow {
    pub fn new(intent: &PurchaseIntent, result: &Result<ReconcileOutcome>, access: bool) -> Self {
        let (account, grant_kind, duplicate, error) = match result {
            Ok(outcome) => (
                Some(outcome.account),
                Some(outcome.grant_kind().as_str()),
                outcome.duplicate,
                None,
            ),
            Err(e) => (None, None, false, Some(e.kind().as_str())),
        };
        Self {
            reference: intent.reference().to_string(),
            buyer: intent.buyer().to_string(),
            item: intent.item().to_string(),
            account,
            granted: result.is_ok(),
            grant_kind,
            duplicate,
            access,
            error,
        }
    }
}

/// Writes reconciliation outcomes as CSV
/// (`reference,buyer,item,account,granted,grant_kind,duplicate,access,error`).
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, row: &OutcomeRow) -> Result<()> {
        self.writer.serialize(row)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::{Amount, ContentItemId, Currency};
    use crate::error::EngineError;
    use rust_decimal_macros::dec;

    #[test]
    fn test_writer_emits_header_and_empty_optionals() {
        let intent = PurchaseIntent::new(
            "new@example.com".parse().unwrap(),
            ContentItemId::new("A1"),
            Amount::new(dec!(30)).unwrap(),
            Currency::new("CHF").unwrap(),
            "pi_1".parse().unwrap(),
        );
        let failed: Result<ReconcileOutcome> = Err(EngineError::PaymentNotVerified {
            reference: "pi_1".to_string(),
            status: "failed".to_string(),
        });

        let mut buffer = Vec::new();
        {
            let mut writer = OutcomeWriter::new(&mut buffer);
            writer.write(&OutcomeRow::new(&intent, &failed, false)).unwrap();
            writer.flush().unwrap();
        }
        let output = String::from_utf8(buffer).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("reference,buyer,item,account,granted,grant_kind,duplicate,access,error")
        );
        assert_eq!(
            lines.next(),
            Some("pi_1,new@example.com,A1,,false,,false,false,payment_not_verified")
        );
    }
}
