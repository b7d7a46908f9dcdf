use super::content::{Amount, ContentItemId, Currency};
use super::identity::BuyerIdentity;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const CHECKOUT_SESSION_PREFIX: &str = "cs_";
const PAYMENT_INTENT_PREFIX: &str = "pi_";

/// Processor-issued reference for a payment, used as the idempotency key.
///
/// The prefix decides which processor endpoint confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaymentReference {
    CheckoutSession(String),
    PaymentIntent(String),
}

impl PaymentReference {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentReference::CheckoutSession(id) | PaymentReference::PaymentIntent(id) => id,
        }
    }
}

impl FromStr for PaymentReference {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reference = s.trim();
        let has_body = |prefix: &str| reference.len() > prefix.len();
        if reference.starts_with(CHECKOUT_SESSION_PREFIX) && has_body(CHECKOUT_SESSION_PREFIX) {
            Ok(PaymentReference::CheckoutSession(reference.to_string()))
        } else if reference.starts_with(PAYMENT_INTENT_PREFIX) && has_body(PAYMENT_INTENT_PREFIX) {
            Ok(PaymentReference::PaymentIntent(reference.to_string()))
        } else {
            Err(EngineError::ValidationError(format!(
                "Unrecognized payment reference: {reference}"
            )))
        }
    }
}

impl TryFrom<String> for PaymentReference {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PaymentReference> for String {
    fn from(reference: PaymentReference) -> Self {
        match reference {
            PaymentReference::CheckoutSession(id) | PaymentReference::PaymentIntent(id) => id,
        }
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processor status normalized across endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Succeeded,
    Pending,
    Failed,
}

impl PaymentStatus {
    /// Checkout sessions report `payment_status`: `paid`, `unpaid` or
    /// `no_payment_required`.
    pub fn from_checkout_session(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" => PaymentStatus::Succeeded,
            "unpaid" | "open" => PaymentStatus::Pending,
            _ => PaymentStatus::Failed,
        }
    }

    /// Payment intents report their lifecycle status directly.
    pub fn from_payment_intent(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" => PaymentStatus::Succeeded,
            "processing" | "requires_action" | "requires_confirmation" | "requires_capture" => {
                PaymentStatus::Pending
            }
            _ => PaymentStatus::Failed,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One checkout attempt. Immutable once built with its payment reference.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseIntent {
    buyer: BuyerIdentity,
    item: ContentItemId,
    amount: Amount,
    currency: Currency,
    reference: PaymentReference,
}

impl PurchaseIntent {
    pub fn new(
        buyer: BuyerIdentity,
        item: ContentItemId,
        amount: Amount,
        currency: Currency,
        reference: PaymentReference,
    ) -> Self {
        Self {
            buyer,
            item,
            amount,
            currency,
            reference,
        }
    }

    pub fn buyer(&self) -> &BuyerIdentity {
        &self.buyer
    }

    pub fn item(&self) -> &ContentItemId {
        &self.item
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn reference(&self) -> &PaymentReference {
        &self.reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_prefix_selects_endpoint() {
        assert_eq!(
            "cs_test_abc".parse::<PaymentReference>().unwrap(),
            PaymentReference::CheckoutSession("cs_test_abc".to_string())
        );
        assert_eq!(
            "pi_123".parse::<PaymentReference>().unwrap(),
            PaymentReference::PaymentIntent("pi_123".to_string())
        );
        assert!("ch_123".parse::<PaymentReference>().is_err());
        assert!("pi_".parse::<PaymentReference>().is_err());
    }

    #[test]
    fn test_status_vocabularies_differ() {
        assert_eq!(
            PaymentStatus::from_checkout_session("paid"),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentStatus::from_checkout_session("succeeded"),
            PaymentStatus::Failed
        );
        assert_eq!(
            PaymentStatus::from_payment_intent("succeeded"),
            PaymentStatus::Succeeded
        );
        assert_eq!(
            PaymentStatus::from_payment_intent("paid"),
            PaymentStatus::Failed
        );
        assert_eq!(
            PaymentStatus::from_payment_intent("processing"),
            PaymentStatus::Pending
        );
        assert_eq!(
            PaymentStatus::from_checkout_session("unpaid"),
            PaymentStatus::Pending
        );
    }

    #[test]
    fn test_reference_serializes_as_plain_string() {
        let reference: PaymentReference = "pi_123".parse().unwrap();
        assert_eq!(serde_json::to_string(&reference).unwrap(), "\"pi_123\"");
        let back: PaymentReference = serde_json::from_str("\"cs_1\"").unwrap();
        assert!(matches!(back, PaymentReference::CheckoutSession(_)));
    }
}
