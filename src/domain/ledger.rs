use super::content::{ContentItemId, Currency};
use super::identity::AccountId;
use super::purchase::PaymentReference;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commerce-system product that a content item is sold as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl LedgerStatus {
    /// Counts towards the duplicate-prevention invariant.
    pub fn is_active(&self) -> bool {
        !matches!(self, LedgerStatus::Failed)
    }

    /// The engine only writes orders for verified payments, so an order still
    /// waiting to be marked paid already stands for a completed purchase.
    pub fn is_access_bearing(&self) -> bool {
        matches!(self, LedgerStatus::Pending | LedgerStatus::Completed)
    }
}

/// Metadata attached to every order so audits and the duplicate check can
/// find it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMetadata {
    pub payment_reference: PaymentReference,
    pub content_item_id: ContentItemId,
}

/// Order creation request sent to the commerce system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub account: AccountId,
    pub product: ProductId,
    pub amount: Decimal,
    pub currency: Currency,
    pub metadata: OrderMetadata,
}

/// An append-only commerce record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub order_id: String,
    pub account: AccountId,
    pub item: ContentItemId,
    pub product: ProductId,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_reference: PaymentReference,
    pub status: LedgerStatus,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether this entry occupies the (account, item, reference) slot.
    pub fn matches(
        &self,
        account: AccountId,
        item: &ContentItemId,
        reference: &PaymentReference,
    ) -> bool {
        self.account == account
            && &self.item == item
            && &self.payment_reference == reference
            && self.status.is_active()
    }
}
