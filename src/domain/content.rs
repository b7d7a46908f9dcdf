use crate::error::EngineError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a purchasable content item (article or course).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentItemId(pub String);

impl ContentItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    Public,
    MembersOnly,
    Premium,
}

/// ISO 4217 currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, EngineError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(code))
        } else {
            Err(EngineError::ValidationError(format!(
                "Invalid currency code: {code}"
            )))
        }
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog price of an item. Zero means free.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value >= Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::ValidationError(
                "Price must not be negative".to_string(),
            ))
        }
    }

    pub fn is_free(&self) -> bool {
        self.0.is_zero()
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

/// A positive amount actually paid by a buyer.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, EngineError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Attributes shared by every kind of content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub id: ContentItemId,
    pub title: String,
    pub policy: AccessPolicy,
    pub price: Price,
    pub currency: Currency,
}

impl ContentMeta {
    /// Builds item metadata, rejecting a priced item that is not `Premium`.
    pub fn new(
        id: ContentItemId,
        title: impl Into<String>,
        policy: AccessPolicy,
        price: Price,
        currency: Currency,
    ) -> Result<Self, EngineError> {
        if !price.is_free() && policy != AccessPolicy::Premium {
            return Err(EngineError::ValidationError(format!(
                "Item {id} has a price but is not premium"
            )));
        }
        Ok(Self {
            id,
            title: title.into(),
            policy,
            price,
            currency,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Article,
    Course,
}

/// A purchasable unit of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContentItem {
    Article(ContentMeta),
    Course(ContentMeta),
}

impl ContentItem {
    pub fn new(kind: ContentKind, meta: ContentMeta) -> Self {
        match kind {
            ContentKind::Article => ContentItem::Article(meta),
            ContentKind::Course => ContentItem::Course(meta),
        }
    }

    pub fn meta(&self) -> &ContentMeta {
        match self {
            ContentItem::Article(meta) | ContentItem::Course(meta) => meta,
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentItem::Article(_) => ContentKind::Article,
            ContentItem::Course(_) => ContentKind::Course,
        }
    }

    pub fn id(&self) -> &ContentItemId {
        &self.meta().id
    }

    pub fn policy(&self) -> AccessPolicy {
        self.meta().policy
    }

    /// Only premium items with a non-zero price go through checkout.
    pub fn is_purchasable(&self) -> bool {
        let meta = self.meta();
        meta.policy == AccessPolicy::Premium && !meta.price.is_free()
    }
}
