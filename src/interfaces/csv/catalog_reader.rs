use crate::domain::content::{
    AccessPolicy, ContentItem, ContentItemId, ContentKind, ContentMeta, Currency, Price,
};
use crate::domain::ledger::ProductId;
use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct CatalogRecord {
    kind: ContentKind,
    id: String,
    title: String,
    policy: AccessPolicy,
    price: Decimal,
    currency: String,
    product: Option<String>,
}

/// A published item and the commerce product it sells as, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub item: ContentItem,
    pub product: Option<ProductId>,
}

impl TryFrom<CatalogRecord> for CatalogEntry {
    type Error = EngineError;

    fn try_from(record: CatalogRecord) -> Result<Self> {
        let meta = ContentMeta::new(
            ContentItemId::new(record.id),
            record.title,
            record.policy,
            Price::new(record.price)?,
            Currency::new(&record.currency)?,
        )?;
        let item = ContentItem::new(record.kind, meta);
        let product = record.product.filter(|p| !p.is_empty()).map(ProductId);
        if item.is_purchasable() && product.is_none() {
            return Err(EngineError::ValidationError(format!(
                "Purchasable item {} has no commerce product",
                item.id()
            )));
        }
        Ok(Self { item, product })
    }
}

/// Reads the content catalog (`kind,id,title,policy,price,currency,product`).
pub struct CatalogReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CatalogReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn entries(self) -> impl Iterator<Item = Result<CatalogEntry>> {
        self.reader
            .into_deserialize::<CatalogRecord>()
            .map(|record| CatalogEntry::try_from(record?))
    }
}
