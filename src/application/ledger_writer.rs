use super::cache::TtlCache;
use super::retry::RetryPolicy;
use crate::domain::content::{Amount, ContentItem, ContentItemId, Currency};
use crate::domain::identity::AccountId;
use crate::domain::ledger::{LedgerEntry, LedgerStatus, NewOrder, OrderMetadata, ProductId};
use crate::domain::ports::{CommerceSystemRef, ProductCatalogRef};
use crate::domain::purchase::PaymentReference;
use crate::error::{EngineError, Result};
use tracing::{info, warn};

/// Appends the order for a verified payment to the commerce ledger.
pub struct CommerceLedgerWriter {
    commerce: CommerceSystemRef,
    products: ProductCatalogRef,
    product_cache: TtlCache<ContentItemId, ProductId>,
    retry: RetryPolicy,
}

impl CommerceLedgerWriter {
    pub fn new(
        commerce: CommerceSystemRef,
        products: ProductCatalogRef,
        product_cache: TtlCache<ContentItemId, ProductId>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            commerce,
            products,
            product_cache,
            retry,
        }
    }

    /// Creates the order, tags it with the payment reference and item id,
    /// then marks it paid. If only the second step fails the pending entry
    /// is returned; it already stands for the purchase.
    pub async fn record(
        &self,
        account: AccountId,
        item: &ContentItem,
        amount: Amount,
        currency: &Currency,
        reference: &PaymentReference,
    ) -> Result<LedgerEntry> {
        let product = self.product_for(item.id()).await?;
        let order = NewOrder {
            account,
            product,
            amount: amount.value(),
            currency: currency.clone(),
            metadata: OrderMetadata {
                payment_reference: reference.clone(),
                content_item_id: item.id().clone(),
            },
        };

        let entry = self
            .retry
            .run(
                "commerce.create_order",
                self.commerce.idempotent_writes(),
                || self.commerce.create_order(order.clone()),
            )
            .await
            .map_err(|failure| {
                EngineError::LedgerWriteFailed(format!(
                    "order for {reference} could not be created: {failure}"
                ))
            })?;

        if entry.status == LedgerStatus::Completed {
            return Ok(entry);
        }

        // Setting a status is idempotent, so this is always retried.
        match self
            .retry
            .run("commerce.set_order_status", true, || {
                self.commerce
                    .set_order_status(&entry.order_id, LedgerStatus::Completed)
            })
            .await
        {
            Ok(paid) => {
                info!(
                    reference = %reference,
                    account = %account,
                    order = %paid.order_id,
                    "Ledger entry recorded"
                );
                Ok(paid)
            }
            Err(failure) => {
                warn!(
                    reference = %reference,
                    order = %entry.order_id,
                    error = %failure,
                    "Order created but not marked paid"
                );
                Ok(entry)
            }
        }
    }

    async fn product_for(&self, item: &ContentItemId) -> Result<ProductId> {
        if let Some(product) = self.product_cache.get(item).await {
            return Ok(product);
        }
        let product = self
            .products
            .product_for(item)
            .await?
            .ok_or_else(|| {
                EngineError::LedgerWriteFailed(format!("no commerce product mapped for item {item}"))
            })?;
        self.product_cache.insert(item.clone(), product.clone()).await;
        Ok(product)
    }

    pub async fn invalidate_product(&self, item: &ContentItemId) {
        self.product_cache.invalidate(item).await;
    }
}
