#![allow(dead_code)]

use purchase_reconciler::application::engine::ReconciliationEngine;
use purchase_reconciler::config::EngineConfig;
use purchase_reconciler::domain::content::{
    AccessPolicy, Amount, ContentItem, ContentItemId, ContentKind, ContentMeta, Currency, Price,
};
use purchase_reconciler::domain::identity::BuyerIdentity;
use purchase_reconciler::domain::purchase::PurchaseIntent;
use purchase_reconciler::infrastructure::in_memory::InMemorySystems;
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 4;
    config.call_timeout_ms = 500;
    config
}

pub fn item(kind: ContentKind, id: &str, policy: AccessPolicy, price: Decimal) -> ContentItem {
    ContentItem::new(
        kind,
        ContentMeta::new(
            ContentItemId::new(id),
            format!("Item {id}"),
            policy,
            Price::new(price).unwrap(),
            Currency::new("CHF").unwrap(),
        )
        .unwrap(),
    )
}

/// Catalog used across scenarios: a premium article and course, a members
/// article and a public one.
pub async fn seeded_systems() -> InMemorySystems {
    let systems = InMemorySystems::new();
    let items = [
        (ContentKind::Article, "A1", AccessPolicy::Premium, Decimal::from(30), Some("prod_a1")),
        (ContentKind::Course, "C9", AccessPolicy::Premium, Decimal::from(300), Some("prod_c9")),
        (ContentKind::Article, "M1", AccessPolicy::MembersOnly, Decimal::ZERO, None),
        (ContentKind::Article, "F1", AccessPolicy::Public, Decimal::ZERO, None),
    ];
    for (kind, id, policy, price, product) in items {
        systems
            .publish(item(kind, id, policy, price), product)
            .await
            .unwrap();
    }
    systems
}

pub fn engine(systems: &InMemorySystems) -> Arc<ReconciliationEngine> {
    Arc::new(ReconciliationEngine::new(
        systems.collaborators(),
        &fast_config(),
    ))
}

pub fn intent(buyer: &str, item: &str, amount: i64, reference: &str) -> PurchaseIntent {
    PurchaseIntent::new(
        buyer.parse::<BuyerIdentity>().unwrap(),
        ContentItemId::new(item),
        Amount::new(Decimal::from(amount)).unwrap(),
        Currency::new("CHF").unwrap(),
        reference.parse().unwrap(),
    )
}
