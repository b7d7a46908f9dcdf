use crate::domain::content::{ContentItem, ContentItemId};
use crate::domain::entitlement::{
    ArticlePurchase, Enrollment, EnrollmentId, EnrollmentState, FallbackGrant, PurchaseId,
    RevocationMarker,
};
use crate::domain::identity::{AccountId, AccountMapping, Email, MappingInsert};
use crate::domain::ledger::{LedgerEntry, LedgerStatus, NewOrder, ProductId};
use crate::domain::ports::{
    AccountDirectory, AccountMappingStore, Collaborators, CommerceSystem, ContentCatalog,
    ContentSystem, FallbackStore, LearningSystem, PaymentProcessor, ProductCatalog,
    RemoteResult, RevocationStore,
};
use crate::domain::purchase::PaymentReference;
use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Operation name that matches every call of a simulated system.
pub const ALL_OPERATIONS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Fail the next `n` calls, then recover.
    Times(u32),
    Always,
}

/// Scripted outages for the simulated remote systems.
#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: Mutex<HashMap<String, FaultMode>>,
}

impl FaultInjector {
    pub fn fail(&self, operation: &str, mode: FaultMode) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation.to_string(), mode);
    }

    pub fn clear(&self, operation: &str) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operation);
    }

    fn check(&self, operation: &str) -> RemoteResult<()> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        for key in [operation, ALL_OPERATIONS] {
            let exhausted = match faults.get_mut(key) {
                Some(FaultMode::Always) => false,
                Some(FaultMode::Times(remaining)) => {
                    *remaining = remaining.saturating_sub(1);
                    *remaining == 0
                }
                None => continue,
            };
            if exhausted {
                faults.remove(key);
            }
            return Err(RemoteError::Unavailable(format!("{operation}: simulated outage")));
        }
        Ok(())
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Payment processor seeded with raw statuses per session or intent id.
#[derive(Debug, Default)]
pub struct InMemoryPaymentProcessor {
    statuses: RwLock<HashMap<String, String>>,
    calls: AtomicU32,
    faults: FaultInjector,
}

impl InMemoryPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(&self, reference: &str, status: &str) {
        self.statuses
            .write()
            .await
            .insert(reference.to_string(), status.to_string());
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Calls received so far, failed ones included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn status(&self, id: &str) -> RemoteResult<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.faults.check("verify")?;
        Ok(self.statuses.read().await.get(id).cloned())
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    async fn checkout_session_status(&self, session_id: &str) -> RemoteResult<Option<String>> {
        self.status(session_id).await
    }

    async fn payment_intent_status(&self, intent_id: &str) -> RemoteResult<Option<String>> {
        self.status(intent_id).await
    }
}

/// Account registry that hands out sequential ids.
#[derive(Debug)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<HashMap<Email, AccountId>>,
    next_id: AtomicU64,
    created: AtomicUsize,
    faults: FaultInjector,
}

impl Default for InMemoryAccountDirectory {
    fn default() -> Self {
        Self {
            accounts: RwLock::default(),
            next_id: AtomicU64::new(1_000),
            created: AtomicUsize::new(0),
            faults: FaultInjector::default(),
        }
    }
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, email: Email, account: AccountId) {
        self.accounts.write().await.insert(email, account);
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find_by_email(&self, email: &Email) -> RemoteResult<Option<AccountId>> {
        self.faults.check("find_by_email")?;
        Ok(self.accounts.read().await.get(email).copied())
    }

    async fn create_account(&self, email: &Email) -> RemoteResult<AccountId> {
        self.faults.check("create_account")?;
        let mut accounts = self.accounts.write().await;
        if let Some(existing) = accounts.get(email) {
            return Ok(*existing);
        }
        let account = AccountId(self.next_id.fetch_add(1, Ordering::SeqCst));
        accounts.insert(email.clone(), account);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(account)
    }

    fn idempotent_writes(&self) -> bool {
        true
    }
}

/// Order ledger. With `idempotent` set, `create_order` returns the existing
/// order for the same (account, item, reference).
#[derive(Debug)]
pub struct InMemoryCommerceSystem {
    orders: RwLock<Vec<LedgerEntry>>,
    idempotent: bool,
    faults: FaultInjector,
}

impl InMemoryCommerceSystem {
    pub fn new(idempotent: bool) -> Self {
        Self {
            orders: RwLock::default(),
            idempotent,
            faults: FaultInjector::default(),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn orders(&self) -> Vec<LedgerEntry> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl CommerceSystem for InMemoryCommerceSystem {
    async fn find_existing_order(
        &self,
        account: AccountId,
        item: &ContentItemId,
        reference: &PaymentReference,
    ) -> RemoteResult<Option<LedgerEntry>> {
        self.faults.check("find_order")?;
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .rev()
            .find(|o| o.matches(account, item, reference))
            .cloned())
    }

    async fn find_latest_order(
        &self,
        account: AccountId,
        item: &ContentItemId,
    ) -> RemoteResult<Option<LedgerEntry>> {
        self.faults.check("find_order")?;
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .filter(|o| o.account == account && &o.item == item && o.status.is_active())
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn create_order(&self, order: NewOrder) -> RemoteResult<LedgerEntry> {
        self.faults.check("create_order")?;
        let mut orders = self.orders.write().await;
        let metadata = &order.metadata;
        if self.idempotent
            && let Some(existing) = orders.iter().find(|o| {
                o.matches(
                    order.account,
                    &metadata.content_item_id,
                    &metadata.payment_reference,
                )
            })
        {
            return Ok(existing.clone());
        }
        let entry = LedgerEntry {
            order_id: new_id("ord"),
            account: order.account,
            item: order.metadata.content_item_id,
            product: order.product,
            amount: order.amount,
            currency: order.currency,
            payment_reference: order.metadata.payment_reference,
            status: LedgerStatus::Pending,
            created_at: Utc::now(),
        };
        orders.push(entry.clone());
        Ok(entry)
    }

    async fn set_order_status(
        &self,
        order_id: &str,
        status: LedgerStatus,
    ) -> RemoteResult<LedgerEntry> {
        self.faults.check("set_order_status")?;
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| o.order_id == order_id)
            .ok_or_else(|| RemoteError::Rejected(format!("unknown order {order_id}")))?;
        order.status = status;
        Ok(order.clone())
    }

    fn idempotent_writes(&self) -> bool {
        self.idempotent
    }
}

/// Course enrollments. Created enrollments wait for approval.
#[derive(Debug)]
pub struct InMemoryLearningSystem {
    enrollments: RwLock<Vec<Enrollment>>,
    idempotent: bool,
    faults: FaultInjector,
}

impl InMemoryLearningSystem {
    pub fn new(idempotent: bool) -> Self {
        Self {
            enrollments: RwLock::default(),
            idempotent,
            faults: FaultInjector::default(),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn enrollment_count(&self) -> usize {
        self.enrollments.read().await.len()
    }
}

#[async_trait]
impl LearningSystem for InMemoryLearningSystem {
    async fn create_enrollment(
        &self,
        account: AccountId,
        course: &ContentItemId,
    ) -> RemoteResult<EnrollmentId> {
        self.faults.check("create_enrollment")?;
        let mut enrollments = self.enrollments.write().await;
        if self.idempotent
            && let Some(existing) = enrollments
                .iter()
                .find(|e| e.account == account && &e.course == course)
        {
            return Ok(existing.id.clone());
        }
        let id = EnrollmentId(new_id("enr"));
        enrollments.push(Enrollment {
            id: id.clone(),
            account,
            course: course.clone(),
            state: EnrollmentState::Requested.advance(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn approve_enrollment(&self, enrollment: &EnrollmentId) -> RemoteResult<bool> {
        self.faults.check("approve_enrollment")?;
        let mut enrollments = self.enrollments.write().await;
        match enrollments.iter_mut().find(|e| &e.id == enrollment) {
            Some(found) => {
                found.state = EnrollmentState::Approved;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_enrollment(
        &self,
        account: AccountId,
        course: &ContentItemId,
    ) -> RemoteResult<Option<Enrollment>> {
        self.faults.check("find_enrollment")?;
        let enrollments = self.enrollments.read().await;
        Ok(enrollments
            .iter()
            .rev()
            .find(|e| e.account == account && &e.course == course)
            .cloned())
    }

    fn idempotent_writes(&self) -> bool {
        self.idempotent
    }
}

/// Article purchases. With `idempotent` set, recording the same
/// (account, article, reference) twice returns the first purchase.
#[derive(Debug)]
pub struct InMemoryContentSystem {
    purchases: RwLock<Vec<ArticlePurchase>>,
    idempotent: bool,
    faults: FaultInjector,
}

impl InMemoryContentSystem {
    pub fn new(idempotent: bool) -> Self {
        Self {
            purchases: RwLock::default(),
            idempotent,
            faults: FaultInjector::default(),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub async fn purchase_count(&self) -> usize {
        self.purchases.read().await.len()
    }
}

#[async_trait]
impl ContentSystem for InMemoryContentSystem {
    async fn record_article_purchase(
        &self,
        account: AccountId,
        article: &ContentItemId,
        amount: Decimal,
        reference: &PaymentReference,
    ) -> RemoteResult<PurchaseId> {
        self.faults.check("record_article_purchase")?;
        let mut purchases = self.purchases.write().await;
        if self.idempotent
            && let Some(existing) = purchases.iter().find(|p| {
                p.account == account && &p.article == article && &p.payment_reference == reference
            })
        {
            return Ok(existing.id.clone());
        }
        let id = PurchaseId(new_id("pur"));
        purchases.push(ArticlePurchase {
            id: id.clone(),
            account,
            article: article.clone(),
            amount,
            payment_reference: reference.clone(),
            purchased_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_article_purchase(
        &self,
        account: AccountId,
        article: &ContentItemId,
    ) -> RemoteResult<Option<ArticlePurchase>> {
        self.faults.check("find_article_purchase")?;
        let purchases = self.purchases.read().await;
        Ok(purchases
            .iter()
            .rev()
            .find(|p| p.account == account && &p.article == article)
            .cloned())
    }

    fn idempotent_writes(&self) -> bool {
        self.idempotent
    }
}

#[derive(Debug, Default)]
pub struct InMemoryContentCatalog {
    items: RwLock<HashMap<ContentItemId, ContentItem>>,
}

impl InMemoryContentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, item: ContentItem) {
        self.items.write().await.insert(item.id().clone(), item);
    }
}

#[async_trait]
impl ContentCatalog for InMemoryContentCatalog {
    async fn get(&self, id: &ContentItemId) -> Result<Option<ContentItem>> {
        Ok(self.items.read().await.get(id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProductCatalog {
    products: RwLock<HashMap<ContentItemId, ProductId>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn product_for(&self, item: &ContentItemId) -> Result<Option<ProductId>> {
        Ok(self.products.read().await.get(item).cloned())
    }

    async fn register(&self, item: ContentItemId, product: ProductId) -> Result<()> {
        self.products.write().await.insert(item, product);
        Ok(())
    }
}

/// Email-to-account mappings; the write lock makes insert-if-absent atomic.
#[derive(Debug, Default)]
pub struct InMemoryAccountMappingStore {
    mappings: RwLock<HashMap<Email, AccountMapping>>,
}

impl InMemoryAccountMappingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountMappingStore for InMemoryAccountMappingStore {
    async fn get(&self, email: &Email) -> Result<Option<AccountMapping>> {
        Ok(self.mappings.read().await.get(email).cloned())
    }

    async fn insert_if_absent(&self, mapping: AccountMapping) -> Result<MappingInsert> {
        let mut mappings = self.mappings.write().await;
        match mappings.entry(mapping.email.clone()) {
            Entry::Occupied(existing) => Ok(MappingInsert::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(mapping.clone());
                Ok(MappingInsert::Inserted(mapping))
            }
        }
    }
}

/// Fallback grants with full history; retiring only stamps `retired_at`.
#[derive(Debug, Default)]
pub struct InMemoryFallbackStore {
    grants: RwLock<Vec<FallbackGrant>>,
}

impl InMemoryFallbackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history(&self) -> Vec<FallbackGrant> {
        self.grants.read().await.clone()
    }
}

#[async_trait]
impl FallbackStore for InMemoryFallbackStore {
    async fn put(&self, grant: FallbackGrant) -> Result<()> {
        let mut grants = self.grants.write().await;
        // One active grant per pair; the first one keeps its timestamp.
        if !grants
            .iter()
            .any(|g| g.is_active() && g.account == grant.account && g.item == grant.item)
        {
            grants.push(grant);
        }
        Ok(())
    }

    async fn get(&self, account: AccountId, item: &ContentItemId) -> Result<Option<FallbackGrant>> {
        let grants = self.grants.read().await;
        Ok(grants
            .iter()
            .find(|g| g.is_active() && g.account == account && &g.item == item)
            .cloned())
    }

    async fn active(&self) -> Result<Vec<FallbackGrant>> {
        let grants = self.grants.read().await;
        Ok(grants.iter().filter(|g| g.is_active()).cloned().collect())
    }

    async fn retire(
        &self,
        account: AccountId,
        item: &ContentItemId,
        retired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut grants = self.grants.write().await;
        match grants
            .iter_mut()
            .find(|g| g.is_active() && g.account == account && &g.item == item)
        {
            Some(grant) => {
                grant.retired_at = Some(retired_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRevocationStore {
    markers: RwLock<Vec<RevocationMarker>>,
}

impl InMemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationStore for InMemoryRevocationStore {
    async fn put(&self, marker: RevocationMarker) -> Result<()> {
        self.markers.write().await.push(marker);
        Ok(())
    }

    async fn latest(
        &self,
        account: AccountId,
        item: &ContentItemId,
    ) -> Result<Option<RevocationMarker>> {
        let markers = self.markers.read().await;
        Ok(markers
            .iter()
            .filter(|m| m.account == account && &m.item == item)
            .max_by_key(|m| m.revoked_at)
            .cloned())
    }
}

/// A complete set of simulated collaborators with handles kept for seeding
/// and fault injection.
#[derive(Clone)]
pub struct InMemorySystems {
    pub payments: Arc<InMemoryPaymentProcessor>,
    pub accounts: Arc<InMemoryAccountDirectory>,
    pub commerce: Arc<InMemoryCommerceSystem>,
    pub learning: Arc<InMemoryLearningSystem>,
    pub content: Arc<InMemoryContentSystem>,
    pub catalog: Arc<InMemoryContentCatalog>,
    pub products: Arc<InMemoryProductCatalog>,
    pub mappings: Arc<InMemoryAccountMappingStore>,
    pub fallback: Arc<InMemoryFallbackStore>,
    pub revocations: Arc<InMemoryRevocationStore>,
}

impl Default for InMemorySystems {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySystems {
    pub fn new() -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentProcessor::new()),
            accounts: Arc::new(InMemoryAccountDirectory::new()),
            commerce: Arc::new(InMemoryCommerceSystem::new(true)),
            learning: Arc::new(InMemoryLearningSystem::new(true)),
            content: Arc::new(InMemoryContentSystem::new(true)),
            catalog: Arc::new(InMemoryContentCatalog::new()),
            products: Arc::new(InMemoryProductCatalog::new()),
            mappings: Arc::new(InMemoryAccountMappingStore::new()),
            fallback: Arc::new(InMemoryFallbackStore::new()),
            revocations: Arc::new(InMemoryRevocationStore::new()),
        }
    }

    /// Publishes an item and, for purchasable items, its commerce product.
    pub async fn publish(&self, item: ContentItem, product: Option<&str>) -> Result<()> {
        if let Some(product) = product {
            self.products
                .register(item.id().clone(), ProductId(product.to_string()))
                .await?;
        }
        self.catalog.publish(item).await;
        Ok(())
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            payments: self.payments.clone(),
            accounts: self.accounts.clone(),
            commerce: self.commerce.clone(),
            learning: self.learning.clone(),
            content: self.content.clone(),
            catalog: self.catalog.clone(),
            products: self.products.clone(),
            mappings: self.mappings.clone(),
            fallback: self.fallback.clone(),
            revocations: self.revocations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::Currency;
    use crate::domain::entitlement::FallbackReason;
    use crate::domain::ledger::OrderMetadata;
    use rust_decimal_macros::dec;

    fn order(account: u64, reference: &str) -> NewOrder {
        NewOrder {
            account: AccountId(account),
            product: ProductId("prod_a1".to_string()),
            amount: dec!(30),
            currency: Currency::new("CHF").unwrap(),
            metadata: OrderMetadata {
                payment_reference: reference.parse().unwrap(),
                content_item_id: ContentItemId::new("A1"),
            },
        }
    }

    fn fallback(account: u64) -> FallbackGrant {
        FallbackGrant {
            account: AccountId(account),
            item: ContentItemId::new("C9"),
            granted_at: Utc::now(),
            amount: dec!(300),
            currency: Currency::new("CHF").unwrap(),
            payment_reference: "pi_9".parse().unwrap(),
            reason: FallbackReason::RemoteCreateFailed,
            retired_at: None,
        }
    }

    #[test]
    fn test_fault_times_recovers() {
        let faults = FaultInjector::default();
        faults.fail("op", FaultMode::Times(2));
        assert!(faults.check("op").is_err());
        assert!(faults.check("op").is_err());
        assert!(faults.check("op").is_ok());
        assert!(faults.check("other").is_ok());
    }

    #[test]
    fn test_wildcard_fault_hits_every_operation() {
        let faults = FaultInjector::default();
        faults.fail(ALL_OPERATIONS, FaultMode::Always);
        assert!(faults.check("create_order").is_err());
        assert!(faults.check("find_order").is_err());
        faults.clear(ALL_OPERATIONS);
        assert!(faults.check("create_order").is_ok());
    }

    #[tokio::test]
    async fn test_idempotent_commerce_dedups_orders() {
        let commerce = InMemoryCommerceSystem::new(true);
        let first = commerce.create_order(order(1, "pi_1")).await.unwrap();
        let second = commerce.create_order(order(1, "pi_1")).await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        assert_eq!(first.status, LedgerStatus::Pending);
        assert_eq!(commerce.order_count().await, 1);

        let plain = InMemoryCommerceSystem::new(false);
        plain.create_order(order(1, "pi_1")).await.unwrap();
        plain.create_order(order(1, "pi_1")).await.unwrap();
        assert_eq!(plain.order_count().await, 2);
    }

    #[tokio::test]
    async fn test_latest_order_skips_failed() {
        let commerce = InMemoryCommerceSystem::new(false);
        let ok = commerce.create_order(order(1, "pi_1")).await.unwrap();
        let failed = commerce.create_order(order(1, "pi_2")).await.unwrap();
        commerce
            .set_order_status(&failed.order_id, LedgerStatus::Failed)
            .await
            .unwrap();

        let latest = commerce
            .find_latest_order(AccountId(1), &ContentItemId::new("A1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.order_id, ok.order_id);
    }

    #[tokio::test]
    async fn test_unknown_order_status_update_is_rejected() {
        let commerce = InMemoryCommerceSystem::new(true);
        let result = commerce
            .set_order_status("ord_missing", LedgerStatus::Completed)
            .await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_mapping_insert_keeps_first_writer() {
        let store = InMemoryAccountMappingStore::new();
        let email = Email::parse("a@example.com").unwrap();
        let first = store
            .insert_if_absent(AccountMapping::new(email.clone(), AccountId(1)))
            .await
            .unwrap();
        let second = store
            .insert_if_absent(AccountMapping::new(email.clone(), AccountId(2)))
            .await
            .unwrap();

        assert!(matches!(first, MappingInsert::Inserted(_)));
        assert_eq!(second, MappingInsert::Existing(first.mapping().clone()));
        assert_eq!(store.get(&email).await.unwrap().unwrap().account, AccountId(1));
    }

    #[tokio::test]
    async fn test_fallback_retire_keeps_history() {
        let store = InMemoryFallbackStore::new();
        store.put(fallback(42)).await.unwrap();
        store.put(fallback(42)).await.unwrap();
        assert_eq!(store.active().await.unwrap().len(), 1);

        assert!(
            store
                .retire(AccountId(42), &ContentItemId::new("C9"), Utc::now())
                .await
                .unwrap()
        );
        assert!(
            !store
                .retire(AccountId(42), &ContentItemId::new("C9"), Utc::now())
                .await
                .unwrap()
        );
        assert!(
            store
                .get(AccountId(42), &ContentItemId::new("C9"))
                .await
                .unwrap()
                .is_none()
        );
        let history = store.history().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].retired_at.is_some());
    }

    #[tokio::test]
    async fn test_latest_revocation_wins() {
        let store = InMemoryRevocationStore::new();
        let now = Utc::now();
        for offset in [0, 10, 5] {
            store
                .put(RevocationMarker {
                    account: AccountId(1),
                    item: ContentItemId::new("A1"),
                    payment_reference: "pi_1".parse().unwrap(),
                    revoked_at: now + chrono::Duration::seconds(offset),
                })
                .await
                .unwrap();
        }
        let latest = store
            .latest(AccountId(1), &ContentItemId::new("A1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.revoked_at, now + chrono::Duration::seconds(10));
        assert!(
            store
                .latest(AccountId(2), &ContentItemId::new("A1"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
