//! Boundaries to the systems the engine coordinates.
//!
//! Remote collaborators return [`RemoteResult`] so callers can decide on
//! retries; local stores return the crate [`Result`].

use super::content::{ContentItem, ContentItemId};
use super::entitlement::{
    ArticlePurchase, Enrollment, EnrollmentId, FallbackGrant, PurchaseId, RevocationMarker,
};
use super::identity::{AccountId, AccountMapping, Email, MappingInsert};
use super::ledger::{LedgerEntry, LedgerStatus, NewOrder, ProductId};
use super::purchase::PaymentReference;
use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Payment processor. Sessions and intents live behind different endpoints
/// and report status in their own vocabulary.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Raw `payment_status` of a checkout session, `None` if unknown.
    async fn checkout_session_status(&self, session_id: &str) -> RemoteResult<Option<String>>;
    /// Raw status of a payment intent, `None` if unknown.
    async fn payment_intent_status(&self, intent_id: &str) -> RemoteResult<Option<String>>;
}

/// Account registry of the learning/content system.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_email(&self, email: &Email) -> RemoteResult<Option<AccountId>>;
    async fn create_account(&self, email: &Email) -> RemoteResult<AccountId>;
    /// Whether `create_account` returns the existing account for a known email.
    fn idempotent_writes(&self) -> bool;
}

/// Commerce system holding the order ledger.
#[async_trait]
pub trait CommerceSystem: Send + Sync {
    async fn find_existing_order(
        &self,
        account: AccountId,
        item: &ContentItemId,
        reference: &PaymentReference,
    ) -> RemoteResult<Option<LedgerEntry>>;
    /// Most recent non-failed order for the pair, regardless of reference.
    async fn find_latest_order(
        &self,
        account: AccountId,
        item: &ContentItemId,
    ) -> RemoteResult<Option<LedgerEntry>>;
    async fn create_order(&self, order: NewOrder) -> RemoteResult<LedgerEntry>;
    async fn set_order_status(
        &self,
        order_id: &str,
        status: LedgerStatus,
    ) -> RemoteResult<LedgerEntry>;
    /// Whether `create_order` deduplicates on (account, item, reference).
    fn idempotent_writes(&self) -> bool;
}

/// Learning system holding course enrollments.
#[async_trait]
pub trait LearningSystem: Send + Sync {
    async fn create_enrollment(
        &self,
        account: AccountId,
        course: &ContentItemId,
    ) -> RemoteResult<EnrollmentId>;
    async fn approve_enrollment(&self, enrollment: &EnrollmentId) -> RemoteResult<bool>;
    async fn find_enrollment(
        &self,
        account: AccountId,
        course: &ContentItemId,
    ) -> RemoteResult<Option<Enrollment>>;
    fn idempotent_writes(&self) -> bool;
}

/// Content system holding article purchases.
#[async_trait]
pub trait ContentSystem: Send + Sync {
    async fn record_article_purchase(
        &self,
        account: AccountId,
        article: &ContentItemId,
        amount: Decimal,
        reference: &PaymentReference,
    ) -> RemoteResult<PurchaseId>;
    async fn find_article_purchase(
        &self,
        account: AccountId,
        article: &ContentItemId,
    ) -> RemoteResult<Option<ArticlePurchase>>;
    fn idempotent_writes(&self) -> bool;
}

/// Published content items.
#[async_trait]
pub trait ContentCatalog: Send + Sync {
    async fn get(&self, id: &ContentItemId) -> Result<Option<ContentItem>>;
}

/// Explicit item-to-product mapping, written when an item is published.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product_for(&self, item: &ContentItemId) -> Result<Option<ProductId>>;
    async fn register(&self, item: ContentItemId, product: ProductId) -> Result<()>;
}

/// Local email-to-account mappings with a uniqueness guarantee on email.
#[async_trait]
pub trait AccountMappingStore: Send + Sync {
    async fn get(&self, email: &Email) -> Result<Option<AccountMapping>>;
    /// Compare-and-create: never overwrites an existing mapping.
    async fn insert_if_absent(&self, mapping: AccountMapping) -> Result<MappingInsert>;
}

/// Durable local log of grants the remote systems could not confirm.
#[async_trait]
pub trait FallbackStore: Send + Sync {
    async fn put(&self, grant: FallbackGrant) -> Result<()>;
    /// The active (not retired) grant for the pair, if any.
    async fn get(&self, account: AccountId, item: &ContentItemId) -> Result<Option<FallbackGrant>>;
    async fn active(&self) -> Result<Vec<FallbackGrant>>;
    /// Marks the active grant retired; history is retained.
    async fn retire(
        &self,
        account: AccountId,
        item: &ContentItemId,
        retired_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Append-only log of refund revocations.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    async fn put(&self, marker: RevocationMarker) -> Result<()>;
    async fn latest(
        &self,
        account: AccountId,
        item: &ContentItemId,
    ) -> Result<Option<RevocationMarker>>;
}

pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
pub type AccountDirectoryRef = Arc<dyn AccountDirectory>;
pub type CommerceSystemRef = Arc<dyn CommerceSystem>;
pub type LearningSystemRef = Arc<dyn LearningSystem>;
pub type ContentSystemRef = Arc<dyn ContentSystem>;
pub type ContentCatalogRef = Arc<dyn ContentCatalog>;
pub type ProductCatalogRef = Arc<dyn ProductCatalog>;
pub type AccountMappingStoreRef = Arc<dyn AccountMappingStore>;
pub type FallbackStoreRef = Arc<dyn FallbackStore>;
pub type RevocationStoreRef = Arc<dyn RevocationStore>;

/// Every collaborator the reconciliation engine needs, wired once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub payments: PaymentProcessorRef,
    pub accounts: AccountDirectoryRef,
    pub commerce: CommerceSystemRef,
    pub learning: LearningSystemRef,
    pub content: ContentSystemRef,
    pub catalog: ContentCatalogRef,
    pub products: ProductCatalogRef,
    pub mappings: AccountMappingStoreRef,
    pub fallback: FallbackStoreRef,
    pub revocations: RevocationStoreRef,
}
