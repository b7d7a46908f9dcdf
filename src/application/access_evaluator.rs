use super::retry::RetryPolicy;
use crate::domain::content::{AccessPolicy, ContentItem};
use crate::domain::entitlement::{EnrollmentState, EntitlementGrant, GrantStatus};
use crate::domain::identity::AccountId;
use crate::domain::ports::{
    CommerceSystemRef, ContentSystemRef, FallbackStoreRef, LearningSystemRef, RevocationStoreRef,
};
use chrono::{DateTime, Utc};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSource {
    Public,
    Membership,
    Grant,
    Ledger,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Anonymous,
    NoEntitlement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed(AccessSource),
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed(_))
    }
}

/// Answers whether an account may see a content item.
///
/// Read-only, one attempt per lookup. A failing lookup is logged and treated
/// as "no record" so a page render never blocks on a remote outage.
pub struct AccessEvaluator {
    learning: LearningSystemRef,
    content: ContentSystemRef,
    commerce: CommerceSystemRef,
    fallback: FallbackStoreRef,
    revocations: RevocationStoreRef,
    retry: RetryPolicy,
    unlock_on_fallback: bool,
}

impl AccessEvaluator {
    pub fn new(
        learning: LearningSystemRef,
        content: ContentSystemRef,
        commerce: CommerceSystemRef,
        fallback: FallbackStoreRef,
        revocations: RevocationStoreRef,
        retry: &RetryPolicy,
        unlock_on_fallback: bool,
    ) -> Self {
        Self {
            learning,
            content,
            commerce,
            fallback,
            revocations,
            retry: retry.single_attempt(),
            unlock_on_fallback,
        }
    }

    pub async fn can_access(&self, account: Option<AccountId>, item: &ContentItem) -> bool {
        self.evaluate(account, item).await.is_allowed()
    }

    pub async fn evaluate(&self, account: Option<AccountId>, item: &ContentItem) -> AccessDecision {
        match (item.policy(), account) {
            (AccessPolicy::Public, _) => AccessDecision::Allowed(AccessSource::Public),
            (_, None) => AccessDecision::Denied(DenyReason::Anonymous),
            (AccessPolicy::MembersOnly, Some(_)) => {
                AccessDecision::Allowed(AccessSource::Membership)
            }
            (AccessPolicy::Premium, Some(account)) => self.evaluate_premium(account, item).await,
        }
    }

    async fn evaluate_premium(&self, account: AccountId, item: &ContentItem) -> AccessDecision {
        let id = item.id();
        let revoked_at = match self.revocations.latest(account, id).await {
            Ok(marker) => marker.map(|m| m.revoked_at),
            Err(e) => {
                warn!(account = %account, item = %id, error = %e, "Revocation lookup failed");
                None
            }
        };
        let counts = |at: DateTime<Utc>| revoked_at.is_none_or(|revoked| at > revoked);

        match self.fallback.get(account, id).await {
            Ok(Some(grant)) if counts(grant.granted_at) => {
                if !grant.reason.awaits_remote() {
                    return AccessDecision::Allowed(AccessSource::Grant);
                }
                if self.unlock_on_fallback {
                    return AccessDecision::Allowed(AccessSource::Fallback);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(account = %account, item = %id, error = %e, "Fallback lookup failed"),
        }

        if let Some(grant) = self.remote_grant(account, item).await
            && grant.status == GrantStatus::Fulfilled
            && counts(grant.granted_at)
        {
            return AccessDecision::Allowed(AccessSource::Grant);
        }

        match self
            .retry
            .run("commerce.find_latest_order", true, || {
                self.commerce.find_latest_order(account, id)
            })
            .await
        {
            Ok(Some(entry)) if entry.status.is_access_bearing() && counts(entry.created_at) => {
                return AccessDecision::Allowed(AccessSource::Ledger);
            }
            Ok(_) => {}
            Err(failure) => {
                warn!(account = %account, item = %id, error = %failure, "Ledger lookup failed")
            }
        }

        AccessDecision::Denied(DenyReason::NoEntitlement)
    }

    async fn remote_grant(&self, account: AccountId, item: &ContentItem) -> Option<EntitlementGrant> {
        let lookup = match item {
            ContentItem::Course(meta) => self
                .retry
                .run("learning.find_enrollment", true, || {
                    self.learning.find_enrollment(account, &meta.id)
                })
                .await
                .map(|enrollment| {
                    enrollment
                        .filter(|e| e.state == EnrollmentState::Approved)
                        .map(|e| EntitlementGrant::from(&e))
                }),
            ContentItem::Article(meta) => self
                .retry
                .run("content.find_article_purchase", true, || {
                    self.content.find_article_purchase(account, &meta.id)
                })
                .await
                .map(|purchase| purchase.map(|p| EntitlementGrant::from(&p))),
        };
        lookup.unwrap_or_else(|failure| {
            warn!(account = %account, item = %item.id(), error = %failure, "Grant lookup failed");
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::{ContentItemId, ContentKind, ContentMeta, Currency, Price};
    use crate::domain::entitlement::{FallbackGrant, FallbackReason, RevocationMarker};
    use crate::domain::ports::{ContentSystem, FallbackStore, LearningSystem, RevocationStore};
    use crate::infrastructure::in_memory::{
        FaultMode, InMemoryCommerceSystem, InMemoryContentSystem, InMemoryFallbackStore,
        InMemoryLearningSystem, InMemoryRevocationStore,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        learning: Arc<InMemoryLearningSystem>,
        content: Arc<InMemoryContentSystem>,
        fallback: Arc<InMemoryFallbackStore>,
        revocations: Arc<InMemoryRevocationStore>,
        evaluator: AccessEvaluator,
    }

    fn fixture(unlock_on_fallback: bool) -> Fixture {
        let learning = Arc::new(InMemoryLearningSystem::new(true));
        let content = Arc::new(InMemoryContentSystem::new(true));
        let fallback = Arc::new(InMemoryFallbackStore::new());
        let revocations = Arc::new(InMemoryRevocationStore::new());
        let evaluator = AccessEvaluator::new(
            learning.clone(),
            content.clone(),
            Arc::new(InMemoryCommerceSystem::new(true)),
            fallback.clone(),
            revocations.clone(),
            &RetryPolicy {
                call_timeout: Duration::from_millis(200),
                ..RetryPolicy::default()
            },
            unlock_on_fallback,
        );
        Fixture {
            learning,
            content,
            fallback,
            revocations,
            evaluator,
        }
    }

    fn item(kind: ContentKind, id: &str, policy: AccessPolicy, price: Decimal) -> ContentItem {
        ContentItem::new(
            kind,
            ContentMeta::new(
                ContentItemId::new(id),
                id,
                policy,
                Price::new(price).unwrap(),
                Currency::new("CHF").unwrap(),
            )
            .unwrap(),
        )
    }

    fn fallback_for(account: AccountId, item: &str) -> FallbackGrant {
        FallbackGrant {
            account,
            item: ContentItemId::new(item),
            granted_at: Utc::now(),
            amount: dec!(30),
            currency: Currency::new("CHF").unwrap(),
            payment_reference: "pi_1".parse().unwrap(),
            reason: FallbackReason::RemoteCreateFailed,
            retired_at: None,
        }
    }

    #[tokio::test]
    async fn test_public_is_always_allowed() {
        let f = fixture(true);
        let public = item(ContentKind::Article, "P1", AccessPolicy::Public, Decimal::ZERO);
        assert!(f.evaluator.can_access(None, &public).await);
        assert!(f.evaluator.can_access(Some(AccountId(1)), &public).await);
    }

    #[tokio::test]
    async fn test_members_only_needs_any_account() {
        let f = fixture(true);
        let members = item(ContentKind::Article, "M1", AccessPolicy::MembersOnly, Decimal::ZERO);
        assert!(!f.evaluator.can_access(None, &members).await);
        assert!(f.evaluator.can_access(Some(AccountId(1)), &members).await);
    }

    #[tokio::test]
    async fn test_premium_without_grant_is_denied() {
        let f = fixture(true);
        let premium = item(ContentKind::Article, "A1", AccessPolicy::Premium, dec!(30));
        assert_eq!(
            f.evaluator.evaluate(Some(AccountId(1)), &premium).await,
            AccessDecision::Denied(DenyReason::NoEntitlement)
        );
        assert_eq!(
            f.evaluator.evaluate(None, &premium).await,
            AccessDecision::Denied(DenyReason::Anonymous)
        );
    }

    #[tokio::test]
    async fn test_premium_with_article_purchase_is_allowed() {
        let f = fixture(true);
        let premium = item(ContentKind::Article, "A1", AccessPolicy::Premium, dec!(30));
        f.content
            .record_article_purchase(AccountId(1), premium.id(), dec!(30), &"pi_1".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(
            f.evaluator.evaluate(Some(AccountId(1)), &premium).await,
            AccessDecision::Allowed(AccessSource::Grant)
        );
        assert!(!f.evaluator.can_access(Some(AccountId(2)), &premium).await);
    }

    #[tokio::test]
    async fn test_unapproved_enrollment_alone_is_not_enough() {
        let f = fixture(true);
        let course = item(ContentKind::Course, "C9", AccessPolicy::Premium, dec!(300));
        f.learning
            .create_enrollment(AccountId(42), course.id())
            .await
            .unwrap();

        assert!(!f.evaluator.can_access(Some(AccountId(42)), &course).await);
    }

    #[tokio::test]
    async fn test_fallback_grant_unlocks_when_enabled() {
        let f = fixture(true);
        let premium = item(ContentKind::Course, "C9", AccessPolicy::Premium, dec!(300));
        f.fallback.put(fallback_for(AccountId(42), "C9")).await.unwrap();

        assert_eq!(
            f.evaluator.evaluate(Some(AccountId(42)), &premium).await,
            AccessDecision::Allowed(AccessSource::Fallback)
        );
    }

    #[tokio::test]
    async fn test_fallback_grant_ignored_when_disabled() {
        let f = fixture(false);
        let premium = item(ContentKind::Course, "C9", AccessPolicy::Premium, dec!(300));
        f.fallback.put(fallback_for(AccountId(42), "C9")).await.unwrap();

        assert!(!f.evaluator.can_access(Some(AccountId(42)), &premium).await);
    }

    #[tokio::test]
    async fn test_reinstatement_counts_even_when_fallback_unlock_is_off() {
        let f = fixture(false);
        let premium = item(ContentKind::Course, "C9", AccessPolicy::Premium, dec!(300));
        f.fallback
            .put(FallbackGrant {
                reason: FallbackReason::Reinstated,
                ..fallback_for(AccountId(42), "C9")
            })
            .await
            .unwrap();

        assert_eq!(
            f.evaluator.evaluate(Some(AccountId(42)), &premium).await,
            AccessDecision::Allowed(AccessSource::Grant)
        );
    }

    #[tokio::test]
    async fn test_revocation_hides_older_grants() {
        let f = fixture(true);
        let premium = item(ContentKind::Article, "A1", AccessPolicy::Premium, dec!(30));
        f.content
            .record_article_purchase(AccountId(1), premium.id(), dec!(30), &"pi_1".parse().unwrap())
            .await
            .unwrap();
        f.revocations
            .put(RevocationMarker {
                account: AccountId(1),
                item: premium.id().clone(),
                payment_reference: "pi_1".parse().unwrap(),
                revoked_at: Utc::now() + chrono::Duration::seconds(1),
            })
            .await
            .unwrap();

        assert!(!f.evaluator.can_access(Some(AccountId(1)), &premium).await);
    }

    #[tokio::test]
    async fn test_lookup_outage_denies_instead_of_failing() {
        let f = fixture(true);
        f.content.faults().fail("find_article_purchase", FaultMode::Always);
        let premium = item(ContentKind::Article, "A1", AccessPolicy::Premium, dec!(30));

        assert!(!f.evaluator.can_access(Some(AccountId(1)), &premium).await);
    }
}
