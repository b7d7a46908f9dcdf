use super::retry::RetryPolicy;
use crate::domain::content::{ContentItem, ContentItemId, Currency};
use crate::domain::entitlement::{
    EnrollmentId, EnrollmentState, EntitlementGrant, FallbackGrant, FallbackReason, GrantKind,
    GrantStatus,
};
use crate::domain::identity::AccountId;
use crate::domain::ports::{
    ContentSystemRef, FallbackStoreRef, LearningSystemRef, RevocationStoreRef,
};
use crate::domain::purchase::PaymentReference;
use crate::error::{EngineError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

/// The purchase facts a grant needs. Articles record amount and reference
/// with the purchase; fallback grants keep them for replay.
#[derive(Debug, Clone, Copy)]
pub struct GrantRequest<'a> {
    pub account: AccountId,
    pub item: &'a ContentItem,
    pub amount: Decimal,
    pub currency: &'a Currency,
    pub reference: &'a PaymentReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrantOutcome {
    pub grant: EntitlementGrant,
    /// Set when the remote create call failed and the grant went to the
    /// fallback store.
    pub remote_failure: Option<String>,
}

impl GrantOutcome {
    pub fn kind(&self) -> GrantKind {
        self.grant.kind()
    }
}

/// Result of trying the remote system alone.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteGrant {
    Fulfilled(EntitlementGrant),
    /// Enrollment exists but approval did not go through.
    AwaitingApproval(EntitlementGrant),
    Failed(String),
}

/// Creates the access grant in the learning/content system.
///
/// Courses: `Requested -> Created -> Approved`, two remote calls.
/// Articles: `Requested -> Created`, one call.
/// An existing remote grant is reused, so re-running the pipeline never
/// creates a second one. A reused grant older than the latest refund of the
/// pair is backed by a local reinstatement so it counts for access again.
pub struct EntitlementGrantor {
    learning: LearningSystemRef,
    content: ContentSystemRef,
    fallback: FallbackStoreRef,
    revocations: RevocationStoreRef,
    retry: RetryPolicy,
}

impl EntitlementGrantor {
    pub fn new(
        learning: LearningSystemRef,
        content: ContentSystemRef,
        fallback: FallbackStoreRef,
        revocations: RevocationStoreRef,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            learning,
            content,
            fallback,
            revocations,
            retry,
        }
    }

    /// Grants access, falling back to the local store when the remote create
    /// fails. `Err` only when even the fallback store cannot record the grant.
    pub async fn grant(&self, request: GrantRequest<'_>) -> Result<GrantOutcome> {
        match self.try_remote(&request).await {
            RemoteGrant::Fulfilled(grant) => Ok(GrantOutcome {
                grant: self.settle(&request, grant).await?,
                remote_failure: None,
            }),
            RemoteGrant::AwaitingApproval(grant) => {
                // Keep access observable until a drain approves the enrollment.
                let bridge = fallback_grant(&request, FallbackReason::ApprovalPending);
                if let Err(e) = self.fallback.put(bridge).await {
                    warn!(
                        account = %request.account,
                        item = %request.item.id(),
                        error = %e,
                        "Could not record approval bridge"
                    );
                }
                Ok(GrantOutcome {
                    grant,
                    remote_failure: None,
                })
            }
            RemoteGrant::Failed(reason) => {
                warn!(
                    account = %request.account,
                    item = %request.item.id(),
                    reference = %request.reference,
                    reason = %reason,
                    "Remote grant failed; recording fallback grant"
                );
                let fallback = fallback_grant(&request, FallbackReason::RemoteCreateFailed);
                let grant = fallback.to_grant();
                self.fallback.put(fallback).await.map_err(|e| {
                    error!(
                        account = %request.account,
                        item = %request.item.id(),
                        error = %e,
                        "Fallback store write failed; buyer has no grant"
                    );
                    EngineError::EntitlementGrantFailed(format!("{reason}; fallback store: {e}"))
                })?;
                Ok(GrantOutcome {
                    grant,
                    remote_failure: Some(reason),
                })
            }
        }
    }

    /// Finishes a fulfilled remote grant: retires the pair's fallback entry, or,
    /// when the remote record predates the latest revocation, replaces it with
    /// a reinstatement stamped now.
    pub async fn settle(
        &self,
        request: &GrantRequest<'_>,
        grant: EntitlementGrant,
    ) -> Result<EntitlementGrant> {
        let account = request.account;
        let item = request.item.id();
        let revoked_at = match self.revocations.latest(account, item).await {
            Ok(marker) => marker.map(|m| m.revoked_at),
            Err(e) => {
                warn!(account = %account, item = %item, error = %e, "Revocation lookup failed");
                None
            }
        };
        if revoked_at.is_none_or(|revoked| grant.granted_at > revoked) {
            self.retire_fallback(account, item).await;
            return Ok(grant);
        }

        let active = self.fallback.get(account, item).await.map_err(|e| {
            EngineError::EntitlementGrantFailed(format!("fallback lookup for reinstatement: {e}"))
        })?;
        let granted_at = match active {
            Some(existing) if existing.reason == FallbackReason::Reinstated => existing.granted_at,
            other => {
                if other.is_some() {
                    self.retire_fallback(account, item).await;
                }
                let reinstated = fallback_grant(request, FallbackReason::Reinstated);
                let granted_at = reinstated.granted_at;
                self.fallback.put(reinstated).await.map_err(|e| {
                    error!(account = %account, item = %item, error = %e, "Reinstatement write failed");
                    EngineError::EntitlementGrantFailed(format!("reinstatement: {e}"))
                })?;
                info!(account = %account, item = %item, reference = %request.reference, "Remote grant reinstated after refund");
                granted_at
            }
        };
        Ok(EntitlementGrant { granted_at, ..grant })
    }

    /// Tries the remote grant without touching the fallback store.
    pub async fn try_remote(&self, request: &GrantRequest<'_>) -> RemoteGrant {
        match request.item {
            ContentItem::Course(meta) => self.grant_course(request.account, &meta.id).await,
            ContentItem::Article(meta) => self.grant_article(request, &meta.id).await,
        }
    }

    async fn grant_course(&self, account: AccountId, course: &ContentItemId) -> RemoteGrant {
        let existing = match self
            .retry
            .run("learning.find_enrollment", true, || {
                self.learning.find_enrollment(account, course)
            })
            .await
        {
            Ok(existing) => existing,
            Err(failure) => return RemoteGrant::Failed(format!("enrollment lookup: {failure}")),
        };

        let (enrollment_id, created_at) = match existing {
            Some(enrollment) if enrollment.state == EnrollmentState::Approved => {
                debug!(account = %account, course = %course, "Enrollment already approved");
                return RemoteGrant::Fulfilled(EntitlementGrant::from(&enrollment));
            }
            Some(enrollment) => (enrollment.id, enrollment.created_at),
            None => {
                let created = self
                    .retry
                    .run(
                        "learning.create_enrollment",
                        self.learning.idempotent_writes(),
                        || self.learning.create_enrollment(account, course),
                    )
                    .await;
                match created {
                    Ok(id) => {
                        info!(account = %account, course = %course, enrollment = %id, "Enrollment created");
                        (id, Utc::now())
                    }
                    Err(failure) => {
                        return RemoteGrant::Failed(format!("enrollment create: {failure}"));
                    }
                }
            }
        };

        let grant = |status| EntitlementGrant {
            account,
            item: course.clone(),
            granted_at: created_at,
            status,
            remote_id: Some(enrollment_id.0.clone()),
        };
        if self.approve(&enrollment_id).await {
            RemoteGrant::Fulfilled(grant(GrantStatus::Fulfilled))
        } else {
            RemoteGrant::AwaitingApproval(grant(GrantStatus::Pending))
        }
    }

    async fn approve(&self, enrollment: &EnrollmentId) -> bool {
        match self
            .retry
            .run("learning.approve_enrollment", true, || {
                self.learning.approve_enrollment(enrollment)
            })
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                warn!(enrollment = %enrollment, "Enrollment approval refused");
                false
            }
            Err(failure) => {
                warn!(enrollment = %enrollment, error = %failure, "Enrollment approval failed");
                false
            }
        }
    }

    async fn grant_article(&self, request: &GrantRequest<'_>, article: &ContentItemId) -> RemoteGrant {
        let account = request.account;
        match self
            .retry
            .run("content.find_article_purchase", true, || {
                self.content.find_article_purchase(account, article)
            })
            .await
        {
            Ok(Some(purchase)) if &purchase.payment_reference == request.reference => {
                return RemoteGrant::Fulfilled(EntitlementGrant::from(&purchase));
            }
            // A purchase under another reference predates a refund or a rebuy.
            Ok(_) => {}
            Err(failure) => return RemoteGrant::Failed(format!("purchase lookup: {failure}")),
        }

        let recorded = self
            .retry
            .run(
                "content.record_article_purchase",
                self.content.idempotent_writes(),
                || {
                    self.content.record_article_purchase(
                        account,
                        article,
                        request.amount,
                        request.reference,
                    )
                },
            )
            .await;
        match recorded {
            Ok(id) => {
                info!(account = %account, article = %article, purchase = %id, "Article purchase recorded");
                RemoteGrant::Fulfilled(EntitlementGrant {
                    account,
                    item: article.clone(),
                    granted_at: Utc::now(),
                    status: GrantStatus::Fulfilled,
                    remote_id: Some(id.0),
                })
            }
            Err(failure) => RemoteGrant::Failed(format!("article purchase: {failure}")),
        }
    }

    async fn retire_fallback(&self, account: AccountId, item: &ContentItemId) {
        match self.fallback.retire(account, item, Utc::now()).await {
            Ok(true) => info!(account = %account, item = %item, "Fallback grant retired"),
            Ok(false) => {}
            Err(e) => warn!(account = %account, item = %item, error = %e, "Could not retire fallback grant"),
        }
    }
}

fn fallback_grant(request: &GrantRequest<'_>, reason: FallbackReason) -> FallbackGrant {
    FallbackGrant {
        account: request.account,
        item: request.item.id().clone(),
        granted_at: Utc::now(),
        amount: request.amount,
        currency: request.currency.clone(),
        payment_reference: request.reference.clone(),
        reason,
        retired_at: None,
    }
}
