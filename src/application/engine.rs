use super::access_evaluator::{AccessDecision, AccessEvaluator};
use super::cache::TtlCache;
use super::duplicate_guard::{DuplicateGuard, GuardDecision};
use super::entitlement_grantor::{EntitlementGrantor, GrantRequest, RemoteGrant};
use super::identity_resolver::IdentityResolver;
use super::ledger_writer::CommerceLedgerWriter;
use super::locks::KeyedLocks;
use super::payment_verifier::{PaymentVerifier, Verification};
use super::retry::RetryPolicy;
use crate::config::EngineConfig;
use crate::domain::content::{ContentItem, ContentItemId};
use crate::domain::entitlement::{EntitlementGrant, GrantKind, RevocationMarker};
use crate::domain::identity::AccountId;
use crate::domain::ledger::{LedgerEntry, LedgerStatus};
use crate::domain::ports::{
    Collaborators, CommerceSystemRef, ContentCatalogRef, FallbackStoreRef, RevocationStoreRef,
};
use crate::domain::purchase::{PaymentReference, PurchaseIntent};
use crate::error::{EngineError, ErrorKind, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What a successful `reconcile` produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub account: AccountId,
    pub grant: EntitlementGrant,
    pub ledger_entry: Option<LedgerEntry>,
    /// The payment reference had already been recorded by an earlier run.
    pub duplicate: bool,
    /// Failures absorbed along the way; they need out-of-band follow-up.
    pub warnings: Vec<ErrorKind>,
}

impl ReconcileOutcome {
    pub fn grant_kind(&self) -> GrantKind {
        self.grant.kind()
    }
}

/// The response contract handed back to callers of `reconcile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_kind: Option<GrantKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ErrorKind>,
}

impl From<&Result<ReconcileOutcome>> for ReconcileResponse {
    fn from(result: &Result<ReconcileOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                granted: true,
                grant_kind: Some(outcome.grant_kind()),
                error: None,
                warnings: outcome.warnings.clone(),
            },
            Err(e) => Self {
                granted: false,
                grant_kind: None,
                error: Some(e.kind()),
                warnings: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub retired: usize,
    pub remaining: usize,
}

/// Turns a confirmed payment into a ledger entry and an access grant.
///
/// One sequential pipeline per call: verify, resolve, guard, ledger, grant.
/// Runs sharing a payment reference are serialized in-process; re-running a
/// reference after a partial failure skips the ledger step and only repeats
/// the grant.
pub struct ReconciliationEngine {
    catalog: ContentCatalogRef,
    commerce: CommerceSystemRef,
    fallback: FallbackStoreRef,
    revocations: RevocationStoreRef,
    items: TtlCache<ContentItemId, ContentItem>,
    verifier: PaymentVerifier,
    resolver: IdentityResolver,
    guard: DuplicateGuard,
    ledger: CommerceLedgerWriter,
    grantor: EntitlementGrantor,
    access: AccessEvaluator,
    locks: KeyedLocks,
    retry: RetryPolicy,
}

impl ReconciliationEngine {
    pub fn new(collaborators: Collaborators, config: &EngineConfig) -> Self {
        let retry = config.retry_policy();
        let ttl = config.cache_ttl();
        let Collaborators {
            payments,
            accounts,
            commerce,
            learning,
            content,
            catalog,
            products,
            mappings,
            fallback,
            revocations,
        } = collaborators;

        Self {
            verifier: PaymentVerifier::new(payments, retry.clone()),
            resolver: IdentityResolver::new(accounts, mappings, TtlCache::new(ttl), retry.clone()),
            guard: DuplicateGuard::new(commerce.clone(), retry.clone()),
            ledger: CommerceLedgerWriter::new(
                commerce.clone(),
                products,
                TtlCache::new(ttl),
                retry.clone(),
            ),
            grantor: EntitlementGrantor::new(
                learning.clone(),
                content.clone(),
                fallback.clone(),
                revocations.clone(),
                retry.clone(),
            ),
            access: AccessEvaluator::new(
                learning,
                content,
                commerce.clone(),
                fallback.clone(),
                revocations.clone(),
                &retry,
                config.unlock_on_fallback,
            ),
            items: TtlCache::new(ttl),
            catalog,
            commerce,
            fallback,
            revocations,
            locks: KeyedLocks::new(),
            retry,
        }
    }

    /// Runs the purchase pipeline for one payment confirmation.
    ///
    /// Only invalid requests, `PaymentNotVerified`, `VerificationUnavailable`
    /// and `IdentityResolutionFailed` come back as `Err` in normal operation.
    /// Ledger and grant failures are absorbed and listed in `warnings`.
    pub async fn reconcile(&self, intent: &PurchaseIntent) -> Result<ReconcileOutcome> {
        let reference = intent.reference();
        let _lock = self.locks.lock(reference.as_str()).await;

        let item = self.load_item(intent.item()).await?;
        if !item.is_purchasable() {
            return Err(EngineError::NotPurchasable(item.id().to_string()));
        }
        self.check_price(intent, &item);

        match self.verifier.verify(reference).await? {
            Verification::Verified => {}
            Verification::NotFound => {
                return Err(EngineError::PaymentNotVerified {
                    reference: reference.to_string(),
                    status: "not_found".to_string(),
                });
            }
            Verification::NotSucceeded(status) => {
                info!(reference = %reference, status = %status, "Payment not completed");
                return Err(EngineError::PaymentNotVerified {
                    reference: reference.to_string(),
                    status: status.to_string(),
                });
            }
        }

        let account = self.resolver.resolve(intent.buyer()).await?;
        let mut warnings = Vec::new();

        let (ledger_entry, duplicate) = match self
            .guard
            .should_proceed(account, item.id(), reference)
            .await
        {
            Ok(GuardDecision::AlreadyHandled(entry)) => {
                if entry.status == LedgerStatus::Refunded {
                    return Err(EngineError::PaymentNotVerified {
                        reference: reference.to_string(),
                        status: "refunded".to_string(),
                    });
                }
                (Some(entry), true)
            }
            Ok(GuardDecision::Proceed) => match self
                .ledger
                .record(account, &item, intent.amount(), intent.currency(), reference)
                .await
            {
                Ok(entry) => (Some(entry), false),
                Err(e) => {
                    warn!(
                        reference = %reference,
                        account = %account,
                        step = "order_write",
                        error = %e,
                        "Ledger write failed; absorbed"
                    );
                    warnings.push(ErrorKind::LedgerWriteFailed);
                    (None, false)
                }
            },
            Err(e) => {
                // No order was attempted: the reference may already be recorded.
                warn!(
                    reference = %reference,
                    account = %account,
                    step = "duplicate_check",
                    error = %e,
                    "Duplicate check unavailable; no order written"
                );
                warnings.push(ErrorKind::LedgerWriteFailed);
                (None, false)
            }
        };

        let outcome = self
            .grantor
            .grant(GrantRequest {
                account,
                item: &item,
                amount: intent.amount().value(),
                currency: intent.currency(),
                reference,
            })
            .await?;
        if outcome.remote_failure.is_some() {
            warnings.push(ErrorKind::EntitlementGrantFailed);
        }

        info!(
            reference = %reference,
            account = %account,
            item = %item.id(),
            grant_kind = outcome.kind().as_str(),
            duplicate,
            "Purchase reconciled"
        );
        Ok(ReconcileOutcome {
            account,
            grant: outcome.grant,
            ledger_entry,
            duplicate,
            warnings,
        })
    }

    /// The query every content page calls. Unknown items are never accessible.
    pub async fn check_access(&self, account: Option<AccountId>, item: &ContentItemId) -> bool {
        match self.access_decision(account, item).await {
            Ok(decision) => decision.is_allowed(),
            Err(e) => {
                debug!(item = %item, error = %e, "Access check on unavailable item");
                false
            }
        }
    }

    pub async fn access_decision(
        &self,
        account: Option<AccountId>,
        item: &ContentItemId,
    ) -> Result<AccessDecision> {
        let item = self.load_item(item).await?;
        Ok(self.access.evaluate(account, &item).await)
    }

    /// Reverses a purchase: marks the order refunded and appends a revocation
    /// marker. Grant history stays; access is hidden by the marker until a
    /// later purchase.
    pub async fn refund(
        &self,
        account: AccountId,
        item: &ContentItemId,
        reference: &PaymentReference,
    ) -> Result<RevocationMarker> {
        let _lock = self.locks.lock(reference.as_str()).await;

        let order = self
            .retry
            .run("commerce.find_existing_order", true, || {
                self.commerce.find_existing_order(account, item, reference)
            })
            .await
            .map_err(|failure| {
                EngineError::LedgerWriteFailed(format!("order lookup for {reference}: {failure}"))
            })?;

        match order {
            Some(entry) if entry.status != LedgerStatus::Refunded => {
                self.retry
                    .run("commerce.set_order_status", true, || {
                        self.commerce
                            .set_order_status(&entry.order_id, LedgerStatus::Refunded)
                    })
                    .await
                    .map_err(|failure| {
                        EngineError::LedgerWriteFailed(format!(
                            "refunding order {}: {failure}",
                            entry.order_id
                        ))
                    })?;
            }
            Some(_) => debug!(reference = %reference, "Order already refunded"),
            None => warn!(
                reference = %reference,
                account = %account,
                item = %item,
                "Refund without ledger entry; revoking access only"
            ),
        }

        let marker = RevocationMarker {
            account,
            item: item.clone(),
            payment_reference: reference.clone(),
            revoked_at: Utc::now(),
        };
        self.revocations.put(marker.clone()).await?;
        if let Err(e) = self.fallback.retire(account, item, marker.revoked_at).await {
            warn!(account = %account, item = %item, error = %e, "Could not retire fallback grant on refund");
        }
        info!(reference = %reference, account = %account, item = %item, "Purchase refunded");
        Ok(marker)
    }

    /// Retries the remote grant for every active fallback entry and retires
    /// the ones the remote system now confirms. Reinstatements are skipped.
    pub async fn drain_fallback(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        for pending in self.fallback.active().await? {
            if !pending.reason.awaits_remote() {
                continue;
            }
            let _lock = self.locks.lock(pending.payment_reference.as_str()).await;
            let item = match self.load_item(&pending.item).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(item = %pending.item, error = %e, "Fallback grant for unknown item");
                    report.remaining += 1;
                    continue;
                }
            };
            let request = GrantRequest {
                account: pending.account,
                item: &item,
                amount: pending.amount,
                currency: &pending.currency,
                reference: &pending.payment_reference,
            };
            match self.grantor.try_remote(&request).await {
                RemoteGrant::Fulfilled(grant) => {
                    self.grantor.settle(&request, grant).await?;
                    info!(account = %pending.account, item = %pending.item, "Fallback grant confirmed remotely");
                    report.retired += 1;
                }
                RemoteGrant::AwaitingApproval(_) | RemoteGrant::Failed(_) => report.remaining += 1,
            }
        }
        info!(retired = report.retired, remaining = report.remaining, "Fallback drain finished");
        Ok(report)
    }

    /// Drops cached catalog data for an item after it is republished.
    pub async fn invalidate_item(&self, item: &ContentItemId) {
        self.items.invalidate(item).await;
        self.ledger.invalidate_product(item).await;
    }

    async fn load_item(&self, id: &ContentItemId) -> Result<ContentItem> {
        if let Some(item) = self.items.get(id).await {
            return Ok(item);
        }
        let item = self
            .catalog
            .get(id)
            .await?
            .ok_or_else(|| EngineError::UnknownContentItem(id.to_string()))?;
        self.items.insert(id.clone(), item.clone()).await;
        Ok(item)
    }

    fn check_price(&self, intent: &PurchaseIntent, item: &ContentItem) {
        let meta = item.meta();
        if intent.amount().value() != meta.price.value() || intent.currency() != &meta.currency {
            warn!(
                reference = %intent.reference(),
                item = %meta.id,
                paid = %intent.amount().value(),
                paid_currency = %intent.currency(),
                price = %meta.price.value(),
                currency = %meta.currency,
                "Paid amount differs from catalog price"
            );
        }
    }
}
