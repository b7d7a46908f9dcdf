use super::retry::RetryPolicy;
use crate::domain::content::ContentItemId;
use crate::domain::identity::AccountId;
use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::CommerceSystemRef;
use crate::domain::purchase::PaymentReference;
use crate::error::{EngineError, Result};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Proceed,
    /// An equivalent, non-failed order already exists. Treated as success.
    AlreadyHandled(LedgerEntry),
}

/// Decides before any ledger write whether this (account, item, reference)
/// triple was already recorded.
///
/// The check itself is racy against concurrent callbacks; the pipeline holds
/// a per-reference lock and the commerce write dedups on the same key when
/// the commerce system supports it.
pub struct DuplicateGuard {
    commerce: CommerceSystemRef,
    retry: RetryPolicy,
}

impl DuplicateGuard {
    pub fn new(commerce: CommerceSystemRef, retry: RetryPolicy) -> Self {
        Self { commerce, retry }
    }

    pub async fn should_proceed(
        &self,
        account: AccountId,
        item: &ContentItemId,
        reference: &PaymentReference,
    ) -> Result<GuardDecision> {
        let lookup = self
            .retry
            .run("commerce.find_existing_order", true, || {
                self.commerce.find_existing_order(account, item, reference)
            })
            .await;

        match lookup {
            Ok(Some(entry)) if entry.matches(account, item, reference) => {
                info!(
                    reference = %reference,
                    account = %account,
                    item = %item,
                    order = %entry.order_id,
                    "Duplicate suppressed"
                );
                Ok(GuardDecision::AlreadyHandled(entry))
            }
            Ok(_) => Ok(GuardDecision::Proceed),
            // Without a reliable check, only a write that dedups by itself is safe.
            Err(failure) if self.commerce.idempotent_writes() => {
                warn!(
                    reference = %reference,
                    error = %failure,
                    "Duplicate check unavailable; relying on idempotent order write"
                );
                Ok(GuardDecision::Proceed)
            }
            Err(failure) => Err(EngineError::LedgerWriteFailed(format!(
                "duplicate check for {reference} unavailable: {failure}"
            ))),
        }
    }
}
