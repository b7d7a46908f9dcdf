use super::retry::RetryPolicy;
use crate::domain::ports::PaymentProcessorRef;
use crate::domain::purchase::{PaymentReference, PaymentStatus};
use crate::error::{EngineError, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    NotFound,
    NotSucceeded(PaymentStatus),
}

/// Confirms with the payment processor that a payment actually succeeded.
///
/// Read-only. Transport failures are retried; once retries are exhausted the
/// caller gets `VerificationUnavailable`, never a positive answer.
pub struct PaymentVerifier {
    processor: PaymentProcessorRef,
    retry: RetryPolicy,
}

impl PaymentVerifier {
    pub fn new(processor: PaymentProcessorRef, retry: RetryPolicy) -> Self {
        Self { processor, retry }
    }

    pub async fn verify(&self, reference: &PaymentReference) -> Result<Verification> {
        let lookup = match reference {
            PaymentReference::CheckoutSession(id) => {
                self.retry
                    .run("payment.checkout_session", true, || {
                        self.processor.checkout_session_status(id)
                    })
                    .await
                    .map(|raw| raw.map(|status| PaymentStatus::from_checkout_session(&status)))
            }
            PaymentReference::PaymentIntent(id) => {
                self.retry
                    .run("payment.payment_intent", true, || {
                        self.processor.payment_intent_status(id)
                    })
                    .await
                    .map(|raw| raw.map(|status| PaymentStatus::from_payment_intent(&status)))
            }
        };

        let status = lookup.map_err(|failure| {
            warn!(reference = %reference, error = %failure, "Payment verification unavailable");
            EngineError::VerificationUnavailable {
                reference: reference.to_string(),
                attempts: failure.attempts,
                source: failure.error,
            }
        })?;

        let verification = match status {
            None => Verification::NotFound,
            Some(PaymentStatus::Succeeded) => Verification::Verified,
            Some(other) => Verification::NotSucceeded(other),
        };
        debug!(reference = %reference, ?verification, "Payment verified");
        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::infrastructure::in_memory::{FaultMode, InMemoryPaymentProcessor};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_session_uses_paid_vocabulary() {
        let processor = Arc::new(InMemoryPaymentProcessor::new());
        processor.set_status("cs_paid", "paid").await;
        processor.set_status("cs_open", "unpaid").await;
        let verifier = PaymentVerifier::new(processor, fast_retry());

        let paid = verifier.verify(&"cs_paid".parse().unwrap()).await.unwrap();
        assert_eq!(paid, Verification::Verified);

        let open = verifier.verify(&"cs_open".parse().unwrap()).await.unwrap();
        assert_eq!(open, Verification::NotSucceeded(PaymentStatus::Pending));
    }

    #[tokio::test]
    async fn test_intent_uses_succeeded_vocabulary() {
        let processor = Arc::new(InMemoryPaymentProcessor::new());
        processor.set_status("pi_ok", "succeeded").await;
        processor.set_status("pi_bad", "requires_payment_method").await;
        let verifier = PaymentVerifier::new(processor, fast_retry());

        assert_eq!(
            verifier.verify(&"pi_ok".parse().unwrap()).await.unwrap(),
            Verification::Verified
        );
        assert_eq!(
            verifier.verify(&"pi_bad".parse().unwrap()).await.unwrap(),
            Verification::NotSucceeded(PaymentStatus::Failed)
        );
        assert_eq!(
            verifier.verify(&"pi_missing".parse().unwrap()).await.unwrap(),
            Verification::NotFound
        );
    }

    #[tokio::test]
    async fn test_transient_outage_is_retried() {
        let processor = Arc::new(InMemoryPaymentProcessor::new());
        processor.set_status("pi_1", "succeeded").await;
        processor.faults().fail("verify", FaultMode::Times(2));
        let verifier = PaymentVerifier::new(processor.clone(), fast_retry());

        let result = verifier.verify(&"pi_1".parse().unwrap()).await.unwrap();
        assert_eq!(result, Verification::Verified);
        assert_eq!(processor.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_unavailable() {
        let processor = Arc::new(InMemoryPaymentProcessor::new());
        processor.set_status("pi_1", "succeeded").await;
        processor.faults().fail("verify", FaultMode::Always);
        let verifier = PaymentVerifier::new(processor, fast_retry());

        let result = verifier.verify(&"pi_1".parse().unwrap()).await;
        match result {
            Err(EngineError::VerificationUnavailable {
                attempts, source, ..
            }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, RemoteError::Unavailable(_)));
            }
            other => panic!("expected VerificationUnavailable, got {other:?}"),
        }
    }
}
