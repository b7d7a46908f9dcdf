//! Application layer: the reconciliation pipeline and its components.
//!
//! `engine::ReconciliationEngine` wires the components in order (verify,
//! resolve, guard, ledger, grant) and exposes the access query. Each
//! component talks to the outside world only through the ports in
//! `domain::ports`.

pub mod access_evaluator;
pub mod cache;
pub mod duplicate_guard;
pub mod engine;
pub mod entitlement_grantor;
pub mod identity_resolver;
pub mod ledger_writer;
pub mod locks;
pub mod payment_verifier;
pub mod retry;
