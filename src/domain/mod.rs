//! Domain layer: value objects, records and the ports to external systems.

pub mod content;
pub mod entitlement;
pub mod identity;
pub mod ledger;
pub mod ports;
pub mod purchase;
