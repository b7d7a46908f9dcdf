//! CSV adapters for the batch replay binary.

pub mod catalog_reader;
pub mod outcome_writer;
pub mod payment_reader;
pub mod purchase_reader;
