use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a call to one of the remote collaborators (payment processor,
/// commerce system, learning/content system).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote system unavailable: {0}")]
    Unavailable(String),
    #[error("remote call timed out after {0} ms")]
    Timeout(u64),
    #[error("remote system rejected the request: {0}")]
    Rejected(String),
    #[error("conflicting record already exists: {0}")]
    Conflict(String),
}

impl RemoteError {
    /// Transport-level failures are worth another attempt; rejections and
    /// conflicts will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout(_))
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("payment {reference} did not succeed (status: {status})")]
    PaymentNotVerified { reference: String, status: String },
    #[error("payment {reference} could not be verified after {attempts} attempt(s): {source}")]
    VerificationUnavailable {
        reference: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },
    #[error("identity resolution failed: {0}")]
    IdentityResolutionFailed(String),
    #[error("ledger write failed: {0}")]
    LedgerWriteFailed(String),
    #[error("entitlement grant failed: {0}")]
    EntitlementGrantFailed(String),
    #[error("unknown content item: {0}")]
    UnknownContentItem(String),
    #[error("content item {0} is not purchasable")]
    NotPurchasable(String),
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),
}

impl EngineError {
    /// The flat classification reported to callers of `reconcile`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::PaymentNotVerified { .. } => ErrorKind::PaymentNotVerified,
            EngineError::VerificationUnavailable { .. } => ErrorKind::VerificationUnavailable,
            EngineError::IdentityResolutionFailed(_) => ErrorKind::IdentityResolutionFailed,
            EngineError::LedgerWriteFailed(_) => ErrorKind::LedgerWriteFailed,
            EngineError::EntitlementGrantFailed(_) => ErrorKind::EntitlementGrantFailed,
            EngineError::UnknownContentItem(_) | EngineError::NotPurchasable(_) => {
                ErrorKind::InvalidRequest
            }
            EngineError::ValidationError(_) => ErrorKind::InvalidRequest,
            _ => ErrorKind::Internal,
        }
    }
}

/// Serializable error classification carried in reconciliation responses.
///
/// `DuplicateSuppressed` and `AccessDenied` are outcomes rather than failures;
/// they never appear in the `error` field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PaymentNotVerified,
    VerificationUnavailable,
    IdentityResolutionFailed,
    DuplicateSuppressed,
    LedgerWriteFailed,
    EntitlementGrantFailed,
    AccessDenied,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    /// Only these kinds are surfaced to the buyer as a failed purchase.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            ErrorKind::PaymentNotVerified
                | ErrorKind::VerificationUnavailable
                | ErrorKind::IdentityResolutionFailed
                | ErrorKind::InvalidRequest
                | ErrorKind::Internal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PaymentNotVerified => "payment_not_verified",
            ErrorKind::VerificationUnavailable => "verification_unavailable",
            ErrorKind::IdentityResolutionFailed => "identity_resolution_failed",
            ErrorKind::DuplicateSuppressed => "duplicate_suppressed",
            ErrorKind::LedgerWriteFailed => "ledger_write_failed",
            ErrorKind::EntitlementGrantFailed => "entitlement_grant_failed",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Internal => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
