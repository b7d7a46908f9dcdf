use super::content::{ContentItemId, Currency};
use super::identity::AccountId;
use super::purchase::PaymentReference;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrollmentId(pub String);

impl fmt::Display for EnrollmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseId(pub String);

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Course enrollments are created and approved in two separate remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentState {
    Requested,
    Created,
    Approved,
}

impl EnrollmentState {
    /// Advances the state machine; `Approved` is terminal.
    pub fn advance(self) -> Self {
        match self {
            EnrollmentState::Requested => EnrollmentState::Created,
            EnrollmentState::Created | EnrollmentState::Approved => EnrollmentState::Approved,
        }
    }
}

/// A course enrollment as held by the learning system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub account: AccountId,
    pub course: ContentItemId,
    pub state: EnrollmentState,
    pub created_at: DateTime<Utc>,
}

/// An article purchase as held by the content system. Single phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticlePurchase {
    pub id: PurchaseId,
    pub account: AccountId,
    pub article: ContentItemId,
    pub amount: Decimal,
    pub payment_reference: PaymentReference,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Fulfilled,
    Pending,
    Fallback,
}

/// Where the grant that unlocked the item lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantKind {
    Remote,
    Fallback,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::Remote => "remote",
            GrantKind::Fallback => "fallback",
        }
    }
}

/// The access-bearing record for an (account, item) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementGrant {
    pub account: AccountId,
    pub item: ContentItemId,
    pub granted_at: DateTime<Utc>,
    pub status: GrantStatus,
    /// Enrollment or purchase id in the remote system, if one exists.
    pub remote_id: Option<String>,
}

impl EntitlementGrant {
    pub fn kind(&self) -> GrantKind {
        match self.status {
            GrantStatus::Fulfilled | GrantStatus::Pending => GrantKind::Remote,
            GrantStatus::Fallback => GrantKind::Fallback,
        }
    }
}

impl From<&Enrollment> for EntitlementGrant {
    fn from(enrollment: &Enrollment) -> Self {
        let status = match enrollment.state {
            EnrollmentState::Approved => GrantStatus::Fulfilled,
            EnrollmentState::Requested | EnrollmentState::Created => GrantStatus::Pending,
        };
        Self {
            account: enrollment.account,
            item: enrollment.course.clone(),
            granted_at: enrollment.created_at,
            status,
            remote_id: Some(enrollment.id.0.clone()),
        }
    }
}

impl From<&ArticlePurchase> for EntitlementGrant {
    fn from(purchase: &ArticlePurchase) -> Self {
        Self {
            account: purchase.account,
            item: purchase.article.clone(),
            granted_at: purchase.purchased_at,
            status: GrantStatus::Fulfilled,
            remote_id: Some(purchase.id.0.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The remote create call failed; nothing exists remotely.
    RemoteCreateFailed,
    /// The enrollment exists but could not be approved yet.
    ApprovalPending,
    /// A rebuy after a refund reused a remote grant older than the refund.
    /// Counts for access regardless of the fallback unlock setting and is
    /// never drained.
    Reinstated,
}

impl FallbackReason {
    /// Whether the remote system still owes a grant for this entry.
    pub fn awaits_remote(&self) -> bool {
        !matches!(self, FallbackReason::Reinstated)
    }
}

/// A locally held grant bridging a remote-system outage.
///
/// Carries the purchase details needed to replay the remote grant later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackGrant {
    pub account: AccountId,
    pub item: ContentItemId,
    pub granted_at: DateTime<Utc>,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_reference: PaymentReference,
    pub reason: FallbackReason,
    pub retired_at: Option<DateTime<Utc>>,
}

impl FallbackGrant {
    pub fn is_active(&self) -> bool {
        self.retired_at.is_none()
    }

    pub fn to_grant(&self) -> EntitlementGrant {
        EntitlementGrant {
            account: self.account,
            item: self.item.clone(),
            granted_at: self.granted_at,
            status: GrantStatus::Fallback,
            remote_id: None,
        }
    }
}

/// Appended on refund. History is kept; access sources older than the marker
/// stop counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationMarker {
    pub account: AccountId,
    pub item: ContentItemId,
    pub payment_reference: PaymentReference,
    pub revoked_at: DateTime<Utc>,
}
