use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable account identifier in the learning/content system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized (trimmed, lower-cased) email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let email = raw.trim().to_lowercase();
        let valid = match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !domain.contains('@')
            }
            None => false,
        };
        if valid && !email.chars().any(char::is_whitespace) {
            Ok(Self(email))
        } else {
            Err(EngineError::ValidationError(format!(
                "Invalid email address: {raw}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Email {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The purchasing identity as supplied at checkout.
///
/// Parsed once at the system boundary; downstream components match on the
/// variant instead of guessing from the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerIdentity {
    ExternalEmail(Email),
    InternalAccountId(AccountId),
}

impl FromStr for BuyerIdentity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
            let id = trimmed.parse::<u64>().map_err(|e| {
                EngineError::ValidationError(format!("Invalid account id {trimmed}: {e}"))
            })?;
            return Ok(BuyerIdentity::InternalAccountId(AccountId(id)));
        }
        Email::parse(trimmed).map(BuyerIdentity::ExternalEmail)
    }
}

impl fmt::Display for BuyerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuyerIdentity::ExternalEmail(email) => write!(f, "{email}"),
            BuyerIdentity::InternalAccountId(id) => write!(f, "{id}"),
        }
    }
}

/// Persisted link between an external buyer identity and an internal account.
///
/// One email maps to at most one account; mappings are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMapping {
    pub email: Email,
    pub account: AccountId,
    pub created_at: DateTime<Utc>,
}

impl AccountMapping {
    pub fn new(email: Email, account: AccountId) -> Self {
        Self {
            email,
            account,
            created_at: Utc::now(),
        }
    }
}

/// Result of a compare-and-create on the mapping store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingInsert {
    Inserted(AccountMapping),
    /// Another writer got there first; this is the mapping that won.
    Existing(AccountMapping),
}

impl MappingInsert {
    pub fn mapping(&self) -> &AccountMapping {
        match self {
            MappingInsert::Inserted(mapping) | MappingInsert::Existing(mapping) => mapping,
        }
    }
}
