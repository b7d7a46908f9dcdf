use super::cache::TtlCache;
use super::locks::KeyedLocks;
use super::retry::RetryPolicy;
use crate::domain::identity::{AccountId, AccountMapping, BuyerIdentity, Email, MappingInsert};
use crate::domain::ports::{AccountDirectoryRef, AccountMappingStoreRef};
use crate::error::{EngineError, Result};
use tracing::{debug, info, warn};

/// Maps a buyer identity onto a stable account in the learning system,
/// creating the account on first purchase.
///
/// Creation is compare-and-create: an in-process lock per email plus the
/// mapping store's uniqueness on email. A writer that loses the race adopts
/// the mapping that won.
pub struct IdentityResolver {
    directory: AccountDirectoryRef,
    mappings: AccountMappingStoreRef,
    cache: TtlCache<Email, AccountId>,
    locks: KeyedLocks,
    retry: RetryPolicy,
}

impl IdentityResolver {
    pub fn new(
        directory: AccountDirectoryRef,
        mappings: AccountMappingStoreRef,
        cache: TtlCache<Email, AccountId>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            directory,
            mappings,
            cache,
            locks: KeyedLocks::new(),
            retry,
        }
    }

    pub async fn resolve(&self, buyer: &BuyerIdentity) -> Result<AccountId> {
        match buyer {
            BuyerIdentity::InternalAccountId(id) => Ok(*id),
            BuyerIdentity::ExternalEmail(email) => self.resolve_email(email).await,
        }
    }

    async fn resolve_email(&self, email: &Email) -> Result<AccountId> {
        if let Some(account) = self.cache.get(email).await {
            return Ok(account);
        }
        if let Some(mapping) = self.lookup_mapping(email).await? {
            self.cache.insert(email.clone(), mapping.account).await;
            return Ok(mapping.account);
        }

        let _guard = self.locks.lock(email.as_str()).await;

        // Another task may have created the mapping while we waited.
        if let Some(mapping) = self.lookup_mapping(email).await? {
            self.cache.insert(email.clone(), mapping.account).await;
            return Ok(mapping.account);
        }

        let existing = self
            .retry
            .run("identity.find_by_email", true, || {
                self.directory.find_by_email(email)
            })
            .await
            .map_err(|failure| {
                EngineError::IdentityResolutionFailed(format!(
                    "account lookup for {email} failed: {failure}"
                ))
            })?;

        let account = match existing {
            Some(account) => {
                debug!(email = %email, account = %account, "Mapping existing account");
                account
            }
            None => {
                let account = self
                    .retry
                    .run(
                        "identity.create_account",
                        self.directory.idempotent_writes(),
                        || self.directory.create_account(email),
                    )
                    .await
                    .map_err(|failure| {
                        EngineError::IdentityResolutionFailed(format!(
                            "account creation for {email} failed: {failure}"
                        ))
                    })?;
                info!(email = %email, account = %account, "Created account for new buyer");
                account
            }
        };

        let inserted = self
            .mappings
            .insert_if_absent(AccountMapping::new(email.clone(), account))
            .await
            .map_err(|e| {
                EngineError::IdentityResolutionFailed(format!(
                    "persisting mapping for {email} failed: {e}"
                ))
            })?;

        let resolved = match inserted {
            MappingInsert::Inserted(mapping) => mapping.account,
            MappingInsert::Existing(mapping) => {
                if mapping.account != account {
                    warn!(
                        email = %email,
                        winner = %mapping.account,
                        orphan = %account,
                        "Lost account-creation race; adopting existing mapping"
                    );
                }
                mapping.account
            }
        };
        self.cache.insert(email.clone(), resolved).await;
        Ok(resolved)
    }

    async fn lookup_mapping(&self, email: &Email) -> Result<Option<AccountMapping>> {
        self.mappings.get(email).await.map_err(|e| {
            EngineError::IdentityResolutionFailed(format!("mapping lookup for {email} failed: {e}"))
        })
    }
}
