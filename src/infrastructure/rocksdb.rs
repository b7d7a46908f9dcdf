use crate::domain::content::ContentItemId;
use crate::domain::entitlement::{FallbackGrant, RevocationMarker};
use crate::domain::identity::{AccountId, AccountMapping, Email, MappingInsert};
use crate::domain::ports::{AccountMappingStore, FallbackStore, RevocationStore};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Column Family for email-to-account mappings, keyed by normalized email.
pub const CF_ACCOUNT_MAPPINGS: &str = "account_mappings";
/// Column Family for fallback grants, keyed by account, item and grant time.
pub const CF_FALLBACK_GRANTS: &str = "fallback_grants";
/// Column Family for refund revocations, keyed by account, item and revocation time.
pub const CF_REVOCATIONS: &str = "revocations";

/// Durable local stores backed by RocksDB.
///
/// Each store lives in its own Column Family. Fallback grants and revocations
/// are append-only: retiring a grant rewrites its record with `retired_at`
/// set, nothing is ever deleted.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    /// Serializes read-then-write sequences within this process.
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with all column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_ACCOUNT_MAPPINGS, CF_FALLBACK_GRANTS, CF_REVOCATIONS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| EngineError::StorageError(format!("{name} column family not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf)?;
        match self.db.get_cf(&handle, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let handle = self.cf(cf)?;
        self.db.put_cf(&handle, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    /// All records under `prefix`, in key order.
    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>> {
        let handle = self.cf(cf)?;
        let mut records = Vec::new();
        for entry in self
            .db
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            records.push((key.to_vec(), serde_json::from_slice(&value)?));
        }
        Ok(records)
    }

    fn active_fallback(
        &self,
        account: AccountId,
        item: &ContentItemId,
    ) -> Result<Option<(Vec<u8>, FallbackGrant)>> {
        Ok(self
            .scan::<FallbackGrant>(CF_FALLBACK_GRANTS, &pair_prefix(account, item))?
            .into_iter()
            .find(|(_, grant)| grant.is_active()))
    }
}

/// `{account:020}/{item_len:010}:{item}/`. Lexicographic order groups a
/// pair's history; the length keeps an id that extends another (`a/b` vs
/// `a/b/c`) out of its prefix scan.
fn pair_prefix(account: AccountId, item: &ContentItemId) -> Vec<u8> {
    let item = item.as_str();
    format!("{:020}/{:010}:{}/", account.0, item.len(), item).into_bytes()
}

fn timed_key(account: AccountId, item: &ContentItemId, at: DateTime<Utc>) -> Vec<u8> {
    let mut key = pair_prefix(account, item);
    let nanos = at.timestamp_nanos_opt().unwrap_or(i64::MAX);
    key.extend_from_slice(format!("{nanos:020}").as_bytes());
    key
}

#[async_trait]
impl AccountMappingStore for RocksDBStore {
    async fn get(&self, email: &Email) -> Result<Option<AccountMapping>> {
        self.get_json(CF_ACCOUNT_MAPPINGS, email.as_str().as_bytes())
    }

    async fn insert_if_absent(&self, mapping: AccountMapping) -> Result<MappingInsert> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = mapping.email.as_str().as_bytes().to_vec();
        if let Some(existing) = self.get_json::<AccountMapping>(CF_ACCOUNT_MAPPINGS, &key)? {
            return Ok(MappingInsert::Existing(existing));
        }
        self.put_json(CF_ACCOUNT_MAPPINGS, &key, &mapping)?;
        Ok(MappingInsert::Inserted(mapping))
    }
}

#[async_trait]
impl FallbackStore for RocksDBStore {
    async fn put(&self, grant: FallbackGrant) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.active_fallback(grant.account, &grant.item)?.is_some() {
            return Ok(());
        }
        let key = timed_key(grant.account, &grant.item, grant.granted_at);
        self.put_json(CF_FALLBACK_GRANTS, &key, &grant)
    }

    async fn get(&self, account: AccountId, item: &ContentItemId) -> Result<Option<FallbackGrant>> {
        Ok(self.active_fallback(account, item)?.map(|(_, grant)| grant))
    }

    async fn active(&self) -> Result<Vec<FallbackGrant>> {
        Ok(self
            .scan::<FallbackGrant>(CF_FALLBACK_GRANTS, b"")?
            .into_iter()
            .map(|(_, grant)| grant)
            .filter(FallbackGrant::is_active)
            .collect())
    }

    async fn retire(
        &self,
        account: AccountId,
        item: &ContentItemId,
        retired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.active_fallback(account, item)? {
            Some((key, mut grant)) => {
                grant.retired_at = Some(retired_at);
                self.put_json(CF_FALLBACK_GRANTS, &key, &grant)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl RevocationStore for RocksDBStore {
    async fn put(&self, marker: RevocationMarker) -> Result<()> {
        let key = timed_key(marker.account, &marker.item, marker.revoked_at);
        self.put_json(CF_REVOCATIONS, &key, &marker)
    }

    async fn latest(
        &self,
        account: AccountId,
        item: &ContentItemId,
    ) -> Result<Option<RevocationMarker>> {
        Ok(self
            .scan::<RevocationMarker>(CF_REVOCATIONS, &pair_prefix(account, item))?
            .into_iter()
            .map(|(_, marker)| marker)
            .max_by_key(|marker| marker.revoked_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::Currency;
    use crate::domain::entitlement::FallbackReason;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn grant(account: u64, item: &str) -> FallbackGrant {
        FallbackGrant {
            account: AccountId(account),
            item: ContentItemId::new(item),
            granted_at: Utc::now(),
            amount: dec!(300),
            currency: Currency::new("CHF").unwrap(),
            payment_reference: "pi_9".parse().unwrap(),
            reason: FallbackReason::RemoteCreateFailed,
            retired_at: None,
        }
    }

    #[tokio::test]
    async fn test_rocksdb_mapping_compare_and_create() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let email = Email::parse("a@example.com").unwrap();

        let first = store
            .insert_if_absent(AccountMapping::new(email.clone(), AccountId(1)))
            .await
            .unwrap();
        let second = store
            .insert_if_absent(AccountMapping::new(email.clone(), AccountId(2)))
            .await
            .unwrap();

        assert!(matches!(first, MappingInsert::Inserted(_)));
        assert!(matches!(second, MappingInsert::Existing(ref m) if m.account == AccountId(1)));
        assert_eq!(
            AccountMappingStore::get(&store, &email).await.unwrap().unwrap().account,
            AccountId(1)
        );
    }

    #[tokio::test]
    async fn test_rocksdb_fallback_lifecycle() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        FallbackStore::put(&store, grant(42, "C9")).await.unwrap();
        FallbackStore::put(&store, grant(42, "C9")).await.unwrap();
        FallbackStore::put(&store, grant(7, "A1")).await.unwrap();

        assert_eq!(store.active().await.unwrap().len(), 2);
        assert!(
            store
                .retire(AccountId(42), &ContentItemId::new("C9"), Utc::now())
                .await
                .unwrap()
        );
        assert!(
            FallbackStore::get(&store, AccountId(42), &ContentItemId::new("C9"))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rocksdb_nested_item_ids_stay_separate() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        let parent = ContentItemId::new("courses/intro");
        FallbackStore::put(&store, grant(42, "courses/intro/advanced"))
            .await
            .unwrap();
        RevocationStore::put(
            &store,
            RevocationMarker {
                account: AccountId(42),
                item: ContentItemId::new("courses/intro/advanced"),
                payment_reference: "pi_1".parse().unwrap(),
                revoked_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        assert!(
            FallbackStore::get(&store, AccountId(42), &parent)
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.latest(AccountId(42), &parent).await.unwrap().is_none());
        assert!(
            FallbackStore::get(&store, AccountId(42), &ContentItemId::new("courses/intro/advanced"))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_rocksdb_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            FallbackStore::put(&store, grant(42, "C9")).await.unwrap();
            RevocationStore::put(
                &store,
                RevocationMarker {
                    account: AccountId(1),
                    item: ContentItemId::new("A1"),
                    payment_reference: "pi_1".parse().unwrap(),
                    revoked_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert!(
            FallbackStore::get(&store, AccountId(42), &ContentItemId::new("C9"))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .latest(AccountId(1), &ContentItemId::new("A1"))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .latest(AccountId(1), &ContentItemId::new("A10"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
