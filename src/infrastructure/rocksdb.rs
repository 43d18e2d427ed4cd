use crate::domain::entity::{EigenEntity, EntityId};
use crate::domain::payment::{PaymentKey, PaymentRecord};
use crate::domain::pool::PoolDescriptor;
use crate::domain::ports::{EntityStore, PaymentLedger, PoolCacheKey, PoolStore};
use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

/// Column Family for payment ledger rows, keyed by payment key.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for entity records, keyed by entity id.
pub const CF_ENTITIES: &str = "entities";
/// Column Family for resolved pool descriptors, keyed by `PoolCacheKey::storage_key`.
pub const CF_POOLS: &str = "pools";

/// A persistent store implementation using RocksDB.
///
/// Payments, entities and pool descriptors live in separate Column Families.
/// Ledger writes that must be atomic (insert-if-absent, update) are serialised
/// through a process-wide mutex, since a single process owns the database.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    ledger_guard: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` with all column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_PAYMENTS, CF_ENTITIES, CF_POOLS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            ledger_guard: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| KeeperError::Storage(format!("column family {name} not found")))
    }

    fn put<T: Serialize>(&self, family: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(family)?;
        self.db.put_cf(cf, key, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let cf = self.cf(family)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl PaymentLedger for RocksDBStore {
    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<bool> {
        let key = record.key.as_str().as_bytes().to_vec();
        let _guard = self.ledger_guard.lock();
        if self.db.get_pinned_cf(self.cf(CF_PAYMENTS)?, &key)?.is_some() {
            return Ok(false);
        }
        self.put(CF_PAYMENTS, &key, &record)?;
        Ok(true)
    }

    async fn update(&self, record: PaymentRecord) -> Result<()> {
        let key = record.key.as_str().as_bytes().to_vec();
        let _guard = self.ledger_guard.lock();
        if self.db.get_pinned_cf(self.cf(CF_PAYMENTS)?, &key)?.is_none() {
            return Err(KeeperError::NotFound(format!("payment {}", record.key)));
        }
        self.put(CF_PAYMENTS, &key, &record)
    }

    async fn get(&self, key: &PaymentKey) -> Result<Option<PaymentRecord>> {
        self.read(CF_PAYMENTS, key.as_str().as_bytes())
    }

    async fn delete(&self, key: &PaymentKey) -> Result<()> {
        let _guard = self.ledger_guard.lock();
        self.db.delete_cf(self.cf(CF_PAYMENTS)?, key.as_str().as_bytes())?;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<PaymentRecord>> {
        self.scan(CF_PAYMENTS)
    }
}

#[async_trait]
impl EntityStore for RocksDBStore {
    async fn store(&self, entity: EigenEntity) -> Result<()> {
        self.put(CF_ENTITIES, entity.id.as_str().as_bytes(), &entity)
    }

    async fn get(&self, id: &EntityId) -> Result<Option<EigenEntity>> {
        self.read(CF_ENTITIES, id.as_str().as_bytes())
    }

    async fn get_all(&self) -> Result<Vec<EigenEntity>> {
        self.scan(CF_ENTITIES)
    }
}

#[async_trait]
impl PoolStore for RocksDBStore {
    async fn store(&self, key: &PoolCacheKey, descriptor: PoolDescriptor) -> Result<()> {
        self.put(CF_POOLS, key.storage_key().as_bytes(), &descriptor)
    }

    async fn get(&self, key: &PoolCacheKey) -> Result<Option<PoolDescriptor>> {
        self.read(CF_POOLS, key.storage_key().as_bytes())
    }
}
