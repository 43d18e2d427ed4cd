use crate::domain::entity::{EigenEntity, EntityId};
use crate::domain::payment::{PaymentKey, PaymentRecord};
use crate::domain::pool::PoolDescriptor;
use crate::domain::ports::{EntityStore, PaymentLedger, PoolCacheKey, PoolStore};
use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for payments, entities and pool descriptors.
///
/// Each table is an `Arc<RwLock<HashMap<..>>>`, so clones share state. The
/// payment ledger's insert-if-absent runs under a single write guard, which
/// makes it atomic across tasks.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    payments: Arc<RwLock<HashMap<PaymentKey, PaymentRecord>>>,
    entities: Arc<RwLock<HashMap<EntityId, EigenEntity>>>,
    pools: Arc<RwLock<HashMap<String, PoolDescriptor>>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct ledger lookup that cannot fail.
    pub async fn payment(&self, key: &PaymentKey) -> Option<PaymentRecord> {
        self.payments.read().await.get(key).cloned()
    }

    pub async fn entity(&self, id: &EntityId) -> Option<EigenEntity> {
        self.entities.read().await.get(id).cloned()
    }

    pub async fn store_pool(&self, key: &PoolCacheKey, descriptor: PoolDescriptor) {
        self.pools.write().await.insert(key.storage_key(), descriptor);
    }

    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryStore {
    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<bool> {
        let mut payments = self.payments.write().await;
        match payments.entry(record.key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn update(&self, record: PaymentRecord) -> Result<()> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(&record.key) {
            Some(existing) => {
                *existing = record;
                Ok(())
            }
            None => Err(KeeperError::NotFound(format!("payment {}", record.key))),
        }
    }

    async fn get(&self, key: &PaymentKey) -> Result<Option<PaymentRecord>> {
        Ok(self.payment(key).await)
    }

    async fn delete(&self, key: &PaymentKey) -> Result<()> {
        self.payments.write().await.remove(key);
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<PaymentRecord>> {
        let payments = self.payments.read().await;
        Ok(payments.values().cloned().collect())
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn store(&self, entity: EigenEntity) -> Result<()> {
        let mut entities = self.entities.write().await;
        entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn get(&self, id: &EntityId) -> Result<Option<EigenEntity>> {
        Ok(self.entity(id).await)
    }

    async fn get_all(&self) -> Result<Vec<EigenEntity>> {
        let entities = self.entities.read().await;
        Ok(entities.values().cloned().collect())
    }
}

#[async_trait]
impl PoolStore for InMemoryStore {
    async fn store(&self, key: &PoolCacheKey, descriptor: PoolDescriptor) -> Result<()> {
        self.store_pool(key, descriptor).await;
        Ok(())
    }

    async fn get(&self, key: &PoolCacheKey) -> Result<Option<PoolDescriptor>> {
        let pools = self.pools.read().await;
        Ok(pools.get(&key.storage_key()).cloned())
    }
}
