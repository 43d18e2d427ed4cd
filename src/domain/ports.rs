//! Outbound ports: every collaborator the keeper core talks to.

use super::entity::{EigenEntity, EntityId};
use super::payment::{
    PaymentKey, PaymentProof, PaymentRecord, PaymentRequirements, SettleResponse, VerifyResponse,
};
use super::pool::{LogEntry, PoolDescriptor, ProtocolVersion};
use super::primitives::{Address, ChainId, Hash, U256};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persistent ledger of payment keys.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Inserts `record` unless its key is present. Returns whether it was inserted.
    ///
    /// Implementations must make this atomic: it is the only concurrency
    /// primitive the payment gate relies on.
    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<bool>;
    async fn update(&self, record: PaymentRecord) -> Result<()>;
    async fn get(&self, key: &PaymentKey) -> Result<Option<PaymentRecord>>;
    async fn delete(&self, key: &PaymentKey) -> Result<()>;
    async fn get_all(&self) -> Result<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn store(&self, entity: EigenEntity) -> Result<()>;
    async fn get(&self, id: &EntityId) -> Result<Option<EigenEntity>>;
    async fn get_all(&self) -> Result<Vec<EigenEntity>>;
}

/// Cache key for pool descriptors: a token, optionally scoped to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolCacheKey {
    pub chain_id: ChainId,
    pub token: Address,
    pub entity: Option<EntityId>,
}

impl PoolCacheKey {
    pub fn new(chain_id: ChainId, token: Address, entity: Option<EntityId>) -> Self {
        Self {
            chain_id,
            token,
            entity,
        }
    }

    /// The same token without the entity scope.
    pub fn unscoped(&self) -> Self {
        Self {
            chain_id: self.chain_id,
            token: self.token,
            entity: None,
        }
    }

    pub fn storage_key(&self) -> String {
        match &self.entity {
            Some(entity) => format!("{}:{:#x}:{entity}", self.chain_id, self.token),
            None => format!("{}:{:#x}", self.chain_id, self.token),
        }
    }
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    async fn store(&self, key: &PoolCacheKey, descriptor: PoolDescriptor) -> Result<()>;
    async fn get(&self, key: &PoolCacheKey) -> Result<Option<PoolDescriptor>>;
}

/// Parameters of a token deployment transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployParams {
    pub entity_id: EntityId,
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub owner: Address,
    pub wallets: Vec<Address>,
    pub protocol: ProtocolVersion,
    /// Value sent with the deployment.
    pub value: U256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    pub tx_hash: Hash,
    pub token: Address,
    /// Venue created by the deployment, when the factory reports it.
    pub pool: Option<PoolDescriptor>,
}

/// Read and write access to one or more EVM chains.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current price of a pool: `sqrtPriceX96` for v3/v4, reserve product for v2.
    /// Zero means uninitialised.
    async fn pool_price(&self, pool: &PoolDescriptor) -> Result<U256>;

    /// Factory lookup for contract-addressed pools.
    async fn factory_pool(
        &self,
        chain_id: ChainId,
        protocol: ProtocolVersion,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Option<Address>>;

    /// Holder of a delegated identity token.
    async fn identity_holder(&self, chain_id: ChainId, identity_id: U256) -> Result<Option<Address>>;

    /// Owner recorded by the custody contract for an entity.
    async fn custody_owner(&self, chain_id: ChainId, entity: &EntityId) -> Result<Option<Address>>;

    async fn deploy_token(&self, chain_id: ChainId, params: &DeployParams) -> Result<DeployReceipt>;

    async fn seed_liquidity(&self, pool: &PoolDescriptor, token: Address, amount: U256) -> Result<Hash>;

    async fn deposit_treasury(
        &self,
        chain_id: ChainId,
        entity: &EntityId,
        token: Address,
        amount: U256,
    ) -> Result<Hash>;

    /// Mints an identity token to `owner`; returns the token id and tx hash.
    async fn mint_identity(&self, chain_id: ChainId, entity: &EntityId, owner: Address) -> Result<(U256, Hash)>;
}

/// One read endpoint able to answer ranged log queries.
#[async_trait]
pub trait LogSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Initialize` logs of the singleton pool manager for `pool_id`.
    async fn initialize_logs(&self, chain_id: ChainId, pool_id: Hash) -> Result<Vec<LogEntry>>;
}

/// Settles payment proofs against a payment network.
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify(&self, proof: &PaymentProof, requirements: &PaymentRequirements) -> Result<VerifyResponse>;
    async fn settle(&self, proof: &PaymentProof, requirements: &PaymentRequirements) -> Result<SettleResponse>;
}

/// How an indexer identifies a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueCandidate {
    pub protocol: ProtocolVersion,
    /// Pool contract address (v2/v3) or pool id (v4), hex.
    pub pool: String,
    /// The other side of the pair, when reported.
    pub paired_token: Option<Address>,
    pub fee: Option<u32>,
    pub liquidity_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenuePage {
    pub venues: Vec<VenueCandidate>,
    pub next_cursor: Option<String>,
}

/// Best-effort external venue discovery.
#[async_trait]
pub trait VenueIndexer: Send + Sync {
    async fn discover(&self, chain_id: ChainId, token: Address, cursor: Option<String>) -> Result<VenuePage>;
}

/// A derived execution wallet. The key material stays with the deriver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubIdentity {
    pub index: u32,
    pub address: Address,
}

/// Deterministic wallet derivation from a parent secret the caller never sees.
pub trait KeyDeriver: Send + Sync {
    fn derive(&self, entity: &EntityId, index: u32) -> Result<SubIdentity>;
}

pub type LedgerRef = Arc<dyn PaymentLedger>;
pub type EntityStoreRef = Arc<dyn EntityStore>;
pub type PoolStoreRef = Arc<dyn PoolStore>;
pub type ChainClientRef = Arc<dyn ChainClient>;
pub type LogSourceRef = Arc<dyn LogSource>;
pub type FacilitatorRef = Arc<dyn Facilitator>;
pub type IndexerRef = Arc<dyn VenueIndexer>;
pub type KeyDeriverRef = Arc<dyn KeyDeriver>;
