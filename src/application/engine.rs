use super::cache::{CacheService, Clock};
use super::gate::PaymentGate;
use super::orchestrator::{self, LaunchOrchestrator};
use super::ownership::OwnershipChain;
use super::pool_resolver::PoolResolver;
use super::tasks::BackgroundTasks;
use crate::config::KeeperConfig;
use crate::domain::entity::{EigenEntity, EntityId};
use crate::domain::launch::{LaunchOutcome, LaunchRequest};
use crate::domain::payment::{LockOutcome, PaymentKey, PaymentProof, PaymentRequirements, Settlement};
use crate::domain::pool::PoolDescriptor;
use crate::domain::ports::{
    ChainClientRef, EntityStoreRef, FacilitatorRef, IndexerRef, KeyDeriverRef, LedgerRef, LogSourceRef,
    PoolStoreRef,
};
use crate::domain::primitives::{Address, ChainId};
use crate::domain::strategy::ChainStrategy;
use crate::error::Result;
use std::sync::Arc;
use tracing::info;

/// Every external collaborator the engine is wired over.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: LedgerRef,
    pub entities: EntityStoreRef,
    pub pools: PoolStoreRef,
    pub chain: ChainClientRef,
    pub facilitator: FacilitatorRef,
    pub indexer: Option<IndexerRef>,
    pub log_sources: Vec<LogSourceRef>,
    pub keys: KeyDeriverRef,
}

/// The main entry point for the dispatch layer.
///
/// `KeeperEngine` owns the process-wide cache service and background task
/// tracker and exposes the core operations: payment locking and settlement,
/// pool resolution, ownership checks, launches and their retries.
pub struct KeeperEngine {
    gate: Arc<PaymentGate>,
    resolver: Arc<PoolResolver>,
    ownership: Arc<OwnershipChain>,
    orchestrator: LaunchOrchestrator,
    entities: EntityStoreRef,
    cache: Arc<CacheService>,
    tasks: BackgroundTasks,
    config: KeeperConfig,
}

impl KeeperEngine {
    /// Validates `config` and wires the services over `collaborators`.
    pub fn new(config: KeeperConfig, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let timeouts = config.timeouts;
        let cache = Arc::new(CacheService::new(config.pool_cache_ttl(), config.rate_limit, clock));
        let tasks = BackgroundTasks::new();

        let gate = Arc::new(PaymentGate::new(
            collaborators.ledger,
            collaborators.facilitator,
            config.retry,
            timeouts.read(),
            timeouts.transaction(),
            timeouts.read(),
        ));
        let resolver = Arc::new(PoolResolver::new(
            collaborators.chain.clone(),
            collaborators.pools,
            collaborators.indexer,
            collaborators.log_sources,
            cache.clone(),
            timeouts,
            config.indexer_max_pages,
        ));
        let ownership = Arc::new(OwnershipChain::new(
            collaborators.chain.clone(),
            collaborators.entities.clone(),
            timeouts.read(),
        ));
        let orchestrator = LaunchOrchestrator::new(
            config.clone(),
            gate.clone(),
            resolver.clone(),
            ownership.clone(),
            collaborators.chain,
            collaborators.entities.clone(),
            collaborators.keys,
            cache.clone(),
            tasks.clone(),
        );

        Ok(Self {
            gate,
            resolver,
            ownership,
            orchestrator,
            entities: collaborators.entities,
            cache,
            tasks,
            config,
        })
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub async fn lock_payment(&self, key: &PaymentKey, product_ref: &str) -> Result<LockOutcome> {
        self.gate.lock(key, product_ref).await
    }

    pub async fn release_payment(&self, key: &PaymentKey) -> Result<()> {
        self.gate.release(key).await
    }

    pub async fn verify_and_settle(
        &self,
        proof: &PaymentProof,
        requirements: &PaymentRequirements,
    ) -> Result<Settlement> {
        self.gate.verify_and_settle(proof, requirements).await
    }

    /// Finds the live venue of `token`; `Ok(None)` once every lookup missed.
    pub async fn resolve_pool(
        &self,
        chain_id: ChainId,
        token: Address,
        entity: Option<&EntityId>,
    ) -> Result<Option<PoolDescriptor>> {
        let strategy = ChainStrategy::select(&self.config.chains, chain_id)?;
        Ok(self.resolver.resolve(&strategy, token, entity).await)
    }

    pub async fn verify_ownership(
        &self,
        entity_id: &EntityId,
        claimed: Address,
        stored_owner: Option<Address>,
        chain_id: Option<ChainId>,
    ) -> bool {
        self.ownership
            .verify(entity_id, claimed, stored_owner, chain_id)
            .await
    }

    pub async fn execute_launch(&self, request: &LaunchRequest) -> Result<LaunchOutcome> {
        self.orchestrator.execute_launch(request).await
    }

    pub async fn retry_liquidity(&self, entity_id: &EntityId, caller: Address) -> Result<EigenEntity> {
        self.orchestrator.retry_liquidity(entity_id, caller).await
    }

    pub async fn retry_funding(&self, entity_id: &EntityId, caller: Address) -> Result<EigenEntity> {
        self.orchestrator.retry_funding(entity_id, caller).await
    }

    pub async fn retry_identity(&self, entity_id: &EntityId, caller: Address) -> Result<EigenEntity> {
        self.orchestrator.retry_identity(entity_id, caller).await
    }

    pub async fn entity(&self, entity_id: &EntityId) -> Result<EigenEntity> {
        orchestrator::load(&self.entities, entity_id, self.config.timeouts).await
    }

    /// Waits for background work such as identity mints to finish.
    pub async fn shutdown(&self) {
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, "waiting for background tasks");
        }
        self.tasks.drain().await;
        let purged = self.cache.pools.purge();
        info!(purged, "keeper engine stopped");
    }
}
