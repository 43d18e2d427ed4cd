use super::bounded;
use super::cache::CacheService;
use super::gate::{Admission, PaymentGate};
use super::ownership::OwnershipChain;
use super::pool_resolver::PoolResolver;
use super::tasks::{BackgroundTasks, InFlight};
use crate::config::{KeeperConfig, Timeouts};
use crate::domain::allocation::Allocation;
use crate::domain::entity::{EigenEntity, EntityId, EntityStatus, TxRefs};
use crate::domain::launch::{LaunchOutcome, LaunchRequest, TokenMetadata};
use crate::domain::payment::{PaymentKey, PaymentProof, Settlement};
use crate::domain::ports::{ChainClientRef, DeployParams, DeployReceipt, EntityStoreRef, KeyDeriverRef, PoolCacheKey};
use crate::domain::primitives::{Address, ChainId, Hash};
use crate::domain::strategy::ChainStrategy;
use crate::error::{KeeperError, Result};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How the post-deployment phase ended.
enum Phase {
    Completed,
    Stopped(String),
}

/// The value-moving on-chain writes of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Deploy,
    Seed,
    Treasury,
}

impl Write {
    const ALL: [Write; 3] = [Write::Deploy, Write::Seed, Write::Treasury];

    fn name(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Seed => "seed_liquidity",
            Self::Treasury => "deposit_treasury",
        }
    }

    fn task_key(self, entity_id: &EntityId) -> String {
        format!("{}:{entity_id}", self.name())
    }

    /// Where the entity waits while this write is unconfirmed or failed.
    fn pending_status(self) -> EntityStatus {
        match self {
            Self::Deploy | Self::Treasury => EntityStatus::PendingFunding,
            Self::Seed => EntityStatus::PendingLp,
        }
    }
}

/// What a confirmed write changes on its entity.
enum Effect {
    Deployed(DeployReceipt),
    Seeded(Hash),
    Deposited(Hash),
}

/// Outcome of a write as seen by the caller that dispatched it.
enum Dispatch<T> {
    Confirmed(T),
    Failed(KeeperError),
    /// The deadline passed first. The entity was parked in the write's
    /// pending status; a late receipt is applied to the stored entity.
    Unconfirmed,
}

/// Sequences a launch: payment, deployment, liquidity, treasury, identity.
///
/// Everything up to dispatching the deployment is undone by releasing the
/// payment lock. From the deployment on, value has left custody: failures
/// leave the entity in `pending_lp` or `pending_funding` and the lock stays.
pub struct LaunchOrchestrator {
    config: KeeperConfig,
    gate: Arc<PaymentGate>,
    resolver: Arc<PoolResolver>,
    ownership: Arc<OwnershipChain>,
    chain: ChainClientRef,
    entities: EntityStoreRef,
    keys: KeyDeriverRef,
    cache: Arc<CacheService>,
    tasks: BackgroundTasks,
}

impl LaunchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: KeeperConfig,
        gate: Arc<PaymentGate>,
        resolver: Arc<PoolResolver>,
        ownership: Arc<OwnershipChain>,
        chain: ChainClientRef,
        entities: EntityStoreRef,
        keys: KeyDeriverRef,
        cache: Arc<CacheService>,
        tasks: BackgroundTasks,
    ) -> Self {
        Self {
            config,
            gate,
            resolver,
            ownership,
            chain,
            entities,
            keys,
            cache,
            tasks,
        }
    }

    pub async fn execute_launch(&self, request: &LaunchRequest) -> Result<LaunchOutcome> {
        let metadata = request.validate(&self.config.wallets, &self.config.text)?;
        let strategy = ChainStrategy::select(&self.config.chains, request.chain_id)?;
        let proof = PaymentProof::from_header(&request.payment_header)?;

        let claimed = format!("{:#x}", proof.claimed_payer());
        if !self.cache.limits.try_acquire(&claimed) {
            return Err(KeeperError::RateLimited(format!("too many launches from {claimed}")));
        }

        // Refuse a payment that cannot cover the launch before it is settled.
        Allocation::split(proof.value()?, request.wallet_count, &self.config.fees)?;

        let entity_id = EntityId::generate();
        let _workflow = self
            .tasks
            .claim(workflow_key(&entity_id))
            .ok_or_else(|| KeeperError::Validation(format!("entity {entity_id} is already being launched")))?;
        let Admission { key, settlement } = self
            .gate
            .admit(&proof, &request.requirements, "launch", Some(entity_id.clone()))
            .await?;

        let (owner, owner_override_rejected) =
            resolve_owner(request, settlement.payer, &metadata.symbol, request.chain_id, &key);

        let mut entity = match self
            .prepare(entity_id, owner, &metadata, request, &key, &settlement)
            .await
        {
            Ok(entity) => entity,
            Err(err) => {
                warn!(payment_key = %key, error = %err, "launch aborted before deployment");
                if let Err(release_err) = self.gate.release(&key).await {
                    warn!(payment_key = %key, error = %release_err, "failed to release payment lock");
                }
                return Err(err);
            }
        };

        if let Err(err) = self.deploy_and_seed(&mut entity, &strategy, &metadata).await {
            if !entity.status.value_delivered() {
                warn!(payment_key = %key, error = %err, "launch failed before any value moved");
                if let Err(release_err) = self.gate.release(&key).await {
                    warn!(payment_key = %key, error = %release_err, "failed to release payment lock");
                }
            }
            return Err(err);
        }
        if entity.status.is_partial_failure() {
            warn!(entity_id = %entity.id, status = %entity.status, "launch parked awaiting retry");
        } else {
            info!(entity_id = %entity.id, status = %entity.status, "launch completed");
        }

        Ok(LaunchOutcome {
            entity_id: entity.id.clone(),
            token: entity.token,
            owner: entity.owner,
            status: entity.status,
            allocation: entity.allocation,
            tx_refs: entity.tx_refs.clone(),
            owner_override_rejected,
        })
    }

    /// Computes the split, derives wallets and records the verified entity.
    async fn prepare(
        &self,
        id: EntityId,
        owner: Address,
        metadata: &TokenMetadata,
        request: &LaunchRequest,
        key: &PaymentKey,
        settlement: &Settlement,
    ) -> Result<EigenEntity> {
        let allocation = Allocation::split(settlement.amount, request.wallet_count, &self.config.fees)?;
        let wallets = (0..request.wallet_count)
            .map(|index| self.keys.derive(&id, index).map(|sub| sub.address))
            .collect::<Result<Vec<_>>>()?;

        let now = Utc::now();
        let mut entity = EigenEntity {
            id,
            owner,
            chain_id: request.chain_id,
            status: EntityStatus::Unfunded,
            name: metadata.name.clone(),
            symbol: metadata.symbol.clone(),
            token: None,
            pool: None,
            agent_identity_id: None,
            identity_minted: false,
            wallets,
            allocation,
            payment_key: key.to_string(),
            tx_refs: TxRefs {
                settlement: settlement.settlement_ref.clone(),
                ..TxRefs::default()
            },
            created_at: now,
            updated_at: now,
        };
        entity.advance(EntityStatus::PaymentLocked)?;
        entity.advance(EntityStatus::PaymentVerified)?;
        store(&self.entities, &entity, self.config.timeouts).await?;
        info!(entity_id = %entity.id, status = %entity.status, "entity recorded");
        Ok(entity)
    }

    async fn deploy_and_seed(
        &self,
        entity: &mut EigenEntity,
        strategy: &ChainStrategy,
        metadata: &TokenMetadata,
    ) -> Result<()> {
        let params = DeployParams {
            entity_id: entity.id.clone(),
            name: metadata.name.clone(),
            symbol: metadata.symbol.clone(),
            description: metadata.description.clone(),
            owner: entity.owner,
            wallets: entity.wallets.clone(),
            protocol: strategy.launch_protocol(),
            value: entity.allocation.deploy,
        };
        let chain = self.chain.clone();
        let chain_id = entity.chain_id;
        let deployed = self
            .submit(
                entity,
                Write::Deploy,
                async move { chain.deploy_token(chain_id, &params).await },
                Effect::Deployed,
            )
            .await?;

        let receipt = match deployed {
            Dispatch::Confirmed(receipt) => receipt,
            Dispatch::Failed(err) => {
                warn!(entity_id = %entity.id, error = %err, "deployment failed after dispatch");
                self.record(entity, EntityStatus::PendingFunding).await?;
                return Ok(());
            }
            Dispatch::Unconfirmed => return Ok(()),
        };

        entity.token = Some(receipt.token);
        entity.tx_refs.deploy = Some(receipt.tx_hash);
        if let Some(pool) = receipt.pool.filter(|pool| pool.contains(&receipt.token)) {
            self.resolver
                .remember(PoolCacheKey::new(chain_id, receipt.token, Some(entity.id.clone())), pool.clone())
                .await;
            entity.pool = Some(pool);
        }
        self.record(entity, EntityStatus::TokenDeployed).await?;

        self.liquidity_phase(entity, strategy).await?;
        Ok(())
    }

    /// Price check, seeding and treasury deposit; shared by launch and retry.
    async fn liquidity_phase(&self, entity: &mut EigenEntity, strategy: &ChainStrategy) -> Result<Phase> {
        let token = entity
            .token
            .ok_or_else(|| KeeperError::Validation(format!("entity {} has no token", entity.id)))?;

        let pool = match entity.pool.clone() {
            Some(pool) => Some(pool),
            None => self.resolver.resolve(strategy, token, Some(&entity.id)).await,
        };
        let Some(pool) = pool else {
            return self.stop(entity, EntityStatus::PendingLp, "no trading venue found").await;
        };
        entity.pool = Some(pool.clone());

        let price = bounded("chain", self.config.timeouts.read(), self.chain.pool_price(&pool)).await;
        match price {
            Ok(price) if !price.is_zero() => debug!(entity_id = %entity.id, %price, "venue price read"),
            Ok(_) => return self.stop(entity, EntityStatus::PendingLp, "venue is not initialised").await,
            Err(err) => return self.stop(entity, EntityStatus::PendingLp, &err.to_string()).await,
        }

        self.record(entity, EntityStatus::LiquiditySeeding).await?;

        let chain = self.chain.clone();
        let amount = entity.allocation.liquidity;
        let seed_pool = pool.clone();
        let seeded = self
            .submit(
                entity,
                Write::Seed,
                async move { chain.seed_liquidity(&seed_pool, token, amount).await },
                Effect::Seeded,
            )
            .await?;
        match seeded {
            Dispatch::Confirmed(tx) => entity.tx_refs.seed_liquidity = Some(tx),
            Dispatch::Failed(err) => return self.stop(entity, EntityStatus::PendingLp, &err.to_string()).await,
            Dispatch::Unconfirmed => return Ok(unconfirmed(Write::Seed)),
        }

        self.treasury_phase(entity, token).await
    }

    async fn treasury_phase(&self, entity: &mut EigenEntity, token: Address) -> Result<Phase> {
        let chain = self.chain.clone();
        let chain_id = entity.chain_id;
        let id = entity.id.clone();
        let amount = entity.allocation.treasury;
        let deposited = self
            .submit(
                entity,
                Write::Treasury,
                async move { chain.deposit_treasury(chain_id, &id, token, amount).await },
                Effect::Deposited,
            )
            .await?;
        match deposited {
            Dispatch::Confirmed(tx) => entity.tx_refs.treasury_deposit = Some(tx),
            Dispatch::Failed(err) => {
                return self.stop(entity, EntityStatus::PendingFunding, &err.to_string()).await;
            }
            Dispatch::Unconfirmed => return Ok(unconfirmed(Write::Treasury)),
        }

        self.record(entity, EntityStatus::Active).await?;
        self.enqueue_identity_mint(entity);
        Ok(Phase::Completed)
    }

    pub async fn retry_liquidity(&self, entity_id: &EntityId, caller: Address) -> Result<EigenEntity> {
        let _workflow = self.exclusive(entity_id)?;
        let mut entity = self.authorized(entity_id, caller).await?;
        expect_status(&entity, EntityStatus::PendingLp)?;
        let strategy = ChainStrategy::select(&self.config.chains, entity.chain_id)?;
        if let Some(pool) = &entity.pool
            && !self.resolver.is_live(pool).await
        {
            debug!(entity_id = %entity_id, pool = %pool.pool, "recorded venue is dead, resolving again");
            entity.pool = None;
        }
        let phase = self.liquidity_phase(&mut entity, &strategy).await?;
        finish(entity, phase)
    }

    pub async fn retry_funding(&self, entity_id: &EntityId, caller: Address) -> Result<EigenEntity> {
        let _workflow = self.exclusive(entity_id)?;
        let mut entity = self.authorized(entity_id, caller).await?;
        expect_status(&entity, EntityStatus::PendingFunding)?;
        let Some(token) = entity.token else {
            return Err(KeeperError::Validation(format!(
                "entity {entity_id} has no token; deployment outcome unknown"
            )));
        };
        let phase = self.treasury_phase(&mut entity, token).await?;
        finish(entity, phase)
    }

    pub async fn retry_identity(&self, entity_id: &EntityId, caller: Address) -> Result<EigenEntity> {
        let _workflow = self.exclusive(entity_id)?;
        let entity = self.authorized(entity_id, caller).await?;
        expect_status(&entity, EntityStatus::Active)?;
        if entity.identity_minted {
            return Err(KeeperError::Validation(format!("entity {entity_id} already has an identity")));
        }
        let strategy = ChainStrategy::select(&self.config.chains, entity.chain_id)?;
        if !strategy.profile().identity_registry {
            return Err(KeeperError::Validation(format!(
                "chain {} has no identity registry",
                entity.chain_id
            )));
        }
        if self.tasks.is_in_flight(&mint_task_key(entity_id)) {
            return Err(KeeperError::Validation(format!(
                "identity mint for {entity_id} already in progress"
            )));
        }

        mint_identity(self.chain.clone(), self.entities.clone(), entity_id.clone(), self.config.timeouts)
            .await
            .map_err(|err| KeeperError::PartialFailure {
                entity_id: entity_id.clone(),
                status: entity.status,
                reason: err.to_string(),
            })
    }

    /// Claims the entity for one workflow at a time. Writes still awaiting
    /// confirmation also block it: their receipts are not recorded yet.
    fn exclusive(&self, entity_id: &EntityId) -> Result<InFlight> {
        let workflow = self.tasks.claim(workflow_key(entity_id)).ok_or_else(|| {
            KeeperError::Validation(format!("entity {entity_id} already has a workflow in progress"))
        })?;
        if let Some(write) = Write::ALL
            .into_iter()
            .find(|write| self.tasks.is_in_flight(&write.task_key(entity_id)))
        {
            return Err(KeeperError::Validation(format!(
                "{} for entity {entity_id} is still awaiting confirmation",
                write.name()
            )));
        }
        Ok(workflow)
    }

    async fn authorized(&self, entity_id: &EntityId, caller: Address) -> Result<EigenEntity> {
        let entity = load(&self.entities, entity_id, self.config.timeouts).await?;
        if !self
            .ownership
            .verify(entity_id, caller, Some(entity.owner), Some(entity.chain_id))
            .await
        {
            return Err(KeeperError::Auth(format!(
                "{caller:#x} is not authorised for entity {entity_id}"
            )));
        }
        Ok(entity)
    }

    /// Records `status` unless the entity already is in it.
    async fn record(&self, entity: &mut EigenEntity, status: EntityStatus) -> Result<()> {
        if entity.status != status {
            entity.advance(status)?;
        }
        store(&self.entities, entity, self.config.timeouts).await?;
        info!(entity_id = %entity.id, status = %entity.status, "entity status recorded");
        Ok(())
    }

    async fn stop(&self, entity: &mut EigenEntity, status: EntityStatus, reason: &str) -> Result<Phase> {
        warn!(entity_id = %entity.id, %status, reason, "launch step failed; awaiting retry");
        self.record(entity, status).await?;
        Ok(Phase::Stopped(reason.to_string()))
    }

    /// Runs an on-chain write in its own task, so neither the caller giving
    /// up nor the deadline cancels it.
    ///
    /// On expiry the entity is parked in the write's pending status before the
    /// result channel is closed. Whichever side ends up holding a late receipt
    /// applies it to the stored entity, so a write that lands is never lost.
    async fn submit<T, F>(
        &self,
        entity: &mut EigenEntity,
        write: Write,
        call: F,
        effect: fn(T) -> Effect,
    ) -> Result<Dispatch<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, mut rx) = oneshot::channel::<Result<T>>();
        let entities = self.entities.clone();
        let id = entity.id.clone();
        let timeouts = self.config.timeouts;
        let spawned = self.tasks.spawn(write.task_key(&entity.id), async move {
            match tx.send(call.await) {
                Ok(()) => {}
                Err(Ok(value)) => {
                    if let Err(err) = apply_late(&entities, &id, effect(value), timeouts).await {
                        warn!(entity_id = %id, write = write.name(), error = %err, "late receipt not recorded");
                    }
                }
                Err(Err(err)) => {
                    warn!(entity_id = %id, write = write.name(), error = %err, "unconfirmed write failed");
                }
            }
        });
        if !spawned {
            return Err(KeeperError::Validation(format!(
                "{} for entity {} is already in flight",
                write.name(),
                entity.id
            )));
        }

        let limit = timeouts.transaction();
        match tokio::time::timeout(limit, &mut rx).await {
            Ok(Ok(Ok(value))) => Ok(Dispatch::Confirmed(value)),
            Ok(Ok(Err(err))) => Ok(Dispatch::Failed(err)),
            Ok(Err(_)) => Ok(Dispatch::Failed(KeeperError::Internal(
                format!("{} task for entity {} ended without a result", write.name(), entity.id).into(),
            ))),
            Err(_) => {
                warn!(
                    entity_id = %entity.id,
                    write = write.name(),
                    limit_ms = limit.as_millis() as u64,
                    "write not confirmed in time; parking entity"
                );
                self.record(entity, write.pending_status()).await?;
                rx.close();
                match rx.try_recv() {
                    Ok(Ok(value)) => {
                        let landed = apply_late(&self.entities, &entity.id, effect(value), timeouts).await?;
                        *entity = landed;
                    }
                    Ok(Err(err)) => {
                        warn!(entity_id = %entity.id, write = write.name(), error = %err, "unconfirmed write failed");
                    }
                    Err(_) => {}
                }
                Ok(Dispatch::Unconfirmed)
            }
        }
    }

    fn enqueue_identity_mint(&self, entity: &EigenEntity) {
        let registry = self
            .config
            .chains
            .iter()
            .find(|profile| profile.chain_id == entity.chain_id)
            .is_some_and(|profile| profile.identity_registry);
        if !registry || entity.identity_minted {
            return;
        }
        let chain = self.chain.clone();
        let entities = self.entities.clone();
        let id = entity.id.clone();
        let timeouts = self.config.timeouts;
        self.tasks.spawn(mint_task_key(&entity.id), async move {
            if let Err(err) = mint_identity(chain, entities, id.clone(), timeouts).await {
                warn!(entity_id = %id, error = %err, "identity mint failed; retry available");
            }
        });
    }
}

fn mint_task_key(entity_id: &EntityId) -> String {
    format!("identity-mint:{entity_id}")
}

/// Mints the identity token and records it on the stored entity.
async fn mint_identity(
    chain: ChainClientRef,
    entities: EntityStoreRef,
    entity_id: EntityId,
    timeouts: Timeouts,
) -> Result<EigenEntity> {
    let entity = load(&entities, &entity_id, timeouts).await?;
    let (identity, tx) = bounded(
        "chain",
        timeouts.transaction(),
        chain.mint_identity(entity.chain_id, &entity_id, entity.owner),
    )
    .await?;

    // Reload: the entity may have moved on while the mint was in flight.
    let mut entity = load(&entities, &entity_id, timeouts).await?;
    entity.agent_identity_id = Some(identity);
    entity.identity_minted = true;
    entity.tx_refs.identity_mint = Some(tx);
    entity.updated_at = Utc::now();
    store(&entities, &entity, timeouts).await?;
    info!(entity_id = %entity_id, %identity, "identity minted");
    Ok(entity)
}

/// Records a write that was confirmed after its caller stopped waiting.
///
/// The receipt is always kept; the status only moves when the stored entity
/// is still parked where the write left it.
async fn apply_late(
    entities: &EntityStoreRef,
    entity_id: &EntityId,
    effect: Effect,
    timeouts: Timeouts,
) -> Result<EigenEntity> {
    let mut entity = load(entities, entity_id, timeouts).await?;
    let next = match effect {
        Effect::Deployed(receipt) => {
            entity.token = Some(receipt.token);
            entity.tx_refs.deploy = Some(receipt.tx_hash);
            if entity.pool.is_none() {
                entity.pool = receipt.pool.filter(|pool| pool.contains(&receipt.token));
            }
            EntityStatus::PendingLp
        }
        Effect::Seeded(tx) => {
            entity.tx_refs.seed_liquidity = Some(tx);
            EntityStatus::PendingFunding
        }
        Effect::Deposited(tx) => {
            entity.tx_refs.treasury_deposit = Some(tx);
            EntityStatus::Active
        }
    };
    if entity.status.can_transition_to(next) {
        entity.advance(next)?;
    } else {
        debug!(entity_id = %entity_id, status = %entity.status, %next, "late receipt recorded without status change");
        entity.updated_at = Utc::now();
    }
    store(entities, &entity, timeouts).await?;
    info!(entity_id = %entity_id, status = %entity.status, "late write confirmation recorded");
    Ok(entity)
}

pub(super) async fn load(entities: &EntityStoreRef, entity_id: &EntityId, timeouts: Timeouts) -> Result<EigenEntity> {
    bounded("storage", timeouts.read(), entities.get(entity_id))
        .await?
        .ok_or_else(|| KeeperError::NotFound(format!("entity {entity_id}")))
}

async fn store(entities: &EntityStoreRef, entity: &EigenEntity, timeouts: Timeouts) -> Result<()> {
    bounded("storage", timeouts.read(), entities.store(entity.clone())).await
}

fn workflow_key(entity_id: &EntityId) -> String {
    format!("workflow:{entity_id}")
}

fn unconfirmed(write: Write) -> Phase {
    Phase::Stopped(format!("{} not confirmed in time", write.name()))
}

fn expect_status(entity: &EigenEntity, expected: EntityStatus) -> Result<()> {
    if entity.status != expected {
        return Err(KeeperError::Validation(format!(
            "entity {} is {}, expected {expected}",
            entity.id, entity.status
        )));
    }
    Ok(())
}

fn finish(entity: EigenEntity, phase: Phase) -> Result<EigenEntity> {
    match phase {
        Phase::Completed => Ok(entity),
        Phase::Stopped(reason) => Err(KeeperError::PartialFailure {
            entity_id: entity.id,
            status: entity.status,
            reason,
        }),
    }
}

/// The payer owns the launch unless they signed it over to someone else.
fn resolve_owner(
    request: &LaunchRequest,
    payer: Address,
    symbol: &str,
    chain_id: ChainId,
    key: &PaymentKey,
) -> (Address, bool) {
    match &request.owner_override {
        None => (payer, false),
        Some(grant) if grant.is_signed_by(&payer, symbol, chain_id, key) => {
            info!(payment_key = %key, owner = %format!("{:#x}", grant.owner), "owner override accepted");
            (grant.owner, false)
        }
        Some(grant) => {
            warn!(
                payment_key = %key,
                requested = %format!("{:#x}", grant.owner),
                "owner override not signed by payer; payer stays owner"
            );
            (payer, true)
        }
    }
}
