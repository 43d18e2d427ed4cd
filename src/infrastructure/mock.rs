//! Scriptable collaborators for tests and local dry runs.

use crate::domain::entity::{EigenEntity, EntityId};
use crate::domain::payment::{
    PaymentKey, PaymentProof, PaymentRecord, PaymentRequirements, SettleResponse, VerifyResponse,
};
use crate::domain::pool::{InitializeEvent, LogEntry, PoolDescriptor, PoolKey, PoolRef, ProtocolVersion, sort_tokens};
use crate::domain::ports::{
    ChainClient, DeployParams, DeployReceipt, EntityStore, Facilitator, LogSource, PaymentLedger, PoolCacheKey,
    PoolStore, VenueCandidate, VenueIndexer, VenuePage,
};
use crate::domain::primitives::{Address, ChainId, Hash, U256, keccak256};
use crate::error::{KeeperError, Result};
use crate::infrastructure::in_memory::InMemoryStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Facilitator with a fixed verdict.
pub struct MockFacilitator {
    verdict: VerifyResponse,
    settlement: SettleResponse,
    fail_remaining: AtomicU32,
    delay: Duration,
    verify_calls: AtomicU32,
    settle_calls: AtomicU32,
}

impl MockFacilitator {
    pub fn accepting() -> Self {
        Self {
            verdict: VerifyResponse {
                is_valid: true,
                invalid_reason: None,
                payer: None,
            },
            settlement: SettleResponse {
                success: true,
                error_reason: None,
                transaction: Some("0x5e771e".to_string()),
                network: Some("base".to_string()),
                payer: None,
            },
            fail_remaining: AtomicU32::new(0),
            delay: Duration::ZERO,
            verify_calls: AtomicU32::new(0),
            settle_calls: AtomicU32::new(0),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        let mut facilitator = Self::accepting();
        facilitator.verdict.is_valid = false;
        facilitator.verdict.invalid_reason = Some(reason.to_string());
        facilitator
    }

    /// Verification passes but settlement is refused.
    pub fn settle_refusing(reason: &str) -> Self {
        let mut facilitator = Self::accepting();
        facilitator.settlement.success = false;
        facilitator.settlement.error_reason = Some(reason.to_string());
        facilitator
    }

    /// The first `n` verify calls fail with a transient error.
    pub fn failing_first(self, n: u32) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Reports `payer` as the settled payer.
    pub fn reporting_payer(mut self, payer: Address) -> Self {
        self.verdict.payer = Some(format!("{payer:#x}"));
        self.settlement.payer = Some(format!("{payer:#x}"));
        self
    }

    /// Sleeps before answering verify.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn verify_calls(&self) -> u32 {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn settle_calls(&self) -> u32 {
        self.settle_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Facilitator for MockFacilitator {
    async fn verify(&self, _proof: &PaymentProof, _requirements: &PaymentRequirements) -> Result<VerifyResponse> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(KeeperError::upstream("facilitator", "503 service unavailable"));
        }
        Ok(self.verdict.clone())
    }

    async fn settle(&self, _proof: &PaymentProof, _requirements: &PaymentRequirements) -> Result<SettleResponse> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.settlement.clone())
    }
}

/// Chain operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainCall {
    Price,
    FactoryLookup,
    IdentityHolder,
    CustodyOwner,
    Deploy,
    SeedLiquidity,
    Treasury,
    MintIdentity,
}

#[derive(Default)]
struct ChainState {
    prices_by_id: HashMap<Hash, U256>,
    prices_by_address: HashMap<Address, U256>,
    factory: HashMap<(ProtocolVersion, Address, Address, u32), Address>,
    identity_holders: HashMap<U256, Address>,
    custody: HashMap<EntityId, Address>,
    failing: HashSet<ChainCall>,
    calls: HashMap<ChainCall, u32>,
    delays: HashMap<ChainCall, Duration>,
    deploy_pool: bool,
    next_identity: u64,
    deployed: Vec<DeployParams>,
}

/// In-memory chain with scriptable state and failures.
///
/// By default deployments succeed, create a live v4 pool against the native
/// currency and report it in the receipt.
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                deploy_pool: true,
                next_identity: 1,
                ..ChainState::default()
            }),
        }
    }

    /// The token address a deployment for `entity` produces.
    pub fn token_for(entity: &EntityId) -> Address {
        Address::from_slice(&entity.on_chain_key().as_bytes()[12..])
    }

    /// The pool key a deployment for `entity` creates.
    pub fn launch_pool_key(entity: &EntityId) -> PoolKey {
        PoolKey::new(Self::token_for(entity), Address::zero(), 10_000, 200, Address::zero())
    }

    pub fn set_price_by_id(&self, id: Hash, price: U256) {
        self.state.lock().prices_by_id.insert(id, price);
    }

    pub fn set_price_by_address(&self, pool: Address, price: U256) {
        self.state.lock().prices_by_address.insert(pool, price);
    }

    pub fn add_factory_pool(&self, protocol: ProtocolVersion, a: Address, b: Address, fee: u32, pool: Address) {
        let (token0, token1) = sort_tokens(a, b);
        self.state.lock().factory.insert((protocol, token0, token1, fee), pool);
    }

    pub fn set_identity_holder(&self, identity: U256, holder: Address) {
        self.state.lock().identity_holders.insert(identity, holder);
    }

    pub fn set_custody_owner(&self, entity: &EntityId, owner: Address) {
        self.state.lock().custody.insert(entity.clone(), owner);
    }

    pub fn set_failing(&self, call: ChainCall, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(call);
        } else {
            state.failing.remove(&call);
        }
    }

    /// Every `call` sleeps for `delay` before it takes effect.
    pub fn set_delay(&self, call: ChainCall, delay: Duration) {
        self.state.lock().delays.insert(call, delay);
    }

    /// Deployments no longer report nor create a pool.
    pub fn without_deploy_pool(self) -> Self {
        self.state.lock().deploy_pool = false;
        self
    }

    pub fn calls(&self, call: ChainCall) -> u32 {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn deployments(&self) -> Vec<DeployParams> {
        self.state.lock().deployed.clone()
    }

    async fn enter(&self, call: ChainCall) -> Result<()> {
        let delay = self.state.lock().delays.get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        *state.calls.entry(call).or_insert(0) += 1;
        if state.failing.contains(&call) {
            return Err(KeeperError::upstream("chain", format!("{call:?} reverted")));
        }
        Ok(())
    }
}

fn tx_hash(label: &str, entity: &EntityId) -> Hash {
    keccak256(format!("{label}:{entity}").as_bytes())
}

#[async_trait]
impl ChainClient for MockChain {
    async fn pool_price(&self, pool: &PoolDescriptor) -> Result<U256> {
        self.enter(ChainCall::Price).await?;
        let state = self.state.lock();
        let price = match pool.pool {
            PoolRef::Id(id) => state.prices_by_id.get(&id),
            PoolRef::Address(address) => state.prices_by_address.get(&address),
        };
        Ok(price.copied().unwrap_or_default())
    }

    async fn factory_pool(
        &self,
        _chain_id: ChainId,
        protocol: ProtocolVersion,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Option<Address>> {
        self.enter(ChainCall::FactoryLookup).await?;
        let (token0, token1) = sort_tokens(token_a, token_b);
        Ok(self.state.lock().factory.get(&(protocol, token0, token1, fee)).copied())
    }

    async fn identity_holder(&self, _chain_id: ChainId, identity_id: U256) -> Result<Option<Address>> {
        self.enter(ChainCall::IdentityHolder).await?;
        Ok(self.state.lock().identity_holders.get(&identity_id).copied())
    }

    async fn custody_owner(&self, _chain_id: ChainId, entity: &EntityId) -> Result<Option<Address>> {
        self.enter(ChainCall::CustodyOwner).await?;
        Ok(self.state.lock().custody.get(entity).copied())
    }

    async fn deploy_token(&self, chain_id: ChainId, params: &DeployParams) -> Result<DeployReceipt> {
        self.enter(ChainCall::Deploy).await?;
        let token = Self::token_for(&params.entity_id);
        let mut state = self.state.lock();
        state.deployed.push(params.clone());
        state.custody.insert(params.entity_id.clone(), params.owner);
        let pool = if state.deploy_pool {
            let key = Self::launch_pool_key(&params.entity_id);
            state.prices_by_id.insert(key.pool_id(), U256::from(1u128 << 96));
            Some(PoolDescriptor::from_key(chain_id, &key, true))
        } else {
            None
        };
        Ok(DeployReceipt {
            tx_hash: tx_hash("deploy", &params.entity_id),
            token,
            pool,
        })
    }

    async fn seed_liquidity(&self, _pool: &PoolDescriptor, token: Address, _amount: U256) -> Result<Hash> {
        self.enter(ChainCall::SeedLiquidity).await?;
        Ok(keccak256(token.as_bytes()))
    }

    async fn deposit_treasury(
        &self,
        _chain_id: ChainId,
        entity: &EntityId,
        _token: Address,
        _amount: U256,
    ) -> Result<Hash> {
        self.enter(ChainCall::Treasury).await?;
        Ok(tx_hash("treasury", entity))
    }

    async fn mint_identity(&self, _chain_id: ChainId, entity: &EntityId, owner: Address) -> Result<(U256, Hash)> {
        self.enter(ChainCall::MintIdentity).await?;
        let mut state = self.state.lock();
        let id = U256::from(state.next_identity);
        state.next_identity += 1;
        state.identity_holders.insert(id, owner);
        Ok((id, tx_hash("identity", entity)))
    }
}

/// Indexer serving fixed pages; the cursor is the next page index.
#[derive(Default)]
pub struct MockIndexer {
    pages: Vec<Vec<VenueCandidate>>,
    failing: bool,
    calls: AtomicU32,
}

impl MockIndexer {
    pub fn with_pages(pages: Vec<Vec<VenueCandidate>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueIndexer for MockIndexer {
    async fn discover(&self, _chain_id: ChainId, _token: Address, cursor: Option<String>) -> Result<VenuePage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(KeeperError::upstream("indexer", "connection reset"));
        }
        let index = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| KeeperError::Validation(format!("bad cursor {raw}")))?,
            None => 0,
        };
        let venues = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(VenuePage { venues, next_cursor })
    }
}

/// Log endpoint backed by a list of entries.
pub struct MockLogSource {
    name: String,
    logs: Mutex<Vec<LogEntry>>,
    failing: bool,
    calls: AtomicU32,
}

impl MockLogSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            logs: Mutex::new(Vec::new()),
            failing: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            failing: true,
            ..Self::new(name)
        }
    }

    /// Records the `Initialize` log a pool manager emits for `key`.
    pub fn add_initialize(&self, key: &PoolKey, sqrt_price_x96: U256) {
        let event = InitializeEvent {
            id: key.pool_id(),
            key: *key,
            sqrt_price_x96,
            tick: 0,
        };
        let mut logs = self.logs.lock();
        let block = logs.len() as u64 + 1;
        logs.push(event.to_log(Address::repeat_byte(0x44), block));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize_logs(&self, _chain_id: ChainId, pool_id: Hash) -> Result<Vec<LogEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(KeeperError::upstream(self.name.clone(), "query timed out"));
        }
        let logs = self.logs.lock();
        Ok(logs
            .iter()
            .filter(|log| log.topics.get(1) == Some(&pool_id))
            .cloned()
            .collect())
    }
}

/// Storage operations that can be made to stall or fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreCall {
    LockPayment,
    UpdatePayment,
    ReadPayment,
    ReleasePayment,
    WriteEntity,
    ReadEntity,
    WritePool,
    ReadPool,
}

/// An `InMemoryStore` whose calls can be made to hang or error.
#[derive(Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    stalled: Mutex<HashSet<StoreCall>>,
    failing: Mutex<HashSet<StoreCall>>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// `call` never completes while stalled.
    pub fn set_stalled(&self, call: StoreCall, stalled: bool) {
        toggle(&self.stalled, call, stalled);
    }

    pub fn set_failing(&self, call: StoreCall, failing: bool) {
        toggle(&self.failing, call, failing);
    }

    async fn enter(&self, call: StoreCall) -> Result<()> {
        let stalled = self.stalled.lock().contains(&call);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.failing.lock().contains(&call) {
            return Err(KeeperError::Storage(format!("{call:?} failed")));
        }
        Ok(())
    }
}

fn toggle(set: &Mutex<HashSet<StoreCall>>, call: StoreCall, on: bool) {
    let mut set = set.lock();
    if on {
        set.insert(call);
    } else {
        set.remove(&call);
    }
}

#[async_trait]
impl PaymentLedger for FaultyStore {
    async fn insert_if_absent(&self, record: PaymentRecord) -> Result<bool> {
        self.enter(StoreCall::LockPayment).await?;
        self.inner.insert_if_absent(record).await
    }

    async fn update(&self, record: PaymentRecord) -> Result<()> {
        self.enter(StoreCall::UpdatePayment).await?;
        self.inner.update(record).await
    }

    async fn get(&self, key: &PaymentKey) -> Result<Option<PaymentRecord>> {
        self.enter(StoreCall::ReadPayment).await?;
        PaymentLedger::get(&self.inner, key).await
    }

    async fn delete(&self, key: &PaymentKey) -> Result<()> {
        self.enter(StoreCall::ReleasePayment).await?;
        self.inner.delete(key).await
    }

    async fn get_all(&self) -> Result<Vec<PaymentRecord>> {
        PaymentLedger::get_all(&self.inner).await
    }
}

#[async_trait]
impl EntityStore for FaultyStore {
    async fn store(&self, entity: EigenEntity) -> Result<()> {
        self.enter(StoreCall::WriteEntity).await?;
        EntityStore::store(&self.inner, entity).await
    }

    async fn get(&self, id: &EntityId) -> Result<Option<EigenEntity>> {
        self.enter(StoreCall::ReadEntity).await?;
        EntityStore::get(&self.inner, id).await
    }

    async fn get_all(&self) -> Result<Vec<EigenEntity>> {
        EntityStore::get_all(&self.inner).await
    }
}

#[async_trait]
impl PoolStore for FaultyStore {
    async fn store(&self, key: &PoolCacheKey, descriptor: PoolDescriptor) -> Result<()> {
        self.enter(StoreCall::WritePool).await?;
        PoolStore::store(&self.inner, key, descriptor).await
    }

    async fn get(&self, key: &PoolCacheKey) -> Result<Option<PoolDescriptor>> {
        self.enter(StoreCall::ReadPool).await?;
        PoolStore::get(&self.inner, key).await
    }
}
