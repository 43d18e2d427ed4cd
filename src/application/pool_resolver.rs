use super::bounded;
use super::cache::CacheService;
use crate::config::Timeouts;
use crate::domain::entity::EntityId;
use crate::domain::pool::{
    CANONICAL_FEE_TICKS, InitializeEvent, PoolDescriptor, PoolKey, ProtocolVersion,
};
use crate::domain::ports::{
    ChainClientRef, IndexerRef, LogSourceRef, PoolCacheKey, PoolStoreRef, VenueCandidate,
};
use crate::domain::primitives::{Address, Hash, parse_address};
use crate::domain::strategy::{ChainStrategy, Probe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which lookup produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Storage,
    Indexer,
    InitializeLogs,
    BruteForce,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub descriptor: PoolDescriptor,
    pub source: ResolutionSource,
}

/// Locates and validates a token's trading venue across protocol versions.
///
/// Lookups run cheapest first and stop at the first live venue: in-process
/// cache, persisted descriptor, indexer discovery (with pool-key
/// reconstruction for hash-addressed venues), then a fixed brute-force
/// matrix. A descriptor is only ever returned after its price read non-zero.
pub struct PoolResolver {
    chain: ChainClientRef,
    pools: PoolStoreRef,
    indexer: Option<IndexerRef>,
    log_sources: Vec<LogSourceRef>,
    cache: Arc<CacheService>,
    timeouts: Timeouts,
    max_pages: u32,
}

impl PoolResolver {
    pub fn new(
        chain: ChainClientRef,
        pools: PoolStoreRef,
        indexer: Option<IndexerRef>,
        log_sources: Vec<LogSourceRef>,
        cache: Arc<CacheService>,
        timeouts: Timeouts,
        max_pages: u32,
    ) -> Self {
        Self {
            chain,
            pools,
            indexer,
            log_sources,
            cache,
            timeouts,
            max_pages,
        }
    }

    pub async fn resolve(
        &self,
        strategy: &ChainStrategy,
        token: Address,
        entity: Option<&EntityId>,
    ) -> Option<PoolDescriptor> {
        self.resolve_traced(strategy, token, entity)
            .await
            .map(|resolution| resolution.descriptor)
    }

    /// Like `resolve`, also reporting which lookup hit.
    pub async fn resolve_traced(
        &self,
        strategy: &ChainStrategy,
        token: Address,
        entity: Option<&EntityId>,
    ) -> Option<Resolution> {
        let key = PoolCacheKey::new(strategy.chain_id(), token, entity.cloned());

        if let Some(descriptor) = self.cache.pools.get(&key) {
            if self.is_live(&descriptor).await {
                debug!(token = %format!("{token:#x}"), "pool cache hit");
                return Some(Resolution {
                    descriptor,
                    source: ResolutionSource::Cache,
                });
            }
            debug!(token = %format!("{token:#x}"), "cached pool no longer live");
            self.cache.pools.invalidate(&key);
        }

        let found = match self.from_storage(&key).await {
            Some(descriptor) => Some((descriptor, ResolutionSource::Storage)),
            None => match self.from_indexer(strategy, token).await {
                Some(found) => Some(found),
                None => self
                    .brute_force(strategy, token)
                    .await
                    .map(|descriptor| (descriptor, ResolutionSource::BruteForce)),
            },
        };

        match found {
            Some((descriptor, source)) => {
                info!(
                    token = %format!("{token:#x}"),
                    pool = %descriptor.pool,
                    protocol = %descriptor.protocol,
                    ?source,
                    "pool resolved"
                );
                if source != ResolutionSource::Storage {
                    self.persist(&key, &descriptor).await;
                }
                self.cache.pools.insert(key, descriptor.clone());
                Some(Resolution { descriptor, source })
            }
            None => {
                info!(token = %format!("{token:#x}"), "no live pool found");
                None
            }
        }
    }

    /// Stores a descriptor learned elsewhere, e.g. from a deployment receipt.
    pub async fn remember(&self, key: PoolCacheKey, descriptor: PoolDescriptor) {
        self.persist(&key, &descriptor).await;
        self.cache.pools.insert(key, descriptor);
    }

    /// Liveness probe: the venue's price reads non-zero within the read timeout.
    pub async fn is_live(&self, descriptor: &PoolDescriptor) -> bool {
        match bounded("chain", self.timeouts.read(), self.chain.pool_price(descriptor)).await {
            Ok(price) => !price.is_zero(),
            Err(err) => {
                debug!(pool = %descriptor.pool, error = %err, "price probe failed");
                false
            }
        }
    }

    async fn persist(&self, key: &PoolCacheKey, descriptor: &PoolDescriptor) {
        if let Err(err) = bounded("storage", self.timeouts.read(), self.pools.store(key, descriptor.clone())).await {
            warn!(key = %key.storage_key(), error = %err, "failed to persist pool descriptor");
        }
    }

    async fn from_storage(&self, key: &PoolCacheKey) -> Option<PoolDescriptor> {
        let mut keys = vec![key.clone()];
        if key.entity.is_some() {
            keys.push(key.unscoped());
        }
        for candidate in keys {
            match bounded("storage", self.timeouts.read(), self.pools.get(&candidate)).await {
                Ok(Some(descriptor)) if descriptor.contains(&key.token) && self.is_live(&descriptor).await => {
                    return Some(descriptor);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(key = %candidate.storage_key(), error = %err, "pool store read failed");
                }
            }
        }
        None
    }

    async fn from_indexer(
        &self,
        strategy: &ChainStrategy,
        token: Address,
    ) -> Option<(PoolDescriptor, ResolutionSource)> {
        let indexer = self.indexer.as_ref()?;
        let mut candidates = Vec::new();
        let mut cursor = None;
        for _ in 0..self.max_pages {
            let page = bounded(
                "indexer",
                self.timeouts.indexer(),
                indexer.discover(strategy.chain_id(), token, cursor.take()),
            )
            .await;
            match page {
                Ok(page) => {
                    candidates.extend(page.venues);
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(err) => {
                    warn!(error = %err, "venue discovery failed");
                    break;
                }
            }
        }

        // Deepest venue first; stable so equal liquidity keeps indexer order.
        // An unreported (NaN) depth ranks last.
        candidates.sort_by(|a, b| depth(b).total_cmp(&depth(a)));

        for candidate in &candidates {
            if let Some((descriptor, source)) = self.describe_candidate(strategy, token, candidate).await
                && self.is_live(&descriptor).await
            {
                return Some((descriptor, source));
            }
        }
        None
    }

    async fn describe_candidate(
        &self,
        strategy: &ChainStrategy,
        token: Address,
        candidate: &VenueCandidate,
    ) -> Option<(PoolDescriptor, ResolutionSource)> {
        let chain_id = strategy.chain_id();
        if candidate.protocol.is_hash_addressed() {
            let id = parse_pool_id(&candidate.pool)?;
            let pairs = match candidate.paired_token {
                Some(paired) => vec![paired],
                None => strategy.base_currencies(),
            };
            let (key, source) = self.reconstruct_key(strategy, token, &pairs, id).await?;
            let other = if key.currency0 == token { key.currency1 } else { key.currency0 };
            return Some((
                PoolDescriptor::from_key(chain_id, &key, strategy.is_base_currency(&other)),
                source,
            ));
        }

        let address = parse_address(&candidate.pool).ok()?;
        let paired = candidate.paired_token?;
        let fee = candidate.fee.unwrap_or(3_000);
        Some((
            PoolDescriptor::at_address(
                chain_id,
                candidate.protocol,
                address,
                token,
                paired,
                fee,
                strategy.is_base_currency(&paired),
            ),
            ResolutionSource::Indexer,
        ))
    }

    /// Rebuilds the full key behind a pool id: known hooks with canonical
    /// fee tiers first, then the pool manager's `Initialize` logs.
    async fn reconstruct_key(
        &self,
        strategy: &ChainStrategy,
        token: Address,
        pairs: &[Address],
        id: Hash,
    ) -> Option<(PoolKey, ResolutionSource)> {
        for paired in pairs {
            for hooks in strategy.hook_candidates() {
                for (fee, tick_spacing) in CANONICAL_FEE_TICKS {
                    let key = PoolKey::new(token, *paired, fee, tick_spacing, hooks);
                    if key.pool_id() == id {
                        return Some((key, ResolutionSource::Indexer));
                    }
                }
            }
        }
        self.key_from_logs(strategy, token, id)
            .await
            .map(|key| (key, ResolutionSource::InitializeLogs))
    }

    async fn key_from_logs(&self, strategy: &ChainStrategy, token: Address, id: Hash) -> Option<PoolKey> {
        for source in &self.log_sources {
            let logs = bounded(
                source.name(),
                self.timeouts.read(),
                source.initialize_logs(strategy.chain_id(), id),
            )
            .await;
            match logs {
                Ok(logs) => {
                    let found = logs
                        .iter()
                        .filter_map(InitializeEvent::decode)
                        .find(|event| {
                            event.id == id && (event.key.currency0 == token || event.key.currency1 == token)
                        });
                    if let Some(event) = found {
                        debug!(source = source.name(), "pool key recovered from initialize log");
                        return Some(event.key);
                    }
                }
                Err(err) => {
                    warn!(source = source.name(), error = %err, "initialize log query failed");
                }
            }
        }
        None
    }

    async fn brute_force(&self, strategy: &ChainStrategy, token: Address) -> Option<PoolDescriptor> {
        for probe in strategy.probe_matrix() {
            if probe.base == token {
                continue;
            }
            if let Some(descriptor) = self.probe(strategy, token, &probe).await
                && self.is_live(&descriptor).await
            {
                return Some(descriptor);
            }
        }
        None
    }

    async fn probe(&self, strategy: &ChainStrategy, token: Address, probe: &Probe) -> Option<PoolDescriptor> {
        let chain_id = strategy.chain_id();
        let is_base = strategy.is_base_currency(&probe.base);
        match probe.protocol {
            ProtocolVersion::V4 => {
                let key = PoolKey::new(token, probe.base, probe.fee, probe.tick_spacing, probe.hooks);
                Some(PoolDescriptor::from_key(chain_id, &key, is_base))
            }
            ProtocolVersion::V3 | ProtocolVersion::V2 => {
                let lookup = bounded(
                    "chain",
                    self.timeouts.read(),
                    self.chain
                        .factory_pool(chain_id, probe.protocol, token, probe.base, probe.fee),
                )
                .await;
                match lookup {
                    Ok(Some(address)) => Some(PoolDescriptor::at_address(
                        chain_id,
                        probe.protocol,
                        address,
                        token,
                        probe.base,
                        probe.fee,
                        is_base,
                    )),
                    Ok(None) => None,
                    Err(err) => {
                        debug!(protocol = %probe.protocol, fee = probe.fee, error = %err, "factory lookup failed");
                        None
                    }
                }
            }
        }
    }
}

fn parse_pool_id(value: &str) -> Option<Hash> {
    let raw = value.trim().trim_start_matches("0x");
    let bytes = hex::decode(raw).ok()?;
    (bytes.len() == 32).then(|| Hash::from_slice(&bytes))
}

fn depth(candidate: &VenueCandidate) -> f64 {
    if candidate.liquidity_usd.is_nan() {
        f64::NEG_INFINITY
    } else {
        candidate.liquidity_usd
    }
}
