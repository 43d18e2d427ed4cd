use super::pool::{CANONICAL_FEE_TICKS, ProtocolVersion};
use super::primitives::{Address, ChainId};
use crate::error::{KeeperError, Result};
use serde::{Deserialize, Serialize};

/// Venue family a chain launches into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    UniswapV4,
    UniswapV3,
}

/// Per-chain settings, as written in the keeper configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProfile {
    pub chain_id: ChainId,
    pub name: String,
    pub strategy: StrategyKind,
    pub wrapped_native: Address,
    #[serde(default)]
    pub stable: Option<Address>,
    /// Hook contracts our launches and known partners deploy pools with.
    #[serde(default)]
    pub known_hooks: Vec<Address>,
    #[serde(default = "enabled")]
    pub identity_registry: bool,
}

fn enabled() -> bool {
    true
}

/// One cell of the brute-force venue search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub protocol: ProtocolVersion,
    pub base: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
}

/// Chain and protocol specific behaviour, chosen once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStrategy {
    /// Hash-addressed singleton pools with hooks; v3 pools as fallback.
    UniswapV4(ChainProfile),
    /// Factory-deployed pools; v2 pairs as fallback.
    UniswapV3(ChainProfile),
}

const V3_FEES: [u32; 4] = [500, 3_000, 10_000, 100];

impl ChainStrategy {
    pub fn from_profile(profile: ChainProfile) -> Self {
        match profile.strategy {
            StrategyKind::UniswapV4 => Self::UniswapV4(profile),
            StrategyKind::UniswapV3 => Self::UniswapV3(profile),
        }
    }

    /// Selects the strategy for `chain_id` among configured profiles.
    pub fn select(profiles: &[ChainProfile], chain_id: ChainId) -> Result<Self> {
        profiles
            .iter()
            .find(|p| p.chain_id == chain_id)
            .cloned()
            .map(Self::from_profile)
            .ok_or_else(|| KeeperError::Validation(format!("unsupported chain {chain_id}")))
    }

    pub fn profile(&self) -> &ChainProfile {
        match self {
            Self::UniswapV4(profile) | Self::UniswapV3(profile) => profile,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.profile().chain_id
    }

    /// Protocol freshly launched tokens trade on.
    pub fn launch_protocol(&self) -> ProtocolVersion {
        match self {
            Self::UniswapV4(_) => ProtocolVersion::V4,
            Self::UniswapV3(_) => ProtocolVersion::V3,
        }
    }

    /// Currencies a launched token is paired against, in preference order.
    pub fn base_currencies(&self) -> Vec<Address> {
        let profile = self.profile();
        let mut bases = Vec::with_capacity(3);
        if matches!(self, Self::UniswapV4(_)) {
            // Singleton pools can hold the native currency directly.
            bases.push(Address::zero());
        }
        bases.push(profile.wrapped_native);
        if let Some(stable) = profile.stable {
            bases.push(stable);
        }
        bases
    }

    pub fn is_base_currency(&self, token: &Address) -> bool {
        self.base_currencies().contains(token)
    }

    /// Hook addresses to try when rebuilding a pool key: none first.
    pub fn hook_candidates(&self) -> Vec<Address> {
        let mut hooks = vec![Address::zero()];
        if let Self::UniswapV4(profile) = self {
            hooks.extend(profile.known_hooks.iter().copied().filter(|h| !h.is_zero()));
        }
        hooks
    }

    /// The fixed search matrix walked when every other strategy misses.
    pub fn probe_matrix(&self) -> Vec<Probe> {
        let mut probes = Vec::new();
        let bases = self.base_currencies();
        match self {
            Self::UniswapV4(_) => {
                for hooks in self.hook_candidates() {
                    for base in &bases {
                        for (fee, tick_spacing) in CANONICAL_FEE_TICKS {
                            probes.push(Probe {
                                protocol: ProtocolVersion::V4,
                                base: *base,
                                fee,
                                tick_spacing,
                                hooks,
                            });
                        }
                    }
                }
                probes.extend(factory_probes(&bases, ProtocolVersion::V3, &V3_FEES));
            }
            Self::UniswapV3(_) => {
                probes.extend(factory_probes(&bases, ProtocolVersion::V3, &V3_FEES));
                probes.extend(factory_probes(&bases, ProtocolVersion::V2, &[3_000]));
            }
        }
        probes
    }
}

fn factory_probes(bases: &[Address], protocol: ProtocolVersion, fees: &[u32]) -> Vec<Probe> {
    bases
        .iter()
        .filter(|base| !base.is_zero())
        .flat_map(|base| {
            fees.iter().map(move |fee| Probe {
                protocol,
                base: *base,
                fee: *fee,
                tick_spacing: 0,
                hooks: Address::zero(),
            })
        })
        .collect()
}
