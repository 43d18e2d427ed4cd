use crate::domain::allocation::FeePolicy;
use crate::domain::launch::{TextLimits, WalletLimits};
use crate::domain::primitives::Address;
use crate::domain::strategy::{ChainProfile, StrategyKind};
use crate::error::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bounds for every external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub read_ms: u64,
    pub indexer_ms: u64,
    pub transaction_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_ms: 5_000,
            indexer_ms: 4_000,
            transaction_ms: 60_000,
        }
    }
}

impl Timeouts {
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn indexer(&self) -> Duration {
        Duration::from_millis(self.indexer_ms)
    }

    pub fn transaction(&self) -> Duration {
        Duration::from_millis(self.transaction_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 60,
        }
    }
}

/// Everything the keeper core is tuned by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub fees: FeePolicy,
    pub wallets: WalletLimits,
    pub text: TextLimits,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    pub pool_cache_ttl_secs: u64,
    pub indexer_max_pages: u32,
    pub rate_limit: RateLimitPolicy,
    pub chains: Vec<ChainProfile>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            fees: FeePolicy::default(),
            wallets: WalletLimits::default(),
            text: TextLimits::default(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            pool_cache_ttl_secs: 300,
            indexer_max_pages: 3,
            rate_limit: RateLimitPolicy::default(),
            chains: vec![base_mainnet()],
        }
    }
}

fn base_mainnet() -> ChainProfile {
    ChainProfile {
        chain_id: 8453,
        name: "base".to_string(),
        strategy: StrategyKind::UniswapV4,
        wrapped_native: address_literal("4200000000000000000000000000000000000006"),
        stable: Some(address_literal("833589fcd6edb6e08f4c7c32d4f71b54bda02913")),
        known_hooks: Vec::new(),
        identity_registry: true,
    }
}

fn address_literal(value: &str) -> Address {
    let mut out = [0u8; 20];
    let _ = hex::decode_to_slice(value, &mut out);
    Address::from(out)
}

impl KeeperConfig {
    /// Reads a JSON configuration file; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: KeeperConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fees.validate()?;
        if self.wallets.min > self.wallets.max {
            return Err(KeeperError::Validation(format!(
                "wallet limits inverted: {} > {}",
                self.wallets.min, self.wallets.max
            )));
        }
        if self.retry.attempts == 0 {
            return Err(KeeperError::Validation(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        if self.chains.is_empty() {
            return Err(KeeperError::Validation("no chains configured".to_string()));
        }
        let mut ids: Vec<_> = self.chains.iter().map(|c| c.chain_id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.chains.len() {
            return Err(KeeperError::Validation(
                "duplicate chain id in configuration".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pool_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.pool_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = KeeperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            format!("{:#x}", config.chains[0].wrapped_native),
            "0x4200000000000000000000000000000000000006"
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            attempts: 3,
            base_backoff_ms: 100,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"fees": {{"protocol_fee_bps": 250}}, "wallets": {{"min": 2, "max": 4}}}}"#
        )
        .unwrap();

        let config = KeeperConfig::load(file.path()).unwrap();
        assert_eq!(config.fees.protocol_fee_bps, 250);
        assert_eq!(config.fees.split.liquidity, 60);
        assert_eq!(config.wallets.max, 4);
        assert_eq!(config.timeouts.read_ms, 5_000);
    }

    #[test]
    fn test_rejects_bad_split() {
        let mut config = KeeperConfig::default();
        config.fees.split.treasury = 31;
        assert!(matches!(config.validate(), Err(KeeperError::Validation(_))));
    }

    #[test]
    fn test_rejects_inverted_wallet_limits() {
        let mut config = KeeperConfig::default();
        config.wallets = WalletLimits { min: 5, max: 1 };
        assert!(config.validate().is_err());
    }
}
