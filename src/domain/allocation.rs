use super::primitives::U256;
use crate::error::{KeeperError, Result};
use serde::{Deserialize, Serialize};

pub const BPS_DENOMINATOR: u32 = 10_000;

/// Percentages of the deployable value routed to each bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPercentages {
    pub deploy: u8,
    pub liquidity: u8,
    pub treasury: u8,
}

impl SplitPercentages {
    pub fn validate(&self) -> Result<()> {
        let sum = u32::from(self.deploy) + u32::from(self.liquidity) + u32::from(self.treasury);
        if sum != 100 {
            return Err(KeeperError::Validation(format!(
                "split percentages must sum to 100, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for SplitPercentages {
    fn default() -> Self {
        Self {
            deploy: 10,
            liquidity: 60,
            treasury: 30,
        }
    }
}

/// Fee and reserve rules applied to a launch's committed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeePolicy {
    pub protocol_fee_bps: u32,
    /// Gas reserved for each trading wallet, in wei.
    pub gas_per_wallet_wei: u128,
    pub split: SplitPercentages,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            protocol_fee_bps: 500,
            gas_per_wallet_wei: 500_000_000_000_000,
            split: SplitPercentages::default(),
        }
    }
}

impl FeePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.protocol_fee_bps > BPS_DENOMINATOR {
            return Err(KeeperError::Validation(format!(
                "protocol fee {} bps exceeds {BPS_DENOMINATOR}",
                self.protocol_fee_bps
            )));
        }
        self.split.validate()
    }
}

/// How a launch's value is partitioned.
///
/// `deploy + liquidity + treasury == deployable` and
/// `deployable + protocol_fee + gas_reserve == total` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocation {
    pub total: U256,
    pub protocol_fee: U256,
    pub gas_reserve: U256,
    pub deployable: U256,
    pub deploy: U256,
    pub liquidity: U256,
    pub treasury: U256,
}

impl Allocation {
    /// Splits `total` for `wallet_count` trading wallets.
    ///
    /// The treasury bucket absorbs the integer-division remainder.
    pub fn split(total: U256, wallet_count: u32, policy: &FeePolicy) -> Result<Self> {
        policy.validate()?;
        let protocol_fee = total
            .checked_mul(U256::from(policy.protocol_fee_bps))
            .ok_or_else(|| KeeperError::Validation("launch value overflow".to_string()))?
            / U256::from(BPS_DENOMINATOR);
        let gas_reserve = U256::from(policy.gas_per_wallet_wei)
            .checked_mul(U256::from(wallet_count))
            .ok_or_else(|| KeeperError::Validation("gas reserve overflow".to_string()))?;

        let deployable = total
            .checked_sub(protocol_fee)
            .and_then(|rest| rest.checked_sub(gas_reserve))
            .ok_or_else(|| {
                KeeperError::Validation(format!(
                    "value {total} does not cover fee {protocol_fee} and gas reserve {gas_reserve}"
                ))
            })?;

        let deploy = deployable * U256::from(policy.split.deploy) / U256::from(100u8);
        let liquidity = deployable * U256::from(policy.split.liquidity) / U256::from(100u8);
        let treasury = deployable - deploy - liquidity;

        Ok(Self {
            total,
            protocol_fee,
            gas_reserve,
            deployable,
            deploy,
            liquidity,
            treasury,
        })
    }
}
