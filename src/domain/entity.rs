use super::allocation::Allocation;
use super::pool::PoolDescriptor;
use super::primitives::{Address, ChainId, Hash, U256, keccak256};
use crate::error::{KeeperError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an eigen entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bytes32 key under which custody contracts index this entity.
    pub fn on_chain_key(&self) -> Hash {
        keccak256(self.0.as_bytes())
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Launch lifecycle of an entity.
///
/// `Unfunded` and `PaymentLocked` only exist in flight; an entity record is
/// persisted once its payment is verified.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Unfunded,
    PaymentLocked,
    PaymentVerified,
    TokenDeployed,
    LiquiditySeeding,
    Active,
    PendingLp,
    PendingFunding,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unfunded => "unfunded",
            Self::PaymentLocked => "payment_locked",
            Self::PaymentVerified => "payment_verified",
            Self::TokenDeployed => "token_deployed",
            Self::LiquiditySeeding => "liquidity_seeding",
            Self::Active => "active",
            Self::PendingLp => "pending_lp",
            Self::PendingFunding => "pending_funding",
        }
    }

    /// Whether value has been committed on-chain in this state.
    pub fn value_delivered(&self) -> bool {
        !matches!(
            self,
            Self::Unfunded | Self::PaymentLocked | Self::PaymentVerified
        )
    }

    /// Partial-failure states wait for an explicit retry.
    pub fn is_partial_failure(&self) -> bool {
        matches!(self, Self::PendingLp | Self::PendingFunding)
    }

    pub fn can_transition_to(&self, next: EntityStatus) -> bool {
        use EntityStatus::*;
        matches!(
            (self, next),
            (Unfunded, PaymentLocked)
                | (PaymentLocked, PaymentVerified)
                | (PaymentLocked, Unfunded)
                | (PaymentVerified, TokenDeployed)
                | (PaymentVerified, PendingFunding)
                | (PaymentVerified, Unfunded)
                | (TokenDeployed, LiquiditySeeding)
                | (TokenDeployed, PendingLp)
                | (LiquiditySeeding, Active)
                | (LiquiditySeeding, PendingLp)
                | (LiquiditySeeding, PendingFunding)
                | (PendingLp, LiquiditySeeding)
                | (PendingLp, PendingFunding)
                | (PendingFunding, Active)
                | (PendingFunding, PendingLp)
        )
    }

    pub fn transition(self, next: EntityStatus) -> Result<EntityStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(KeeperError::Validation(format!(
                "invalid status transition: {self} -> {next}"
            )))
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction hashes produced during a launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRefs {
    pub deploy: Option<Hash>,
    pub seed_liquidity: Option<Hash>,
    pub treasury_deposit: Option<Hash>,
    pub identity_mint: Option<Hash>,
    pub settlement: Option<String>,
}

/// A deployed token together with its treasury and trading configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EigenEntity {
    pub id: EntityId,
    pub owner: Address,
    pub chain_id: ChainId,
    pub status: EntityStatus,
    pub name: String,
    pub symbol: String,
    pub token: Option<Address>,
    pub pool: Option<PoolDescriptor>,
    pub agent_identity_id: Option<U256>,
    pub identity_minted: bool,
    pub wallets: Vec<Address>,
    pub allocation: Allocation,
    pub payment_key: String,
    pub tx_refs: TxRefs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EigenEntity {
    /// Moves the entity to `next`, refusing illegal transitions.
    pub fn advance(&mut self, next: EntityStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            EntityStatus::Unfunded,
            EntityStatus::PaymentLocked,
            EntityStatus::PaymentVerified,
            EntityStatus::TokenDeployed,
            EntityStatus::LiquiditySeeding,
            EntityStatus::Active,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_partial_failure_is_not_a_rollback() {
        assert!(EntityStatus::TokenDeployed.can_transition_to(EntityStatus::PendingLp));
        assert!(!EntityStatus::TokenDeployed.can_transition_to(EntityStatus::Unfunded));
        assert!(!EntityStatus::PendingLp.can_transition_to(EntityStatus::Unfunded));
        assert!(EntityStatus::PendingLp.can_transition_to(EntityStatus::LiquiditySeeding));
    }

    #[test]
    fn test_late_confirmations_move_between_pending_states() {
        // A deployment confirmed after its deadline still needs liquidity.
        assert!(EntityStatus::PendingFunding.can_transition_to(EntityStatus::PendingLp));
        // A seed confirmed after its deadline still needs the treasury deposit.
        assert!(EntityStatus::PendingLp.can_transition_to(EntityStatus::PendingFunding));
        assert!(!EntityStatus::PendingFunding.can_transition_to(EntityStatus::PaymentVerified));
    }

    #[test]
    fn test_transition_rejects_skips() {
        let result = EntityStatus::PaymentVerified.transition(EntityStatus::Active);
        assert!(matches!(result, Err(KeeperError::Validation(_))));
    }

    #[test]
    fn test_value_delivery_boundary() {
        assert!(!EntityStatus::PaymentVerified.value_delivered());
        assert!(EntityStatus::TokenDeployed.value_delivered());
        assert!(EntityStatus::PendingFunding.is_partial_failure());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&EntityStatus::PendingLp).unwrap();
        assert_eq!(json, "\"pending_lp\"");
    }
}
