use super::bounded;
use crate::domain::entity::{EigenEntity, EntityId};
use crate::domain::ports::{ChainClientRef, EntityStoreRef};
use crate::domain::primitives::{Address, ChainId};
use std::time::Duration;
use tracing::{debug, warn};

/// The authority that vouched for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipSource {
    StoredOwner,
    IdentityHolder,
    CustodyContract,
}

/// Decides whether an address may act on an entity.
///
/// Authorities are consulted in order and the first match wins: the owner
/// recorded in the entity store, the current holder of the entity's delegated
/// identity token, then the custody contract. A failing on-chain read counts as
/// "no match" so a flaky endpoint can never grant access.
pub struct OwnershipChain {
    chain: ChainClientRef,
    entities: EntityStoreRef,
    read_timeout: Duration,
}

impl OwnershipChain {
    pub fn new(chain: ChainClientRef, entities: EntityStoreRef, read_timeout: Duration) -> Self {
        Self {
            chain,
            entities,
            read_timeout,
        }
    }

    pub async fn verify(
        &self,
        entity_id: &EntityId,
        claimed: Address,
        stored_owner: Option<Address>,
        chain_id: Option<ChainId>,
    ) -> bool {
        self.authorize(entity_id, claimed, stored_owner, chain_id)
            .await
            .is_some()
    }

    /// Like `verify`, naming the authority that matched.
    pub async fn authorize(
        &self,
        entity_id: &EntityId,
        claimed: Address,
        stored_owner: Option<Address>,
        chain_id: Option<ChainId>,
    ) -> Option<OwnershipSource> {
        if stored_owner == Some(claimed) {
            return Some(OwnershipSource::StoredOwner);
        }

        let entity = match bounded("storage", self.read_timeout, self.entities.get(entity_id)).await {
            Ok(entity) => entity,
            Err(err) => {
                warn!(entity_id = %entity_id, error = %err, "entity lookup failed during ownership check");
                None
            }
        };
        let chain_id = chain_id.or(entity.as_ref().map(|e| e.chain_id));

        if let (Some(entity), Some(chain_id)) = (entity.as_ref(), chain_id)
            && self.holds_identity(entity, chain_id, claimed).await
        {
            return Some(OwnershipSource::IdentityHolder);
        }

        let Some(chain_id) = chain_id else {
            debug!(entity_id = %entity_id, "no chain known, skipping custody check");
            return None;
        };
        match bounded("chain", self.read_timeout, self.chain.custody_owner(chain_id, entity_id)).await {
            Ok(Some(owner)) if owner == claimed => Some(OwnershipSource::CustodyContract),
            Ok(_) => None,
            Err(err) => {
                warn!(entity_id = %entity_id, error = %err, "custody owner read failed");
                None
            }
        }
    }

    async fn holds_identity(&self, entity: &EigenEntity, chain_id: ChainId, claimed: Address) -> bool {
        let Some(identity) = entity.agent_identity_id else {
            return false;
        };
        match bounded("chain", self.read_timeout, self.chain.identity_holder(chain_id, identity)).await {
            Ok(holder) => holder == Some(claimed),
            Err(err) => {
                warn!(entity_id = %entity.id, error = %err, "identity holder read failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::allocation::Allocation;
    use crate::domain::entity::{EntityStatus, TxRefs};
    use crate::domain::ports::EntityStore;
    use crate::domain::primitives::U256;
    use crate::infrastructure::in_memory::InMemoryStore;
    use crate::infrastructure::mock::{ChainCall, MockChain};
    use chrono::Utc;
    use std::sync::Arc;

    const CHAIN: ChainId = 8453;

    fn owner() -> Address {
        Address::repeat_byte(0x0a)
    }

    fn stranger() -> Address {
        Address::repeat_byte(0x0b)
    }

    fn entity(id: &str, identity: Option<u64>) -> EigenEntity {
        EigenEntity {
            id: id.into(),
            owner: owner(),
            chain_id: CHAIN,
            status: EntityStatus::Active,
            name: "Eigen".to_string(),
            symbol: "EGN".to_string(),
            token: Some(Address::repeat_byte(0x70)),
            pool: None,
            agent_identity_id: identity.map(U256::from),
            identity_minted: identity.is_some(),
            wallets: vec![],
            allocation: Allocation::default(),
            payment_key: "k".to_string(),
            tx_refs: TxRefs::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn setup(record: EigenEntity) -> (Arc<MockChain>, OwnershipChain) {
        let chain = Arc::new(MockChain::new());
        let store = InMemoryStore::new();
        store.store(record).await.unwrap();
        let ownership = OwnershipChain::new(chain.clone(), Arc::new(store), Duration::from_millis(100));
        (chain, ownership)
    }

    #[tokio::test]
    async fn test_stored_owner_short_circuits() {
        let (chain, ownership) = setup(entity("e-1", Some(1))).await;
        let source = ownership
            .authorize(&"e-1".into(), owner(), Some(owner()), Some(CHAIN))
            .await;
        assert_eq!(source, Some(OwnershipSource::StoredOwner));
        assert_eq!(chain.calls(ChainCall::IdentityHolder), 0);
        assert_eq!(chain.calls(ChainCall::CustodyOwner), 0);
    }

    #[tokio::test]
    async fn test_identity_transfer_grants_new_holder() {
        let (chain, ownership) = setup(entity("e-1", Some(9))).await;
        chain.set_identity_holder(U256::from(9u64), stranger());
        let source = ownership
            .authorize(&"e-1".into(), stranger(), Some(owner()), None)
            .await;
        assert_eq!(source, Some(OwnershipSource::IdentityHolder));
    }

    #[tokio::test]
    async fn test_custody_contract_is_last_resort() {
        let (chain, ownership) = setup(entity("e-1", None)).await;
        chain.set_custody_owner(&"e-1".into(), stranger());
        let source = ownership
            .authorize(&"e-1".into(), stranger(), Some(owner()), Some(CHAIN))
            .await;
        assert_eq!(source, Some(OwnershipSource::CustodyContract));
    }

    #[tokio::test]
    async fn test_failed_reads_deny() {
        let (chain, ownership) = setup(entity("e-1", Some(9))).await;
        chain.set_identity_holder(U256::from(9u64), stranger());
        chain.set_custody_owner(&"e-1".into(), stranger());
        chain.set_failing(ChainCall::IdentityHolder, true);
        chain.set_failing(ChainCall::CustodyOwner, true);

        assert!(
            !ownership
                .verify(&"e-1".into(), stranger(), Some(owner()), Some(CHAIN))
                .await
        );
    }

    #[tokio::test]
    async fn test_unknown_entity_without_chain_is_denied() {
        let (_, ownership) = setup(entity("e-1", None)).await;
        assert!(!ownership.verify(&"missing".into(), stranger(), None, None).await);
    }
}
