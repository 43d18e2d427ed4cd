mod common;

use common::*;
use keeper::domain::entity::{EntityId, EntityStatus};
use keeper::domain::primitives::Address;
use keeper::infrastructure::mock::{ChainCall, StoreCall};
use std::time::Duration;

#[tokio::test]
async fn test_payer_owns_launched_entity() {
    let h = harness();
    let outcome = h
        .engine
        .execute_launch(&launch_request("0x31", ONE_ETH, 1))
        .await
        .unwrap();
    h.engine.shutdown().await;

    assert!(h.engine.verify_ownership(&outcome.entity_id, payer(), None, None).await);
    assert!(!h.engine.verify_ownership(&outcome.entity_id, stranger(), None, None).await);
}

#[tokio::test]
async fn test_identity_holder_is_recognised_after_transfer() {
    let h = harness();
    let outcome = h
        .engine
        .execute_launch(&launch_request("0x32", ONE_ETH, 1))
        .await
        .unwrap();
    h.engine.shutdown().await;

    let entity = h.engine.entity(&outcome.entity_id).await.unwrap();
    let identity = entity.agent_identity_id.unwrap();
    let buyer = Address::repeat_byte(0x5a);
    assert!(!h.engine.verify_ownership(&entity.id, buyer, None, None).await);

    h.chain.set_identity_holder(identity, buyer);
    assert!(h.engine.verify_ownership(&entity.id, buyer, None, None).await);
}

#[tokio::test]
async fn test_custody_owner_may_retry_a_stalled_launch() {
    let h = harness();
    h.chain.set_failing(ChainCall::SeedLiquidity, true);
    let outcome = h
        .engine
        .execute_launch(&launch_request("0x33", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingLp);

    let successor = Address::repeat_byte(0x6b);
    h.chain.set_custody_owner(&outcome.entity_id, successor);
    h.chain.set_failing(ChainCall::SeedLiquidity, false);

    let entity = h.engine.retry_liquidity(&outcome.entity_id, successor).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert_eq!(entity.owner, payer());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_stored_owner_checked_without_entity_record() {
    let h = harness();
    let unknown = EntityId::from("not-launched-here");
    let owner = Address::repeat_byte(0x44);

    assert!(h.engine.verify_ownership(&unknown, owner, Some(owner), None).await);
    assert!(!h.engine.verify_ownership(&unknown, stranger(), Some(owner), Some(CHAIN)).await);
}

#[tokio::test]
async fn test_chain_outage_denies_rather_than_grants() {
    let h = harness();
    let unknown = EntityId::from("external");
    h.chain.set_custody_owner(&unknown, stranger());
    h.chain.set_failing(ChainCall::CustodyOwner, true);

    assert!(!h.engine.verify_ownership(&unknown, stranger(), None, Some(CHAIN)).await);

    h.chain.set_failing(ChainCall::CustodyOwner, false);
    assert!(h.engine.verify_ownership(&unknown, stranger(), None, Some(CHAIN)).await);
}

#[tokio::test]
async fn test_stalled_entity_store_denies_promptly() {
    let h = harness();
    let id = EntityId::from("slow-store");
    h.faults.set_stalled(StoreCall::ReadEntity, true);

    let verdict = tokio::time::timeout(
        Duration::from_secs(2),
        h.engine.verify_ownership(&id, stranger(), None, None),
    )
    .await
    .expect("ownership check must not hang on storage");
    assert!(!verdict);
}
