mod common;

use common::*;
use keeper::domain::entity::EntityStatus;
use keeper::domain::pool::PoolKey;
use keeper::domain::ports::PaymentLedger;
use keeper::domain::primitives::{Address, U256};
use keeper::error::KeeperError;
use keeper::infrastructure::mock::{ChainCall, MockChain, MockFacilitator, StoreCall};
use std::time::Duration;

#[tokio::test]
async fn test_happy_path_reaches_active_and_mints_identity() {
    let h = harness();
    let request = launch_request("0x01", ONE_ETH, 3);

    let outcome = h.engine.execute_launch(&request).await.unwrap();
    assert_eq!(outcome.status, EntityStatus::Active);
    assert_eq!(outcome.owner, payer());
    assert!(!outcome.owner_override_rejected);
    assert_eq!(outcome.token, Some(MockChain::token_for(&outcome.entity_id)));
    assert!(outcome.tx_refs.deploy.is_some());
    assert!(outcome.tx_refs.seed_liquidity.is_some());
    assert!(outcome.tx_refs.treasury_deposit.is_some());
    assert_eq!(outcome.tx_refs.settlement.as_deref(), Some("0x5e771e"));

    let a = outcome.allocation;
    assert_eq!(a.total, U256::from_dec_str(ONE_ETH).unwrap());
    assert_eq!(a.deployable + a.protocol_fee + a.gas_reserve, a.total);
    assert_eq!(a.deploy + a.liquidity + a.treasury, a.deployable);

    let record = h.store.payment(&payment_key("0x01", ONE_ETH)).await.unwrap();
    assert_eq!(record.payer, Some(payer()));
    assert_eq!(record.entity_id, Some(outcome.entity_id.clone()));
    assert!(h.store.get_all().await.unwrap().iter().all(|r| !r.is_pending()));

    let deployments = h.chain.deployments();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].wallets.len(), 3);
    assert_ne!(deployments[0].wallets[0], deployments[0].wallets[1]);
    assert_eq!(deployments[0].value, a.deploy);

    h.engine.shutdown().await;
    let entity = h.engine.entity(&outcome.entity_id).await.unwrap();
    assert!(entity.identity_minted);
    assert!(entity.agent_identity_id.is_some());
    assert!(entity.tx_refs.identity_mint.is_some());
}

#[tokio::test]
async fn test_seeding_failure_parks_in_pending_lp_and_keeps_lock() {
    let h = harness();
    h.chain.set_failing(ChainCall::SeedLiquidity, true);

    let outcome = h
        .engine
        .execute_launch(&launch_request("0x02", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingLp);
    assert!(outcome.token.is_some());

    let record = h.store.payment(&payment_key("0x02", ONE_ETH)).await.unwrap();
    assert!(!record.is_pending());
    let again = h
        .engine
        .execute_launch(&launch_request("0x02", ONE_ETH, 1))
        .await
        .unwrap_err();
    assert_eq!(again.code(), "payment_conflict");

    let denied = h
        .engine
        .retry_liquidity(&outcome.entity_id, stranger())
        .await
        .unwrap_err();
    assert_eq!(denied.code(), "auth_error");

    let still_failing = h
        .engine
        .retry_liquidity(&outcome.entity_id, payer())
        .await
        .unwrap_err();
    assert!(matches!(
        still_failing,
        KeeperError::PartialFailure {
            status: EntityStatus::PendingLp,
            ..
        }
    ));

    h.chain.set_failing(ChainCall::SeedLiquidity, false);
    let entity = h.engine.retry_liquidity(&outcome.entity_id, payer()).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert!(entity.tx_refs.seed_liquidity.is_some());

    let not_pending = h
        .engine
        .retry_liquidity(&outcome.entity_id, payer())
        .await
        .unwrap_err();
    assert_eq!(not_pending.code(), "validation_error");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_missing_venue_is_pending_lp_until_one_appears() {
    let h = harness_with(MockChain::new().without_deploy_pool(), MockFacilitator::accepting(), config());

    let outcome = h
        .engine
        .execute_launch(&launch_request("0x03", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingLp);
    assert_eq!(h.chain.calls(ChainCall::SeedLiquidity), 0);

    let token = MockChain::token_for(&outcome.entity_id);
    let key = PoolKey::new(token, Address::zero(), 500, 10, Address::zero());
    h.chain.set_price_by_id(key.pool_id(), U256::from(1u64 << 48));

    let entity = h.engine.retry_liquidity(&outcome.entity_id, payer()).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert_eq!(entity.pool.and_then(|p| p.key()), Some(key));
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_treasury_failure_parks_in_pending_funding() {
    let h = harness();
    h.chain.set_failing(ChainCall::Treasury, true);

    let outcome = h
        .engine
        .execute_launch(&launch_request("0x04", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingFunding);
    assert!(outcome.tx_refs.seed_liquidity.is_some());
    assert!(h.store.payment(&payment_key("0x04", ONE_ETH)).await.is_some());

    let err = h.engine.retry_funding(&outcome.entity_id, payer()).await.unwrap_err();
    assert_eq!(err.code(), "partial_failure");

    h.chain.set_failing(ChainCall::Treasury, false);
    let entity = h.engine.retry_funding(&outcome.entity_id, payer()).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert!(entity.tx_refs.treasury_deposit.is_some());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_deployment_keeps_lock_and_refuses_blind_retry() {
    let h = harness();
    h.chain.set_failing(ChainCall::Deploy, true);

    let outcome = h
        .engine
        .execute_launch(&launch_request("0x05", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingFunding);
    assert!(outcome.token.is_none());
    assert!(h.store.payment(&payment_key("0x05", ONE_ETH)).await.is_some());

    let err = h.engine.retry_funding(&outcome.entity_id, payer()).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[tokio::test]
async fn test_wallet_count_out_of_range_rejected_before_lock() {
    let h = harness();
    for wallets in [0, 11] {
        let err = h
            .engine
            .execute_launch(&launch_request("0x06", ONE_ETH, wallets))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
    assert_eq!(h.store.payment_count().await, 0);
    assert_eq!(h.facilitator.verify_calls(), 0);
    assert!(h.chain.deployments().is_empty());
}

#[tokio::test]
async fn test_underfunded_launch_rejected_before_payment() {
    let h = harness();
    let request = launch_request("0x07", "1000", 1);

    let err = h.engine.execute_launch(&request).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    assert_eq!(h.facilitator.verify_calls(), 0);
    assert_eq!(h.facilitator.settle_calls(), 0);
    assert_eq!(h.store.payment_count().await, 0);
    assert!(h.chain.deployments().is_empty());

    // Nothing was locked, so the same proof fails on its merits again.
    let err = h.engine.execute_launch(&request).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    assert_eq!(h.facilitator.settle_calls(), 0);
}

#[tokio::test]
async fn test_unsupported_chain_rejected() {
    let h = harness();
    let mut request = launch_request("0x08", ONE_ETH, 1);
    request.chain_id = 1;
    let err = h.engine.execute_launch(&request).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    assert_eq!(h.store.payment_count().await, 0);
}

#[tokio::test]
async fn test_signed_owner_override_is_honoured() {
    let h = harness();
    let new_owner = Address::repeat_byte(0x42);
    let mut request = launch_request("0x09", ONE_ETH, 1);
    request.owner_override = Some(owner_override(&payer_key(), new_owner, &request));

    let outcome = h.engine.execute_launch(&request).await.unwrap();
    assert_eq!(outcome.owner, new_owner);
    assert!(!outcome.owner_override_rejected);
    assert_eq!(h.chain.deployments()[0].owner, new_owner);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_foreign_owner_override_is_flagged_and_ignored() {
    let h = harness();
    let mut request = launch_request("0x0a", ONE_ETH, 1);
    request.owner_override = Some(owner_override(&signing_key(99), stranger(), &request));

    let outcome = h.engine.execute_launch(&request).await.unwrap();
    assert_eq!(outcome.owner, payer());
    assert!(outcome.owner_override_rejected);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_identity_mint_failure_is_independent_and_retryable() {
    let h = harness();
    h.chain.set_failing(ChainCall::MintIdentity, true);

    let outcome = h
        .engine
        .execute_launch(&launch_request("0x0b", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::Active);
    h.engine.shutdown().await;

    let entity = h.engine.entity(&outcome.entity_id).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert!(!entity.identity_minted);

    let err = h.engine.retry_identity(&outcome.entity_id, payer()).await.unwrap_err();
    assert_eq!(err.code(), "partial_failure");

    h.chain.set_failing(ChainCall::MintIdentity, false);
    let entity = h.engine.retry_identity(&outcome.entity_id, payer()).await.unwrap();
    assert!(entity.identity_minted);

    let err = h.engine.retry_identity(&outcome.entity_id, payer()).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[tokio::test]
async fn test_metadata_is_sanitised_before_deployment() {
    let h = harness();
    let mut request = launch_request("0x0c", ONE_ETH, 1);
    request.name = "Eig\u{202E}en\u{0000} Agent".to_string();
    request.symbol = "ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_string();

    h.engine.execute_launch(&request).await.unwrap();
    let deployed = &h.chain.deployments()[0];
    assert_eq!(deployed.name, "Eigen Agent");
    assert_eq!(deployed.symbol, "ABCDEFGHIJKLMNOP");
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_entity_retry_is_not_found() {
    let h = harness();
    let err = h
        .engine
        .retry_liquidity(&"missing".into(), payer())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "resolution_not_found");
}

#[tokio::test]
async fn test_deployment_confirmed_after_deadline_is_recorded() {
    let h = harness();
    h.chain.set_delay(ChainCall::Deploy, Duration::from_millis(800));

    let outcome = h
        .engine
        .execute_launch(&launch_request("0x0d", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingFunding);
    assert!(outcome.token.is_none());
    assert!(h.store.payment(&payment_key("0x0d", ONE_ETH)).await.is_some());

    // The deployment is still in flight; no retry may race it.
    let err = h.engine.retry_funding(&outcome.entity_id, payer()).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    h.engine.shutdown().await;
    let entity = h.engine.entity(&outcome.entity_id).await.unwrap();
    assert_eq!(entity.status, EntityStatus::PendingLp);
    assert_eq!(entity.token, Some(MockChain::token_for(&outcome.entity_id)));
    assert!(entity.tx_refs.deploy.is_some());
    assert!(entity.pool.is_some());

    let entity = h.engine.retry_liquidity(&outcome.entity_id, payer()).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert_eq!(h.chain.deployments().len(), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_seed_confirmed_after_deadline_moves_on_to_funding() {
    let h = harness();
    h.chain.set_delay(ChainCall::SeedLiquidity, Duration::from_millis(800));

    let outcome = h
        .engine
        .execute_launch(&launch_request("0x0e", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingLp);

    h.engine.shutdown().await;
    let entity = h.engine.entity(&outcome.entity_id).await.unwrap();
    assert_eq!(entity.status, EntityStatus::PendingFunding);
    assert!(entity.tx_refs.seed_liquidity.is_some());

    let entity = h.engine.retry_funding(&outcome.entity_id, payer()).await.unwrap();
    assert_eq!(entity.status, EntityStatus::Active);
    assert_eq!(h.chain.calls(ChainCall::SeedLiquidity), 1);
    assert_eq!(h.chain.calls(ChainCall::Treasury), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_retries_seed_once() {
    let h = harness();
    h.chain.set_failing(ChainCall::SeedLiquidity, true);
    let outcome = h
        .engine
        .execute_launch(&launch_request("0x0f", ONE_ETH, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, EntityStatus::PendingLp);

    h.chain.set_failing(ChainCall::SeedLiquidity, false);
    h.chain.set_delay(ChainCall::Price, Duration::from_millis(100));
    let (first, second) = tokio::join!(
        h.engine.retry_liquidity(&outcome.entity_id, payer()),
        h.engine.retry_liquidity(&outcome.entity_id, payer()),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let refused = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(refused.code(), "validation_error");
    // One failed attempt during the launch, one successful retry.
    assert_eq!(h.chain.calls(ChainCall::SeedLiquidity), 2);
    assert_eq!(h.chain.calls(ChainCall::Treasury), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_stalled_entity_store_fails_fast_and_releases_payment() {
    let h = harness();
    h.faults.set_stalled(StoreCall::WriteEntity, true);

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        h.engine.execute_launch(&launch_request("0x10", ONE_ETH, 1)),
    )
    .await
    .expect("launch must not hang on storage")
    .unwrap_err();
    assert_eq!(err.code(), "upstream_unavailable");
    assert_eq!(h.store.payment_count().await, 0);
    assert!(h.chain.deployments().is_empty());

    h.faults.set_stalled(StoreCall::ReadEntity, true);
    let err = h.engine.entity(&"any".into()).await.unwrap_err();
    assert_eq!(err.code(), "upstream_unavailable");
}
