#![allow(dead_code)]

use k256::ecdsa::SigningKey;
use keeper::application::cache::ManualClock;
use keeper::application::engine::{Collaborators, KeeperEngine};
use keeper::config::{KeeperConfig, RetryPolicy, Timeouts};
use keeper::domain::launch::{LaunchRequest, OwnerOverride, address_of, personal_message_hash};
use keeper::domain::payment::{Authorization, ExactPayload, PaymentKey, PaymentProof, PaymentRequirements};
use keeper::domain::primitives::Address;
use keeper::domain::strategy::{ChainProfile, StrategyKind};
use keeper::infrastructure::in_memory::InMemoryStore;
use keeper::infrastructure::keys::HmacKeyDeriver;
use keeper::infrastructure::mock::{FaultyStore, MockChain, MockFacilitator, MockIndexer, MockLogSource};
use std::sync::Arc;

pub const CHAIN: u64 = 8453;
/// One ether in wei.
pub const ONE_ETH: &str = "1000000000000000000";

pub struct Harness {
    pub engine: Arc<KeeperEngine>,
    pub store: InMemoryStore,
    pub faults: Arc<FaultyStore>,
    pub chain: Arc<MockChain>,
    pub facilitator: Arc<MockFacilitator>,
    pub clock: Arc<ManualClock>,
}

pub fn config() -> KeeperConfig {
    KeeperConfig {
        timeouts: Timeouts {
            read_ms: 200,
            indexer_ms: 200,
            transaction_ms: 500,
        },
        retry: RetryPolicy {
            attempts: 3,
            base_backoff_ms: 1,
        },
        chains: vec![ChainProfile {
            chain_id: CHAIN,
            name: "base".to_string(),
            strategy: StrategyKind::UniswapV4,
            wrapped_native: Address::repeat_byte(0x04),
            stable: Some(Address::repeat_byte(0x05)),
            known_hooks: vec![],
            identity_registry: true,
        }],
        ..KeeperConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(MockChain::new(), MockFacilitator::accepting(), config())
}

pub fn harness_with(chain: MockChain, facilitator: MockFacilitator, config: KeeperConfig) -> Harness {
    let store = InMemoryStore::new();
    let faults = Arc::new(FaultyStore::new(store.clone()));
    let chain = Arc::new(chain);
    let facilitator = Arc::new(facilitator);
    let clock = Arc::new(ManualClock::new());
    let collaborators = Collaborators {
        ledger: faults.clone(),
        entities: faults.clone(),
        pools: faults.clone(),
        chain: chain.clone(),
        facilitator: facilitator.clone(),
        indexer: Some(Arc::new(MockIndexer::failing())),
        log_sources: vec![Arc::new(MockLogSource::failing("archive"))],
        keys: Arc::new(HmacKeyDeriver::new(&[9u8; 32]).unwrap()),
    };
    let engine = KeeperEngine::new(config, collaborators, clock.clone()).unwrap();
    Harness {
        engine: Arc::new(engine),
        store,
        faults,
        chain,
        facilitator,
        clock,
    }
}

pub fn pay_to() -> Address {
    Address::repeat_byte(0x77)
}

pub fn signing_key(byte: u8) -> SigningKey {
    let mut secret = [0u8; 32];
    secret[31] = byte;
    SigningKey::from_slice(&secret).unwrap()
}

/// The payer every fixture proof is drawn from.
pub fn payer_key() -> SigningKey {
    signing_key(7)
}

pub fn payer() -> Address {
    address_of(payer_key().verifying_key())
}

pub fn stranger() -> Address {
    Address::repeat_byte(0x0b)
}

pub fn proof(nonce: &str, value: &str) -> PaymentProof {
    PaymentProof {
        x402_version: 1,
        scheme: "exact".to_string(),
        network: "base".to_string(),
        payload: ExactPayload {
            signature: "0xdeadbeef".to_string(),
            authorization: Authorization {
                from: payer(),
                to: pay_to(),
                value: value.to_string(),
                valid_after: 0,
                valid_before: u64::MAX,
                nonce: nonce.to_string(),
            },
        },
    }
}

pub fn requirements(amount: &str) -> PaymentRequirements {
    PaymentRequirements {
        scheme: "exact".to_string(),
        network: "base".to_string(),
        asset: Address::repeat_byte(0x55),
        pay_to: pay_to(),
        max_amount_required: amount.to_string(),
        resource: "/launch".to_string(),
        description: "token launch".to_string(),
        max_timeout_seconds: 60,
    }
}

pub fn launch_request(nonce: &str, value: &str, wallet_count: u32) -> LaunchRequest {
    LaunchRequest {
        payment_header: proof(nonce, value).to_header().unwrap(),
        requirements: requirements("1000"),
        chain_id: CHAIN,
        name: "Eigen Agent".to_string(),
        symbol: "EGN".to_string(),
        description: "autonomous market maker".to_string(),
        wallet_count,
        owner_override: None,
    }
}

pub fn payment_key(nonce: &str, value: &str) -> PaymentKey {
    proof(nonce, value).key().unwrap()
}

/// A personal-sign override from `signer` handing the launch to `owner`.
pub fn owner_override(signer: &SigningKey, owner: Address, request: &LaunchRequest) -> OwnerOverride {
    let proof = PaymentProof::from_header(&request.payment_header).unwrap();
    let message = OwnerOverride::message(&owner, &request.symbol, request.chain_id, &proof.key().unwrap());
    let digest = personal_message_hash(message.as_bytes());
    let (signature, recovery_id) = signer.sign_prehash_recoverable(&digest).unwrap();
    let mut raw = signature.to_bytes().to_vec();
    raw.push(recovery_id.to_byte() + 27);
    OwnerOverride {
        owner,
        signature: format!("0x{}", hex::encode(raw)),
    }
}
