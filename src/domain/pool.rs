use super::primitives::{Address, ChainId, Hash, U256, address_word, keccak256, word_address};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `keccak256("Initialize(bytes32,address,address,uint24,int24,address,uint160,int24)")`
pub const INITIALIZE_TOPIC: [u8; 32] = [
    0xdd, 0x46, 0x6e, 0x67, 0x4e, 0xa5, 0x57, 0xf5, 0x62, 0x95, 0xe2, 0xd0, 0x21, 0x8a, 0x12, 0x5e,
    0xa4, 0xb4, 0xf0, 0xf6, 0xf3, 0x30, 0x7b, 0x95, 0xf8, 0x5e, 0x61, 0x10, 0x83, 0x8d, 0x64, 0x38,
];

/// Fee tier / tick spacing pairs the singleton pool manager is usually initialised with.
pub const CANONICAL_FEE_TICKS: [(u32, i32); 4] = [(500, 10), (3_000, 60), (10_000, 200), (100, 1)];

/// Trading venue generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    V2,
    V3,
    V4,
}

impl ProtocolVersion {
    /// V4 pools live inside a singleton and are addressed by hash.
    pub fn is_hash_addressed(&self) -> bool {
        matches!(self, Self::V4)
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V2 => f.write_str("v2"),
            Self::V3 => f.write_str("v3"),
            Self::V4 => f.write_str("v4"),
        }
    }
}

/// Where a pool lives: a dedicated contract or an id inside a singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRef {
    Address(Address),
    Id(Hash),
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{address:#x}"),
            Self::Id(id) => write!(f, "{id:#x}"),
        }
    }
}

/// The full key of a hash-addressed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub currency0: Address,
    pub currency1: Address,
    pub fee: u32,
    pub tick_spacing: i32,
    pub hooks: Address,
}

impl PoolKey {
    /// Builds a key with currencies in numeric address order.
    pub fn new(token_a: Address, token_b: Address, fee: u32, tick_spacing: i32, hooks: Address) -> Self {
        let (currency0, currency1) = sort_tokens(token_a, token_b);
        Self {
            currency0,
            currency1,
            fee,
            tick_spacing,
            hooks,
        }
    }

    /// `keccak256(abi.encode(currency0, currency1, fee, tickSpacing, hooks))`.
    pub fn pool_id(&self) -> Hash {
        let mut encoded = [0u8; 160];
        encoded[0..32].copy_from_slice(&address_word(&self.currency0));
        encoded[32..64].copy_from_slice(&address_word(&self.currency1));
        encoded[64..96].copy_from_slice(&uint_word(u64::from(self.fee)));
        encoded[96..128].copy_from_slice(&int_word(i64::from(self.tick_spacing)));
        encoded[128..160].copy_from_slice(&address_word(&self.hooks));
        keccak256(&encoded)
    }
}

/// Orders two tokens by their numeric address value.
pub fn sort_tokens(a: Address, b: Address) -> (Address, Address) {
    // Big-endian fixed width, so byte order is numeric order.
    if a <= b { (a, b) } else { (b, a) }
}

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn int_word(value: i64) -> [u8; 32] {
    let fill = if value < 0 { 0xff } else { 0x00 };
    let mut word = [fill; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Resolved identity and parameters of a token's trading venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    pub chain_id: ChainId,
    pub protocol: ProtocolVersion,
    pub pool: PoolRef,
    pub fee: u32,
    pub tick_spacing: Option<i32>,
    pub hooks: Option<Address>,
    pub token0: Address,
    pub token1: Address,
    pub is_base_token_pair: bool,
}

impl PoolDescriptor {
    /// Descriptor for a hash-addressed pool.
    pub fn from_key(chain_id: ChainId, key: &PoolKey, is_base_token_pair: bool) -> Self {
        Self {
            chain_id,
            protocol: ProtocolVersion::V4,
            pool: PoolRef::Id(key.pool_id()),
            fee: key.fee,
            tick_spacing: Some(key.tick_spacing),
            hooks: Some(key.hooks),
            token0: key.currency0,
            token1: key.currency1,
            is_base_token_pair,
        }
    }

    /// Descriptor for a contract-addressed pool.
    pub fn at_address(
        chain_id: ChainId,
        protocol: ProtocolVersion,
        address: Address,
        token_a: Address,
        token_b: Address,
        fee: u32,
        is_base_token_pair: bool,
    ) -> Self {
        let (token0, token1) = sort_tokens(token_a, token_b);
        Self {
            chain_id,
            protocol,
            pool: PoolRef::Address(address),
            fee,
            tick_spacing: None,
            hooks: None,
            token0,
            token1,
            is_base_token_pair,
        }
    }

    pub fn key(&self) -> Option<PoolKey> {
        match (self.protocol, self.tick_spacing, self.hooks) {
            (ProtocolVersion::V4, Some(tick_spacing), Some(hooks)) => Some(PoolKey {
                currency0: self.token0,
                currency1: self.token1,
                fee: self.fee,
                tick_spacing,
                hooks,
            }),
            _ => None,
        }
    }

    pub fn contains(&self, token: &Address) -> bool {
        &self.token0 == token || &self.token1 == token
    }
}

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub block_number: u64,
}

/// Decoded pool-manager `Initialize` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeEvent {
    pub id: Hash,
    pub key: PoolKey,
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

impl InitializeEvent {
    /// Decodes an `Initialize` log; `None` if it is not one, is truncated, or
    /// its fields do not hash back to the indexed id.
    pub fn decode(log: &LogEntry) -> Option<Self> {
        if log.topics.len() != 4 || log.topics[0].as_bytes() != INITIALIZE_TOPIC {
            return None;
        }
        if log.data.len() < 160 {
            return None;
        }
        let word = |i: usize| &log.data[i * 32..(i + 1) * 32];

        let key = PoolKey {
            currency0: word_address(log.topics[2].as_bytes()),
            currency1: word_address(log.topics[3].as_bytes()),
            fee: word_u32(word(0)),
            tick_spacing: word_i32(word(1)),
            hooks: word_address(word(2)),
        };
        let id = log.topics[1];
        if key.pool_id() != id {
            return None;
        }
        Some(Self {
            id,
            key,
            sqrt_price_x96: U256::from_big_endian(word(3)),
            tick: word_i32(word(4)),
        })
    }

    /// Encodes the event as the pool manager at `manager` would emit it.
    pub fn to_log(&self, manager: Address, block_number: u64) -> LogEntry {
        let mut price = [0u8; 32];
        self.sqrt_price_x96.to_big_endian(&mut price);
        let mut data = Vec::with_capacity(160);
        data.extend_from_slice(&uint_word(u64::from(self.key.fee)));
        data.extend_from_slice(&int_word(i64::from(self.key.tick_spacing)));
        data.extend_from_slice(&address_word(&self.key.hooks));
        data.extend_from_slice(&price);
        data.extend_from_slice(&int_word(i64::from(self.tick)));
        LogEntry {
            address: manager,
            topics: vec![
                Hash::from(INITIALIZE_TOPIC),
                self.id,
                Hash::from(address_word(&self.key.currency0)),
                Hash::from(address_word(&self.key.currency1)),
            ],
            data,
            block_number,
        }
    }
}

fn word_u32(word: &[u8]) -> u32 {
    u32::from_be_bytes([word[28], word[29], word[30], word[31]])
}

fn word_i32(word: &[u8]) -> i32 {
    // Values are sign-extended to 256 bits, so the low four bytes carry the sign.
    i32::from_be_bytes([word[28], word[29], word[30], word[31]])
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.strip_prefix("0x").unwrap_or(&raw);
        hex::decode(trimmed).map_err(serde::de::Error::custom)
    }
}
