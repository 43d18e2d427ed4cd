use crate::error::{KeeperError, Result};
use sha3::{Digest, Keccak256};

pub use primitive_types::{H160 as Address, H256 as Hash, U256};

/// EVM chain identifier.
pub type ChainId = u64;

/// Keccak-256 as used by the EVM.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash::from_slice(&hasher.finalize())
}

/// Parses a hex address. Case is ignored, the `0x` prefix is optional.
pub fn parse_address(value: &str) -> Result<Address> {
    let trimmed = value.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if hex_part.len() != 40 {
        return Err(KeeperError::Validation(format!(
            "address must be 20 bytes: {value}"
        )));
    }
    let bytes = hex::decode(hex_part)
        .map_err(|_| KeeperError::Validation(format!("invalid address: {value}")))?;
    Ok(Address::from_slice(&bytes))
}

/// Parses a decimal or `0x`-prefixed hex integer.
pub fn parse_u256(value: &str) -> Result<U256> {
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex_part) => U256::from_str_radix(hex_part, 16).ok(),
        None => U256::from_dec_str(trimmed).ok(),
    };
    parsed.ok_or_else(|| KeeperError::Validation(format!("invalid integer: {value}")))
}

/// Lowercase, `0x`-prefixed, unabbreviated.
pub fn format_address(address: &Address) -> String {
    format!("{address:#x}")
}

/// Left-pads an address into a 32-byte ABI word.
pub(crate) fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// Reads the low 20 bytes of an ABI word.
pub(crate) fn word_address(word: &[u8]) -> Address {
    Address::from_slice(&word[12..32])
}
