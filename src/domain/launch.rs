use super::allocation::Allocation;
use super::entity::{EntityId, EntityStatus, TxRefs};
use super::payment::{PaymentKey, PaymentRequirements};
use super::primitives::{Address, ChainId, format_address, keccak256};
use crate::error::{KeeperError, Result};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Bounds on how many trading wallets a launch may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletLimits {
    pub min: u32,
    pub max: u32,
}

impl Default for WalletLimits {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

impl WalletLimits {
    pub fn check(&self, requested: u32) -> Result<()> {
        if requested < self.min || requested > self.max {
            return Err(KeeperError::Validation(format!(
                "wallet count {requested} outside allowed range {}..={}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Character caps for user-supplied token metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextLimits {
    pub name: usize,
    pub symbol: usize,
    pub description: usize,
}

impl Default for TextLimits {
    fn default() -> Self {
        Self {
            name: 64,
            symbol: 16,
            description: 512,
        }
    }
}

/// Strips control and bidirectional-override characters, trims, and caps at
/// `max_chars` characters.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() && !is_directional_format(*c))
        .collect();
    cleaned.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}

fn is_directional_format(c: char) -> bool {
    matches!(
        c,
        '\u{200E}' | '\u{200F}' | '\u{061C}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}'
    )
}

/// Signed request to record someone other than the payer as owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerOverride {
    pub owner: Address,
    /// 65-byte `r || s || v` personal-sign signature, hex encoded.
    pub signature: String,
}

impl OwnerOverride {
    /// The message the payer signs to hand ownership to `owner`.
    pub fn message(owner: &Address, symbol: &str, chain_id: ChainId, payment: &PaymentKey) -> String {
        format!(
            "Assign launch ownership\nowner: {}\nsymbol: {symbol}\nchain: {chain_id}\npayment: {payment}",
            format_address(owner)
        )
    }

    /// Whether `payer` signed this override for the given launch.
    pub fn is_signed_by(&self, payer: &Address, symbol: &str, chain_id: ChainId, payment: &PaymentKey) -> bool {
        let message = Self::message(&self.owner, symbol, chain_id, payment);
        match recover_personal_signer(message.as_bytes(), &self.signature) {
            Ok(signer) => &signer == payer,
            Err(_) => false,
        }
    }
}

/// EIP-191 `personal_sign` digest.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    keccak256(&prefixed).0
}

/// Recovers the address that produced a personal-sign signature.
pub fn recover_personal_signer(message: &[u8], signature_hex: &str) -> Result<Address> {
    let raw = hex::decode(signature_hex.trim().trim_start_matches("0x"))
        .map_err(|_| KeeperError::Auth("signature is not hex".to_string()))?;
    if raw.len() != 65 {
        return Err(KeeperError::Auth(format!(
            "signature must be 65 bytes, got {}",
            raw.len()
        )));
    }
    let v = match raw[64] {
        27 | 28 => raw[64] - 27,
        0 | 1 => raw[64],
        other => {
            return Err(KeeperError::Auth(format!("bad recovery byte {other}")));
        }
    };
    let signature = Signature::from_slice(&raw[..64])
        .map_err(|_| KeeperError::Auth("malformed signature".to_string()))?;
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| KeeperError::Auth("bad recovery id".to_string()))?;
    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| KeeperError::Auth("signature recovery failed".to_string()))?;
    Ok(address_of(&key))
}

/// Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash.as_bytes()[12..])
}

/// A client's request to launch a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Base64 payment header.
    pub payment_header: String,
    pub requirements: PaymentRequirements,
    pub chain_id: ChainId,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    pub wallet_count: u32,
    #[serde(default)]
    pub owner_override: Option<OwnerOverride>,
}

/// Token metadata after sanitisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub description: String,
}

impl LaunchRequest {
    /// Checks everything that can be decided before touching the ledger.
    pub fn validate(&self, wallets: &WalletLimits, text: &TextLimits) -> Result<TokenMetadata> {
        wallets.check(self.wallet_count)?;
        let metadata = TokenMetadata {
            name: sanitize_text(&self.name, text.name),
            symbol: sanitize_text(&self.symbol, text.symbol),
            description: sanitize_text(&self.description, text.description),
        };
        if metadata.name.is_empty() {
            return Err(KeeperError::Validation("token name is empty".to_string()));
        }
        if metadata.symbol.is_empty() {
            return Err(KeeperError::Validation("token symbol is empty".to_string()));
        }
        Ok(metadata)
    }
}

/// What `execute_launch` reports back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchOutcome {
    pub entity_id: EntityId,
    pub token: Option<Address>,
    pub owner: Address,
    pub status: EntityStatus,
    pub allocation: Allocation,
    pub tx_refs: TxRefs,
    /// An override was supplied but not signed by the payer.
    pub owner_override_rejected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn signing_key(byte: u8) -> SigningKey {
        let mut secret = [0u8; 32];
        secret[31] = byte;
        SigningKey::from_slice(&secret).unwrap()
    }

    fn sign(key: &SigningKey, message: &str) -> String {
        let digest = personal_message_hash(message.as_bytes());
        let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
        let mut raw = signature.to_bytes().to_vec();
        raw.push(recovery_id.to_byte() + 27);
        format!("0x{}", hex::encode(raw))
    }

    #[test]
    fn test_address_of_known_key() {
        let key = signing_key(1);
        assert_eq!(
            format_address(&address_of(key.verifying_key())),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_override_signed_by_payer() {
        let payer_key = signing_key(7);
        let payer = address_of(payer_key.verifying_key());
        let payment = PaymentKey::new("abc");
        let owner = Address::repeat_byte(0x42);
        let signature = sign(&payer_key, &OwnerOverride::message(&owner, "EGN", 8453, &payment));

        let override_ = OwnerOverride { owner, signature };
        assert!(override_.is_signed_by(&payer, "EGN", 8453, &payment));
        assert!(!override_.is_signed_by(&payer, "EGN", 1, &payment));
        assert!(!override_.is_signed_by(&Address::repeat_byte(0x01), "EGN", 8453, &payment));
    }

    #[test]
    fn test_garbage_signature_is_rejected() {
        assert!(recover_personal_signer(b"hi", "0x1234").is_err());
        assert!(recover_personal_signer(b"hi", "zz").is_err());
    }

    #[test]
    fn test_sanitize_strips_controls_and_overrides() {
        assert_eq!(sanitize_text("  Eig\u{202E}en\u{0007} ", 64), "Eigen");
        assert_eq!(sanitize_text("ab\u{2066}cd\u{200F}", 64), "abcd");
        assert_eq!(sanitize_text("line\nbreak", 64), "linebreak");
    }

    #[test]
    fn test_sanitize_caps_length() {
        assert_eq!(sanitize_text("ABCDEFGHIJ", 4), "ABCD");
        assert_eq!(sanitize_text("ééééé", 3), "ééé");
    }

    #[test]
    fn test_wallet_limits() {
        let limits = WalletLimits { min: 1, max: 5 };
        assert!(limits.check(1).is_ok());
        assert!(limits.check(5).is_ok());
        assert!(matches!(limits.check(0), Err(KeeperError::Validation(_))));
        assert!(matches!(limits.check(6), Err(KeeperError::Validation(_))));
    }
}
