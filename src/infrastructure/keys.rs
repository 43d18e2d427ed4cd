use crate::domain::entity::EntityId;
use crate::domain::launch::address_of;
use crate::domain::ports::{KeyDeriver, SubIdentity};
use crate::error::{KeeperError, Result};
use hmac::{Hmac, Mac};
use k256::ecdsa::SigningKey;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

const DOMAIN: &[u8] = b"keeper/sub-identity/v1";

/// Parent secret, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct ParentSecret(Vec<u8>);

/// Derives per-entity trading wallets from a parent secret with HMAC-SHA256.
///
/// The secret never leaves this type: callers only ever see derived
/// addresses.
#[derive(Clone)]
pub struct HmacKeyDeriver {
    secret: ParentSecret,
}

impl HmacKeyDeriver {
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < 32 {
            return Err(KeeperError::Validation(
                "parent secret must be at least 32 bytes".to_string(),
            ));
        }
        Ok(Self {
            secret: ParentSecret(secret.to_vec()),
        })
    }

    fn signing_key(&self, entity: &EntityId, index: u32) -> Result<SigningKey> {
        // A digest outside the curve order is astronomically unlikely; bump a
        // counter rather than fail outright.
        for attempt in 0u8..4 {
            let mut mac = HmacSha256::new_from_slice(&self.secret.0)
                .map_err(|e| KeeperError::Internal(Box::new(std::io::Error::other(e.to_string()))))?;
            mac.update(DOMAIN);
            mac.update(entity.as_str().as_bytes());
            mac.update(&index.to_be_bytes());
            mac.update(&[attempt]);
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&mac.finalize().into_bytes());
            let key = SigningKey::from_slice(&digest);
            digest.zeroize();
            if let Ok(key) = key {
                return Ok(key);
            }
        }
        Err(KeeperError::Internal(Box::new(std::io::Error::other(
            "no valid scalar derived",
        ))))
    }
}

impl KeyDeriver for HmacKeyDeriver {
    fn derive(&self, entity: &EntityId, index: u32) -> Result<SubIdentity> {
        let key = self.signing_key(entity, index)?;
        Ok(SubIdentity {
            index,
            address: address_of(key.verifying_key()),
        })
    }
}

impl fmt::Debug for HmacKeyDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacKeyDeriver(***)")
    }
}
