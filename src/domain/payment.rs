use super::entity::EntityId;
use super::primitives::{Address, U256, format_address, parse_address, parse_u256};
use crate::error::{KeeperError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deduplication key of a payment proof: hex SHA-256 of its canonical content.
///
/// Derived from the signed payload itself, so a proof can be locked before any
/// on-chain transaction for it exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentKey(String);

impl PaymentKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transfer authorisation signed by the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: Address,
    pub to: Address,
    pub value: String,
    #[serde(with = "unix_seconds")]
    pub valid_after: u64,
    #[serde(with = "unix_seconds")]
    pub valid_before: u64,
    pub nonce: String,
}

/// Timestamps travel as decimal strings but some clients send bare numbers.
mod unix_seconds {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(value),
            Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactPayload {
    pub signature: String,
    pub authorization: Authorization,
}

/// A signed payment commitment carried in the payment header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ExactPayload,
}

impl PaymentProof {
    /// Decodes a base64 payment header.
    pub fn from_header(header: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(header.trim())
            .map_err(|e| KeeperError::Validation(format!("payment header is not base64: {e}")))?;
        let mut proof: PaymentProof = serde_json::from_slice(&raw)
            .map_err(|e| KeeperError::Validation(format!("malformed payment header: {e}")))?;
        proof.normalize();
        Ok(proof)
    }

    pub fn to_header(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    fn normalize(&mut self) {
        self.scheme = self.scheme.trim().to_ascii_lowercase();
        self.network = self.network.trim().to_ascii_lowercase();
        self.payload.signature = self.payload.signature.trim().to_ascii_lowercase();
        self.payload.authorization.nonce = self.payload.authorization.nonce.trim().to_ascii_lowercase();
        self.payload.authorization.value = self.payload.authorization.value.trim().to_string();
    }

    /// Content hash over the normalised proof.
    pub fn key(&self) -> Result<PaymentKey> {
        let mut normalized = self.clone();
        normalized.normalize();
        let canonical = serde_json::to_vec(&normalized)?;
        Ok(PaymentKey(hex::encode(Sha256::digest(&canonical))))
    }

    /// The payer named in the authorisation; not trusted until verified.
    pub fn claimed_payer(&self) -> Address {
        self.payload.authorization.from
    }

    pub fn value(&self) -> Result<U256> {
        parse_u256(&self.payload.authorization.value)
    }
}

/// What a payment must satisfy to unlock a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub asset: Address,
    pub pay_to: Address,
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub max_timeout_seconds: u64,
}

impl PaymentRequirements {
    /// Checks the proof against the requirements without contacting anyone.
    pub fn check(&self, proof: &PaymentProof, now_unix: u64) -> Result<()> {
        if !proof.scheme.eq_ignore_ascii_case(&self.scheme) {
            return Err(KeeperError::PaymentInvalid(format!(
                "scheme {} does not match {}",
                proof.scheme, self.scheme
            )));
        }
        if !proof.network.eq_ignore_ascii_case(&self.network) {
            return Err(KeeperError::PaymentInvalid(format!(
                "network {} does not match {}",
                proof.network, self.network
            )));
        }
        let auth = &proof.payload.authorization;
        if auth.to != self.pay_to {
            return Err(KeeperError::PaymentInvalid(format!(
                "recipient {} is not {}",
                format_address(&auth.to),
                format_address(&self.pay_to)
            )));
        }
        let required = parse_u256(&self.max_amount_required)?;
        let offered = proof
            .value()
            .map_err(|_| KeeperError::PaymentInvalid("unreadable payment value".to_string()))?;
        if offered < required {
            return Err(KeeperError::PaymentInvalid(format!(
                "value {offered} below required {required}"
            )));
        }
        if now_unix < auth.valid_after || now_unix >= auth.valid_before {
            return Err(KeeperError::PaymentInvalid(format!(
                "authorization not valid at {now_unix} (window {}..{})",
                auth.valid_after, auth.valid_before
            )));
        }
        Ok(())
    }
}

/// Facilitator verdict on a proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
}

/// Facilitator settlement result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
}

/// A verified and settled payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub valid: bool,
    pub payer: Address,
    pub amount: U256,
    pub settlement_ref: Option<String>,
}

impl Settlement {
    /// Combines the facilitator responses with the proof they refer to.
    pub fn from_responses(proof: &PaymentProof, verify: &VerifyResponse, settle: &SettleResponse) -> Result<Self> {
        let reported = settle.payer.as_deref().or(verify.payer.as_deref());
        let payer = match reported {
            Some(raw) => parse_address(raw)
                .map_err(|_| KeeperError::PaymentInvalid(format!("facilitator reported bad payer {raw}")))?,
            None => proof.claimed_payer(),
        };
        if payer != proof.claimed_payer() {
            return Err(KeeperError::PaymentInvalid(format!(
                "facilitator payer {} differs from authorization {}",
                format_address(&payer),
                format_address(&proof.claimed_payer())
            )));
        }
        Ok(Self {
            valid: true,
            payer,
            amount: proof.value()?,
            settlement_ref: settle.transaction.clone(),
        })
    }
}

/// Result of trying to lock a payment key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Duplicate,
}

/// Ledger row for a payment key.
///
/// `payer == None` marks a lock in progress; it is finalized or deleted before
/// the request that created it completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub key: PaymentKey,
    pub payer: Option<Address>,
    pub amount: U256,
    pub product_ref: String,
    pub entity_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn pending(key: PaymentKey, product_ref: impl Into<String>) -> Self {
        Self {
            key,
            payer: None,
            amount: U256::zero(),
            product_ref: product_ref.into(),
            entity_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.payer.is_none()
    }
}
