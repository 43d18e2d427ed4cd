use crate::domain::entity::{EntityId, EntityStatus};
use thiserror::Error;

/// Errors surfaced by the keeper core.
///
/// The variants follow the keeper's error taxonomy: validation and auth errors
/// never carry side effects, payment errors leave the ledger in a well-defined
/// state, and partial failures always name the entity status that was recorded.
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Authorization error: {0}")]
    Auth(String),
    #[error("Payment proof already used: {0}")]
    PaymentConflict(String),
    #[error("Payment invalid: {0}")]
    PaymentInvalid(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Upstream {service} unavailable: {message}")]
    Upstream { service: String, message: String },
    #[error("Entity {entity_id} stopped in {status}: {reason}")]
    PartialFailure {
        entity_id: EntityId,
        status: EntityStatus,
        reason: String,
    },
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl KeeperError {
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Stable snake_case code for the dispatch layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Auth(_) => "auth_error",
            Self::PaymentConflict(_) => "payment_conflict",
            Self::PaymentInvalid(_) => "payment_invalid",
            Self::NotFound(_) => "resolution_not_found",
            Self::Upstream { .. } => "upstream_unavailable",
            Self::PartialFailure { .. } => "partial_failure",
            Self::RateLimited(_) => "rate_limited",
            Self::Storage(_) | Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => {
                "internal_error"
            }
            #[cfg(feature = "storage-rocksdb")]
            Self::RocksDb(_) => "internal_error",
        }
    }

    /// Whether a bounded local retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_taxonomy() {
        assert_eq!(
            KeeperError::Validation("x".into()).code(),
            "validation_error"
        );
        assert_eq!(
            KeeperError::PaymentConflict("k".into()).code(),
            "payment_conflict"
        );
        assert_eq!(
            KeeperError::upstream("facilitator", "timeout").code(),
            "upstream_unavailable"
        );
        let err = KeeperError::PartialFailure {
            entity_id: EntityId::from("e-1"),
            status: EntityStatus::PendingLp,
            reason: "seed reverted".into(),
        };
        assert_eq!(err.code(), "partial_failure");
        assert!(err.to_string().contains("pending_lp"));
    }

    #[test]
    fn test_only_upstream_is_transient() {
        assert!(KeeperError::upstream("rpc", "reset").is_transient());
        assert!(!KeeperError::PaymentInvalid("bad sig".into()).is_transient());
        assert!(!KeeperError::Storage("full".into()).is_transient());
    }
}
