use super::bounded;
use crate::config::RetryPolicy;
use crate::domain::entity::EntityId;
use crate::domain::payment::{
    LockOutcome, PaymentKey, PaymentProof, PaymentRecord, PaymentRequirements, Settlement,
};
use crate::domain::ports::{FacilitatorRef, LedgerRef};
use crate::domain::primitives::{Address, U256};
use crate::error::{KeeperError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A locked, verified and settled payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub key: PaymentKey,
    pub settlement: Settlement,
}

/// Single-use enforcement of payment proofs.
///
/// The ledger's atomic insert is the only linearization point: for a given key
/// at most one caller gets past `lock`, so the value-delivering workflow runs
/// at most once per proof.
pub struct PaymentGate {
    ledger: LedgerRef,
    facilitator: FacilitatorRef,
    retry: RetryPolicy,
    verify_timeout: Duration,
    settle_timeout: Duration,
    storage_timeout: Duration,
}

impl PaymentGate {
    pub fn new(
        ledger: LedgerRef,
        facilitator: FacilitatorRef,
        retry: RetryPolicy,
        verify_timeout: Duration,
        settle_timeout: Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            facilitator,
            retry,
            verify_timeout,
            settle_timeout,
            storage_timeout,
        }
    }

    /// Tries to take the lock for `key` by inserting a pending record.
    pub async fn lock(&self, key: &PaymentKey, product_ref: &str) -> Result<LockOutcome> {
        let record = PaymentRecord::pending(key.clone(), product_ref);
        let inserted = bounded(
            "storage",
            self.storage_timeout,
            self.ledger.insert_if_absent(record),
        )
        .await?;
        if inserted {
            debug!(payment_key = %key, "payment lock acquired");
            Ok(LockOutcome::Acquired)
        } else {
            info!(payment_key = %key, "duplicate payment proof");
            Ok(LockOutcome::Duplicate)
        }
    }

    /// Records the verified payer and amount on a held lock.
    pub async fn finalize(
        &self,
        key: &PaymentKey,
        payer: Address,
        amount: U256,
        entity_id: Option<EntityId>,
    ) -> Result<()> {
        let mut record = bounded("storage", self.storage_timeout, self.ledger.get(key))
            .await?
            .ok_or_else(|| KeeperError::Storage(format!("payment lock {key} vanished")))?;
        record.payer = Some(payer);
        record.amount = amount;
        record.entity_id = entity_id;
        bounded("storage", self.storage_timeout, self.ledger.update(record)).await
    }

    /// Deletes the record so the proof can be presented again.
    pub async fn release(&self, key: &PaymentKey) -> Result<()> {
        bounded("storage", self.storage_timeout, self.ledger.delete(key)).await?;
        info!(payment_key = %key, "payment lock released");
        Ok(())
    }

    /// Verifies then settles `proof` with the facilitator.
    ///
    /// Transient facilitator failures are retried with exponential backoff.
    pub async fn verify_and_settle(
        &self,
        proof: &PaymentProof,
        requirements: &PaymentRequirements,
    ) -> Result<Settlement> {
        requirements.check(proof, unix_now())?;

        let verdict = self
            .with_retry("verify", move || {
                bounded(
                    "facilitator",
                    self.verify_timeout,
                    self.facilitator.verify(proof, requirements),
                )
            })
            .await?;
        if !verdict.is_valid {
            return Err(KeeperError::PaymentInvalid(
                verdict
                    .invalid_reason
                    .unwrap_or_else(|| "rejected by facilitator".to_string()),
            ));
        }

        let settled = self
            .with_retry("settle", move || {
                bounded(
                    "facilitator",
                    self.settle_timeout,
                    self.facilitator.settle(proof, requirements),
                )
            })
            .await?;
        if !settled.success {
            return Err(KeeperError::PaymentInvalid(
                settled
                    .error_reason
                    .unwrap_or_else(|| "settlement failed".to_string()),
            ));
        }

        Settlement::from_responses(proof, &verdict, &settled)
    }

    /// Locks, verifies and settles a proof in one step.
    ///
    /// Any failure after the lock is taken releases it again, so the proof
    /// stays retryable; a duplicate key fails with `PaymentConflict`.
    pub async fn admit(
        &self,
        proof: &PaymentProof,
        requirements: &PaymentRequirements,
        product_ref: &str,
        entity_id: Option<EntityId>,
    ) -> Result<Admission> {
        let key = proof.key()?;
        if self.lock(&key, product_ref).await? == LockOutcome::Duplicate {
            return Err(KeeperError::PaymentConflict(key.to_string()));
        }

        let settlement = match self.verify_and_settle(proof, requirements).await {
            Ok(settlement) => settlement,
            Err(err) => {
                warn!(payment_key = %key, error = %err, "payment verification failed");
                self.release_after(&key, &err).await;
                return Err(err);
            }
        };

        if let Err(err) = self
            .finalize(&key, settlement.payer, settlement.amount, entity_id)
            .await
        {
            self.release_after(&key, &err).await;
            return Err(err);
        }
        info!(payment_key = %key, payer = %format!("{:#x}", settlement.payer), amount = %settlement.amount, "payment admitted");
        Ok(Admission { key, settlement })
    }

    /// Releases a lock on a failure path; the original failure is what the
    /// caller reports, so a release error is only logged.
    async fn release_after(&self, key: &PaymentKey, cause: &KeeperError) {
        if let Err(err) = self.release(key).await {
            error!(payment_key = %key, cause = %cause, error = %err, "payment lock release failed");
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_transient() && attempt < self.retry.attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(operation, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying facilitator call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
