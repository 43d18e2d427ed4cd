//! Application layer containing the keeper's orchestration logic.
//!
//! `KeeperEngine` is the entry point for the dispatch layer. It wires the
//! payment gate, pool resolver, ownership chain and launch orchestrator over
//! the ports defined in `domain::ports`.

pub mod cache;
pub mod engine;
pub mod gate;
pub mod orchestrator;
pub mod ownership;
pub mod pool_resolver;
pub mod tasks;

use crate::error::{KeeperError, Result};
use std::future::Future;
use std::time::Duration;

/// Awaits `call` for at most `limit`, mapping expiry to an upstream error.
pub(crate) async fn bounded<T, F>(service: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(KeeperError::upstream(
            service,
            format!("no answer within {}ms", limit.as_millis()),
        )),
    }
}
