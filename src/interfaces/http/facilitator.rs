use crate::domain::payment::{PaymentProof, PaymentRequirements, SettleResponse, VerifyResponse};
use crate::domain::ports::Facilitator;
use crate::error::{KeeperError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const SNIPPET_CHARS: usize = 200;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorRequest<'a> {
    x402_version: u32,
    payment_payload: &'a PaymentProof,
    payment_requirements: &'a PaymentRequirements,
}

/// Facilitator reached over HTTP at `{base_url}/verify` and `{base_url}/settle`.
pub struct HttpFacilitator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFacilitator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KeeperError::Internal(Box::new(e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post(&self, path: &str, proof: &PaymentProof, requirements: &PaymentRequirements) -> Result<(u16, String)> {
        let url = format!("{}/{path}", self.base_url);
        let body = FacilitatorRequest {
            x402_version: proof.x402_version,
            payment_payload: proof,
            payment_requirements: requirements,
        };
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| KeeperError::upstream("facilitator", e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| KeeperError::upstream("facilitator", e.to_string()))?;
        debug!(%url, status, "facilitator answered");
        Ok((status, text))
    }
}

/// Turns an HTTP answer into a typed body. Server errors are transient;
/// anything else that does not parse becomes `Err(reason)` for the caller to
/// fold into a negative verdict.
fn interpret<T: DeserializeOwned>(status: u16, body: &str) -> Result<std::result::Result<T, String>> {
    if status >= 500 {
        return Err(KeeperError::upstream(
            "facilitator",
            format!("status {status}: {}", snippet(body)),
        ));
    }
    if status >= 400 {
        return Ok(Err(format!("status {status}: {}", snippet(body))));
    }
    Ok(serde_json::from_str(body).map_err(|_| format!("unreadable response: {}", snippet(body))))
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    trimmed.chars().take(SNIPPET_CHARS).collect()
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify(&self, proof: &PaymentProof, requirements: &PaymentRequirements) -> Result<VerifyResponse> {
        let (status, body) = self.post("verify", proof, requirements).await?;
        Ok(interpret(status, &body)?.unwrap_or_else(|reason| VerifyResponse {
            is_valid: false,
            invalid_reason: Some(reason),
            payer: None,
        }))
    }

    async fn settle(&self, proof: &PaymentProof, requirements: &PaymentRequirements) -> Result<SettleResponse> {
        let (status, body) = self.post("settle", proof, requirements).await?;
        Ok(interpret(status, &body)?.unwrap_or_else(|reason| SettleResponse {
            success: false,
            error_reason: Some(reason),
            transaction: None,
            network: None,
            payer: None,
        }))
    }
}
