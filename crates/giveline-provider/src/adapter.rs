//! Payment-provider HTTP adapter.
//!
//! ## Resilience
//!
//! * Transient failures (connect errors, 429, 5xx on idempotent reads) are
//!   retried with exponential back-off up to [`MAX_ATTEMPTS`] attempts.
//! * A `create_charge` call that times out after the request may have reached
//!   the provider is reported as [`ProviderCallError::Ambiguous`] and is
//!   never retried here. The caller must re-query the charge state first,
//!   otherwise the payer could be double-charged.
//! * Definitive declines are terminal and never retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use giveline_core::error::CoreError;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ProviderCallError {
    /// The request never reached the provider, or the provider asked us to
    /// slow down. Safe to retry.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The request may have been processed; the outcome is unknown. Must not
    /// be retried without re-querying state.
    #[error("ambiguous provider outcome: {0}")]
    Ambiguous(String),
    /// Definitive provider refusal (declined card, cancelled source).
    #[error("provider declined: {0}")]
    Declined(String),
    /// The provider answered with something we cannot interpret.
    #[error("provider protocol error: {0}")]
    Protocol(String),
}

impl From<ProviderCallError> for CoreError {
    fn from(err: ProviderCallError) -> Self {
        match err {
            ProviderCallError::Transient(message) => CoreError::provider_transient(message),
            ProviderCallError::Ambiguous(message) => CoreError::Provider {
                message,
                retryable: true,
            },
            ProviderCallError::Declined(message) => CoreError::provider_terminal(message),
            ProviderCallError::Protocol(message) => CoreError::provider_terminal(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatusKind {
    Pending,
    Chargeable,
    Consumed,
    Cancelled,
    Failed,
}

impl SourceStatusKind {
    pub fn parse(value: &str) -> Result<Self, ProviderCallError> {
        match value {
            "pending" => Ok(Self::Pending),
            "chargeable" => Ok(Self::Chargeable),
            "consumed" => Ok(Self::Consumed),
            "cancelled" | "expired" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(ProviderCallError::Protocol(format!(
                "unknown source status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub status: SourceStatusKind,
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub charge_id: String,
    pub status: ChargeStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub status: RefundStatus,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn get_source_status(&self, source_id: &str)
    -> Result<SourceStatus, ProviderCallError>;

    async fn create_charge(
        &self,
        source_id: &str,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<ChargeOutcome, ProviderCallError>;

    /// Look up the charge already created against a source, if any. Used to
    /// resolve an ambiguous `create_charge` outcome before retrying.
    async fn get_charge_for_source(
        &self,
        source_id: &str,
    ) -> Result<Option<ChargeOutcome>, ProviderCallError>;

    /// Payout collaborator: send the refunded amount back to the payer.
    async fn create_refund(
        &self,
        charge_id: &str,
        amount_minor_units: i64,
    ) -> Result<RefundOutcome, ProviderCallError>;
}

#[derive(Debug, Deserialize)]
struct ApiSource {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ApiCharge {
    id: String,
    status: String,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRefund {
    id: String,
    status: String,
}

pub struct HttpPaymentProvider {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpPaymentProvider {
    pub fn new(base_url: &str, secret_key: &str) -> Result<Self, ProviderCallError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProviderCallError::Protocol(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    /// GET with retry; safe because reads are idempotent.
    async fn get_json(&self, path: &str) -> Result<Value, ProviderCallError> {
        let url = format!("{}{path}", self.base_url);
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.secret_key)
                .send()
                .await;

            match response {
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!("provider read failed (attempt {attempt}): {err}");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff *= 2;
                }
                Err(err) => return Err(ProviderCallError::Transient(err.to_string())),
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt < MAX_ATTEMPTS {
                            warn!("provider read returned {status} (attempt {attempt})");
                            tokio::time::sleep(Duration::from_millis(backoff)).await;
                            backoff *= 2;
                            continue;
                        }
                        return Err(ProviderCallError::Transient(format!(
                            "provider returned {status}"
                        )));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(ProviderCallError::Protocol(format!("{url} not found")));
                    }
                    if !status.is_success() {
                        return Err(ProviderCallError::Declined(format!(
                            "provider returned {status}"
                        )));
                    }
                    return resp
                        .json::<Value>()
                        .await
                        .map_err(|e| ProviderCallError::Protocol(e.to_string()));
                }
            }
        }
        unreachable!("retry loop always returns")
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn get_source_status(
        &self,
        source_id: &str,
    ) -> Result<SourceStatus, ProviderCallError> {
        let raw = self.get_json(&format!("/sources/{source_id}")).await?;
        let source: ApiSource = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderCallError::Protocol(e.to_string()))?;
        Ok(SourceStatus {
            status: SourceStatusKind::parse(&source.status)?,
            raw,
        })
    }

    async fn create_charge(
        &self,
        source_id: &str,
        amount_minor_units: i64,
        currency: &str,
    ) -> Result<ChargeOutcome, ProviderCallError> {
        let url = format!("{}/charges", self.base_url);
        let body = json!({
            "source_id": source_id,
            "amount": amount_minor_units,
            "currency": currency,
        });
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .json(&body)
                .send()
                .await;

            match response {
                // A timeout may have fired after the request reached the
                // provider. Never blind-retry a charge in that state.
                Err(err) if err.is_timeout() => {
                    return Err(ProviderCallError::Ambiguous(format!(
                        "charge creation timed out: {err}"
                    )));
                }
                // Connect errors happen before anything was sent.
                Err(err) if err.is_connect() && attempt < MAX_ATTEMPTS => {
                    warn!("charge request could not connect (attempt {attempt}): {err}");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff *= 2;
                }
                Err(err) => return Err(ProviderCallError::Transient(err.to_string())),
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                        backoff *= 2;
                        continue;
                    }
                    if status.is_server_error() {
                        // The provider saw the request; outcome unknown.
                        return Err(ProviderCallError::Ambiguous(format!(
                            "provider returned {status} for charge creation"
                        )));
                    }
                    if status == StatusCode::PAYMENT_REQUIRED
                        || status == StatusCode::UNPROCESSABLE_ENTITY
                    {
                        let detail = resp.text().await.unwrap_or_default();
                        return Err(ProviderCallError::Declined(detail));
                    }
                    if !status.is_success() {
                        return Err(ProviderCallError::Protocol(format!(
                            "provider returned {status}"
                        )));
                    }
                    let charge: ApiCharge = resp
                        .json()
                        .await
                        .map_err(|e| ProviderCallError::Protocol(e.to_string()))?;
                    return Ok(parse_charge(charge)?);
                }
            }
        }
        unreachable!("retry loop always returns")
    }

    async fn get_charge_for_source(
        &self,
        source_id: &str,
    ) -> Result<Option<ChargeOutcome>, ProviderCallError> {
        let raw = self
            .get_json(&format!("/sources/{source_id}/charges"))
            .await?;
        let charges: Vec<ApiCharge> = serde_json::from_value(raw)
            .map_err(|e| ProviderCallError::Protocol(e.to_string()))?;
        charges.into_iter().next().map(parse_charge).transpose()
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        amount_minor_units: i64,
    ) -> Result<RefundOutcome, ProviderCallError> {
        let url = format!("{}/refunds", self.base_url);
        let body = json!({
            "charge_id": charge_id,
            "amount": amount_minor_units,
        });
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .json(&body)
                .send()
                .await;

            match response {
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!("refund request failed (attempt {attempt}): {err}");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff *= 2;
                }
                Err(err) => return Err(ProviderCallError::Transient(err.to_string())),
                Ok(resp) => {
                    let status = resp.status();
                    if (status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS)
                        && attempt < MAX_ATTEMPTS
                    {
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                        backoff *= 2;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(ProviderCallError::Transient(format!(
                            "provider returned {status} for refund"
                        )));
                    }
                    let refund: ApiRefund = resp
                        .json()
                        .await
                        .map_err(|e| ProviderCallError::Protocol(e.to_string()))?;
                    let status = match refund.status.as_str() {
                        "succeeded" => RefundStatus::Succeeded,
                        "pending" => RefundStatus::Pending,
                        "failed" => RefundStatus::Failed,
                        other => {
                            return Err(ProviderCallError::Protocol(format!(
                                "unknown refund status {other}"
                            )));
                        }
                    };
                    return Ok(RefundOutcome {
                        refund_id: refund.id,
                        status,
                    });
                }
            }
        }
        unreachable!("retry loop always returns")
    }
}

fn parse_charge(charge: ApiCharge) -> Result<ChargeOutcome, ProviderCallError> {
    let status = match charge.status.as_str() {
        "succeeded" | "paid" => ChargeStatus::Succeeded,
        "pending" => ChargeStatus::Pending,
        "failed" => ChargeStatus::Failed,
        other => {
            return Err(ProviderCallError::Protocol(format!(
                "unknown charge status {other}"
            )));
        }
    };
    Ok(ChargeOutcome {
        charge_id: charge.id,
        status,
        failure_reason: charge.failure_reason,
    })
}
