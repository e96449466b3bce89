//! Donation state machine.
//!
//! `pending -> chargeable -> succeeded -> completed` on the happy path,
//! `pending|chargeable -> failed` otherwise; `completed` and `failed` are
//! terminal. Two independent idempotency layers protect the campaign credit:
//! the event ledger rejects replays of a known event id, and the atomic
//! settle guard rejects a second settlement of the same donation even when
//! it arrives under a fresh event id. Provider event ids
//! are not always stable across retries of the same logical event, so
//! neither layer alone is enough.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use giveline_core::error::{CoreError, Result};
use giveline_core::events::{NotificationDispatcher, NotificationEvent};
use giveline_core::models::{Donation, DonationStatus, PaymentSession, SessionStatus};
use giveline_core::storage::{LedgerTotals, Store};
use giveline_provider::{
    ChargeOutcome, ChargeStatus, PaymentProvider, ProviderCallError, SourceStatusKind,
};

const LEDGER_WRITE_ATTEMPTS: u32 = 3;
const LEDGER_RETRY_DELAY_MS: u64 = 100;

/// Inbound provider webhook payload, as deserialized from the raw body.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ProviderEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEventData {
    pub source_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event id already processed; nothing to do.
    Duplicate,
    /// Valid event we deliberately do not act on.
    Ignored,
    /// Charge created and campaign credited.
    Completed,
    /// Donation was already settled; no re-credit.
    AlreadySettled,
    /// Donation failed terminally.
    Failed,
    /// Waiting on the provider; a later event will move the machine.
    Pending,
}

impl WebhookOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate event, already processed",
            Self::Ignored => "event acknowledged, nothing to do",
            Self::Completed => "donation completed and campaign credited",
            Self::AlreadySettled => "donation already settled",
            Self::Failed => "donation failed",
            Self::Pending => "awaiting payment provider",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub status: String,
    pub message: String,
}

enum ChargeAttempt {
    Created(ChargeOutcome),
    Declined(String),
}

#[derive(Clone)]
pub struct SettlementEngine {
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn PaymentProvider>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            provider,
            dispatcher,
        }
    }

    /// Webhook entry point. Dedup happens here; the raw payload is kept on
    /// the event ledger for audit.
    pub async fn handle_provider_event(
        &self,
        event: &ProviderEvent,
        raw_payload: Value,
    ) -> Result<WebhookOutcome> {
        let is_new = self.store.record_if_new(&event.id, raw_payload).await?;
        if !is_new {
            // Replays of a successfully processed event are a no-op. An
            // event recorded but never processed (we crashed or errored
            // mid-flight) is allowed through again.
            if let Some(stored) = self.store.get_event(&event.id).await? {
                if stored.processed_at.is_some() {
                    return Ok(WebhookOutcome::Duplicate);
                }
            } else {
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        let outcome = match event.event_type.as_str() {
            "source.chargeable" => self.settle_chargeable(&event.data.source_id).await?,
            "source.failed" | "source.cancelled" | "source.expired" => {
                self.handle_source_failure(&event.data.source_id, &event.event_type)
                    .await?
            }
            other => {
                info!("ignoring provider event type {other}");
                WebhookOutcome::Ignored
            }
        };

        self.store.mark_event_processed(&event.id).await?;
        Ok(outcome)
    }

    /// Synchronous verification: query the source's current status and drive
    /// the state machine one step.
    pub async fn verify(&self, donation_id: Uuid) -> Result<VerifyResponse> {
        let donation = self
            .store
            .get_donation(donation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("donation {donation_id}")))?;

        match donation.status {
            DonationStatus::Completed => {
                return Ok(VerifyResponse {
                    success: true,
                    status: "completed".to_string(),
                    message: "donation already settled".to_string(),
                });
            }
            DonationStatus::Failed => {
                return Ok(VerifyResponse {
                    success: false,
                    status: "failed".to_string(),
                    message: donation
                        .failure_reason
                        .unwrap_or_else(|| "payment failed".to_string()),
                });
            }
            DonationStatus::Refunded => {
                return Ok(VerifyResponse {
                    success: true,
                    status: "refunded".to_string(),
                    message: "donation was refunded".to_string(),
                });
            }
            DonationStatus::Pending => {}
        }

        let session = self
            .store
            .get_session_for_donation(donation_id)
            .await?
            .ok_or_else(|| {
                CoreError::Internal(format!("donation {donation_id} has no payment session"))
            })?;

        let source = self
            .provider
            .get_source_status(&session.provider_source_id)
            .await
            .map_err(CoreError::from)?;

        let outcome = match source.status {
            SourceStatusKind::Chargeable | SourceStatusKind::Consumed => {
                self.settle_chargeable(&session.provider_source_id).await?
            }
            SourceStatusKind::Pending => WebhookOutcome::Pending,
            SourceStatusKind::Cancelled | SourceStatusKind::Failed => {
                self.handle_source_failure(&session.provider_source_id, "source check")
                    .await?
            }
        };

        Ok(VerifyResponse {
            success: matches!(
                outcome,
                WebhookOutcome::Completed | WebhookOutcome::AlreadySettled
            ),
            status: match outcome {
                WebhookOutcome::Completed | WebhookOutcome::AlreadySettled => "completed",
                WebhookOutcome::Failed => "failed",
                _ => "pending",
            }
            .to_string(),
            message: outcome.message().to_string(),
        })
    }

    async fn settle_chargeable(&self, source_id: &str) -> Result<WebhookOutcome> {
        let session = self
            .store
            .get_session_by_source(source_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("no payment session for source {source_id}"))
            })?;
        let donation = self
            .store
            .get_donation(session.donation_id)
            .await?
            .ok_or_else(|| {
                CoreError::Internal(format!("session {} has no donation", session.id))
            })?;

        // Business-level idempotency: a second webhook can carry a fresh
        // event id yet describe an already-settled donation.
        match donation.status {
            DonationStatus::Completed => return Ok(WebhookOutcome::AlreadySettled),
            DonationStatus::Failed | DonationStatus::Refunded => {
                return Ok(WebhookOutcome::Ignored);
            }
            DonationStatus::Pending => {}
        }

        let charge = if session.status == SessionStatus::Succeeded {
            // We charged before but crashed short of completing the
            // donation. Recover the charge instead of creating another.
            self.provider
                .get_charge_for_source(source_id)
                .await
                .map_err(CoreError::from)?
                .ok_or_else(|| {
                    CoreError::Internal(format!(
                        "session {} marked succeeded but provider has no charge",
                        session.id
                    ))
                })?
        } else {
            if session.status == SessionStatus::Pending {
                self.store
                    .set_session_status(session.id, SessionStatus::Chargeable)
                    .await?;
            }
            match self.create_charge_safely(&session, &donation).await? {
                ChargeAttempt::Created(charge) => charge,
                ChargeAttempt::Declined(reason) => {
                    return self.fail(&donation, &session, &reason).await;
                }
            }
        };

        match charge.status {
            ChargeStatus::Succeeded => self.settle(&donation, &session, &charge.charge_id).await,
            ChargeStatus::Pending => Ok(WebhookOutcome::Pending),
            ChargeStatus::Failed => {
                let reason = charge
                    .failure_reason
                    .unwrap_or_else(|| "charge failed".to_string());
                self.fail(&donation, &session, &reason).await
            }
        }
    }

    /// Create the charge using the STORED fee breakdown. An ambiguous
    /// outcome (timeout, provider 5xx after send) is resolved by re-querying
    /// the provider, never by retrying the creation blindly.
    async fn create_charge_safely(
        &self,
        session: &PaymentSession,
        donation: &Donation,
    ) -> Result<ChargeAttempt> {
        let amount = session.fees.total_charge_minor_units()?;
        match self
            .provider
            .create_charge(&session.provider_source_id, amount, &donation.currency)
            .await
        {
            Ok(charge) => Ok(ChargeAttempt::Created(charge)),
            Err(ProviderCallError::Ambiguous(msg)) => {
                warn!(
                    donation_id = %donation.id,
                    "ambiguous charge outcome, re-querying provider: {msg}"
                );
                match self
                    .provider
                    .get_charge_for_source(&session.provider_source_id)
                    .await
                    .map_err(CoreError::from)?
                {
                    Some(charge) => Ok(ChargeAttempt::Created(charge)),
                    // Nothing was created; surface a retryable error so the
                    // provider redelivers and we try again cleanly.
                    None => Err(CoreError::provider_transient(msg)),
                }
            }
            Err(ProviderCallError::Declined(reason)) => Ok(ChargeAttempt::Declined(reason)),
            Err(other) => Err(other.into()),
        }
    }

    async fn settle(
        &self,
        donation: &Donation,
        session: &PaymentSession,
        charge_id: &str,
    ) -> Result<WebhookOutcome> {
        self.store
            .set_session_status(session.id, SessionStatus::Succeeded)
            .await?;

        let Some(totals) = self.settle_with_retry(donation, session, charge_id).await? else {
            return Ok(WebhookOutcome::AlreadySettled);
        };
        info!(
            campaign_id = %donation.campaign_id,
            current_amount = %totals.current_amount,
            donors_count = totals.donors_count,
            "campaign credited"
        );

        if let Err(err) = self
            .dispatcher
            .dispatch(NotificationEvent::DonationCompleted {
                donation_id: donation.id,
                campaign_id: donation.campaign_id,
                donor_id: donation.donor_id,
                net_amount: session.fees.net_amount,
            })
            .await
        {
            warn!("notification dispatch failed: {err:#}");
        }

        Ok(WebhookOutcome::Completed)
    }

    /// The charge has already succeeded when this runs; the donation flip
    /// and the campaign credit are one atomic store write, so a failure here
    /// leaves the donation pending and the redelivered event settles it
    /// cleanly. The write is retried on its own and never flips the donation
    /// to failed.
    async fn settle_with_retry(
        &self,
        donation: &Donation,
        session: &PaymentSession,
        charge_id: &str,
    ) -> Result<Option<LedgerTotals>> {
        let mut last_err = None;
        for attempt in 1..=LEDGER_WRITE_ATTEMPTS {
            match self
                .store
                .settle_donation(
                    donation.id,
                    donation.campaign_id,
                    charge_id,
                    session.fees.clone(),
                )
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    error!(
                        donation_id = %donation.id,
                        campaign_id = %donation.campaign_id,
                        attempt,
                        "settlement write failed after successful charge: {err}"
                    );
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_millis(LEDGER_RETRY_DELAY_MS * attempt as u64))
                        .await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CoreError::Internal("campaign ledger credit failed".to_string())
        }))
    }

    async fn handle_source_failure(
        &self,
        source_id: &str,
        context: &str,
    ) -> Result<WebhookOutcome> {
        let Some(session) = self.store.get_session_by_source(source_id).await? else {
            return Ok(WebhookOutcome::Ignored);
        };
        let Some(donation) = self.store.get_donation(session.donation_id).await? else {
            return Ok(WebhookOutcome::Ignored);
        };
        if donation.status != DonationStatus::Pending {
            return Ok(WebhookOutcome::Ignored);
        }
        self.fail(&donation, &session, &format!("payment source failed ({context})"))
            .await
    }

    async fn fail(
        &self,
        donation: &Donation,
        session: &PaymentSession,
        reason: &str,
    ) -> Result<WebhookOutcome> {
        self.store
            .set_session_status(session.id, SessionStatus::Failed)
            .await?;
        self.store.fail_donation(donation.id, reason).await?;

        if let Err(err) = self
            .dispatcher
            .dispatch(NotificationEvent::DonationFailed {
                donation_id: donation.id,
                donor_id: donation.donor_id,
                reason: reason.to_string(),
            })
            .await
        {
            warn!("notification dispatch failed: {err:#}");
        }

        Ok(WebhookOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::future::join_all;
    use rust_decimal::Decimal;
    use serde_json::json;
    use uuid::Uuid;

    use giveline_core::models::DonationStatus;
    use giveline_core::storage::{CampaignStore, DonationStore};
    use giveline_provider::MockProvider;
    use giveline_store::MemoryStore;

    use super::*;
    use crate::checkout::begin_checkout;
    use crate::testutil::{RecordingDispatcher, arc_store, reference_fee_config, seed_campaign};

    struct Harness {
        store: Arc<MemoryStore>,
        provider: Arc<MockProvider>,
        dispatcher: Arc<RecordingDispatcher>,
        engine: SettlementEngine,
    }

    fn harness() -> Harness {
        let store = arc_store();
        let provider = Arc::new(MockProvider::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = SettlementEngine::new(store.clone(), provider.clone(), dispatcher.clone());
        Harness {
            store,
            provider,
            dispatcher,
            engine,
        }
    }

    async fn donation_with_session(h: &Harness, campaign_id: Uuid, source_id: &str) -> Uuid {
        let (donation, _) = begin_checkout(
            h.store.as_ref(),
            &reference_fee_config(),
            campaign_id,
            Uuid::new_v4(),
            Decimal::from(1000),
            "USD",
            source_id,
        )
        .await
        .unwrap();
        donation.id
    }

    fn chargeable_event(event_id: &str, source_id: &str) -> (ProviderEvent, Value) {
        let payload = json!({
            "id": event_id,
            "type": "source.chargeable",
            "data": { "source_id": source_id },
        });
        let event: ProviderEvent = serde_json::from_value(payload.clone()).unwrap();
        (event, payload)
    }

    #[tokio::test]
    async fn chargeable_event_completes_and_credits_net_amount() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donation_id = donation_with_session(&h, campaign_id, "src_1").await;

        let (event, payload) = chargeable_event("evt_1", "src_1");
        let outcome = h.engine.handle_provider_event(&event, payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Completed);

        let donation = h.store.get_donation(donation_id).await.unwrap().unwrap();
        assert_eq!(donation.status, DonationStatus::Completed);
        assert_eq!(donation.provider_charge_id.as_deref(), Some("ch_src_1"));
        assert_eq!(
            donation.fees.as_ref().unwrap().net_amount,
            Decimal::from(970)
        );

        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(970));
        assert_eq!(campaign.donors_count, 1);

        // The charge used the stored total, not a recomputed amount.
        assert_eq!(h.provider.charge_amounts(), vec![104_850]);
    }

    #[tokio::test]
    async fn replaying_the_same_event_id_credits_once() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        donation_with_session(&h, campaign_id, "src_1").await;

        let (event, payload) = chargeable_event("evt_1", "src_1");
        h.engine
            .handle_provider_event(&event, payload.clone())
            .await
            .unwrap();
        let second = h.engine.handle_provider_event(&event, payload).await.unwrap();
        assert_eq!(second, WebhookOutcome::Duplicate);

        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(970));
        assert_eq!(campaign.donors_count, 1);
        assert_eq!(h.provider.charge_calls(), 1);
    }

    #[tokio::test]
    async fn different_event_ids_for_a_settled_donation_do_not_double_credit() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        donation_with_session(&h, campaign_id, "src_1").await;

        let (first, first_payload) = chargeable_event("evt_1", "src_1");
        let (second, second_payload) = chargeable_event("evt_2", "src_1");
        h.engine
            .handle_provider_event(&first, first_payload)
            .await
            .unwrap();
        let outcome = h
            .engine
            .handle_provider_event(&second, second_payload)
            .await
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::AlreadySettled);

        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(970));
        assert_eq!(h.provider.charge_calls(), 1);
    }

    #[tokio::test]
    async fn declined_charge_fails_terminally_without_touching_the_ledger() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donation_id = donation_with_session(&h, campaign_id, "src_1").await;
        h.provider.script_charge(
            "src_1",
            Err(ProviderCallError::Declined("card declined".to_string())),
        );

        let (event, payload) = chargeable_event("evt_1", "src_1");
        let outcome = h.engine.handle_provider_event(&event, payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Failed);

        let donation = h.store.get_donation(donation_id).await.unwrap().unwrap();
        assert_eq!(donation.status, DonationStatus::Failed);
        assert_eq!(donation.failure_reason.as_deref(), Some("card declined"));

        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::ZERO);
        assert_eq!(campaign.donors_count, 0);

        let failed = h
            .dispatcher
            .events()
            .iter()
            .filter(|e| matches!(e, NotificationEvent::DonationFailed { .. }))
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn ambiguous_timeout_resolves_by_requery_not_blind_retry() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donation_id = donation_with_session(&h, campaign_id, "src_1").await;

        // The charge request timed out but did reach the provider.
        h.provider.script_charge(
            "src_1",
            Err(ProviderCallError::Ambiguous("timed out".to_string())),
        );
        h.provider
            .set_existing_charge("src_1", MockProvider::succeeded_charge("ch_recovered"));

        let (event, payload) = chargeable_event("evt_1", "src_1");
        let outcome = h.engine.handle_provider_event(&event, payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Completed);
        assert_eq!(h.provider.charge_calls(), 1);

        let donation = h.store.get_donation(donation_id).await.unwrap().unwrap();
        assert_eq!(
            donation.provider_charge_id.as_deref(),
            Some("ch_recovered")
        );
        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(970));
    }

    #[tokio::test]
    async fn ambiguous_timeout_with_no_charge_surfaces_retryable_error() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donation_id = donation_with_session(&h, campaign_id, "src_1").await;
        h.provider.script_charge(
            "src_1",
            Err(ProviderCallError::Ambiguous("timed out".to_string())),
        );

        let (event, payload) = chargeable_event("evt_1", "src_1");
        let err = h
            .engine
            .handle_provider_event(&event, payload)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // Donation untouched; the provider will redeliver.
        let donation = h.store.get_donation(donation_id).await.unwrap().unwrap();
        assert_eq!(donation.status, DonationStatus::Pending);
    }

    #[tokio::test]
    async fn failed_event_after_settlement_is_ignored() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        donation_with_session(&h, campaign_id, "src_1").await;

        let (event, payload) = chargeable_event("evt_1", "src_1");
        h.engine.handle_provider_event(&event, payload).await.unwrap();

        let failure = json!({
            "id": "evt_2",
            "type": "source.failed",
            "data": { "source_id": "src_1" },
        });
        let event: ProviderEvent = serde_json::from_value(failure.clone()).unwrap();
        let outcome = h.engine.handle_provider_event(&event, failure).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);

        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(970));
    }

    #[tokio::test]
    async fn ledger_outage_leaves_donation_pending_until_redelivery_settles() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donation_id = donation_with_session(&h, campaign_id, "src_1").await;
        h.store.fail_next_settlements(LEDGER_WRITE_ATTEMPTS).await;

        let (event, payload) = chargeable_event("evt_1", "src_1");
        let err = h
            .engine
            .handle_provider_event(&event, payload.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));

        // Neither half of the settlement landed, so the donation is still
        // eligible and the event stays unprocessed.
        let donation = h.store.get_donation(donation_id).await.unwrap().unwrap();
        assert_eq!(donation.status, DonationStatus::Pending);
        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::ZERO);
        assert_eq!(campaign.donors_count, 0);

        // Redelivery under the same event id recovers the existing charge
        // and credits exactly once.
        let outcome = h.engine.handle_provider_event(&event, payload).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Completed);
        assert_eq!(h.provider.charge_calls(), 1);

        let donation = h.store.get_donation(donation_id).await.unwrap().unwrap();
        assert_eq!(donation.status, DonationStatus::Completed);
        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(970));
        assert_eq!(campaign.donors_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hundred_concurrent_donations_sum_exactly() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 1_000_000).await;

        let mut sources = Vec::new();
        for i in 0..100 {
            let source_id = format!("src_{i}");
            donation_with_session(&h, campaign_id, &source_id).await;
            sources.push(source_id);
        }

        let tasks = sources.into_iter().enumerate().map(|(i, source_id)| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                let (event, payload) = chargeable_event(&format!("evt_{i}"), &source_id);
                engine.handle_provider_event(&event, payload).await.unwrap()
            })
        });
        for outcome in join_all(tasks).await {
            assert_eq!(outcome.unwrap(), WebhookOutcome::Completed);
        }

        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(97_000));
        assert_eq!(campaign.donors_count, 100);
    }

    #[tokio::test]
    async fn verify_drives_a_pending_donation_forward() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donation_id = donation_with_session(&h, campaign_id, "src_1").await;
        h.provider
            .set_source_status("src_1", SourceStatusKind::Chargeable);

        let response = h.engine.verify(donation_id).await.unwrap();
        assert!(response.success);
        assert_eq!(response.status, "completed");

        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::from(970));
    }

    #[tokio::test]
    async fn verify_reports_pending_sources_without_charging() {
        let h = harness();
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donation_id = donation_with_session(&h, campaign_id, "src_1").await;
        h.provider
            .set_source_status("src_1", SourceStatusKind::Pending);

        let response = h.engine.verify(donation_id).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.status, "pending");
        assert_eq!(h.provider.charge_calls(), 0);
    }

    #[tokio::test]
    async fn verify_unknown_donation_is_not_found() {
        let h = harness();
        let err = h.engine.verify(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
