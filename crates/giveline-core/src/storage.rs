use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Campaign, DecisionStatus, DecisionType, Donation, DonorRefundDecision, Milestone,
    PaymentSession, PlatformContribution, RefundRequest, SessionStatus, WebhookEvent,
};

/// Post-update campaign totals, returned so callers can log and verify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub campaign_id: Uuid,
    pub current_amount: Decimal,
    pub donors_count: i64,
}

#[async_trait]
pub trait DonationStore: Send + Sync {
    async fn insert_donation(&self, donation: Donation) -> Result<()>;
    async fn get_donation(&self, id: Uuid) -> Result<Option<Donation>>;
    async fn completed_donations_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Donation>>;

    async fn insert_session(&self, session: PaymentSession) -> Result<()>;
    async fn get_session_by_source(&self, provider_source_id: &str)
    -> Result<Option<PaymentSession>>;
    async fn get_session_for_donation(&self, donation_id: Uuid)
    -> Result<Option<PaymentSession>>;
    async fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()>;

    /// Atomic settlement guard: flips the donation from `Pending` to
    /// `Completed`, stamping the charge id and fee copy-down, and credits the
    /// campaign ledger with the net amount in the same atomic write. Exactly
    /// one caller ever sees `Some` totals for a given donation; `None` means
    /// the donation was already settled. Implementations must leave both
    /// records untouched on failure so a redelivered event can settle
    /// cleanly.
    async fn settle_donation(
        &self,
        donation_id: Uuid,
        campaign_id: Uuid,
        provider_charge_id: &str,
        fees: crate::fees::FeeBreakdown,
    ) -> Result<Option<LedgerTotals>>;

    async fn fail_donation(&self, donation_id: Uuid, reason: &str) -> Result<()>;
    async fn mark_donation_refunded(&self, donation_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_campaign(&self, campaign: Campaign) -> Result<()>;
    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>>;

    /// The only write path for campaign totals. Must be a single atomic
    /// increment relative to all concurrent callers; read-modify-write from
    /// application code is forbidden.
    async fn apply_delta(
        &self,
        campaign_id: Uuid,
        amount_delta: Decimal,
        donor_delta: i64,
    ) -> Result<LedgerTotals>;

    /// Campaigns past `end_date + grace` cutoff, under goal, still active and
    /// not yet refund-processed.
    async fn expired_unprocessed_campaigns(&self, cutoff: DateTime<Utc>) -> Result<Vec<Campaign>>;
    async fn cancelled_unprocessed_campaigns(&self) -> Result<Vec<Campaign>>;
    async fn mark_campaign_refund_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn insert_milestone(&self, milestone: Milestone) -> Result<()>;
    async fn rejected_unprocessed_milestones(&self) -> Result<Vec<Milestone>>;
    async fn mark_milestone_refund_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait EventLedger: Send + Sync {
    /// Atomic insert-if-absent keyed on the provider event id. Under
    /// concurrent duplicate delivery exactly one caller gets `true`.
    async fn record_if_new(&self, provider_event_id: &str, payload: Value) -> Result<bool>;
    async fn mark_event_processed(&self, provider_event_id: &str) -> Result<()>;
    async fn get_event(&self, provider_event_id: &str) -> Result<Option<WebhookEvent>>;
}

#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn refund_request_exists(
        &self,
        campaign_id: Uuid,
        milestone_id: Option<Uuid>,
    ) -> Result<bool>;
    async fn insert_refund_request(&self, request: RefundRequest) -> Result<()>;

    async fn insert_decision(&self, decision: DonorRefundDecision) -> Result<()>;
    async fn get_decision(&self, id: Uuid) -> Result<Option<DonorRefundDecision>>;
    async fn decisions_for_request(&self, request_id: Uuid) -> Result<Vec<DonorRefundDecision>>;

    /// Atomic decide guard: records the decision only if the record is still
    /// `Pending`, and reports whether this caller won. `to_status` is
    /// `Decided` for donor submissions and `AutoRefunded` for the sweep.
    async fn decide_if_pending(
        &self,
        decision_id: Uuid,
        to_status: DecisionStatus,
        decision_type: DecisionType,
        redirect_campaign_id: Option<Uuid>,
        decided_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn mark_decision_executed(&self, decision_id: Uuid, at: DateTime<Utc>) -> Result<()>;
    async fn pending_decisions_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DonorRefundDecision>>;

    async fn insert_platform_contribution(&self, contribution: PlatformContribution)
    -> Result<()>;
}

/// Everything the engine needs from storage, as one object-safe seam.
pub trait Store: DonationStore + CampaignStore + EventLedger + RefundStore {}

impl<T: DonationStore + CampaignStore + EventLedger + RefundStore> Store for T {}
