//! In-memory store backing tests and local runs. All maps live behind one
//! write lock so the guard operations (`settle_donation`, `record_if_new`,
//! `decide_if_pending`, `apply_delta`) are atomic relative to every
//! concurrent caller.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use giveline_core::error::{CoreError, Result};
use giveline_core::fees::FeeBreakdown;
use giveline_core::models::{
    Campaign, CampaignStatus, DecisionStatus, DecisionType, Donation, DonationStatus,
    DonorRefundDecision, Milestone, MilestoneStatus, PaymentSession, PlatformContribution,
    RefundRequest, SessionStatus, WebhookEvent,
};
use giveline_core::storage::{
    CampaignStore, DonationStore, EventLedger, LedgerTotals, RefundStore,
};

#[derive(Default)]
struct State {
    donations: HashMap<Uuid, Donation>,
    sessions: HashMap<Uuid, PaymentSession>,
    session_by_source: HashMap<String, Uuid>,
    session_by_donation: HashMap<Uuid, Uuid>,
    campaigns: HashMap<Uuid, Campaign>,
    milestones: HashMap<Uuid, Milestone>,
    events: HashMap<String, WebhookEvent>,
    refund_requests: HashMap<Uuid, RefundRequest>,
    decisions: HashMap<Uuid, DonorRefundDecision>,
    contributions: HashMap<Uuid, PlatformContribution>,
    settle_failures: u32,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DonationStore for MemoryStore {
    async fn insert_donation(&self, donation: Donation) -> Result<()> {
        let mut state = self.state.write().await;
        state.donations.insert(donation.id, donation);
        Ok(())
    }

    async fn get_donation(&self, id: Uuid) -> Result<Option<Donation>> {
        let state = self.state.read().await;
        Ok(state.donations.get(&id).cloned())
    }

    async fn completed_donations_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Donation>> {
        let state = self.state.read().await;
        Ok(state
            .donations
            .values()
            .filter(|d| d.campaign_id == campaign_id && d.status == DonationStatus::Completed)
            .cloned()
            .collect())
    }

    async fn insert_session(&self, session: PaymentSession) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .session_by_source
            .insert(session.provider_source_id.clone(), session.id);
        state.session_by_donation.insert(session.donation_id, session.id);
        state.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session_by_source(
        &self,
        provider_source_id: &str,
    ) -> Result<Option<PaymentSession>> {
        let state = self.state.read().await;
        Ok(state
            .session_by_source
            .get(provider_source_id)
            .and_then(|id| state.sessions.get(id))
            .cloned())
    }

    async fn get_session_for_donation(
        &self,
        donation_id: Uuid,
    ) -> Result<Option<PaymentSession>> {
        let state = self.state.read().await;
        Ok(state
            .session_by_donation
            .get(&donation_id)
            .and_then(|id| state.sessions.get(id))
            .cloned())
    }

    async fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| CoreError::NotFound(format!("payment session {session_id}")))?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn settle_donation(
        &self,
        donation_id: Uuid,
        campaign_id: Uuid,
        provider_charge_id: &str,
        fees: FeeBreakdown,
    ) -> Result<Option<LedgerTotals>> {
        let mut state = self.state.write().await;
        if state.settle_failures > 0 {
            state.settle_failures -= 1;
            return Err(CoreError::Internal("campaign ledger unavailable".to_string()));
        }
        if !state.campaigns.contains_key(&campaign_id) {
            return Err(CoreError::NotFound(format!("campaign {campaign_id}")));
        }
        let donation = state
            .donations
            .get_mut(&donation_id)
            .ok_or_else(|| CoreError::NotFound(format!("donation {donation_id}")))?;
        if donation.status != DonationStatus::Pending {
            return Ok(None);
        }
        let net_amount = fees.net_amount;
        donation.status = DonationStatus::Completed;
        donation.provider_charge_id = Some(provider_charge_id.to_string());
        donation.fees = Some(fees);
        donation.updated_at = Utc::now();

        let campaign = state
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign {campaign_id}")))?;
        campaign.current_amount += net_amount;
        campaign.donors_count += 1;
        Ok(Some(LedgerTotals {
            campaign_id,
            current_amount: campaign.current_amount,
            donors_count: campaign.donors_count,
        }))
    }

    async fn fail_donation(&self, donation_id: Uuid, reason: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let donation = state
            .donations
            .get_mut(&donation_id)
            .ok_or_else(|| CoreError::NotFound(format!("donation {donation_id}")))?;
        if donation.status == DonationStatus::Pending {
            donation.status = DonationStatus::Failed;
            donation.failure_reason = Some(reason.to_string());
            donation.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_donation_refunded(&self, donation_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let donation = state
            .donations
            .get_mut(&donation_id)
            .ok_or_else(|| CoreError::NotFound(format!("donation {donation_id}")))?;
        donation.status = DonationStatus::Refunded;
        donation.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn insert_campaign(&self, campaign: Campaign) -> Result<()> {
        let mut state = self.state.write().await;
        state.campaigns.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let state = self.state.read().await;
        Ok(state.campaigns.get(&id).cloned())
    }

    async fn apply_delta(
        &self,
        campaign_id: Uuid,
        amount_delta: Decimal,
        donor_delta: i64,
    ) -> Result<LedgerTotals> {
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign {campaign_id}")))?;
        campaign.current_amount += amount_delta;
        campaign.donors_count += donor_delta;
        Ok(LedgerTotals {
            campaign_id,
            current_amount: campaign.current_amount,
            donors_count: campaign.donors_count,
        })
    }

    async fn expired_unprocessed_campaigns(&self, cutoff: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        Ok(state
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Active
                    && c.end_date < cutoff
                    && c.current_amount < c.goal_amount
                    && c.refund_processed_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn cancelled_unprocessed_campaigns(&self) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        Ok(state
            .campaigns
            .values()
            .filter(|c| c.status == CampaignStatus::Cancelled && c.refund_processed_at.is_none())
            .cloned()
            .collect())
    }

    async fn mark_campaign_refund_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign {id}")))?;
        campaign.refund_processed_at = Some(at);
        Ok(())
    }

    async fn insert_milestone(&self, milestone: Milestone) -> Result<()> {
        let mut state = self.state.write().await;
        state.milestones.insert(milestone.id, milestone);
        Ok(())
    }

    async fn rejected_unprocessed_milestones(&self) -> Result<Vec<Milestone>> {
        let state = self.state.read().await;
        Ok(state
            .milestones
            .values()
            .filter(|m| m.status == MilestoneStatus::Rejected && m.refund_processed_at.is_none())
            .cloned()
            .collect())
    }

    async fn mark_milestone_refund_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let milestone = state
            .milestones
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("milestone {id}")))?;
        milestone.refund_processed_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl EventLedger for MemoryStore {
    async fn record_if_new(&self, provider_event_id: &str, payload: Value) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.events.contains_key(provider_event_id) {
            return Ok(false);
        }
        state.events.insert(
            provider_event_id.to_string(),
            WebhookEvent {
                provider_event_id: provider_event_id.to_string(),
                payload,
                received_at: Utc::now(),
                processed_at: None,
            },
        );
        Ok(true)
    }

    async fn mark_event_processed(&self, provider_event_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let event = state
            .events
            .get_mut(provider_event_id)
            .ok_or_else(|| CoreError::NotFound(format!("webhook event {provider_event_id}")))?;
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_event(&self, provider_event_id: &str) -> Result<Option<WebhookEvent>> {
        let state = self.state.read().await;
        Ok(state.events.get(provider_event_id).cloned())
    }
}

#[async_trait]
impl RefundStore for MemoryStore {
    async fn refund_request_exists(
        &self,
        campaign_id: Uuid,
        milestone_id: Option<Uuid>,
    ) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .refund_requests
            .values()
            .any(|r| r.campaign_id == campaign_id && r.milestone_id == milestone_id))
    }

    async fn insert_refund_request(&self, request: RefundRequest) -> Result<()> {
        let mut state = self.state.write().await;
        state.refund_requests.insert(request.id, request);
        Ok(())
    }

    async fn insert_decision(&self, decision: DonorRefundDecision) -> Result<()> {
        let mut state = self.state.write().await;
        state.decisions.insert(decision.id, decision);
        Ok(())
    }

    async fn get_decision(&self, id: Uuid) -> Result<Option<DonorRefundDecision>> {
        let state = self.state.read().await;
        Ok(state.decisions.get(&id).cloned())
    }

    async fn decisions_for_request(&self, request_id: Uuid) -> Result<Vec<DonorRefundDecision>> {
        let state = self.state.read().await;
        Ok(state
            .decisions
            .values()
            .filter(|d| d.refund_request_id == request_id)
            .cloned()
            .collect())
    }

    async fn decide_if_pending(
        &self,
        decision_id: Uuid,
        to_status: DecisionStatus,
        decision_type: DecisionType,
        redirect_campaign_id: Option<Uuid>,
        decided_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let decision = state
            .decisions
            .get_mut(&decision_id)
            .ok_or_else(|| CoreError::NotFound(format!("refund decision {decision_id}")))?;
        if decision.status != DecisionStatus::Pending {
            return Ok(false);
        }
        decision.status = to_status;
        decision.decision_type = Some(decision_type);
        decision.redirect_campaign_id = redirect_campaign_id;
        decision.decided_at = Some(decided_at);
        Ok(true)
    }

    async fn mark_decision_executed(&self, decision_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let decision = state
            .decisions
            .get_mut(&decision_id)
            .ok_or_else(|| CoreError::NotFound(format!("refund decision {decision_id}")))?;
        decision.status = DecisionStatus::Executed;
        decision.executed_at = Some(at);
        Ok(())
    }

    async fn pending_decisions_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DonorRefundDecision>> {
        let state = self.state.read().await;
        Ok(state
            .decisions
            .values()
            .filter(|d| d.status == DecisionStatus::Pending && d.decision_deadline < now)
            .cloned()
            .collect())
    }

    async fn insert_platform_contribution(
        &self,
        contribution: PlatformContribution,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.contributions.insert(contribution.id, contribution);
        Ok(())
    }
}

impl MemoryStore {
    /// Test/ops visibility into recorded platform contributions.
    pub async fn platform_contributions(&self) -> Vec<PlatformContribution> {
        let state = self.state.read().await;
        state.contributions.values().cloned().collect()
    }

    /// Script the next `n` settlement writes to fail, simulating a ledger
    /// outage.
    pub async fn fail_next_settlements(&self, n: u32) {
        self.state.write().await.settle_failures = n;
    }

    pub async fn refund_requests_for_campaign(&self, campaign_id: Uuid) -> Vec<RefundRequest> {
        let state = self.state.read().await;
        state
            .refund_requests
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect()
    }
}
