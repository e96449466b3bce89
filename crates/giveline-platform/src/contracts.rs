//! Request/response shapes shared between the gateway and its clients.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use giveline_core::fees::FeeBreakdown;
use giveline_core::models::{DecisionStatus, DecisionType, DonorRefundDecision};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDonationRequest {
    pub campaign_id: Uuid,
    pub donor_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub provider_source_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDonationResponse {
    pub donation_id: Uuid,
    pub session_id: Uuid,
    pub fees: FeeBreakdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDonationRequest {
    pub donation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDecisionRequest {
    pub decision_id: Uuid,
    pub donor_id: Uuid,
    pub decision_type: DecisionType,
    pub redirect_campaign_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionView {
    pub decision_id: Uuid,
    pub donation_id: Uuid,
    pub status: DecisionStatus,
    pub decision_type: Option<DecisionType>,
    pub redirect_campaign_id: Option<Uuid>,
    pub refund_amount: Decimal,
    pub decided_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl From<DonorRefundDecision> for DecisionView {
    fn from(decision: DonorRefundDecision) -> Self {
        Self {
            decision_id: decision.id,
            donation_id: decision.donation_id,
            status: decision.status,
            decision_type: decision.decision_type,
            redirect_campaign_id: decision.redirect_campaign_id,
            refund_amount: decision.refund_amount,
            decided_at: decision.decided_at,
            executed_at: decision.executed_at,
        }
    }
}
