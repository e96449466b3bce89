use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::fees::FeeBreakdown;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub donor_id: Uuid,
    /// Gross, donor-facing amount. The credited amount is `fees.net_amount`.
    pub amount: Decimal,
    pub currency: String,
    pub status: DonationStatus,
    /// Copied down from the payment session when the donation completes.
    pub fees: Option<FeeBreakdown>,
    pub provider_charge_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Chargeable,
    Succeeded,
    Failed,
}

/// One-to-one with a [`Donation`]; created when the donor initiates checkout.
/// The fee breakdown is computed once at that point and is immutable
/// afterwards. Settlement only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: Uuid,
    pub donation_id: Uuid,
    pub provider_source_id: String,
    pub status: SessionStatus,
    pub fees: FeeBreakdown,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Event-ledger entry, unique on `provider_event_id`. A second delivery of
/// the same id must be a no-op after the first successful processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider_event_id: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    pub current_amount: Decimal,
    pub donors_count: i64,
    pub goal_amount: Decimal,
    pub end_date: DateTime<Utc>,
    pub status: CampaignStatus,
    /// Set once the refund scanner has opened obligations for this campaign.
    pub refund_processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub status: MilestoneStatus,
    pub rejection_reason: Option<String>,
    pub refund_processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundTrigger {
    CampaignExpired,
    CampaignCancelled,
    MilestoneRejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub milestone_id: Option<Uuid>,
    pub trigger: RefundTrigger,
    pub reason: String,
    pub total_amount: Decimal,
    pub donation_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Decided,
    AutoRefunded,
    Executed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Refund,
    RedirectToCampaign,
    DonateToPlatform,
}

/// Per-donation decision record opened by the refund scanner. Mutated once,
/// by either the donor or the auto-refund sweep, and terminal once executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonorRefundDecision {
    pub id: Uuid,
    pub refund_request_id: Uuid,
    pub donation_id: Uuid,
    pub donor_id: Uuid,
    pub campaign_id: Uuid,
    pub refund_amount: Decimal,
    pub decision_deadline: DateTime<Utc>,
    pub status: DecisionStatus,
    pub decision_type: Option<DecisionType>,
    pub redirect_campaign_id: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Written when a donor elects to leave the refunded amount with the
/// platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformContribution {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub donor_id: Uuid,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}
