use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-formed events handed to the notification collaborator. The core only
/// guarantees the call; delivery and content templating are out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationEvent {
    DonationCompleted {
        donation_id: Uuid,
        campaign_id: Uuid,
        donor_id: Uuid,
        net_amount: Decimal,
    },
    DonationFailed {
        donation_id: Uuid,
        donor_id: Uuid,
        reason: String,
    },
    RefundWindowOpened {
        decision_id: Uuid,
        donor_id: Uuid,
        campaign_id: Uuid,
        refund_amount: Decimal,
        decision_deadline: DateTime<Utc>,
    },
    DecisionRecorded {
        decision_id: Uuid,
        donor_id: Uuid,
        decision_type: crate::models::DecisionType,
    },
    RefundExecuted {
        decision_id: Uuid,
        donation_id: Uuid,
        donor_id: Uuid,
        amount: Decimal,
        auto: bool,
    },
}

impl NotificationEvent {
    /// Bus channel the event is published on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::DonationCompleted { .. } => "donations.completed",
            Self::DonationFailed { .. } => "donations.failed",
            Self::RefundWindowOpened { .. } => "refunds.window_opened",
            Self::DecisionRecorded { .. } => "refunds.decision_recorded",
            Self::RefundExecuted { .. } => "refunds.executed",
        }
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: NotificationEvent) -> anyhow::Result<()>;
}
