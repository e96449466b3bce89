pub mod error;
pub mod events;
pub mod fees;
pub mod models;
pub mod storage;

pub use error::{CoreError, Result};
pub use events::{NotificationDispatcher, NotificationEvent};
pub use fees::{FeeAbsorption, FeeBreakdown, FeeConfig};
pub use models::{
    Campaign, CampaignStatus, DecisionStatus, DecisionType, Donation, DonationStatus,
    DonorRefundDecision, Milestone, MilestoneStatus, PaymentSession, PlatformContribution,
    RefundRequest, RefundTrigger, SessionStatus, WebhookEvent,
};
pub use storage::{
    CampaignStore, DonationStore, EventLedger, LedgerTotals, RefundStore, Store,
};
