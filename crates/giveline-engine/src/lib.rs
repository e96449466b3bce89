pub mod checkout;
pub mod decisions;
pub mod refunds;
pub mod settlement;

pub use checkout::begin_checkout;
pub use decisions::DecisionEngine;
pub use refunds::{RefundSweeper, SweepSummary};
pub use settlement::{ProviderEvent, SettlementEngine, VerifyResponse, WebhookOutcome};
