pub mod adapter;
pub mod mock;
pub mod signature;

pub use adapter::{
    ChargeOutcome, ChargeStatus, HttpPaymentProvider, PaymentProvider, ProviderCallError,
    RefundOutcome, RefundStatus, SourceStatus, SourceStatusKind,
};
pub use mock::MockProvider;
