//! Scriptable in-process provider for tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::adapter::{
    ChargeOutcome, ChargeStatus, PaymentProvider, ProviderCallError, RefundOutcome, RefundStatus,
    SourceStatus, SourceStatusKind,
};

#[derive(Default)]
struct MockState {
    sources: HashMap<String, SourceStatusKind>,
    charge_plan: HashMap<String, VecDeque<Result<ChargeOutcome, ProviderCallError>>>,
    charges_by_source: HashMap<String, ChargeOutcome>,
    refund_plan: VecDeque<Result<RefundOutcome, ProviderCallError>>,
    charge_amounts: Vec<i64>,
    charge_calls: usize,
    refund_calls: usize,
}

#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source_status(&self, source_id: &str, status: SourceStatusKind) {
        let mut state = self.state.lock().unwrap();
        state.sources.insert(source_id.to_string(), status);
    }

    /// Queue an outcome for the next `create_charge` against `source_id`.
    /// Unscripted calls succeed with a deterministic charge id.
    pub fn script_charge(
        &self,
        source_id: &str,
        outcome: Result<ChargeOutcome, ProviderCallError>,
    ) {
        let mut state = self.state.lock().unwrap();
        state
            .charge_plan
            .entry(source_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn script_refund(&self, outcome: Result<RefundOutcome, ProviderCallError>) {
        let mut state = self.state.lock().unwrap();
        state.refund_plan.push_back(outcome);
    }

    /// Register a charge as already existing provider-side, as after an
    /// ambiguous timeout where the request did go through.
    pub fn set_existing_charge(&self, source_id: &str, outcome: ChargeOutcome) {
        let mut state = self.state.lock().unwrap();
        state
            .charges_by_source
            .insert(source_id.to_string(), outcome);
    }

    pub fn charge_calls(&self) -> usize {
        self.state.lock().unwrap().charge_calls
    }

    /// Minor-unit amounts passed to `create_charge`, in call order.
    pub fn charge_amounts(&self) -> Vec<i64> {
        self.state.lock().unwrap().charge_amounts.clone()
    }

    pub fn refund_calls(&self) -> usize {
        self.state.lock().unwrap().refund_calls
    }

    pub fn succeeded_charge(charge_id: &str) -> ChargeOutcome {
        ChargeOutcome {
            charge_id: charge_id.to_string(),
            status: ChargeStatus::Succeeded,
            failure_reason: None,
        }
    }

    pub fn declined_charge(charge_id: &str, reason: &str) -> ChargeOutcome {
        ChargeOutcome {
            charge_id: charge_id.to_string(),
            status: ChargeStatus::Failed,
            failure_reason: Some(reason.to_string()),
        }
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn get_source_status(
        &self,
        source_id: &str,
    ) -> Result<SourceStatus, ProviderCallError> {
        let state = self.state.lock().unwrap();
        let status = state.sources.get(source_id).cloned().ok_or_else(|| {
            ProviderCallError::Protocol(format!("unknown source {source_id}"))
        })?;
        Ok(SourceStatus {
            status,
            raw: json!({ "id": source_id }),
        })
    }

    async fn create_charge(
        &self,
        source_id: &str,
        amount_minor_units: i64,
        _currency: &str,
    ) -> Result<ChargeOutcome, ProviderCallError> {
        let mut state = self.state.lock().unwrap();
        state.charge_calls += 1;
        state.charge_amounts.push(amount_minor_units);
        let outcome = state
            .charge_plan
            .get_mut(source_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Self::succeeded_charge(&format!("ch_{source_id}"))));
        if let Ok(charge) = &outcome {
            if charge.status == ChargeStatus::Succeeded {
                state
                    .charges_by_source
                    .insert(source_id.to_string(), charge.clone());
            }
        }
        outcome
    }

    async fn get_charge_for_source(
        &self,
        source_id: &str,
    ) -> Result<Option<ChargeOutcome>, ProviderCallError> {
        let state = self.state.lock().unwrap();
        Ok(state.charges_by_source.get(source_id).cloned())
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        _amount_minor_units: i64,
    ) -> Result<RefundOutcome, ProviderCallError> {
        let mut state = self.state.lock().unwrap();
        state.refund_calls += 1;
        state.refund_plan.pop_front().unwrap_or_else(|| {
            Ok(RefundOutcome {
                refund_id: format!("re_{charge_id}"),
                status: RefundStatus::Succeeded,
            })
        })
    }
}
