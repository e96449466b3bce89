//! Refund decision engine. A decision record moves `pending -> decided ->
//! executed` (donor path) or `pending -> auto_refunded -> executed` (sweep
//! path). The decide-if-pending guard in storage makes the two paths
//! mutually exclusive; exactly one outcome is ever executed per decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use giveline_core::error::{CoreError, Result};
use giveline_core::events::{NotificationDispatcher, NotificationEvent};
use giveline_core::models::{
    CampaignStatus, DecisionStatus, DecisionType, DonorRefundDecision, PlatformContribution,
};
use giveline_core::storage::Store;
use giveline_provider::PaymentProvider;

#[derive(Clone)]
pub struct DecisionEngine {
    store: Arc<dyn Store>,
    provider: Arc<dyn PaymentProvider>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl DecisionEngine {
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

    /// Donor-submitted decision. Late submissions are rejected; the
    /// auto-refund sweep owns post-deadline resolution.
    pub async fn submit_decision(
        &self,
        decision_id: Uuid,
        donor_id: Uuid,
        decision_type: DecisionType,
        redirect_campaign_id: Option<Uuid>,
    ) -> Result<DonorRefundDecision> {
        let decision = self
            .store
            .get_decision(decision_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("refund decision {decision_id}")))?;

        if decision.donor_id != donor_id {
            return Err(CoreError::Forbidden(
                "this refund decision belongs to another donor".to_string(),
            ));
        }
        if decision.status != DecisionStatus::Pending {
            return Err(CoreError::Conflict(
                "this refund decision has already been resolved".to_string(),
            ));
        }
        let now = Utc::now();
        if now > decision.decision_deadline {
            return Err(CoreError::Conflict(
                "the decision window has closed; the refund will be processed automatically"
                    .to_string(),
            ));
        }

        let redirect_campaign_id = match decision_type {
            DecisionType::RedirectToCampaign => {
                let target_id = redirect_campaign_id.ok_or_else(|| {
                    CoreError::Validation("a target campaign is required".to_string())
                })?;
                if target_id == decision.campaign_id {
                    return Err(CoreError::Validation(
                        "cannot redirect funds back to the original campaign".to_string(),
                    ));
                }
                let target = self
                    .store
                    .get_campaign(target_id)
                    .await?
                    .ok_or_else(|| CoreError::Validation("target campaign not found".to_string()))?;
                if target.status != CampaignStatus::Active {
                    return Err(CoreError::Validation(
                        "target campaign is not accepting donations".to_string(),
                    ));
                }
                Some(target_id)
            }
            _ => None,
        };

        let won = self
            .store
            .decide_if_pending(
                decision_id,
                DecisionStatus::Decided,
                decision_type,
                redirect_campaign_id,
                now,
            )
            .await?;
        if !won {
            return Err(CoreError::Conflict(
                "this refund decision has already been resolved".to_string(),
            ));
        }

        if let Err(err) = self
            .dispatcher
            .dispatch(NotificationEvent::DecisionRecorded {
                decision_id,
                donor_id,
                decision_type,
            })
            .await
        {
            warn!("notification dispatch failed: {err:#}");
        }

        self.execute_outcome(&decision, decision_type, redirect_campaign_id, false)
            .await?;

        self.store
            .get_decision(decision_id)
            .await?
            .ok_or_else(|| CoreError::Internal(format!("decision {decision_id} vanished")))
    }

    /// Applies the automatic refund for a lapsed decision. Returns false when
    /// another resolver won the race.
    pub async fn auto_refund(&self, decision: &DonorRefundDecision) -> Result<bool> {
        let won = self
            .store
            .decide_if_pending(
                decision.id,
                DecisionStatus::AutoRefunded,
                DecisionType::Refund,
                None,
                Utc::now(),
            )
            .await?;
        if !won {
            return Ok(false);
        }
        self.execute_outcome(decision, DecisionType::Refund, None, true)
            .await?;
        Ok(true)
    }

    /// Runs the chosen outcome exactly once. Callers must hold the
    /// decide-if-pending win before getting here.
    async fn execute_outcome(
        &self,
        decision: &DonorRefundDecision,
        decision_type: DecisionType,
        redirect_campaign_id: Option<Uuid>,
        auto: bool,
    ) -> Result<()> {
        match decision_type {
            DecisionType::Refund => self.execute_refund(decision, auto).await?,
            DecisionType::RedirectToCampaign => {
                let target_id = redirect_campaign_id.ok_or_else(|| {
                    CoreError::Internal("redirect decision without a target".to_string())
                })?;
                let totals = self
                    .store
                    .apply_delta(target_id, decision.refund_amount, 1)
                    .await?;
                info!(
                    decision_id = %decision.id,
                    target_campaign = %target_id,
                    current_amount = %totals.current_amount,
                    "redirected refund credited to campaign"
                );
                self.store.mark_donation_refunded(decision.donation_id).await?;
            }
            DecisionType::DonateToPlatform => {
                self.store
                    .insert_platform_contribution(PlatformContribution {
                        id: Uuid::new_v4(),
                        decision_id: decision.id,
                        donor_id: decision.donor_id,
                        amount: decision.refund_amount,
                        created_at: Utc::now(),
                    })
                    .await?;
                self.store.mark_donation_refunded(decision.donation_id).await?;
            }
        }

        self.store
            .mark_decision_executed(decision.id, Utc::now())
            .await?;

        if let Err(err) = self
            .dispatcher
            .dispatch(NotificationEvent::RefundExecuted {
                decision_id: decision.id,
                donation_id: decision.donation_id,
                donor_id: decision.donor_id,
                amount: decision.refund_amount,
                auto,
            })
            .await
        {
            warn!("notification dispatch failed: {err:#}");
        }

        Ok(())
    }

    /// Pays the donor back through the provider. The adapter retries
    /// transient failures with backoff; on exhaustion the error is surfaced
    /// to the caller instead of leaving the record silently unresolved (the
    /// decision is already out of `pending` at this point, so the sweep will
    /// not double-fire).
    async fn execute_refund(&self, decision: &DonorRefundDecision, auto: bool) -> Result<()> {
        let donation = self
            .store
            .get_donation(decision.donation_id)
            .await?
            .ok_or_else(|| {
                CoreError::Internal(format!("donation {} vanished", decision.donation_id))
            })?;
        let charge_id = donation.provider_charge_id.as_deref().ok_or_else(|| {
            CoreError::Internal(format!(
                "donation {} has no provider charge to refund",
                donation.id
            ))
        })?;
        let amount_minor = donation
            .fees
            .as_ref()
            .map(|f| f.net_minor_units())
            .transpose()?
            .unwrap_or(0);

        let outcome = self
            .provider
            .create_refund(charge_id, amount_minor)
            .await
            .map_err(CoreError::from)?;
        info!(
            decision_id = %decision.id,
            refund_id = %outcome.refund_id,
            auto,
            "provider refund created"
        );

        self.store.mark_donation_refunded(donation.id).await?;
        Ok(())
    }

    pub async fn pending_decisions_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DonorRefundDecision>> {
        self.store.pending_decisions_past_deadline(now).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use giveline_core::models::{
        Campaign, DecisionStatus, DecisionType, Donation, DonationStatus, DonorRefundDecision,
    };
    use giveline_core::storage::{CampaignStore, DonationStore, RefundStore};
    use giveline_provider::{MockProvider, ProviderCallError};
    use giveline_store::MemoryStore;

    use super::*;
    use crate::testutil::{RecordingDispatcher, arc_store, reference_fee_config, seed_campaign};

    struct Harness {
        store: Arc<MemoryStore>,
        provider: Arc<MockProvider>,
        dispatcher: Arc<RecordingDispatcher>,
        engine: DecisionEngine,
    }

    fn harness() -> Harness {
        let store = arc_store();
        let provider = Arc::new(MockProvider::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = DecisionEngine::new(store.clone(), provider.clone(), dispatcher.clone());
        Harness {
            store,
            provider,
            dispatcher,
            engine,
        }
    }

    async fn seed_decision(h: &Harness, deadline_offset: Duration) -> DonorRefundDecision {
        let campaign_id = seed_campaign(&h.store, 100_000).await;
        let donor_id = Uuid::new_v4();
        let fees = reference_fee_config().quote(Decimal::from(1000)).unwrap();
        let donation = Donation {
            id: Uuid::new_v4(),
            campaign_id,
            donor_id,
            amount: Decimal::from(1000),
            currency: "USD".to_string(),
            status: DonationStatus::Completed,
            fees: Some(fees.clone()),
            provider_charge_id: Some("ch_1".to_string()),
            failure_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        h.store.insert_donation(donation.clone()).await.unwrap();

        let decision = DonorRefundDecision {
            id: Uuid::new_v4(),
            refund_request_id: Uuid::new_v4(),
            donation_id: donation.id,
            donor_id,
            campaign_id,
            refund_amount: fees.net_amount,
            decision_deadline: Utc::now() + deadline_offset,
            status: DecisionStatus::Pending,
            decision_type: None,
            redirect_campaign_id: None,
            decided_at: None,
            executed_at: None,
            created_at: Utc::now(),
        };
        h.store.insert_decision(decision.clone()).await.unwrap();
        decision
    }

    #[tokio::test]
    async fn refund_decision_executes_payout_once() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(7)).await;

        let resolved = h
            .engine
            .submit_decision(decision.id, decision.donor_id, DecisionType::Refund, None)
            .await
            .unwrap();

        assert_eq!(resolved.status, DecisionStatus::Executed);
        assert_eq!(resolved.decision_type, Some(DecisionType::Refund));
        assert_eq!(h.provider.refund_calls(), 1);

        let donation = h
            .store
            .get_donation(decision.donation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(donation.status, DonationStatus::Refunded);
    }

    #[tokio::test]
    async fn second_submission_conflicts_and_executes_nothing_extra() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(7)).await;

        h.engine
            .submit_decision(decision.id, decision.donor_id, DecisionType::Refund, None)
            .await
            .unwrap();
        let err = h
            .engine
            .submit_decision(decision.id, decision.donor_id, DecisionType::Refund, None)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Conflict(_)));
        assert_eq!(h.provider.refund_calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_payout_surfaces_error_and_leaves_decision_decided() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(7)).await;
        h.provider.script_refund(Err(ProviderCallError::Transient(
            "provider unreachable".to_string(),
        )));

        let err = h
            .engine
            .submit_decision(decision.id, decision.donor_id, DecisionType::Refund, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Provider { .. }));
        assert_eq!(h.provider.refund_calls(), 1);

        // Out of pending, so the sweep cannot double-fire, but never marked
        // executed: the payout did not happen.
        let stored = h.store.get_decision(decision.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Decided);
        assert!(stored.executed_at.is_none());

        let donation = h
            .store
            .get_donation(decision.donation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(donation.status, DonationStatus::Completed);
    }

    #[tokio::test]
    async fn foreign_donor_is_forbidden() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(7)).await;

        let err = h
            .engine
            .submit_decision(decision.id, Uuid::new_v4(), DecisionType::Refund, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
        assert_eq!(h.provider.refund_calls(), 0);
    }

    #[tokio::test]
    async fn lapsed_deadline_rejects_donor_submission() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(-1)).await;

        let err = h
            .engine
            .submit_decision(decision.id, decision.donor_id, DecisionType::Refund, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let stored = h.store.get_decision(decision.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Pending);
    }

    #[tokio::test]
    async fn redirect_credits_the_target_campaign() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(7)).await;
        let target_id = seed_campaign(&h.store, 50_000).await;

        let resolved = h
            .engine
            .submit_decision(
                decision.id,
                decision.donor_id,
                DecisionType::RedirectToCampaign,
                Some(target_id),
            )
            .await
            .unwrap();

        assert_eq!(resolved.status, DecisionStatus::Executed);
        assert_eq!(resolved.redirect_campaign_id, Some(target_id));

        let target = h.store.get_campaign(target_id).await.unwrap().unwrap();
        assert_eq!(target.current_amount, Decimal::from(970));
        assert_eq!(target.donors_count, 1);
        assert_eq!(h.provider.refund_calls(), 0);
    }

    #[tokio::test]
    async fn redirect_to_origin_or_inactive_campaign_is_invalid() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(7)).await;

        let err = h
            .engine
            .submit_decision(
                decision.id,
                decision.donor_id,
                DecisionType::RedirectToCampaign,
                Some(decision.campaign_id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let cancelled = Campaign {
            id: Uuid::new_v4(),
            title: "wound down".to_string(),
            current_amount: Decimal::ZERO,
            donors_count: 0,
            goal_amount: Decimal::from(100),
            end_date: Utc::now(),
            status: giveline_core::models::CampaignStatus::Cancelled,
            refund_processed_at: None,
        };
        let cancelled_id = cancelled.id;
        h.store.insert_campaign(cancelled).await.unwrap();

        let err = h
            .engine
            .submit_decision(
                decision.id,
                decision.donor_id,
                DecisionType::RedirectToCampaign,
                Some(cancelled_id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        // Still pending; nothing was executed.
        let stored = h.store.get_decision(decision.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Pending);
    }

    #[tokio::test]
    async fn donate_to_platform_records_a_contribution() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(7)).await;

        h.engine
            .submit_decision(
                decision.id,
                decision.donor_id,
                DecisionType::DonateToPlatform,
                None,
            )
            .await
            .unwrap();

        let contributions = h.store.platform_contributions().await;
        assert_eq!(contributions.len(), 1);
        assert_eq!(contributions[0].amount, Decimal::from(970));
        assert_eq!(h.provider.refund_calls(), 0);
    }

    #[tokio::test]
    async fn auto_refund_resolves_a_lapsed_decision_exactly_once() {
        let h = harness();
        let decision = seed_decision(&h, Duration::days(-1)).await;

        assert!(h.engine.auto_refund(&decision).await.unwrap());
        assert!(!h.engine.auto_refund(&decision).await.unwrap());
        assert_eq!(h.provider.refund_calls(), 1);

        let stored = h.store.get_decision(decision.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DecisionStatus::Executed);
        assert_eq!(stored.decision_type, Some(DecisionType::Refund));

        let executed = h
            .dispatcher
            .events()
            .iter()
            .filter(|e| matches!(e, NotificationEvent::RefundExecuted { auto: true, .. }))
            .count();
        assert_eq!(executed, 1);
    }
}
