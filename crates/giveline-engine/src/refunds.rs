//! Refund trigger scanner and auto-refund sweep, run together as one
//! periodic job. A `try_lock` run guard keeps invocations single-flight, and
//! a per-run seen-set keeps any campaign from being scanned twice in the
//! same sweep. Re-running the scan is idempotent: processed campaigns carry
//! a marker and an existing RefundRequest short-circuits creation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use giveline_core::error::Result;
use giveline_core::events::{NotificationDispatcher, NotificationEvent};
use giveline_core::models::{
    Campaign, DecisionStatus, DonorRefundDecision, RefundRequest, RefundTrigger,
};
use giveline_core::storage::Store;

use crate::decisions::DecisionEngine;

#[derive(Debug, Clone, Serialize, Default)]
pub struct SweepSummary {
    pub processed_count: usize,
    pub campaigns: Vec<Uuid>,
    pub auto_refunded_count: usize,
    /// True when another sweep was already in flight and this one did
    /// nothing.
    pub skipped: bool,
}

pub struct RefundSweeper {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    decisions: DecisionEngine,
    decision_window: Duration,
    grace_period: Duration,
    run_lock: Mutex<()>,
}

impl RefundSweeper {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        decisions: DecisionEngine,
        decision_window: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            decisions,
            decision_window,
            grace_period,
            run_lock: Mutex::new(()),
        }
    }

    /// One combined sweep: open refund obligations for newly triggered
    /// campaigns/milestones, then auto-refund every decision whose deadline
    /// has lapsed.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepSummary> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            info!("refund sweep already in flight, skipping");
            return Ok(SweepSummary {
                skipped: true,
                ..SweepSummary::default()
            });
        };

        let mut summary = SweepSummary::default();
        let mut seen = HashSet::new();

        let cutoff = now - self.grace_period;
        for campaign in self.store.expired_unprocessed_campaigns(cutoff).await? {
            if seen.insert(campaign.id) {
                self.open_obligations(
                    &campaign,
                    None,
                    RefundTrigger::CampaignExpired,
                    "campaign ended without reaching its goal",
                    now,
                    &mut summary,
                )
                .await?;
            }
        }

        for campaign in self.store.cancelled_unprocessed_campaigns().await? {
            if seen.insert(campaign.id) {
                self.open_obligations(
                    &campaign,
                    None,
                    RefundTrigger::CampaignCancelled,
                    "campaign was cancelled",
                    now,
                    &mut summary,
                )
                .await?;
            }
        }

        for milestone in self.store.rejected_unprocessed_milestones().await? {
            let Some(campaign) = self.store.get_campaign(milestone.campaign_id).await? else {
                warn!(milestone_id = %milestone.id, "rejected milestone has no campaign");
                continue;
            };
            if seen.insert(campaign.id) {
                let reason = milestone
                    .rejection_reason
                    .clone()
                    .unwrap_or_else(|| "milestone was rejected".to_string());
                self.open_obligations(
                    &campaign,
                    Some(milestone.id),
                    RefundTrigger::MilestoneRejected,
                    &reason,
                    now,
                    &mut summary,
                )
                .await?;
            }
            self.store
                .mark_milestone_refund_processed(milestone.id, now)
                .await?;
        }

        summary.auto_refunded_count = self.auto_refund_lapsed(now).await?;
        Ok(summary)
    }

    async fn open_obligations(
        &self,
        campaign: &Campaign,
        milestone_id: Option<Uuid>,
        trigger: RefundTrigger,
        reason: &str,
        now: DateTime<Utc>,
        summary: &mut SweepSummary,
    ) -> Result<()> {
        if self
            .store
            .refund_request_exists(campaign.id, milestone_id)
            .await?
        {
            self.store
                .mark_campaign_refund_processed(campaign.id, now)
                .await?;
            return Ok(());
        }

        let donations = self
            .store
            .completed_donations_for_campaign(campaign.id)
            .await?;
        if donations.is_empty() {
            self.store
                .mark_campaign_refund_processed(campaign.id, now)
                .await?;
            return Ok(());
        }

        let refunds: Vec<(Uuid, Uuid, Decimal)> = donations
            .iter()
            .map(|d| {
                let net = d
                    .fees
                    .as_ref()
                    .map(|f| f.net_amount)
                    .unwrap_or(d.amount);
                (d.id, d.donor_id, net)
            })
            .collect();
        let total: Decimal = refunds.iter().map(|(_, _, net)| *net).sum();

        let request = RefundRequest {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            milestone_id,
            trigger,
            reason: reason.to_string(),
            total_amount: total,
            donation_ids: refunds.iter().map(|(id, _, _)| *id).collect(),
            created_at: now,
        };
        let request_id = request.id;
        self.store.insert_refund_request(request).await?;

        let deadline = now + self.decision_window;
        for (donation_id, donor_id, net) in &refunds {
            let decision = DonorRefundDecision {
                id: Uuid::new_v4(),
                refund_request_id: request_id,
                donation_id: *donation_id,
                donor_id: *donor_id,
                campaign_id: campaign.id,
                refund_amount: *net,
                decision_deadline: deadline,
                status: DecisionStatus::Pending,
                decision_type: None,
                redirect_campaign_id: None,
                decided_at: None,
                executed_at: None,
                created_at: now,
            };
            let decision_id = decision.id;
            self.store.insert_decision(decision).await?;

            if let Err(err) = self
                .dispatcher
                .dispatch(NotificationEvent::RefundWindowOpened {
                    decision_id,
                    donor_id: *donor_id,
                    campaign_id: campaign.id,
                    refund_amount: *net,
                    decision_deadline: deadline,
                })
                .await
            {
                warn!("notification dispatch failed: {err:#}");
            }
        }

        // The obligated funds leave the origin campaign's effective total
        // when the request opens, so later redirects cannot double-count
        // them across two campaigns.
        let totals = self
            .store
            .apply_delta(campaign.id, -total, -(refunds.len() as i64))
            .await?;
        info!(
            campaign_id = %campaign.id,
            trigger = ?trigger,
            total_amount = %total,
            remaining = %totals.current_amount,
            "refund obligations opened"
        );

        self.store
            .mark_campaign_refund_processed(campaign.id, now)
            .await?;

        summary.processed_count += 1;
        summary.campaigns.push(campaign.id);
        Ok(())
    }

    async fn auto_refund_lapsed(&self, now: DateTime<Utc>) -> Result<usize> {
        let lapsed = self.store.pending_decisions_past_deadline(now).await?;
        let mut refunded = 0;
        for decision in lapsed {
            match self.decisions.auto_refund(&decision).await {
                Ok(true) => refunded += 1,
                Ok(false) => {}
                // One stuck payout must not block the rest of the sweep.
                Err(err) => {
                    error!(decision_id = %decision.id, "auto refund failed: {err}");
                }
            }
        }
        Ok(refunded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use giveline_core::models::{
        Campaign, CampaignStatus, DecisionStatus, Donation, DonationStatus, Milestone,
        MilestoneStatus,
    };
    use giveline_core::storage::{CampaignStore, DonationStore, RefundStore};
    use giveline_provider::MockProvider;
    use giveline_store::MemoryStore;

    use super::*;
    use crate::testutil::{RecordingDispatcher, arc_store, reference_fee_config};

    struct Harness {
        store: Arc<MemoryStore>,
        provider: Arc<MockProvider>,
        sweeper: RefundSweeper,
    }

    fn harness() -> Harness {
        let store = arc_store();
        let provider = Arc::new(MockProvider::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let decisions =
            DecisionEngine::new(store.clone(), provider.clone(), dispatcher.clone());
        let sweeper = RefundSweeper::new(
            store.clone(),
            dispatcher,
            decisions,
            Duration::days(14),
            Duration::days(7),
        );
        Harness {
            store,
            provider,
            sweeper,
        }
    }

    async fn seed_expired_campaign(h: &Harness, days_past_end: i64, donors: usize) -> Uuid {
        let campaign_id = Uuid::new_v4();
        let fees = reference_fee_config().quote(Decimal::from(1000)).unwrap();
        let mut current = Decimal::ZERO;
        for i in 0..donors {
            let donation = Donation {
                id: Uuid::new_v4(),
                campaign_id,
                donor_id: Uuid::new_v4(),
                amount: Decimal::from(1000),
                currency: "USD".to_string(),
                status: DonationStatus::Completed,
                fees: Some(fees.clone()),
                provider_charge_id: Some(format!("ch_{i}")),
                failure_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            h.store.insert_donation(donation).await.unwrap();
            current += fees.net_amount;
        }
        h.store
            .insert_campaign(Campaign {
                id: campaign_id,
                title: "short of goal".to_string(),
                current_amount: current,
                donors_count: donors as i64,
                goal_amount: Decimal::from(1_000_000),
                end_date: Utc::now() - Duration::days(days_past_end),
                status: CampaignStatus::Active,
                refund_processed_at: None,
            })
            .await
            .unwrap();
        campaign_id
    }

    #[tokio::test]
    async fn expired_under_goal_campaign_opens_one_request_per_donor_decision() {
        let h = harness();
        let campaign_id = seed_expired_campaign(&h, 8, 3).await;
        let scan_time = Utc::now();

        let summary = h.sweeper.run(scan_time).await.unwrap();
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.campaigns, vec![campaign_id]);

        let requests = h.store.refund_requests_for_campaign(campaign_id).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].total_amount, Decimal::from(2910));
        assert_eq!(requests[0].donation_ids.len(), 3);

        let decisions = h
            .store
            .decisions_for_request(requests[0].id)
            .await
            .unwrap();
        assert_eq!(decisions.len(), 3);
        for decision in &decisions {
            assert_eq!(decision.status, DecisionStatus::Pending);
            assert_eq!(decision.refund_amount, Decimal::from(970));
            assert_eq!(decision.decision_deadline, scan_time + Duration::days(14));
        }

        // Obligated funds left the origin campaign when the request opened.
        let campaign = h.store.get_campaign(campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.current_amount, Decimal::ZERO);
        assert_eq!(campaign.donors_count, 0);
        assert!(campaign.refund_processed_at.is_some());
    }

    #[tokio::test]
    async fn rescanning_a_processed_campaign_creates_nothing() {
        let h = harness();
        let campaign_id = seed_expired_campaign(&h, 8, 2).await;

        h.sweeper.run(Utc::now()).await.unwrap();
        let second = h.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(second.processed_count, 0);

        let requests = h.store.refund_requests_for_campaign(campaign_id).await;
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn campaign_inside_grace_period_is_left_alone() {
        let h = harness();
        let campaign_id = seed_expired_campaign(&h, 3, 1).await;

        let summary = h.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(summary.processed_count, 0);
        assert!(h
            .store
            .refund_requests_for_campaign(campaign_id)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn cancelled_campaign_triggers_refunds_regardless_of_dates() {
        let h = harness();
        let campaign_id = Uuid::new_v4();
        let fees = reference_fee_config().quote(Decimal::from(500)).unwrap();
        h.store
            .insert_donation(Donation {
                id: Uuid::new_v4(),
                campaign_id,
                donor_id: Uuid::new_v4(),
                amount: Decimal::from(500),
                currency: "USD".to_string(),
                status: DonationStatus::Completed,
                fees: Some(fees.clone()),
                provider_charge_id: Some("ch_1".to_string()),
                failure_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        h.store
            .insert_campaign(Campaign {
                id: campaign_id,
                title: "wound down".to_string(),
                current_amount: fees.net_amount,
                donors_count: 1,
                goal_amount: Decimal::from(100),
                end_date: Utc::now() + Duration::days(10),
                status: CampaignStatus::Cancelled,
                refund_processed_at: None,
            })
            .await
            .unwrap();

        let summary = h.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(summary.processed_count, 1);

        let requests = h.store.refund_requests_for_campaign(campaign_id).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].trigger, RefundTrigger::CampaignCancelled);
    }

    #[tokio::test]
    async fn rejected_milestone_opens_refunds_with_its_reason() {
        let h = harness();
        let campaign_id = seed_expired_campaign(&h, 0, 1).await;
        // Keep the campaign itself out of the expired path.
        let milestone = Milestone {
            id: Uuid::new_v4(),
            campaign_id,
            status: MilestoneStatus::Rejected,
            rejection_reason: Some("deliverables not met".to_string()),
            refund_processed_at: None,
        };
        h.store.insert_milestone(milestone.clone()).await.unwrap();

        let summary = h.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(summary.processed_count, 1);

        let requests = h.store.refund_requests_for_campaign(campaign_id).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].milestone_id, Some(milestone.id));
        assert_eq!(requests[0].reason, "deliverables not met");

        // Milestone marked processed; a second sweep is a no-op.
        let second = h.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(second.processed_count, 0);
    }

    #[tokio::test]
    async fn sweep_auto_refunds_lapsed_decisions() {
        let h = harness();
        let campaign_id = seed_expired_campaign(&h, 30, 2).await;

        // Open obligations with a sweep dated in the past so the decision
        // window has already lapsed by the second sweep.
        let first_run = Utc::now() - Duration::days(20);
        h.sweeper.run(first_run).await.unwrap();

        let summary = h.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(summary.auto_refunded_count, 2);
        assert_eq!(h.provider.refund_calls(), 2);

        let requests = h.store.refund_requests_for_campaign(campaign_id).await;
        let decisions = h
            .store
            .decisions_for_request(requests[0].id)
            .await
            .unwrap();
        for decision in decisions {
            assert_eq!(decision.status, DecisionStatus::Executed);
        }

        // Third sweep finds nothing left.
        let third = h.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(third.auto_refunded_count, 0);
    }
}
