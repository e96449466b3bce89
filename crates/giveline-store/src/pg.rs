//! Postgres-backed store. Every guard the engine relies on is a single SQL
//! statement: conditional `UPDATE ... WHERE status = 'pending'` for the
//! state-machine transitions, `ON CONFLICT DO NOTHING` for event dedup, and
//! `SET current_amount = current_amount + $2` for ledger increments, so no
//! read-modify-write ever happens in application code. Donation settlement
//! pairs the conditional donation update with the campaign credit in one
//! transaction; either both land or neither does.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use giveline_core::error::{CoreError, Result};
use giveline_core::fees::FeeBreakdown;
use giveline_core::models::{
    Campaign, CampaignStatus, DecisionStatus, DecisionType, Donation, DonationStatus,
    DonorRefundDecision, Milestone, MilestoneStatus, PaymentSession, PlatformContribution,
    RefundRequest, RefundTrigger, SessionStatus, WebhookEvent,
};
use giveline_core::storage::{
    CampaignStore, DonationStore, EventLedger, LedgerTotals, RefundStore,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(internal)
    }
}

fn internal(err: impl std::fmt::Display) -> CoreError {
    CoreError::Internal(err.to_string())
}

fn donation_status_str(status: DonationStatus) -> &'static str {
    match status {
        DonationStatus::Pending => "pending",
        DonationStatus::Completed => "completed",
        DonationStatus::Failed => "failed",
        DonationStatus::Refunded => "refunded",
    }
}

fn parse_donation_status(value: &str) -> Result<DonationStatus> {
    match value {
        "pending" => Ok(DonationStatus::Pending),
        "completed" => Ok(DonationStatus::Completed),
        "failed" => Ok(DonationStatus::Failed),
        "refunded" => Ok(DonationStatus::Refunded),
        other => Err(internal(format!("unknown donation status {other}"))),
    }
}

fn session_status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Pending => "pending",
        SessionStatus::Chargeable => "chargeable",
        SessionStatus::Succeeded => "succeeded",
        SessionStatus::Failed => "failed",
    }
}

fn parse_session_status(value: &str) -> Result<SessionStatus> {
    match value {
        "pending" => Ok(SessionStatus::Pending),
        "chargeable" => Ok(SessionStatus::Chargeable),
        "succeeded" => Ok(SessionStatus::Succeeded),
        "failed" => Ok(SessionStatus::Failed),
        other => Err(internal(format!("unknown session status {other}"))),
    }
}

fn campaign_status_str(status: CampaignStatus) -> &'static str {
    match status {
        CampaignStatus::Active => "active",
        CampaignStatus::Cancelled => "cancelled",
        CampaignStatus::Completed => "completed",
    }
}

fn parse_campaign_status(value: &str) -> Result<CampaignStatus> {
    match value {
        "active" => Ok(CampaignStatus::Active),
        "cancelled" => Ok(CampaignStatus::Cancelled),
        "completed" => Ok(CampaignStatus::Completed),
        other => Err(internal(format!("unknown campaign status {other}"))),
    }
}

fn parse_milestone_status(value: &str) -> Result<MilestoneStatus> {
    match value {
        "pending" => Ok(MilestoneStatus::Pending),
        "approved" => Ok(MilestoneStatus::Approved),
        "rejected" => Ok(MilestoneStatus::Rejected),
        other => Err(internal(format!("unknown milestone status {other}"))),
    }
}

fn trigger_str(trigger: RefundTrigger) -> &'static str {
    match trigger {
        RefundTrigger::CampaignExpired => "campaign_expired",
        RefundTrigger::CampaignCancelled => "campaign_cancelled",
        RefundTrigger::MilestoneRejected => "milestone_rejected",
    }
}

fn decision_status_str(status: DecisionStatus) -> &'static str {
    match status {
        DecisionStatus::Pending => "pending",
        DecisionStatus::Decided => "decided",
        DecisionStatus::AutoRefunded => "auto_refunded",
        DecisionStatus::Executed => "executed",
    }
}

fn parse_decision_status(value: &str) -> Result<DecisionStatus> {
    match value {
        "pending" => Ok(DecisionStatus::Pending),
        "decided" => Ok(DecisionStatus::Decided),
        "auto_refunded" => Ok(DecisionStatus::AutoRefunded),
        "executed" => Ok(DecisionStatus::Executed),
        other => Err(internal(format!("unknown decision status {other}"))),
    }
}

fn decision_type_str(decision_type: DecisionType) -> &'static str {
    match decision_type {
        DecisionType::Refund => "refund",
        DecisionType::RedirectToCampaign => "redirect_to_campaign",
        DecisionType::DonateToPlatform => "donate_to_platform",
    }
}

fn parse_decision_type(value: &str) -> Result<DecisionType> {
    match value {
        "refund" => Ok(DecisionType::Refund),
        "redirect_to_campaign" => Ok(DecisionType::RedirectToCampaign),
        "donate_to_platform" => Ok(DecisionType::DonateToPlatform),
        other => Err(internal(format!("unknown decision type {other}"))),
    }
}

fn donation_from_row(row: &PgRow) -> Result<Donation> {
    let status: String = row.try_get("status").map_err(internal)?;
    let fees: Option<Value> = row.try_get("fees").map_err(internal)?;
    let fees = fees
        .map(serde_json::from_value::<FeeBreakdown>)
        .transpose()
        .map_err(internal)?;
    Ok(Donation {
        id: row.try_get("id").map_err(internal)?,
        campaign_id: row.try_get("campaign_id").map_err(internal)?,
        donor_id: row.try_get("donor_id").map_err(internal)?,
        amount: row.try_get("amount").map_err(internal)?,
        currency: row.try_get("currency").map_err(internal)?,
        status: parse_donation_status(&status)?,
        fees,
        provider_charge_id: row.try_get("provider_charge_id").map_err(internal)?,
        failure_reason: row.try_get("failure_reason").map_err(internal)?,
        created_at: row.try_get("created_at").map_err(internal)?,
        updated_at: row.try_get("updated_at").map_err(internal)?,
    })
}

fn session_from_row(row: &PgRow) -> Result<PaymentSession> {
    let status: String = row.try_get("status").map_err(internal)?;
    let fees: Value = row.try_get("fees").map_err(internal)?;
    Ok(PaymentSession {
        id: row.try_get("id").map_err(internal)?,
        donation_id: row.try_get("donation_id").map_err(internal)?,
        provider_source_id: row.try_get("provider_source_id").map_err(internal)?,
        status: parse_session_status(&status)?,
        fees: serde_json::from_value(fees).map_err(internal)?,
        created_at: row.try_get("created_at").map_err(internal)?,
        updated_at: row.try_get("updated_at").map_err(internal)?,
    })
}

fn campaign_from_row(row: &PgRow) -> Result<Campaign> {
    let status: String = row.try_get("status").map_err(internal)?;
    Ok(Campaign {
        id: row.try_get("id").map_err(internal)?,
        title: row.try_get("title").map_err(internal)?,
        current_amount: row.try_get("current_amount").map_err(internal)?,
        donors_count: row.try_get("donors_count").map_err(internal)?,
        goal_amount: row.try_get("goal_amount").map_err(internal)?,
        end_date: row.try_get("end_date").map_err(internal)?,
        status: parse_campaign_status(&status)?,
        refund_processed_at: row.try_get("refund_processed_at").map_err(internal)?,
    })
}

fn decision_from_row(row: &PgRow) -> Result<DonorRefundDecision> {
    let status: String = row.try_get("status").map_err(internal)?;
    let decision_type: Option<String> = row.try_get("decision_type").map_err(internal)?;
    Ok(DonorRefundDecision {
        id: row.try_get("id").map_err(internal)?,
        refund_request_id: row.try_get("refund_request_id").map_err(internal)?,
        donation_id: row.try_get("donation_id").map_err(internal)?,
        donor_id: row.try_get("donor_id").map_err(internal)?,
        campaign_id: row.try_get("campaign_id").map_err(internal)?,
        refund_amount: row.try_get("refund_amount").map_err(internal)?,
        decision_deadline: row.try_get("decision_deadline").map_err(internal)?,
        status: parse_decision_status(&status)?,
        decision_type: decision_type.as_deref().map(parse_decision_type).transpose()?,
        redirect_campaign_id: row.try_get("redirect_campaign_id").map_err(internal)?,
        decided_at: row.try_get("decided_at").map_err(internal)?,
        executed_at: row.try_get("executed_at").map_err(internal)?,
        created_at: row.try_get("created_at").map_err(internal)?,
    })
}

#[async_trait]
impl DonationStore for PgStore {
    async fn insert_donation(&self, donation: Donation) -> Result<()> {
        let fees = donation
            .fees
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(internal)?;
        sqlx::query(
            r#"
            INSERT INTO donations (
                id, campaign_id, donor_id, amount, currency, status,
                fees, provider_charge_id, failure_reason, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(donation.id)
        .bind(donation.campaign_id)
        .bind(donation.donor_id)
        .bind(donation.amount)
        .bind(&donation.currency)
        .bind(donation_status_str(donation.status))
        .bind(fees)
        .bind(&donation.provider_charge_id)
        .bind(&donation.failure_reason)
        .bind(donation.created_at)
        .bind(donation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn get_donation(&self, id: Uuid) -> Result<Option<Donation>> {
        let row = sqlx::query("SELECT * FROM donations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(donation_from_row).transpose()
    }

    async fn completed_donations_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Donation>> {
        let rows = sqlx::query(
            "SELECT * FROM donations WHERE campaign_id = $1 AND status = 'completed'",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter().map(donation_from_row).collect()
    }

    async fn insert_session(&self, session: PaymentSession) -> Result<()> {
        let fees = serde_json::to_value(&session.fees).map_err(internal)?;
        sqlx::query(
            r#"
            INSERT INTO payment_sessions (
                id, donation_id, provider_source_id, status, fees, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(session.id)
        .bind(session.donation_id)
        .bind(&session.provider_source_id)
        .bind(session_status_str(session.status))
        .bind(fees)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn get_session_by_source(
        &self,
        provider_source_id: &str,
    ) -> Result<Option<PaymentSession>> {
        let row = sqlx::query("SELECT * FROM payment_sessions WHERE provider_source_id = $1")
            .bind(provider_source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn get_session_for_donation(
        &self,
        donation_id: Uuid,
    ) -> Result<Option<PaymentSession>> {
        let row = sqlx::query("SELECT * FROM payment_sessions WHERE donation_id = $1")
            .bind(donation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn set_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE payment_sessions SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(session_id)
            .bind(session_status_str(status))
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn settle_donation(
        &self,
        donation_id: Uuid,
        campaign_id: Uuid,
        provider_charge_id: &str,
        fees: FeeBreakdown,
    ) -> Result<Option<LedgerTotals>> {
        let net_amount = fees.net_amount;
        let fees = serde_json::to_value(&fees).map_err(internal)?;

        let mut tx = self.pool.begin().await.map_err(internal)?;
        let result = sqlx::query(
            r#"
            UPDATE donations
            SET status = 'completed', provider_charge_id = $2, fees = $3, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(donation_id)
        .bind(provider_charge_id)
        .bind(fees)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            UPDATE campaigns
            SET current_amount = current_amount + $2,
                donors_count = donors_count + 1
            WHERE id = $1
            RETURNING current_amount, donors_count
            "#,
        )
        .bind(campaign_id)
        .bind(net_amount)
        .fetch_optional(&mut *tx)
        .await
        .map_err(internal)?
        .ok_or_else(|| CoreError::NotFound(format!("campaign {campaign_id}")))?;
        let totals = LedgerTotals {
            campaign_id,
            current_amount: row.try_get("current_amount").map_err(internal)?,
            donors_count: row.try_get("donors_count").map_err(internal)?,
        };

        tx.commit().await.map_err(internal)?;
        Ok(Some(totals))
    }

    async fn fail_donation(&self, donation_id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE donations
            SET status = 'failed', failure_reason = $2, updated_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(donation_id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn mark_donation_refunded(&self, donation_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE donations SET status = 'refunded', updated_at = $2 WHERE id = $1")
            .bind(donation_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    async fn insert_campaign(&self, campaign: Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, title, current_amount, donors_count, goal_amount,
                end_date, status, refund_processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(campaign.id)
        .bind(&campaign.title)
        .bind(campaign.current_amount)
        .bind(campaign.donors_count)
        .bind(campaign.goal_amount)
        .bind(campaign.end_date)
        .bind(campaign_status_str(campaign.status))
        .bind(campaign.refund_processed_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn apply_delta(
        &self,
        campaign_id: Uuid,
        amount_delta: Decimal,
        donor_delta: i64,
    ) -> Result<LedgerTotals> {
        let row = sqlx::query(
            r#"
            UPDATE campaigns
            SET current_amount = current_amount + $2,
                donors_count = donors_count + $3
            WHERE id = $1
            RETURNING current_amount, donors_count
            "#,
        )
        .bind(campaign_id)
        .bind(amount_delta)
        .bind(donor_delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?
        .ok_or_else(|| CoreError::NotFound(format!("campaign {campaign_id}")))?;

        Ok(LedgerTotals {
            campaign_id,
            current_amount: row.try_get("current_amount").map_err(internal)?,
            donors_count: row.try_get("donors_count").map_err(internal)?,
        })
    }

    async fn expired_unprocessed_campaigns(&self, cutoff: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM campaigns
            WHERE status = 'active'
              AND end_date < $1
              AND current_amount < goal_amount
              AND refund_processed_at IS NULL
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter().map(campaign_from_row).collect()
    }

    async fn cancelled_unprocessed_campaigns(&self) -> Result<Vec<Campaign>> {
        let rows = sqlx::query(
            "SELECT * FROM campaigns WHERE status = 'cancelled' AND refund_processed_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter().map(campaign_from_row).collect()
    }

    async fn mark_campaign_refund_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE campaigns SET refund_processed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn insert_milestone(&self, milestone: Milestone) -> Result<()> {
        let status = match milestone.status {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::Approved => "approved",
            MilestoneStatus::Rejected => "rejected",
        };
        sqlx::query(
            r#"
            INSERT INTO milestones (id, campaign_id, status, rejection_reason, refund_processed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(milestone.id)
        .bind(milestone.campaign_id)
        .bind(status)
        .bind(&milestone.rejection_reason)
        .bind(milestone.refund_processed_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn rejected_unprocessed_milestones(&self) -> Result<Vec<Milestone>> {
        let rows = sqlx::query(
            "SELECT * FROM milestones WHERE status = 'rejected' AND refund_processed_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status").map_err(internal)?;
                Ok(Milestone {
                    id: row.try_get("id").map_err(internal)?,
                    campaign_id: row.try_get("campaign_id").map_err(internal)?,
                    status: parse_milestone_status(&status)?,
                    rejection_reason: row.try_get("rejection_reason").map_err(internal)?,
                    refund_processed_at: row.try_get("refund_processed_at").map_err(internal)?,
                })
            })
            .collect()
    }

    async fn mark_milestone_refund_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE milestones SET refund_processed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl EventLedger for PgStore {
    async fn record_if_new(&self, provider_event_id: &str, payload: Value) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (provider_event_id, payload, received_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider_event_id) DO NOTHING
            "#,
        )
        .bind(provider_event_id)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_event_processed(&self, provider_event_id: &str) -> Result<()> {
        sqlx::query("UPDATE webhook_events SET processed_at = $2 WHERE provider_event_id = $1")
            .bind(provider_event_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn get_event(&self, provider_event_id: &str) -> Result<Option<WebhookEvent>> {
        let row = sqlx::query("SELECT * FROM webhook_events WHERE provider_event_id = $1")
            .bind(provider_event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.map(|row| {
            Ok(WebhookEvent {
                provider_event_id: row.try_get("provider_event_id").map_err(internal)?,
                payload: row.try_get("payload").map_err(internal)?,
                received_at: row.try_get("received_at").map_err(internal)?,
                processed_at: row.try_get("processed_at").map_err(internal)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl RefundStore for PgStore {
    async fn refund_request_exists(
        &self,
        campaign_id: Uuid,
        milestone_id: Option<Uuid>,
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM refund_requests
                WHERE campaign_id = $1 AND milestone_id IS NOT DISTINCT FROM $2
            )
            "#,
        )
        .bind(campaign_id)
        .bind(milestone_id)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)
    }

    async fn insert_refund_request(&self, request: RefundRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refund_requests (
                id, campaign_id, milestone_id, trigger_kind, reason,
                total_amount, donation_ids, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.id)
        .bind(request.campaign_id)
        .bind(request.milestone_id)
        .bind(trigger_str(request.trigger))
        .bind(&request.reason)
        .bind(request.total_amount)
        .bind(&request.donation_ids)
        .bind(request.created_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn insert_decision(&self, decision: DonorRefundDecision) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refund_decisions (
                id, refund_request_id, donation_id, donor_id, campaign_id,
                refund_amount, decision_deadline, status, decision_type,
                redirect_campaign_id, decided_at, executed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(decision.id)
        .bind(decision.refund_request_id)
        .bind(decision.donation_id)
        .bind(decision.donor_id)
        .bind(decision.campaign_id)
        .bind(decision.refund_amount)
        .bind(decision.decision_deadline)
        .bind(decision_status_str(decision.status))
        .bind(decision.decision_type.map(decision_type_str))
        .bind(decision.redirect_campaign_id)
        .bind(decision.decided_at)
        .bind(decision.executed_at)
        .bind(decision.created_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn get_decision(&self, id: Uuid) -> Result<Option<DonorRefundDecision>> {
        let row = sqlx::query("SELECT * FROM refund_decisions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn decisions_for_request(&self, request_id: Uuid) -> Result<Vec<DonorRefundDecision>> {
        let rows = sqlx::query("SELECT * FROM refund_decisions WHERE refund_request_id = $1")
            .bind(request_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        rows.iter().map(decision_from_row).collect()
    }

    async fn decide_if_pending(
        &self,
        decision_id: Uuid,
        to_status: DecisionStatus,
        decision_type: DecisionType,
        redirect_campaign_id: Option<Uuid>,
        decided_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE refund_decisions
            SET status = $2, decision_type = $3, redirect_campaign_id = $4, decided_at = $5
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(decision_id)
        .bind(decision_status_str(to_status))
        .bind(decision_type_str(decision_type))
        .bind(redirect_campaign_id)
        .bind(decided_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_decision_executed(&self, decision_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE refund_decisions SET status = 'executed', executed_at = $2 WHERE id = $1",
        )
        .bind(decision_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn pending_decisions_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DonorRefundDecision>> {
        let rows = sqlx::query(
            "SELECT * FROM refund_decisions WHERE status = 'pending' AND decision_deadline < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter().map(decision_from_row).collect()
    }

    async fn insert_platform_contribution(
        &self,
        contribution: PlatformContribution,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO platform_contributions (id, decision_id, donor_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(contribution.id)
        .bind(contribution.decision_id)
        .bind(contribution.donor_id)
        .bind(contribution.amount)
        .bind(contribution.created_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }
}
