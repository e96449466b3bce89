//! Checkout entry point: quotes the fee breakdown ONCE and persists it on
//! the payment session. Everything downstream (charging, crediting) reads
//! this stored breakdown and never recomputes fees from provider data.

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use giveline_core::error::{CoreError, Result};
use giveline_core::fees::FeeConfig;
use giveline_core::models::{
    CampaignStatus, Donation, DonationStatus, PaymentSession, SessionStatus,
};
use giveline_core::storage::Store;

pub async fn begin_checkout(
    store: &dyn Store,
    fee_config: &FeeConfig,
    campaign_id: Uuid,
    donor_id: Uuid,
    amount: Decimal,
    currency: &str,
    provider_source_id: &str,
) -> Result<(Donation, PaymentSession)> {
    let campaign = store
        .get_campaign(campaign_id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("campaign {campaign_id}")))?;
    if campaign.status != CampaignStatus::Active {
        return Err(CoreError::Validation(
            "campaign is not accepting donations".to_string(),
        ));
    }
    if currency.trim().is_empty() {
        return Err(CoreError::Validation("currency is required".to_string()));
    }

    let fees = fee_config.quote(amount)?;
    let now = Utc::now();

    let donation = Donation {
        id: Uuid::new_v4(),
        campaign_id,
        donor_id,
        amount,
        currency: currency.to_string(),
        status: DonationStatus::Pending,
        fees: None,
        provider_charge_id: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
    };
    let session = PaymentSession {
        id: Uuid::new_v4(),
        donation_id: donation.id,
        provider_source_id: provider_source_id.to_string(),
        status: SessionStatus::Pending,
        fees,
        created_at: now,
        updated_at: now,
    };

    store.insert_donation(donation.clone()).await?;
    store.insert_session(session.clone()).await?;

    Ok((donation, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{arc_store, reference_fee_config, seed_campaign};

    #[tokio::test]
    async fn checkout_persists_an_immutable_fee_quote() {
        let store = arc_store();
        let campaign_id = seed_campaign(&store, 10_000).await;
        let config = reference_fee_config();

        let (donation, session) = begin_checkout(
            store.as_ref(),
            &config,
            campaign_id,
            Uuid::new_v4(),
            Decimal::from(1000),
            "USD",
            "src_abc",
        )
        .await
        .unwrap();

        assert_eq!(donation.status, DonationStatus::Pending);
        assert_eq!(session.fees.net_amount, Decimal::from(970));
        assert_eq!(session.fees.total_charge, "1048.50".parse().unwrap());
        assert_eq!(
            session.fees.total_charge,
            session.fees.net_amount + session.fees.provider_fee + session.fees.platform_fee
        );
    }

    #[tokio::test]
    async fn checkout_rejects_inactive_campaigns_and_bad_amounts() {
        let store = arc_store();
        let config = reference_fee_config();

        let err = begin_checkout(
            store.as_ref(),
            &config,
            Uuid::new_v4(),
            Uuid::new_v4(),
            Decimal::from(1000),
            "USD",
            "src_abc",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        let campaign_id = seed_campaign(&store, 10_000).await;
        let err = begin_checkout(
            store.as_ref(),
            &config,
            campaign_id,
            Uuid::new_v4(),
            Decimal::ZERO,
            "USD",
            "src_abc",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
