use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Who covers the platform fee on top of the gross donation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeeAbsorption {
    /// Donor tops up the platform fee; the full gross (minus provider fee)
    /// reaches the campaign.
    DonorPays,
    /// The charge equals the gross amount; fees come out of the credit.
    CampaignPays,
}

/// Injected fee configuration. Constructed once at startup from env; never
/// read ad hoc mid-transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    pub platform_fee_pct: Decimal,
    pub provider_flat_fee: Decimal,
    pub provider_fee_rate: Decimal,
    pub absorption: FeeAbsorption,
}

impl FeeConfig {
    pub fn new(
        platform_fee_pct: Decimal,
        provider_flat_fee: Decimal,
        provider_fee_rate: Decimal,
        absorption: FeeAbsorption,
    ) -> Result<Self> {
        if platform_fee_pct < Decimal::ZERO || platform_fee_pct > Decimal::from(20) {
            return Err(CoreError::Validation(format!(
                "platform fee percentage must be between 0 and 20, got {platform_fee_pct}"
            )));
        }
        if provider_flat_fee < Decimal::ZERO || provider_fee_rate < Decimal::ZERO {
            return Err(CoreError::Validation(
                "provider fee components must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            platform_fee_pct,
            provider_flat_fee,
            provider_fee_rate,
            absorption,
        })
    }

    /// Quote the fee breakdown for a gross donation amount. Computed once at
    /// checkout; downstream settlement only reads the stored breakdown.
    pub fn quote(&self, gross_amount: Decimal) -> Result<FeeBreakdown> {
        if gross_amount <= Decimal::ZERO {
            return Err(CoreError::Validation(
                "donation amount must be positive".to_string(),
            ));
        }

        let provider_fee =
            (self.provider_flat_fee + self.provider_fee_rate * gross_amount).round_dp(2);
        if provider_fee >= gross_amount {
            return Err(CoreError::Validation(
                "donation amount does not cover provider fees".to_string(),
            ));
        }
        let pct = self.platform_fee_pct / Decimal::ONE_HUNDRED;

        let (net_amount, platform_fee) = match self.absorption {
            FeeAbsorption::DonorPays => {
                let net = gross_amount - provider_fee;
                (net, (net * pct).round_dp(2))
            }
            FeeAbsorption::CampaignPays => {
                let platform = ((gross_amount - provider_fee) * pct).round_dp(2);
                (gross_amount - provider_fee - platform, platform)
            }
        };

        // Total derived from the parts so the conservation law holds exactly.
        let total_charge = net_amount + provider_fee + platform_fee;

        Ok(FeeBreakdown {
            gross_amount,
            provider_fee,
            platform_fee,
            net_amount,
            total_charge,
        })
    }
}

/// Immutable fee truth for one donation:
/// `total_charge == net_amount + provider_fee + platform_fee`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub gross_amount: Decimal,
    pub provider_fee: Decimal,
    pub platform_fee: Decimal,
    /// Credited to the campaign ledger on completion.
    pub net_amount: Decimal,
    /// What is actually charged at the provider.
    pub total_charge: Decimal,
}

impl FeeBreakdown {
    /// Charge amount in minor currency units, as the provider wire expects.
    pub fn total_charge_minor_units(&self) -> Result<i64> {
        (self.total_charge * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "charge amount {} does not fit minor units",
                    self.total_charge
                ))
            })
    }

    pub fn net_minor_units(&self) -> Result<i64> {
        (self.net_amount * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "net amount {} does not fit minor units",
                    self.net_amount
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn donor_pays_reference_quote() {
        // 1000 gross, 5% platform, 30 flat provider fee.
        let config = FeeConfig::new(
            Decimal::from(5),
            Decimal::from(30),
            Decimal::ZERO,
            FeeAbsorption::DonorPays,
        )
        .unwrap();

        let quote = config.quote(Decimal::from(1000)).unwrap();
        assert_eq!(quote.net_amount, dec("970"));
        assert_eq!(quote.provider_fee, dec("30"));
        assert_eq!(quote.platform_fee, dec("48.50"));
        assert_eq!(quote.total_charge, dec("1048.50"));
    }

    #[test]
    fn campaign_pays_keeps_total_at_gross() {
        let config = FeeConfig::new(
            Decimal::from(5),
            Decimal::from(30),
            Decimal::ZERO,
            FeeAbsorption::CampaignPays,
        )
        .unwrap();

        let quote = config.quote(Decimal::from(1000)).unwrap();
        assert_eq!(quote.total_charge, dec("1000"));
        assert_eq!(quote.platform_fee, dec("48.50"));
        assert_eq!(quote.net_amount, dec("921.50"));
    }

    #[test]
    fn conservation_holds_for_awkward_amounts() {
        for absorption in [FeeAbsorption::DonorPays, FeeAbsorption::CampaignPays] {
            let config = FeeConfig::new(
                dec("2.9"),
                dec("0.30"),
                dec("0.017"),
                absorption,
            )
            .unwrap();

            for amount in ["0.99", "13.37", "101.01", "9999.99"] {
                let quote = config.quote(dec(amount)).unwrap();
                assert_eq!(
                    quote.total_charge,
                    quote.net_amount + quote.provider_fee + quote.platform_fee,
                    "conservation violated at {amount} ({absorption:?})"
                );
            }
        }
    }

    #[test]
    fn rejects_out_of_bounds_platform_fee() {
        let err = FeeConfig::new(
            Decimal::from(21),
            Decimal::ZERO,
            Decimal::ZERO,
            FeeAbsorption::DonorPays,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let err = FeeConfig::new(
            Decimal::from(-1),
            Decimal::ZERO,
            Decimal::ZERO,
            FeeAbsorption::DonorPays,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn rejects_non_positive_and_fee_swallowed_amounts() {
        let config = FeeConfig::new(
            Decimal::from(5),
            Decimal::from(30),
            Decimal::ZERO,
            FeeAbsorption::DonorPays,
        )
        .unwrap();

        assert!(config.quote(Decimal::ZERO).is_err());
        assert!(config.quote(Decimal::from(-5)).is_err());
        assert!(config.quote(Decimal::from(30)).is_err());
    }

    #[test]
    fn minor_unit_conversion_rounds_to_cents() {
        let config = FeeConfig::new(
            Decimal::from(5),
            Decimal::from(30),
            Decimal::ZERO,
            FeeAbsorption::DonorPays,
        )
        .unwrap();
        let quote = config.quote(Decimal::from(1000)).unwrap();
        assert_eq!(quote.total_charge_minor_units().unwrap(), 104_850);
        assert_eq!(quote.net_minor_units().unwrap(), 97_000);
    }
}
