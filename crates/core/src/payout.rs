use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Number of decimal places in the currency's minor unit.
pub fn minor_unit_scale(currency: &str) -> u32 {
    match currency.trim().to_ascii_uppercase().as_str() {
        "KWD" | "BHD" | "OMR" | "JOD" | "TND" | "LYD" | "IQD" => 3,
        "JPY" | "KRW" => 0,
        _ => 2,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSplit {
    pub advisor_share: Decimal,
    pub platform_fee: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RevenueSplit {
    advisor_pct: u32,
}

impl Default for RevenueSplit {
    fn default() -> Self {
        Self { advisor_pct: 70 }
    }
}

impl RevenueSplit {
    pub fn new(advisor_pct: u32) -> Result<Self, DomainError> {
        if advisor_pct > 100 {
            return Err(DomainError::InvariantViolation(format!(
                "advisor share {advisor_pct}% exceeds 100%"
            )));
        }
        Ok(Self { advisor_pct })
    }

    pub fn advisor_pct(&self) -> u32 {
        self.advisor_pct
    }

    /// Splits `gross` so that `advisor_share + platform_fee == gross` exactly.
    ///
    /// The advisor share is rounded half-even to the currency's minor unit and the
    /// platform keeps the remainder.
    pub fn split(&self, gross: Decimal, currency: &str) -> Result<PayoutSplit, DomainError> {
        if gross < Decimal::ZERO {
            return Err(DomainError::InvariantViolation("gross amount is negative".to_string()));
        }
        let scale = minor_unit_scale(currency);
        if gross.normalize().scale() > scale {
            return Err(DomainError::InvariantViolation(format!(
                "amount {gross} has more precision than {currency} allows"
            )));
        }

        let advisor_share = gross
            .checked_mul(Decimal::from(self.advisor_pct))
            .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
            .ok_or_else(|| {
                DomainError::InvariantViolation(format!("amount {gross} is too large to split"))
            })?
            .round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
        let platform_fee = gross.checked_sub(advisor_share).ok_or_else(|| {
            DomainError::InvariantViolation(format!("amount {gross} is too large to split"))
        })?;

        Ok(PayoutSplit { advisor_share, platform_fee })
    }
}
