use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::order::OrderId;
use crate::domain::request::{RequestId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub order_id: OrderId,
    pub request_id: RequestId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
}

/// How the gateway left the funds after a reservation call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationHold {
    /// Funds are held; capture is confirmed later.
    Held,
    /// The user must complete payment at `payment_url`.
    AwaitingCustomer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayReservation {
    pub reference: String,
    pub payment_id: Option<String>,
    pub payment_url: Option<String>,
    pub hold: ReservationHold,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("payment gateway rejected the reservation: {0}")]
    Rejected(String),
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("payment gateway returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Result<GatewayReservation, GatewayError>;
}

/// Holds funds immediately with a deterministic reference. Used in development and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManualGateway;

#[async_trait]
impl PaymentGateway for ManualGateway {
    fn name(&self) -> &str {
        "manual"
    }

    async fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Result<GatewayReservation, GatewayError> {
        if request.amount < Decimal::ZERO {
            return Err(GatewayError::Rejected("amount must not be negative".to_string()));
        }

        Ok(GatewayReservation {
            reference: format!("manual-{}", request.order_id.0),
            payment_id: None,
            payment_url: None,
            hold: ReservationHold::Held,
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{GatewayError, ManualGateway, PaymentGateway, ReservationHold, ReservationRequest};
    use crate::domain::order::OrderId;
    use crate::domain::request::{RequestId, UserId};

    fn reservation(amount: Decimal) -> ReservationRequest {
        ReservationRequest {
            order_id: OrderId("ORD-1".to_string()),
            request_id: RequestId("REQ-1".to_string()),
            user_id: UserId("U-1".to_string()),
            amount,
            currency: "KWD".to_string(),
            description: "Consultation REQ-1".to_string(),
        }
    }

    #[tokio::test]
    async fn manual_gateway_holds_with_deterministic_reference() {
        let reservation = ManualGateway
            .reserve(reservation(Decimal::new(100_000, 3)))
            .await
            .expect("manual gateway reserves positive amounts");

        assert_eq!(reservation.reference, "manual-ORD-1");
        assert_eq!(reservation.hold, ReservationHold::Held);
        assert!(reservation.payment_url.is_none());
    }

    #[tokio::test]
    async fn manual_gateway_rejects_negative_amount() {
        let error = ManualGateway
            .reserve(reservation(Decimal::new(-1, 0)))
            .await
            .expect_err("negative amount is not reservable");

        assert!(matches!(error, GatewayError::Rejected(_)));
    }
}
