use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::request::RequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Pending and paid orders block a second reservation for the same request.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Paid)
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid) | (Self::Pending, Self::Failed) | (Self::Pending, Self::Cancelled)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub request_id: RequestId,
    pub gross_amount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub gateway: String,
    pub gateway_reference: String,
    pub gateway_payment_id: Option<String>,
    pub payment_url: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn mark_paid(
        &mut self,
        payment_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition_to(OrderStatus::Paid, now)?;
        if payment_id.is_some() {
            self.gateway_payment_id = payment_id;
        }
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(OrderStatus::Failed, now)?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(OrderStatus::Cancelled, now)
    }

    fn transition_to(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidOrderTransition { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
