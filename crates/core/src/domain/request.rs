use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Opaque reference to a file held by the storage service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Submitted,
    PendingAdvisor,
    Accepted,
    AwaitingPayment,
    PaymentReserved,
    Paid,
    InProgress,
    Completed,
    Released,
    Rated,
    Closed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::PendingAdvisor => "pending_advisor",
            Self::Accepted => "accepted",
            Self::AwaitingPayment => "awaiting_payment",
            Self::PaymentReserved => "payment_reserved",
            Self::Paid => "paid",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Released => "released",
            Self::Rated => "rated",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "pending_advisor" => Some(Self::PendingAdvisor),
            "accepted" => Some(Self::Accepted),
            "awaiting_payment" => Some(Self::AwaitingPayment),
            "payment_reserved" => Some(Self::PaymentReserved),
            "paid" => Some(Self::Paid),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "released" => Some(Self::Released),
            "rated" => Some(Self::Rated),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rated | Self::Closed)
    }

    /// Resolves the status reached from `self` when `event` occurs.
    pub fn on(&self, event: RequestEvent) -> Option<Self> {
        use RequestEvent::*;
        use RequestStatus::*;

        let next = match (self, event) {
            (Submitted, OffersCreated) => PendingAdvisor,
            (PendingAdvisor, AdvisorAccepted) => Accepted,
            (Accepted, PaymentHeld) => PaymentReserved,
            (Accepted, PaymentPending) => AwaitingPayment,
            (AwaitingPayment, PaymentCaptured) | (PaymentReserved, PaymentCaptured) => Paid,
            (AwaitingPayment, PaymentFailed) | (PaymentReserved, PaymentFailed) => Accepted,
            (Paid, SessionStarted) => InProgress,
            (InProgress, SessionCompleted) => Completed,
            (Completed, FundsReleased) => Released,
            (Released, RatingSubmitted) => Rated,
            (Submitted, CloseRequested)
            | (PendingAdvisor, CloseRequested)
            | (Accepted, CloseRequested)
            | (AwaitingPayment, CloseRequested)
            | (PaymentReserved, CloseRequested) => Closed,
            _ => return None,
        };

        Some(next)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    OffersCreated,
    AdvisorAccepted,
    PaymentHeld,
    PaymentPending,
    PaymentCaptured,
    PaymentFailed,
    SessionStarted,
    SessionCompleted,
    FundsReleased,
    RatingSubmitted,
    CloseRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub status: RequestStatus,
    pub gross_amount: Decimal,
    pub discount: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub summary: String,
    pub attachments: Vec<FileRef>,
    pub advisor_id: Option<AdvisorId>,
    pub rating: Option<u8>,
    pub rating_comment: Option<String>,
    pub close_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConsultationRequest {
    pub fn can_apply(&self, event: RequestEvent) -> bool {
        self.status.on(event).is_some()
    }

    pub fn apply(&mut self, event: RequestEvent, now: DateTime<Utc>) -> Result<(), DomainError> {
        let next = self
            .status
            .on(event)
            .ok_or(DomainError::InvalidRequestTransition { from: self.status, event })?;
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.0 == user_id
    }

    pub fn is_assigned_to(&self, advisor_id: &str) -> bool {
        self.advisor_id.as_ref().is_some_and(|id| id.0 == advisor_id)
    }
}
