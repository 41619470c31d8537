use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use consult_core::domain::advisor::{Advisor, AdvisorId};
use consult_core::domain::assignment::{AssignmentId, RequestAssignment};
use consult_core::domain::order::{Order, OrderId};
use consult_core::domain::request::{ConsultationRequest, RequestId, UserId};
use consult_core::domain::settlement::Settlement;
use consult_core::domain::transition::RequestTransition;
use consult_core::errors::ApplicationError;
use consult_core::workflow::Changeset;

pub mod advisor;
pub mod consultation;
pub mod memory;

pub use advisor::SqlAdvisorRepository;
pub use consultation::SqlConsultationRepository;
pub use memory::{InMemoryAdvisorRepository, InMemoryConsultationRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => ApplicationError::Conflict(message),
            RepositoryError::Database(error) => ApplicationError::Persistence(error.to_string()),
            RepositoryError::Decode(message) => ApplicationError::Persistence(message),
        }
    }
}

/// Request store, assignment ledger, transition log, orders and settlements.
///
/// `apply` writes a whole [`Changeset`] in one transaction. Guarded updates that find the
/// row in another status, and writes that break a uniqueness rule, fail with
/// [`RepositoryError::Conflict`] and leave every row untouched.
#[async_trait]
pub trait ConsultationRepository: Send + Sync {
    async fn find_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<ConsultationRequest>, RepositoryError>;

    async fn list_requests_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConsultationRequest>, RepositoryError>;

    async fn find_assignment(
        &self,
        id: &AssignmentId,
    ) -> Result<Option<RequestAssignment>, RepositoryError>;

    async fn list_assignments(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestAssignment>, RepositoryError>;

    /// Open offers for an advisor whose request is still waiting for an advisor.
    async fn list_open_offers(
        &self,
        advisor_id: &AdvisorId,
    ) -> Result<Vec<RequestAssignment>, RepositoryError>;

    /// Offers still open that were made at or before `cutoff`.
    async fn list_offered_until(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RequestAssignment>, RepositoryError>;

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn list_orders(&self, request_id: &RequestId) -> Result<Vec<Order>, RepositoryError>;

    async fn find_settlement(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<Settlement>, RepositoryError>;

    async fn list_transitions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestTransition>, RepositoryError>;

    async fn apply(&self, changeset: Changeset) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AdvisorRepository: Send + Sync {
    async fn find_by_id(&self, id: &AdvisorId) -> Result<Option<Advisor>, RepositoryError>;
    async fn list_active(&self) -> Result<Vec<Advisor>, RepositoryError>;
    async fn save(&self, advisor: Advisor) -> Result<(), RepositoryError>;
}

/// Fixed-width UTC encoding so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| parse_timestamp(column, raw)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use consult_core::errors::ApplicationError;

    use super::{format_timestamp, parse_timestamp, RepositoryError};

    #[test]
    fn timestamps_use_fixed_width_utc() {
        let value = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).single().expect("valid date");
        let encoded = format_timestamp(value);

        assert_eq!(encoded, "2026-03-01T08:30:00.000000Z");
        assert_eq!(parse_timestamp("at", encoded).expect("parse"), value);
    }

    #[test]
    fn conflicts_surface_as_application_conflicts() {
        let error = ApplicationError::from(RepositoryError::Conflict("request moved".to_string()));
        assert_eq!(error, ApplicationError::Conflict("request moved".to_string()));

        let error = ApplicationError::from(RepositoryError::Decode("bad status".to_string()));
        assert!(matches!(error, ApplicationError::Persistence(_)));
    }
}
