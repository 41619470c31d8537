use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::domain::request::RequestId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Offered,
    Accepted,
    Declined,
    Expired,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offered => "offered",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "offered" => Some(Self::Offered),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentDecision {
    Accept,
    Decline,
}

impl AssignmentDecision {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" => Some(Self::Accept),
            "decline" => Some(Self::Decline),
            _ => None,
        }
    }
}

/// An offer of one request to one advisor. Lower ranks are offered first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestAssignment {
    pub id: AssignmentId,
    pub request_id: RequestId,
    pub advisor_id: AdvisorId,
    pub rank: u32,
    pub status: AssignmentStatus,
    pub offered_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

impl RequestAssignment {
    pub fn respond(
        &mut self,
        decision: AssignmentDecision,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_offered()?;
        match decision {
            AssignmentDecision::Accept => {
                self.status = AssignmentStatus::Accepted;
            }
            AssignmentDecision::Decline => {
                self.status = AssignmentStatus::Declined;
                self.decline_reason = reason;
            }
        }
        self.responded_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_offered()?;
        self.status = AssignmentStatus::Expired;
        self.responded_at = Some(now);
        Ok(())
    }

    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.status == AssignmentStatus::Offered && self.offered_at + ttl <= now
    }

    fn ensure_offered(&self) -> Result<(), DomainError> {
        if self.status == AssignmentStatus::Offered {
            return Ok(());
        }
        Err(DomainError::AssignmentAlreadyResolved { id: self.id.0.clone(), status: self.status })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{AssignmentDecision, AssignmentId, AssignmentStatus, RequestAssignment};
    use crate::domain::advisor::AdvisorId;
    use crate::domain::request::RequestId;
    use crate::errors::DomainError;

    fn offered() -> RequestAssignment {
        RequestAssignment {
            id: AssignmentId("ASG-1".to_string()),
            request_id: RequestId("REQ-1".to_string()),
            advisor_id: AdvisorId("ADV-A".to_string()),
            rank: 1,
            status: AssignmentStatus::Offered,
            offered_at: Utc::now(),
            responded_at: None,
            decline_reason: None,
        }
    }

    #[test]
    fn decline_records_reason_and_timestamp() {
        let mut assignment = offered();
        assignment
            .respond(AssignmentDecision::Decline, Some("conflict of interest".to_string()), Utc::now())
            .expect("offered assignment can be declined");

        assert_eq!(assignment.status, AssignmentStatus::Declined);
        assert_eq!(assignment.decline_reason.as_deref(), Some("conflict of interest"));
        assert!(assignment.responded_at.is_some());
    }

    #[test]
    fn second_response_is_rejected() {
        let mut assignment = offered();
        assignment.respond(AssignmentDecision::Accept, None, Utc::now()).expect("first accept");

        let error = assignment
            .respond(AssignmentDecision::Accept, None, Utc::now())
            .expect_err("replayed accept must fail");

        assert_eq!(
            error,
            DomainError::AssignmentAlreadyResolved {
                id: "ASG-1".to_string(),
                status: AssignmentStatus::Accepted
            }
        );
    }

    #[test]
    fn only_old_offers_are_stale() {
        let mut assignment = offered();
        let now = Utc::now();
        assignment.offered_at = now - Duration::minutes(90);

        assert!(assignment.is_stale(now, Duration::minutes(60)));
        assert!(!assignment.is_stale(now, Duration::minutes(120)));

        assignment.expire(now).expect("stale offer expires");
        assert!(!assignment.is_stale(now, Duration::minutes(60)));
    }

    #[test]
    fn decision_parsing_accepts_wire_values() {
        assert_eq!(AssignmentDecision::parse("Accept"), Some(AssignmentDecision::Accept));
        assert_eq!(AssignmentDecision::parse(" decline "), Some(AssignmentDecision::Decline));
        assert_eq!(AssignmentDecision::parse("maybe"), None);
    }
}
