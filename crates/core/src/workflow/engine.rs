//! Consultation workflow rules.
//!
//! Every operation takes the current rows, validates the caller and the request status,
//! and returns a [`Changeset`] describing the writes. Nothing here touches storage; the
//! store applies the changeset atomically and rejects it if a guarded row moved meanwhile.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::domain::actor::{Actor, ActorRole};
use crate::domain::advisor::{Advisor, AdvisorId};
use crate::domain::assignment::{
    AssignmentDecision, AssignmentId, AssignmentStatus, RequestAssignment,
};
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::domain::request::{
    ConsultationRequest, FileRef, RequestEvent, RequestId, RequestStatus, UserId,
};
use crate::domain::settlement::{Settlement, SettlementId};
use crate::domain::transition::RequestTransition;
use crate::errors::{ApplicationError, DomainError};
use crate::gateway::{GatewayReservation, ReservationHold, ReservationRequest};
use crate::payout::{minor_unit_scale, RevenueSplit};
use crate::ranking::rank_advisors;
use crate::workflow::changeset::{AssignmentWrite, Changeset, OrderWrite, RequestWrite};

pub const MAX_SUMMARY_CHARS: usize = 4000;
/// Largest gross amount a request may carry, in major currency units.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
pub const MAX_ATTACHMENTS: usize = 10;
pub const MAX_COMMENT_CHARS: usize = 1000;

#[derive(Clone, Debug)]
pub struct WorkflowPolicy {
    pub fan_out: u32,
    pub offer_ttl: Duration,
    pub split: RevenueSplit,
    pub default_currency: String,
}

impl WorkflowPolicy {
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, ApplicationError> {
        let split = RevenueSplit::new(config.advisor_share_pct)
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        let offer_ttl = i64::try_from(config.offer_ttl_minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .ok_or_else(|| {
                ApplicationError::Configuration(
                    "workflow.offer_ttl_minutes is out of range".to_string(),
                )
            })?;

        Ok(Self {
            fan_out: config.fan_out,
            offer_ttl,
            split,
            default_currency: config.default_currency.clone(),
        })
    }
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            fan_out: 3,
            offer_ttl: Duration::minutes(1440),
            split: RevenueSplit::default(),
            default_currency: "KWD".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewRequest {
    pub user_id: UserId,
    pub summary: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub discount: Option<Decimal>,
    pub attachments: Vec<FileRef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded { payment_id: Option<String> },
    Failed { reason: String },
}

/// A validated reservation that still needs the gateway call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReservation {
    pub order_id: OrderId,
    pub reservation: ReservationRequest,
}

#[derive(Clone, Debug)]
pub struct ConsultationEngine {
    policy: WorkflowPolicy,
}

impl Default for ConsultationEngine {
    fn default() -> Self {
        Self::new(WorkflowPolicy::default())
    }
}

impl ConsultationEngine {
    pub fn new(policy: WorkflowPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Creates a request, moves it to `pending_advisor` and offers it to the top-ranked advisors.
    pub fn create_request(
        &self,
        actor: &Actor,
        input: NewRequest,
        advisors: &[Advisor],
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        if !(actor.is(ActorRole::User, &input.user_id.0) || actor.is_admin()) {
            return Err(ApplicationError::Validation(
                "user_id must match the calling user".to_string(),
            ));
        }

        let summary = input.summary.trim().to_string();
        if summary.is_empty() {
            return Err(ApplicationError::Validation("summary must not be empty".to_string()));
        }
        if summary.chars().count() > MAX_SUMMARY_CHARS {
            return Err(ApplicationError::Validation(format!(
                "summary must be at most {MAX_SUMMARY_CHARS} characters"
            )));
        }

        let currency = normalize_currency(
            input.currency.as_deref().unwrap_or(self.policy.default_currency.as_str()),
        )?;
        let amount = input.amount;
        if amount <= Decimal::ZERO {
            return Err(ApplicationError::Validation("amount must be positive".to_string()));
        }
        if amount > MAX_AMOUNT {
            return Err(ApplicationError::Validation(format!(
                "amount must not exceed {MAX_AMOUNT}"
            )));
        }
        ensure_minor_units("amount", amount, &currency)?;

        let discount = input.discount.unwrap_or(Decimal::ZERO);
        if discount < Decimal::ZERO || discount > amount {
            return Err(ApplicationError::Validation(
                "discount must be between zero and the amount".to_string(),
            ));
        }
        ensure_minor_units("discount", discount, &currency)?;

        let attachments = normalize_attachments(input.attachments)?;

        let ranked = rank_advisors(advisors, &HashSet::new(), self.policy.fan_out as usize);
        if ranked.is_empty() {
            return Err(ApplicationError::Validation(
                "no eligible advisor is available".to_string(),
            ));
        }

        let request_id = RequestId(Uuid::new_v4().to_string());
        let mut request = ConsultationRequest {
            id: request_id.clone(),
            user_id: input.user_id,
            status: RequestStatus::Submitted,
            gross_amount: amount,
            discount,
            net_amount: amount - discount,
            currency,
            summary,
            attachments,
            advisor_id: None,
            rating: None,
            rating_comment: None,
            close_reason: None,
            created_at: now,
            updated_at: now,
        };

        let mut changeset = Changeset::new(request_id.clone()).with_transition(
            RequestTransition::record(
                &request_id,
                None,
                RequestStatus::Submitted,
                actor.label(),
                Some("request submitted".to_string()),
                now,
            ),
        );

        request.apply(RequestEvent::OffersCreated, now)?;
        changeset = changeset.with_transition(RequestTransition::record(
            &request_id,
            Some(RequestStatus::Submitted),
            request.status,
            actor.label(),
            Some(format!("offered to {} advisor(s)", ranked.len())),
            now,
        ));

        for (index, advisor) in ranked.iter().enumerate() {
            let rank = u32::try_from(index + 1).map_err(|_| {
                DomainError::InvariantViolation("assignment rank overflow".to_string())
            })?;
            changeset = changeset.with_assignment(AssignmentWrite::Insert(new_offer(
                &request_id,
                &advisor.id,
                rank,
                now,
            )));
        }

        Ok(changeset.with_request(RequestWrite::Insert(request)))
    }

    /// Applies an advisor's accept or decline to an offered assignment.
    ///
    /// Assignments held by other advisors are reported as missing.
    pub fn respond(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        assignment: &RequestAssignment,
        decision: AssignmentDecision,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        let holder = actor.is(ActorRole::Advisor, &assignment.advisor_id.0) || actor.is_admin();
        if !holder {
            return Err(ApplicationError::not_found("assignment", assignment.id.0.clone()));
        }
        if assignment.request_id != request.id {
            return Err(DomainError::InvariantViolation(format!(
                "assignment {} does not belong to request {}",
                assignment.id.0, request.id.0
            ))
            .into());
        }
        if assignment.status != AssignmentStatus::Offered {
            return Err(ApplicationError::Conflict(format!(
                "assignment {} was already {}",
                assignment.id.0,
                assignment.status.as_str()
            )));
        }

        let mut updated = assignment.clone();
        let changeset = Changeset::new(request.id.clone());

        match decision {
            AssignmentDecision::Accept => {
                if request.status != RequestStatus::PendingAdvisor {
                    return Err(ApplicationError::Conflict(format!(
                        "request {} is already {}",
                        request.id.0,
                        request.status.as_str()
                    )));
                }

                updated.respond(AssignmentDecision::Accept, None, now)?;
                let mut accepted = request.clone();
                accepted.apply(RequestEvent::AdvisorAccepted, now)?;
                accepted.advisor_id = Some(assignment.advisor_id.clone());

                Ok(changeset
                    .with_transition(RequestTransition::record(
                        &request.id,
                        Some(request.status),
                        accepted.status,
                        actor.label(),
                        Some(format!("accepted by advisor {}", assignment.advisor_id.0)),
                        now,
                    ))
                    .with_request(RequestWrite::Update {
                        request: accepted,
                        expected: RequestStatus::PendingAdvisor,
                    })
                    .with_assignment(AssignmentWrite::Update {
                        assignment: updated,
                        expected: AssignmentStatus::Offered,
                    }))
            }
            AssignmentDecision::Decline => {
                updated.respond(AssignmentDecision::Decline, trimmed(reason), now)?;
                Ok(changeset.with_assignment(AssignmentWrite::Update {
                    assignment: updated,
                    expected: AssignmentStatus::Offered,
                }))
            }
        }
    }

    /// Validates a payment reservation before the gateway is called.
    pub fn prepare_reservation(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        orders: &[Order],
    ) -> Result<PendingReservation, ApplicationError> {
        if !(is_requester(actor, request) || actor.is_admin()) {
            return Err(ApplicationError::Forbidden(
                "only the requester can reserve payment".to_string(),
            ));
        }
        ensure_status(request, RequestStatus::Accepted, "reserve payment")?;
        if let Some(active) = orders.iter().find(|order| order.status.is_active()) {
            return Err(ApplicationError::Conflict(format!(
                "request {} already has {} order {}",
                request.id.0,
                active.status.as_str(),
                active.id.0
            )));
        }

        let order_id = OrderId(Uuid::new_v4().to_string());
        Ok(PendingReservation {
            order_id: order_id.clone(),
            reservation: ReservationRequest {
                order_id,
                request_id: request.id.clone(),
                user_id: request.user_id.clone(),
                amount: request.net_amount,
                currency: request.currency.clone(),
                description: format!("Consultation {}", request.id.0),
            },
        })
    }

    /// Records the order created by a successful gateway reservation.
    pub fn record_reservation(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        pending: PendingReservation,
        gateway: &str,
        reservation: GatewayReservation,
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        ensure_status(request, RequestStatus::Accepted, "reserve payment")?;

        let event = match reservation.hold {
            ReservationHold::Held => RequestEvent::PaymentHeld,
            ReservationHold::AwaitingCustomer => {
                if reservation.payment_url.is_none() {
                    return Err(ApplicationError::Upstream(
                        "gateway requested customer action without a payment url".to_string(),
                    ));
                }
                RequestEvent::PaymentPending
            }
        };

        let order = Order {
            id: pending.order_id,
            request_id: request.id.clone(),
            gross_amount: request.gross_amount,
            net_amount: request.net_amount,
            currency: request.currency.clone(),
            status: OrderStatus::Pending,
            gateway: gateway.to_string(),
            gateway_reference: reservation.reference,
            gateway_payment_id: reservation.payment_id,
            payment_url: reservation.payment_url,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };

        let mut reserved = request.clone();
        reserved.apply(event, now)?;

        Ok(Changeset::new(request.id.clone())
            .with_transition(RequestTransition::record(
                &request.id,
                Some(request.status),
                reserved.status,
                actor.label(),
                Some(format!("order {} via {}", order.id.0, gateway)),
                now,
            ))
            .with_request(RequestWrite::Update { request: reserved, expected: request.status })
            .with_order(OrderWrite::Insert(order)))
    }

    /// Applies the gateway's verdict on a pending order.
    pub fn confirm_payment(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        order: &Order,
        outcome: PaymentOutcome,
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        if !actor.is_privileged() {
            return Err(ApplicationError::Forbidden(
                "payment confirmation is restricted to the payment system".to_string(),
            ));
        }
        if order.request_id != request.id {
            return Err(DomainError::InvariantViolation(format!(
                "order {} does not belong to request {}",
                order.id.0, request.id.0
            ))
            .into());
        }
        if order.status != OrderStatus::Pending {
            return Err(ApplicationError::Conflict(format!(
                "order {} is already {}",
                order.id.0,
                order.status.as_str()
            )));
        }

        let mut settled_order = order.clone();
        let mut updated = request.clone();
        let reason = match outcome {
            PaymentOutcome::Succeeded { payment_id } => {
                settled_order.mark_paid(trimmed(payment_id), now)?;
                updated.apply(RequestEvent::PaymentCaptured, now)?;
                format!("order {} paid", order.id.0)
            }
            PaymentOutcome::Failed { reason } => {
                let reason = trimmed(Some(reason)).unwrap_or_else(|| "unspecified".to_string());
                settled_order.mark_failed(reason.clone(), now)?;
                updated.apply(RequestEvent::PaymentFailed, now)?;
                format!("order {} failed: {reason}", order.id.0)
            }
        };

        Ok(Changeset::new(request.id.clone())
            .with_transition(RequestTransition::record(
                &request.id,
                Some(request.status),
                updated.status,
                actor.label(),
                Some(reason),
                now,
            ))
            .with_request(RequestWrite::Update { request: updated, expected: request.status })
            .with_order(OrderWrite::Update {
                order: settled_order,
                expected: OrderStatus::Pending,
            }))
    }

    pub fn start_session(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        if !(is_assigned_advisor(actor, request) || actor.is_admin()) {
            return Err(ApplicationError::Forbidden(
                "only the assigned advisor can start the session".to_string(),
            ));
        }
        ensure_status(request, RequestStatus::Paid, "start the session")?;

        let mut started = request.clone();
        started.apply(RequestEvent::SessionStarted, now)?;

        Ok(Changeset::new(request.id.clone())
            .with_transition(RequestTransition::record(
                &request.id,
                Some(request.status),
                started.status,
                actor.label(),
                None,
                now,
            ))
            .with_request(RequestWrite::Update { request: started, expected: RequestStatus::Paid }))
    }

    /// Completes the session and releases the advisor's share of the paid order.
    pub fn complete_and_release(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        orders: &[Order],
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        if !(is_assigned_advisor(actor, request) || actor.is_privileged()) {
            return Err(ApplicationError::Forbidden(
                "only the assigned advisor can complete the session".to_string(),
            ));
        }
        ensure_status(request, RequestStatus::InProgress, "complete the session")?;

        let order = orders.iter().find(|order| order.status == OrderStatus::Paid).ok_or_else(
            || ApplicationError::State(format!("request {} has no paid order", request.id.0)),
        )?;
        let advisor_id = request.advisor_id.clone().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "request {} is in progress without an advisor",
                request.id.0
            ))
        })?;
        let split = self.policy.split.split(order.net_amount, &order.currency)?;

        let mut released = request.clone();
        released.apply(RequestEvent::SessionCompleted, now)?;
        let completed = RequestTransition::record(
            &request.id,
            Some(RequestStatus::InProgress),
            released.status,
            actor.label(),
            None,
            now,
        );
        released.apply(RequestEvent::FundsReleased, now)?;
        let funds_released = RequestTransition::record(
            &request.id,
            Some(RequestStatus::Completed),
            released.status,
            actor.label(),
            Some(format!(
                "advisor share {} {} (platform fee {})",
                split.advisor_share, order.currency, split.platform_fee
            )),
            now,
        );

        let settlement = Settlement {
            id: SettlementId(Uuid::new_v4().to_string()),
            request_id: request.id.clone(),
            order_id: order.id.clone(),
            advisor_id,
            gross: order.net_amount,
            advisor_share: split.advisor_share,
            platform_fee: split.platform_fee,
            currency: order.currency.clone(),
            released_at: now,
        };

        Ok(Changeset::new(request.id.clone())
            .with_transition(completed)
            .with_transition(funds_released)
            .with_request(RequestWrite::Update {
                request: released,
                expected: RequestStatus::InProgress,
            })
            .with_settlement(settlement))
    }

    /// Offers a still-pending request to the best advisor who has not been offered it yet.
    pub fn promote_next_candidate(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        assignments: &[RequestAssignment],
        advisors: &[Advisor],
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        if !(is_requester(actor, request) || actor.is_privileged()) {
            return Err(ApplicationError::Forbidden(
                "only the requester or operators can promote candidates".to_string(),
            ));
        }
        ensure_status(request, RequestStatus::PendingAdvisor, "promote a candidate")?;

        let offered: HashSet<AdvisorId> =
            assignments.iter().map(|assignment| assignment.advisor_id.clone()).collect();
        let candidate = rank_advisors(advisors, &offered, 1).into_iter().next().ok_or_else(|| {
            ApplicationError::State(format!(
                "no eligible advisor remains for request {}",
                request.id.0
            ))
        })?;
        let rank = assignments.iter().map(|assignment| assignment.rank).max().unwrap_or(0) + 1;

        let mut touched = request.clone();
        touched.updated_at = now;

        Ok(Changeset::new(request.id.clone())
            .with_request(RequestWrite::Update {
                request: touched,
                expected: RequestStatus::PendingAdvisor,
            })
            .with_assignment(AssignmentWrite::Insert(new_offer(
                &request.id,
                &candidate.id,
                rank,
                now,
            ))))
    }

    /// Closes a request that has not been paid. Open offers expire and pending orders are cancelled.
    pub fn close(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        assignments: &[RequestAssignment],
        orders: &[Order],
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        if !(is_requester(actor, request) || actor.is_admin()) {
            return Err(ApplicationError::Forbidden(
                "only the requester can close the request".to_string(),
            ));
        }
        if !request.can_apply(RequestEvent::CloseRequested) {
            return Err(ApplicationError::State(format!(
                "request {} is {} and can no longer be closed",
                request.id.0,
                request.status.as_str()
            )));
        }

        let reason = trimmed(reason);
        let mut closed = request.clone();
        closed.apply(RequestEvent::CloseRequested, now)?;
        closed.close_reason = reason.clone();

        let mut changeset = Changeset::new(request.id.clone()).with_transition(
            RequestTransition::record(
                &request.id,
                Some(request.status),
                closed.status,
                actor.label(),
                reason,
                now,
            ),
        );

        for assignment in assignments.iter().filter(|a| a.status == AssignmentStatus::Offered) {
            let mut expired = assignment.clone();
            expired.expire(now)?;
            changeset = changeset.with_assignment(AssignmentWrite::Update {
                assignment: expired,
                expected: AssignmentStatus::Offered,
            });
        }

        for order in orders.iter().filter(|order| order.status == OrderStatus::Pending) {
            let mut cancelled = order.clone();
            cancelled.cancel(now)?;
            changeset = changeset
                .with_order(OrderWrite::Update { order: cancelled, expected: OrderStatus::Pending });
        }

        Ok(changeset.with_request(RequestWrite::Update { request: closed, expected: request.status }))
    }

    pub fn rate(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        rating: u8,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        if !is_requester(actor, request) {
            return Err(ApplicationError::Forbidden(
                "only the requester can rate the consultation".to_string(),
            ));
        }
        if !(1..=5).contains(&rating) {
            return Err(ApplicationError::Validation("rating must be between 1 and 5".to_string()));
        }
        let comment = trimmed(comment);
        if comment.as_ref().is_some_and(|text| text.chars().count() > MAX_COMMENT_CHARS) {
            return Err(ApplicationError::Validation(format!(
                "comment must be at most {MAX_COMMENT_CHARS} characters"
            )));
        }
        ensure_status(request, RequestStatus::Released, "rate the consultation")?;

        let mut rated = request.clone();
        rated.apply(RequestEvent::RatingSubmitted, now)?;
        rated.rating = Some(rating);
        rated.rating_comment = comment;

        Ok(Changeset::new(request.id.clone())
            .with_transition(RequestTransition::record(
                &request.id,
                Some(request.status),
                rated.status,
                actor.label(),
                Some(format!("rated {rating}/5")),
                now,
            ))
            .with_request(RequestWrite::Update { request: rated, expected: RequestStatus::Released }))
    }

    /// Offers older than the configured TTL.
    pub fn stale_offers<'a>(
        &self,
        assignments: &'a [RequestAssignment],
        now: DateTime<Utc>,
    ) -> Vec<&'a RequestAssignment> {
        assignments
            .iter()
            .filter(|assignment| assignment.is_stale(now, self.policy.offer_ttl))
            .collect()
    }

    /// Expires one offer. The request status is left untouched.
    pub fn expire_offer(
        &self,
        assignment: &RequestAssignment,
        now: DateTime<Utc>,
    ) -> Result<Changeset, ApplicationError> {
        let mut expired = assignment.clone();
        expired.expire(now).map_err(|_| {
            ApplicationError::Conflict(format!(
                "assignment {} was already {}",
                assignment.id.0,
                assignment.status.as_str()
            ))
        })?;

        Ok(Changeset::new(assignment.request_id.clone()).with_assignment(AssignmentWrite::Update {
            assignment: expired,
            expected: AssignmentStatus::Offered,
        }))
    }

    /// Whether `actor` may read `request`: its requester, its advisor, an advisor holding an
    /// open offer while the request still waits for an advisor, or an operator.
    pub fn can_view(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        assignments: &[RequestAssignment],
    ) -> bool {
        actor.is_privileged()
            || is_requester(actor, request)
            || is_assigned_advisor(actor, request)
            || (actor.role == ActorRole::Advisor
                && request.status == RequestStatus::PendingAdvisor
                && assignments.iter().any(|assignment| {
                    assignment.advisor_id.0 == actor.id
                        && assignment.status == AssignmentStatus::Offered
                }))
    }

    /// Assignments `actor` may see. Advisors only ever see their own.
    pub fn visible_assignments(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        assignments: &[RequestAssignment],
    ) -> Vec<RequestAssignment> {
        if actor.is_privileged() || is_requester(actor, request) {
            return assignments.to_vec();
        }
        assignments
            .iter()
            .filter(|assignment| assignment.advisor_id.0 == actor.id)
            .cloned()
            .collect()
    }

    /// Status history `actor` may see. Advisors keep every status change but only the
    /// reasons they recorded themselves.
    pub fn visible_transitions(
        &self,
        actor: &Actor,
        request: &ConsultationRequest,
        transitions: Vec<RequestTransition>,
    ) -> Vec<RequestTransition> {
        if actor.is_privileged() || is_requester(actor, request) {
            return transitions;
        }
        let label = actor.label();
        transitions
            .into_iter()
            .map(|transition| {
                if transition.actor == label {
                    transition
                } else {
                    RequestTransition { reason: None, ..transition }
                }
            })
            .collect()
    }

    pub fn ensure_can_list_requests(
        &self,
        actor: &Actor,
        user_id: &UserId,
    ) -> Result<(), ApplicationError> {
        if actor.is(ActorRole::User, &user_id.0) || actor.is_privileged() {
            return Ok(());
        }
        Err(ApplicationError::Forbidden("requests can only be listed by their owner".to_string()))
    }

    pub fn ensure_can_list_offers(
        &self,
        actor: &Actor,
        advisor_id: &AdvisorId,
    ) -> Result<(), ApplicationError> {
        if actor.is(ActorRole::Advisor, &advisor_id.0) || actor.is_privileged() {
            return Ok(());
        }
        Err(ApplicationError::Forbidden("offers can only be listed by their advisor".to_string()))
    }
}

fn new_offer(
    request_id: &RequestId,
    advisor_id: &AdvisorId,
    rank: u32,
    now: DateTime<Utc>,
) -> RequestAssignment {
    RequestAssignment {
        id: AssignmentId(Uuid::new_v4().to_string()),
        request_id: request_id.clone(),
        advisor_id: advisor_id.clone(),
        rank,
        status: AssignmentStatus::Offered,
        offered_at: now,
        responded_at: None,
        decline_reason: None,
    }
}

fn is_requester(actor: &Actor, request: &ConsultationRequest) -> bool {
    actor.role == ActorRole::User && request.is_owned_by(&actor.id)
}

fn is_assigned_advisor(actor: &Actor, request: &ConsultationRequest) -> bool {
    actor.role == ActorRole::Advisor && request.is_assigned_to(&actor.id)
}

fn ensure_status(
    request: &ConsultationRequest,
    expected: RequestStatus,
    action: &str,
) -> Result<(), ApplicationError> {
    if request.status == expected {
        return Ok(());
    }
    Err(ApplicationError::State(format!(
        "cannot {action}: request {} is {}, expected {}",
        request.id.0,
        request.status.as_str(),
        expected.as_str()
    )))
}

fn normalize_currency(raw: &str) -> Result<String, ApplicationError> {
    let currency = raw.trim().to_ascii_uppercase();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ApplicationError::Validation(format!(
            "currency `{raw}` is not a three-letter ISO-4217 code"
        )));
    }
    Ok(currency)
}

fn ensure_minor_units(
    field: &str,
    amount: Decimal,
    currency: &str,
) -> Result<(), ApplicationError> {
    let scale = minor_unit_scale(currency);
    if amount.normalize().scale() > scale {
        return Err(ApplicationError::Validation(format!(
            "{field} {amount} has more than {scale} decimal places for {currency}"
        )));
    }
    Ok(())
}

fn normalize_attachments(files: Vec<FileRef>) -> Result<Vec<FileRef>, ApplicationError> {
    if files.len() > MAX_ATTACHMENTS {
        return Err(ApplicationError::Validation(format!(
            "at most {MAX_ATTACHMENTS} attachments are allowed"
        )));
    }

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(files.len());
    for file in files {
        let id = file.0.trim().to_string();
        if id.is_empty() {
            return Err(ApplicationError::Validation(
                "attachment references must not be blank".to_string(),
            ));
        }
        if seen.insert(id.clone()) {
            normalized.push(FileRef(id));
        }
    }
    Ok(normalized)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|text| text.trim().to_string()).filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{ConsultationEngine, NewRequest, PaymentOutcome};
    use crate::domain::actor::{Actor, ActorRole};
    use crate::domain::advisor::{Advisor, AdvisorId, AdvisorStatus};
    use crate::domain::assignment::{AssignmentDecision, AssignmentStatus, RequestAssignment};
    use crate::domain::order::{Order, OrderStatus};
    use crate::domain::request::{ConsultationRequest, FileRef, RequestStatus, UserId};
    use crate::domain::transition::RequestTransition;
    use crate::errors::ApplicationError;
    use crate::gateway::{GatewayReservation, ReservationHold};
    use crate::workflow::changeset::{Changeset, RequestWrite};

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).expect("valid decimal literal")
    }

    fn advisors() -> Vec<Advisor> {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("valid date");
        [("ADV-A", Some("4.9")), ("ADV-B", Some("4.7")), ("ADV-C", Some("4.2")), ("ADV-D", None)]
            .into_iter()
            .enumerate()
            .map(|(index, (id, rating))| Advisor {
                id: AdvisorId(id.to_string()),
                display_name: id.to_string(),
                email: format!("{}@example.com", id.to_ascii_lowercase()),
                status: AdvisorStatus::Active,
                rating: rating.map(dec),
                created_at: base + Duration::days(index as i64),
            })
            .collect()
    }

    fn user() -> Actor {
        Actor::new("U-1", ActorRole::User)
    }

    fn advisor(id: &str) -> Actor {
        Actor::new(id, ActorRole::Advisor)
    }

    fn new_request(amount: &str) -> NewRequest {
        NewRequest {
            user_id: UserId("U-1".to_string()),
            summary: "Is murabaha financing for my car compliant?".to_string(),
            amount: dec(amount),
            currency: None,
            discount: None,
            attachments: vec![FileRef("file-1".to_string())],
        }
    }

    fn created(engine: &ConsultationEngine) -> (ConsultationRequest, Vec<RequestAssignment>) {
        let changeset = engine
            .create_request(&user(), new_request("100.000"), &advisors(), Utc::now())
            .expect("request is created");
        let request = changeset.request_after().cloned().expect("request is written");
        let assignments = changeset.assignments_after().cloned().collect();
        (request, assignments)
    }

    fn apply_request(changeset: &Changeset) -> ConsultationRequest {
        changeset.request_after().cloned().expect("changeset writes the request")
    }

    fn accepted(engine: &ConsultationEngine) -> (ConsultationRequest, Vec<RequestAssignment>) {
        let (request, assignments) = created(engine);
        let changeset = engine
            .respond(
                &advisor("ADV-B"),
                &request,
                &assignments[1],
                AssignmentDecision::Accept,
                None,
                Utc::now(),
            )
            .expect("ADV-B accepts");
        (apply_request(&changeset), assignments)
    }

    fn held_order(
        engine: &ConsultationEngine,
        request: &ConsultationRequest,
    ) -> (ConsultationRequest, Order) {
        let pending = engine.prepare_reservation(&user(), request, &[]).expect("reservable");
        let changeset = engine
            .record_reservation(
                &user(),
                request,
                pending,
                "manual",
                GatewayReservation {
                    reference: "manual-1".to_string(),
                    payment_id: None,
                    payment_url: None,
                    hold: ReservationHold::Held,
                },
                Utc::now(),
            )
            .expect("reservation recorded");
        let order = changeset.orders_after().next().cloned().expect("order is inserted");
        (apply_request(&changeset), order)
    }

    #[test]
    fn create_offers_top_ranked_advisors_and_logs_two_transitions() {
        let engine = ConsultationEngine::default();
        let changeset = engine
            .create_request(&user(), new_request("100.000"), &advisors(), Utc::now())
            .expect("request is created");

        let request = changeset.request_after().expect("request written");
        assert!(matches!(changeset.request, Some(RequestWrite::Insert(_))));
        assert_eq!(request.status, RequestStatus::PendingAdvisor);
        assert_eq!(request.currency, "KWD");
        assert_eq!(request.net_amount, dec("100.000"));

        let offers: Vec<(String, u32)> = changeset
            .assignments_after()
            .map(|assignment| (assignment.advisor_id.0.clone(), assignment.rank))
            .collect();
        assert_eq!(
            offers,
            vec![("ADV-A".to_string(), 1), ("ADV-B".to_string(), 2), ("ADV-C".to_string(), 3)]
        );

        let statuses: Vec<(Option<RequestStatus>, RequestStatus)> = changeset
            .transitions
            .iter()
            .map(|transition| (transition.from_status, transition.to_status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (None, RequestStatus::Submitted),
                (Some(RequestStatus::Submitted), RequestStatus::PendingAdvisor)
            ]
        );
    }

    #[test]
    fn create_rejects_invalid_input() {
        let engine = ConsultationEngine::default();
        let now = Utc::now();
        let cases = [
            NewRequest { summary: "   ".to_string(), ..new_request("10") },
            new_request("0"),
            new_request("10.0001"),
            new_request("1000000001"),
            NewRequest { discount: Some(dec("11")), ..new_request("10") },
            NewRequest { discount: Some(dec("-1")), ..new_request("10") },
            NewRequest { currency: Some("KW".to_string()), ..new_request("10") },
            NewRequest { attachments: vec![FileRef(" ".to_string())], ..new_request("10") },
        ];

        for input in cases {
            let error = engine
                .create_request(&user(), input, &advisors(), now)
                .expect_err("invalid input is rejected");
            assert!(matches!(error, ApplicationError::Validation(_)), "got {error:?}");
        }
    }

    #[test]
    fn create_on_behalf_of_another_user_is_rejected() {
        let engine = ConsultationEngine::default();
        let error = engine
            .create_request(
                &Actor::new("U-2", ActorRole::User),
                new_request("10"),
                &advisors(),
                Utc::now(),
            )
            .expect_err("caller must be the requester");
        assert!(matches!(error, ApplicationError::Validation(_)));
    }

    #[test]
    fn create_without_active_advisors_is_rejected() {
        let engine = ConsultationEngine::default();
        let mut inactive = advisors();
        for advisor in &mut inactive {
            advisor.status = AdvisorStatus::Inactive;
        }

        let error = engine
            .create_request(&user(), new_request("10"), &inactive, Utc::now())
            .expect_err("nobody to offer to");
        assert!(matches!(error, ApplicationError::Validation(ref message) if message.contains("eligible")));
    }

    #[test]
    fn discount_reduces_net_amount() {
        let engine = ConsultationEngine::default();
        let changeset = engine
            .create_request(
                &user(),
                NewRequest {
                    discount: Some(dec("15.500")),
                    currency: Some("kwd".to_string()),
                    ..new_request("100")
                },
                &advisors(),
                Utc::now(),
            )
            .expect("request is created");
        let request = changeset.request_after().expect("request written");
        assert_eq!(request.net_amount, dec("84.5"));
        assert_eq!(request.currency, "KWD");
    }

    #[test]
    fn decline_leaves_request_pending() {
        let engine = ConsultationEngine::default();
        let (request, assignments) = created(&engine);

        let changeset = engine
            .respond(
                &advisor("ADV-A"),
                &request,
                &assignments[0],
                AssignmentDecision::Decline,
                Some("  outside my field  ".to_string()),
                Utc::now(),
            )
            .expect("rank 1 declines");

        assert!(changeset.request.is_none());
        assert!(changeset.transitions.is_empty());
        let declined = changeset.assignments_after().next().expect("assignment updated");
        assert_eq!(declined.status, AssignmentStatus::Declined);
        assert_eq!(declined.decline_reason.as_deref(), Some("outside my field"));
    }

    #[test]
    fn accept_assigns_advisor_and_second_accept_conflicts() {
        let engine = ConsultationEngine::default();
        let (request, assignments) = accepted(&engine);

        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(request.advisor_id.as_ref().map(|id| id.0.as_str()), Some("ADV-B"));

        let error = engine
            .respond(
                &advisor("ADV-C"),
                &request,
                &assignments[2],
                AssignmentDecision::Accept,
                None,
                Utc::now(),
            )
            .expect_err("request already accepted");
        assert!(matches!(error, ApplicationError::Conflict(_)));
    }

    #[test]
    fn replayed_response_conflicts() {
        let engine = ConsultationEngine::default();
        let (request, mut assignments) = created(&engine);
        assignments[0].status = AssignmentStatus::Declined;

        let error = engine
            .respond(
                &advisor("ADV-A"),
                &request,
                &assignments[0],
                AssignmentDecision::Decline,
                None,
                Utc::now(),
            )
            .expect_err("already declined");
        assert!(matches!(error, ApplicationError::Conflict(_)));
    }

    #[test]
    fn other_advisors_cannot_see_foreign_assignments() {
        let engine = ConsultationEngine::default();
        let (request, assignments) = created(&engine);

        let error = engine
            .respond(
                &advisor("ADV-C"),
                &request,
                &assignments[0],
                AssignmentDecision::Accept,
                None,
                Utc::now(),
            )
            .expect_err("ADV-C does not hold rank 1");
        assert!(matches!(error, ApplicationError::NotFound { entity: "assignment", .. }));

        let visible = engine.visible_assignments(&advisor("ADV-C"), &request, &assignments);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].advisor_id.0, "ADV-C");
        assert!(!engine.can_view(&advisor("ADV-D"), &request, &assignments));
        assert!(engine.can_view(&advisor("ADV-A"), &request, &assignments));
    }

    #[test]
    fn superseded_offers_lose_visibility_once_another_advisor_accepts() {
        let engine = ConsultationEngine::default();
        let (request, assignments) = accepted(&engine);

        assert_eq!(assignments[0].status, AssignmentStatus::Offered);
        assert!(!engine.can_view(&advisor("ADV-A"), &request, &assignments));
        assert!(!engine.can_view(&advisor("ADV-C"), &request, &assignments));
        assert!(engine.can_view(&advisor("ADV-B"), &request, &assignments));
    }

    #[test]
    fn advisors_only_see_their_own_transition_reasons() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let transitions = vec![
            RequestTransition::record(
                &request.id,
                None,
                RequestStatus::Submitted,
                user().label(),
                Some("request submitted".to_string()),
                Utc::now(),
            ),
            RequestTransition::record(
                &request.id,
                Some(RequestStatus::PendingAdvisor),
                RequestStatus::Accepted,
                advisor("ADV-B").label(),
                Some("accepted by advisor ADV-B".to_string()),
                Utc::now(),
            ),
        ];

        let seen = engine.visible_transitions(&advisor("ADV-B"), &request, transitions.clone());
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].reason, None);
        assert_eq!(seen[1].reason.as_deref(), Some("accepted by advisor ADV-B"));

        let owner = engine.visible_transitions(&user(), &request, transitions);
        assert_eq!(owner[0].reason.as_deref(), Some("request submitted"));
    }

    #[test]
    fn reservation_requires_exactly_accepted() {
        let engine = ConsultationEngine::default();
        let (request, _) = created(&engine);

        let error = engine
            .prepare_reservation(&user(), &request, &[])
            .expect_err("pending requests cannot be paid");
        assert!(matches!(error, ApplicationError::State(_)));

        let (accepted, _) = accepted(&engine);
        for status in [
            RequestStatus::Submitted,
            RequestStatus::AwaitingPayment,
            RequestStatus::PaymentReserved,
            RequestStatus::Paid,
            RequestStatus::InProgress,
            RequestStatus::Completed,
            RequestStatus::Released,
            RequestStatus::Rated,
            RequestStatus::Closed,
        ] {
            let request = ConsultationRequest { status, ..accepted.clone() };
            let error = engine
                .prepare_reservation(&user(), &request, &[])
                .expect_err("only accepted requests can be paid");
            assert!(
                matches!(error, ApplicationError::State(_)),
                "{} gave {error:?}",
                status.as_str()
            );
        }
    }

    #[test]
    fn second_reservation_after_hold_is_state_error() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let (reserved, order) = held_order(&engine, &request);

        assert_eq!(reserved.status, RequestStatus::PaymentReserved);
        let error = engine
            .prepare_reservation(&user(), &reserved, &[order])
            .expect_err("a reserved request cannot be paid twice");
        assert!(matches!(error, ApplicationError::State(_)));
    }

    #[test]
    fn reservation_by_non_owner_is_forbidden() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);

        let error = engine
            .prepare_reservation(&Actor::new("U-2", ActorRole::User), &request, &[])
            .expect_err("not the requester");
        assert!(matches!(error, ApplicationError::Forbidden(_)));
    }

    #[test]
    fn held_reservation_creates_pending_order() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let (reserved, order) = held_order(&engine, &request);

        assert_eq!(reserved.status, RequestStatus::PaymentReserved);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.net_amount, dec("100.000"));
        assert_eq!(order.gateway, "manual");

        let error = engine
            .prepare_reservation(&user(), &request, &[order])
            .expect_err("second active order");
        assert!(matches!(error, ApplicationError::Conflict(_)));
    }

    #[test]
    fn customer_redirect_moves_request_to_awaiting_payment() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let pending = engine.prepare_reservation(&user(), &request, &[]).expect("reservable");

        let changeset = engine
            .record_reservation(
                &user(),
                &request,
                pending,
                "http",
                GatewayReservation {
                    reference: "inv-7".to_string(),
                    payment_id: Some("pay-7".to_string()),
                    payment_url: Some("https://pay.example/inv-7".to_string()),
                    hold: ReservationHold::AwaitingCustomer,
                },
                Utc::now(),
            )
            .expect("redirect recorded");

        assert_eq!(apply_request(&changeset).status, RequestStatus::AwaitingPayment);
        let order = changeset.orders_after().next().expect("order inserted");
        assert_eq!(order.payment_url.as_deref(), Some("https://pay.example/inv-7"));
    }

    #[test]
    fn failed_payment_returns_to_accepted_for_retry() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let (reserved, order) = held_order(&engine, &request);

        let changeset = engine
            .confirm_payment(
                &Actor::system(),
                &reserved,
                &order,
                PaymentOutcome::Failed { reason: "card declined".to_string() },
                Utc::now(),
            )
            .expect("failure recorded");

        let request = apply_request(&changeset);
        let failed = changeset.orders_after().next().cloned().expect("order updated");
        assert_eq!(request.status, RequestStatus::Accepted);
        assert_eq!(failed.status, OrderStatus::Failed);
        engine.prepare_reservation(&user(), &request, &[failed]).expect("retry allowed");
    }

    #[test]
    fn users_cannot_confirm_their_own_payment() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let (reserved, order) = held_order(&engine, &request);

        let error = engine
            .confirm_payment(
                &user(),
                &reserved,
                &order,
                PaymentOutcome::Succeeded { payment_id: None },
                Utc::now(),
            )
            .expect_err("users are not the payment system");
        assert!(matches!(error, ApplicationError::Forbidden(_)));
    }

    #[test]
    fn full_lifecycle_releases_seventy_percent() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let (reserved, order) = held_order(&engine, &request);

        let paid = engine
            .confirm_payment(
                &Actor::system(),
                &reserved,
                &order,
                PaymentOutcome::Succeeded { payment_id: Some("PAY-1".to_string()) },
                Utc::now(),
            )
            .expect("payment captured");
        let request = apply_request(&paid);
        let order = paid.orders_after().next().cloned().expect("order updated");
        assert_eq!(request.status, RequestStatus::Paid);

        let early = engine
            .complete_and_release(&advisor("ADV-B"), &request, &[order.clone()], Utc::now())
            .expect_err("session has not started");
        assert!(matches!(early, ApplicationError::State(_)));

        let started =
            engine.start_session(&advisor("ADV-B"), &request, Utc::now()).expect("session starts");
        let request = apply_request(&started);
        assert_eq!(request.status, RequestStatus::InProgress);

        let released = engine
            .complete_and_release(&advisor("ADV-B"), &request, &[order], Utc::now())
            .expect("funds released");
        assert_eq!(released.transitions.len(), 2);
        let settlement = released.settlement.clone().expect("settlement recorded");
        assert_eq!(settlement.advisor_share, dec("70.000"));
        assert_eq!(settlement.platform_fee, dec("30.000"));
        assert_eq!(settlement.advisor_id.0, "ADV-B");

        let request = apply_request(&released);
        assert_eq!(request.status, RequestStatus::Released);

        let rated = engine
            .rate(&user(), &request, 5, Some("Very clear".to_string()), Utc::now())
            .expect("requester rates");
        let request = apply_request(&rated);
        assert_eq!(request.status, RequestStatus::Rated);
        assert_eq!(request.rating, Some(5));
    }

    #[test]
    fn release_requires_paid_order() {
        let engine = ConsultationEngine::default();
        let (mut request, _) = accepted(&engine);
        request.status = RequestStatus::InProgress;

        let error = engine
            .complete_and_release(&advisor("ADV-B"), &request, &[], Utc::now())
            .expect_err("no paid order");
        assert!(matches!(error, ApplicationError::State(ref message) if message.contains("paid order")));
    }

    #[test]
    fn promote_offers_next_advisor_with_next_rank() {
        let engine = ConsultationEngine::default();
        let (request, mut assignments) = created(&engine);
        assignments[0].status = AssignmentStatus::Declined;

        let changeset = engine
            .promote_next_candidate(&user(), &request, &assignments, &advisors(), Utc::now())
            .expect("ADV-D is still available");

        let offer = changeset.assignments_after().next().expect("new offer");
        assert_eq!(offer.advisor_id.0, "ADV-D");
        assert_eq!(offer.rank, 4);
        assert_eq!(offer.status, AssignmentStatus::Offered);
        assert!(matches!(
            changeset.request,
            Some(RequestWrite::Update { expected: RequestStatus::PendingAdvisor, .. })
        ));
    }

    #[test]
    fn promote_without_candidates_or_outside_pending_is_state_error() {
        let engine = ConsultationEngine::default();
        let (request, assignments) = created(&engine);
        let only_offered: Vec<Advisor> =
            advisors().into_iter().filter(|advisor| advisor.id.0 != "ADV-D").collect();

        let exhausted = engine
            .promote_next_candidate(&user(), &request, &assignments, &only_offered, Utc::now())
            .expect_err("everyone was offered");
        assert!(matches!(exhausted, ApplicationError::State(_)));

        let (accepted_request, assignments) = accepted(&engine);
        let wrong_state = engine
            .promote_next_candidate(&user(), &accepted_request, &assignments, &advisors(), Utc::now())
            .expect_err("already accepted");
        assert!(matches!(wrong_state, ApplicationError::State(_)));
    }

    #[test]
    fn close_expires_offers_and_cancels_pending_orders() {
        let engine = ConsultationEngine::default();
        let (request, _) = accepted(&engine);
        let (reserved, order) = held_order(&engine, &request);

        let changeset = engine
            .close(&user(), &reserved, &[], &[order], Some("found an answer".to_string()), Utc::now())
            .expect("unpaid requests can be closed");

        let closed = apply_request(&changeset);
        assert_eq!(closed.status, RequestStatus::Closed);
        assert_eq!(closed.close_reason.as_deref(), Some("found an answer"));
        let cancelled = changeset.orders_after().next().expect("order cancelled");
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let (pending, assignments) = created(&engine);
        let changeset =
            engine.close(&user(), &pending, &assignments, &[], None, Utc::now()).expect("closable");
        assert!(changeset
            .assignments_after()
            .all(|assignment| assignment.status == AssignmentStatus::Expired));
        assert_eq!(changeset.assignments.len(), 3);
    }

    #[test]
    fn paid_requests_cannot_be_closed() {
        let engine = ConsultationEngine::default();
        let (mut request, _) = accepted(&engine);
        request.status = RequestStatus::Paid;

        let error = engine
            .close(&user(), &request, &[], &[], None, Utc::now())
            .expect_err("past cancellation window");
        assert!(matches!(error, ApplicationError::State(_)));
    }

    #[test]
    fn rating_must_be_between_one_and_five() {
        let engine = ConsultationEngine::default();
        let (mut request, _) = accepted(&engine);
        request.status = RequestStatus::Released;

        let error = engine.rate(&user(), &request, 6, None, Utc::now()).expect_err("out of range");
        assert!(matches!(error, ApplicationError::Validation(_)));
    }

    #[test]
    fn only_stale_offers_expire() {
        let engine = ConsultationEngine::default();
        let (_, mut assignments) = created(&engine);
        let now = Utc::now();
        assignments[0].offered_at = now - Duration::hours(25);
        assignments[1].offered_at = now - Duration::hours(25);
        assignments[1].status = AssignmentStatus::Declined;

        let stale = engine.stale_offers(&assignments, now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].advisor_id.0, "ADV-A");

        let changeset = engine.expire_offer(stale[0], now).expect("stale offer expires");
        assert!(changeset.request.is_none());
        assert_eq!(
            changeset.assignments_after().next().map(|assignment| assignment.status),
            Some(AssignmentStatus::Expired)
        );

        let error = engine.expire_offer(&assignments[1], now).expect_err("declined stays declined");
        assert!(matches!(error, ApplicationError::Conflict(_)));
    }

    #[test]
    fn listing_is_limited_to_own_rows() {
        let engine = ConsultationEngine::default();
        assert!(engine.ensure_can_list_requests(&user(), &UserId("U-1".to_string())).is_ok());
        assert!(engine.ensure_can_list_requests(&user(), &UserId("U-2".to_string())).is_err());
        assert!(engine
            .ensure_can_list_offers(&advisor("ADV-A"), &AdvisorId("ADV-A".to_string()))
            .is_ok());
        assert!(engine
            .ensure_can_list_offers(&advisor("ADV-A"), &AdvisorId("ADV-B".to_string()))
            .is_err());
    }
}
